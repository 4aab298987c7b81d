use std::collections::HashSet;

use arbor_core::resource::{ResourceAccessor, path};

/// 按“搜索路径 × 类型继承链”惰性产出候选目录。
///
/// # 教案式说明
/// - **What**：对类型链 `初始类型 → 父类型 → … → 基础类型` 中的每个类型，
///   相对类型依次拼接每个搜索路径条目产出，绝对类型只产出一次；
///   例如 `a/b` 在 `["/apps/", "/libs/"]` 下产出 `/apps/a/b`、`/libs/a/b`，随后进入父类型。
/// - **How**：迭代器持有当前类型、当前相对路径与搜索路径游标；父类型优先取构造时显式给出的值
///   （仅对初始类型有效），否则通过 [`ResourceAccessor::parent_resource_type`] 查询。
///   已访问类型记录在集合中，再次遇到时记录错误日志并改用基础类型，因此即便继承链成环也必然终止。
/// - **契约**：当前类型等于基础类型时链条结束；缺失父类型同样回落到基础类型。
///   搜索路径为空时使用 `["/"]`。迭代器不可重启，也不跨线程共享。
pub struct LocationIterator<'a> {
    accessor: &'a dyn ResourceAccessor,
    search_path: Vec<String>,
    base_resource_type: String,
    first_resource_type: String,
    first_resource_super_type: Option<String>,
    resource_type: Option<String>,
    relative_path: Option<String>,
    search_path_index: usize,
    used_resource_types: HashSet<String>,
    hierarchy_truncated: bool,
}

impl<'a> LocationIterator<'a> {
    pub fn new(
        resource_type: &str,
        resource_super_type: Option<&str>,
        base_resource_type: &str,
        accessor: &'a dyn ResourceAccessor,
    ) -> Self {
        let mut search_path: Vec<String> = accessor
            .search_path()
            .into_iter()
            .map(|mut entry| {
                if !entry.ends_with('/') {
                    entry.push('/');
                }
                entry
            })
            .collect();
        if search_path.is_empty() {
            search_path.push("/".to_owned());
        }

        let mut used_resource_types = HashSet::new();
        used_resource_types.insert(resource_type.to_owned());

        Self {
            accessor,
            search_path,
            base_resource_type: base_resource_type.to_owned(),
            first_resource_type: resource_type.to_owned(),
            first_resource_super_type: resource_super_type.map(str::to_owned),
            resource_type: Some(resource_type.to_owned()),
            relative_path: None,
            search_path_index: 0,
            used_resource_types,
            hierarchy_truncated: false,
        }
    }

    /// 是否因继承链成环而提前截断到基础类型。
    pub fn hierarchy_truncated(&self) -> bool {
        self.hierarchy_truncated
    }

    fn advance_type(&mut self) {
        self.resource_type = self
            .resource_type
            .take()
            .and_then(|current| self.super_type_of(&current));
    }

    fn super_type_of(&mut self, resource_type: &str) -> Option<String> {
        if resource_type == self.base_resource_type {
            return None;
        }

        let explicit = (resource_type == self.first_resource_type)
            .then(|| self.first_resource_super_type.clone())
            .flatten();
        let mut super_type =
            explicit.or_else(|| self.accessor.parent_resource_type(resource_type));

        if let Some(candidate) = super_type.take() {
            if self.used_resource_types.contains(&candidate) {
                tracing::error!(
                    resource_type = %candidate,
                    "circular dependency in resource type hierarchy detected, check super types of {candidate}"
                );
                self.hierarchy_truncated = true;
            } else {
                self.used_resource_types.insert(candidate.clone());
                super_type = Some(candidate);
            }
        }

        Some(super_type.unwrap_or_else(|| self.base_resource_type.clone()))
    }
}

impl Iterator for LocationIterator<'_> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        if self.relative_path.is_none() {
            let current = self.resource_type.as_deref()?;
            let type_path = path::resource_type_to_path(current);
            if path::is_absolute(&type_path) {
                self.advance_type();
                return Some(type_path);
            }
            self.relative_path = Some(type_path);
        }

        let relative = self.relative_path.as_deref().unwrap_or_default();
        let location = format!("{}{}", self.search_path[self.search_path_index], relative);
        self.search_path_index += 1;
        if self.search_path_index >= self.search_path.len() {
            self.relative_path = None;
            self.search_path_index = 0;
            self.advance_type();
        }
        Some(location)
    }
}
