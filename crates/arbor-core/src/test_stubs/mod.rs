//! 测试与示例共用的桩实现。
//!
//! # 教案式说明
//! - **What**：[`InMemoryResourceTree`] 以有序映射模拟内容仓库，[`NoopProgressTracker`] 丢弃全部诊断记录。
//! - **How**：测试按路径登记节点，必要时改写搜索路径；树内部以 `RwLock` 保护，
//!   可以在多线程测试中共享同一实例。
//! - **契约**：仅供测试、基准与示例使用；不会持久化任何数据。

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::observability::ProgressTracker;
use crate::resource::{Resource, ResourceAccessor, ResourceIter, ResourceRef, path};

/// 内存树中的节点。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryResource {
    path: String,
    resource_type: String,
    resource_super_type: Option<String>,
}

impl MemoryResource {
    pub fn new(
        path: impl Into<String>,
        resource_type: impl Into<String>,
        resource_super_type: Option<&str>,
    ) -> Self {
        Self {
            path: path.into(),
            resource_type: resource_type.into(),
            resource_super_type: resource_super_type.map(str::to_owned),
        }
    }
}

impl Resource for MemoryResource {
    fn path(&self) -> &str {
        &self.path
    }

    fn resource_type(&self) -> &str {
        &self.resource_type
    }

    fn resource_super_type(&self) -> Option<&str> {
        self.resource_super_type.as_deref()
    }
}

/// 内存内容仓库。
pub struct InMemoryResourceTree {
    nodes: RwLock<BTreeMap<String, ResourceRef>>,
    search_path: RwLock<Vec<String>>,
}

/// 未登记类型的节点使用的类型。
pub const NT_UNSTRUCTURED: &str = "nt:unstructured";

impl InMemoryResourceTree {
    /// 以 `["/apps/", "/libs/"]` 为搜索路径创建空树。
    pub fn new() -> Self {
        Self::with_search_path(["/apps", "/libs"])
    }

    /// 以给定搜索路径创建空树，条目自动补齐结尾 `/`。
    pub fn with_search_path<I, S>(search_path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tree = Self {
            nodes: RwLock::new(BTreeMap::new()),
            search_path: RwLock::new(Vec::new()),
        };
        tree.set_search_path(search_path);
        tree
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn set_search_path<I, S>(&self, search_path: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.search_path.write() = search_path
            .into_iter()
            .map(|entry| {
                let mut entry = entry.into();
                if !entry.ends_with('/') {
                    entry.push('/');
                }
                entry
            })
            .collect();
    }

    /// 登记节点；缺失的祖先以 [`NT_UNSTRUCTURED`] 补齐，以便 `list_children` 能逐级枚举。
    pub fn add(&self, path: &str, resource_type: &str, super_type: Option<&str>) -> ResourceRef {
        let resource: ResourceRef = Arc::new(MemoryResource::new(path, resource_type, super_type));
        let mut nodes = self.nodes.write();
        let mut ancestor = path::parent(path);
        while let Some(current) = ancestor {
            if current == "/" || nodes.contains_key(current) {
                break;
            }
            nodes.insert(
                current.to_owned(),
                Arc::new(MemoryResource::new(current, NT_UNSTRUCTURED, None)),
            );
            ancestor = path::parent(current);
        }
        nodes.insert(path.to_owned(), Arc::clone(&resource));
        resource
    }

    /// 登记脚本或普通节点（类型为 [`NT_UNSTRUCTURED`]）。
    pub fn add_file(&self, path: &str) -> ResourceRef {
        self.add(path, NT_UNSTRUCTURED, None)
    }

    /// 移除节点及其子树。
    pub fn remove(&self, path: &str) {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        self.nodes
            .write()
            .retain(|key, _| key != path && !key.starts_with(&prefix));
    }
}

impl Default for InMemoryResourceTree {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InMemoryResourceTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryResourceTree")
            .field("nodes", &self.nodes.read().len())
            .field("search_path", &*self.search_path.read())
            .finish()
    }
}

impl ResourceAccessor for InMemoryResourceTree {
    fn get_resource(&self, path: &str) -> Option<ResourceRef> {
        let normalized = path::normalize(path)?;
        self.nodes.read().get(&normalized).cloned()
    }

    fn list_children<'a>(&'a self, parent: &dyn Resource) -> ResourceIter<'a> {
        let prefix = if parent.path() == "/" {
            "/".to_owned()
        } else {
            format!("{}/", parent.path().trim_end_matches('/'))
        };
        // 快照后释放读锁，迭代期间允许并发写入。
        let children: Vec<ResourceRef> = self
            .nodes
            .read()
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(key, _)| !key[prefix.len()..].contains('/') && key.len() > prefix.len())
            .map(|(_, resource)| Arc::clone(resource))
            .collect();
        Box::new(children.into_iter())
    }

    fn search_path(&self) -> Vec<String> {
        self.search_path.read().clone()
    }
}

/// 丢弃全部记录的诊断追踪器。
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopProgressTracker;

impl ProgressTracker for NoopProgressTracker {
    fn log(&self, _message: fmt::Arguments<'_>) {}

    fn start_timer(&self, _name: &str) {}

    fn log_timer(&self, _name: &str, _message: Option<fmt::Arguments<'_>>) {}
}
