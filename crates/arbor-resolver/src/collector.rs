//! 请求驱动的脚本候选收集。
//!
//! # 教案式说明
//! - **What**：[`ResourceCollector`] 对请求的资源类型链上每个位置，按选择器深度逐层匹配子节点名称，
//!   产出按 [`WeightedResource`](crate::weight::WeightedResource) 规则排好序的候选列表。
//! - **How**：[`ScriptCollector`] 提供共享骨架（位置迭代 + 占位节点 + 有序集合），
//!   具体收集器只实现“在一个位置上匹配什么”；收集器自身实现 `Hash`/`Eq`，可直接作为解析缓存的键。
//! - **契约**：子节点名称去掉最后一个扩展名后参与匹配，没有扩展名的子节点不是脚本；
//!   执行路径白名单之外的子节点被忽略；结果为空即表示“未找到”。

use std::sync::Arc;

use arbor_core::config::{ExecutionPaths, ResolverSettings};
use arbor_core::request::Request;
use arbor_core::resource::{Resource, ResourceAccessor, ResourceRef, resource_or_synthetic};

use crate::location::LocationIterator;
use crate::weight::{MatchWeight, WeightedResourceSet};

/// 位置上兜底处理器的路径后缀。
pub const SERVLET_PATH_EXTENSION: &str = ".servlet";

/// 收集器共享的类型链参数。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CollectorBase {
    base_resource_type: String,
    resource_type: String,
    resource_super_type: Option<String>,
    extension: Option<String>,
    execution_paths: ExecutionPaths,
}

impl CollectorBase {
    pub fn new(
        base_resource_type: impl Into<String>,
        resource_type: impl Into<String>,
        resource_super_type: Option<&str>,
        extension: Option<&str>,
        execution_paths: ExecutionPaths,
    ) -> Self {
        Self {
            base_resource_type: base_resource_type.into(),
            resource_type: resource_type.into(),
            resource_super_type: resource_super_type.map(str::to_owned),
            extension: extension.map(str::to_owned),
            execution_paths,
        }
    }

    pub fn base_resource_type(&self) -> &str {
        &self.base_resource_type
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn resource_super_type(&self) -> Option<&str> {
        self.resource_super_type.as_deref()
    }

    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    pub fn is_path_allowed(&self, path: &str) -> bool {
        self.execution_paths.is_allowed(path)
    }
}

/// 候选收集骨架。
pub trait ScriptCollector {
    fn base(&self) -> &CollectorBase;

    /// 在单个位置上匹配候选并写入 `found`。
    fn collect_at(
        &self,
        accessor: &dyn ResourceAccessor,
        location: &ResourceRef,
        found: &mut WeightedResourceSet,
    );

    /// 遍历全部位置，返回带排序信息的集合。
    fn weighted(&self, accessor: &dyn ResourceAccessor) -> WeightedResourceSet {
        let base = self.base();
        let mut found = WeightedResourceSet::new();
        let locations = LocationIterator::new(
            base.resource_type(),
            base.resource_super_type(),
            base.base_resource_type(),
            accessor,
        );
        for location in locations {
            let trimmed = location.trim_end_matches('/');
            let path = if trimmed.is_empty() { "/" } else { trimmed };
            let resource = resource_or_synthetic(accessor, path);
            self.collect_at(accessor, &resource, &mut found);
        }
        found
    }

    /// 按优先级排好序的候选；空列表表示未找到。
    fn servlets(&self, accessor: &dyn ResourceAccessor) -> Vec<ResourceRef> {
        self.weighted(accessor).into_resources()
    }
}

/// 按请求方法、选择器与扩展名收集候选。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceCollector {
    base: CollectorBase,
    method: String,
    selectors: Vec<String>,
    is_get: bool,
    is_default_extension: bool,
}

impl ResourceCollector {
    /// 以请求当前的资源、方法与路径分解构造。
    pub fn for_request(request: &Request, settings: &ResolverSettings) -> Self {
        let resource = request.resource();
        let path_info = request.path_info();
        let extension = path_info.extension();
        Self {
            base: CollectorBase::new(
                settings.base_resource_type(),
                resource.resource_type(),
                resource.resource_super_type(),
                extension,
                settings.execution_paths(),
            ),
            method: request.method().as_str().to_owned(),
            selectors: path_info.selectors().to_vec(),
            is_get: request.method().is_get(),
            is_default_extension: settings.is_default_extension(extension),
        }
    }

    /// 以任意“方法名”构造，不带选择器与扩展名；用于错误处理器查找（方法名为状态码或错误码）。
    pub fn for_method(
        method_name: &str,
        base_resource_type: Option<&str>,
        resource: &dyn Resource,
        settings: &ResolverSettings,
    ) -> Self {
        Self {
            base: CollectorBase::new(
                base_resource_type.unwrap_or(settings.base_resource_type()),
                resource.resource_type(),
                resource.resource_super_type(),
                None,
                settings.execution_paths(),
            ),
            method: method_name.to_owned(),
            selectors: Vec::new(),
            is_get: false,
            is_default_extension: false,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn selectors(&self) -> &[String] {
        &self.selectors
    }

    /// 单个脚本名（已去掉脚本扩展名）的匹配结果：消耗的选择器数量与匹配类别。
    fn match_script(
        &self,
        script_name: &str,
        parent_name: &str,
        selector: Option<&str>,
        depth: usize,
    ) -> Option<(usize, MatchWeight)> {
        if self.is_get {
            if let Some(extension) = self.base.extension() {
                if selector.is_some_and(|sel| is_dotted(script_name, sel, extension)) {
                    return Some((depth + 1, MatchWeight::Extension));
                }
                if is_dotted(script_name, parent_name, extension) {
                    return Some((depth, MatchWeight::ExtensionPrefix));
                }
                if script_name == extension {
                    return Some((depth, MatchWeight::Extension));
                }
            }
            if self.is_default_extension {
                if selector == Some(script_name) {
                    return Some((depth + 1, MatchWeight::None));
                }
                if script_name == parent_name {
                    return Some((depth, MatchWeight::Prefix));
                }
            }
        }

        if selector.is_some_and(|sel| is_dotted(script_name, sel, &self.method)) {
            return Some((depth + 1, MatchWeight::None));
        }
        if script_name == self.method {
            return Some((depth, MatchWeight::None));
        }
        None
    }
}

impl ScriptCollector for ResourceCollector {
    fn base(&self) -> &CollectorBase {
        &self.base
    }

    fn collect_at(
        &self,
        accessor: &dyn ResourceAccessor,
        location: &ResourceRef,
        found: &mut WeightedResourceSet,
    ) {
        let parent_name = location.name().to_owned();
        let mut current = Arc::clone(location);
        let mut depth = 0;

        loop {
            let selector = self.selectors.get(depth).map(String::as_str);
            for child in accessor.list_children(current.as_ref()) {
                if !self.base.is_path_allowed(child.path()) {
                    continue;
                }
                let Some(script_name) = script_name(child.name()) else {
                    continue;
                };
                if let Some((count, weight)) =
                    self.match_script(script_name, &parent_name, selector, depth)
                {
                    found.insert(Arc::clone(&child), count, weight);
                }
            }

            let Some(selector) = selector else {
                break;
            };
            match accessor.get_child(current.as_ref(), selector) {
                Some(next) => {
                    current = next;
                    depth += 1;
                }
                None => break,
            }
        }

        let servlet_path = format!("{}{}", location.path(), SERVLET_PATH_EXTENSION);
        if !self.base.is_path_allowed(&servlet_path) {
            return;
        }
        if let Some(servlet) = accessor.get_resource(&servlet_path) {
            found.insert(servlet, 0, MatchWeight::LastResort);
        }
    }
}

/// 去掉最后一个扩展名；没有扩展名时不是脚本。
pub(crate) fn script_name(name: &str) -> Option<&str> {
    name.rfind('.').map(|dot| &name[..dot])
}

/// `name == "{head}.{tail}"`，不分配字符串。
fn is_dotted(name: &str, head: &str, tail: &str) -> bool {
    name.strip_prefix(head)
        .and_then(|rest| rest.strip_prefix('.'))
        .is_some_and(|rest| rest == tail)
}
