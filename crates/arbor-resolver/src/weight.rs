use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use std::fmt;

use arbor_core::resource::ResourceRef;

/// 名称匹配的类别。
///
/// 仅相对顺序具有意义：`LastResort < None < Prefix < Extension < ExtensionPrefix`。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MatchWeight {
    /// 位置上的 `.servlet` 兜底处理器。
    LastResort,
    /// 仅匹配选择器或方法名。
    None,
    /// 匹配目录名。
    Prefix,
    /// 匹配扩展名。
    Extension,
    /// 同时匹配目录名与扩展名。
    ExtensionPrefix,
}

/// 带排序键的候选资源。
///
/// 排序：选择器数量多者优先，其次匹配类别高者优先，最后按发现顺序（`ordinal` 升序）。
/// 任何情况下都不按路径字典序比较。
#[derive(Clone)]
pub struct WeightedResource {
    ordinal: usize,
    resource: ResourceRef,
    selector_count: usize,
    weight: MatchWeight,
}

impl WeightedResource {
    pub fn new(
        ordinal: usize,
        resource: ResourceRef,
        selector_count: usize,
        weight: MatchWeight,
    ) -> Self {
        Self {
            ordinal,
            resource,
            selector_count,
            weight,
        }
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn resource(&self) -> &ResourceRef {
        &self.resource
    }

    pub fn selector_count(&self) -> usize {
        self.selector_count
    }

    pub fn weight(&self) -> MatchWeight {
        self.weight
    }

    pub fn into_resource(self) -> ResourceRef {
        self.resource
    }
}

impl fmt::Debug for WeightedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeightedResource")
            .field("path", &self.resource.path())
            .field("ordinal", &self.ordinal)
            .field("selector_count", &self.selector_count)
            .field("weight", &self.weight)
            .finish()
    }
}

impl PartialEq for WeightedResource {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for WeightedResource {}

impl PartialOrd for WeightedResource {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WeightedResource {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .selector_count
            .cmp(&self.selector_count)
            .then_with(|| other.weight.cmp(&self.weight))
            .then_with(|| self.ordinal.cmp(&other.ordinal))
    }
}

/// 收集过程中的有序候选集合。
///
/// 序号按插入顺序分配；同一路径的资源只保留第一次插入。
#[derive(Debug, Default)]
pub struct WeightedResourceSet {
    ordered: BTreeSet<WeightedResource>,
    seen_paths: HashSet<String>,
    next_ordinal: usize,
}

impl WeightedResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入候选；路径已存在时忽略并返回 `false`。
    pub fn insert(
        &mut self,
        resource: ResourceRef,
        selector_count: usize,
        weight: MatchWeight,
    ) -> bool {
        if !self.seen_paths.insert(resource.path().to_owned()) {
            return false;
        }
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        self.ordered
            .insert(WeightedResource::new(ordinal, resource, selector_count, weight))
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WeightedResource> {
        self.ordered.iter()
    }

    /// 按优先级从高到低输出资源。
    pub fn into_resources(self) -> Vec<ResourceRef> {
        self.ordered
            .into_iter()
            .map(WeightedResource::into_resource)
            .collect()
    }
}
