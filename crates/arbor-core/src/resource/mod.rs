//! 资源模型：解析流程看到的仓库节点与访问仓库的协作者契约。
//!
//! # 教案式说明
//! - **What**：[`Resource`] 描述一个有路径、有类型的节点；[`ResourceAccessor`] 是解析器唯一的仓库入口，
//!   负责按路径取节点、枚举子节点、提供搜索路径与父类型查找。
//! - **How**：解析器只依赖 trait 对象，仓库实现（内存树、持久化引擎）由调用方提供；
//!   不存在的位置用 [`SyntheticResource`] 占位，以便继续枚举该路径下的子节点。
//! - **契约**：访问器方法视为同步调用，失败与“不存在”同样以 `None`/空迭代器表达；
//!   `list_children` 每次调用返回一个新的有限迭代器。

pub mod path;

use std::fmt;
use std::sync::Arc;

/// 占位资源使用的类型标记。
pub const SYNTHETIC_RESOURCE_TYPE: &str = "$synthetic$";

/// 仓库中的一个节点。
pub trait Resource: Send + Sync + fmt::Debug {
    /// 绝对路径。
    fn path(&self) -> &str;

    /// 资源类型标识，例如 `app/component`。
    fn resource_type(&self) -> &str;

    /// 节点上显式声明的父类型。
    fn resource_super_type(&self) -> Option<&str>;

    /// 路径最后一段。
    fn name(&self) -> &str {
        path::name(self.path())
    }

    /// 是否为不存在位置的占位节点。
    fn is_synthetic(&self) -> bool {
        false
    }
}

/// 共享的资源句柄。
pub type ResourceRef = Arc<dyn Resource>;

/// 子节点迭代器。
pub type ResourceIter<'a> = Box<dyn Iterator<Item = ResourceRef> + 'a>;

/// 仓库访问契约。
pub trait ResourceAccessor: Send + Sync {
    /// 按绝对路径获取节点。
    fn get_resource(&self, path: &str) -> Option<ResourceRef>;

    /// 获取 `base` 下的相对节点。
    fn get_child(&self, base: &dyn Resource, relative: &str) -> Option<ResourceRef> {
        self.get_resource(&path::join(base.path(), relative))
    }

    /// 惰性枚举直接子节点；占位节点同样可以拥有子节点。
    fn list_children<'a>(&'a self, parent: &dyn Resource) -> ResourceIter<'a>;

    /// 有序搜索路径，例如 `["/apps/", "/libs/"]`。
    fn search_path(&self) -> Vec<String>;

    /// 查找资源类型的父类型。
    ///
    /// 类型按路径解析：绝对类型直接查找，相对类型依次拼接搜索路径，
    /// 命中的第一个节点的 `resource_super_type` 即为结果（命中但未声明父类型时返回 `None`）。
    fn parent_resource_type(&self, resource_type: &str) -> Option<String> {
        let type_path = path::resource_type_to_path(resource_type);
        let found = if path::is_absolute(&type_path) {
            self.get_resource(&type_path)
        } else {
            self.search_path()
                .iter()
                .find_map(|root| self.get_resource(&path::join(root, &type_path)))
        };
        found.and_then(|resource| resource.resource_super_type().map(str::to_owned))
    }
}

impl<T: ResourceAccessor + ?Sized> ResourceAccessor for Arc<T> {
    fn get_resource(&self, path: &str) -> Option<ResourceRef> {
        (**self).get_resource(path)
    }

    fn get_child(&self, base: &dyn Resource, relative: &str) -> Option<ResourceRef> {
        (**self).get_child(base, relative)
    }

    fn list_children<'a>(&'a self, parent: &dyn Resource) -> ResourceIter<'a> {
        (**self).list_children(parent)
    }

    fn search_path(&self) -> Vec<String> {
        (**self).search_path()
    }

    fn parent_resource_type(&self, resource_type: &str) -> Option<String> {
        (**self).parent_resource_type(resource_type)
    }
}

/// 不存在位置的占位节点。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyntheticResource {
    path: String,
    resource_type: String,
}

impl SyntheticResource {
    /// 以 [`SYNTHETIC_RESOURCE_TYPE`] 为类型构造占位节点；相对路径补齐为绝对路径。
    pub fn new(path: impl Into<String>) -> Self {
        Self::with_type(path, SYNTHETIC_RESOURCE_TYPE)
    }

    /// 以指定类型构造占位节点，供请求落在不存在路径上时使用。
    pub fn with_type(path: impl Into<String>, resource_type: impl Into<String>) -> Self {
        let mut path = path.into();
        if !path::is_absolute(&path) {
            path.insert(0, '/');
        }
        Self {
            path,
            resource_type: resource_type.into(),
        }
    }

    pub fn into_ref(self) -> ResourceRef {
        Arc::new(self)
    }
}

impl Resource for SyntheticResource {
    fn path(&self) -> &str {
        &self.path
    }

    fn resource_type(&self) -> &str {
        &self.resource_type
    }

    fn resource_super_type(&self) -> Option<&str> {
        None
    }

    fn is_synthetic(&self) -> bool {
        true
    }
}

/// 以指定类型覆盖原节点类型的包装，供调度选项强制资源类型时使用。
///
/// 覆盖后父类型被清空，继承链从新类型重新查找。
#[derive(Debug)]
pub struct TypeOverride {
    inner: ResourceRef,
    resource_type: String,
}

impl TypeOverride {
    pub fn wrap(inner: ResourceRef, resource_type: impl Into<String>) -> ResourceRef {
        Arc::new(Self {
            inner,
            resource_type: resource_type.into(),
        })
    }
}

impl Resource for TypeOverride {
    fn path(&self) -> &str {
        self.inner.path()
    }

    fn resource_type(&self) -> &str {
        &self.resource_type
    }

    fn resource_super_type(&self) -> Option<&str> {
        None
    }

    fn is_synthetic(&self) -> bool {
        self.inner.is_synthetic()
    }
}

/// 取真实节点，不存在时返回占位节点。
pub fn resource_or_synthetic(accessor: &dyn ResourceAccessor, path: &str) -> ResourceRef {
    accessor
        .get_resource(path)
        .unwrap_or_else(|| SyntheticResource::new(path).into_ref())
}
