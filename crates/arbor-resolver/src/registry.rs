use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use arbor_core::resource::Resource;
use arbor_core::servlet::ServletRef;

/// 把候选资源适配为可执行的 Servlet。
///
/// 脚本引擎、编译好的处理器都经由此接口接入；无法适配的候选被解析器跳过。
pub trait ServletAdapter: Send + Sync {
    fn adapt(&self, resource: &dyn Resource) -> Option<ServletRef>;
}

/// 以资源路径为键的 Servlet 表。
///
/// 脚本节点与 `.servlet` 兜底节点由仓库提供，执行体登记在这里；
/// 读写均可并发进行。
#[derive(Default)]
pub struct ServletRegistry {
    servlets: DashMap<String, ServletRef>,
}

impl ServletRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// 为路径登记执行体，返回被替换的旧执行体。
    pub fn register(&self, path: impl Into<String>, servlet: ServletRef) -> Option<ServletRef> {
        self.servlets.insert(path.into(), servlet)
    }

    pub fn unregister(&self, path: &str) -> Option<ServletRef> {
        self.servlets.remove(path).map(|(_, servlet)| servlet)
    }

    pub fn len(&self) -> usize {
        self.servlets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servlets.is_empty()
    }
}

impl ServletAdapter for ServletRegistry {
    fn adapt(&self, resource: &dyn Resource) -> Option<ServletRef> {
        self.servlets
            .get(resource.path())
            .map(|entry| Arc::clone(entry.value()))
    }
}

impl<T: ServletAdapter + ?Sized> ServletAdapter for Arc<T> {
    fn adapt(&self, resource: &dyn Resource) -> Option<ServletRef> {
        (**self).adapt(resource)
    }
}

impl fmt::Debug for ServletRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServletRegistry")
            .field("servlets", &self.servlets.len())
            .finish()
    }
}
