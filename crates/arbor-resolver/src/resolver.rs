//! Servlet 解析入口。
//!
//! # 教案式说明
//! - **What**：[`ServletResolver`] 把请求（或脚本名、错误状态）映射为一个可执行的 Servlet：
//!   收集器产出有序候选，适配器把候选变为执行体，第一个接受请求的执行体胜出。
//! - **How**：
//!   1. 资源类型是绝对路径时先直接查找该路径（受执行路径白名单约束）；
//!   2. 否则构造 [`ResourceCollector`] 或 [`NamedScriptResourceCollector`]，先查缓存，再遍历候选；
//!   3. 挑选型 Servlet 拒绝请求时继续下一个候选；只要途中遇到过挑选型 Servlet，结果就不写入缓存；
//!   4. 全部落空时回落到默认 Servlet（若已配置）。
//! - **契约**：缓存以收集器本身为键，容量低于 5 时关闭；写满后不再写入，并且只告警一次。
//!   仓库内容变化后调用方应调用 [`ServletResolver::clear_cache`]。

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;

use arbor_core::config::{ExecutionPaths, ResolverSettings};
use arbor_core::error::CoreError;
use arbor_core::request::Request;
use arbor_core::resource::{Resource, ResourceAccessor, ResourceRef, path};
use arbor_core::servlet::ServletRef;

use crate::collector::{ResourceCollector, ScriptCollector};
use crate::defaults::DefaultErrorServlet;
use crate::named::NamedScriptResourceCollector;
use crate::registry::ServletAdapter;

/// 错误处理的兜底方法名。
pub const DEFAULT_ERROR_HANDLER_METHOD: &str = "default";

/// 解析缓存的键。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CollectorKey {
    Request(ResourceCollector),
    Named(NamedScriptResourceCollector),
}

impl From<ResourceCollector> for CollectorKey {
    fn from(collector: ResourceCollector) -> Self {
        CollectorKey::Request(collector)
    }
}

impl From<NamedScriptResourceCollector> for CollectorKey {
    fn from(collector: NamedScriptResourceCollector) -> Self {
        CollectorKey::Named(collector)
    }
}

struct ResolutionCache {
    entries: DashMap<CollectorKey, ServletRef>,
    capacity: usize,
    warn_when_full: AtomicBool,
}

impl ResolutionCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
            warn_when_full: AtomicBool::new(true),
        }
    }

    fn get(&self, key: &CollectorKey) -> Option<ServletRef> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    fn put(&self, key: CollectorKey, servlet: ServletRef) {
        if self.entries.len() < self.capacity {
            self.entries.insert(key, servlet);
        } else if self.warn_when_full.swap(false, Ordering::Relaxed) {
            tracing::warn!(
                capacity = self.capacity,
                "script cache has reached its limit, consider increasing the resolver cache size"
            );
        }
    }

    fn clear(&self) {
        self.entries.clear();
        self.warn_when_full.store(true, Ordering::Relaxed);
    }
}

/// Servlet 解析器。
pub struct ServletResolver {
    accessor: Arc<dyn ResourceAccessor>,
    adapter: Arc<dyn ServletAdapter>,
    settings: ResolverSettings,
    execution_paths: ExecutionPaths,
    cache: Option<ResolutionCache>,
    default_servlet: Option<ServletRef>,
    fallback_error_servlet: ServletRef,
}

impl ServletResolver {
    pub fn new(
        accessor: Arc<dyn ResourceAccessor>,
        adapter: Arc<dyn ServletAdapter>,
        settings: ResolverSettings,
    ) -> Self {
        let cache = settings
            .cache_enabled()
            .then(|| ResolutionCache::new(settings.cache_size()));
        Self {
            accessor,
            adapter,
            execution_paths: settings.execution_paths(),
            settings,
            cache,
            default_servlet: None,
            fallback_error_servlet: Arc::new(DefaultErrorServlet),
        }
    }

    /// 没有任何候选时使用的 Servlet。
    pub fn with_default_servlet(mut self, servlet: ServletRef) -> Self {
        self.default_servlet = Some(servlet);
        self
    }

    /// 没有任何错误处理脚本时使用的处理器，缺省为 [`DefaultErrorServlet`]。
    pub fn with_fallback_error_servlet(mut self, servlet: ServletRef) -> Self {
        self.fallback_error_servlet = servlet;
        self
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    pub fn accessor(&self) -> &Arc<dyn ResourceAccessor> {
        &self.accessor
    }

    /// 为请求当前的资源解析 Servlet。
    pub fn resolve_servlet(&self, request: &Request) -> Option<ServletRef> {
        let resource = request.resource();
        let timer = format!("resolveServlet({})", resource.path());
        let tracker = request.tracker();
        if let Some(tracker) = tracker {
            tracker.start_timer(&timer);
        }

        let resource_type = resource.resource_type();
        let mut servlet = None;
        if !resource_type.is_empty() {
            if path::is_absolute(resource_type) {
                servlet = self.resolve_absolute(resource_type, Some(request));
            }
            if servlet.is_none() {
                let collector = ResourceCollector::for_request(request, &self.settings);
                servlet = self.servlet_from_collector(collector, Some(request));
            }
        }

        if servlet.is_none() {
            tracing::debug!(resource = %resource.path(), "no specific servlet found, trying default");
            servlet = self.default_servlet.clone();
        }

        match (&servlet, tracker) {
            (Some(found), Some(tracker)) => {
                tracker.log_timer(&timer, Some(format_args!("Using servlet {}", found.name())));
            }
            (None, Some(tracker)) => {
                tracker.log_timer(
                    &timer,
                    Some(format_args!("Servlet resolution failed. See log for details")),
                );
            }
            _ => {}
        }
        match &servlet {
            Some(found) => {
                tracing::debug!(servlet = found.name(), resource = %resource.path(), "servlet found")
            }
            None => tracing::debug!(resource = %resource.path(), "no servlet found"),
        }
        servlet
    }

    /// 按脚本名解析，脚本名可以是绝对路径。
    ///
    /// 没有请求上下文，挑选型 Servlet 一律视为拒绝。
    pub fn resolve_named(
        &self,
        resource: Option<&dyn Resource>,
        script_name: &str,
    ) -> Option<ServletRef> {
        if path::is_absolute(script_name) {
            if let Some(servlet) = self.resolve_absolute(script_name, None) {
                return Some(servlet);
            }
        }
        let collector = NamedScriptResourceCollector::new(script_name, resource, &self.settings);
        self.servlet_from_collector(collector, None)
    }

    /// 查找脚本资源：绝对名称直接查找，相对名称依次拼接搜索路径；两者都受执行路径约束。
    pub fn find_script(&self, name: &str) -> Option<ResourceRef> {
        let found = if path::is_absolute(name) {
            path::normalize(name)
                .filter(|script| self.execution_paths.is_allowed(script))
                .and_then(|script| self.accessor.get_resource(&script))
        } else {
            self.accessor.search_path().iter().find_map(|root| {
                path::normalize(&path::join(root, name))
                    .filter(|script| self.execution_paths.is_allowed(script))
                    .and_then(|script| self.accessor.get_resource(&script))
            })
        };
        match &found {
            Some(script) => tracing::debug!(script = script.path(), name, "findScript: using script"),
            None => tracing::info!(name, "findScript: no script found in path"),
        }
        found
    }

    /// 以状态码为方法名查找错误处理器，落空时依次尝试 `default` 与兜底处理器。
    pub fn resolve_error_handler_for_status(&self, status: u16, request: &Request) -> ServletRef {
        self.error_handler([status.to_string()], request)
    }

    /// 以错误码及其各级前缀为方法名查找错误处理器。
    ///
    /// `dispatch.recursion_too_deep` 依次尝试 `dispatch.recursion_too_deep`、`dispatch`。
    pub fn resolve_error_handler_for_error(&self, error: &CoreError, request: &Request) -> ServletRef {
        self.error_handler(error.code_hierarchy().map(str::to_owned), request)
    }

    /// 收集器给出的有序候选，用于诊断。
    pub fn candidates<C: ScriptCollector>(&self, collector: &C) -> Vec<ResourceRef> {
        collector.servlets(self.accessor.as_ref())
    }

    /// 清空解析缓存。
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    /// 缓存中的条目数；缓存关闭时为 0。
    pub fn cached_entries(&self) -> usize {
        self.cache.as_ref().map_or(0, |cache| cache.entries.len())
    }

    fn error_handler<I>(&self, method_names: I, request: &Request) -> ServletRef
    where
        I: IntoIterator<Item = String>,
    {
        let error_type = self.settings.error_handler_resource_type();
        let resource = request.resource().as_ref();
        method_names
            .into_iter()
            .chain(std::iter::once(DEFAULT_ERROR_HANDLER_METHOD.to_owned()))
            .find_map(|method| {
                let collector =
                    ResourceCollector::for_method(&method, Some(error_type), resource, &self.settings);
                self.servlet_from_collector(collector, Some(request))
            })
            .unwrap_or_else(|| Arc::clone(&self.fallback_error_servlet))
    }

    fn resolve_absolute(&self, script_path: &str, request: Option<&Request>) -> Option<ServletRef> {
        let normalized = path::normalize(script_path)?;
        if !self.execution_paths.is_allowed(&normalized) {
            if let Some(tracker) = request.and_then(Request::tracker) {
                tracker.log(format_args!(
                    "Will not look for a servlet at {script_path} as it is not in the list of allowed paths"
                ));
            }
            return None;
        }
        let resource = self.accessor.get_resource(&normalized)?;
        let servlet = self.adapter.adapt(resource.as_ref());
        if let Some(found) = &servlet {
            tracing::debug!(servlet = found.name(), script_path, "servlet found using absolute resource type");
        }
        servlet
    }

    fn servlet_from_collector<C>(&self, collector: C, request: Option<&Request>) -> Option<ServletRef>
    where
        C: ScriptCollector + Clone + Into<CollectorKey>,
    {
        let mut key: Option<CollectorKey> = self.cache.as_ref().map(|_| collector.clone().into());
        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            if let Some(cached) = cache.get(key) {
                tracing::debug!(servlet = cached.name(), "using cached servlet");
                return Some(cached);
            }
        }

        let candidates = collector.servlets(self.accessor.as_ref());
        if candidates.is_empty() {
            tracing::debug!("no servlet candidates found");
        } else {
            tracing::debug!(
                candidates = ?candidates.iter().map(|c| c.path()).collect::<Vec<_>>(),
                "ordered list of servlet candidates"
            );
        }

        let mut saw_opting = false;
        for candidate in &candidates {
            let Some(servlet) = self.adapter.adapt(candidate.as_ref()) else {
                tracing::debug!(candidate = candidate.path(), "candidate does not adapt to a servlet, ignored");
                continue;
            };
            let opting = servlet.is_opting();
            let accepts = !opting || request.is_some_and(|req| servlet.accepts(req));
            if accepts {
                if !saw_opting && !opting {
                    if let (Some(cache), Some(key)) = (&self.cache, key.take()) {
                        cache.put(key, Arc::clone(&servlet));
                    }
                }
                tracing::debug!(candidate = candidate.path(), "using servlet provided by candidate resource");
                return Some(servlet);
            }
            saw_opting |= opting;
            tracing::debug!(candidate = candidate.path(), "candidate does not accept request, ignored");
        }
        None
    }
}

impl fmt::Debug for ServletResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServletResolver")
            .field("settings", &self.settings)
            .field("cached_entries", &self.cached_entries())
            .field("default_servlet", &self.default_servlet.as_ref().map(|s| s.name().to_owned()))
            .finish_non_exhaustive()
    }
}
