//! 过滤器注册表。
//!
//! # 教案式说明
//! - **What**：每个作用域一条 [`FilterChainHelper`]，内部保存按 `(order, filter_id)` 升序排列的条目，
//!   并以不可变快照对外发布；[`FilterManager`] 聚合五个作用域并负责登记、移除与生命周期回调。
//! - **How**：
//!   1. 读路径只做一次 `ArcSwap::load_full`，不加锁；
//!   2. 写路径复制当前快照、插入或删除、整体替换，读者永远看不到半更新的链；
//!   3. [`FilterManager`] 以一把全局互斥锁串行化跨作用域的写操作，`COMPONENT` 的扇出与移除的
//!      `teardown` 判定都在同一临界区内完成。
//! - **契约**：读者可能读到写入前的旧快照；同一过滤器在多个作用域出现时，`teardown` 只调用一次。

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use arbor_core::request::Request;

use crate::filter::{FilterConfigError, FilterPredicate, FilterRef, FilterRegistration};
use crate::scope::FilterScope;

/// 链上某个过滤器的累计统计。
#[derive(Debug, Default)]
pub struct FilterStats {
    calls: AtomicU64,
    self_nanos: AtomicU64,
}

impl FilterStats {
    pub fn record(&self, self_time: Duration) {
        let nanos = u64::try_from(self_time.as_nanos()).unwrap_or(u64::MAX);
        self.calls.fetch_add(1, AtomicOrdering::Relaxed);
        self.self_nanos.fetch_add(nanos, AtomicOrdering::Relaxed);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(AtomicOrdering::Relaxed)
    }

    /// 累计自身耗时（不含后续过滤器与渲染）。
    pub fn total_self_time(&self) -> Duration {
        Duration::from_nanos(self.self_nanos.load(AtomicOrdering::Relaxed))
    }

    pub fn mean_self_time(&self) -> Duration {
        match self.calls() {
            0 => Duration::ZERO,
            calls => Duration::from_nanos(self.self_nanos.load(AtomicOrdering::Relaxed) / calls),
        }
    }
}

/// 链上的一个条目。
///
/// 扇出到多个作用域时各条目共享同一个过滤器与统计对象。
#[derive(Clone)]
pub struct FilterEntry {
    filter: FilterRef,
    filter_id: u64,
    order: i32,
    order_source: String,
    name: String,
    predicate: Option<Arc<FilterPredicate>>,
    stats: Arc<FilterStats>,
}

impl FilterEntry {
    pub fn new(filter: FilterRef, filter_id: u64, order: i32, order_source: impl Into<String>) -> Self {
        Self {
            filter,
            filter_id,
            order,
            order_source: order_source.into(),
            name: format!("filter#{filter_id}"),
            predicate: None,
            stats: Arc::new(FilterStats::default()),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_predicate(mut self, predicate: Option<FilterPredicate>) -> Self {
        self.predicate = predicate.map(Arc::new);
        self
    }

    pub fn filter(&self) -> &FilterRef {
        &self.filter
    }

    pub fn filter_id(&self) -> u64 {
        self.filter_id
    }

    pub fn order(&self) -> i32 {
        self.order
    }

    pub fn order_source(&self) -> &str {
        &self.order_source
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> &FilterStats {
        &self.stats
    }

    /// 谓词与过滤器自身的 `select` 同时接受时才执行。
    pub fn select(&self, request: &Request) -> bool {
        self.predicate
            .as_ref()
            .is_none_or(|predicate| predicate.matches(request))
            && self.filter.select(request)
    }

    fn is_filter(&self, filter: &FilterRef) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.filter), Arc::as_ptr(filter))
    }
}

impl PartialEq for FilterEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FilterEntry {}

impl PartialOrd for FilterEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FilterEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order
            .cmp(&other.order)
            .then(self.filter_id.cmp(&other.filter_id))
    }
}

impl fmt::Debug for FilterEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterEntry")
            .field("name", &self.name)
            .field("filter_id", &self.filter_id)
            .field("order", &self.order)
            .field("order_source", &self.order_source)
            .finish_non_exhaustive()
    }
}

/// 链快照：不可变、按顺序排列。
pub type FilterSnapshot = Arc<Vec<FilterEntry>>;

/// 单个作用域的有序链。
pub struct FilterChainHelper {
    entries: ArcSwap<Vec<FilterEntry>>,
}

impl FilterChainHelper {
    pub fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// 按 `(order, filter_id)` 插入，返回是否插入。
    ///
    /// 链是以该键为准的有序集合：键已存在时保留原条目，快照不变。
    pub fn add_filter(&self, entry: FilterEntry) -> bool {
        let mut inserted = false;
        self.entries.rcu(|current| {
            let position = current.partition_point(|existing| existing < &entry);
            inserted = current.get(position).is_none_or(|existing| existing != &entry);
            if !inserted {
                return Arc::clone(current);
            }
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.insert(position, entry.clone());
            Arc::new(next)
        });
        inserted
    }

    /// 移除 id 匹配的全部条目，返回被移除的第一个条目。
    pub fn remove_filter_by_id(&self, filter_id: u64) -> Option<FilterEntry> {
        self.remove_where(|entry| entry.filter_id == filter_id)
    }

    /// 按过滤器实例（指针相等）移除。
    pub fn remove_filter(&self, filter: &FilterRef) -> Option<FilterEntry> {
        self.remove_where(|entry| entry.is_filter(filter))
    }

    /// 当前快照。
    pub fn filters(&self) -> FilterSnapshot {
        self.entries.load_full()
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }

    fn remove_where(&self, predicate: impl Fn(&FilterEntry) -> bool) -> Option<FilterEntry> {
        let mut removed = None;
        self.entries.rcu(|current| {
            removed = current.iter().find(|&entry| predicate(entry)).cloned();
            current
                .iter()
                .filter(|&entry| !predicate(entry))
                .cloned()
                .collect::<Vec<_>>()
        });
        removed
    }
}

impl Default for FilterChainHelper {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FilterChainHelper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.load().iter()).finish()
    }
}

/// 未指定服务 id 的登记从该值起分配 id，避开外部常用的小整数区间。
const GENERATED_ID_BASE: u64 = 1 << 48;

/// 五个作用域的过滤器注册表。
pub struct FilterManager {
    chains: [FilterChainHelper; 5],
    mutation: Mutex<()>,
    next_id: AtomicU64,
}

impl FilterManager {
    pub fn new() -> Self {
        Self {
            chains: Default::default(),
            mutation: Mutex::new(()),
            next_id: AtomicU64::new(GENERATED_ID_BASE),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// 登记到一个作用域；`COMPONENT` 同时写入 `INCLUDE` 与 `FORWARD`。
    pub fn add_filter(
        &self,
        scope: FilterScope,
        filter: FilterRef,
        filter_id: u64,
        order: i32,
        order_source: &str,
    ) {
        let entry = FilterEntry::new(filter, filter_id, order, order_source);
        let _guard = self.mutation.lock();
        self.insert(scope, entry);
    }

    /// 按登记元数据初始化并登记过滤器，返回其 id。
    ///
    /// - 名称缺失：记录错误，不登记；
    /// - `init` 失败：记录错误，不登记；
    /// - 未声明作用域：记录告警，按 `REQUEST` 登记；
    /// - 未知作用域名称：记录错误并跳过该作用域，其余作用域照常登记。
    pub fn register(
        &self,
        registration: &FilterRegistration,
        filter: FilterRef,
    ) -> Result<u64, FilterConfigError> {
        let Some(config) = registration.config() else {
            tracing::error!(
                registration = %registration,
                "ignoring filter registered without a name"
            );
            return Err(FilterConfigError::MissingName);
        };
        let name = config.name().to_owned();

        if let Err(source) = filter.init(&config) {
            tracing::error!(filter = %name, error = %source, "filter initialisation failed, filter not registered");
            return Err(FilterConfigError::InitFailed { name, source });
        }

        let scopes = self.parse_scopes(registration, &name);
        let filter_id = registration
            .service_id()
            .unwrap_or_else(|| self.next_id.fetch_add(1, AtomicOrdering::Relaxed));
        let stats = Arc::new(FilterStats::default());
        let predicate = registration.predicate().cloned().map(Arc::new);

        let _guard = self.mutation.lock();
        for scope in scopes {
            let entry = FilterEntry {
                filter: Arc::clone(&filter),
                filter_id,
                order: registration.order(),
                order_source: registration.order_source().to_owned(),
                name: name.clone(),
                predicate: predicate.clone(),
                stats: Arc::clone(&stats),
            };
            self.insert(scope, entry);
        }
        tracing::debug!(
            filter = %name,
            filter_id,
            order = registration.order(),
            order_source = registration.order_source(),
            "filter registered"
        );
        Ok(filter_id)
    }

    /// 从全部作用域移除 id 匹配的过滤器。
    ///
    /// 只要在任一作用域中找到就调用一次 `teardown` 并返回 `true`；未找到返回 `false`。
    pub fn remove_filter_by_id(&self, filter_id: u64) -> bool {
        let removed = {
            let _guard = self.mutation.lock();
            self.remove_everywhere(|chain| chain.remove_filter_by_id(filter_id))
        };
        match removed {
            Some(entry) => {
                tracing::debug!(filter = %entry.name, filter_id, "filter removed");
                entry.filter.teardown();
                true
            }
            None => {
                tracing::debug!(filter_id, "no filter registered under this id");
                false
            }
        }
    }

    /// 按过滤器实例从全部作用域移除，语义同 [`remove_filter_by_id`](Self::remove_filter_by_id)。
    pub fn remove_filter(&self, filter: &FilterRef) -> bool {
        let removed = {
            let _guard = self.mutation.lock();
            self.remove_everywhere(|chain| chain.remove_filter(filter))
        };
        match removed {
            Some(entry) => {
                tracing::debug!(filter = %entry.name, filter_id = entry.filter_id, "filter removed");
                entry.filter.teardown();
                true
            }
            None => false,
        }
    }

    /// 作用域当前的链快照。
    pub fn filters(&self, scope: FilterScope) -> FilterSnapshot {
        self.chain(scope).filters()
    }

    pub fn chain(&self, scope: FilterScope) -> &FilterChainHelper {
        &self.chains[scope.index()]
    }

    /// 移除全部过滤器并逐个调用 `teardown`。
    pub fn clear(&self) {
        let _guard = self.mutation.lock();
        let mut seen: Vec<u64> = Vec::new();
        for chain in &self.chains {
            for entry in chain.filters().iter() {
                chain.remove_filter_by_id(entry.filter_id);
                if !seen.contains(&entry.filter_id) {
                    seen.push(entry.filter_id);
                    entry.filter.teardown();
                }
            }
        }
    }

    fn insert(&self, scope: FilterScope, entry: FilterEntry) {
        for target in scope.expand() {
            if !self.chains[target.index()].add_filter(entry.clone()) {
                tracing::debug!(
                    filter = %entry.name,
                    filter_id = entry.filter_id,
                    order = entry.order,
                    scope = %target,
                    "filter already present in scope, keeping existing entry"
                );
            }
        }
    }

    fn remove_everywhere(
        &self,
        mut remove: impl FnMut(&FilterChainHelper) -> Option<FilterEntry>,
    ) -> Option<FilterEntry> {
        let mut found = None;
        for chain in &self.chains {
            if let Some(entry) = remove(chain) {
                found.get_or_insert(entry);
            }
        }
        found
    }

    fn parse_scopes(&self, registration: &FilterRegistration, name: &str) -> Vec<FilterScope> {
        if registration.scopes().is_empty() {
            tracing::warn!(filter = %name, "filter has no scope, registering for REQUEST");
            return vec![FilterScope::Request];
        }
        let mut scopes = Vec::new();
        for raw in registration.scopes() {
            match raw.parse::<FilterScope>() {
                Ok(scope) if !scopes.contains(&scope) => scopes.push(scope),
                Ok(_) => {}
                Err(err) => {
                    tracing::error!(filter = %name, scope = %raw, error = %err, "ignoring unknown filter scope");
                }
            }
        }
        scopes
    }
}

impl Default for FilterManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FilterManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for scope in FilterScope::ALL {
            map.entry(&scope, &self.chain(scope).len());
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FnFilter;

    fn passthrough() -> FilterRef {
        FnFilter::shared(|request, response, chain| chain.proceed(request, response))
    }

    fn ids(snapshot: &FilterSnapshot) -> Vec<u64> {
        snapshot.iter().map(FilterEntry::filter_id).collect()
    }

    #[test]
    fn helper_orders_by_order_then_id() {
        let helper = FilterChainHelper::new();
        helper.add_filter(FilterEntry::new(passthrough(), 7, 10, "test"));
        helper.add_filter(FilterEntry::new(passthrough(), 3, 10, "test"));
        helper.add_filter(FilterEntry::new(passthrough(), 9, -5, "test"));
        assert_eq!(ids(&helper.filters()), vec![9, 3, 7]);
    }

    #[test]
    fn snapshots_are_not_mutated_in_place() {
        let helper = FilterChainHelper::new();
        helper.add_filter(FilterEntry::new(passthrough(), 1, 0, "test"));
        let before = helper.filters();
        helper.add_filter(FilterEntry::new(passthrough(), 2, 0, "test"));
        assert_eq!(ids(&before), vec![1], "旧快照保持不变");
        assert_eq!(ids(&helper.filters()), vec![1, 2]);
    }

    #[test]
    fn remove_by_instance() {
        let manager = FilterManager::new();
        let filter = passthrough();
        manager.add_filter(FilterScope::Request, Arc::clone(&filter), 1, 0, "test");
        assert!(manager.remove_filter(&filter));
        assert!(!manager.remove_filter(&filter));
        assert!(manager.filters(FilterScope::Request).is_empty());
    }

    #[test]
    fn stats_accumulate() {
        let stats = FilterStats::default();
        stats.record(Duration::from_micros(10));
        stats.record(Duration::from_micros(30));
        assert_eq!(stats.calls(), 2);
        assert_eq!(stats.total_self_time(), Duration::from_micros(40));
        assert_eq!(stats.mean_self_time(), Duration::from_micros(20));
    }
}
