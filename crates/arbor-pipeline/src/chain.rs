//! 过滤器链执行器。
//!
//! # 教案式说明
//! - **What**：[`FilterChainExecutor`] 持有一次调度的链快照、游标与耗时数组，把自身作为
//!   [`FilterChain`] 交给每个过滤器；链条耗尽时调用 [`ChainTerminal::render`]。
//! - **How**：
//!   1. `proceed` 先推进游标（初值 -1），再计时执行当前位置；
//!   2. 当前过滤器接受请求则调用它，由它决定是否继续；拒绝时若已是最后一个则直接渲染，
//!      否则递归尝试下一个；
//!   3. 无论成功与否，当前位置的耗时都写入 `times[i]`；
//!   4. 最外层（位置 0）返回时汇总：`outer = times[i]`，`inner = times[i + 1]`，
//!      自身耗时为二者之差，写入诊断追踪器、`tracing` 与过滤器统计。
//! - **契约**：执行器每次调度新建，不跨线程共享；渲染至多执行一次；
//!   过滤器或渲染返回的错误原样向上传播，执行器只保证耗时记账。

use std::fmt;
use std::time::{Duration, Instant};

use arbor_core::error::Result;
use arbor_core::request::{Request, Response};

use crate::filter::FilterChain;
use crate::registry::FilterSnapshot;

/// 链条耗尽后的渲染步骤。
pub trait ChainTerminal {
    fn render(&mut self, request: &mut Request, response: &mut Response) -> Result<()>;
}

impl<F> ChainTerminal for F
where
    F: FnMut(&mut Request, &mut Response) -> Result<()>,
{
    fn render(&mut self, request: &mut Request, response: &mut Response) -> Result<()> {
        self(request, response)
    }
}

/// 单个过滤器在一次调度中的耗时。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterTiming {
    pub name: String,
    pub filter_id: u64,
    /// 是否被调用（谓词或 `select` 拒绝时为 `false`）。
    pub invoked: bool,
    /// 从进入该位置到返回的总耗时。
    pub outer: Duration,
    /// 后续位置（过滤器或渲染）的耗时。
    pub inner: Duration,
    /// `outer - inner`。
    pub self_time: Duration,
}

/// 一次调度的耗时汇总。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterTimings {
    filters: Vec<FilterTiming>,
    render: Duration,
}

impl FilterTimings {
    pub fn filters(&self) -> &[FilterTiming] {
        &self.filters
    }

    /// 渲染步骤经由游标末位执行时的耗时；由最后一个被拒绝的过滤器直接渲染时为零。
    pub fn render(&self) -> Duration {
        self.render
    }
}

/// 一次调度的链执行器。
pub struct FilterChainExecutor<T> {
    filters: FilterSnapshot,
    cursor: isize,
    times: Vec<Duration>,
    invoked: Vec<bool>,
    terminal: T,
    rendered: bool,
    timings: Option<FilterTimings>,
}

impl<T: ChainTerminal> FilterChainExecutor<T> {
    pub fn new(filters: FilterSnapshot, terminal: T) -> Self {
        let len = filters.len();
        Self {
            filters,
            cursor: -1,
            times: vec![Duration::ZERO; len + 1],
            invoked: vec![false; len],
            terminal,
            rendered: false,
            timings: None,
        }
    }

    /// 最外层调用返回后可用。
    pub fn timings(&self) -> Option<&FilterTimings> {
        self.timings.as_ref()
    }

    /// 渲染步骤是否已执行。
    pub fn rendered(&self) -> bool {
        self.rendered
    }

    pub fn into_terminal(self) -> T {
        self.terminal
    }

    fn step(&mut self, index: usize, request: &mut Request, response: &mut Response) -> Result<()> {
        let filters = FilterSnapshot::clone(&self.filters);
        let Some(entry) = filters.get(index) else {
            return self.render_once(request, response);
        };

        if entry.select(request) {
            if let Some(tracker) = request.tracker() {
                tracker.log(format_args!("Calling filter: {}", entry.name()));
            }
            self.invoked[index] = true;
            entry.filter().do_filter(request, response, self)
        } else if index + 1 == filters.len() {
            self.render_once(request, response)
        } else {
            self.proceed(request, response)
        }
    }

    fn render_once(&mut self, request: &mut Request, response: &mut Response) -> Result<()> {
        if self.rendered {
            tracing::warn!("filter chain already rendered, ignoring repeated proceed");
            return Ok(());
        }
        self.rendered = true;
        self.terminal.render(request, response)
    }

    fn consolidate(&mut self, request: &Request) {
        let mut timings = Vec::with_capacity(self.filters.len());
        for (index, entry) in self.filters.iter().enumerate() {
            let outer = self.times[index];
            let inner = self.times[index + 1];
            let self_time = outer.saturating_sub(inner);
            let invoked = self.invoked[index];
            if invoked {
                entry.stats().record(self_time);
                if let Some(tracker) = request.tracker() {
                    tracker.log(format_args!(
                        "Filter timing: filter={}, inner={}, total={}, outer={}",
                        entry.name(),
                        inner.as_micros(),
                        outer.as_micros(),
                        self_time.as_micros()
                    ));
                }
                tracing::trace!(
                    filter = entry.name(),
                    filter_id = entry.filter_id(),
                    inner_us = inner.as_micros() as u64,
                    outer_us = outer.as_micros() as u64,
                    self_us = self_time.as_micros() as u64,
                    "filter timing"
                );
            }
            timings.push(FilterTiming {
                name: entry.name().to_owned(),
                filter_id: entry.filter_id(),
                invoked,
                outer,
                inner,
                self_time,
            });
        }
        self.timings = Some(FilterTimings {
            filters: timings,
            render: self.times[self.filters.len()],
        });
    }
}

impl<T: ChainTerminal> FilterChain for FilterChainExecutor<T> {
    fn proceed(&mut self, request: &mut Request, response: &mut Response) -> Result<()> {
        self.cursor += 1;
        let Ok(index) = usize::try_from(self.cursor) else {
            return Ok(());
        };
        if index >= self.times.len() {
            tracing::warn!(position = index, "filter chain exhausted, ignoring repeated proceed");
            return Ok(());
        }

        let started = Instant::now();
        let result = self.step(index, request, response);
        self.times[index] = started.elapsed();
        if index == 0 {
            self.consolidate(request);
        }
        result
    }
}

impl<T> fmt::Debug for FilterChainExecutor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterChainExecutor")
            .field("filters", &self.filters.len())
            .field("cursor", &self.cursor)
            .field("rendered", &self.rendered)
            .finish_non_exhaustive()
    }
}
