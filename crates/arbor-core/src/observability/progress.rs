use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// 单个请求的诊断时间线。
///
/// # 教案式说明
/// - **What**：解析器与过滤器链在关键节点写入的文本记录与命名计时器，
///   例如 `resolveServlet(/content/page)` 的耗时、每个过滤器的 inner/outer/self 时间。
/// - **How**：实现只需线程安全地追加；模板参数以 [`fmt::Arguments`] 传入，
///   调用方用 `format_args!` 构造，记录前不做任何分配。
/// - **契约**：追踪器是纯诊断设施，缺失时调用方直接跳过，不视为错误；实现不得 panic。
pub trait ProgressTracker: Send + Sync {
    /// 追加一条记录。
    fn log(&self, message: fmt::Arguments<'_>);

    /// 启动命名计时器；同名计时器重复启动时以最后一次为准。
    fn start_timer(&self, name: &str);

    /// 结束命名计时器并记录耗时，可附带一条说明。
    fn log_timer(&self, name: &str, message: Option<fmt::Arguments<'_>>);
}

/// 追踪器中的一条记录。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgressEntry {
    offset: Duration,
    message: String,
}

impl ProgressEntry {
    /// 相对追踪器创建时刻的偏移。
    pub fn offset(&self) -> Duration {
        self.offset
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ProgressEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>7} {}", self.offset.as_millis(), self.message)
    }
}

#[derive(Default)]
struct TrackerState {
    entries: Vec<ProgressEntry>,
    timers: HashMap<String, Instant>,
}

/// 记录型追踪器：按时间顺序保存全部条目。
pub struct RequestProgressTracker {
    started: Instant,
    state: Mutex<TrackerState>,
}

impl RequestProgressTracker {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// 当前全部条目的快照。
    pub fn entries(&self) -> Vec<ProgressEntry> {
        self.state.lock().entries.clone()
    }

    /// 仅消息文本的快照，便于断言。
    pub fn messages(&self) -> Vec<String> {
        self.state
            .lock()
            .entries
            .iter()
            .map(|entry| entry.message.clone())
            .collect()
    }

    /// 以多行文本输出完整时间线。
    pub fn dump(&self) -> String {
        self.state
            .lock()
            .entries
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn push(&self, state: &mut TrackerState, message: String) {
        tracing::trace!(target: "arbor::progress", %message);
        state.entries.push(ProgressEntry {
            offset: self.started.elapsed(),
            message,
        });
    }
}

impl Default for RequestProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RequestProgressTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestProgressTracker")
            .field("entries", &self.state.lock().entries.len())
            .finish()
    }
}

impl ProgressTracker for RequestProgressTracker {
    fn log(&self, message: fmt::Arguments<'_>) {
        let mut state = self.state.lock();
        self.push(&mut state, message.to_string());
    }

    fn start_timer(&self, name: &str) {
        let mut state = self.state.lock();
        state.timers.insert(name.to_owned(), Instant::now());
        self.push(&mut state, format!("TIMER_START{{{name}}}"));
    }

    fn log_timer(&self, name: &str, message: Option<fmt::Arguments<'_>>) {
        let mut state = self.state.lock();
        let Some(started) = state.timers.remove(name) else {
            return;
        };
        let elapsed = started.elapsed().as_millis();
        let line = match message {
            Some(message) => format!("TIMER_END{{{elapsed},{name}}} {message}"),
            None => format!("TIMER_END{{{elapsed},{name}}}"),
        };
        self.push(&mut state, line);
    }
}
