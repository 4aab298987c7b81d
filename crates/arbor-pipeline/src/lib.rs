#![deny(unsafe_code)]
#![doc = "arbor-pipeline: 过滤器注册表、链式执行与请求调度。"]
#![doc = ""]
#![doc = "- [`FilterManager`]：按作用域维护有序过滤器链，写路径串行、读路径无锁快照；"]
#![doc = "- [`FilterChainExecutor`]：一次调度内驱动过滤器与渲染步骤，并统计每个过滤器的自身耗时；"]
#![doc = "- [`RequestProcessor`]：顶层请求、include/forward 与错误处理的调度入口。"]

pub mod chain;
pub mod filter;
pub mod processor;
pub mod registry;
pub mod scope;

pub use chain::{ChainTerminal, FilterChainExecutor, FilterTiming, FilterTimings};
pub use filter::{
    Filter, FilterChain, FilterConfig, FilterConfigError, FilterPredicate, FilterRef,
    FilterRegistration, FnFilter,
};
pub use processor::RequestProcessor;
pub use registry::{FilterChainHelper, FilterEntry, FilterManager, FilterSnapshot, FilterStats};
pub use scope::FilterScope;
