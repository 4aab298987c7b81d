#![deny(unsafe_code)]
#![doc = "arbor-core: 内容仓库请求解析的核心契约。"]
#![doc = ""]
#![doc = "提供资源模型与仓库访问契约、请求路径分解、请求/响应、Servlet 与调度器契约、"]
#![doc = "统一错误域、配置与请求级诊断追踪器。解析算法位于 `arbor-resolver`，"]
#![doc = "过滤器注册与链式执行位于 `arbor-pipeline`。"]

pub mod config;
pub mod error;
pub mod observability;
pub mod path_info;
pub mod request;
pub mod resource;
pub mod servlet;
pub mod test_stubs;

pub use config::{ArborSettings, EngineSettings, ExecutionPaths, ResolverSettings};
pub use error::{CoreError, Result};
pub use observability::{ProgressTracker, RequestProgressTracker};
pub use path_info::{DispatchOptions, RequestPathInfo, ResourcePathIterator};
pub use request::{DispatchError, Method, Request, Response};
pub use resource::{Resource, ResourceAccessor, ResourceRef, SyntheticResource};
pub use servlet::{FnServlet, RequestDispatcher, Servlet, ServletRef};
