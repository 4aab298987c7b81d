#![deny(unsafe_code)]
#![doc = "arbor-resolver: 沿资源类型继承链与搜索路径查找脚本，并按选择器/扩展名权重排序。"]
#![doc = ""]
#![doc = "- [`LocationIterator`]：搜索路径 × 类型继承链的候选目录；"]
#![doc = "- [`ResourceCollector`] / [`NamedScriptResourceCollector`]：在每个目录上匹配脚本名并加权；"]
#![doc = "- [`ServletResolver`]：候选适配、挑选型 Servlet、解析缓存、错误处理器与脚本查找。"]

pub mod collector;
pub mod defaults;
pub mod location;
pub mod named;
pub mod registry;
pub mod resolver;
pub mod weight;

pub use collector::{CollectorBase, ResourceCollector, SERVLET_PATH_EXTENSION, ScriptCollector};
pub use defaults::DefaultErrorServlet;
pub use location::LocationIterator;
pub use named::NamedScriptResourceCollector;
pub use registry::{ServletAdapter, ServletRegistry};
pub use resolver::{CollectorKey, DEFAULT_ERROR_HANDLER_METHOD, ServletResolver};
pub use weight::{MatchWeight, WeightedResource, WeightedResourceSet};
