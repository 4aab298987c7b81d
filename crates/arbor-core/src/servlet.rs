//! 渲染终点契约：Servlet 与请求调度器。

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::path_info::DispatchOptions;
use crate::request::{Request, Response};

/// 解析结果的执行者：脚本、编译好的处理器或默认处理器。
///
/// `accepts` 用于“挑选型”Servlet：解析器按候选顺序询问，第一个接受请求的胜出；
/// 涉及挑选型 Servlet 的解析结果不会进入缓存，因为答案取决于请求本身。
pub trait Servlet: Send + Sync {
    fn name(&self) -> &str;

    fn accepts(&self, _request: &Request) -> bool {
        true
    }

    fn is_opting(&self) -> bool {
        false
    }

    fn service(&self, request: &mut Request, response: &mut Response) -> Result<()>;
}

pub type ServletRef = Arc<dyn Servlet>;

impl fmt::Debug for dyn Servlet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Servlet").field(&self.name()).finish()
    }
}

/// 嵌套调度入口，由请求处理器实现。
///
/// Servlet 通过 [`Request::include`]、[`Request::forward`] 间接调用，调度期间请求的当前资源、
/// 路径分解与 Servlet 被替换，返回前恢复。
pub trait RequestDispatcher: Send + Sync {
    fn include(
        &self,
        request: &mut Request,
        response: &mut Response,
        path: &str,
        options: &DispatchOptions,
    ) -> Result<()>;

    fn forward(
        &self,
        request: &mut Request,
        response: &mut Response,
        path: &str,
        options: &DispatchOptions,
    ) -> Result<()>;
}

/// 以闭包实现的 Servlet，适合示例程序与测试。
pub struct FnServlet<F> {
    name: String,
    handler: F,
}

impl<F> FnServlet<F>
where
    F: Fn(&mut Request, &mut Response) -> Result<()> + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }

    pub fn shared(name: impl Into<String>, handler: F) -> ServletRef {
        Arc::new(Self::new(name, handler))
    }
}

impl<F> Servlet for FnServlet<F>
where
    F: Fn(&mut Request, &mut Response) -> Result<()> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn service(&self, request: &mut Request, response: &mut Response) -> Result<()> {
        (self.handler)(request, response)
    }
}
