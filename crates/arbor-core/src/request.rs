//! 请求与响应。
//!
//! # 教案式说明
//! - **What**：[`Request`] 携带方法、当前内容帧（资源 + 路径分解 + 已解析的 Servlet）、
//!   include/forward 形成的内容栈、属性表、诊断追踪器与调度器；[`Response`] 是内存缓冲的响应。
//! - **How**：调度器进入嵌套调度时调用 [`Request::push_content`] 压入新帧，返回时
//!   [`Request::pop_content`] 恢复；Servlet 调用前通过 [`Request::record_servlet_call`] 计数。
//! - **契约**：内容栈深度与调用次数的上限由调用方传入，超限以 [`DispatchError`] 报告；
//!   请求属于单个执行线程，不做内部同步。

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

use crate::error::{CoreError, Result, codes};
use crate::observability::ProgressTracker;
use crate::path_info::{DispatchOptions, RequestPathInfo};
use crate::resource::ResourceRef;
use crate::servlet::{RequestDispatcher, ServletRef};

/// 调度与错误处理写入请求的属性名。
pub mod attributes {
    /// 错误处理时的状态码。
    pub const ERROR_STATUS: &str = "arbor.error.status";
    /// 错误处理时的说明文本。
    pub const ERROR_MESSAGE: &str = "arbor.error.message";
    /// 触发错误处理的错误码。
    pub const ERROR_CODE: &str = "arbor.error.code";
    /// 发生错误的资源路径；存在即表示正在处理错误，用于阻止递归。
    pub const ERROR_REQUEST_PATH: &str = "arbor.error.request_path";
    /// 出错时正在执行的 Servlet。
    pub const ERROR_SERVLET_NAME: &str = "arbor.error.servlet_name";
    /// 当前正在执行的 Servlet。
    pub const CURRENT_SERVLET_NAME: &str = "arbor.current_servlet_name";
}

/// 请求方法。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Other(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Other(name) => name,
        }
    }

    /// GET 与 HEAD 共享按扩展名匹配脚本的规则。
    pub fn is_get(&self) -> bool {
        matches!(self, Method::Get | Method::Head)
    }
}

impl FromStr for Method {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        Ok(match upper.as_str() {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "OPTIONS" => Method::Options,
            _ => Method::Other(upper),
        })
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 调度限制错误。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("too deep recursion resolving {path} (limit {limit})")]
    RecursionTooDeep { path: String, limit: usize },
    #[error("too many servlet calls (limit {limit})")]
    TooManyCalls { limit: usize },
    #[error("no request dispatcher available for {path}")]
    Unavailable { path: String },
}

impl From<DispatchError> for CoreError {
    fn from(err: DispatchError) -> Self {
        let code = match &err {
            DispatchError::RecursionTooDeep { .. } => codes::DISPATCH_RECURSION_TOO_DEEP,
            DispatchError::TooManyCalls { .. } => codes::DISPATCH_TOO_MANY_CALLS,
            DispatchError::Unavailable { .. } => codes::DISPATCH_UNAVAILABLE,
        };
        CoreError::new(code, err.to_string()).with_cause(err)
    }
}

/// 一个内容帧：当前处理的资源、其路径分解与解析出的 Servlet。
#[derive(Clone)]
pub struct ContentFrame {
    resource: ResourceRef,
    path_info: RequestPathInfo,
    servlet: Option<ServletRef>,
}

impl ContentFrame {
    pub fn new(resource: ResourceRef, path_info: RequestPathInfo) -> Self {
        Self {
            resource,
            path_info,
            servlet: None,
        }
    }

    pub fn resource(&self) -> &ResourceRef {
        &self.resource
    }

    pub fn path_info(&self) -> &RequestPathInfo {
        &self.path_info
    }

    pub fn servlet(&self) -> Option<&ServletRef> {
        self.servlet.as_ref()
    }
}

impl fmt::Debug for ContentFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentFrame")
            .field("resource", &self.resource.path())
            .field("path_info", &self.path_info)
            .field("servlet", &self.servlet.as_ref().map(|s| s.name().to_owned()))
            .finish()
    }
}

/// 进入处理流程的请求。
pub struct Request {
    method: Method,
    content: ContentFrame,
    stack: Vec<ContentFrame>,
    attributes: BTreeMap<String, String>,
    tracker: Option<Arc<dyn ProgressTracker>>,
    dispatcher: Option<Arc<dyn RequestDispatcher>>,
    servlet_calls: usize,
}

impl Request {
    pub fn new(method: Method, resource: ResourceRef, path_info: RequestPathInfo) -> Self {
        Self {
            method,
            content: ContentFrame::new(resource, path_info),
            stack: Vec::new(),
            attributes: BTreeMap::new(),
            tracker: None,
            dispatcher: None,
            servlet_calls: 0,
        }
    }

    pub fn with_tracker(mut self, tracker: Arc<dyn ProgressTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn resource(&self) -> &ResourceRef {
        &self.content.resource
    }

    pub fn path_info(&self) -> &RequestPathInfo {
        &self.content.path_info
    }

    pub fn content(&self) -> &ContentFrame {
        &self.content
    }

    /// 当前内容帧已解析的 Servlet。
    pub fn servlet(&self) -> Option<&ServletRef> {
        self.content.servlet.as_ref()
    }

    pub fn set_servlet(&mut self, servlet: Option<ServletRef>) {
        self.content.servlet = servlet;
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn remove_attribute(&mut self, key: &str) -> Option<String> {
        self.attributes.remove(key)
    }

    pub fn tracker(&self) -> Option<&dyn ProgressTracker> {
        self.tracker.as_deref()
    }

    pub fn set_dispatcher(&mut self, dispatcher: Arc<dyn RequestDispatcher>) {
        self.dispatcher = Some(dispatcher);
    }

    /// 当前 include/forward 嵌套深度，顶层请求为 0。
    pub fn inclusion_depth(&self) -> usize {
        self.stack.len()
    }

    pub fn servlet_calls(&self) -> usize {
        self.servlet_calls
    }

    /// 压入嵌套调度的内容帧；深度达到 `max_depth` 时拒绝。
    pub fn push_content(
        &mut self,
        resource: ResourceRef,
        path_info: RequestPathInfo,
        max_depth: usize,
    ) -> Result<(), DispatchError> {
        if self.stack.len() >= max_depth {
            return Err(DispatchError::RecursionTooDeep {
                path: resource.path().to_owned(),
                limit: max_depth,
            });
        }
        let frame = ContentFrame::new(resource, path_info);
        self.stack.push(std::mem::replace(&mut self.content, frame));
        Ok(())
    }

    /// 弹出当前帧并恢复外层帧；顶层请求返回 `None`。
    pub fn pop_content(&mut self) -> Option<ContentFrame> {
        let outer = self.stack.pop()?;
        Some(std::mem::replace(&mut self.content, outer))
    }

    /// 记录一次 Servlet 调用，返回本次调用的序号（从 1 开始）。
    pub fn record_servlet_call(&mut self, max_calls: usize) -> Result<usize, DispatchError> {
        if self.servlet_calls >= max_calls {
            return Err(DispatchError::TooManyCalls { limit: max_calls });
        }
        self.servlet_calls += 1;
        Ok(self.servlet_calls)
    }

    /// 把 `path` 的渲染结果并入当前响应。
    pub fn include(
        &mut self,
        response: &mut Response,
        path: &str,
        options: &DispatchOptions,
    ) -> Result<()> {
        let dispatcher = self.require_dispatcher(path)?;
        dispatcher.include(self, response, path, options)
    }

    /// 放弃当前输出，改由 `path` 渲染。
    pub fn forward(
        &mut self,
        response: &mut Response,
        path: &str,
        options: &DispatchOptions,
    ) -> Result<()> {
        let dispatcher = self.require_dispatcher(path)?;
        dispatcher.forward(self, response, path, options)
    }

    fn require_dispatcher(&self, path: &str) -> Result<Arc<dyn RequestDispatcher>, DispatchError> {
        self.dispatcher
            .clone()
            .ok_or_else(|| DispatchError::Unavailable {
                path: path.to_owned(),
            })
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("content", &self.content)
            .field("depth", &self.stack.len())
            .field("servlet_calls", &self.servlet_calls)
            .finish_non_exhaustive()
    }
}

/// 内存缓冲的响应。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
    error: Option<(u16, String)>,
}

impl Response {
    pub fn new() -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: String::new(),
            error: None,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(key, _)| !key.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }

    pub fn write(&mut self, text: &str) {
        self.body.push_str(text);
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// 清空已缓冲的正文，forward 前调用。
    pub fn reset_buffer(&mut self) {
        self.body.clear();
    }

    /// 以错误状态结束响应。
    pub fn send_error(&mut self, status: u16, message: impl Into<String>) {
        self.status = status;
        self.error = Some((status, message.into()));
    }

    /// 通过 [`send_error`](Self::send_error) 记录的错误。
    pub fn error(&self) -> Option<(u16, &str)> {
        self.error
            .as_ref()
            .map(|(status, message)| (*status, message.as_str()))
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::SyntheticResource;

    fn request_at(path: &str) -> Request {
        Request::new(
            Method::Get,
            SyntheticResource::with_type(path, "app/page").into_ref(),
            RequestPathInfo::parse(path),
        )
    }

    #[test]
    fn content_stack_restores_outer_frame() {
        let mut request = request_at("/content/page");
        let inner = SyntheticResource::new("/content/teaser").into_ref();
        request
            .push_content(inner, RequestPathInfo::parse("/content/teaser.html"), 2)
            .expect("深度未超限");
        assert_eq!(request.resource().path(), "/content/teaser");
        assert_eq!(request.inclusion_depth(), 1);

        let popped = request.pop_content().expect("存在嵌套帧");
        assert_eq!(popped.resource().path(), "/content/teaser");
        assert_eq!(request.resource().path(), "/content/page");
        assert!(request.pop_content().is_none(), "顶层帧不可弹出");
    }

    #[test]
    fn push_content_enforces_depth() {
        let mut request = request_at("/a");
        let resource = SyntheticResource::new("/b").into_ref();
        request
            .push_content(resource.clone(), RequestPathInfo::default(), 1)
            .expect("第一层允许");
        let err = request
            .push_content(resource, RequestPathInfo::default(), 1)
            .expect_err("第二层超限");
        assert_eq!(
            err,
            DispatchError::RecursionTooDeep {
                path: "/b".to_owned(),
                limit: 1
            }
        );
    }

    #[test]
    fn servlet_call_counter_is_bounded() {
        let mut request = request_at("/a");
        assert_eq!(request.record_servlet_call(2), Ok(1));
        assert_eq!(request.record_servlet_call(2), Ok(2));
        assert_eq!(
            request.record_servlet_call(2),
            Err(DispatchError::TooManyCalls { limit: 2 })
        );
    }

    #[test]
    fn include_without_dispatcher_fails() {
        let mut request = request_at("/a");
        let mut response = Response::new();
        let err = request
            .include(&mut response, "/b.html", &DispatchOptions::default())
            .expect_err("缺少调度器");
        assert_eq!(err.code(), codes::DISPATCH_UNAVAILABLE);
    }

    #[test]
    fn method_parsing_is_case_insensitive() {
        assert_eq!("get".parse::<Method>(), Ok(Method::Get));
        assert_eq!("purge".parse::<Method>(), Ok(Method::Other("PURGE".to_owned())));
        assert!(Method::Head.is_get());
        assert!(!Method::Post.is_get());
    }
}
