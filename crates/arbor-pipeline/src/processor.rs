//! 请求处理与嵌套调度。
//!
//! # 教案式说明
//! - **What**：[`RequestProcessor`] 串起解析器与过滤器注册表：顶层请求先走 `REQUEST` 链，
//!   链尾进入 `COMPONENT` 链，组件链尾调用解析出的 Servlet；Servlet 通过
//!   [`Request::include`] / [`Request::forward`] 回到这里，走 `INCLUDE` / `FORWARD` 链。
//! - **How**：
//!   1. 顶层调度把处理器自身登记为请求的调度器，解析 Servlet 后执行 `REQUEST` 链；
//!   2. 嵌套调度解析目标资源（不存在时使用占位节点），压入内容帧并重新解析 Servlet，
//!      执行完毕后无论成败都弹出内容帧；
//!   3. 链上返回错误或响应记录了错误状态时，转入 `ERROR` 链，链尾是解析出的错误处理器。
//! - **契约**：Servlet 调用次数与嵌套深度受 [`EngineSettings`] 限制，超限以
//!   [`DispatchError`](arbor_core::request::DispatchError) 失败；错误处理不重入，
//!   处理错误期间再次出错时直接返回该错误。

use std::fmt;
use std::sync::Arc;

use arbor_core::config::EngineSettings;
use arbor_core::error::{CoreError, Result, codes};
use arbor_core::path_info::{DispatchOptions, RequestPathInfo};
use arbor_core::request::{Request, Response, attributes};
use arbor_core::resource::{SyntheticResource, TypeOverride, path};
use arbor_core::servlet::{RequestDispatcher, ServletRef};
use arbor_resolver::ServletResolver;

use crate::chain::{ChainTerminal, FilterChainExecutor};
use crate::registry::FilterManager;
use crate::scope::FilterScope;

/// 请求处理器，同时充当嵌套调度的 [`RequestDispatcher`]。
pub struct RequestProcessor {
    filters: Arc<FilterManager>,
    resolver: Arc<ServletResolver>,
    settings: EngineSettings,
}

impl RequestProcessor {
    pub fn new(
        filters: Arc<FilterManager>,
        resolver: Arc<ServletResolver>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            filters,
            resolver,
            settings,
        }
    }

    pub fn shared(
        filters: Arc<FilterManager>,
        resolver: Arc<ServletResolver>,
        settings: EngineSettings,
    ) -> Arc<Self> {
        Arc::new(Self::new(filters, resolver, settings))
    }

    pub fn filters(&self) -> &Arc<FilterManager> {
        &self.filters
    }

    pub fn resolver(&self) -> &Arc<ServletResolver> {
        &self.resolver
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// 处理顶层请求。
    ///
    /// 链上的错误与响应中记录的错误状态都交给错误处理流程；
    /// 只有错误处理本身失败时才返回 `Err`。
    pub fn process_request(self: &Arc<Self>, request: &mut Request, response: &mut Response) -> Result<()> {
        let dispatcher: Arc<dyn RequestDispatcher> = Arc::clone(self) as Arc<dyn RequestDispatcher>;
        request.set_dispatcher(dispatcher);
        if let Some(tracker) = request.tracker() {
            let info = request.path_info();
            tracker.log(format_args!(
                "Method={}, ResourcePath={}, Selectors={}, Extension={}, Suffix={}",
                request.method(),
                info.resource_path(),
                info.selector_string().unwrap_or(""),
                info.extension().unwrap_or(""),
                info.suffix().unwrap_or("")
            ));
        }

        let servlet = self.resolver.resolve_servlet(request);
        request.set_servlet(servlet);

        let outcome = self.run_chain(
            FilterScope::Request,
            RequestRender { processor: self },
            request,
            response,
        );
        match outcome {
            Ok(()) => match response.error().map(|(status, message)| (status, message.to_owned())) {
                Some((status, message)) => self.handle_error_status(status, &message, request, response),
                None => Ok(()),
            },
            Err(error) => {
                tracing::error!(
                    code = error.code(),
                    resource = %request.resource().path(),
                    error = %error,
                    "request processing failed"
                );
                self.handle_error(&error, request, response)
            }
        }
    }

    /// 以状态码驱动错误处理。
    pub fn handle_error_status(
        &self,
        status: u16,
        message: &str,
        request: &mut Request,
        response: &mut Response,
    ) -> Result<()> {
        if !self.enter_error_handling(request, status, message) {
            response.set_status(status);
            return Ok(());
        }
        response.reset_buffer();
        response.set_status(status);
        let timer = format!("handleError:status={status}");
        start_timer(request, &timer);
        let handler = self.resolver.resolve_error_handler_for_status(status, request);
        self.run_error_chain(&timer, handler, request, response)
    }

    /// 以错误驱动错误处理：未找到 Servlet 按 404 处理，其余按 500 处理并以错误码查找处理器。
    pub fn handle_error(
        &self,
        error: &CoreError,
        request: &mut Request,
        response: &mut Response,
    ) -> Result<()> {
        if error.code() == codes::RESOLVER_NOT_FOUND {
            return self.handle_error_status(404, error.message(), request, response);
        }
        const STATUS: u16 = 500;
        if !self.enter_error_handling(request, STATUS, error.message()) {
            response.set_status(STATUS);
            return Ok(());
        }
        request.set_attribute(attributes::ERROR_CODE, error.code());
        response.reset_buffer();
        response.set_status(STATUS);
        let timer = format!("handleError:error={}", error.code());
        start_timer(request, &timer);
        let handler = self.resolver.resolve_error_handler_for_error(error, request);
        self.run_error_chain(&timer, handler, request, response)
    }

    /// 调用 Servlet：计数、计时并维护当前 Servlet 名称属性。
    ///
    /// 错误处理器不经过这里，调用次数耗尽后仍能输出错误页。
    pub fn call_servlet(
        &self,
        servlet: &ServletRef,
        request: &mut Request,
        response: &mut Response,
    ) -> Result<()> {
        let call = request
            .record_servlet_call(self.settings.max_servlet_calls())
            .inspect_err(|err| tracing::warn!(servlet = servlet.name(), error = %err, "servlet call rejected"))?;
        invoke(servlet, &format!("{}#{call}", servlet.name()), request, response)
    }

    fn run_chain<T: ChainTerminal>(
        &self,
        scope: FilterScope,
        terminal: T,
        request: &mut Request,
        response: &mut Response,
    ) -> Result<()> {
        use crate::filter::FilterChain as _;
        let mut executor = FilterChainExecutor::new(self.filters.filters(scope), terminal);
        executor.proceed(request, response)
    }

    /// 执行 `ERROR` 链；`timer` 已由调用方开启，在链结束后记录。
    fn run_error_chain(
        &self,
        timer: &str,
        handler: ServletRef,
        request: &mut Request,
        response: &mut Response,
    ) -> Result<()> {
        tracing::debug!(handler = handler.name(), "handling error");
        if let Some(tracker) = request.tracker() {
            tracker.log(format_args!("Using handler {}", handler.name()));
        }
        let result = self.run_chain(
            FilterScope::Error,
            ErrorRender { handler },
            request,
            response,
        );
        if let Some(tracker) = request.tracker() {
            tracker.log_timer(timer, Some(format_args!("Error handler finished")));
        }
        result
    }

    /// 写入错误属性；已处于错误处理中时返回 `false`。
    fn enter_error_handling(&self, request: &mut Request, status: u16, message: &str) -> bool {
        if let Some(original) = request.attribute(attributes::ERROR_REQUEST_PATH) {
            tracing::warn!(
                status,
                original = %original,
                "recursive error handling detected, not handling status again"
            );
            return false;
        }
        let resource_path = request.resource().path().to_owned();
        let servlet_name = request.servlet().map(|servlet| servlet.name().to_owned());
        request.set_attribute(attributes::ERROR_STATUS, status.to_string());
        request.set_attribute(attributes::ERROR_MESSAGE, message);
        request.set_attribute(attributes::ERROR_REQUEST_PATH, resource_path);
        if let Some(name) = servlet_name {
            request.set_attribute(attributes::ERROR_SERVLET_NAME, name);
        }
        true
    }

    fn dispatch(
        &self,
        scope: FilterScope,
        request: &mut Request,
        response: &mut Response,
        target: &str,
        options: &DispatchOptions,
    ) -> Result<()> {
        let joined = if path::is_absolute(target) {
            target.to_owned()
        } else {
            path::join(request.resource().path(), target)
        };
        let Some(absolute) = path::normalize(&joined) else {
            return Err(CoreError::new(
                codes::RESOLVER_NOT_FOUND,
                format!("cannot dispatch to {joined}: path escapes the root"),
            ));
        };
        let accessor = self.resolver.accessor();
        let (resource, path_info) = RequestPathInfo::resolve(&absolute, accessor.as_ref());
        let resource = resource.unwrap_or_else(|| SyntheticResource::new(path_info.resource_path()).into_ref());
        let resource = match &options.force_resource_type {
            Some(resource_type) => TypeOverride::wrap(resource, resource_type.as_str()),
            None => resource,
        };
        let path_info = path_info.merge(options);
        tracing::debug!(scope = %scope, target = %absolute, resource = %resource.path(), "dispatching");

        request
            .push_content(resource, path_info, self.settings.max_inclusion_depth())
            .inspect_err(|err| tracing::warn!(target = %absolute, error = %err, "dispatch rejected"))?;
        let servlet = self.resolver.resolve_servlet(request);
        request.set_servlet(servlet);

        let result = self.run_chain(scope, ComponentRender { processor: self }, request, response);
        request.pop_content();
        result
    }
}

fn start_timer(request: &Request, timer: &str) {
    if let Some(tracker) = request.tracker() {
        tracker.start_timer(timer);
    }
}

/// 执行 Servlet，`timer` 为诊断时间线上的计时名称。
fn invoke(servlet: &ServletRef, timer: &str, request: &mut Request, response: &mut Response) -> Result<()> {
    start_timer(request, timer);

    let previous = request.attribute(attributes::CURRENT_SERVLET_NAME).map(str::to_owned);
    request.set_attribute(attributes::CURRENT_SERVLET_NAME, servlet.name());
    let result = servlet.service(request, response);
    match previous {
        Some(name) => request.set_attribute(attributes::CURRENT_SERVLET_NAME, name),
        None => {
            request.remove_attribute(attributes::CURRENT_SERVLET_NAME);
        }
    }

    if let Some(tracker) = request.tracker() {
        tracker.log_timer(timer, None);
    }
    result
}

impl RequestDispatcher for RequestProcessor {
    fn include(
        &self,
        request: &mut Request,
        response: &mut Response,
        path: &str,
        options: &DispatchOptions,
    ) -> Result<()> {
        self.dispatch(FilterScope::Include, request, response, path, options)
    }

    fn forward(
        &self,
        request: &mut Request,
        response: &mut Response,
        path: &str,
        options: &DispatchOptions,
    ) -> Result<()> {
        response.reset_buffer();
        self.dispatch(FilterScope::Forward, request, response, path, options)
    }
}

impl fmt::Debug for RequestProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestProcessor")
            .field("filters", &self.filters)
            .field("resolver", &self.resolver)
            .field("settings", &self.settings)
            .finish()
    }
}

/// `REQUEST` 链的终点：进入 `COMPONENT` 链。
pub struct RequestRender<'a> {
    processor: &'a RequestProcessor,
}

impl ChainTerminal for RequestRender<'_> {
    fn render(&mut self, request: &mut Request, response: &mut Response) -> Result<()> {
        self.processor.run_chain(
            FilterScope::Component,
            ComponentRender {
                processor: self.processor,
            },
            request,
            response,
        )
    }
}

/// `COMPONENT` / `INCLUDE` / `FORWARD` 链的终点：调用当前内容帧解析出的 Servlet。
pub struct ComponentRender<'a> {
    processor: &'a RequestProcessor,
}

impl ChainTerminal for ComponentRender<'_> {
    fn render(&mut self, request: &mut Request, response: &mut Response) -> Result<()> {
        let Some(servlet) = request.servlet().cloned() else {
            return Err(CoreError::new(
                codes::RESOLVER_NOT_FOUND,
                format!("no servlet to handle {}", request.resource().path()),
            ));
        };
        self.processor.call_servlet(&servlet, request, response)
    }
}

/// `ERROR` 链的终点：调用错误处理器。
pub struct ErrorRender {
    handler: ServletRef,
}

impl ChainTerminal for ErrorRender {
    fn render(&mut self, request: &mut Request, response: &mut Response) -> Result<()> {
        let timer = format!("{}#error", self.handler.name());
        invoke(&self.handler, &timer, request, response)
    }
}
