use std::borrow::Cow;
use std::error::Error;
use std::fmt;

/// 底层原因的统一承载形式。
pub type ErrorCause = Box<dyn Error + Send + Sync + 'static>;

/// `CoreError` 是 arbor 各层共享的稳定错误域。
///
/// # 教案式说明
/// - **What**：只承载三件事：稳定错误码 `code`、面向排障人员的 `message`、可选底层原因 `cause`。
/// - **How**：子系统先以 `thiserror` 枚举描述细分语义（如 [`crate::config::ConfigError`]、
///   [`crate::request::DispatchError`]），再通过 `From` 收敛为 `CoreError`，过滤器与 Servlet 的返回值统一使用它。
/// - **契约**：`code` 遵循 `<领域>.<语义>`，取值见 [`codes`]；错误处理器解析会按 `.` 逐级截断错误码，
///   因此自定义码值也应保持层级命名。
#[derive(Debug)]
pub struct CoreError {
    code: &'static str,
    message: Cow<'static, str>,
    cause: Option<ErrorCause>,
}

impl CoreError {
    /// 构造核心错误。
    ///
    /// ```rust
    /// use arbor_core::{CoreError, error::codes};
    ///
    /// let err = CoreError::new(codes::SERVLET_FAILED, "render exploded");
    /// assert_eq!(err.code(), codes::SERVLET_FAILED);
    /// assert_eq!(err.message(), "render exploded");
    /// assert!(err.cause().is_none(), "初始错误默认不含底层原因");
    /// ```
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    /// 附带底层原因并返回新的核心错误。
    pub fn with_cause(mut self, cause: impl Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// 为现有错误设置底层原因。
    pub fn set_cause(&mut self, cause: impl Error + Send + Sync + 'static) {
        self.cause = Some(Box::new(cause));
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&ErrorCause> {
        self.cause.as_ref()
    }

    /// 由具体到宽泛列出错误码的各级前缀。
    ///
    /// `dispatch.recursion_too_deep` 依次产出 `dispatch.recursion_too_deep`、`dispatch`，
    /// 错误处理器解析以此模拟“沿异常继承链查找处理脚本”。
    pub fn code_hierarchy(&self) -> impl Iterator<Item = &'static str> {
        let code = self.code;
        let mut end = Some(code.len());
        std::iter::from_fn(move || {
            let current = end?;
            let slice = &code[..current];
            end = slice.rfind('.');
            Some(slice)
        })
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl Error for CoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause
            .as_ref()
            .map(|boxed| boxed.as_ref() as &(dyn Error + 'static))
    }
}

/// arbor 通用结果别名。
pub type Result<T, E = CoreError> = core::result::Result<T, E>;

/// 稳定错误码表。
///
/// 错误码是日志检索与错误处理脚本匹配的依据，发布后只增不改。
pub mod codes {
    /// 请求或脚本没有匹配到任何候选。
    pub const RESOLVER_NOT_FOUND: &str = "resolver.not_found";
    /// 资源类型继承链出现环。
    pub const RESOLVER_HIERARCHY_CIRCULAR: &str = "resolver.hierarchy_circular";
    /// 过滤器注册元数据缺失或非法。
    pub const FILTER_CONFIG_INVALID: &str = "filter.config_invalid";
    /// 过滤器初始化失败。
    pub const FILTER_INIT_FAILED: &str = "filter.init_failed";
    /// 过滤器执行期间抛出的错误。
    pub const FILTER_EXECUTION_FAILED: &str = "filter.execution_failed";
    /// include/forward 嵌套超过上限。
    pub const DISPATCH_RECURSION_TOO_DEEP: &str = "dispatch.recursion_too_deep";
    /// 单个请求内 Servlet 调用次数超过上限。
    pub const DISPATCH_TOO_MANY_CALLS: &str = "dispatch.too_many_calls";
    /// 请求调度器缺失（Servlet 在无处理器的上下文中尝试 include）。
    pub const DISPATCH_UNAVAILABLE: &str = "dispatch.unavailable";
    /// 配置无法解析或取值非法。
    pub const CONFIG_INVALID: &str = "config.invalid";
    /// 配置文件读取失败。
    pub const CONFIG_IO: &str = "config.io";
    /// Servlet 渲染失败。
    pub const SERVLET_FAILED: &str = "servlet.failed";
    /// 日志订阅器安装失败。
    pub const OBSERVABILITY_INSTALL: &str = "observability.install";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_hierarchy_walks_from_specific_to_generic() {
        let err = CoreError::new(codes::DISPATCH_RECURSION_TOO_DEEP, "too deep");
        let levels: Vec<_> = err.code_hierarchy().collect();
        assert_eq!(levels, vec!["dispatch.recursion_too_deep", "dispatch"]);
    }

    #[test]
    fn source_exposes_cause() {
        let io = std::io::Error::other("disk gone");
        let err = CoreError::new(codes::CONFIG_IO, "read failed").with_cause(io);
        let source = err.source().expect("应暴露底层原因");
        assert_eq!(source.to_string(), "disk gone");
        assert_eq!(err.to_string(), "[config.io] read failed");
    }
}
