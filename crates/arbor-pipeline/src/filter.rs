//! 过滤器契约、登记元数据与请求谓词。
//!
//! # 教案式说明
//! - **What**：[`Filter`] 是链上的一个环节，[`FilterChain`] 是交给它的显式延续；
//!   [`FilterRegistration`] 描述名称、作用域、顺序与谓词，[`FilterPredicate`] 在过滤器自身的
//!   `select` 之前按方法、选择器、扩展名、资源类型与路径正则筛选请求。
//! - **How**：过滤器只通过 `chain.proceed(..)` 把控制权交给后续环节；不调用即截断链条，
//!   此时渲染步骤不会执行。
//! - **契约**：`init` 在登记进任何链之前调用且只调用一次，失败则不登记；
//!   `teardown` 在过滤器从注册表移除时调用一次。

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use regex::Regex;
use thiserror::Error;

use arbor_core::error::{CoreError, Result, codes};
use arbor_core::request::{Request, Response};

use crate::scope::FilterScope;

/// 链上的一个环节。
pub trait Filter: Send + Sync {
    fn init(&self, _config: &FilterConfig) -> Result<()> {
        Ok(())
    }

    /// 返回 `false` 时本过滤器被跳过，链条继续。
    fn select(&self, _request: &Request) -> bool {
        true
    }

    fn do_filter(
        &self,
        request: &mut Request,
        response: &mut Response,
        chain: &mut dyn FilterChain,
    ) -> Result<()>;

    fn teardown(&self) {}
}

pub type FilterRef = Arc<dyn Filter>;

/// 过滤器继续执行链条的入口。
pub trait FilterChain {
    fn proceed(&mut self, request: &mut Request, response: &mut Response) -> Result<()>;
}

/// 以闭包实现的过滤器。
pub struct FnFilter<F> {
    handler: F,
}

impl<F> FnFilter<F>
where
    F: Fn(&mut Request, &mut Response, &mut dyn FilterChain) -> Result<()> + Send + Sync + 'static,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }

    pub fn shared(handler: F) -> FilterRef {
        Arc::new(Self::new(handler))
    }
}

impl<F> Filter for FnFilter<F>
where
    F: Fn(&mut Request, &mut Response, &mut dyn FilterChain) -> Result<()> + Send + Sync + 'static,
{
    fn do_filter(
        &self,
        request: &mut Request,
        response: &mut Response,
        chain: &mut dyn FilterChain,
    ) -> Result<()> {
        (self.handler)(request, response, chain)
    }
}

/// 交给 [`Filter::init`] 的配置视图。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterConfig {
    name: String,
    params: BTreeMap<String, String>,
}

impl FilterConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// 过滤器登记与配置错误。
#[derive(Debug, Error)]
pub enum FilterConfigError {
    #[error("filter registration is missing a name")]
    MissingName,
    #[error("unknown filter scope `{0}`")]
    UnknownScope(String),
    #[error("invalid {field} pattern `{pattern}`")]
    InvalidPattern {
        field: &'static str,
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("filter `{name}` failed to initialise")]
    InitFailed {
        name: String,
        #[source]
        source: CoreError,
    },
}

impl From<FilterConfigError> for CoreError {
    fn from(err: FilterConfigError) -> Self {
        let code = match &err {
            FilterConfigError::InitFailed { .. } => codes::FILTER_INIT_FAILED,
            _ => codes::FILTER_CONFIG_INVALID,
        };
        CoreError::new(code, err.to_string()).with_cause(err)
    }
}

/// 请求谓词：未设置的条件视为全部匹配，已设置的条件需同时满足。
#[derive(Clone, Debug, Default)]
pub struct FilterPredicate {
    methods: Vec<String>,
    selectors: Vec<String>,
    extensions: Vec<String>,
    resource_types: Vec<String>,
    path_pattern: Option<Regex>,
    suffix_pattern: Option<Regex>,
}

impl FilterPredicate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.methods = methods.into_iter().map(Into::into).collect();
        self
    }

    /// 请求带有其中任意一个选择器即匹配。
    pub fn with_selectors<I, S>(mut self, selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selectors = selectors.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    /// 资源类型或其显式父类型命中其一即匹配。
    pub fn with_resource_types<I, S>(mut self, resource_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resource_types = resource_types.into_iter().map(Into::into).collect();
        self
    }

    /// 对资源路径做正则匹配。
    pub fn with_path_pattern(mut self, pattern: &str) -> Result<Self, FilterConfigError> {
        self.path_pattern = Some(compile("path", pattern)?);
        Ok(self)
    }

    /// 对后缀做正则匹配，没有后缀时以空串参与匹配。
    pub fn with_suffix_pattern(mut self, pattern: &str) -> Result<Self, FilterConfigError> {
        self.suffix_pattern = Some(compile("suffix", pattern)?);
        Ok(self)
    }

    pub fn matches(&self, request: &Request) -> bool {
        let path_info = request.path_info();
        if !self.methods.is_empty()
            && !self
                .methods
                .iter()
                .any(|m| m.eq_ignore_ascii_case(request.method().as_str()))
        {
            return false;
        }
        if !self.selectors.is_empty()
            && !path_info
                .selectors()
                .iter()
                .any(|s| self.selectors.contains(s))
        {
            return false;
        }
        if !self.extensions.is_empty()
            && !path_info
                .extension()
                .is_some_and(|ext| self.extensions.iter().any(|e| e == ext))
        {
            return false;
        }
        if !self.resource_types.is_empty() {
            let resource = request.resource();
            let hit = self.resource_types.iter().any(|rt| {
                rt == resource.resource_type() || Some(rt.as_str()) == resource.resource_super_type()
            });
            if !hit {
                return false;
            }
        }
        if let Some(pattern) = &self.path_pattern {
            if !pattern.is_match(path_info.resource_path()) {
                return false;
            }
        }
        if let Some(pattern) = &self.suffix_pattern {
            if !pattern.is_match(path_info.suffix().unwrap_or_default()) {
                return false;
            }
        }
        true
    }
}

fn compile(field: &'static str, pattern: &str) -> Result<Regex, FilterConfigError> {
    Regex::new(pattern).map_err(|source| FilterConfigError::InvalidPattern {
        field,
        pattern: pattern.to_owned(),
        source,
    })
}

/// 顺序值的来源说明，写入诊断输出。
pub const ORDER_SOURCE_EXPLICIT: &str = "explicit order";
pub const ORDER_SOURCE_RANKING: &str = "negative service ranking";
pub const ORDER_SOURCE_DEFAULT: &str = "default order";

/// 过滤器登记元数据。
///
/// 名称是唯一的必填项。作用域以字符串保存，登记时解析，未知名称被记录并跳过；
/// 没有声明任何作用域时按 `REQUEST` 登记。
#[derive(Clone, Debug)]
pub struct FilterRegistration {
    name: Option<String>,
    scopes: Vec<String>,
    order: i32,
    order_source: &'static str,
    service_id: Option<u64>,
    predicate: Option<FilterPredicate>,
    params: BTreeMap<String, String>,
}

impl FilterRegistration {
    pub fn new() -> Self {
        Self {
            name: None,
            scopes: Vec::new(),
            order: 0,
            order_source: ORDER_SOURCE_DEFAULT,
            service_id: None,
            predicate: None,
            params: BTreeMap::new(),
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::new().with_name(name)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_scope(mut self, scope: FilterScope) -> Self {
        self.scopes.push(scope.as_str().to_owned());
        self
    }

    /// 以名称声明作用域，大小写不敏感。
    pub fn with_scope_name(mut self, scope: impl Into<String>) -> Self {
        self.scopes.push(scope.into());
        self
    }

    /// 显式顺序，数值小者先执行。
    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self.order_source = ORDER_SOURCE_EXPLICIT;
        self
    }

    /// 以服务排名表达顺序：排名越高越先执行，顺序值取其相反数。
    pub fn with_ranking(mut self, ranking: i32) -> Self {
        self.order = ranking.saturating_neg();
        self.order_source = ORDER_SOURCE_RANKING;
        self
    }

    pub fn with_service_id(mut self, service_id: u64) -> Self {
        self.service_id = Some(service_id);
        self
    }

    pub fn with_predicate(mut self, predicate: FilterPredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref().filter(|name| !name.trim().is_empty())
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    pub fn order(&self) -> i32 {
        self.order
    }

    pub fn order_source(&self) -> &'static str {
        self.order_source
    }

    pub fn service_id(&self) -> Option<u64> {
        self.service_id
    }

    pub fn predicate(&self) -> Option<&FilterPredicate> {
        self.predicate.as_ref()
    }

    /// 供 [`Filter::init`] 使用的配置视图；名称缺失时返回 `None`。
    pub fn config(&self) -> Option<FilterConfig> {
        self.name().map(|name| FilterConfig {
            name: name.to_owned(),
            params: self.params.clone(),
        })
    }
}

impl Default for FilterRegistration {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FilterRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (order {}, {})",
            self.name().unwrap_or("<unnamed>"),
            self.order,
            self.order_source
        )
    }
}
