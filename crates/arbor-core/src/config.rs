//! 解析器与引擎的配置项。
//!
//! # 教案式说明
//! - **What**：[`ResolverSettings`] 控制脚本解析（缓存容量、执行路径白名单、默认扩展名、基础类型），
//!   [`EngineSettings`] 控制请求调度上限；[`ArborSettings`] 聚合二者，可从 TOML 加载。
//! - **How**：结构体以 `serde(default)` 反序列化，缺省字段落回 `Default` 中的取值；
//!   执行路径在构造 [`ExecutionPaths`] 时预先归一化，解析热路径只做前缀比较。
//! - **契约**：配置是普通值，由调用方在构造解析器、处理器时传入，不存在全局状态。

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::error::{CoreError, codes};

/// 缺省基础资源类型：继承链的终点。
pub const DEFAULT_RESOURCE_TYPE: &str = "sling/servlet/default";
/// 错误处理脚本所在的基础类型。
pub const DEFAULT_ERROR_HANDLER_RESOURCE_TYPE: &str = "sling/servlet/errorhandler";
/// 缓存容量低于该值时禁用缓存。
pub const MIN_CACHE_SIZE: usize = 5;

/// 脚本解析配置。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolverSettings {
    cache_size: usize,
    execution_paths: Vec<String>,
    default_extensions: Vec<String>,
    base_resource_type: String,
    error_handler_resource_type: String,
}

impl ResolverSettings {
    pub fn new(
        cache_size: usize,
        execution_paths: Vec<String>,
        default_extensions: Vec<String>,
    ) -> Self {
        Self {
            cache_size,
            execution_paths,
            default_extensions,
            ..Self::default()
        }
    }

    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    /// 容量低于 [`MIN_CACHE_SIZE`] 视为关闭缓存。
    pub fn cache_enabled(&self) -> bool {
        self.cache_size >= MIN_CACHE_SIZE
    }

    pub fn execution_paths(&self) -> ExecutionPaths {
        ExecutionPaths::new(&self.execution_paths)
    }

    pub fn default_extensions(&self) -> &[String] {
        &self.default_extensions
    }

    /// 扩展名是否属于默认扩展名集合；缺失扩展名永远不是默认扩展名。
    pub fn is_default_extension(&self, extension: Option<&str>) -> bool {
        extension.is_some_and(|ext| self.default_extensions.iter().any(|d| d == ext))
    }

    pub fn base_resource_type(&self) -> &str {
        &self.base_resource_type
    }

    pub fn error_handler_resource_type(&self) -> &str {
        &self.error_handler_resource_type
    }

    pub fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }

    pub fn with_execution_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.execution_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_default_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_base_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.base_resource_type = resource_type.into();
        self
    }

    pub fn with_error_handler_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.error_handler_resource_type = resource_type.into();
        self
    }
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            cache_size: 200,
            execution_paths: vec!["/".to_owned()],
            default_extensions: vec!["html".to_owned()],
            base_resource_type: DEFAULT_RESOURCE_TYPE.to_owned(),
            error_handler_resource_type: DEFAULT_ERROR_HANDLER_RESOURCE_TYPE.to_owned(),
        }
    }
}

/// 允许执行脚本的路径白名单。
///
/// 以 `/` 结尾的条目放行整棵子树，其余条目要求精确匹配；
/// 白名单为空或包含 `/` 时放行一切。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ExecutionPaths {
    entries: Option<Vec<String>>,
}

impl ExecutionPaths {
    pub fn new(configured: &[String]) -> Self {
        let entries: Vec<String> = configured
            .iter()
            .map(|entry| entry.trim())
            .filter(|entry| !entry.is_empty())
            .map(str::to_owned)
            .collect();
        let unrestricted = entries.is_empty() || entries.iter().any(|entry| entry == "/");
        Self {
            entries: (!unrestricted).then_some(entries),
        }
    }

    /// 不做任何限制的白名单。
    pub const fn unrestricted() -> Self {
        Self { entries: None }
    }

    pub fn is_allowed(&self, path: &str) -> bool {
        let Some(entries) = &self.entries else {
            return true;
        };
        if path.is_empty() {
            return false;
        }
        entries.iter().any(|entry| {
            if entry.ends_with('/') {
                path.starts_with(entry.as_str())
            } else {
                path == entry
            }
        })
    }
}

/// 请求调度上限。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettings {
    max_inclusion_depth: usize,
    max_servlet_calls: usize,
}

impl EngineSettings {
    pub const fn new(max_inclusion_depth: usize, max_servlet_calls: usize) -> Self {
        Self {
            max_inclusion_depth,
            max_servlet_calls,
        }
    }

    /// include/forward 最大嵌套深度。
    pub const fn max_inclusion_depth(&self) -> usize {
        self.max_inclusion_depth
    }

    /// 单个请求允许的 Servlet 调用总次数。
    pub const fn max_servlet_calls(&self) -> usize {
        self.max_servlet_calls
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::new(50, 1000)
    }
}

/// 顶层配置。
///
/// ```rust
/// use arbor_core::config::ArborSettings;
///
/// let settings = ArborSettings::from_toml_str(
///     r#"
///     [resolver]
///     cache_size = 0
///     execution_paths = ["/apps/", "/libs/"]
///
///     [engine]
///     max_inclusion_depth = 8
///     "#,
/// )
/// .expect("合法配置");
/// assert!(!settings.resolver().cache_enabled());
/// assert_eq!(settings.engine().max_inclusion_depth(), 8);
/// assert_eq!(settings.engine().max_servlet_calls(), 1000);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArborSettings {
    resolver: ResolverSettings,
    engine: EngineSettings,
}

impl ArborSettings {
    pub fn new(resolver: ResolverSettings, engine: EngineSettings) -> Self {
        Self { resolver, engine }
    }

    pub fn resolver(&self) -> &ResolverSettings {
        &self.resolver
    }

    pub fn engine(&self) -> &EngineSettings {
        &self.engine
    }

    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&source)
    }
}

/// 配置加载错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file `{path}`")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

impl From<ConfigError> for CoreError {
    fn from(err: ConfigError) -> Self {
        let code = match &err {
            ConfigError::Io { .. } => codes::CONFIG_IO,
            ConfigError::Parse(_) => codes::CONFIG_INVALID,
        };
        CoreError::new(code, err.to_string()).with_cause(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = ResolverSettings::default();
        assert_eq!(settings.cache_size(), 200);
        assert!(settings.cache_enabled());
        assert!(settings.is_default_extension(Some("html")));
        assert!(!settings.is_default_extension(Some("json")));
        assert!(!settings.is_default_extension(None));
        assert_eq!(settings.base_resource_type(), DEFAULT_RESOURCE_TYPE);
    }

    #[test]
    fn small_cache_is_disabled() {
        let settings = ResolverSettings::default().with_cache_size(4);
        assert!(!settings.cache_enabled(), "容量小于 5 应禁用缓存");
    }

    #[test]
    fn execution_paths_prefix_and_exact() {
        let paths = ExecutionPaths::new(&["/apps/".to_owned(), "/libs/exact.esp".to_owned()]);
        assert!(paths.is_allowed("/apps/foo/bar.esp"));
        assert!(paths.is_allowed("/libs/exact.esp"));
        assert!(!paths.is_allowed("/libs/exact.esp/child"));
        assert!(!paths.is_allowed("/libs/other.esp"));
        assert!(!paths.is_allowed(""));
    }

    #[test]
    fn root_entry_allows_everything() {
        let paths = ExecutionPaths::new(&["/apps/".to_owned(), "/".to_owned()]);
        assert!(paths.is_allowed("/anything"));
        assert!(ExecutionPaths::new(&[]).is_allowed("/x"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = ArborSettings::from_toml_str("[resolver]\ncache = 3\n").expect_err("未知键应报错");
        let core: CoreError = err.into();
        assert_eq!(core.code(), codes::CONFIG_INVALID);
    }
}
