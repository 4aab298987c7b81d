//! 请求路径分解：资源路径、选择器、扩展名与后缀。
//!
//! # 教案式说明
//! - **What**：`/content/page.print.a4.html/extra/x` 分解为资源路径 `/content/page`、
//!   选择器 `[print, a4]`、扩展名 `html`、后缀 `/extra/x`。
//! - **How**：资源路径之后的剩余部分先在第一个 `/` 处切出后缀；其余“点段”以最后一个 `.` 切出扩展名，
//!   第一个与最后一个 `.` 之间的内容按 `.` 拆成选择器。
//! - **契约**：纯函数，无 I/O；唯一例外是 [`RequestPathInfo::resolve`]，它通过访问器探测候选资源路径。
//!   分解结果可在调度器替换目标资源后重新推导（[`RequestPathInfo::for_include`]、[`RequestPathInfo::merge`]）。

use crate::resource::{ResourceAccessor, ResourceRef, path};

/// 一次请求（或一次 include/forward）面对的路径分解结果。
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct RequestPathInfo {
    resource_path: String,
    selector_string: Option<String>,
    selectors: Vec<String>,
    extension: Option<String>,
    suffix: Option<String>,
}

impl RequestPathInfo {
    /// 以已知资源路径与“解析剩余部分”构造。
    ///
    /// `resolution_path_info` 通常以 `.` 或 `/` 开头，例如 `.a.b.html/suffix`。
    pub fn new(resource_path: impl Into<String>, resolution_path_info: &str) -> Self {
        let (dotted, suffix) = match resolution_path_info.find('/') {
            Some(slash) => (
                &resolution_path_info[..slash],
                Some(&resolution_path_info[slash..]),
            ),
            None => (resolution_path_info, None),
        };

        let (selector_string, extension) = match dotted.rfind('.') {
            None => (None, None),
            Some(last_dot) => {
                // 选择器位于前导点与最后一个点之间；只有一个点时为空。
                let body = dotted.strip_prefix('.').unwrap_or(dotted);
                let selector_string = body
                    .rfind('.')
                    .map(|dot| &body[..dot])
                    .filter(|selectors| !selectors.is_empty());
                let extension = &dotted[last_dot + 1..];
                (selector_string, (!extension.is_empty()).then_some(extension))
            }
        };

        let selectors = split_selectors(selector_string);
        Self {
            resource_path: resource_path.into(),
            selector_string: join_selectors(&selectors),
            selectors,
            extension: extension.map(str::to_owned),
            suffix: suffix.filter(|s| !s.is_empty()).map(str::to_owned),
        }
    }

    /// 不访问仓库的分解：资源路径止于路径中的第一个 `.`。
    ///
    /// ```rust
    /// use arbor_core::path_info::RequestPathInfo;
    ///
    /// let info = RequestPathInfo::parse("/content/page.print.a4.html/extra/x");
    /// assert_eq!(info.resource_path(), "/content/page");
    /// assert_eq!(info.selectors(), ["print", "a4"]);
    /// assert_eq!(info.extension(), Some("html"));
    /// assert_eq!(info.suffix(), Some("/extra/x"));
    /// ```
    pub fn parse(raw_path: &str) -> Self {
        match raw_path.find('.') {
            Some(dot) => Self::new(&raw_path[..dot], &raw_path[dot..]),
            None => Self::new(raw_path, ""),
        }
    }

    /// 借助仓库分解：依次探测 [`ResourcePathIterator`] 给出的候选路径，
    /// 以第一个存在的资源为边界；全部不存在时退化为 [`parse`](Self::parse) 并返回 `None`。
    pub fn resolve(raw_path: &str, accessor: &dyn ResourceAccessor) -> (Option<ResourceRef>, Self) {
        let normalized = normalize_request_path(raw_path);
        for candidate in ResourcePathIterator::new(&normalized) {
            if let Some(resource) = accessor.get_resource(candidate) {
                let remainder = &normalized[candidate.len()..];
                let info = Self::new(resource.path(), remainder);
                return (Some(resource), info);
            }
        }
        (None, Self::parse(&normalized))
    }

    /// 调度器替换目标资源后重新推导：`include_path` 以资源路径为前缀时，剩余部分重新分解。
    ///
    /// 前缀必须止于路径段或点段边界；`/content/teaserX.a.html` 与 `/content/teaser` 无关。
    pub fn for_include(resource_path: &str, include_path: &str) -> Self {
        let remainder = include_path
            .strip_prefix(resource_path)
            .filter(|rest| rest.is_empty() || rest.starts_with(['.', '/']))
            .unwrap_or("");
        Self::new(resource_path, remainder)
    }

    /// 应用调度选项，返回新的分解结果。
    pub fn merge(&self, options: &DispatchOptions) -> Self {
        let mut merged = self.clone();
        if let Some(replace) = options.replace_selectors.as_deref() {
            merged.selectors = split_selectors(Some(replace));
        }
        if let Some(add) = options.add_selectors.as_deref() {
            merged.selectors.extend(split_selectors(Some(add)));
        }
        merged.selector_string = join_selectors(&merged.selectors);
        if let Some(suffix) = options.replace_suffix.as_deref() {
            merged.suffix = (!suffix.is_empty()).then(|| suffix.to_owned());
        }
        merged
    }

    pub fn resource_path(&self) -> &str {
        &self.resource_path
    }

    pub fn selector_string(&self) -> Option<&str> {
        self.selector_string.as_deref()
    }

    pub fn selectors(&self) -> &[String] {
        &self.selectors
    }

    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    pub fn suffix(&self) -> Option<&str> {
        self.suffix.as_deref()
    }
}

/// include/forward 时对路径分解的调整。
///
/// `replace_selectors` 为空串表示清空选择器；`force_resource_type` 只影响 Servlet 解析。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchOptions {
    pub replace_selectors: Option<String>,
    pub add_selectors: Option<String>,
    pub replace_suffix: Option<String>,
    pub force_resource_type: Option<String>,
}

impl DispatchOptions {
    pub fn replace_selectors(mut self, selectors: impl Into<String>) -> Self {
        self.replace_selectors = Some(selectors.into());
        self
    }

    pub fn add_selectors(mut self, selectors: impl Into<String>) -> Self {
        self.add_selectors = Some(selectors.into());
        self
    }

    pub fn replace_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.replace_suffix = Some(suffix.into());
        self
    }

    pub fn force_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.force_resource_type = Some(resource_type.into());
        self
    }
}

/// 资源路径探测序列：先给出完整路径，再依次在最后一个 `.` 处截断。
///
/// `/a/b.c.html/s` 依次产出 `/a/b.c.html/s`、`/a/b.c`、`/a/b`。
#[derive(Clone, Debug)]
pub struct ResourcePathIterator<'a> {
    next: Option<&'a str>,
}

impl<'a> ResourcePathIterator<'a> {
    pub fn new(path: &'a str) -> Self {
        let trimmed = path.trim_end_matches('/');
        let start = if trimmed.is_empty() && !path.is_empty() {
            "/"
        } else {
            trimmed
        };
        Self {
            next: (!start.is_empty()).then_some(start),
        }
    }
}

impl<'a> Iterator for ResourcePathIterator<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current
            .rfind('.')
            .map(|dot| &current[..dot])
            .filter(|candidate| !candidate.is_empty() && *candidate != "/");
        Some(current)
    }
}

fn normalize_request_path(raw_path: &str) -> String {
    let collapsed = path::normalize(raw_path).unwrap_or_else(|| "/".to_owned());
    if path::is_absolute(&collapsed) {
        collapsed
    } else {
        format!("/{collapsed}")
    }
}

fn split_selectors(selector_string: Option<&str>) -> Vec<String> {
    selector_string
        .map(|s| {
            s.split('.')
                .filter(|token| !token.is_empty())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

fn join_selectors(selectors: &[String]) -> Option<String> {
    (!selectors.is_empty()).then(|| selectors.join("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_dot_has_no_selectors() {
        let info = RequestPathInfo::new("/content/page", ".html");
        assert!(info.selectors().is_empty());
        assert_eq!(info.selector_string(), None);
        assert_eq!(info.extension(), Some("html"));
        assert_eq!(info.suffix(), None);
    }

    #[test]
    fn trailing_dot_yields_no_extension() {
        let info = RequestPathInfo::new("/content/page", ".a.");
        assert_eq!(info.selectors(), ["a"]);
        assert_eq!(info.extension(), None, "末尾的点不构成扩展名");
    }

    #[test]
    fn suffix_without_extension() {
        let info = RequestPathInfo::new("/content/page", "/tail/x.y");
        assert!(info.selectors().is_empty());
        assert_eq!(info.extension(), None);
        assert_eq!(info.suffix(), Some("/tail/x.y"), "后缀中的点不参与分解");
    }

    #[test]
    fn bare_resource_path() {
        let info = RequestPathInfo::parse("/content/page");
        assert_eq!(info.resource_path(), "/content/page");
        assert!(info.selectors().is_empty());
        assert_eq!(info.extension(), None);
        assert_eq!(info.suffix(), None);
    }

    #[test]
    fn path_iterator_cuts_at_last_dot() {
        let seen: Vec<_> = ResourcePathIterator::new("/a/b.c.html/s").collect();
        assert_eq!(seen, vec!["/a/b.c.html/s", "/a/b.c", "/a/b"]);
    }

    #[test]
    fn path_iterator_handles_root_and_empty() {
        assert_eq!(ResourcePathIterator::new("/").collect::<Vec<_>>(), vec!["/"]);
        assert_eq!(ResourcePathIterator::new("").count(), 0);
        assert_eq!(
            ResourcePathIterator::new("/.html").collect::<Vec<_>>(),
            vec!["/.html"]
        );
    }

    #[test]
    fn merge_replaces_and_adds_selectors() {
        let base = RequestPathInfo::new("/content/page", ".a.b.html/s");
        let replaced = base.merge(&DispatchOptions::default().replace_selectors("x"));
        assert_eq!(replaced.selectors(), ["x"]);
        let added = base.merge(&DispatchOptions::default().add_selectors("c.d"));
        assert_eq!(added.selector_string(), Some("a.b.c.d"));
        let cleared = base.merge(
            &DispatchOptions::default()
                .replace_selectors("")
                .replace_suffix(""),
        );
        assert!(cleared.selectors().is_empty());
        assert_eq!(cleared.suffix(), None);
        assert_eq!(cleared.extension(), Some("html"), "扩展名不受选项影响");
    }

    #[test]
    fn for_include_rederives_against_new_resource() {
        let info = RequestPathInfo::for_include("/content/teaser", "/content/teaser.small.html");
        assert_eq!(info.resource_path(), "/content/teaser");
        assert_eq!(info.selectors(), ["small"]);
        assert_eq!(info.extension(), Some("html"));

        let unrelated = RequestPathInfo::for_include("/content/teaser", "/other.html");
        assert_eq!(unrelated.extension(), None);
    }

    #[test]
    fn for_include_requires_a_segment_boundary() {
        let sibling = RequestPathInfo::for_include("/content/teaser", "/content/teaserX.a.html");
        assert!(sibling.selectors().is_empty(), "同名前缀的兄弟路径不能借用选择器");
        assert_eq!(sibling.extension(), None);

        let accented = RequestPathInfo::for_include("/content/teaser", "/content/teaseré.x.html");
        assert_eq!(accented.resource_path(), "/content/teaser");
        assert!(accented.selectors().is_empty());
        assert_eq!(accented.extension(), None);

        let suffixed = RequestPathInfo::for_include("/content/teaser", "/content/teaser/tail");
        assert_eq!(suffixed.suffix(), Some("/tail"));
    }

    #[test]
    fn remainder_without_leading_dot_keeps_char_boundaries() {
        let info = RequestPathInfo::new("/content/page", "é.x.html");
        assert_eq!(info.selectors(), ["é", "x"]);
        assert_eq!(info.extension(), Some("html"));

        let multibyte = RequestPathInfo::new("/content/page", ".ü.ß.html/ä");
        assert_eq!(multibyte.selectors(), ["ü", "ß"]);
        assert_eq!(multibyte.extension(), Some("html"));
        assert_eq!(multibyte.suffix(), Some("/ä"));
    }
}
