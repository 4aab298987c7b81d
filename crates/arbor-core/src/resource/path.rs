//! 仓库路径与资源类型标识的纯字符串工具。
//!
//! 所有函数只处理 `/` 分隔的绝对或相对路径，不访问仓库。

/// 判断路径是否以 `/` 开头。
pub fn is_absolute(path: &str) -> bool {
    path.starts_with('/')
}

/// 资源类型转为仓库相对路径：`app:component` 写法中的 `:` 视作层级分隔。
///
/// ```rust
/// use arbor_core::resource::path::resource_type_to_path;
///
/// assert_eq!(resource_type_to_path("app:component"), "app/component");
/// assert_eq!(resource_type_to_path("/apps/x"), "/apps/x");
/// ```
pub fn resource_type_to_path(resource_type: &str) -> String {
    resource_type.replace(':', "/")
}

/// 返回路径最后一段；根路径的名称为空串。
pub fn name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// 返回父路径；根路径及单段相对路径没有父路径。
pub fn parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&trimmed[..idx]),
        None => None,
    }
}

/// 把相对段拼接到基路径下，不做规范化。
pub fn join(base: &str, relative: &str) -> String {
    let relative = relative.trim_start_matches('/');
    if base.ends_with('/') {
        format!("{base}{relative}")
    } else {
        format!("{base}/{relative}")
    }
}

/// 规范化路径：折叠重复的 `/`，消解 `.` 与 `..`，去掉末尾 `/`。
///
/// 当 `..` 越过根节点时返回 `None`；相对路径保持相对。
pub fn normalize(path: &str) -> Option<String> {
    let absolute = is_absolute(path);
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }
    let joined = segments.join("/");
    Some(if absolute { format!("/{joined}") } else { joined })
}
