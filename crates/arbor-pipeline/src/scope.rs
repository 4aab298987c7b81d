use std::fmt;
use std::str::FromStr;

use crate::filter::FilterConfigError;

/// 过滤器参与的调度阶段。
///
/// `Component` 是组合作用域：登记到 `Component` 的过滤器同时出现在 `Include` 与 `Forward` 链上。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FilterScope {
    Request,
    Error,
    Include,
    Forward,
    Component,
}

impl FilterScope {
    pub const ALL: [FilterScope; 5] = [
        FilterScope::Request,
        FilterScope::Error,
        FilterScope::Include,
        FilterScope::Forward,
        FilterScope::Component,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            FilterScope::Request => "REQUEST",
            FilterScope::Error => "ERROR",
            FilterScope::Include => "INCLUDE",
            FilterScope::Forward => "FORWARD",
            FilterScope::Component => "COMPONENT",
        }
    }

    /// 登记时实际写入的作用域。
    pub fn expand(self) -> &'static [FilterScope] {
        match self {
            FilterScope::Request => &[FilterScope::Request],
            FilterScope::Error => &[FilterScope::Error],
            FilterScope::Include => &[FilterScope::Include],
            FilterScope::Forward => &[FilterScope::Forward],
            FilterScope::Component => &[
                FilterScope::Component,
                FilterScope::Include,
                FilterScope::Forward,
            ],
        }
    }

    pub(crate) const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for FilterScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterScope {
    type Err = FilterConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        FilterScope::ALL
            .into_iter()
            .find(|scope| scope.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| FilterConfigError::UnknownScope(trimmed.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("component".parse::<FilterScope>().ok(), Some(FilterScope::Component));
        assert_eq!(" Include ".parse::<FilterScope>().ok(), Some(FilterScope::Include));
        assert!(matches!(
            "bogus".parse::<FilterScope>(),
            Err(FilterConfigError::UnknownScope(name)) if name == "bogus"
        ));
    }

    #[test]
    fn component_fans_out() {
        assert_eq!(
            FilterScope::Component.expand(),
            &[FilterScope::Component, FilterScope::Include, FilterScope::Forward]
        );
        assert_eq!(FilterScope::Error.expand(), &[FilterScope::Error]);
    }

    #[test]
    fn index_matches_all_order() {
        for (position, scope) in FilterScope::ALL.into_iter().enumerate() {
            assert_eq!(scope.index(), position);
        }
    }
}
