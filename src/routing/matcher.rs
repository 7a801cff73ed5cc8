//! Path matching logic.
//!
//! # Responsibilities
//! - Decide exact vs prefix semantics from a normalized path
//! - Test a request path against one registration
//!
//! # Design Decisions
//! - A trailing `/` makes a prefix matcher, anything else matches exactly
//! - Matching is case-sensitive and byte-wise
//! - No regex, no wildcards

/// Matches a request path against one handler registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathMatcher {
    /// Matches only the identical path.
    Exact(String),
    /// Matches every path starting with the prefix.
    Prefix(String),
}

impl PathMatcher {
    /// Build the matcher for an already normalized path.
    pub fn for_path(path: impl Into<String>) -> Self {
        let path = path.into();
        if path.ends_with('/') {
            Self::Prefix(path)
        } else {
            Self::Exact(path)
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::Exact(expected) => path == expected,
            Self::Prefix(prefix) => path.starts_with(prefix.as_str()),
        }
    }

    pub fn is_prefix(&self) -> bool {
        matches!(self, Self::Prefix(_))
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Exact(p) | Self::Prefix(p) => p,
        }
    }
}
