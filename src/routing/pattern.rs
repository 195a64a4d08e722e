//! Path patterns
//!
//! A pattern is a sequence of literal segments and `:name` parameters.
//! Leading, trailing and repeated `/` are ignored on both patterns and paths.

use std::collections::{HashMap, HashSet};
use std::fmt;

use super::errors::{RouteError, RouteResult};

/// Captured path parameters
pub type Params = HashMap<String, String>;

/// Splits a concrete path into its non-empty segments.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Literal(String),
    Param(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(raw: &str) -> RouteResult<Self> {
        let invalid = |reason: &str| RouteError::InvalidPattern {
            pattern: raw.to_string(),
            reason: reason.to_string(),
        };

        let mut names = HashSet::new();
        let mut segments = Vec::new();
        for part in split_path(raw) {
            if let Some(name) = part.strip_prefix(':') {
                if name.is_empty() {
                    return Err(invalid("parameter without a name"));
                }
                if !names.insert(name) {
                    return Err(invalid("parameter name used twice"));
                }
                segments.push(Segment::Param(name.to_string()));
            } else if part.contains('*') {
                return Err(invalid("wildcards are only allowed in catch scopes"));
            } else {
                segments.push(Segment::Literal(part.to_string()));
            }
        }

        Ok(Self {
            raw: format!("/{}", split_path(raw).join("/")),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn literal_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count()
    }

    /// Matches a split path, capturing parameters.
    pub fn matches(&self, segments: &[&str]) -> Option<Params> {
        if segments.len() != self.segments.len() {
            return None;
        }
        self.match_prefix(segments)
    }

    /// Matches the leading segments of a split path.
    pub fn match_prefix(&self, segments: &[&str]) -> Option<Params> {
        if segments.len() < self.segments.len() {
            return None;
        }

        let mut params = Params::new();
        for (pattern, actual) in self.segments.iter().zip(segments) {
            match pattern {
                Segment::Literal(lit) if lit == actual => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), (*actual).to_string());
                }
            }
        }
        Some(params)
    }

    /// Whether some concrete path matches both patterns.
    pub fn overlaps(&self, other: &PathPattern) -> bool {
        self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|pair| match pair {
                    (Segment::Literal(a), Segment::Literal(b)) => a == b,
                    _ => true,
                })
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Path part of a catch-handler scope
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CatchScope {
    /// Same path set as a route pattern
    Exact(PathPattern),
    /// `prefix/*`: every path below the prefix, and the prefix itself
    Prefix(PathPattern),
}

impl CatchScope {
    pub fn parse(raw: &str) -> RouteResult<Self> {
        let trimmed = raw.trim_end_matches('/');
        if trimmed == "*" {
            return Ok(CatchScope::Prefix(PathPattern::parse("/")?));
        }
        match trimmed.strip_suffix("/*") {
            Some(prefix) => PathPattern::parse(prefix).map(CatchScope::Prefix),
            None => PathPattern::parse(raw).map(CatchScope::Exact),
        }
    }

    pub fn covers(&self, segments: &[&str]) -> bool {
        match self {
            CatchScope::Exact(pattern) => pattern.matches(segments).is_some(),
            CatchScope::Prefix(pattern) => pattern.match_prefix(segments).is_some(),
        }
    }

    /// Ranking key among covering scopes: exact first, then the longest
    /// prefix, then the most literal.
    pub(crate) fn rank(&self) -> (bool, usize, usize) {
        match self {
            CatchScope::Exact(pattern) => (true, pattern.segments().len(), pattern.literal_count()),
            CatchScope::Prefix(pattern) => (false, pattern.segments().len(), pattern.literal_count()),
        }
    }
}

impl fmt::Display for CatchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatchScope::Exact(pattern) => write!(f, "{}", pattern),
            CatchScope::Prefix(pattern) if pattern.segments().is_empty() => f.write_str("/*"),
            CatchScope::Prefix(pattern) => write!(f, "{}/*", pattern),
        }
    }
}
