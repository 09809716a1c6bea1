//! Route entries and the match rule.
//!
//! An entry matches a request when
//! - its method filter is [`MethodFilter::Any`] or names the request method, and
//! - it has no pattern, or the path equals the pattern, or the path starts with the pattern
//!   and the entry carries [`RouteFlags::PREFIX`].
//!
//! Matching is case-sensitive. There is no wildcard or parameter grammar.

use std::fmt;
use std::sync::Arc;

use http::Method;

use super::{MethodFilter, RouteFlags};

/// An immutable entry of a route table, generic over the kind of handler it holds.
pub struct Route<H: ?Sized> {
    pattern: Option<Arc<str>>,
    method: MethodFilter,
    flags: RouteFlags,
    handler: Arc<H>,
}

impl<H: ?Sized> Route<H> {
    /// An empty `pattern` is the same as no pattern: the entry matches every path.
    pub fn new(pattern: &str, method: MethodFilter, flags: RouteFlags, handler: Arc<H>) -> Self {
        let pattern = (!pattern.is_empty()).then(|| Arc::from(pattern));
        Self { pattern, method, flags, handler }
    }

    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_deref()
    }

    pub(crate) fn shared_pattern(&self) -> Option<Arc<str>> {
        self.pattern.clone()
    }

    pub fn method(&self) -> MethodFilter {
        self.method
    }

    pub fn flags(&self) -> RouteFlags {
        self.flags
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn matches(&self, method: &Method, path: &str) -> bool {
        self.method.accepts(method) && self.matches_path(path)
    }

    pub fn matches_path(&self, path: &str) -> bool {
        match self.pattern.as_deref() {
            None => true,
            Some(pattern) if self.flags.contains(RouteFlags::PREFIX) => path.starts_with(pattern),
            Some(pattern) => path == pattern,
        }
    }
}

impl<H: ?Sized> Clone for Route<H> {
    fn clone(&self) -> Self {
        Self {
            pattern: self.pattern.clone(),
            method: self.method,
            flags: self.flags,
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<H: ?Sized> fmt::Debug for Route<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("pattern", &self.pattern)
            .field("method", &self.method)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}
