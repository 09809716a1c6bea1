//! Ordered route tables for middleware and upload handlers.
//!
//! Entries are appended during setup and never change afterwards. Both tables are scanned in
//! registration order.

mod matcher;

pub use matcher::Route;

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;

use http::Method;

use crate::handler::{Middleware, UploadHandler};

/// Match flags of a route entry.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RouteFlags(u32);

impl RouteFlags {
    pub const NONE: RouteFlags = RouteFlags(0);
    /// Match every path starting with the pattern instead of the exact path.
    pub const PREFIX: RouteFlags = RouteFlags(1);

    #[inline]
    pub fn contains(self, other: RouteFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for RouteFlags {
    type Output = RouteFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        RouteFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for RouteFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for RouteFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.contains(RouteFlags::PREFIX) { f.write_str("PREFIX") } else { f.write_str("NONE") }
    }
}

/// Request methods a route can be restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Put,
    Post,
    Head,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
    Mkcol,
    Copy,
    Move,
    Propfind,
    Proppatch,
    Lock,
    Unlock,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
            HttpMethod::Post => "POST",
            HttpMethod::Head => "HEAD",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Connect => "CONNECT",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Trace => "TRACE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Mkcol => "MKCOL",
            HttpMethod::Copy => "COPY",
            HttpMethod::Move => "MOVE",
            HttpMethod::Propfind => "PROPFIND",
            HttpMethod::Proppatch => "PROPPATCH",
            HttpMethod::Lock => "LOCK",
            HttpMethod::Unlock => "UNLOCK",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The method part of a route entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MethodFilter {
    #[default]
    Any,
    Only(HttpMethod),
}

impl MethodFilter {
    #[inline]
    pub fn accepts(self, method: &Method) -> bool {
        match self {
            MethodFilter::Any => true,
            MethodFilter::Only(expected) => method.as_str() == expected.as_str(),
        }
    }
}

impl From<HttpMethod> for MethodFilter {
    fn from(method: HttpMethod) -> Self {
        MethodFilter::Only(method)
    }
}

/// The two ordered tables a request is dispatched against.
#[derive(Clone, Default)]
pub struct RouteTable {
    middleware: Vec<Route<dyn Middleware>>,
    uploads: Vec<Route<dyn UploadHandler>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_middleware(&mut self, route: Route<dyn Middleware>) {
        self.middleware.push(route);
    }

    pub fn add_upload(&mut self, route: Route<dyn UploadHandler>) {
        self.uploads.push(route);
    }

    pub fn middleware(&self) -> &[Route<dyn Middleware>] {
        &self.middleware
    }

    pub fn uploads(&self) -> &[Route<dyn UploadHandler>] {
        &self.uploads
    }

    /// The first upload entry matching the request, if any.
    pub fn find_upload(&self, method: &Method, path: &str) -> Option<&Route<dyn UploadHandler>> {
        self.uploads.iter().find(|route| route.matches(method, path))
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteTable").field("middleware", &self.middleware).field("uploads", &self.uploads).finish()
    }
}

pub(crate) fn middleware_route<M: Middleware + 'static>(
    pattern: &str,
    method: MethodFilter,
    flags: RouteFlags,
    middleware: M,
) -> Route<dyn Middleware> {
    let handler: Arc<dyn Middleware> = Arc::new(middleware);
    Route::new(pattern, method, flags, handler)
}

pub(crate) fn upload_route<U: UploadHandler + 'static>(
    pattern: &str,
    method: MethodFilter,
    flags: RouteFlags,
    upload: U,
) -> Route<dyn UploadHandler> {
    let handler: Arc<dyn UploadHandler> = Arc::new(upload);
    Route::new(pattern, method, flags, handler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{middleware_fn, upload_fn};

    #[test]
    fn flags_compose() {
        let mut flags = RouteFlags::NONE;
        assert!(!flags.contains(RouteFlags::PREFIX));
        assert!(flags.contains(RouteFlags::NONE));

        flags |= RouteFlags::PREFIX;
        assert!(flags.contains(RouteFlags::PREFIX));
        assert_eq!((RouteFlags::NONE | RouteFlags::PREFIX).bits(), 1);
    }

    #[test]
    fn method_filter_compares_names() {
        assert!(MethodFilter::Any.accepts(&Method::OPTIONS));
        assert!(MethodFilter::from(HttpMethod::Head).accepts(&Method::HEAD));
        assert!(!MethodFilter::from(HttpMethod::Head).accepts(&Method::GET));
        assert!(MethodFilter::Only(HttpMethod::Mkcol).accepts(&Method::from_bytes(b"MKCOL").unwrap()));
    }

    #[test]
    fn tables_keep_registration_order() {
        let mut table = RouteTable::new();
        table.add_middleware(middleware_route("/b", MethodFilter::Any, RouteFlags::NONE, middleware_fn(|_, _, _| {})));
        table.add_middleware(middleware_route("/a", MethodFilter::Any, RouteFlags::NONE, middleware_fn(|_, _, _| {})));
        table.add_middleware(middleware_route("", MethodFilter::Any, RouteFlags::NONE, middleware_fn(|_, _, _| {})));

        let patterns: Vec<_> = table.middleware().iter().map(Route::pattern).collect();
        assert_eq!(patterns, vec![Some("/b"), Some("/a"), None]);
    }

    #[test]
    fn first_matching_upload_wins() {
        let mut table = RouteTable::new();
        table.add_upload(upload_route("/files", HttpMethod::Post.into(), RouteFlags::PREFIX, upload_fn(|_, _| {})));
        table.add_upload(upload_route("/files/big", HttpMethod::Post.into(), RouteFlags::NONE, upload_fn(|_, _| {})));

        let found = table.find_upload(&Method::POST, "/files/big").map(Route::pattern);
        assert_eq!(found, Some(Some("/files")));
        assert!(table.find_upload(&Method::PUT, "/files/big").is_none());
        assert!(table.find_upload(&Method::POST, "/other").is_none());
    }
}
