//! Request-side models.
//!
//! - [`RequestHead`]: the already-parsed request line and headers, as delivered by the
//!   Transport on header completion
//! - [`Request`]: the view middleware works with; owns the head, the accumulated body and a
//!   [`PropertyList`]

use std::collections::TryReserveError;
use std::sync::Arc;

use http::request::Parts;
use http::{HeaderMap, Method, Uri, Version};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::property::PropertyList;

/// Summary of the client certificate presented on a TLS connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerCertificate {
    pub subject: String,
    pub issuer: String,
    pub serial: String,
    pub fingerprint: String,
    pub not_before: String,
    pub not_after: String,
}

/// Parsed request line and headers.
///
/// This wraps a `http::Request<()>` so transports can build it with the usual `http` builder,
/// and carries the peer certificate when the connection is TLS.
#[derive(Debug)]
pub struct RequestHead {
    inner: http::Request<()>,
    peer_certificate: Option<PeerCertificate>,
}

impl RequestHead {
    /// Attaches the client certificate summary extracted by the Transport.
    #[must_use]
    pub fn with_peer_certificate(mut self, certificate: PeerCertificate) -> Self {
        self.peer_certificate = Some(certificate);
        self
    }

    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    pub fn path(&self) -> &str {
        self.inner.uri().path()
    }

    pub fn version(&self) -> Version {
        self.inner.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    pub fn peer_certificate(&self) -> Option<&PeerCertificate> {
        self.peer_certificate.as_ref()
    }
}

impl From<Parts> for RequestHead {
    #[inline]
    fn from(parts: Parts) -> Self {
        Self { inner: http::Request::from_parts(parts, ()), peer_certificate: None }
    }
}

impl From<http::Request<()>> for RequestHead {
    #[inline]
    fn from(inner: http::Request<()>) -> Self {
        Self { inner, peer_certificate: None }
    }
}

/// One incoming request as seen by middleware.
///
/// The body buffer only ever grows while chunks arrive. It stays empty when an upload handler
/// consumed the chunks instead.
#[derive(Debug)]
pub struct Request {
    head: RequestHead,
    query: Vec<(String, String)>,
    body: Vec<u8>,
    properties: PropertyList,
    middleware_path: Option<Arc<str>>,
    peer_certificate: Option<PeerCertificate>,
}

impl Request {
    pub(crate) fn new(head: RequestHead) -> Self {
        let query = head.uri().query().map(decode_query).unwrap_or_default();
        Self {
            head,
            query,
            body: Vec::new(),
            properties: PropertyList::new(),
            middleware_path: None,
            peer_certificate: None,
        }
    }

    pub fn head(&self) -> &RequestHead {
        &self.head
    }

    pub fn method(&self) -> &Method {
        self.head.method()
    }

    pub fn uri(&self) -> &Uri {
        self.head.uri()
    }

    pub fn path(&self) -> &str {
        self.head.path()
    }

    pub fn version(&self) -> Version {
        self.head.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.head.headers()
    }

    /// Returns the value of header `name` if present and valid visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.headers().get(name).and_then(|value| value.to_str().ok())
    }

    /// The raw query string, without the leading `?`.
    pub fn query(&self) -> Option<&str> {
        self.head.uri().query()
    }

    /// The first decoded value of query parameter `name`.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.iter().find(|(key, _)| key == name).map(|(_, value)| value.as_str())
    }

    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn properties(&self) -> &PropertyList {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut PropertyList {
        &mut self.properties
    }

    /// Pattern of the entry currently handling this request, `None` for catch-all entries.
    pub fn middleware_path(&self) -> Option<&str> {
        self.middleware_path.as_deref()
    }

    /// The client certificate, when TLS info parsing is enabled and one was presented.
    pub fn peer_certificate(&self) -> Option<&PeerCertificate> {
        self.peer_certificate.as_ref()
    }

    pub(crate) fn append_body(&mut self, chunk: &[u8]) -> Result<(), TryReserveError> {
        self.body.try_reserve(chunk.len())?;
        self.body.extend_from_slice(chunk);
        Ok(())
    }

    pub(crate) fn set_middleware_path(&mut self, path: Option<Arc<str>>) {
        self.middleware_path = path;
    }

    pub(crate) fn attach_peer_certificate(&mut self) {
        self.peer_certificate = self.head.peer_certificate().cloned();
    }
}

fn decode_query(query: &str) -> Vec<(String, String)> {
    serde_urlencoded::from_str::<Vec<(String, String)>>(query).unwrap_or_else(|e| {
        warn!(cause = %e, query, "can't decode query string");
        Vec::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn request(uri: &str) -> Request {
        let head: RequestHead = http::Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header(http::header::HOST, "127.0.0.1:8080")
            .body(())
            .unwrap()
            .into();
        Request::new(head)
    }

    #[test]
    fn exposes_head() {
        let req = request("/index.html?a=1&b=two%20words&a=3");

        assert_eq!(req.method(), &Method::GET);
        assert_eq!(req.path(), "/index.html");
        assert_eq!(req.version(), Version::HTTP_11);
        assert_eq!(req.query(), Some("a=1&b=two%20words&a=3"));
        assert_eq!(req.headers().get(http::header::HOST), Some(&HeaderValue::from_static("127.0.0.1:8080")));
        assert_eq!(req.header("host"), Some("127.0.0.1:8080"));
        assert_eq!(req.header("accept"), None);
    }

    #[test]
    fn decodes_query_pairs() {
        let req = request("/search?a=1&b=two%20words&a=3");

        assert_eq!(req.query_param("a"), Some("1"));
        assert_eq!(req.query_param("b"), Some("two words"));
        assert_eq!(req.query_param("c"), None);
        assert_eq!(req.query_pairs().len(), 3);
    }

    #[test]
    fn body_only_grows() {
        let mut req = request("/upload");
        assert!(req.body().is_empty());

        req.append_body(b"hello ").unwrap();
        req.append_body(b"").unwrap();
        req.append_body(b"world").unwrap();
        assert_eq!(req.body(), b"hello world");
    }

    #[test]
    fn peer_certificate_is_attached_on_demand() {
        let certificate = PeerCertificate { subject: "CN=client".into(), ..PeerCertificate::default() };
        let head = RequestHead::from(http::Request::new(())).with_peer_certificate(certificate.clone());
        let mut req = Request::new(head);

        assert!(req.peer_certificate().is_none());
        req.attach_peer_certificate();
        assert_eq!(req.peer_certificate(), Some(&certificate));
    }
}
