use std::fmt;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::ResponseError;
use crate::mime_types::MimeTypes;
use crate::property::PropertyList;
use crate::transport::Reply;

/// Content coding the Transport should apply to the response body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Deflate,
}

impl Compression {
    /// Picks a coding from an `Accept-Encoding` value, preferring gzip over deflate.
    ///
    /// Codings listed with `q=0` are refused.
    pub fn negotiate(accept_encoding: &str) -> Self {
        let mut gzip = false;
        let mut deflate = false;

        for item in accept_encoding.split(',') {
            let mut parts = item.split(';');
            let coding = parts.next().unwrap_or_default().trim();
            let refused = parts.any(|param| {
                param.trim().strip_prefix("q=").is_some_and(|q| q.trim().parse::<f32>().is_ok_and(|q| q <= 0.0))
            });
            if refused {
                continue;
            }

            if coding.eq_ignore_ascii_case("gzip") || coding.eq_ignore_ascii_case("x-gzip") {
                gzip = true;
            } else if coding.eq_ignore_ascii_case("deflate") {
                deflate = true;
            }
        }

        match (gzip, deflate) {
            (true, _) => Compression::Gzip,
            (false, true) => Compression::Deflate,
            (false, false) => Compression::None,
        }
    }

    pub fn content_coding(self) -> Option<&'static str> {
        match self {
            Compression::None => None,
            Compression::Gzip => Some("gzip"),
            Compression::Deflate => Some("deflate"),
        }
    }
}

/// The outbound half of one exchange.
///
/// Status, headers and properties can be changed freely until [`end`](Response::end) or
/// [`end_with`](Response::end_with) hands the response to the Transport. After that every
/// write fails with [`ResponseError::AlreadyFinalized`].
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    properties: PropertyList,
    compression: Compression,
    reply: Box<dyn Reply>,
    finalized: bool,
    mime_types: &'static MimeTypes,
}

impl Response {
    pub(crate) fn new(reply: Box<dyn Reply>, mime_types: &'static MimeTypes) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            properties: PropertyList::new(),
            compression: Compression::None,
            reply,
            finalized: false,
            mime_types,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable access to the headers, `None` once the response is finalized.
    pub fn headers_mut(&mut self) -> Option<&mut HeaderMap> {
        (!self.finalized).then_some(&mut self.headers)
    }

    /// Inserts a header, replacing any previous values of the same name.
    pub fn set_header<K, V>(&mut self, name: K, value: V) -> Result<(), ResponseError>
    where
        K: TryInto<HeaderName>,
        K::Error: fmt::Display,
        V: TryInto<HeaderValue>,
        V::Error: fmt::Display,
    {
        if self.finalized {
            return Err(ResponseError::AlreadyFinalized);
        }

        let name = name.try_into().map_err(ResponseError::invalid_header)?;
        let value = value.try_into().map_err(ResponseError::invalid_header)?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Sets `Content-Type` from the extension of `path`.
    ///
    /// Returns `false` when the extension is unknown or the response is already finalized.
    pub fn set_content_type_for(&mut self, path: &str) -> bool {
        if self.finalized {
            return false;
        }

        let Some(mime) = self.mime_types.for_path(path) else {
            return false;
        };

        match HeaderValue::from_str(mime.as_ref()) {
            Ok(value) => {
                self.headers.insert(CONTENT_TYPE, value);
                true
            }
            Err(_) => false,
        }
    }

    pub fn properties(&self) -> &PropertyList {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut PropertyList {
        &mut self.properties
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn set_compression(&mut self, compression: Compression) -> Result<(), ResponseError> {
        if self.finalized {
            return Err(ResponseError::AlreadyFinalized);
        }
        self.compression = compression;
        Ok(())
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Finalizes the response without a body.
    pub fn end(&mut self, status: StatusCode) -> Result<(), ResponseError> {
        self.finish(status, None)
    }

    /// Finalizes the response with `body`.
    pub fn end_with(&mut self, status: StatusCode, body: impl Into<Bytes>) -> Result<(), ResponseError> {
        self.finish(status, Some(body.into()))
    }

    fn finish(&mut self, status: StatusCode, body: Option<Bytes>) -> Result<(), ResponseError> {
        if self.finalized {
            return Err(ResponseError::AlreadyFinalized);
        }

        // a failed send still consumes the only reply
        self.finalized = true;
        self.status = status;
        trace!(status = status.as_u16(), compression = ?self.compression, "sending reply");
        self.reply.send_reply(status, &self.headers, body, self.compression)?;
        Ok(())
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("properties", &self.properties)
            .field("compression", &self.compression)
            .field("finalized", &self.finalized)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::process;
    use crate::transport::{LoopbackTransport, MockReply};
    use mockall::predicate::{always, eq};

    fn response(reply: MockReply) -> Response {
        Response::new(Box::new(reply), process::bootstrap::<LoopbackTransport>().mime_types())
    }

    #[test]
    fn negotiate_prefers_gzip() {
        assert_eq!(Compression::negotiate("gzip, deflate, br"), Compression::Gzip);
        assert_eq!(Compression::negotiate("deflate, gzip"), Compression::Gzip);
        assert_eq!(Compression::negotiate("deflate"), Compression::Deflate);
        assert_eq!(Compression::negotiate("br"), Compression::None);
        assert_eq!(Compression::negotiate(""), Compression::None);
    }

    #[test]
    fn negotiate_skips_refused_codings() {
        assert_eq!(Compression::negotiate("gzip;q=0, deflate;q=0.5"), Compression::Deflate);
        assert_eq!(Compression::negotiate("GZIP; q=0.8"), Compression::Gzip);
        assert_eq!(Compression::negotiate("gzip;q=0.0, deflate;q=0"), Compression::None);
    }

    #[test]
    fn end_sends_exactly_once() {
        let mut reply = MockReply::new();
        reply
            .expect_send_reply()
            .with(eq(StatusCode::CREATED), always(), eq(Some(Bytes::from_static(b"done"))), eq(Compression::Gzip))
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let mut res = response(reply);
        res.set_compression(Compression::Gzip).unwrap();
        res.end_with(StatusCode::CREATED, "done").unwrap();

        assert!(res.is_finalized());
        assert_eq!(res.status(), StatusCode::CREATED);
        assert!(matches!(res.end(StatusCode::OK), Err(ResponseError::AlreadyFinalized)));
        assert!(matches!(res.end_with(StatusCode::OK, "again"), Err(ResponseError::AlreadyFinalized)));
        assert_eq!(res.status(), StatusCode::CREATED);
    }

    #[test]
    fn headers_reach_the_reply() {
        let mut reply = MockReply::new();
        reply
            .expect_send_reply()
            .withf(|status, headers, body, _| {
                *status == StatusCode::OK
                    && headers.get("x-request-id").is_some_and(|value| value == "42")
                    && headers.get(CONTENT_TYPE).is_some_and(|value| value == "image/png")
                    && body.is_none()
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let mut res = response(reply);
        res.set_header("x-request-id", "42").unwrap();
        assert!(res.set_content_type_for("/img/logo.png"));
        assert!(!res.set_content_type_for("/no-extension"));
        res.end(StatusCode::OK).unwrap();
    }

    #[test]
    fn writes_after_finalization_fail() {
        let mut reply = MockReply::new();
        reply.expect_send_reply().times(1).returning(|_, _, _, _| Ok(()));

        let mut res = response(reply);
        res.end(StatusCode::NO_CONTENT).unwrap();

        assert!(matches!(res.set_header("x-late", "1"), Err(ResponseError::AlreadyFinalized)));
        assert!(matches!(res.set_compression(Compression::Deflate), Err(ResponseError::AlreadyFinalized)));
        assert!(res.headers_mut().is_none());
        assert!(!res.set_content_type_for("/index.html"));
        assert!(res.headers().is_empty());
    }

    #[test]
    fn invalid_header_is_rejected() {
        let res = &mut response(MockReply::new());
        assert!(matches!(res.set_header("bad header", "x"), Err(ResponseError::InvalidHeader { .. })));
        assert!(matches!(res.set_header("x-ok", "line\nbreak"), Err(ResponseError::InvalidHeader { .. })));
        assert!(!res.is_finalized());
    }

    #[test]
    fn failed_send_still_finalizes() {
        let mut reply = MockReply::new();
        reply.expect_send_reply().times(1).returning(|_, _, _, _| Err(TransportError::Closed));

        let mut res = response(reply);
        assert!(matches!(res.end(StatusCode::OK), Err(ResponseError::Transport { source: TransportError::Closed })));
        assert!(res.is_finalized());
        assert!(matches!(res.end(StatusCode::OK), Err(ResponseError::AlreadyFinalized)));
    }
}
