use std::fmt;

use crate::dispatcher::Next;
use crate::request::Request;
use crate::response::Response;

/// A link in the middleware chain.
///
/// A middleware either finalizes the response, or calls [`Next::proceed`] to hand the
/// request to the next matching entry, or does neither. In the last case the chain stops and
/// the response stays open until the Transport reports the request as finished.
pub trait Middleware: Send + Sync {
    fn call(&self, req: &mut Request, res: &mut Response, next: &mut Next);
}

/// Consumes request body chunks as they arrive, instead of buffering them.
pub trait UploadHandler: Send + Sync {
    /// `chunk` is only valid for the duration of the call.
    fn on_chunk(&self, req: &mut Request, chunk: &[u8]);
}

/// a `Fn` holder which represents a middleware closure
pub struct FnMiddleware<F> {
    f: F,
}

pub fn middleware_fn<F>(f: F) -> FnMiddleware<F>
where
    F: Fn(&mut Request, &mut Response, &mut Next) + Send + Sync,
{
    FnMiddleware { f }
}

impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&mut Request, &mut Response, &mut Next) + Send + Sync,
{
    #[inline]
    fn call(&self, req: &mut Request, res: &mut Response, next: &mut Next) {
        (self.f)(req, res, next);
    }
}

impl<F> fmt::Debug for FnMiddleware<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnMiddleware")
    }
}

/// a `Fn` holder which represents an upload closure
pub struct FnUpload<F> {
    f: F,
}

pub fn upload_fn<F>(f: F) -> FnUpload<F>
where
    F: Fn(&mut Request, &[u8]) + Send + Sync,
{
    FnUpload { f }
}

impl<F> UploadHandler for FnUpload<F>
where
    F: Fn(&mut Request, &[u8]) + Send + Sync,
{
    #[inline]
    fn on_chunk(&self, req: &mut Request, chunk: &[u8]) {
        (self.f)(req, chunk);
    }
}

impl<F> fmt::Debug for FnUpload<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnUpload")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_is_middleware<T: Middleware>(_middleware: &T) {
        // no op
    }

    fn assert_is_upload_handler<T: UploadHandler>(_handler: &T) {
        // no op
    }

    #[test]
    fn closures_are_middleware() {
        let logger = middleware_fn(|_req, _res, next| next.proceed());
        assert_is_middleware(&logger);

        let terminal = middleware_fn(|_req, res, _next| {
            let _ = res.end(http::StatusCode::OK);
        });
        assert_is_middleware(&terminal);
    }

    #[test]
    fn closures_are_upload_handlers() {
        let sink = upload_fn(|req, chunk| {
            let seen = req.properties().get_integer("bytes");
            req.properties_mut().set("bytes", seen + i64::try_from(chunk.len()).unwrap_or(i64::MAX));
        });
        assert_is_upload_handler(&sink);
    }
}
