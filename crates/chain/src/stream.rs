//! Body chunk handling between header completion and body completion.
//!
//! Every chunk is matched against the upload table on its own. On a match, only that chunk is
//! copied into the context's scratch buffer and handed to the upload handler, so memory stays
//! bounded by the largest chunk. Otherwise the chunk is appended to the request body.

use std::collections::TryReserveError;

use http::StatusCode;
use tracing::{error, trace, warn};

use crate::context::{Context, ContextState};
use crate::error::BodyError;
use crate::router::RouteTable;

/// What the Transport should do with its own copy of a chunk, and with the rest of the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyDisposition {
    /// The chunk was taken over; the Transport may discard its copy and keep reading.
    Drain,
    /// The request failed and already has a reply; the Transport should stop reading the body.
    Abort,
}

pub(crate) fn take_chunk(routes: &RouteTable, ctx: &mut Context, chunk: &[u8]) -> BodyDisposition {
    if ctx.response.is_finalized() {
        trace!(len = chunk.len(), "response already finalized, dropping chunk");
        return BodyDisposition::Abort;
    }
    ctx.enter(ContextState::BodyAccumulating);

    let upload = routes.find_upload(ctx.request.method(), ctx.request.path());
    let taken = match upload {
        Some(route) => copy_chunk(&mut ctx.upload_buffer, chunk).map(|()| {
            ctx.request.set_middleware_path(route.shared_pattern());
            route.handler().on_chunk(&mut ctx.request, &ctx.upload_buffer);
        }),
        None => ctx.request.append_body(chunk),
    };

    match taken {
        Ok(()) => BodyDisposition::Drain,
        Err(e) => abort(ctx, BodyError::allocation(chunk.len(), e)),
    }
}

fn copy_chunk(buffer: &mut Vec<u8>, chunk: &[u8]) -> Result<(), TryReserveError> {
    buffer.clear();
    buffer.try_reserve_exact(chunk.len())?;
    buffer.extend_from_slice(chunk);
    Ok(())
}

pub(crate) fn abort(ctx: &mut Context, cause: BodyError) -> BodyDisposition {
    error!(cause = %cause, path = ctx.request.path(), "request body failed, replying 500");
    if let Err(e) = ctx.response.end(StatusCode::INTERNAL_SERVER_ERROR) {
        warn!(cause = %e, "can't send 500 reply");
    }
    BodyDisposition::Abort
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::upload_fn;
    use crate::request::Request;
    use crate::router::{HttpMethod, RouteFlags, upload_route};
    use crate::testing;
    use http::Method;
    use std::sync::{Arc, Mutex};

    fn context(method: Method, uri: &str) -> (Context, std::sync::mpsc::Receiver<crate::transport::RecordedReply>) {
        let (req, res, replies) = testing::exchange(method, uri);
        (Context::new(req, res), replies)
    }

    fn recording_uploads(chunks: &Arc<Mutex<Vec<usize>>>) -> RouteTable {
        let chunks = Arc::clone(chunks);
        let mut routes = RouteTable::new();
        routes.add_upload(upload_route(
            "/upload",
            HttpMethod::Post.into(),
            RouteFlags::NONE,
            upload_fn(move |_req: &mut Request, chunk: &[u8]| chunks.lock().unwrap().push(chunk.len())),
        ));
        routes
    }

    #[test]
    fn upload_handler_sees_each_chunk_once() {
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let routes = recording_uploads(&chunks);
        let (mut ctx, _replies) = context(Method::POST, "/upload");

        for len in [10, 20, 30] {
            assert_eq!(take_chunk(&routes, &mut ctx, &vec![b'x'; len]), BodyDisposition::Drain);
        }

        assert_eq!(*chunks.lock().unwrap(), vec![10, 20, 30]);
        assert!(ctx.request().body().is_empty());
        assert_eq!(ctx.request().middleware_path(), Some("/upload"));
        assert!(ctx.upload_buffer.capacity() >= 30);
        assert_eq!(ctx.state(), ContextState::BodyAccumulating);
    }

    #[test]
    fn unmatched_chunks_accumulate() {
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let routes = recording_uploads(&chunks);
        let (mut ctx, _replies) = context(Method::PUT, "/upload");

        assert_eq!(take_chunk(&routes, &mut ctx, b"hello "), BodyDisposition::Drain);
        assert_eq!(take_chunk(&routes, &mut ctx, b"world"), BodyDisposition::Drain);

        assert!(chunks.lock().unwrap().is_empty());
        assert_eq!(ctx.request().body(), b"hello world");
        assert!(ctx.upload_buffer.is_empty());
    }

    #[test]
    fn handler_gets_only_the_current_chunk() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut routes = RouteTable::new();
        let sink = Arc::clone(&seen);
        routes.add_upload(upload_route(
            "/files",
            HttpMethod::Post.into(),
            RouteFlags::PREFIX,
            upload_fn(move |_req: &mut Request, chunk: &[u8]| sink.lock().unwrap().push(chunk.to_vec())),
        ));
        let (mut ctx, _replies) = context(Method::POST, "/files/a.bin");

        take_chunk(&routes, &mut ctx, b"first chunk");
        take_chunk(&routes, &mut ctx, b"2nd");

        assert_eq!(*seen.lock().unwrap(), vec![b"first chunk".to_vec(), b"2nd".to_vec()]);
    }

    #[test]
    fn failure_replies_500_and_aborts() {
        let routes = RouteTable::new();
        let (mut ctx, replies) = context(Method::POST, "/big");
        let cause = Vec::<u8>::new().try_reserve(usize::MAX).unwrap_err();

        assert_eq!(abort(&mut ctx, BodyError::allocation(usize::MAX, cause)), BodyDisposition::Abort);
        assert_eq!(replies.try_recv().unwrap().status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ctx.state(), ContextState::Finalized);

        assert_eq!(take_chunk(&routes, &mut ctx, b"late"), BodyDisposition::Abort);
        assert!(ctx.request().body().is_empty());
    }
}
