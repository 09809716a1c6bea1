//! The entry point a Transport drives.
//!
//! A [`Pipeline`] is an immutable snapshot of the route tables and the per-request settings,
//! shared by every worker thread of a running server. Transport events map one to one onto its
//! methods:
//!
//! | event             | method                                  |
//! |-------------------|-----------------------------------------|
//! | header-complete   | [`Pipeline::on_headers`]                |
//! | body-chunk        | [`Pipeline::on_body`]                   |
//! | body-complete     | [`Pipeline::on_request`]                |
//! | request-finished  | [`Pipeline::on_finished`]               |
//! | websocket upgrade | [`Pipeline::websocket_session`]         |
//! | websocket-frame   | [`Pipeline::on_websocket_frame`]        |

use http::header::ACCEPT_ENCODING;
use tracing::{debug, trace};

use crate::config::Config;
use crate::context::{Context, ContextState};
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::mime_types::MimeTypes;
use crate::request::{Request, RequestHead};
use crate::response::{Compression, Response};
use crate::router::RouteTable;
use crate::stream::{self, BodyDisposition};
use crate::transport::Reply;
use crate::websocket::{FrameEvent, WebSocketConnection, WebSocketRouter, WebSocketSession};

#[derive(Debug, Clone, Copy)]
struct RequestSettings {
    compress: bool,
    parse_ssl_info: bool,
}

#[derive(Debug)]
pub struct Pipeline {
    routes: RouteTable,
    websockets: WebSocketRouter,
    settings: RequestSettings,
    mime_types: &'static MimeTypes,
}

impl Pipeline {
    pub(crate) fn new(
        routes: RouteTable,
        websockets: WebSocketRouter,
        config: &Config,
        mime_types: &'static MimeTypes,
    ) -> Self {
        let settings = RequestSettings { compress: config.compress(), parse_ssl_info: config.parse_ssl_info() };
        Self { routes, websockets, settings, mime_types }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn websockets(&self) -> &WebSocketRouter {
        &self.websockets
    }

    /// Creates the context of a request whose headers are complete.
    pub fn on_headers(&self, head: RequestHead, reply: Box<dyn Reply>) -> Context {
        trace!(method = %head.method(), path = head.path(), "request headers complete");
        Context::new(Request::new(head), Response::new(reply, self.mime_types))
    }

    /// Takes one body chunk. The chunk is only borrowed for the duration of the call.
    pub fn on_body(&self, ctx: &mut Context, chunk: &[u8]) -> BodyDisposition {
        stream::take_chunk(&self.routes, ctx, chunk)
    }

    /// Runs the middleware chain once the body is complete.
    pub fn on_request(&self, ctx: &mut Context) -> DispatchOutcome {
        if ctx.response().is_finalized() {
            return DispatchOutcome::AlreadyFinalized;
        }
        ctx.enter(ContextState::Dispatching);

        let (req, res) = ctx.parts_mut();
        if self.settings.compress {
            let compression = req.header(ACCEPT_ENCODING.as_str()).map(Compression::negotiate).unwrap_or_default();
            if let Err(e) = res.set_compression(compression) {
                debug!(cause = %e, "can't negotiate compression");
            }
        }
        if self.settings.parse_ssl_info {
            req.attach_peer_certificate();
        }

        let outcome = Dispatcher::new(self.routes.middleware()).run(req, res);
        debug!(method = %req.method(), path = req.path(), ?outcome, "request dispatched");
        outcome
    }

    /// Destroys the context. Must be the last event of the request.
    pub fn on_finished(&self, ctx: Context) {
        if ctx.state() == ContextState::Finalized {
            trace!(path = ctx.request().path(), status = ctx.response().status().as_u16(), "request finished");
        } else {
            debug!(path = ctx.request().path(), state = ?ctx.state(), "request finished without a reply");
        }
        drop(ctx);
    }

    /// Routes an upgrade request to a WebSocket session.
    ///
    /// Returns `None` when no WebSocket route matches, or when a middleware entry registered
    /// before the matching route also matches the request and therefore handles it instead.
    pub fn websocket_session(&self, head: &RequestHead) -> Option<WebSocketSession> {
        let route = self.websockets.resolve(head.path())?;

        let preceding = self.routes.middleware().get(..route.registered_after()).unwrap_or_default();
        if let Some(shadow) = preceding.iter().find(|entry| entry.matches(head.method(), head.path())) {
            debug!(
                path = head.path(),
                shadowed_by = shadow.pattern().unwrap_or("*"),
                "websocket route is shadowed by earlier middleware"
            );
            return None;
        }

        Some(WebSocketSession::new(route.clone()))
    }

    pub fn on_websocket_frame(
        &self,
        session: &mut WebSocketSession,
        conn: &mut dyn WebSocketConnection,
        frame: FrameEvent<'_>,
    ) {
        session.handle_frame(conn, frame);
    }
}
