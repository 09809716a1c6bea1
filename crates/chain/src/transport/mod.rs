//! The seam between the middleware core and whatever owns the sockets.
//!
//! A [`Transport`] owns the event loop, the listening socket, TLS and wire-level parsing. It
//! drives a shared [`Pipeline`] with already-parsed events and hands every request a [`Reply`]
//! to transmit the response with. WebSocket connections are exposed to the core through
//! [`WebSocketConnection`](crate::websocket::WebSocketConnection).
//!
//! [`LoopbackTransport`] is an in-process implementation without sockets, used by the tests,
//! the examples and the benchmarks.

mod loopback;

#[cfg(test)]
pub(crate) use loopback::ChannelReply;
pub use loopback::{LoopbackSocket, LoopbackTransport, RecordedReply, UpgradeOutcome};

use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};

use crate::config::{TlsConfig, VerifyMode};
use crate::error::TransportError;
use crate::pipeline::Pipeline;
use crate::response::Compression;

/// Event loop and socket owner driving a [`Pipeline`].
///
/// The [`Server`](crate::Server) calls the setup methods in this order: `create_loop`,
/// `configure_tls` (only when TLS is enabled), `bind`, `use_worker_threads` (only for more
/// than one thread), then `run_loop`. `unbind` follows once `run_loop` returned, or right
/// after a failed setup step, and releases everything `create_loop` and `bind` acquired.
///
/// `interrupt_loop` may be called from any thread. An interrupt issued after `create_loop`
/// returned must make `run_loop` return, even when `run_loop` has not been entered yet.
pub trait Transport: Send + Sync + 'static {
    /// Sets up process-wide thread-safety primitives. Called exactly once per process for each
    /// Transport type, before the first server using that type is constructed.
    fn enable_multithreading()
    where
        Self: Sized;

    fn create_loop(&self) -> Result<(), TransportError>;

    fn configure_tls(&self, tls: &TlsConfig, verify_mode: VerifyMode) -> Result<(), TransportError>;

    fn bind(&self, address: &str, port: u16, backlog: u32) -> Result<(), TransportError>;

    fn use_worker_threads(&self, count: usize) -> Result<(), TransportError>;

    /// Runs the event loop until interrupted, delivering request events to `pipeline`.
    ///
    /// Lifecycle events of one request must be delivered in order on one thread, and
    /// [`Pipeline::on_finished`] must come after every other event of that request.
    fn run_loop(&self, pipeline: Arc<Pipeline>) -> Result<(), TransportError>;

    fn interrupt_loop(&self);

    fn unbind(&self);
}

/// Sends the response of one request back to the client.
///
/// The [`Response`](crate::Response) calls this at most once.
#[cfg_attr(test, mockall::automock)]
pub trait Reply: Send {
    fn send_reply(
        &mut self,
        status: StatusCode,
        headers: &HeaderMap,
        body: Option<Bytes>,
        compression: Compression,
    ) -> Result<(), TransportError>;
}
