//! An embeddable middleware core for HTTP and WebSocket servers
//!
//! This crate sits on top of a transport layer that already owns the sockets, the event loop
//! and the wire parsing. It receives parsed request events from that [`Transport`] and turns
//! them into an ordered middleware chain, streaming uploads and WebSocket callbacks.
//!
//! # Features
//!
//! - Ordered middleware chain with explicit continuation, bounded stack depth
//! - Exact and prefix route matching on path and method, WebDAV methods included
//! - Streaming upload handlers that never buffer the whole body
//! - WebSocket routing with open, message, close and error callbacks
//! - Per-request [`PropertyList`] for passing state down the chain
//! - Background or blocking event loop with clean shutdown
//!
//! # Example
//!
//! ```
//! use http::StatusCode;
//! use micro_chain::transport::LoopbackTransport;
//! use micro_chain::{Config, Server, Status, middleware_fn};
//!
//! let mut server = Server::with_config(LoopbackTransport::new(), Config::builder().address("127.0.0.1").port(8080).build());
//!
//! server
//!     .any("", middleware_fn(|req, res, next| {
//!         res.properties_mut().set("path", req.path());
//!         next.proceed();
//!     }))
//!     .get("/hello", middleware_fn(|_req, res, _next| {
//!         let _ = res.end_with(StatusCode::OK, "hello world");
//!     }));
//!
//! assert_eq!(server.listen(false).unwrap(), Status::Success);
//!
//! let head = http::Request::get("/hello").body(()).unwrap().into();
//! let reply = server.transport().submit(head, Vec::new()).recv().unwrap();
//! assert_eq!(reply.status, StatusCode::OK);
//!
//! assert_eq!(server.stop(), Status::Success);
//! ```

mod config;
mod context;
mod dispatcher;
mod error;
mod handler;
mod mime_types;
mod pipeline;
mod process;
mod property;
mod request;
mod response;
mod server;
mod stream;

pub mod router;
pub mod transport;
pub mod websocket;

#[cfg(test)]
mod testing;

pub use config::{Config, ConfigBuilder, TlsConfig, VerifyMode};
pub use context::{Context, ContextState};
pub use dispatcher::{DispatchOutcome, Next};
pub use error::{BodyError, ResponseError, ServerError, TransportError, WebSocketError};
pub use handler::{FnMiddleware, FnUpload, Middleware, UploadHandler, middleware_fn, upload_fn};
pub use mime_types::MimeTypes;
pub use pipeline::Pipeline;
pub use process::Process;
pub use property::{OwnedHandle, Property, PropertyList};
pub use request::{PeerCertificate, Request, RequestHead};
pub use response::{Compression, Response};
pub use server::{Server, ServerHandle, Status};
pub use stream::BodyDisposition;
pub use transport::{Reply, Transport};
