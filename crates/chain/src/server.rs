//! Server facade: route registration and the listen/stop lifecycle.
//!
//! # Example
//!
//! ```
//! use micro_chain::transport::LoopbackTransport;
//! use micro_chain::{Config, Server, Status, middleware_fn};
//! use http::StatusCode;
//!
//! let config = Config::builder().address("127.0.0.1").port(8080).thread_count(1).build();
//! let mut server = Server::with_config(LoopbackTransport::new(), config);
//! server.get("/", middleware_fn(|_req, res, _next| {
//!     let _ = res.end_with(StatusCode::OK, "hello");
//! }));
//!
//! assert_eq!(server.listen(false).unwrap(), Status::Success);
//! assert_eq!(server.stop(), Status::Success);
//! ```

use std::fmt;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{ServerError, TransportError};
use crate::handler::{Middleware, UploadHandler};
use crate::pipeline::Pipeline;
use crate::process::{self, Process};
use crate::router::{HttpMethod, MethodFilter, RouteFlags, RouteTable, middleware_route, upload_route};
use crate::transport::Transport;
use crate::websocket::{WebSocketHandlers, WebSocketRoute, WebSocketRouter};

/// Result of a lifecycle operation that did not fail outright.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The operation did what was asked.
    Success,
    /// Nothing to do, the server already was in the requested state.
    Done,
    /// The configuration does not allow the operation.
    Fail,
}

macro_rules! method_routes {
    ($method:ident, $method_with:ident, $variant:ident, $name:literal) => {
        #[doc = concat!("Registers `middleware` for ", $name, " requests to exactly `path`.")]
        pub fn $method<M: Middleware + 'static>(&mut self, path: &str, middleware: M) -> &mut Self {
            self.route(path, MethodFilter::Only(HttpMethod::$variant), RouteFlags::NONE, middleware)
        }

        #[doc = concat!("Registers `middleware` for ", $name, " requests, matched according to `flags`.")]
        pub fn $method_with<M: Middleware + 'static>(&mut self, path: &str, middleware: M, flags: RouteFlags) -> &mut Self {
            self.route(path, MethodFilter::Only(HttpMethod::$variant), flags, middleware)
        }
    };
}

/// An embeddable HTTP and WebSocket server driven by a [`Transport`].
///
/// Routes are registered through `&mut self`. [`listen`](Server::listen) takes a snapshot of
/// them, so changes made while a background loop runs only apply to the next `listen`.
pub struct Server<T: Transport> {
    config: Config,
    routes: RouteTable,
    websockets: WebSocketRouter,
    process: &'static Process,
    lifecycle: Arc<Lifecycle<T>>,
}

impl<T: Transport> Server<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, Config::default())
    }

    pub fn with_config(transport: T, config: Config) -> Self {
        let process = process::bootstrap::<T>();
        Self {
            config,
            routes: RouteTable::new(),
            websockets: WebSocketRouter::new(),
            process,
            lifecycle: Arc::new(Lifecycle::new(Arc::new(transport))),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.lifecycle.transport
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Process-wide state shared by every server, the MIME table included.
    pub fn process(&self) -> &'static Process {
        self.process
    }

    method_routes!(get, get_with, Get, "GET");
    method_routes!(put, put_with, Put, "PUT");
    method_routes!(post, post_with, Post, "POST");
    method_routes!(head, head_with, Head, "HEAD");
    method_routes!(delete, delete_with, Delete, "DELETE");
    method_routes!(connect, connect_with, Connect, "CONNECT");
    method_routes!(options, options_with, Options, "OPTIONS");
    method_routes!(trace, trace_with, Trace, "TRACE");
    method_routes!(patch, patch_with, Patch, "PATCH");
    method_routes!(mkcol, mkcol_with, Mkcol, "MKCOL");
    method_routes!(copy, copy_with, Copy, "COPY");
    method_routes!(r#move, move_with, Move, "MOVE");
    method_routes!(propfind, propfind_with, Propfind, "PROPFIND");
    method_routes!(proppatch, proppatch_with, Proppatch, "PROPPATCH");
    method_routes!(lock, lock_with, Lock, "LOCK");
    method_routes!(unlock, unlock_with, Unlock, "UNLOCK");

    /// Registers `middleware` for every method. An empty `path` matches every request.
    pub fn any<M: Middleware + 'static>(&mut self, path: &str, middleware: M) -> &mut Self {
        self.route(path, MethodFilter::Any, RouteFlags::NONE, middleware)
    }

    pub fn any_with<M: Middleware + 'static>(&mut self, path: &str, middleware: M, flags: RouteFlags) -> &mut Self {
        self.route(path, MethodFilter::Any, flags, middleware)
    }

    /// Appends a middleware entry to the chain.
    pub fn route<M: Middleware + 'static>(
        &mut self,
        path: &str,
        method: MethodFilter,
        flags: RouteFlags,
        middleware: M,
    ) -> &mut Self {
        self.routes.add_middleware(middleware_route(path, method, flags, middleware));
        self
    }

    /// Streams the body of POST requests to exactly `path` into `handler`.
    pub fn upload<U: UploadHandler + 'static>(&mut self, path: &str, handler: U) -> &mut Self {
        self.upload_with(path, handler, MethodFilter::Only(HttpMethod::Post), RouteFlags::NONE)
    }

    pub fn upload_with<U: UploadHandler + 'static>(
        &mut self,
        path: &str,
        handler: U,
        method: MethodFilter,
        flags: RouteFlags,
    ) -> &mut Self {
        self.routes.add_upload(upload_route(path, method, flags, handler));
        self
    }

    /// Routes WebSocket upgrades for exactly `path` to `handlers`.
    ///
    /// Middleware registered before this call that also matches `path` takes the upgrade
    /// request instead, so register WebSocket routes before any catch-all middleware.
    pub fn websocket(&mut self, path: &str, handlers: WebSocketHandlers) -> &mut Self {
        self.websocket_with(path, handlers, RouteFlags::NONE)
    }

    pub fn websocket_with(&mut self, path: &str, handlers: WebSocketHandlers, flags: RouteFlags) -> &mut Self {
        let registered_after = self.routes.middleware().len();
        self.websockets.add(WebSocketRoute::new(path, flags, handlers, registered_after));
        self
    }

    /// A snapshot of the current routes and settings, as handed to the Transport.
    pub fn pipeline(&self) -> Arc<Pipeline> {
        Arc::new(Pipeline::new(self.routes.clone(), self.websockets.clone(), &self.config, self.process.mime_types()))
    }

    pub fn handle(&self) -> ServerHandle<T> {
        ServerHandle { lifecycle: Arc::clone(&self.lifecycle) }
    }

    /// Starts serving on the configured address and port.
    ///
    /// With `block` the loop runs on the calling thread until [`stop`](ServerHandle::stop)
    /// is called through a [`ServerHandle`]. Without it the loop runs on a background thread
    /// and this returns once the loop is set up.
    ///
    /// Returns [`Status::Fail`] when no address or port is configured.
    pub fn listen(&self, block: bool) -> Result<Status, ServerError> {
        let (Some(address), Some(port)) = (self.config.address(), self.config.port()) else {
            warn!(address = ?self.config.address(), port = ?self.config.port(), "listen needs an address and a port");
            return Ok(Status::Fail);
        };

        let mut state = self.lifecycle.lock();
        if !matches!(*state, LoopState::Stopped) {
            return Err(ServerError::AlreadyStarted);
        }

        let transport = Arc::clone(&self.lifecycle.transport);
        let pipeline = self.pipeline();

        if block {
            prepare(transport.as_ref(), &self.config, address, port)?;
            *state = LoopState::Blocking { interrupted: false };
            drop(state);

            info!(address, port, threads = self.config.thread_count(), "listening");
            let result = transport.run_loop(pipeline);
            transport.unbind();
            *self.lifecycle.lock() = LoopState::Stopped;
            info!(address, port, "stopped listening");

            result?;
            return Ok(Status::Success);
        }

        let (started_tx, started_rx) = mpsc::sync_channel::<Result<(), TransportError>>(1);
        let config = self.config.clone();
        let (loop_address, loop_transport) = (address.to_owned(), Arc::clone(&transport));
        let thread = thread::Builder::new()
            .name("micro-chain-loop".to_owned())
            .spawn(move || {
                let prepared = prepare(loop_transport.as_ref(), &config, &loop_address, port);
                let ready = prepared.is_ok();
                if started_tx.send(prepared).is_err() || !ready {
                    return;
                }

                if let Err(e) = loop_transport.run_loop(pipeline) {
                    error!(cause = %e, "event loop failed");
                }
                loop_transport.unbind();
            })
            .map_err(|source| ServerError::Spawn { source })?;

        match started_rx.recv() {
            Ok(Ok(())) => {
                *state = LoopState::Background(BackgroundLoop::new(transport, thread));
                info!(address, port, threads = self.config.thread_count(), "listening in background");
                Ok(Status::Success)
            }
            Ok(Err(e)) => {
                join_loop_thread(thread);
                Err(e.into())
            }
            Err(_) => {
                join_loop_thread(thread);
                Err(ServerError::StartupAborted)
            }
        }
    }

    /// Sets the address and port, then [`listen`](Server::listen)s.
    pub fn listen_on(&mut self, address: &str, port: u16, block: bool) -> Result<Status, ServerError> {
        self.config.set_listen_address(address, port);
        self.listen(block)
    }

    /// Stops a running loop and waits for the background thread, if any.
    ///
    /// Returns [`Status::Done`] when nothing was running.
    pub fn stop(&self) -> Status {
        self.lifecycle.stop()
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }
}

impl<T: Transport> Drop for Server<T> {
    fn drop(&mut self) {
        let _ = self.lifecycle.stop();
    }
}

impl<T: Transport> fmt::Debug for Server<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("routes", &self.routes)
            .field("websockets", &self.websockets)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Stops a [`Server`] from another thread, including one blocked in `listen(true)`.
pub struct ServerHandle<T: Transport> {
    lifecycle: Arc<Lifecycle<T>>,
}

impl<T: Transport> ServerHandle<T> {
    pub fn stop(&self) -> Status {
        self.lifecycle.stop()
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }
}

impl<T: Transport> Clone for ServerHandle<T> {
    fn clone(&self) -> Self {
        Self { lifecycle: Arc::clone(&self.lifecycle) }
    }
}

impl<T: Transport> fmt::Debug for ServerHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerHandle").field("running", &self.is_running()).finish()
    }
}

fn prepare<T: Transport>(transport: &T, config: &Config, address: &str, port: u16) -> Result<(), TransportError> {
    transport.create_loop()?;
    let configured = configure(transport, config, address, port);
    if let Err(e) = &configured {
        warn!(cause = %e, address, port, "transport setup failed");
        transport.unbind();
    }
    configured
}

fn configure<T: Transport>(transport: &T, config: &Config, address: &str, port: u16) -> Result<(), TransportError> {
    if config.ssl_enabled() {
        transport.configure_tls(config.tls(), config.verify_mode())?;
    }
    transport.bind(address, port, config.backlog())?;
    if config.thread_count() > 1 {
        transport.use_worker_threads(config.thread_count())?;
    }
    Ok(())
}

fn join_loop_thread(thread: JoinHandle<()>) {
    if thread.join().is_err() {
        error!("event loop thread panicked");
    }
}

enum LoopState<T: Transport> {
    Stopped,
    Blocking { interrupted: bool },
    Background(BackgroundLoop<T>),
    /// A background loop is being joined. The state lock is not held meanwhile, so handlers
    /// still in flight can reach the lifecycle.
    Stopping,
}

struct Lifecycle<T: Transport> {
    transport: Arc<T>,
    state: Mutex<LoopState<T>>,
}

impl<T: Transport> Lifecycle<T> {
    fn new(transport: Arc<T>) -> Self {
        Self { transport, state: Mutex::new(LoopState::Stopped) }
    }

    fn lock(&self) -> MutexGuard<'_, LoopState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_running(&self) -> bool {
        !matches!(*self.lock(), LoopState::Stopped)
    }

    fn stop(&self) -> Status {
        let mut state = self.lock();
        match std::mem::replace(&mut *state, LoopState::Stopped) {
            LoopState::Stopped => Status::Done,
            LoopState::Blocking { interrupted } => {
                *state = LoopState::Blocking { interrupted: true };
                if interrupted {
                    return Status::Done;
                }
                info!("interrupting blocking loop");
                self.transport.interrupt_loop();
                Status::Success
            }
            LoopState::Stopping => {
                *state = LoopState::Stopping;
                Status::Done
            }
            LoopState::Background(background) => {
                *state = LoopState::Stopping;
                drop(state);

                info!("stopping background loop");
                background.shutdown();
                *self.lock() = LoopState::Stopped;
                Status::Success
            }
        }
    }
}

/// The background loop thread. Released by interrupting the loop, then joining the thread.
struct BackgroundLoop<T: Transport> {
    transport: Arc<T>,
    thread: Option<JoinHandle<()>>,
}

impl<T: Transport> BackgroundLoop<T> {
    fn new(transport: Arc<T>, thread: JoinHandle<()>) -> Self {
        Self { transport, thread: Some(thread) }
    }

    fn shutdown(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.transport.interrupt_loop();
            join_loop_thread(thread);
        }
    }
}

impl<T: Transport> Drop for BackgroundLoop<T> {
    fn drop(&mut self) {
        self.release();
    }
}
