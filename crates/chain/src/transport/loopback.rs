//! An in-process [`Transport`] without sockets.
//!
//! Requests are queued with [`LoopbackTransport::submit`] as an already-parsed head plus body
//! chunks. While the loop runs, worker threads pop requests and play their events through the
//! pipeline in order: headers, every chunk, body complete, finished. Replies come back on the
//! channel returned by `submit`.
//!
//! The finished event fires right after dispatch, the way a client that hangs up after
//! sending its request would make a socket transport behave.
//!
//! Upgrade requests queued with [`LoopbackTransport::connect_websocket`] ask the pipeline for a
//! WebSocket session. A routed upgrade plays open, every frame, then the client's hang-up on a
//! [`LoopbackSocket`]. An upgrade no WebSocket route takes runs through the middleware chain.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use tracing::{debug, info, trace, warn};

use super::{Reply, Transport};
use crate::config::{TlsConfig, VerifyMode};
use crate::error::TransportError;
use crate::pipeline::Pipeline;
use crate::request::RequestHead;
use crate::response::Compression;
use crate::stream::BodyDisposition;
use crate::websocket::{FrameEvent, FrameType, WebSocketConnection};

static MULTITHREADING_ENABLED: AtomicUsize = AtomicUsize::new(0);

/// A reply as the loopback client received it.
#[derive(Debug, Clone)]
pub struct RecordedReply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub compression: Compression,
}

pub(crate) struct ChannelReply {
    tx: Sender<RecordedReply>,
}

impl ChannelReply {
    pub(crate) fn new(tx: Sender<RecordedReply>) -> Self {
        Self { tx }
    }
}

impl Reply for ChannelReply {
    fn send_reply(
        &mut self,
        status: StatusCode,
        headers: &HeaderMap,
        body: Option<Bytes>,
        compression: Compression,
    ) -> Result<(), TransportError> {
        let reply = RecordedReply { status, headers: headers.clone(), body, compression };
        self.tx.send(reply).map_err(|e| {
            debug!(status = e.0.status.as_u16(), "reply receiver is gone");
            TransportError::Closed
        })
    }
}

/// How the loopback answered an upgrade request.
#[derive(Debug)]
pub enum UpgradeOutcome {
    /// A WebSocket route took the connection. The socket holds what the callbacks wrote.
    Upgraded(LoopbackSocket),
    /// No WebSocket route took the request, the middleware chain answered it.
    Http(Option<RecordedReply>),
}

enum Job {
    Request { head: RequestHead, chunks: Vec<Bytes>, reply: ChannelReply },
    Upgrade { head: RequestHead, frames: Vec<(u8, Bytes)>, outcome: Sender<UpgradeOutcome> },
}

#[derive(Default)]
struct Shared {
    queue: VecDeque<Job>,
    loop_created: bool,
    interrupted: bool,
    bound: Option<(String, u16)>,
    workers: usize,
    tls: Option<VerifyMode>,
}

#[derive(Default)]
pub struct LoopbackTransport {
    shared: Mutex<Shared>,
    ready: Condvar,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times [`Transport::enable_multithreading`] ran in this process.
    pub fn multithreading_enabled_count() -> usize {
        MULTITHREADING_ENABLED.load(Ordering::SeqCst)
    }

    /// Queues a request and returns the channel its reply arrives on.
    ///
    /// The channel disconnects without a reply when the chain never finalizes the response,
    /// or when the transport is unbound before the request ran.
    pub fn submit(&self, head: RequestHead, chunks: Vec<Bytes>) -> Receiver<RecordedReply> {
        let (tx, rx) = mpsc::channel();
        self.push(Job::Request { head, chunks, reply: ChannelReply::new(tx) });
        rx
    }

    /// Queues a WebSocket upgrade followed by `frames`, each an opcode and a payload. The
    /// client hangs up after the last frame.
    pub fn connect_websocket(&self, head: RequestHead, frames: Vec<(u8, Bytes)>) -> Receiver<UpgradeOutcome> {
        let (tx, rx) = mpsc::channel();
        self.push(Job::Upgrade { head, frames, outcome: tx });
        rx
    }

    fn push(&self, job: Job) {
        self.lock().queue.push_back(job);
        self.ready.notify_one();
    }

    pub fn bound_address(&self) -> Option<(String, u16)> {
        self.lock().bound.clone()
    }

    pub fn worker_threads(&self) -> usize {
        self.lock().workers.max(1)
    }

    pub fn tls_verify_mode(&self) -> Option<VerifyMode> {
        self.lock().tls
    }

    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn work(&self, pipeline: &Pipeline) {
        loop {
            let job = {
                let mut shared = self.lock();
                loop {
                    if shared.interrupted {
                        return;
                    }
                    if let Some(job) = shared.queue.pop_front() {
                        break job;
                    }
                    shared = self.ready.wait(shared).unwrap_or_else(PoisonError::into_inner);
                }
            };
            play(pipeline, job);
        }
    }

    fn interrupt(&self) {
        self.lock().interrupted = true;
        self.ready.notify_all();
    }
}

fn play(pipeline: &Pipeline, job: Job) {
    match job {
        Job::Request { head, chunks, reply } => play_request(pipeline, head, &chunks, reply),
        Job::Upgrade { head, frames, outcome } => {
            let answer = play_upgrade(pipeline, head, &frames);
            if outcome.send(answer).is_err() {
                debug!("upgrade receiver is gone");
            }
        }
    }
}

fn play_request(pipeline: &Pipeline, head: RequestHead, chunks: &[Bytes], reply: ChannelReply) {
    let mut ctx = pipeline.on_headers(head, Box::new(reply));

    for chunk in chunks {
        if pipeline.on_body(&mut ctx, chunk) == BodyDisposition::Abort {
            trace!("body aborted, skipping remaining chunks");
            break;
        }
    }

    pipeline.on_request(&mut ctx);
    pipeline.on_finished(ctx);
}

fn play_upgrade(pipeline: &Pipeline, head: RequestHead, frames: &[(u8, Bytes)]) -> UpgradeOutcome {
    let Some(mut session) = pipeline.websocket_session(&head) else {
        let (tx, rx) = mpsc::channel();
        play_request(pipeline, head, &[], ChannelReply::new(tx));
        return UpgradeOutcome::Http(rx.try_recv().ok());
    };

    let mut socket = LoopbackSocket::upgraded();
    pipeline.on_websocket_frame(&mut session, &mut socket, FrameEvent::new(FrameType::Text.opcode(), &[]));
    for (opcode, payload) in frames {
        pipeline.on_websocket_frame(&mut session, &mut socket, FrameEvent::new(*opcode, payload));
    }

    socket.set_disconnecting(true);
    pipeline.on_websocket_frame(&mut session, &mut socket, FrameEvent::new(FrameType::Close.opcode(), &[]));
    trace!(messages = session.messages(), "websocket client hung up");
    UpgradeOutcome::Upgraded(socket)
}

impl Transport for LoopbackTransport {
    fn enable_multithreading() {
        MULTITHREADING_ENABLED.fetch_add(1, Ordering::SeqCst);
    }

    fn create_loop(&self) -> Result<(), TransportError> {
        let mut shared = self.lock();
        if shared.loop_created {
            return Err(TransportError::loop_allocation("loop already exists"));
        }
        shared.loop_created = true;
        shared.interrupted = false;
        Ok(())
    }

    fn configure_tls(&self, tls: &TlsConfig, verify_mode: VerifyMode) -> Result<(), TransportError> {
        if tls.cert_file.is_none() || tls.key_file.is_none() {
            return Err(TransportError::tls("certificate and private key files are required"));
        }
        self.lock().tls = Some(verify_mode);
        Ok(())
    }

    fn bind(&self, address: &str, port: u16, backlog: u32) -> Result<(), TransportError> {
        if address != "localhost" && address.parse::<IpAddr>().is_err() {
            return Err(TransportError::bind(address, port, "unresolvable address"));
        }
        debug!(address, port, backlog, "loopback bound");
        self.lock().bound = Some((address.to_owned(), port));
        Ok(())
    }

    fn use_worker_threads(&self, count: usize) -> Result<(), TransportError> {
        if count == 0 {
            return Err(TransportError::workers("at least one worker is required"));
        }
        self.lock().workers = count;
        Ok(())
    }

    fn run_loop(&self, pipeline: Arc<Pipeline>) -> Result<(), TransportError> {
        if !self.lock().loop_created {
            return Err(TransportError::loop_allocation("run_loop called before create_loop"));
        }
        let workers = self.worker_threads();
        info!(workers, "loopback loop running");

        let spawned = thread::scope(|scope| {
            for id in 0..workers {
                let pipeline = &*pipeline;
                let spawned = thread::Builder::new()
                    .name(format!("loopback-worker-{id}"))
                    .spawn_scoped(scope, move || self.work(pipeline));
                if let Err(e) = spawned {
                    self.interrupt();
                    return Err(e);
                }
            }
            Ok(())
        });

        self.lock().loop_created = false;
        info!("loopback loop stopped");
        spawned.map_err(TransportError::workers)
    }

    fn interrupt_loop(&self) {
        self.interrupt();
    }

    fn unbind(&self) {
        let mut shared = self.lock();
        let dropped = shared.queue.len();
        if dropped > 0 {
            warn!(dropped, "unbinding with queued requests");
        }
        shared.queue.clear();
        shared.bound = None;
        shared.loop_created = false;
    }
}

impl std::fmt::Debug for LoopbackTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.lock();
        f.debug_struct("LoopbackTransport")
            .field("pending", &shared.queue.len())
            .field("running", &shared.loop_created)
            .field("bound", &shared.bound)
            .field("workers", &shared.workers)
            .finish()
    }
}

/// A scripted WebSocket connection that records what the core writes to it.
#[derive(Debug, Default)]
pub struct LoopbackSocket {
    upgraded: bool,
    parser: bool,
    disconnecting: bool,
    written: Vec<u8>,
    rejected: Option<StatusCode>,
}

impl LoopbackSocket {
    /// A connection that completed the WebSocket upgrade.
    pub fn upgraded() -> Self {
        Self { upgraded: true, parser: true, ..Self::default() }
    }

    /// A plain HTTP connection.
    pub fn plain() -> Self {
        Self::default()
    }

    pub fn set_disconnecting(&mut self, disconnecting: bool) {
        self.disconnecting = disconnecting;
    }

    /// Every frame written so far, back to back.
    pub fn written(&self) -> &[u8] {
        &self.written
    }

    pub fn rejected(&self) -> Option<StatusCode> {
        self.rejected
    }
}

impl WebSocketConnection for LoopbackSocket {
    fn is_websocket(&self) -> bool {
        self.upgraded
    }

    fn has_frame_parser(&self) -> bool {
        self.parser && self.rejected.is_none()
    }

    fn is_disconnecting(&self) -> bool {
        self.disconnecting
    }

    fn write_raw_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        if self.disconnecting {
            return Err(TransportError::Closed);
        }
        self.written.extend_from_slice(frame);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.disconnecting = true;
    }

    fn reject(&mut self, status: StatusCode) {
        self.rejected = Some(status);
        self.disconnecting = true;
    }
}
