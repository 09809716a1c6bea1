use std::collections::TryReserveError;
use std::io;
use thiserror::Error;

/// Errors raised to the caller of [`Server::listen`](crate::Server::listen).
///
/// Request-scoped failures never surface here; they are turned into a response inside the
/// pipeline.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server already started")]
    AlreadyStarted,

    #[error("transport error: {source}")]
    Transport {
        #[from]
        source: TransportError,
    },

    #[error("can't spawn the background loop thread: {source}")]
    Spawn { source: io::Error },

    #[error("background loop exited before signalling startup")]
    StartupAborted,
}

/// Errors reported by a [`Transport`](crate::transport::Transport) implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to create event loop: {reason}")]
    LoopAllocation { reason: String },

    #[error("failed to bind {address}:{port}: {reason}")]
    Bind { address: String, port: u16, reason: String },

    #[error("invalid tls setup: {reason}")]
    Tls { reason: String },

    #[error("failed to start worker threads: {reason}")]
    Workers { reason: String },

    #[error("connection is closed")]
    Closed,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl TransportError {
    pub fn loop_allocation<S: ToString>(str: S) -> Self {
        Self::LoopAllocation { reason: str.to_string() }
    }

    pub fn bind<S: ToString>(address: &str, port: u16, str: S) -> Self {
        Self::Bind { address: address.to_owned(), port, reason: str.to_string() }
    }

    pub fn tls<S: ToString>(str: S) -> Self {
        Self::Tls { reason: str.to_string() }
    }

    pub fn workers<S: ToString>(str: S) -> Self {
        Self::Workers { reason: str.to_string() }
    }
}

#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("response already finalized")]
    AlreadyFinalized,

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("transport error: {source}")]
    Transport {
        #[from]
        source: TransportError,
    },
}

impl ResponseError {
    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }
}

#[derive(Debug, Error)]
pub enum WebSocketError {
    #[error("websocket is not open")]
    NotOpen,

    #[error("refusing to send an empty frame")]
    EmptyPayload,

    #[error("connection was not upgraded to websocket")]
    NotUpgraded,

    #[error("transport error: {source}")]
    Transport {
        #[from]
        source: TransportError,
    },
}

/// A request-fatal failure while taking in body chunks.
#[derive(Debug, Error)]
pub enum BodyError {
    #[error("can't reserve {requested} bytes for the request body: {source}")]
    Allocation { requested: usize, source: TryReserveError },
}

impl BodyError {
    pub fn allocation(requested: usize, source: TryReserveError) -> Self {
        Self::Allocation { requested, source }
    }
}
