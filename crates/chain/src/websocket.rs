//! WebSocket routing on top of Transport frame events.
//!
//! The Transport performs the upgrade handshake and frame parsing. For every upgraded
//! connection it asks the [`Pipeline`](crate::Pipeline) for a [`WebSocketSession`] and feeds it
//! frame events. The session turns those events into the route's open, message, close and
//! error callbacks.
//!
//! Inside a callback the connection is reachable through a [`WebSocket`] handle, which borrows
//! the connection for that one call only.

use std::fmt;
use std::sync::Arc;

use http::StatusCode;
use tracing::{debug, trace, warn};

use crate::error::{TransportError, WebSocketError};
use crate::router::{MethodFilter, Route, RouteFlags};

/// Frame type of a WebSocket message, derived from the wire opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Text,
    Binary,
    Ping,
    Pong,
    Close,
}

impl FrameType {
    /// Unknown opcodes, continuation frames included, map to [`FrameType::Text`].
    pub fn from_opcode(opcode: u8) -> Self {
        match opcode {
            0x2 => FrameType::Binary,
            0x8 => FrameType::Close,
            0x9 => FrameType::Ping,
            0xA => FrameType::Pong,
            _ => FrameType::Text,
        }
    }

    pub fn opcode(self) -> u8 {
        match self {
            FrameType::Text => 0x1,
            FrameType::Binary => 0x2,
            FrameType::Close => 0x8,
            FrameType::Ping => 0x9,
            FrameType::Pong => 0xA,
        }
    }
}

/// A live connection as exposed by the Transport.
#[cfg_attr(test, mockall::automock)]
pub trait WebSocketConnection: Send {
    fn is_websocket(&self) -> bool;

    fn has_frame_parser(&self) -> bool;

    fn is_disconnecting(&self) -> bool;

    /// Writes an already framed message, synchronously.
    fn write_raw_frame(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    fn disconnect(&mut self);

    fn reject(&mut self, status: StatusCode);
}

/// One parsed frame as delivered by the Transport.
#[derive(Debug, Clone, Copy)]
pub struct FrameEvent<'a> {
    pub opcode: u8,
    pub payload: &'a [u8],
}

impl<'a> FrameEvent<'a> {
    pub fn new(opcode: u8, payload: &'a [u8]) -> Self {
        Self { opcode, payload }
    }

    pub fn frame_type(&self) -> FrameType {
        FrameType::from_opcode(self.opcode)
    }
}

/// Handle to the connection, valid for one callback invocation.
pub struct WebSocket<'c> {
    conn: &'c mut dyn WebSocketConnection,
}

impl<'c> WebSocket<'c> {
    pub fn new(conn: &'c mut dyn WebSocketConnection) -> Self {
        Self { conn }
    }

    /// `true` while the Transport reports an upgraded connection with an active frame parser.
    pub fn is_open(&self) -> bool {
        self.conn.is_websocket() && self.conn.has_frame_parser()
    }

    pub fn send(&mut self, text: &str) -> Result<(), WebSocketError> {
        self.send_frame(text.as_bytes(), FrameType::Text)
    }

    pub fn send_binary(&mut self, data: &[u8]) -> Result<(), WebSocketError> {
        self.send_frame(data, FrameType::Binary)
    }

    /// Writes `data` as a single unmasked final frame.
    pub fn send_frame(&mut self, data: &[u8], frame_type: FrameType) -> Result<(), WebSocketError> {
        if data.is_empty() {
            return Err(WebSocketError::EmptyPayload);
        }
        if !self.is_open() {
            return Err(WebSocketError::NotOpen);
        }

        let frame = encode_frame(data, frame_type);
        trace!(len = data.len(), ?frame_type, "writing websocket frame");
        self.conn.write_raw_frame(&frame)?;
        Ok(())
    }

    /// Asks the Transport to disconnect. The close callback fires on the next frame event
    /// that observes the disconnect.
    pub fn close(&mut self) {
        self.conn.disconnect();
    }
}

impl fmt::Debug for WebSocket<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocket").field("open", &self.is_open()).finish()
    }
}

fn encode_frame(payload: &[u8], frame_type: FrameType) -> Vec<u8> {
    let len = payload.len();
    let header_len = match len {
        0..=125 => 2,
        126..=0xFFFF => 4,
        _ => 10,
    };

    let mut frame = Vec::with_capacity(header_len + len);
    frame.push(0x80 | frame_type.opcode());
    match (u8::try_from(len), u16::try_from(len)) {
        (Ok(short), _) if short <= 125 => frame.push(short),
        (_, Ok(medium)) => {
            frame.push(126);
            frame.extend_from_slice(&medium.to_be_bytes());
        }
        _ => {
            frame.push(127);
            frame.extend_from_slice(&u64::try_from(len).unwrap_or(u64::MAX).to_be_bytes());
        }
    }
    frame.extend_from_slice(payload);
    frame
}

type OpenFn = dyn Fn(&mut WebSocket<'_>) + Send + Sync;
type MessageFn = dyn Fn(&mut WebSocket<'_>, &[u8], FrameType) + Send + Sync;
type CloseFn = dyn Fn(&mut WebSocket<'_>) + Send + Sync;
type ErrorFn = dyn Fn(&mut WebSocket<'_>, &WebSocketError) + Send + Sync;

/// Callbacks of one WebSocket route. Every callback is optional.
#[derive(Clone, Default)]
pub struct WebSocketHandlers {
    on_open: Option<Arc<OpenFn>>,
    on_message: Option<Arc<MessageFn>>,
    on_close: Option<Arc<CloseFn>>,
    on_error: Option<Arc<ErrorFn>>,
}

impl WebSocketHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut WebSocket<'_>) + Send + Sync + 'static,
    {
        self.on_open = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_message<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut WebSocket<'_>, &[u8], FrameType) + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut WebSocket<'_>) + Send + Sync + 'static,
    {
        self.on_close = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut WebSocket<'_>, &WebSocketError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for WebSocketHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketHandlers")
            .field("on_open", &self.on_open.is_some())
            .field("on_message", &self.on_message.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// A WebSocket route plus the number of middleware entries registered before it.
#[derive(Debug, Clone)]
pub struct WebSocketRoute {
    route: Route<WebSocketHandlers>,
    registered_after: usize,
}

impl WebSocketRoute {
    pub(crate) fn new(pattern: &str, flags: RouteFlags, handlers: WebSocketHandlers, registered_after: usize) -> Self {
        Self { route: Route::new(pattern, MethodFilter::Any, flags, Arc::new(handlers)), registered_after }
    }

    pub fn pattern(&self) -> Option<&str> {
        self.route.pattern()
    }

    /// Middleware entries that precede this route and can intercept its upgrade requests.
    pub fn registered_after(&self) -> usize {
        self.registered_after
    }

    pub fn matches(&self, path: &str) -> bool {
        self.route.matches_path(path)
    }

    fn handlers(&self) -> &WebSocketHandlers {
        self.route.handler()
    }
}

/// Ordered WebSocket route table.
#[derive(Debug, Clone, Default)]
pub struct WebSocketRouter {
    routes: Vec<WebSocketRoute>,
}

impl WebSocketRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, route: WebSocketRoute) {
        self.routes.push(route);
    }

    /// The first route matching `path`.
    pub fn resolve(&self, path: &str) -> Option<&WebSocketRoute> {
        self.routes.iter().find(|route| route.matches(path))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Per-connection state of one routed WebSocket.
#[derive(Debug)]
pub struct WebSocketSession {
    route: WebSocketRoute,
    opened: bool,
    messages: u64,
    closed: bool,
}

impl WebSocketSession {
    pub(crate) fn new(route: WebSocketRoute) -> Self {
        Self { route, opened: false, messages: 0, closed: false }
    }

    pub fn pattern(&self) -> Option<&str> {
        self.route.pattern()
    }

    pub fn is_opened(&self) -> bool {
        self.opened
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn messages(&self) -> u64 {
        self.messages
    }

    pub(crate) fn handle_frame(&mut self, conn: &mut dyn WebSocketConnection, frame: FrameEvent<'_>) {
        let handlers = self.route.handlers();

        if !conn.is_websocket() {
            warn!(pattern = self.route.pattern(), "frame event on a connection that is not a websocket, rejecting");
            if let Some(on_error) = &handlers.on_error {
                on_error(&mut WebSocket::new(conn), &WebSocketError::NotUpgraded);
            }
            conn.reject(StatusCode::BAD_REQUEST);
            return;
        }

        if frame.payload.is_empty() {
            if !self.opened && self.messages == 0 {
                self.opened = true;
                debug!(pattern = self.route.pattern(), "websocket opened");
                if let Some(on_open) = &handlers.on_open {
                    on_open(&mut WebSocket::new(conn));
                }
            }
        } else {
            self.messages += 1;
            if let Some(on_message) = &handlers.on_message {
                on_message(&mut WebSocket::new(conn), frame.payload, frame.frame_type());
            }
        }

        if conn.is_disconnecting() && !self.closed {
            self.closed = true;
            debug!(pattern = self.route.pattern(), messages = self.messages, "websocket closed");
            if let Some(on_close) = &handlers.on_close {
                on_close(&mut WebSocket::new(conn));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackSocket;
    use std::sync::Mutex;

    type Events = Arc<Mutex<Vec<String>>>;

    fn recording_handlers(events: &Events) -> WebSocketHandlers {
        let (open, message, close, error) = (Arc::clone(events), Arc::clone(events), Arc::clone(events), Arc::clone(events));
        WebSocketHandlers::new()
            .on_open(move |_ws| open.lock().unwrap().push("open".to_owned()))
            .on_message(move |_ws, data, frame_type| {
                message.lock().unwrap().push(format!("message {frame_type:?} {}", String::from_utf8_lossy(data)));
            })
            .on_close(move |_ws| close.lock().unwrap().push("close".to_owned()))
            .on_error(move |_ws, e| error.lock().unwrap().push(format!("error {e}")))
    }

    fn session(events: &Events) -> WebSocketSession {
        WebSocketSession::new(WebSocketRoute::new("/chat", RouteFlags::NONE, recording_handlers(events), 0))
    }

    #[test]
    fn opcodes_map_to_frame_types() {
        assert_eq!(FrameType::from_opcode(0x1), FrameType::Text);
        assert_eq!(FrameType::from_opcode(0x2), FrameType::Binary);
        assert_eq!(FrameType::from_opcode(0x8), FrameType::Close);
        assert_eq!(FrameType::from_opcode(0x9), FrameType::Ping);
        assert_eq!(FrameType::from_opcode(0xA), FrameType::Pong);
        assert_eq!(FrameType::from_opcode(0x0), FrameType::Text);
        assert_eq!(FrameType::from_opcode(0x7), FrameType::Text);
    }

    #[test]
    fn frame_header_lengths() {
        let short = encode_frame(b"hi", FrameType::Text);
        assert_eq!(short, vec![0x81, 2, b'h', b'i']);

        let medium = encode_frame(&[0u8; 126], FrameType::Binary);
        assert_eq!(&medium[..4], &[0x82, 126, 0, 126]);
        assert_eq!(medium.len(), 4 + 126);

        let long = encode_frame(&vec![0u8; 70_000], FrameType::Binary);
        assert_eq!(&long[..2], &[0x82, 127]);
        assert_eq!(&long[2..10], &70_000u64.to_be_bytes());
        assert_eq!(long.len(), 10 + 70_000);
    }

    #[test]
    fn open_message_close_sequence() {
        let events = Events::default();
        let mut session = session(&events);
        let mut socket = LoopbackSocket::upgraded();

        session.handle_frame(&mut socket, FrameEvent::new(0x1, b""));
        session.handle_frame(&mut socket, FrameEvent::new(0x1, b"hello"));
        session.handle_frame(&mut socket, FrameEvent::new(0x2, b"raw"));
        socket.set_disconnecting(true);
        session.handle_frame(&mut socket, FrameEvent::new(0x1, b"bye"));
        session.handle_frame(&mut socket, FrameEvent::new(0x1, b""));

        assert_eq!(
            *events.lock().unwrap(),
            vec!["open", "message Text hello", "message Binary raw", "message Text bye", "close"]
        );
        assert!(session.is_opened());
        assert!(session.is_closed());
        assert_eq!(session.messages(), 3);
    }

    #[test]
    fn empty_frame_after_messages_is_not_an_open() {
        let events = Events::default();
        let mut session = session(&events);
        let mut socket = LoopbackSocket::upgraded();

        session.handle_frame(&mut socket, FrameEvent::new(0x1, b"first"));
        session.handle_frame(&mut socket, FrameEvent::new(0x1, b""));

        assert_eq!(*events.lock().unwrap(), vec!["message Text first"]);
        assert!(!session.is_opened());
    }

    #[test]
    fn non_websocket_connection_is_rejected() {
        let events = Events::default();
        let mut session = session(&events);
        let mut socket = LoopbackSocket::plain();

        session.handle_frame(&mut socket, FrameEvent::new(0x1, b"hello"));

        assert_eq!(*events.lock().unwrap(), vec![format!("error {}", WebSocketError::NotUpgraded)]);
        assert_eq!(socket.rejected(), Some(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn echo_writes_a_frame() {
        let handlers = WebSocketHandlers::new().on_message(|ws, data, frame_type| {
            assert!(ws.is_open());
            ws.send_frame(data, frame_type).unwrap();
        });
        let mut session = WebSocketSession::new(WebSocketRoute::new("/echo", RouteFlags::NONE, handlers, 0));
        let mut socket = LoopbackSocket::upgraded();

        session.handle_frame(&mut socket, FrameEvent::new(0x1, b"ping?"));
        assert_eq!(socket.written(), &[0x81, 5, b'p', b'i', b'n', b'g', b'?']);
    }

    #[test]
    fn send_requires_payload_and_open_connection() {
        let mut socket = LoopbackSocket::upgraded();
        let mut ws = WebSocket::new(&mut socket);
        assert!(matches!(ws.send(""), Err(WebSocketError::EmptyPayload)));
        ws.send("ok").unwrap();

        let mut closed = MockWebSocketConnection::new();
        closed.expect_is_websocket().return_const(true);
        closed.expect_has_frame_parser().return_const(false);
        closed.expect_write_raw_frame().never();
        let mut ws = WebSocket::new(&mut closed);
        assert!(!ws.is_open());
        assert!(matches!(ws.send_binary(b"late"), Err(WebSocketError::NotOpen)));
    }

    #[test]
    fn write_failures_surface() {
        let mut conn = MockWebSocketConnection::new();
        conn.expect_is_websocket().return_const(true);
        conn.expect_has_frame_parser().return_const(true);
        conn.expect_write_raw_frame().times(1).returning(|_| Err(TransportError::Closed));

        let mut ws = WebSocket::new(&mut conn);
        assert!(matches!(ws.send("x"), Err(WebSocketError::Transport { source: TransportError::Closed })));
    }

    #[test]
    fn close_asks_the_transport_to_disconnect() {
        let mut socket = LoopbackSocket::upgraded();
        WebSocket::new(&mut socket).close();
        assert!(socket.is_disconnecting());
    }

    #[test]
    fn router_resolves_first_match() {
        let mut router = WebSocketRouter::new();
        router.add(WebSocketRoute::new("/ws", RouteFlags::PREFIX, WebSocketHandlers::new(), 0));
        router.add(WebSocketRoute::new("/ws/chat", RouteFlags::NONE, WebSocketHandlers::new(), 2));

        assert_eq!(router.resolve("/ws/chat").and_then(WebSocketRoute::pattern), Some("/ws"));
        assert!(router.resolve("/other").is_none());
        assert_eq!(router.len(), 2);
    }
}
