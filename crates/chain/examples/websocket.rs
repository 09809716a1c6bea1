use micro_chain::transport::{LoopbackSocket, LoopbackTransport};
use micro_chain::websocket::{FrameEvent, WebSocketHandlers};
use micro_chain::{Server, middleware_fn};
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::DEBUG).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let echo = WebSocketHandlers::new()
        .on_open(|ws| {
            let _ = ws.send("welcome");
        })
        .on_message(|ws, data, frame_type| {
            if let Err(e) = ws.send_frame(data, frame_type) {
                warn!(cause = %e, "echo failed");
            }
        })
        .on_close(|_ws| info!("client left"));

    let mut server = Server::new(LoopbackTransport::new());
    // websocket routes go before the catch-all, or the catch-all takes the upgrade
    server.websocket("/echo", echo).any("", middleware_fn(|_req, _res, next| next.proceed()));

    let pipeline = server.pipeline();
    let head = http::Request::get("/echo").body(()).unwrap().into();
    let Some(mut session) = pipeline.websocket_session(&head) else {
        warn!("no websocket route for /echo");
        return;
    };

    let mut socket = LoopbackSocket::upgraded();
    pipeline.on_websocket_frame(&mut session, &mut socket, FrameEvent::new(0x1, b""));
    pipeline.on_websocket_frame(&mut session, &mut socket, FrameEvent::new(0x1, b"hello"));
    socket.set_disconnecting(true);
    pipeline.on_websocket_frame(&mut session, &mut socket, FrameEvent::new(0x2, b"bye"));

    info!(bytes = socket.written().len(), messages = session.messages(), "session done");
}
