use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use http::StatusCode;
use micro_chain::transport::LoopbackTransport;
use micro_chain::{Config, Server, middleware_fn, upload_fn};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::DEBUG).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let received = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&received);

    let mut server = Server::with_config(LoopbackTransport::new(), Config::builder().address("127.0.0.1").port(8080).build());
    server
        .upload(
            "/upload",
            upload_fn(move |req, chunk| {
                counter.fetch_add(chunk.len(), Ordering::Relaxed);
                let chunks = req.properties().get_integer("chunks");
                req.properties_mut().set("chunks", chunks + 1);
            }),
        )
        .post(
            "/upload",
            middleware_fn(|req, res, _next| {
                let body = format!("stored {} chunks, buffered {} bytes\r\n", req.properties().get_integer("chunks"), req.body().len());
                let _ = res.end_with(StatusCode::OK, body);
            }),
        );

    server.listen(false).expect("loop should start");

    let chunks = (1..=8).map(|i| Bytes::from(vec![b'x'; i * 1024])).collect();
    let head = http::Request::post("/upload").body(()).unwrap().into();
    let reply = server.transport().submit(head, chunks).recv().unwrap();
    info!(status = %reply.status, body = ?reply.body, total = received.load(Ordering::Relaxed), "upload finished");

    let _ = server.stop();
}
