use http::StatusCode;
use micro_chain::transport::LoopbackTransport;
use micro_chain::{Config, Server, middleware_fn};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::DEBUG).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let config = Config::builder().address("127.0.0.1").port(3000).thread_count(2).build();
    let mut server = Server::with_config(LoopbackTransport::new(), config);

    server
        .get(
            "/",
            middleware_fn(|_req, res, _next| {
                let _ = res.end_with(StatusCode::OK, "hello world");
            }),
        )
        .any(
            "",
            middleware_fn(|_req, res, _next| {
                let _ = res.end_with(StatusCode::NOT_FOUND, "404 not found");
            }),
        );

    server.listen(false).expect("loop should start");

    for path in ["/", "/missing"] {
        let head = http::Request::get(path).body(()).unwrap().into();
        let reply = server.transport().submit(head, Vec::new()).recv().unwrap();
        info!(path, status = %reply.status, body = ?reply.body, "received reply");
    }

    let _ = server.stop();
}
