use std::time::Instant;

use bytes::Bytes;
use http::StatusCode;
use http::header::CONTENT_TYPE;
use micro_chain::transport::LoopbackTransport;
use micro_chain::{Config, Next, Request, Response, Server, middleware_fn};
use serde::Deserialize;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Deserialize, Debug)]
pub struct User {
    name: String,
    zip: String,
}

fn timing(req: &mut Request, _res: &mut Response, next: &mut Next) {
    req.properties_mut().set_object("started", Instant::now());
    next.proceed();
}

fn auth(req: &mut Request, res: &mut Response, next: &mut Next) {
    match req.header("authorization") {
        Some(token) if token.starts_with("Bearer ") => {
            let user = token.trim_start_matches("Bearer ").to_owned();
            req.properties_mut().set("user", user);
            next.proceed();
        }
        _ => {
            let _ = res.end_with(StatusCode::UNAUTHORIZED, "missing bearer token\r\n");
        }
    }
}

// form body: name=hello&zip=world
fn create_user(req: &mut Request, res: &mut Response, _next: &mut Next) {
    let elapsed = req.properties().get_object::<Instant>("started").map(Instant::elapsed);
    let reply = match serde_urlencoded::from_bytes::<User>(req.body()) {
        Ok(user) => {
            let _ = res.set_header(CONTENT_TYPE, mime::TEXT_PLAIN_UTF_8.as_ref());
            let body = format!("{} created {:#?} in {:?}\r\n", req.properties().get_text("user"), user, elapsed);
            res.end_with(StatusCode::CREATED, body)
        }
        Err(e) => {
            warn!(cause = %e, "invalid form");
            res.end_with(StatusCode::BAD_REQUEST, format!("invalid form: {e}\r\n"))
        }
    };
    if let Err(e) = reply {
        warn!(cause = %e, "can't reply");
    }
}

fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let mut server = Server::with_config(LoopbackTransport::new(), Config::default());
    server
        .any("", middleware_fn(timing))
        .any_with("/users", middleware_fn(auth), micro_chain::router::RouteFlags::PREFIX)
        .post("/users", middleware_fn(create_user));

    server.listen_on("127.0.0.1", 8080, false).expect("loop should start");

    let requests = [
        http::Request::post("/users").header("authorization", "Bearer zava").body(()).unwrap(),
        http::Request::post("/users").body(()).unwrap(),
    ];
    for request in requests {
        let chunks = vec![Bytes::from_static(b"name=hello&"), Bytes::from_static(b"zip=world")];
        let reply = server.transport().submit(request.into(), chunks).recv().unwrap();
        info!(status = %reply.status, body = ?reply.body, "received reply");
    }

    let _ = server.stop();
}
