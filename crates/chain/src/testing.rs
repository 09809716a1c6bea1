//! Shared fixtures for in-crate tests.

use std::sync::mpsc::{self, Receiver};

use http::Method;

use crate::process;
use crate::request::{Request, RequestHead};
use crate::response::Response;
use crate::transport::{ChannelReply, LoopbackTransport, RecordedReply, Reply};

pub(crate) fn head(method: Method, uri: &str) -> RequestHead {
    http::Request::builder().method(method).uri(uri).body(()).unwrap().into()
}

pub(crate) fn reply() -> (Box<dyn Reply>, Receiver<RecordedReply>) {
    let (tx, rx) = mpsc::channel();
    (Box::new(ChannelReply::new(tx)), rx)
}

pub(crate) fn exchange(method: Method, uri: &str) -> (Request, Response, Receiver<RecordedReply>) {
    let (reply, replies) = reply();
    let mime_types = process::bootstrap::<LoopbackTransport>().mime_types();
    (Request::new(head(method, uri)), Response::new(reply, mime_types), replies)
}
