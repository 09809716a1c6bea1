use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use micro_chain::transport::LoopbackTransport;
use micro_chain::{Compression, Reply, Server, TransportError, middleware_fn, upload_fn};

#[derive(Debug, Copy, Clone)]
pub struct TestCase {
    name: &'static str,
    group: TestGroup,
    shape: ChainShape,
}

impl TestCase {
    pub fn new(name: &'static str, group: TestGroup, shape: ChainShape) -> Self {
        Self { name, group, shape }
    }

    pub fn small(name: &'static str, shape: ChainShape) -> Self {
        Self::new(name, TestGroup::Small, shape)
    }

    pub fn normal(name: &'static str, shape: ChainShape) -> Self {
        Self::new(name, TestGroup::Normal, shape)
    }

    pub fn large(name: &'static str, shape: ChainShape) -> Self {
        Self::new(name, TestGroup::Large, shape)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn group(&self) -> TestGroup {
        self.group
    }

    pub fn shape(&self) -> &ChainShape {
        &self.shape
    }

    /// A server whose chain has `passthrough` entries that call next, then one that replies.
    ///
    /// Half of the passthrough entries are registered on a path the request never hits, so
    /// the matcher has to skip them.
    pub fn server(&self) -> Server<LoopbackTransport> {
        let mut server = Server::new(LoopbackTransport::new());
        for i in 0..self.shape.passthrough {
            let path = if i % 2 == 0 { "" } else { "/never" };
            server.any(path, middleware_fn(|_req, _res, next| next.proceed()));
        }
        server.get(
            self.shape.path,
            middleware_fn(|_req, res, _next| {
                let _ = res.end_with(StatusCode::OK, Bytes::from_static(b"ok"));
            }),
        );
        server.upload(self.shape.path, upload_fn(|_req, chunk| {
            std::hint::black_box(chunk);
        }));
        server
    }
}

#[derive(Debug, Copy, Clone)]
pub struct ChainShape {
    path: &'static str,
    passthrough: usize,
}

impl ChainShape {
    pub const fn new(path: &'static str, passthrough: usize) -> Self {
        Self { path, passthrough }
    }

    pub fn path(&self) -> &'static str {
        self.path
    }

    pub fn passthrough(&self) -> usize {
        self.passthrough
    }
}

#[derive(Clone, Copy, Debug)]
pub enum TestGroup {
    Small,
    Normal,
    Large,
}

/// Discards replies.
#[derive(Debug, Default)]
pub struct NullReply;

impl Reply for NullReply {
    fn send_reply(
        &mut self,
        status: StatusCode,
        headers: &HeaderMap,
        body: Option<Bytes>,
        compression: Compression,
    ) -> Result<(), TransportError> {
        std::hint::black_box((status, headers, body, compression));
        Ok(())
    }
}
