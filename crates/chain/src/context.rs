use crate::request::Request;
use crate::response::Response;

/// Where a request is in its lifecycle.
///
/// There is no `Destroyed` state: [`Pipeline::on_finished`](crate::Pipeline::on_finished)
/// takes the context by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Created,
    BodyAccumulating,
    Dispatching,
    Finalized,
}

/// Everything that belongs to one in-flight request.
///
/// Created by [`Pipeline::on_headers`](crate::Pipeline::on_headers), held by the Transport
/// between events, and dropped by [`Pipeline::on_finished`](crate::Pipeline::on_finished).
#[derive(Debug)]
pub struct Context {
    pub(crate) request: Request,
    pub(crate) response: Response,
    pub(crate) upload_buffer: Vec<u8>,
    phase: ContextState,
}

impl Context {
    pub(crate) fn new(request: Request, response: Response) -> Self {
        Self { request, response, upload_buffer: Vec::new(), phase: ContextState::Created }
    }

    pub fn state(&self) -> ContextState {
        if self.response.is_finalized() { ContextState::Finalized } else { self.phase }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub(crate) fn enter(&mut self, phase: ContextState) {
        self.phase = phase;
    }

    pub(crate) fn parts_mut(&mut self) -> (&mut Request, &mut Response) {
        (&mut self.request, &mut self.response)
    }
}
