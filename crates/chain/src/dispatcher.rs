//! Walks the middleware table for one fully received request.
//!
//! The chain is driven by a cursor instead of nested continuations: each matching entry is
//! called with a fresh [`Next`], and the walk only moves on when the entry asked for it. A
//! long chain therefore never deepens the stack.

use http::StatusCode;
use tracing::{debug, trace, warn};

use crate::handler::Middleware;
use crate::request::Request;
use crate::response::Response;
use crate::router::Route;

/// Continuation handed to every [`Middleware`] call.
#[derive(Debug, Default)]
pub struct Next {
    requested: bool,
}

impl Next {
    /// Passes the request on to the next matching entry once the current call returns.
    #[inline]
    pub fn proceed(&mut self) {
        self.requested = true;
    }

    #[inline]
    pub fn is_requested(&self) -> bool {
        self.requested
    }
}

/// How a walk of the middleware table ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The table is empty; the response was finalized with 404.
    NotFound,
    /// The entry at `index` returned without calling [`Next::proceed`].
    Halted { index: usize },
    /// No entry is left to match.
    Exhausted,
    /// The response was finalized before the walk started, nothing was called.
    AlreadyFinalized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue { index: usize },
    Halt { index: usize },
    Exhausted,
}

pub(crate) struct Dispatcher<'t> {
    table: &'t [Route<dyn Middleware>],
    cursor: usize,
}

impl<'t> Dispatcher<'t> {
    pub(crate) fn new(table: &'t [Route<dyn Middleware>]) -> Self {
        Self { table, cursor: 0 }
    }

    pub(crate) fn run(mut self, req: &mut Request, res: &mut Response) -> DispatchOutcome {
        if res.is_finalized() {
            return DispatchOutcome::AlreadyFinalized;
        }

        if self.table.is_empty() {
            debug!(path = req.path(), "no middleware registered, replying 404");
            if let Err(e) = res.end(StatusCode::NOT_FOUND) {
                warn!(cause = %e, "can't send 404 reply");
            }
            return DispatchOutcome::NotFound;
        }

        loop {
            match self.advance(req, res) {
                Step::Continue { index } => trace!(index, "middleware passed the request on"),
                Step::Halt { index } => {
                    trace!(index, finalized = res.is_finalized(), "middleware chain halted");
                    return DispatchOutcome::Halted { index };
                }
                Step::Exhausted => {
                    trace!(finalized = res.is_finalized(), "middleware chain exhausted");
                    return DispatchOutcome::Exhausted;
                }
            }
        }
    }

    fn advance(&mut self, req: &mut Request, res: &mut Response) -> Step {
        let remaining = self.table.get(self.cursor..).unwrap_or_default();
        let Some(offset) = remaining.iter().position(|route| route.matches(req.method(), req.path())) else {
            self.cursor = self.table.len();
            return Step::Exhausted;
        };

        let index = self.cursor + offset;
        let route = &self.table[index];
        self.cursor = index + 1;

        req.set_middleware_path(route.shared_pattern());
        let mut next = Next::default();
        route.handler().call(req, res, &mut next);

        if next.is_requested() { Step::Continue { index } } else { Step::Halt { index } }
    }
}
