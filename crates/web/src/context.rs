//! Per-request context handed to handlers and middleware.

use crate::params::PathParams;
use peregrine_http::arena::MonotonicArena;

/// Access to the connection arena and the captured path parameters.
///
/// `'s` is the routing-table lifetime, `'r` the request lifetime: anything
/// allocated from [`RequestContext::arena`] lives until the connection
/// resets after the response is written, so handlers can return
/// arena-backed response bodies without copying.
pub struct RequestContext<'s, 'r> {
    arena: &'r MonotonicArena,
    params: PathParams<'s, 'r>,
}

impl<'s, 'r> RequestContext<'s, 'r> {
    pub fn new(arena: &'r MonotonicArena, params: PathParams<'s, 'r>) -> Self {
        Self { arena, params }
    }

    pub fn arena(&self) -> &'r MonotonicArena {
        self.arena
    }

    pub fn params(&self) -> &PathParams<'s, 'r> {
        &self.params
    }

    /// Shorthand for `params().get(name)`.
    pub fn param(&self, name: &str) -> Option<&'r str> {
        self.params.get(name)
    }
}
