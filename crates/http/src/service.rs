//! The seam between the runtime and the routing layer.
//!
//! The connection driver hands a completed request view and the
//! connection's arena to a [`Service`] and serializes whatever response
//! comes back. Routing errors never cross this boundary: the service maps
//! them to problem responses itself, so from the driver's perspective every
//! dispatch succeeds.

use crate::arena::MonotonicArena;
use crate::protocol::{Request, Response};

pub trait Service: Send + Sync {
    /// Produces the response for one request.
    ///
    /// The response may borrow from the request view or the arena; the
    /// driver serializes it before either is reset. Handlers run
    /// synchronously on the reactor thread — long work belongs on a
    /// separate pool.
    fn handle<'r>(&self, request: &Request<'r>, arena: &'r MonotonicArena) -> Response<'r>;
}

/// Function-backed service.
#[derive(Debug)]
pub struct ServiceFn<F> {
    f: F,
}

impl<F> Service for ServiceFn<F>
where
    F: for<'r> Fn(&Request<'r>, &'r MonotonicArena) -> Response<'r> + Send + Sync,
{
    fn handle<'r>(&self, request: &Request<'r>, arena: &'r MonotonicArena) -> Response<'r> {
        (self.f)(request, arena)
    }
}

/// Wraps a function or closure as a [`Service`].
pub fn service_fn<F>(f: F) -> ServiceFn<F>
where
    F: for<'r> Fn(&Request<'r>, &'r MonotonicArena) -> Response<'r> + Send + Sync,
{
    ServiceFn { f }
}
