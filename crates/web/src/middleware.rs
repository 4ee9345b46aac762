//! Composable middleware chains.
//!
//! A middleware wraps the rest of the chain through [`Next`]: work before
//! `next.run(..)` is the before-phase, work after it is the after-phase,
//! and returning without calling it short-circuits the handler entirely.
//! Handler failures travel back through every enclosing after-phase as
//! ordinary `Err` values.

use crate::context::RequestContext;
use crate::handler::{Handler, HandlerError};
use peregrine_http::protocol::{Request, Response};
use std::sync::Arc;

pub trait Middleware: Send + Sync {
    fn handle<'r>(
        &self,
        request: &Request<'r>,
        ctx: &mut RequestContext<'_, 'r>,
        next: Next<'_>,
    ) -> Result<Response<'r>, HandlerError>;
}

/// The remainder of a chain: the middleware still to run, terminated by the
/// route handler. Consumed by `run`, so it can be invoked at most once.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    handler: &'a dyn Handler,
}

impl<'a> Next<'a> {
    pub(crate) fn new(chain: &'a [Arc<dyn Middleware>], handler: &'a dyn Handler) -> Self {
        Self { chain, handler }
    }

    /// Invokes the next middleware, or the handler at the end of the chain.
    pub fn run<'r>(
        self,
        request: &Request<'r>,
        ctx: &mut RequestContext<'_, 'r>,
    ) -> Result<Response<'r>, HandlerError> {
        match self.chain.split_first() {
            Some((middleware, rest)) => {
                middleware.handle(request, ctx, Next { chain: rest, handler: self.handler })
            }
            None => self.handler.invoke(request, ctx),
        }
    }
}

/// Function-backed middleware.
pub struct MiddlewareFn<F> {
    f: F,
}

impl<F> Middleware for MiddlewareFn<F>
where
    F: for<'r> Fn(
            &Request<'r>,
            &mut RequestContext<'_, 'r>,
            Next<'_>,
        ) -> Result<Response<'r>, HandlerError>
        + Send
        + Sync,
{
    fn handle<'r>(
        &self,
        request: &Request<'r>,
        ctx: &mut RequestContext<'_, 'r>,
        next: Next<'_>,
    ) -> Result<Response<'r>, HandlerError> {
        (self.f)(request, ctx, next)
    }
}

/// Wraps a function or closure as middleware.
pub fn middleware_fn<F>(f: F) -> MiddlewareFn<F>
where
    F: for<'r> Fn(
            &Request<'r>,
            &mut RequestContext<'_, 'r>,
            Next<'_>,
        ) -> Result<Response<'r>, HandlerError>
        + Send
        + Sync,
{
    MiddlewareFn { f }
}
