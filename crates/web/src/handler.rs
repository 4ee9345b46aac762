//! Handler trait and handler-originated errors.

use crate::context::RequestContext;
use peregrine_http::protocol::{ProblemDetails, Request, Response};
use thiserror::Error;

/// A request handler.
///
/// Handlers run synchronously on the reactor thread and may borrow from the
/// request or allocate from the context arena; the returned response is
/// serialized before either is reset. Plain functions and closures are
/// adapted with [`handler_fn`].
pub trait Handler: Send + Sync {
    fn invoke<'r>(
        &self,
        request: &Request<'r>,
        ctx: &mut RequestContext<'_, 'r>,
    ) -> Result<Response<'r>, HandlerError>;
}

/// Function-backed handler.
pub struct HandlerFn<F> {
    f: F,
}

impl<F> Handler for HandlerFn<F>
where
    F: for<'r> Fn(&Request<'r>, &mut RequestContext<'_, 'r>) -> Result<Response<'r>, HandlerError>
        + Send
        + Sync,
{
    fn invoke<'r>(
        &self,
        request: &Request<'r>,
        ctx: &mut RequestContext<'_, 'r>,
    ) -> Result<Response<'r>, HandlerError> {
        (self.f)(request, ctx)
    }
}

/// Wraps a function or closure as a [`Handler`].
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: for<'r> Fn(&Request<'r>, &mut RequestContext<'_, 'r>) -> Result<Response<'r>, HandlerError>
        + Send
        + Sync,
{
    HandlerFn { f }
}

/// A handler failure; the wrapped problem becomes the response body.
#[derive(Error, Debug)]
#[error("handler failed with status {}", .problem.status())]
pub struct HandlerError {
    problem: ProblemDetails,
}

impl HandlerError {
    pub fn internal(detail: impl Into<String>) -> Self {
        Self { problem: ProblemDetails::internal_error(detail) }
    }

    pub fn problem(&self) -> &ProblemDetails {
        &self.problem
    }

    pub fn into_problem(self) -> ProblemDetails {
        self.problem
    }
}

impl From<ProblemDetails> for HandlerError {
    fn from(problem: ProblemDetails) -> Self {
        Self { problem }
    }
}
