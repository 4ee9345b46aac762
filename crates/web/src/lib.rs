mod context;
mod handler;
mod middleware;
mod params;
mod pattern;
mod router;
mod server;
mod service;

pub use context::RequestContext;
pub use handler::{handler_fn, Handler, HandlerError, HandlerFn};
pub use middleware::{middleware_fn, Middleware, MiddlewareFn, Next};
pub use params::{PathParams, MAX_PARAMS};
pub use pattern::{PathPattern, PatternError, Segment, MAX_SEGMENTS};
pub use router::{MethodSet, Route, RouteError, Router, RouterBuildError, RouterBuilder};
pub use server::{Server, ServerBuildError, ServerBuilder};
pub use service::{dispatch_or_problem, RouterService};

pub use peregrine_http::arena::MonotonicArena;
pub use peregrine_http::config::{ParserLimits, ServerConfig};
pub use peregrine_http::protocol::{Body, ProblemDetails, Request, Response};
pub use peregrine_http::server::{HttpServer, ServerError, ServerHandle};
