//! A small API showing routing, path parameters and middleware.
//!
//! ```text
//! curl http://127.0.0.1:8080/users/me
//! curl http://127.0.0.1:8080/users/42
//! curl -X PUT http://127.0.0.1:8080/users/42     # 405 + Allow
//! ```

use peregrine_web::{
    handler_fn, middleware_fn, HandlerError, Request, RequestContext, Response, Router, Server,
    ServerConfig,
};
use tracing::info;

fn current_user<'r>(
    _request: &Request<'r>,
    _ctx: &mut RequestContext<'_, 'r>,
) -> Result<Response<'r>, HandlerError> {
    Ok(Response::ok("the current user"))
}

fn user_by_id<'r>(
    _request: &Request<'r>,
    ctx: &mut RequestContext<'_, 'r>,
) -> Result<Response<'r>, HandlerError> {
    let id = ctx.param("id").unwrap_or("unknown");
    Ok(Response::ok(id))
}

fn create_user<'r>(
    request: &Request<'r>,
    ctx: &mut RequestContext<'_, 'r>,
) -> Result<Response<'r>, HandlerError> {
    let body = ctx.arena().alloc_bytes(request.body());
    Ok(Response::new(http::StatusCode::CREATED).body(body))
}

fn request_logger<'r>(
    request: &Request<'r>,
    ctx: &mut RequestContext<'_, 'r>,
    next: peregrine_web::Next<'_>,
) -> Result<Response<'r>, HandlerError> {
    let result = next.run(request, ctx);
    info!(method = %request.method(), uri = request.uri(), "handled request");
    result
}

fn main() {
    let router = Router::builder()
        .middleware(middleware_fn(request_logger))
        .get("/users/me", handler_fn(current_user))
        .get("/users/{id}", handler_fn(user_by_id))
        .post("/users", handler_fn(create_user))
        .build()
        .expect("route table must build");

    let config = ServerConfig { port: 8080, ..ServerConfig::default() };

    Server::builder()
        .config(config)
        .router(router)
        .build()
        .expect("server must build")
        .run()
        .expect("server failed");
}
