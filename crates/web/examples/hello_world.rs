use peregrine_web::{
    handler_fn, HandlerError, Request, RequestContext, Response, Router, Server,
};

fn hello<'r>(
    _request: &Request<'r>,
    _ctx: &mut RequestContext<'_, 'r>,
) -> Result<Response<'r>, HandlerError> {
    Ok(Response::ok("hello world"))
}

fn main() {
    let router = Router::builder()
        .get("/", handler_fn(hello))
        .build()
        .expect("route table must build");

    Server::builder()
        .port(8080)
        .router(router)
        .build()
        .expect("server must build")
        .run()
        .expect("server failed");
}
