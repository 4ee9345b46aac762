//! Router-backed [`Service`] implementation.
//!
//! Maps routing outcomes onto the wire: handler responses pass through,
//! `NotFound`/`MethodNotAllowed` and handler errors become RFC 7807
//! problem responses, and 405 carries the `Allow` header derived from the
//! path's method mask.

use crate::context::RequestContext;
use crate::params::PathParams;
use crate::router::{RouteError, Router};
use http::header::ALLOW;
use peregrine_http::arena::MonotonicArena;
use peregrine_http::protocol::{ProblemDetails, Request, Response};
use peregrine_http::service::Service;
use tracing::warn;

/// Resolves and runs the matching route, turning every failure into a
/// complete problem response.
pub fn dispatch_or_problem<'s, 'r>(
    router: &'s Router,
    request: &Request<'r>,
    arena: &'r MonotonicArena,
) -> Response<'r> {
    let mut params = PathParams::empty();
    match router.dispatch(request.method(), request.uri(), &mut params) {
        Ok(route) => {
            let mut ctx = RequestContext::new(arena, params);
            match route.run(request, &mut ctx) {
                Ok(response) => response,
                Err(error) => {
                    warn!(uri = request.uri(), cause = %error, "handler failed");
                    error.into_problem().to_response()
                }
            }
        }
        Err(RouteError::NotFound) => ProblemDetails::not_found().to_response(),
        Err(RouteError::MethodNotAllowed(allow)) => {
            let mut response = ProblemDetails::method_not_allowed().to_response();
            response.set_header(ALLOW, allow.to_header_value());
            response
        }
    }
}

/// Adapts a [`Router`] to the runtime's [`Service`] seam.
pub struct RouterService {
    router: Router,
}

impl RouterService {
    pub fn new(router: Router) -> Self {
        Self { router }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }
}

impl Service for RouterService {
    fn handle<'r>(&self, request: &Request<'r>, arena: &'r MonotonicArena) -> Response<'r> {
        dispatch_or_problem(&self.router, request, arena)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{Handler, HandlerError};
    use crate::router::Router;
    use http::header::CONTENT_TYPE;
    use http::{Method, StatusCode};
    use peregrine_http::buffer::IoBuffer;
    use peregrine_http::parser::HttpParser;
    use peregrine_http::ParserLimits;

    struct Tag(&'static str);

    impl Handler for Tag {
        fn invoke<'r>(
            &self,
            _request: &Request<'r>,
            _ctx: &mut RequestContext<'_, 'r>,
        ) -> Result<Response<'r>, HandlerError> {
            Ok(Response::ok(self.0))
        }
    }

    fn router() -> Router {
        Router::builder()
            .get("/items/{id}", Tag("get"))
            .post("/items/{id}", Tag("post"))
            .delete("/items/{id}", Tag("delete"))
            .build()
            .unwrap()
    }

    fn respond(raw: &str) -> String {
        let mut parser = HttpParser::new(ParserLimits::default());
        parser.parse(raw.as_bytes()).unwrap();
        assert!(parser.is_complete());

        let arena = MonotonicArena::new();
        let request = parser.request();
        let response = dispatch_or_problem(&router(), &request, &arena);

        let mut buf = IoBuffer::new();
        response.serialize_into(&mut buf, true);
        String::from_utf8(buf.readable().to_vec()).unwrap()
    }

    #[test]
    fn put_gets_405_with_allow_header_and_problem_body() {
        let text = respond("PUT /items/1 HTTP/1.1\r\n\r\n");
        assert!(text.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
        assert!(text.contains("allow: DELETE, GET, POST\r\n"));
        assert!(text.contains("content-type: application/problem+json\r\n"));
        assert!(text.contains(r#""status":405"#));
    }

    #[test]
    fn missing_path_gets_404_problem() {
        let text = respond("GET /missing HTTP/1.1\r\n\r\n");
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains(r#""title":"Not Found""#));
        assert!(text.contains(r#""status":404"#));
    }

    #[test]
    fn matched_route_runs_its_handler() {
        let text = respond("GET /items/9 HTTP/1.1\r\n\r\n");
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("get"));
    }

    #[test]
    fn handler_error_becomes_problem_response() {
        struct Failing;
        impl Handler for Failing {
            fn invoke<'r>(
                &self,
                _request: &Request<'r>,
                _ctx: &mut RequestContext<'_, 'r>,
            ) -> Result<Response<'r>, HandlerError> {
                Err(HandlerError::internal("backend unavailable"))
            }
        }

        let router = Router::builder().route(Method::GET, "/fail", Failing).build().unwrap();

        let mut parser = HttpParser::new(ParserLimits::default());
        parser.parse(b"GET /fail HTTP/1.1\r\n\r\n").unwrap();
        let arena = MonotonicArena::new();
        let request = parser.request();

        let response = dispatch_or_problem(&router, &request, &arena);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.header_value(&CONTENT_TYPE).unwrap().to_str().unwrap(),
            "application/problem+json"
        );
    }
}
