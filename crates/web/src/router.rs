//! Routing table: linear scoring scan with a semantics-preserving static
//! fast path.
//!
//! Dispatch strips the query, matches every route whose pattern fits the
//! path, and picks the highest priority score (ties go to the earlier
//! declaration). A path that matches some pattern but no method yields
//! `MethodNotAllowed` carrying the union of methods declared for that path,
//! which becomes the `Allow` header. HEAD requests fall back to the GET
//! handler where no explicit HEAD route exists.
//!
//! The fast path is a hash table over fully literal paths whose per-method
//! resolutions are precomputed by running the linear scan at build time —
//! it returns identical results for every input by construction, and
//! parameterized paths simply miss the table and take the scan.

use crate::handler::Handler;
use crate::middleware::{Middleware, Next};
use crate::params::PathParams;
use crate::pattern::{PathPattern, PatternError};
use crate::{HandlerError, RequestContext};
use http::header::HeaderValue;
use http::Method;
use peregrine_http::protocol::{Request, Response};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// The routable methods, alphabetical so `Allow` renders by walking bits in
/// order.
static METHOD_ORDER: [Method; 7] = [
    Method::DELETE,
    Method::GET,
    Method::HEAD,
    Method::OPTIONS,
    Method::PATCH,
    Method::POST,
    Method::PUT,
];

const METHOD_COUNT: usize = 7;

fn method_index(method: &Method) -> Option<usize> {
    METHOD_ORDER.iter().position(|m| m == method)
}

/// Bitset of methods declared for a path; answers 405 without re-scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MethodSet(u8);

impl MethodSet {
    pub const EMPTY: MethodSet = MethodSet(0);

    pub fn insert(&mut self, method: &Method) {
        if let Some(index) = method_index(method) {
            self.0 |= 1 << index;
        }
    }

    pub fn contains(&self, method: &Method) -> bool {
        method_index(method).is_some_and(|index| self.0 & (1 << index) != 0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn union(self, other: MethodSet) -> MethodSet {
        MethodSet(self.0 | other.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static Method> + '_ {
        METHOD_ORDER
            .iter()
            .enumerate()
            .filter(move |(index, _)| self.0 & (1 << index) != 0)
            .map(|(_, method)| method)
    }

    /// `Allow` header value: sorted alphabetically, de-duplicated,
    /// comma-space joined.
    pub fn to_header_value(&self) -> HeaderValue {
        HeaderValue::from_str(&self.to_string()).expect("method names are valid header values")
    }
}

impl fmt::Display for MethodSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for method in self.iter() {
            if !first {
                f.write_str(", ")?;
            }
            f.write_str(method.as_str())?;
            first = false;
        }
        Ok(())
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteError {
    #[error("no route matches the request path")]
    NotFound,

    #[error("method not allowed; allowed: {0}")]
    MethodNotAllowed(MethodSet),
}

/// One table entry: method, pattern, handler, middleware chain.
pub struct Route {
    method: Method,
    pattern: PathPattern,
    handler: Box<dyn Handler>,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

impl Route {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    /// Runs the middleware chain around the handler.
    pub fn run<'r>(
        &self,
        request: &Request<'r>,
        ctx: &mut RequestContext<'_, 'r>,
    ) -> Result<Response<'r>, HandlerError> {
        Next::new(&self.middleware, &*self.handler).run(request, ctx)
    }
}

#[derive(Debug, Clone, Copy)]
enum FastResolution {
    Route(u32),
    MethodNotAllowed,
}

struct FastEntry {
    by_method: [FastResolution; METHOD_COUNT],
    allow: MethodSet,
}

/// Immutable routing table, built once at startup.
pub struct Router {
    routes: Vec<Route>,
    fast: HashMap<String, FastEntry>,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder { specs: Vec::new(), global_middleware: Vec::new() }
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Resolves a request to its route, filling `params` with the winning
    /// route's captures. `target` may carry a query string; it is stripped
    /// before matching.
    pub fn dispatch<'s, 'r>(
        &'s self,
        method: &Method,
        target: &'r str,
        params: &mut PathParams<'s, 'r>,
    ) -> Result<&'s Route, RouteError> {
        let path = strip_query(target);

        if let Some(entry) = self.fast.get(path) {
            if let Some(index) = method_index(method) {
                return match entry.by_method[index] {
                    FastResolution::Route(route_index) => {
                        let route = &self.routes[route_index as usize];
                        // A static key can resolve to a parameterized route
                        // for methods the static route does not declare.
                        if route.pattern.is_static() {
                            params.clear();
                        } else {
                            route.pattern.capture(path, params);
                        }
                        Ok(route)
                    }
                    FastResolution::MethodNotAllowed => {
                        Err(RouteError::MethodNotAllowed(entry.allow))
                    }
                };
            }
            // Extension methods are not indexable; take the scan.
        }

        scan(&self.routes, method, path, params).map(|(_, route)| route)
    }

    /// Linear reference resolution, bypassing the fast path. The fast path
    /// must agree with this for every input.
    pub fn dispatch_linear<'s, 'r>(
        &'s self,
        method: &Method,
        target: &'r str,
        params: &mut PathParams<'s, 'r>,
    ) -> Result<&'s Route, RouteError> {
        scan(&self.routes, method, strip_query(target), params).map(|(_, route)| route)
    }
}

fn strip_query(target: &str) -> &str {
    match target.find('?') {
        Some(at) => &target[..at],
        None => target,
    }
}

/// The reference match algorithm: O(routes x segments).
fn scan<'s, 'r>(
    routes: &'s [Route],
    method: &Method,
    path: &'r str,
    params: &mut PathParams<'s, 'r>,
) -> Result<(usize, &'s Route), RouteError> {
    let mut allow = MethodSet::EMPTY;
    let mut path_matched = false;
    let mut best: Option<(usize, u32, bool)> = None;

    for (index, route) in routes.iter().enumerate() {
        if !route.pattern.matches(path) {
            continue;
        }
        path_matched = true;
        allow.insert(&route.method);

        let exact = route.method == *method;
        let head_fallback = !exact && *method == Method::HEAD && route.method == Method::GET;
        if !exact && !head_fallback {
            continue;
        }

        let score = route.pattern.score();
        let better = match best {
            None => true,
            // Strict comparisons keep the earliest declaration on ties; an
            // exact method beats the HEAD->GET fallback at equal score.
            Some((_, best_score, best_exact)) => {
                score > best_score || (score == best_score && exact && !best_exact)
            }
        };
        if better {
            best = Some((index, score, exact));
        }
    }

    match best {
        Some((index, _, _)) => {
            let route = &routes[index];
            route.pattern.capture(path, params);
            Ok((index, route))
        }
        None if path_matched => Err(RouteError::MethodNotAllowed(allow)),
        None => Err(RouteError::NotFound),
    }
}

struct RouteSpec {
    method: Method,
    path: &'static str,
    handler: Box<dyn Handler>,
    middleware: Vec<Arc<dyn Middleware>>,
}

#[derive(Error, Debug)]
pub enum RouterBuildError {
    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("method {0} cannot be routed")]
    UnsupportedMethod(Method),
}

/// Collects routes and middleware; `build` parses every pattern and aborts
/// on the first error, so a bad table never reaches the accept loop.
pub struct RouterBuilder {
    specs: Vec<RouteSpec>,
    global_middleware: Vec<Arc<dyn Middleware>>,
}

impl RouterBuilder {
    pub fn route(
        mut self,
        method: Method,
        path: &'static str,
        handler: impl Handler + 'static,
    ) -> Self {
        self.specs.push(RouteSpec {
            method,
            path,
            handler: Box::new(handler),
            middleware: Vec::new(),
        });
        self
    }

    /// Like `route`, with a middleware chain wrapping this route only.
    pub fn route_with(
        mut self,
        method: Method,
        path: &'static str,
        handler: impl Handler + 'static,
        middleware: Vec<Arc<dyn Middleware>>,
    ) -> Self {
        self.specs.push(RouteSpec { method, path, handler: Box::new(handler), middleware });
        self
    }

    /// Appends middleware that wraps every route, outermost first.
    pub fn middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.global_middleware.push(Arc::new(middleware));
        self
    }

    pub fn get(self, path: &'static str, handler: impl Handler + 'static) -> Self {
        self.route(Method::GET, path, handler)
    }

    pub fn post(self, path: &'static str, handler: impl Handler + 'static) -> Self {
        self.route(Method::POST, path, handler)
    }

    pub fn put(self, path: &'static str, handler: impl Handler + 'static) -> Self {
        self.route(Method::PUT, path, handler)
    }

    pub fn delete(self, path: &'static str, handler: impl Handler + 'static) -> Self {
        self.route(Method::DELETE, path, handler)
    }

    pub fn patch(self, path: &'static str, handler: impl Handler + 'static) -> Self {
        self.route(Method::PATCH, path, handler)
    }

    pub fn head(self, path: &'static str, handler: impl Handler + 'static) -> Self {
        self.route(Method::HEAD, path, handler)
    }

    pub fn options(self, path: &'static str, handler: impl Handler + 'static) -> Self {
        self.route(Method::OPTIONS, path, handler)
    }

    pub fn build(self) -> Result<Router, RouterBuildError> {
        let RouterBuilder { specs, global_middleware } = self;

        let mut routes = Vec::with_capacity(specs.len());
        for spec in specs {
            if method_index(&spec.method).is_none() {
                return Err(RouterBuildError::UnsupportedMethod(spec.method));
            }
            let pattern = PathPattern::parse(spec.path)?;

            let mut chain = global_middleware.clone();
            chain.extend(spec.middleware);

            routes.push(Route { method: spec.method, pattern, handler: spec.handler, middleware: chain });
        }

        let fast = build_fast(&routes);
        Ok(Router { routes, fast })
    }
}

/// Precomputes per-method resolutions for every fully literal path by
/// running the reference scan, making the hash lookup provably equivalent.
fn build_fast(routes: &[Route]) -> HashMap<String, FastEntry> {
    let mut fast = HashMap::new();

    for route in routes.iter().filter(|route| route.pattern.is_static()) {
        let path = route.pattern.raw();
        if fast.contains_key(path) {
            continue;
        }

        let mut allow = MethodSet::EMPTY;
        for candidate in routes {
            if candidate.pattern.matches(path) {
                allow.insert(&candidate.method);
            }
        }

        let mut by_method = [FastResolution::MethodNotAllowed; METHOD_COUNT];
        for (index, method) in METHOD_ORDER.iter().enumerate() {
            let mut scratch = PathParams::empty();
            if let Ok((route_index, _)) = scan(routes, method, path, &mut scratch) {
                by_method[index] = FastResolution::Route(route_index as u32);
            }
        }

        fast.insert(path.to_string(), FastEntry { by_method, allow });
    }

    fast
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use peregrine_http::arena::MonotonicArena;
    use peregrine_http::parser::HttpParser;
    use peregrine_http::ParserLimits;
    use std::sync::Mutex;

    /// Handler returning a fixed body, for telling winners apart.
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

    fn parse_request(raw: &str) -> HttpParser {
        let mut parser = HttpParser::new(ParserLimits::default());
        parser.parse(raw.as_bytes()).unwrap();
        assert!(parser.is_complete());
        parser
    }

    fn body_text(response: &Response<'_>) -> String {
        let mut buf = peregrine_http::buffer::IoBuffer::new();
        response.serialize_into(&mut buf, true);
        let text = String::from_utf8(buf.readable().to_vec()).unwrap();
        text.split("\r\n\r\n").nth(1).unwrap_or("").to_string()
    }

    #[test]
    fn prefers_static_over_params() {
        let router = Router::builder()
            .get("/users/me", Tag("me"))
            .get("/users/{id}", Tag("param"))
            .build()
            .unwrap();

        let mut params = PathParams::empty();
        let route = router.dispatch(&Method::GET, "/users/me", &mut params).unwrap();
        assert_eq!(route.pattern().raw(), "/users/me");
        assert!(params.is_empty());

        let route = router.dispatch(&Method::GET, "/users/42", &mut params).unwrap();
        assert_eq!(route.pattern().raw(), "/users/{id}");
        assert_eq!(params.get("id"), Some("42"));
    }

    #[test]
    fn declaration_order_breaks_ties() {
        let router = Router::builder()
            .get("/items/{a}", Tag("first"))
            .get("/items/{b}", Tag("second"))
            .build()
            .unwrap();

        let mut params = PathParams::empty();
        let route = router.dispatch(&Method::GET, "/items/1", &mut params).unwrap();
        assert_eq!(params.get("a"), Some("1"));
        assert_eq!(route.pattern().raw(), "/items/{a}");
    }

    #[test]
    fn method_not_allowed_carries_the_union_mask() {
        let router = Router::builder()
            .get("/items/{id}", Tag("get"))
            .post("/items/{id}", Tag("post"))
            .delete("/items/{id}", Tag("delete"))
            .build()
            .unwrap();

        let mut params = PathParams::empty();
        let err = router.dispatch(&Method::PUT, "/items/1", &mut params).unwrap_err();
        let RouteError::MethodNotAllowed(allow) = err else {
            panic!("expected MethodNotAllowed");
        };
        assert_eq!(allow.to_string(), "DELETE, GET, POST");
    }

    #[test]
    fn not_found_for_unmatched_path() {
        let router = Router::builder().get("/items/{id}", Tag("get")).build().unwrap();

        let mut params = PathParams::empty();
        assert_eq!(
            router.dispatch(&Method::GET, "/missing", &mut params).unwrap_err(),
            RouteError::NotFound
        );
    }

    #[test]
    fn query_is_stripped_before_matching() {
        let router =
            Router::builder().get("/orders/{orderId}/items/{itemId}", Tag("ok")).build().unwrap();

        let mut params = PathParams::empty();
        let route =
            router.dispatch(&Method::GET, "/orders/abc/items/99?foo=bar", &mut params).unwrap();
        assert_eq!(route.pattern().raw(), "/orders/{orderId}/items/{itemId}");
        assert_eq!(params.len(), 2);
        assert_eq!(params.get("orderId"), Some("abc"));
        assert_eq!(params.get("itemId"), Some("99"));
    }

    #[test]
    fn head_falls_back_to_get_unless_declared() {
        let router = Router::builder()
            .get("/resource", Tag("get"))
            .get("/explicit", Tag("get"))
            .head("/explicit", Tag("head"))
            .build()
            .unwrap();

        let mut params = PathParams::empty();
        let route = router.dispatch(&Method::HEAD, "/resource", &mut params).unwrap();
        assert_eq!(route.method(), &Method::GET);

        let route = router.dispatch(&Method::HEAD, "/explicit", &mut params).unwrap();
        assert_eq!(route.method(), &Method::HEAD);
    }

    #[test]
    fn middleware_runs_in_order_around_the_handler() {
        let trace: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        struct Tracing {
            label_before: &'static str,
            label_after: &'static str,
            trace: Arc<Mutex<Vec<&'static str>>>,
        }

        impl Middleware for Tracing {
            fn handle<'r>(
                &self,
                request: &Request<'r>,
                ctx: &mut RequestContext<'_, 'r>,
                next: Next<'_>,
            ) -> Result<Response<'r>, HandlerError> {
                self.trace.lock().unwrap().push(self.label_before);
                let result = next.run(request, ctx);
                self.trace.lock().unwrap().push(self.label_after);
                result
            }
        }

        struct TracingHandler(Arc<Mutex<Vec<&'static str>>>);

        impl Handler for TracingHandler {
            fn invoke<'r>(
                &self,
                _request: &Request<'r>,
                _ctx: &mut RequestContext<'_, 'r>,
            ) -> Result<Response<'r>, HandlerError> {
                self.0.lock().unwrap().push("handler");
                Ok(Response::ok("ok"))
            }
        }

        let router = Router::builder()
            .route_with(
                Method::GET,
                "/chain",
                TracingHandler(Arc::clone(&trace)),
                vec![
                    Arc::new(Tracing {
                        label_before: "m1-before",
                        label_after: "m1-after",
                        trace: Arc::clone(&trace),
                    }),
                    Arc::new(Tracing {
                        label_before: "m2-before",
                        label_after: "m2-after",
                        trace: Arc::clone(&trace),
                    }),
                ],
            )
            .build()
            .unwrap();

        let parser = parse_request("GET /chain HTTP/1.1\r\n\r\n");
        let request = parser.request();
        let arena = MonotonicArena::new();

        let mut params = PathParams::empty();
        let route = router.dispatch(request.method(), request.uri(), &mut params).unwrap();
        let mut ctx = RequestContext::new(&arena, params);
        let response = route.run(&request, &mut ctx).unwrap();

        assert_eq!(body_text(&response), "ok");
        assert_eq!(
            *trace.lock().unwrap(),
            vec!["m1-before", "m2-before", "handler", "m2-after", "m1-after"]
        );
    }

    #[test]
    fn middleware_can_short_circuit() {
        let blocker = middleware_short_circuit();

        let router = Router::builder()
            .route_with(Method::GET, "/blocked", Tag("handler"), vec![blocker])
            .build()
            .unwrap();

        let parser = parse_request("GET /blocked HTTP/1.1\r\n\r\n");
        let request = parser.request();
        let arena = MonotonicArena::new();

        let mut params = PathParams::empty();
        let route = router.dispatch(request.method(), request.uri(), &mut params).unwrap();
        let mut ctx = RequestContext::new(&arena, params);
        let response = route.run(&request, &mut ctx).unwrap();

        assert_eq!(body_text(&response), "blocked");
    }

    fn middleware_short_circuit() -> Arc<dyn Middleware> {
        struct Block;
        impl Middleware for Block {
            fn handle<'r>(
                &self,
                _request: &Request<'r>,
                _ctx: &mut RequestContext<'_, 'r>,
                _next: Next<'_>,
            ) -> Result<Response<'r>, HandlerError> {
                Ok(Response::ok("blocked"))
            }
        }
        Arc::new(Block)
    }

    #[test]
    fn handler_fn_adapts_plain_functions() {
        fn hello<'r>(
            _request: &Request<'r>,
            ctx: &mut RequestContext<'_, 'r>,
        ) -> Result<Response<'r>, HandlerError> {
            let name = ctx.param("name").unwrap_or("anonymous");
            Ok(Response::ok(name))
        }

        let router = Router::builder().get("/hello/{name}", handler_fn(hello)).build().unwrap();

        let parser = parse_request("GET /hello/world HTTP/1.1\r\n\r\n");
        let request = parser.request();
        let arena = MonotonicArena::new();

        let mut params = PathParams::empty();
        let route = router.dispatch(request.method(), request.uri(), &mut params).unwrap();
        let mut ctx = RequestContext::new(&arena, params);
        let response = route.run(&request, &mut ctx).unwrap();
        assert_eq!(body_text(&response), "world");
    }

    #[test]
    fn build_rejects_bad_patterns() {
        let result = Router::builder().get("no-slash", Tag("x")).build();
        assert!(matches!(result, Err(RouterBuildError::Pattern(_))));
    }

    #[test]
    fn fast_path_agrees_with_linear_scan() {
        let router = Router::builder()
            .get("/users/me", Tag("me"))
            .get("/users/{id}", Tag("user"))
            .post("/users/{id}", Tag("create"))
            .get("/items", Tag("items"))
            .delete("/items", Tag("delete-items"))
            .get("/orders/{id}/lines", Tag("lines"))
            .build()
            .unwrap();

        let methods =
            [Method::GET, Method::HEAD, Method::POST, Method::PUT, Method::DELETE, Method::PATCH];
        let paths = [
            "/users/me",
            "/users/42",
            "/users/me?q=1",
            "/items",
            "/items/",
            "/orders/7/lines",
            "/missing",
            "/",
        ];

        for method in &methods {
            for path in &paths {
                let mut fast_params = PathParams::empty();
                let mut linear_params = PathParams::empty();

                let fast = router.dispatch(method, path, &mut fast_params);
                let linear = router.dispatch_linear(method, path, &mut linear_params);

                match (fast, linear) {
                    (Ok(a), Ok(b)) => {
                        assert_eq!(a.pattern().raw(), b.pattern().raw(), "{method} {path}");
                        assert_eq!(a.method(), b.method(), "{method} {path}");
                        let fast_caps: Vec<_> = fast_params.iter().collect();
                        let linear_caps: Vec<_> = linear_params.iter().collect();
                        assert_eq!(fast_caps, linear_caps, "{method} {path}");
                    }
                    (Err(a), Err(b)) => assert_eq!(a, b, "{method} {path}"),
                    (a, b) => panic!(
                        "fast/linear disagree for {method} {path}: {:?} vs {:?}",
                        a.map(|r| r.pattern().raw()),
                        b.map(|r| r.pattern().raw())
                    ),
                }
            }
        }
    }

    #[test]
    fn static_key_resolves_param_route_for_other_methods() {
        // POST /users/me has no static route; the fast entry must fall
        // through to the parameterized one and still capture `id`.
        let router = Router::builder()
            .get("/users/me", Tag("me"))
            .post("/users/{id}", Tag("create"))
            .build()
            .unwrap();

        let mut params = PathParams::empty();
        let route = router.dispatch(&Method::POST, "/users/me", &mut params).unwrap();
        assert_eq!(route.pattern().raw(), "/users/{id}");
        assert_eq!(params.get("id"), Some("me"));
    }
}
