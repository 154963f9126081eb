//! Request routing — map URL patterns and HTTP methods to handler functions.
//!
//! [`Router`] dispatches incoming requests based on method and path. Two
//! pattern styles are supported:
//!
//! | Pattern     | Example match        | Captured params          |
//! |-------------|----------------------|--------------------------|
//! | `/api/chat` | `/api/chat`          | *(none)*                 |
//! | `/api/*`    | `/api/models/list`   | `wildcard → "/models/list"` |
//!
//! Trailing slashes are normalized on both patterns and incoming paths.
//! Routes are matched in registration order; the first route whose method and
//! pattern both match wins. Unmatched requests go to the fallback handler when
//! one is set, and get `404 Not Found` otherwise. Every dispatched request,
//! fallback included, passes through the registered middleware layers.

use std::pin::Pin;
use std::sync::Arc;

use crate::context::{Context, PathParams};
use crate::middleware::{Middleware, MiddlewareHandler, Next, from_middleware};
use crate::{Method, Request, Response, StatusCode};

/// Type-erased, heap-allocated async handler that turns a [`Context`] into a
/// [`Response`].
pub type Handler =
    Arc<dyn Fn(Context) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Any `Fn(Context) -> impl Future<Output = Response> + Send` that is also
/// `Send + Sync + 'static` implements this automatically.
pub trait IntoHandler: Send + Sync + 'static {
    /// Call the handler with the given context, boxing the returned future.
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin((self)(ctx))
    }
}

fn into_handler(handler: impl IntoHandler) -> Handler {
    Arc::new(move |ctx: Context| handler.call(ctx))
}

fn trim_trailing_slash(path: &str) -> &str {
    if path != "/" && path.ends_with('/') {
        &path[..path.len() - 1]
    } else {
        path
    }
}

// Compiled representation of a route pattern string.
#[derive(Debug, Clone)]
enum Pattern {
    // Matches one exact path, e.g. `/api/chat`.
    Exact(String),
    // Matches any path under the prefix, e.g. `/api/*`.
    Wildcard(String),
}

impl Pattern {
    fn parse(pattern: &str) -> Self {
        let pattern = trim_trailing_slash(pattern);
        match pattern.strip_suffix("/*") {
            Some(prefix) => Pattern::Wildcard(prefix.to_string()),
            None => Pattern::Exact(pattern.to_string()),
        }
    }

    fn matches(&self, path: &str) -> Option<PathParams> {
        let path = trim_trailing_slash(path);

        match self {
            Pattern::Exact(p) => (p == path).then(PathParams::new),
            Pattern::Wildcard(prefix) => {
                let suffix = path.strip_prefix(prefix.as_str())?;
                // `/api/*` matches neither `/apix` nor the bare `/api`.
                if !suffix.starts_with('/') {
                    return None;
                }
                let mut params = PathParams::new();
                params.insert("wildcard".to_string(), suffix.to_string());
                Some(params)
            }
        }
    }
}

// A registered route. `method == None` matches every method.
struct Route {
    method: Option<Method>,
    pattern: Pattern,
    handler: Handler,
}

impl Route {
    fn matches(&self, method: &Method, path: &str) -> Option<PathParams> {
        match &self.method {
            Some(m) if m != method => None,
            _ => self.pattern.matches(path),
        }
    }
}

/// HTTP request router.
///
/// # Examples
///
/// ```rust,no_run
/// use chatrelay::{Router, Response, StatusCode, context::Context};
///
/// let mut router = Router::new();
/// router.post("/api/chat", |_ctx: Context| async { Response::new(StatusCode::Ok) });
/// router.any("/api/*", |_ctx: Context| async { Response::new(StatusCode::NotFound) });
/// router.fallback(|_ctx: Context| async { Response::new(StatusCode::Ok).body("asset") });
/// ```
pub struct Router {
    routes: Vec<Route>,
    fallback: Option<Handler>,
    layers: Vec<MiddlewareHandler>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// Create a new, empty `Router`.
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            fallback: None,
            layers: Vec::new(),
        }
    }

    /// Register a handler for `POST` requests matching `path`.
    pub fn post(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Some(Method::Post), path, handler);
    }

    /// Register a handler for requests matching `path` regardless of method.
    pub fn any(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(None, path, handler);
    }

    /// Set the handler for requests no route matched.
    pub fn fallback(&mut self, handler: impl IntoHandler) {
        self.fallback = Some(into_handler(handler));
    }

    /// Append a middleware layer. The first layer added is the outermost.
    pub fn layer<M: Middleware + 'static>(&mut self, middleware: M) {
        self.layers.push(from_middleware(Arc::new(middleware)));
    }

    fn add_route(&mut self, method: Option<Method>, path: &str, handler: impl IntoHandler) {
        self.routes.push(Route {
            method,
            pattern: Pattern::parse(path),
            handler: into_handler(handler),
        });
    }

    /// Return the number of routes registered (the fallback is not counted).
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Return `true` if no routes have been registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Freeze the router into a cheaply cloneable [`Service`].
    pub fn into_service(self) -> Service {
        Service {
            inner: Arc::new(Frozen {
                routes: self.routes,
                fallback: self.fallback,
                layers: Arc::from(self.layers),
            }),
        }
    }
}

struct Frozen {
    routes: Vec<Route>,
    fallback: Option<Handler>,
    layers: Arc<[MiddlewareHandler]>,
}

/// A finished router, shared by every connection task.
#[derive(Clone)]
pub struct Service {
    inner: Arc<Frozen>,
}

impl Service {
    /// Dispatch `request` through the middleware layers to the first matching
    /// route, the fallback, or a `404 Not Found` responder.
    pub async fn route(&self, request: Request) -> Response {
        let matched = self
            .inner
            .routes
            .iter()
            .find_map(|r| r.matches(request.method(), request.path()).map(|p| (r, p)));

        let (endpoint, params) = match matched {
            Some((route, params)) => (route.handler.clone(), params),
            None => match &self.inner.fallback {
                Some(fallback) => (fallback.clone(), PathParams::new()),
                None => (not_found(), PathParams::new()),
            },
        };

        let ctx = Context::with_params(request, params);
        Next::new(self.inner.layers.clone(), endpoint).run(ctx).await
    }
}

fn not_found() -> Handler {
    into_handler(|_ctx: Context| async { Response::new(StatusCode::NotFound).body("Not found") })
}
