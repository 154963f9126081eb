//! Middleware pipeline — composable before/after request handler logic.
//!
//! Each middleware wraps the next layer, enabling request inspection,
//! short-circuit responses, and response decoration without coupling route
//! handlers to infrastructure concerns. The innermost layer is always the
//! handler of the matched route.
//!
//! ## Core types
//!
//! - [`Middleware`] — trait implemented by all middleware.
//! - [`Next`] — cursor into the remaining chain; call [`Next::run`] to advance.
//! - [`MiddlewareHandler`] — type-erased, cheaply-cloneable middleware function.
//! - [`LoggerMiddleware`] — built-in request/response logger.

use std::{future::Future, pin::Pin, sync::Arc};
use tokio::time::Instant;

use crate::{Response, context::Context, router::Handler};

/// A type-erased, reference-counted middleware function.
pub type MiddlewareHandler = Arc<
    dyn Fn(Context, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static,
>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed by [`run`](Self::run), so a middleware can forward a
/// request at most once. When every layer has been passed, the route
/// handler itself runs.
pub struct Next {
    layers: Arc<[MiddlewareHandler]>,
    // Index of the layer the next `run` call invokes.
    index: usize,
    endpoint: Handler,
}

impl Next {
    /// Creates a cursor at the start of `layers`, ending in `endpoint`.
    pub fn new(layers: Arc<[MiddlewareHandler]>, endpoint: Handler) -> Self {
        Self {
            layers,
            index: 0,
            endpoint,
        }
    }

    /// Invokes the next layer, or the endpoint once the layers are exhausted.
    pub async fn run(mut self, ctx: Context) -> Response {
        if let Some(layer) = self.layers.get(self.index).cloned() {
            self.index += 1;
            layer(ctx, self).await
        } else {
            (self.endpoint)(ctx).await
        }
    }
}

/// The core trait for all middleware.
///
/// Implementors may pass through (`next.run(ctx).await`), short-circuit by
/// returning a [`Response`] directly, or decorate the downstream response.
///
/// Implementations must be `Send + Sync` because the pipeline is shared across
/// connection tasks, and must not hold `&mut` references to shared state across
/// an `.await` point.
pub trait Middleware: Send + Sync {
    /// Handle the request and optionally delegate to the next layer.
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

/// Logs each request's method, path, status, and time-to-response.
///
/// For streamed responses the duration covers the time until the headers are
/// ready, not the lifetime of the stream.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().as_str().to_string();
            let path = ctx.request().path().to_string();

            let response = next.run(ctx).await;

            tracing::info!(
                method = %method,
                path = %path,
                status = response.status().as_u16(),
                streaming = response.is_streaming(),
                elapsed = ?start.elapsed(),
                "request handled"
            );

            response
        })
    }
}
