//! Middleware layer.
//!
//! Middleware intercepts requests and responses and is the right place for
//! cross-cutting concerns. A middleware is any
//! `Fn(Request, Next) -> impl Future<Output = impl IntoResponse>`, or a type
//! implementing [`Middleware`]. Layers run in registration order, outermost
//! first, and wrap route lookup, so even a 404 passes through them.
//!
//! Built-in middleware, in the order they are meant to be layered:
//!
//! | Layer | Does |
//! |---|---|
//! | [`logger`] | stamps the [`TraceContext`], emits one metadata record per request |
//! | [`recover`] | turns handler panics into a 500, or an abort when the client is gone |
//! | [`Capture`] | logs request/response bodies under a size cap |
//!
//! ```rust,no_run
//! use vigil::{Router, middleware};
//!
//! let app = Router::new()
//!     .layer(middleware::logger)
//!     .layer(middleware::recover)
//!     .layer(middleware::Capture::new().request_max(4096).response_max(4096));
//! ```

mod capture;
mod logger;
mod recover;
mod trace;

use std::future::Future;
use std::sync::Arc;

use crate::handler::BoxFuture;
use crate::request::Request;
use crate::response::IntoResponse;
use crate::router::Routes;

pub use capture::{Capture, CaptureBody};
pub use logger::{Metadata, logger};
pub use recover::{Fault, FaultKind, classify, recover};
pub use trace::{REQUEST_ID_HEADER, TraceContext, with_trace};

/// A request interceptor.
///
/// Call [`Next::run`] to continue the chain; skip it to short-circuit.
pub trait Middleware: Send + Sync + 'static {
    fn call(&self, req: Request, next: Next) -> BoxFuture;
}

impl<F, Fut, R> Middleware for F
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request, next: Next) -> BoxFuture {
        let fut = self(req, next);
        Box::pin(async move { fut.await.into_response() })
    }
}

pub(crate) type BoxedMiddleware = Arc<dyn Middleware>;

/// The rest of the chain after the current middleware.
pub struct Next {
    routes: Arc<Routes>,
    index: usize,
}

impl Next {
    pub(crate) fn new(routes: Arc<Routes>) -> Self {
        Self { routes, index: 0 }
    }

    /// Runs the remaining middleware and then the matched route.
    pub fn run(self, req: Request) -> BoxFuture {
        let Some(mw) = self.routes.middleware.get(self.index).cloned() else {
            return self.routes.route(req);
        };
        let next = Self { routes: self.routes, index: self.index + 1 };
        mw.call(req, next)
    }
}
