//! Route handlers and their erased form.
//!
//! Any `Fn(Request) -> impl Future<Output = impl IntoResponse>` is a
//! [`Handler`]. The router keeps each one as a shared closure returning a
//! [`BoxFuture`]. The handler itself is only invoked when that future is
//! first polled, so [`recover`](crate::middleware::recover) also sees panics
//! raised before a handler's first `.await`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::request::Request;
use crate::response::{IntoResponse, Response};

/// A boxed future resolving to a [`Response`]. Returned by every link of the
/// middleware chain.
pub type BoxFuture = Pin<Box<dyn Future<Output = Response> + Send + 'static>>;

#[doc(hidden)]
pub type BoxedHandler = Arc<dyn Fn(Request) -> BoxFuture + Send + Sync + 'static>;

/// Implemented for every valid route handler. Sealed.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        let handler = Arc::new(self);
        Arc::new(move |req: Request| -> BoxFuture {
            let handler = Arc::clone(&handler);
            Box::pin(async move { (*handler)(req).await.into_response() })
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::body::Body;

    fn get() -> Request {
        http::Request::builder().uri("/").body(Body::empty()).unwrap().into()
    }

    #[tokio::test]
    async fn handler_runs_on_first_poll() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handler = (move |_req: Request| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { "ok" }
        })
        .into_boxed_handler();

        let fut = handler(get());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let res = fut.await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(res.into_body().collect().await.unwrap(), "ok");
    }
}
