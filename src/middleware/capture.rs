//! Request and response body logging.

use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::{Bytes, BytesMut};
use http_body::{Body as HttpBody, Frame, SizeHint};
use tracing::Span;

use super::{Middleware, Next};
use crate::body::Body;
use crate::error::BoxError;
use crate::handler::BoxFuture;
use crate::request::Request;
use crate::response::Response;

/// Logs request and response bodies smaller than a configured size.
///
/// A max of zero (the default) leaves that side alone. Both limits are fixed
/// when the middleware is built.
///
/// The request body is only read when its declared length is below the limit
/// and it is not a multipart form; the handler then gets an in-memory copy of
/// the same bytes. Any other request with a known length is logged as too
/// long, multipart forms included. The response body is wrapped in a [`CaptureBody`], which
/// passes every byte through untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct Capture {
    request_max: u64,
    response_max: u64,
}

impl Capture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_max(mut self, max: u64) -> Self {
        self.request_max = max;
        self
    }

    pub fn response_max(mut self, max: u64) -> Self {
        self.response_max = max;
        self
    }

    async fn run(self, mut req: Request, next: Next) -> Response {
        if self.request_max > 0 {
            self.capture_request(&mut req).await;
        }

        let res = next.run(req).await;

        if self.response_max == 0 {
            return res;
        }
        let max = self.response_max;
        res.map_body(|body| Body::new(CaptureBody::new(body, max)))
    }

    async fn capture_request(&self, req: &mut Request) {
        // No Content-Length: only a body already known to be empty counts as 0.
        let declared = req
            .content_length()
            .or_else(|| req.body().is_end_stream().then_some(0));
        let Some(len) = declared else {
            tracing::debug!("request of unknown length not captured");
            return;
        };
        if len >= self.request_max || req.content_type().is_some_and(is_multipart) {
            tracing::info!("request {len} is too long");
            return;
        }

        match req.take_body().collect().await {
            Ok(bytes) => {
                tracing::info!("[Request]{}", String::from_utf8_lossy(&bytes));
                req.set_body(bytes);
            }
            Err(err) => {
                tracing::warn!(error = %err, "request body read failed");
                req.set_body(Body::failed(err));
            }
        }
    }
}

impl Middleware for Capture {
    fn call(&self, req: Request, next: Next) -> BoxFuture {
        Box::pin(self.run(req, next))
    }
}

fn is_multipart(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|essence| essence.trim().eq_ignore_ascii_case("multipart/form-data"))
}

// ── Response decorator ────────────────────────────────────────────────────────

/// A body that forwards every frame of `B` unchanged while keeping a copy.
///
/// When `B` ends, or the decorator is dropped first, it logs the copy if the
/// total is below `max` and only the size otherwise. It logs exactly once and
/// stops buffering as soon as the limit is reached.
pub struct CaptureBody<B = Body> {
    inner: B,
    buf: BytesMut,
    seen: u64,
    max: u64,
    span: Span,
    logged: bool,
}

impl<B> CaptureBody<B> {
    /// Wraps `inner`. Log lines are emitted inside the span current at
    /// construction time.
    pub fn new(inner: B, max: u64) -> Self {
        Self {
            inner,
            buf: BytesMut::new(),
            seen: 0,
            max,
            span: Span::current(),
            logged: false,
        }
    }

    fn record(&mut self, chunk: &Bytes) {
        self.seen = self.seen.saturating_add(chunk.len() as u64);
        if self.seen < self.max {
            self.buf.extend_from_slice(chunk);
        } else if !self.buf.is_empty() {
            self.buf = BytesMut::new();
        }
    }

    fn finish(&mut self) {
        if self.logged {
            return;
        }
        self.logged = true;

        let _enter = self.span.enter();
        if self.seen < self.max {
            tracing::info!("[Response]{}", String::from_utf8_lossy(&self.buf));
        } else {
            tracing::info!("response {} is too long", self.seen);
        }
    }
}

impl<B> HttpBody for CaptureBody<B>
where
    B: HttpBody<Data = Bytes> + Unpin,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, B::Error>>> {
        let this = self.get_mut();
        let frame = ready!(Pin::new(&mut this.inner).poll_frame(cx));
        match &frame {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    this.record(data);
                }
            }
            Some(Err(_)) => {}
            None => this.finish(),
        }
        Poll::Ready(frame)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<B> Drop for CaptureBody<B> {
    fn drop(&mut self) {
        self.finish();
    }
}
