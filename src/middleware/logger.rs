//! Per-request metadata logging.

use std::time::{Duration, Instant, SystemTime};

use tracing::Instrument as _;

use super::Next;
use super::trace::with_trace;
use crate::error::Error;
use crate::request::Request;
use crate::response::Response;

/// The one structured record logged for every request.
///
/// Request-side fields are copied from the inbound request before any handler
/// sees it; `status` and `duration_ms` describe the final outcome.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metadata {
    pub status: u16,
    pub content_type: String,
    pub method: String,
    pub path: String,
    pub query: String,
    pub client_ip: String,
    pub user_agent: String,
    pub duration_ms: u64,
}

impl Metadata {
    pub fn from_request(req: &Request) -> Self {
        Self {
            content_type: req.content_type().unwrap_or_default().to_owned(),
            method: req.method().to_string(),
            path: req.path().to_owned(),
            query: req.query().to_owned(),
            client_ip: req.client_ip().unwrap_or_default(),
            user_agent: req.user_agent().unwrap_or_default().to_owned(),
            ..Self::default()
        }
    }

    pub fn finish(mut self, res: &Response, elapsed: Duration) -> Self {
        self.status = res.status_code().as_u16();
        self.duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Logs the record at `info`, with any errors the response carries.
    pub fn emit(&self, errors: &[Error]) {
        let errors = errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ");
        tracing::info!(
            status = self.status,
            content_type = %self.content_type,
            method = %self.method,
            path = %self.path,
            query = %self.query,
            client_ip = %self.client_ip,
            user_agent = %self.user_agent,
            duration_ms = self.duration_ms,
            errors = %errors,
            "request completed"
        );
    }
}

/// Stamps the [`TraceContext`](super::TraceContext), runs the rest of the
/// chain inside its span, then logs one [`Metadata`] record.
///
/// Register it first so it observes statuses set by [`recover`](super::recover).
pub async fn logger(mut req: Request, next: Next) -> Response {
    let started = Instant::now();
    let ctx = with_trace(&mut req, SystemTime::now());
    let meta = Metadata::from_request(&req);

    let span = ctx.span();
    let res = next.run(req).instrument(span.clone()).await;

    let meta = meta.finish(&res, started.elapsed());
    span.in_scope(|| meta.emit(res.errors()));
    res
}
