//! Trace and session identity for one request.

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::Span;
use uuid::Uuid;

use crate::request::Request;

/// Inbound header carrying the caller's trace id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Identity of one request, stored in its extensions.
///
/// A trace id may be shared by many hops; the session id is minted for every
/// request this process handles. Neither changes once stamped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceContext {
    trace_id: String,
    session_id: String,
    session_birth: i64,
}

impl TraceContext {
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// When handling started, in nanoseconds since the Unix epoch (UTC).
    pub fn session_birth(&self) -> i64 {
        self.session_birth
    }

    /// A span carrying the identity fields; events inside it inherit them.
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "request",
            trace_id = %self.trace_id,
            session_id = %self.session_id,
            session_birth = self.session_birth,
        )
    }
}

/// Stamps `req` with a [`TraceContext`] and returns a copy of it.
///
/// The session id is always a fresh UUID. The trace id comes from
/// [`REQUEST_ID_HEADER`] when the caller sent a non-empty one; otherwise this
/// is the root hop and the trace id is the session id. Any context already on
/// the request is replaced.
pub fn with_trace(req: &mut Request, birth: SystemTime) -> TraceContext {
    let session_id = Uuid::new_v4().to_string();
    let trace_id = req
        .header(REQUEST_ID_HEADER)
        .filter(|v| !v.is_empty())
        .map_or_else(|| session_id.clone(), str::to_owned);

    let ctx = TraceContext {
        trace_id,
        session_id,
        session_birth: unix_nanos(birth),
    };
    req.extensions_mut().insert(ctx.clone());
    ctx
}

fn unix_nanos(at: SystemTime) -> i64 {
    at.duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
}
