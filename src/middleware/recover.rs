//! Panic recovery.
//!
//! A panic below [`recover`] never reaches the connection task. It is
//! classified first: a client that hung up mid-response is not a bug and gets
//! no stack trace, everything else does.

use std::any::Any;
use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::io;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt as _;
use http::StatusCode;

use super::Next;
use crate::error::{BoxError, Error};
use crate::request::Request;
use crate::response::Response;

const DISCONNECT_MARKERS: [&str; 2] = ["broken pipe", "connection reset by peer"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultKind {
    /// The peer closed the connection; nothing can be written back.
    ClientDisconnect,
    /// Anything else: a bug in the handler chain.
    Unexpected,
}

/// A classified panic payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fault {
    pub kind: FaultKind,
    /// The payload rendered for logs.
    pub message: String,
}

/// Classifies a panic payload.
///
/// Client disconnects are recognised only when the payload is an error from a
/// network operation (`io::Error`, `hyper::Error`, [`Error`] or a boxed
/// error), an `io::Error` sits somewhere in its source chain, and that
/// error's message mentions a broken pipe or a connection reset by peer.
/// Every other shape, strings included, is [`FaultKind::Unexpected`].
pub fn classify(payload: &(dyn Any + Send)) -> Fault {
    let err = network_error(payload);
    let kind = match err {
        Some(err) if is_disconnect(err) => FaultKind::ClientDisconnect,
        _ => FaultKind::Unexpected,
    };
    let message = match err {
        Some(err) => err.to_string(),
        None => panic_message(payload),
    };
    Fault { kind, message }
}

fn network_error(payload: &(dyn Any + Send)) -> Option<&(dyn StdError + 'static)> {
    if let Some(e) = payload.downcast_ref::<io::Error>() {
        return Some(e);
    }
    if let Some(e) = payload.downcast_ref::<hyper::Error>() {
        return Some(e);
    }
    if let Some(e) = payload.downcast_ref::<Error>() {
        return Some(e);
    }
    if let Some(e) = payload.downcast_ref::<BoxError>() {
        return Some(e.as_ref());
    }
    None
}

fn is_disconnect(err: &(dyn StdError + 'static)) -> bool {
    let mut cur = Some(err);
    while let Some(e) = cur {
        if let Some(io) = e.downcast_ref::<io::Error>() {
            let msg = io.to_string().to_lowercase();
            if DISCONNECT_MARKERS.iter().any(|m| msg.contains(m)) {
                return true;
            }
        }
        cur = e.source();
    }
    false
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

/// Runs the rest of the chain and converts a panic into a terminal response.
///
/// - client disconnect: logged without a stack, the response is
///   [aborted](Response::aborted) so no status line is attempted;
/// - anything else: logged with a stack trace, answered with `500`.
pub async fn recover(req: Request, next: Next) -> Response {
    let dump = req.dump();
    let path = req.path().to_owned();

    // Built inside the guarded future so panics while assembling the rest of
    // the chain are caught too.
    let rest = async move { next.run(req).await };
    let payload = match AssertUnwindSafe(rest).catch_unwind().await {
        Ok(res) => return res,
        Err(payload) => payload,
    };

    let fault = classify(&*payload);
    match fault.kind {
        FaultKind::ClientDisconnect => {
            tracing::error!(path = %path, error = %fault.message, request = %dump, "client disconnected");
            Response::aborted(Error::Disconnected(fault.message))
        }
        FaultKind::Unexpected => {
            let stack = Backtrace::force_capture();
            tracing::error!(
                path = %path,
                error = %fault.message,
                request = %dump,
                stack = %stack,
                "recover from panic"
            );
            Response::status(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
