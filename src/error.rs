//! Unified error type.

use std::fmt;
use std::io;

/// Boxed error used for body streams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type returned by vigil's fallible operations.
///
/// Application-level errors (404, 422, etc.) are expressed as HTTP
/// [`Response`](crate::Response) values, not as `Error`s. This type surfaces
/// infrastructure failures: binding, signal setup, body streams, and clients
/// that went away mid-response.
#[derive(Debug)]
pub enum Error {
    /// Socket or signal setup failed.
    Io(io::Error),
    /// The listener could not bind its address.
    Bind { addr: String, source: io::Error },
    /// The HTTP transport reported a failure.
    Hyper(hyper::Error),
    /// A body stream failed.
    Body(BoxError),
    /// The client closed the connection before the response was written.
    Disconnected(String),
    /// The listener task died without being asked to stop.
    Listener(String),
}

impl Error {
    /// Wraps an arbitrary body error, unboxing the variants we know about.
    pub(crate) fn from_body(err: BoxError) -> Self {
        match err.downcast::<hyper::Error>() {
            Ok(e) => Self::Hyper(*e),
            Err(err) => match err.downcast::<io::Error>() {
                Ok(e) => Self::Io(*e),
                Err(err) => Self::Body(err),
            },
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io: {e}"),
            Self::Bind { addr, source } => write!(f, "listen {addr}: {source}"),
            Self::Hyper(e) => write!(f, "http: {e}"),
            Self::Body(e) => write!(f, "body: {e}"),
            Self::Disconnected(msg) => write!(f, "client disconnected: {msg}"),
            Self::Listener(msg) => write!(f, "listener: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) | Self::Bind { source: e, .. } => Some(e),
            Self::Hyper(e) => Some(e),
            Self::Body(e) => Some(e.as_ref()),
            Self::Disconnected(_) | Self::Listener(_) => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<hyper::Error> for Error {
    fn from(e: hyper::Error) -> Self {
        Self::Hyper(e)
    }
}
