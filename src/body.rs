//! Request and response bodies.
//!
//! [`Body`] is a type-erased [`http_body::Body`]: a hyper `Incoming` stream on
//! the way in, a buffer or a [`BodyWriter`] channel on the way out. Both sides
//! are read once. Middleware that needs the bytes twice (see
//! [`Capture`](crate::middleware::Capture)) collects them and puts a fresh
//! buffer back.

use std::convert::Infallible;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body::{Body as HttpBody, Frame, SizeHint};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use tokio::sync::mpsc;

use crate::error::{BoxError, Error};

/// Chunks a [`BodyWriter`] may queue before `write` waits for the client.
const CHANNEL_CAPACITY: usize = 16;

/// A streaming HTTP body.
pub struct Body(UnsyncBoxBody<Bytes, BoxError>);

impl Body {
    /// Erases any `http_body::Body` with `Bytes` chunks.
    pub fn new<B>(body: B) -> Self
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Self(body.map_err(Into::into).boxed_unsync())
    }

    pub fn empty() -> Self {
        Self::new(Empty::<Bytes>::new())
    }

    /// A body fed by the returned [`BodyWriter`]. The body ends when the
    /// writer is dropped.
    pub fn channel() -> (BodyWriter, Self) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        (BodyWriter { tx }, Self::new(ChannelBody { rx }))
    }

    /// A body whose first poll yields `err`.
    pub(crate) fn failed(err: Error) -> Self {
        Self::new(Failed(Some(err.into())))
    }

    /// Reads the whole body into memory.
    pub async fn collect(self) -> Result<Bytes, Error> {
        self.0
            .collect()
            .await
            .map(|collected| collected.to_bytes())
            .map_err(Error::from_body)
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body").finish_non_exhaustive()
    }
}

impl HttpBody for Body {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, BoxError>>> {
        Pin::new(&mut self.0).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.0.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.0.size_hint()
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::new(Full::new(bytes))
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Bytes::from(bytes).into()
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Bytes::from(s).into()
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Bytes::from_static(s.as_bytes()).into()
    }
}

impl From<hyper::body::Incoming> for Body {
    fn from(incoming: hyper::body::Incoming) -> Self {
        Self::new(incoming)
    }
}

// ── Streaming writer ──────────────────────────────────────────────────────────

/// Write half of [`Body::channel`].
///
/// Every write becomes one data frame. Once the client is gone (the body was
/// dropped) writes fail with [`io::ErrorKind::BrokenPipe`].
#[derive(Debug)]
pub struct BodyWriter {
    tx: mpsc::Sender<Bytes>,
}

impl BodyWriter {
    pub async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !buf.is_empty() {
            self.tx
                .send(Bytes::copy_from_slice(buf))
                .await
                .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        }
        Ok(buf.len())
    }

    pub async fn write_str(&mut self, s: &str) -> io::Result<usize> {
        self.write(s.as_bytes()).await
    }
}

struct ChannelBody {
    rx: mpsc::Receiver<Bytes>,
}

impl HttpBody for ChannelBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Infallible>>> {
        self.rx.poll_recv(cx).map(|chunk| chunk.map(|b| Ok(Frame::data(b))))
    }
}

struct Failed(Option<BoxError>);

impl HttpBody for Failed {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, BoxError>>> {
        Poll::Ready(self.0.take().map(Err))
    }
}
