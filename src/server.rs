//! HTTP server and graceful shutdown.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──serve()──▶ Serving ──signal──▶ Draining ──▶ Stopped
//!                      │                               ▲
//!                      └──────── listener failed ──────┘
//! ```
//!
//! The listener (bind + accept loop) runs in its own task, so a bind failure
//! arrives as an event next to the OS signals instead of as an early return.
//! Whichever comes first decides how the server stops; the other is ignored.
//!
//! # Graceful shutdown and Kubernetes
//!
//! When Kubernetes terminates a pod it sends **SIGTERM** and waits
//! `terminationGracePeriodSeconds` (default 30 s) before sending SIGKILL.
//! On a signal the server:
//! 1. releases its signal subscription, so a second signal gets the default
//!    action and kills the process;
//! 2. stops accepting connections;
//! 3. lets in-flight requests finish and closes idle keep-alive connections;
//! 4. gives up after [`Server::shutdown_timeout`], dropping whatever is still
//!    open, and returns from [`Server::serve`].
//!
//! Keep the timeout below the grace period. Dropped connections take their
//! HTTP/2 streams with them: streams run on an executor owned by the
//! connections, not detached on the runtime.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::rt::Executor;
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use hyper_util::server::graceful::GracefulShutdown;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info};

use crate::body::Body;
use crate::error::Error;
use crate::request::Request;
use crate::router::Router;
use crate::signal::{Signal, Signals};

/// Drain budget used when [`Server::shutdown_timeout`] is not called.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause after an `accept` failure caused by resource exhaustion.
const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Where the server is in its lifecycle. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Idle,
    Serving,
    Draining,
    Stopped,
}

/// How the drain phase ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Drain {
    /// Every connection finished in time.
    Complete,
    /// The timeout elapsed; open connections were dropped.
    TimedOut,
}

/// Returned by [`Server::serve`] after a signal-triggered shutdown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Shutdown {
    pub signal: Signal,
    pub drain: Drain,
}

enum Source {
    Addr(String),
    Listener(TcpListener),
}

/// The HTTP server.
pub struct Server {
    source: Source,
    shutdown_timeout: Duration,
    signals: Option<Signals>,
    state: watch::Sender<State>,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called. An address that does not parse or bind is reported by
    /// `serve`.
    ///
    /// ```rust,no_run
    /// use vigil::Server;
    /// let server = Server::bind("0.0.0.0:3000");
    /// ```
    pub fn bind(addr: &str) -> Self {
        Self::with_source(Source::Addr(addr.to_owned()))
    }

    /// Serves on an already-bound listener.
    pub fn from_listener(listener: TcpListener) -> Self {
        Self::with_source(Source::Listener(listener))
    }

    fn with_source(source: Source) -> Self {
        let (state, _) = watch::channel(State::Idle);
        Self { source, shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT, signals: None, state }
    }

    /// Upper bound on the drain phase, measured from the shutdown signal.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Replaces the OS signal subscription `serve` would otherwise create.
    pub fn signals(mut self, signals: Signals) -> Self {
        self.signals = Some(signals);
        self
    }

    /// Observes lifecycle transitions.
    pub fn state(&self) -> watch::Receiver<State> {
        self.state.subscribe()
    }

    /// Serves `router` until a termination signal or a listener failure.
    ///
    /// Returns `Ok` after a signal-triggered shutdown (whether or not the
    /// drain finished in time) and `Err` when the listener failed, in which
    /// case nothing is drained. The signal subscription is released as soon
    /// as draining starts.
    pub async fn serve(self, router: Router) -> Result<Shutdown, Error> {
        let Self { source, shutdown_timeout, signals, state } = self;
        let mut signals = match signals {
            Some(signals) => signals,
            None => Signals::os()?,
        };

        let (stop_tx, stop_rx) = oneshot::channel();
        let mut listener = tokio::spawn(listen(source, router, stop_rx));
        state.send_replace(State::Serving);

        let signal = tokio::select! {
            Some(signal) = signals.recv() => signal,
            res = &mut listener => {
                let err = listener_failure(res);
                error!(error = %err, "listen: receive error");
                state.send_replace(State::Stopped);
                return Err(err);
            }
        };

        // A repeated signal now goes to the default action.
        drop(signals);
        state.send_replace(State::Draining);
        info!(signal = %signal, timeout = ?shutdown_timeout, "shutdown: received signal");
        let _ = stop_tx.send(());

        let drain = match tokio::time::timeout(shutdown_timeout, &mut listener).await {
            Ok(res) => {
                match res {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!(error = %e, "shutdown: listener error"),
                    Err(e) => error!(error = %e, "shutdown: listener task failed"),
                }
                Drain::Complete
            }
            Err(_) => {
                error!(timeout = ?shutdown_timeout, "shutdown: drain timed out");
                listener.abort();
                let _ = listener.await;
                Drain::TimedOut
            }
        };

        state.send_replace(State::Stopped);
        info!("shutdown: exit");
        Ok(Shutdown { signal, drain })
    }
}

fn listener_failure(res: Result<Result<(), Error>, JoinError>) -> Error {
    match res {
        Ok(Err(e)) => e,
        Ok(Ok(())) => Error::Listener("stopped without a shutdown request".to_owned()),
        Err(e) => Error::Listener(e.to_string()),
    }
}

// ── Listener task ─────────────────────────────────────────────────────────────

/// Binds, accepts until `stop` fires, then drains every open connection.
/// A listening socket that stops working ends the task with `Err` at once.
///
/// The caller bounds the drain; if it takes too long the whole task is
/// aborted, which drops the `JoinSet` and with it every connection.
async fn listen(
    source: Source,
    router: Router,
    mut stop: oneshot::Receiver<()>,
) -> Result<(), Error> {
    let listener = match source {
        Source::Listener(listener) => listener,
        Source::Addr(addr) => {
            let bound = TcpListener::bind(addr.as_str()).await;
            bound.map_err(|source| Error::Bind { addr, source })?
        }
    };
    info!(addr = %listener.local_addr()?, "vigil listening");

    let builder = ConnBuilder::new(StreamExecutor::default());
    let graceful = GracefulShutdown::new();
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            // Check the stop request first so shutdown stops accepting at
            // once, even if more connections are queued.
            biased;

            _ = &mut stop => {
                info!(in_flight = tasks.len(), "shutdown: draining connections");
                break;
            }

            res = listener.accept() => {
                let (stream, remote_addr) = match res {
                    Ok(v) => v,
                    Err(e) => match accept_failure(&e) {
                        AcceptFailure::Connection => {
                            debug!(error = %e, "accept: connection dropped");
                            continue;
                        }
                        AcceptFailure::Exhausted => {
                            error!(error = %e, backoff = ?ACCEPT_BACKOFF, "accept: backing off");
                            tokio::select! {
                                biased;
                                _ = &mut stop => {
                                    info!(in_flight = tasks.len(), "shutdown: draining connections");
                                    break;
                                }
                                () = tokio::time::sleep(ACCEPT_BACKOFF) => continue,
                            }
                        }
                        AcceptFailure::Fatal => return Err(Error::Io(e)),
                    },
                };

                let router = router.clone();
                let svc = service_fn(move |req| dispatch(router.clone(), req, remote_addr));
                let conn = builder.serve_connection(TokioIo::new(stream), svc);
                let conn = graceful.watch(conn.into_owned());

                tasks.spawn(async move {
                    if let Err(e) = conn.await {
                        error!(peer = %remote_addr, "connection error: {e}");
                    }
                });
            }

            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }

    drop(listener);
    graceful.shutdown().await;
    while tasks.join_next().await.is_some() {}

    info!("listener stopped");
    Ok(())
}

/// What an `accept` error means for the accept loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AcceptFailure {
    /// One pending connection failed before it was handed over.
    Connection,
    /// Out of descriptors, buffers or memory; retrying at once would spin.
    Exhausted,
    /// The listening socket itself is no longer usable.
    Fatal,
}

fn accept_failure(err: &io::Error) -> AcceptFailure {
    use io::ErrorKind;
    match err.kind() {
        ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionAborted
        | ErrorKind::ConnectionReset
        | ErrorKind::Interrupted
        | ErrorKind::WouldBlock
        | ErrorKind::PermissionDenied => AcceptFailure::Connection,
        ErrorKind::InvalidInput | ErrorKind::Unsupported => AcceptFailure::Fatal,
        _ => AcceptFailure::Exhausted,
    }
}

/// Spawns HTTP/2 stream tasks into a set owned by the connections.
///
/// Each connection holds a clone; once the last connection is dropped the
/// set goes with it and aborts every stream still running.
#[derive(Clone, Default)]
struct StreamExecutor {
    streams: Arc<Mutex<JoinSet<()>>>,
}

impl<F> Executor<F> for StreamExecutor
where
    F: Future<Output = ()> + Send + 'static,
{
    fn execute(&self, fut: F) {
        let mut streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        while streams.try_join_next().is_some() {}
        streams.spawn(fut);
    }
}

/// Runs one request through the router.
///
/// An [aborted](crate::Response::aborted) response becomes an error, which
/// makes hyper close the connection without writing anything.
async fn dispatch(
    router: Router,
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
) -> Result<http::Response<Body>, Error> {
    let (head, body) = req.into_parts();
    let req = Request::new(head, body.into(), Some(remote_addr));
    router.call(req).await.into_http()
}
