mod common;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use vigil::{
    Drain, Error, Request, Response, Router, Server, Shutdown, Signal, SignalSender, Signals,
    State, middleware,
};

use common::{Logs, send};

struct Running {
    addr: SocketAddr,
    signals: SignalSender,
    state: watch::Receiver<State>,
    handle: JoinHandle<Result<Shutdown, Error>>,
}

async fn start(app: Router, timeout: Duration) -> Running {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (signals, subscription) = Signals::manual();

    let server = Server::from_listener(listener)
        .signals(subscription)
        .shutdown_timeout(timeout);
    let mut state = server.state();
    let handle = tokio::spawn(server.serve(app));
    state.wait_for(|s| *s == State::Serving).await.unwrap();

    Running { addr, signals, state, handle }
}

async fn error(_req: Request) -> Response {
    panic!("this is an error")
}

async fn gone(_req: Request) -> Response {
    std::panic::panic_any(io::Error::from(io::ErrorKind::BrokenPipe))
}

fn app() -> Router {
    Router::new()
        .get("/test", |_req: Request| async { "success" })
        .get("/error", error)
        .get("/gone", gone)
        .get("/trace", |req: Request| async move {
            let trace = req.trace().map(|t| t.trace_id().to_owned()).unwrap_or_default();
            let client = req.client_ip().unwrap_or_default();
            format!("{trace} {client}")
        })
        .layer(middleware::logger)
        .layer(middleware::recover)
}

/// A route that signals `entered` and then never finishes on its own.
fn slow_app(entered: Arc<Notify>) -> Router {
    Router::new().get("/slow", move |_req: Request| {
        let entered = Arc::clone(&entered);
        async move {
            entered.notify_one();
            tokio::time::sleep(Duration::from_secs(60)).await;
            Response::text("late")
        }
    })
}

#[tokio::test]
async fn serves_until_signal_then_drains() {
    let logs = Logs::default();
    let _guard = logs.install();
    let mut server = start(app(), Duration::from_secs(5)).await;

    let res = send(server.addr, "GET", "/test", &[], "").await;
    assert_eq!(res.status, Some(200));
    assert_eq!(res.body, "success");

    assert!(server.signals.send(Signal::Terminate));
    let shutdown = server.handle.await.unwrap().unwrap();
    assert_eq!(shutdown, Shutdown { signal: Signal::Terminate, drain: Drain::Complete });
    assert_eq!(*server.state.borrow_and_update(), State::Stopped);

    assert_eq!(logs.with_message("shutdown: received signal").len(), 1);
    assert_eq!(logs.with_message("shutdown: exit").len(), 1);

    // The subscription went away with the server; nothing can trigger it twice.
    assert!(!server.signals.send(Signal::Terminate));
}

#[tokio::test]
async fn trace_header_and_client_address_reach_handlers() {
    let server = start(app(), Duration::from_secs(5)).await;

    let res = send(server.addr, "GET", "/trace", &[("x-request-id", "abc-123")], "").await;
    assert_eq!(res.body, "abc-123 127.0.0.1");

    let res = send(server.addr, "GET", "/trace", &[("x-forwarded-for", "203.0.113.9")], "").await;
    let (trace, client) = res.body.split_once(' ').unwrap();
    assert!(!trace.is_empty());
    assert_eq!(client, "203.0.113.9");

    server.signals.send(Signal::Interrupt);
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn panics_become_500s_and_the_server_keeps_going() {
    let server = start(app(), Duration::from_secs(5)).await;

    let res = send(server.addr, "GET", "/error", &[], "").await;
    assert_eq!(res.status, Some(500));

    let res = send(server.addr, "GET", "/test", &[], "").await;
    assert_eq!(res.status, Some(200));

    server.signals.send(Signal::Terminate);
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn client_disconnect_gets_no_status_line() {
    let server = start(app(), Duration::from_secs(5)).await;

    let res = send(server.addr, "GET", "/gone", &[], "").await;
    assert_eq!(res.status, None);
    assert!(res.head.is_empty());

    let res = send(server.addr, "GET", "/test", &[], "").await;
    assert_eq!(res.status, Some(200));

    server.signals.send(Signal::Terminate);
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn bind_failure_stops_without_draining() {
    let logs = Logs::default();
    let _guard = logs.install();

    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = taken.local_addr().unwrap().to_string();

    let (signals, subscription) = Signals::manual();
    let server = Server::bind(&addr).signals(subscription);
    let state = server.state();

    let err = server.serve(app()).await.unwrap_err();
    assert!(matches!(err, Error::Bind { .. }), "unexpected error: {err}");
    assert_eq!(*state.borrow(), State::Stopped);

    assert_eq!(logs.with_message("listen: receive error").len(), 1);
    assert!(logs.with_message("shutdown: received signal").is_empty());
    assert!(!signals.send(Signal::Terminate));
}

#[tokio::test]
async fn drain_gives_up_after_the_timeout() {
    let logs = Logs::default();
    let _guard = logs.install();

    let entered = Arc::new(Notify::new());
    let server = start(slow_app(Arc::clone(&entered)), Duration::from_millis(200)).await;

    let client = tokio::spawn(send(server.addr, "GET", "/slow", &[], ""));
    entered.notified().await;

    let started = Instant::now();
    server.signals.send(Signal::Terminate);
    let shutdown = server.handle.await.unwrap().unwrap();

    assert_eq!(shutdown.drain, Drain::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(logs.with_message("shutdown: drain timed out").len(), 1);

    // The in-flight connection was dropped, not answered.
    assert_eq!(client.await.unwrap().status, None);
}

#[tokio::test]
async fn draining_releases_the_signal_subscription() {
    let logs = Logs::default();
    let _guard = logs.install();

    let entered = Arc::new(Notify::new());
    let mut server = start(slow_app(Arc::clone(&entered)), Duration::from_millis(300)).await;

    let client = tokio::spawn(send(server.addr, "GET", "/slow", &[], ""));
    entered.notified().await;

    assert!(server.signals.send(Signal::Terminate));
    server.state.wait_for(|s| *s == State::Draining).await.unwrap();
    // Nobody is listening any more; the repeat cannot start a second drain.
    assert!(!server.signals.send(Signal::Terminate));

    let shutdown = server.handle.await.unwrap().unwrap();
    assert_eq!(shutdown, Shutdown { signal: Signal::Terminate, drain: Drain::TimedOut });
    assert_eq!(logs.with_message("shutdown: received signal").len(), 1);
    assert_eq!(client.await.unwrap().status, None);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn broken_listening_socket_stops_the_server() {
    use std::os::fd::AsFd;

    let logs = Logs::default();
    let _guard = logs.install();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let socket = listener.as_fd().try_clone_to_owned().unwrap();

    let (signals, subscription) = Signals::manual();
    let server = Server::from_listener(listener).signals(subscription);
    let mut state = server.state();
    let handle = tokio::spawn(server.serve(app()));
    state.wait_for(|s| *s == State::Serving).await.unwrap();

    let res = send(addr, "GET", "/test", &[], "").await;
    assert_eq!(res.status, Some(200));

    // accept() on a shut-down listening socket fails with EINVAL.
    socket2::SockRef::from(&socket).shutdown(std::net::Shutdown::Both).unwrap();

    let err = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert!(matches!(&err, Error::Io(e) if e.kind() == io::ErrorKind::InvalidInput), "unexpected error: {err}");
    assert_eq!(*state.borrow(), State::Stopped);
    assert_eq!(logs.with_message("listen: receive error").len(), 1);
    assert!(logs.with_message("shutdown: received signal").is_empty());
    assert!(!signals.send(Signal::Terminate));
}
