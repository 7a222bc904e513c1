//! # vigil
//!
//! Request tracing, panic recovery, body capture and graceful shutdown for
//! HTTP services behind a reverse proxy.
//!
//! ## The contract
//!
//! The proxy owns TLS, rate limiting, CORS and slow clients. vigil owns what
//! happens to a request once it reaches the process:
//!
//! - **Trace identity**: every request gets a trace id (from `X-Request-ID`
//!   or fresh) and a session id, carried in its extensions and a `tracing` span
//! - **One log line per request**: method, path, query, client, user agent,
//!   status and latency, emitted after the handler chain finished
//! - **Panic recovery**: a panicking handler yields a 500 with a stack trace
//!   in the logs; a client that hung up mid-response is told apart and the
//!   connection is simply dropped
//! - **Body capture**: request and response bodies logged under a size cap,
//!   without disturbing what the handler reads or the client receives
//! - **Graceful shutdown**: SIGHUP / SIGINT / SIGTERM / SIGQUIT drain
//!   in-flight requests, bounded by a timeout; a listener that fails to bind
//!   stops the server without a drain
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use vigil::{Request, Response, Router, Server, middleware};
//!
//! #[tokio::main]
//! async fn main() {
//!     let app = Router::new()
//!         .get("/users/{id}", get_user)
//!         .layer(middleware::logger)
//!         .layer(middleware::recover)
//!         .layer(middleware::Capture::new().request_max(4096).response_max(4096));
//!
//!     let shutdown = Server::bind("0.0.0.0:3000")
//!         .shutdown_timeout(Duration::from_secs(5))
//!         .serve(app)
//!         .await;
//!     println!("{shutdown:?}");
//! }
//!
//! async fn get_user(req: Request) -> Response {
//!     let id = req.param("id").unwrap_or("unknown");
//!     Response::json(format!(r#"{{"id":"{id}"}}"#))
//! }
//! ```

mod body;
mod error;
mod handler;
mod request;
mod response;
mod router;
mod server;
mod signal;

pub mod middleware;

pub use body::{Body, BodyWriter};
pub use error::{BoxError, Error};
pub use handler::{BoxFuture, Handler};
pub use middleware::{Middleware, Next};
pub use request::Request;
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use router::Router;
pub use server::{DEFAULT_SHUTDOWN_TIMEOUT, Drain, Server, Shutdown, State};
pub use signal::{Signal, SignalSender, Signals};
