//! Minimal vigil example: traced, recovered and body-logged endpoints.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl -H 'x-request-id: 123456' http://localhost:8080/test
//!   curl http://localhost:8080/error          # 500, stack trace in the log
//!   curl -X POST http://localhost:8080/echo -d 'hello'
//!   curl http://localhost:8080/stream
//!
//! Ctrl-C (or SIGTERM) drains and exits within five seconds; a second Ctrl-C
//! exits at once.

use std::time::Duration;

use vigil::{Body, Request, Response, Router, Server, middleware};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let app = Router::new()
        .get("/test",   test)
        .get("/error",  error)
        .post("/echo",  echo)
        .get("/stream", stream)
        .layer(middleware::logger)
        .layer(middleware::recover)
        .layer(middleware::Capture::new().request_max(1024).response_max(1024));

    match Server::bind("0.0.0.0:8080")
        .shutdown_timeout(Duration::from_secs(5))
        .serve(app)
        .await
    {
        Ok(shutdown) => tracing::info!(?shutdown, "bye"),
        Err(e) => tracing::error!("server error: {e}"),
    }
}

// GET /test
async fn test(req: Request) -> Response {
    let trace = req.trace().map(|t| t.trace_id().to_owned()).unwrap_or_default();
    Response::builder().header("x-request-id", &trace).text("success")
}

// GET /error, recovered by middleware::recover.
async fn error(_req: Request) -> Response {
    panic!("this is an error")
}

// POST /echo. The body was already read once by Capture; it is still here.
async fn echo(mut req: Request) -> Response {
    match req.bytes().await {
        Ok(body) => Response::builder().body("application/octet-stream", body),
        Err(e) => Response::text(format!("read failed: {e}")),
    }
}

// GET /stream: chunks written one by one through a BodyWriter.
async fn stream(_req: Request) -> Response {
    let (mut writer, body) = Body::channel();
    tokio::spawn(async move {
        for i in 0..3 {
            if writer.write_str(&format!("chunk {i}\n")).await.is_err() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    });
    Response::builder().body("text/plain; charset=utf-8", body)
}
