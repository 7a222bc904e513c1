//! Incoming HTTP request type.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::mem;
use std::net::SocketAddr;

use bytes::Bytes;
use http::header::{self, HeaderMap};
use http::request::Parts;
use http::{Extensions, Method, Uri, Version};

use crate::body::Body;
use crate::error::Error;
use crate::middleware::TraceContext;

/// An incoming HTTP request.
///
/// Wraps the `http` request head, a read-once [`Body`], the peer address and
/// any path parameters the router matched.
#[derive(Debug)]
pub struct Request {
    head: Parts,
    body: Body,
    remote_addr: Option<SocketAddr>,
    params: HashMap<String, String>,
}

impl Request {
    pub(crate) fn new(head: Parts, body: Body, remote_addr: Option<SocketAddr>) -> Self {
        Self { head, body, remote_addr, params: HashMap::new() }
    }

    pub fn method(&self) -> &Method { &self.head.method }
    pub fn uri(&self) -> &Uri { &self.head.uri }
    pub fn version(&self) -> Version { self.head.version }
    pub fn headers(&self) -> &HeaderMap { &self.head.headers }
    pub fn extensions(&self) -> &Extensions { &self.head.extensions }
    pub fn extensions_mut(&mut self) -> &mut Extensions { &mut self.head.extensions }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.remote_addr }

    pub fn path(&self) -> &str {
        self.head.uri.path()
    }

    /// The raw query string, without the leading `?`. Empty when absent.
    pub fn query(&self) -> &str {
        self.head.uri.query().unwrap_or_default()
    }

    /// Header lookup. Values that are not visible ASCII read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The declared `Content-Length`, if present and well-formed.
    pub fn content_length(&self) -> Option<u64> {
        self.header(header::CONTENT_LENGTH.as_str())?.trim().parse().ok()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(header::CONTENT_TYPE.as_str())
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.header(header::USER_AGENT.as_str())
    }

    /// Best guess at the originating client for a service behind a proxy:
    /// the first `X-Forwarded-For` hop, then `X-Real-IP`, then the socket peer.
    pub fn client_ip(&self) -> Option<String> {
        let forwarded = self
            .header("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        let real_ip = self.header("x-real-ip").map(str::trim).filter(|v| !v.is_empty());

        forwarded
            .or(real_ip)
            .map(str::to_owned)
            .or_else(|| self.remote_addr.map(|addr| addr.ip().to_string()))
    }

    /// The trace identity stamped by [`with_trace`](crate::middleware::with_trace).
    pub fn trace(&self) -> Option<&TraceContext> {
        self.head.extensions.get::<TraceContext>()
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub(crate) fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }

    pub fn body(&self) -> &Body { &self.body }
    pub fn body_mut(&mut self) -> &mut Body { &mut self.body }

    /// Replaces the body stream, returning the previous one.
    pub fn set_body(&mut self, body: impl Into<Body>) -> Body {
        mem::replace(&mut self.body, body.into())
    }

    /// Takes the body stream, leaving an empty one behind.
    pub fn take_body(&mut self) -> Body {
        mem::take(&mut self.body)
    }

    /// Reads the whole body. A second call sees an empty body.
    pub async fn bytes(&mut self) -> Result<Bytes, Error> {
        self.take_body().collect().await
    }

    /// Renders the request line and headers the way they came off the wire.
    /// The body is never included.
    pub fn dump(&self) -> String {
        let mut out = format!("{} {} {:?}\r\n", self.head.method, self.head.uri, self.head.version);
        for (name, value) in &self.head.headers {
            let _ = write!(out, "{}: {}\r\n", name, String::from_utf8_lossy(value.as_bytes()));
        }
        out.push_str("\r\n");
        out
    }
}

impl<B: Into<Body>> From<http::Request<B>> for Request {
    fn from(req: http::Request<B>) -> Self {
        let (head, body) = req.into_parts();
        Self::new(head, body.into(), None)
    }
}
