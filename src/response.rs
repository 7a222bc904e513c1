//! Outgoing HTTP response type and the [`IntoResponse`] conversion trait.
//!
//! Build a [`Response`] in your handler and return it. Middleware may attach
//! errors to it, swap its body for a decorator, or mark it aborted when the
//! client is already gone.

use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;

use crate::body::Body;
use crate::error::Error;

const JSON: &str = "application/json";
const TEXT: &str = "text/plain; charset=utf-8";

/// An outgoing HTTP response.
///
/// # Shortcuts (200 OK, no custom headers needed)
///
/// ```rust
/// use http::StatusCode;
/// use vigil::Response;
///
/// Response::json(br#"{"id":1}"#.to_vec());
/// Response::text("hello");
/// Response::status(StatusCode::NO_CONTENT);
/// ```
///
/// # Builder (custom status or headers)
///
/// ```rust
/// use http::StatusCode;
/// use vigil::Response;
///
/// Response::builder()
///     .status(StatusCode::CREATED)
///     .header("location", "/users/42")
///     .json(br#"{"id":42}"#.to_vec());
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Body,
    errors: Vec<Error>,
    aborted: bool,
}

impl Response {
    /// `200 OK` with `application/json`.
    pub fn json(body: impl Into<Body>) -> Self {
        Self::builder().json(body)
    }

    /// `200 OK` with `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::builder().text(body)
    }

    /// Response with no body.
    pub fn status(code: StatusCode) -> Self {
        Self::builder().status(code).no_body()
    }

    /// Builder for responses that need a custom status or extra headers.
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { headers: HeaderMap::new(), status: StatusCode::OK }
    }

    /// A response that must never reach the wire: the server drops the
    /// connection instead of writing a status line. `err` is kept for logging.
    pub fn aborted(err: Error) -> Self {
        let mut res = Self::status(client_closed_request());
        res.errors.push(err);
        res.aborted = true;
        res
    }

    pub fn status_code(&self) -> StatusCode { self.status }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }
    pub fn body_mut(&mut self) -> &mut Body { &mut self.body }
    pub fn into_body(self) -> Body { self.body }
    pub fn is_aborted(&self) -> bool { self.aborted }

    /// Errors recorded against this response by handlers or middleware.
    pub fn errors(&self) -> &[Error] { &self.errors }

    pub fn push_error(&mut self, err: Error) {
        self.errors.push(err);
    }

    /// Replaces the body with `f(body)`, keeping status, headers and errors.
    pub fn map_body(mut self, f: impl FnOnce(Body) -> Body) -> Self {
        let body = std::mem::take(&mut self.body);
        self.body = f(body);
        self
    }

    /// Converts into the value hyper writes, or the error that should tear
    /// the connection down.
    pub(crate) fn into_http(mut self) -> Result<http::Response<Body>, Error> {
        if self.aborted {
            return Err(self
                .errors
                .pop()
                .unwrap_or_else(|| Error::Disconnected("response aborted".to_owned())));
        }
        let mut res = http::Response::new(self.body);
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        Ok(res)
    }
}

/// nginx's 499 "client closed request". Only ever logged, never sent.
fn client_closed_request() -> StatusCode {
    StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST)
}

// ── ResponseBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Response`].
///
/// Obtain via [`Response::builder()`]. Defaults to `200 OK`.
/// Terminated by a typed body method, so the content type is always set.
#[derive(Debug)]
pub struct ResponseBuilder {
    headers: HeaderMap,
    status: StatusCode,
}

impl ResponseBuilder {
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code;
        self
    }

    /// Appends a header. Names or values that are not valid HTTP are skipped.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            self.headers.append(name, value);
        }
        self
    }

    /// Terminate with a JSON body (`application/json`).
    pub fn json(self, body: impl Into<Body>) -> Response {
        self.body(JSON, body)
    }

    /// Terminate with a plain-text body (`text/plain; charset=utf-8`).
    pub fn text(self, body: impl Into<String>) -> Response {
        self.body(TEXT, body.into())
    }

    /// Terminate with any body and content type, e.g. a [`Body::channel`] stream.
    pub fn body(mut self, content_type: &'static str, body: impl Into<Body>) -> Response {
        self.headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        self.finish(body.into())
    }

    /// Terminate with no body (e.g. `204 No Content`, `301 Moved Permanently`).
    pub fn no_body(self) -> Response {
        self.finish(Body::empty())
    }

    fn finish(self, body: Body) -> Response {
        Response {
            status: self.status,
            headers: self.headers,
            body,
            errors: Vec::new(),
            aborted: false,
        }
    }
}

// ── IntoResponse ──────────────────────────────────────────────────────────────

/// Conversion into an HTTP [`Response`].
///
/// Implement on your own types to return them directly from handlers.
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response { self }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for String {
    fn into_response(self) -> Response { Response::text(self) }
}

/// Return a status directly from a handler: `return StatusCode::NOT_FOUND`
impl IntoResponse for StatusCode {
    fn into_response(self) -> Response { Response::status(self) }
}

impl<R: IntoResponse> IntoResponse for (StatusCode, R) {
    fn into_response(self) -> Response {
        let mut res = self.1.into_response();
        res.status = self.0;
        res
    }
}
