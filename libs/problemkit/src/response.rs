//! Response abstraction the pipeline writes problems into
//!
//! [`ResponseSink`] is the mutable response seen by the pipeline: status, headers,
//! a body and a "has started" flag. [`BufferedResponse`] is the bundled
//! implementation used by the tower service.

use axum::body::Body;
use bytes::{Bytes, BytesMut};
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{StatusCode, response::Parts};
use problemkit_errors::{APPLICATION_PROBLEM_JSON, Problem, StatusCodeExt};

/// Headers copied over when a response is reset for a problem payload.
pub const PRESERVED_HEADERS: [HeaderName; 8] = [
    header::WWW_AUTHENTICATE,
    header::STRICT_TRANSPORT_SECURITY,
    header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
    header::ACCESS_CONTROL_ALLOW_HEADERS,
    header::ACCESS_CONTROL_ALLOW_METHODS,
    header::ACCESS_CONTROL_ALLOW_ORIGIN,
    header::ACCESS_CONTROL_EXPOSE_HEADERS,
    header::ACCESS_CONTROL_MAX_AGE,
];

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("response has already started")]
    AlreadyStarted,

    #[error("failed to serialize problem: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub trait ResponseSink {
    fn status(&self) -> StatusCode;

    fn set_status(&mut self, status: StatusCode);

    fn headers(&self) -> &HeaderMap;

    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Whether bytes were already sent; a started response is never rewritten.
    fn has_started(&self) -> bool;

    fn is_body_empty(&self) -> bool;

    /// Drop status, headers and buffered body.
    fn clear(&mut self);

    /// Write `problem` as the response body with its content type.
    ///
    /// # Errors
    /// Returns [`SinkError`] when the response started or serialization fails.
    fn write_problem(&mut self, problem: &Problem) -> Result<(), SinkError>;

    /// An error status with nothing written: no body and no content type.
    fn has_problem(&self) -> bool {
        self.status().is_problem()
            && self.is_body_empty()
            && !self.headers().contains_key(header::CONTENT_TYPE)
    }
}

/// Reset `response` for a problem payload with `status`.
///
/// Keeps only [`PRESERVED_HEADERS`] and installs non-caching headers.
pub fn prepare_response<R: ResponseSink + ?Sized>(response: &mut R, status: StatusCode) {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));

    for name in &PRESERVED_HEADERS {
        for value in response.headers().get_all(name) {
            headers.append(name.clone(), value.clone());
        }
    }

    response.clear();
    response.set_status(status);
    *response.headers_mut() = headers;
}

/// In-memory response: everything is kept until converted into an HTTP response.
#[derive(Debug, Clone)]
pub struct BufferedResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: BytesMut,
    started: bool,
}

impl BufferedResponse {
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: BytesMut::new(),
            started: false,
        }
    }

    /// Status and headers of a response whose body was empty.
    #[must_use]
    pub fn from_parts(parts: Parts) -> Self {
        Self {
            status: parts.status,
            headers: parts.headers,
            ..Self::new()
        }
    }

    /// Mark the response as sent.
    pub fn start(&mut self) {
        self.started = true;
    }

    /// Append body bytes; this sends the response.
    pub fn write_body(&mut self, chunk: impl AsRef<[u8]>) {
        self.started = true;
        self.body.extend_from_slice(chunk.as_ref());
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    #[must_use]
    pub fn into_response(self) -> http::Response<Body> {
        let mut response = http::Response::new(Body::from(Bytes::from(self.body)));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

impl Default for BufferedResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseSink for BufferedResponse {
    fn status(&self) -> StatusCode {
        self.status
    }

    fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn has_started(&self) -> bool {
        self.started
    }

    fn is_body_empty(&self) -> bool {
        self.body.is_empty()
    }

    fn clear(&mut self) {
        self.status = StatusCode::OK;
        self.headers.clear();
        self.body.clear();
    }

    fn write_problem(&mut self, problem: &Problem) -> Result<(), SinkError> {
        if self.started {
            return Err(SinkError::AlreadyStarted);
        }
        let bytes = problem.to_json_vec()?;
        self.status = problem.status;
        self.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(APPLICATION_PROBLEM_JSON),
        );
        self.body.clear();
        self.body.extend_from_slice(&bytes);
        self.started = true;
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn empty_error_status_is_a_problem() {
        let mut response = BufferedResponse::new();
        assert!(!response.has_problem());

        response.set_status(StatusCode::NOT_FOUND);
        assert!(response.has_problem());

        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        assert!(!response.has_problem());
    }

    #[test]
    fn written_body_is_not_a_problem() {
        let mut response = BufferedResponse::new();
        response.set_status(StatusCode::BAD_REQUEST);
        response.write_body("partial");

        assert!(response.has_started());
        assert!(!response.has_problem());
    }

    #[test]
    fn prepare_keeps_only_preserved_headers() {
        let mut response = BufferedResponse::new();
        let headers = response.headers_mut();
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        headers.insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        headers.insert(header::ETAG, HeaderValue::from_static("\"abc\""));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=60"));
        headers.insert("x-custom", HeaderValue::from_static("1"));

        prepare_response(&mut response, StatusCode::INTERNAL_SERVER_ERROR);

        let headers = response.headers();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[header::WWW_AUTHENTICATE], "Bearer");
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache, no-store, must-revalidate");
        assert_eq!(headers[header::PRAGMA], "no-cache");
        assert_eq!(headers[header::EXPIRES], "0");
        assert!(!headers.contains_key(header::ETAG));
        assert!(!headers.contains_key("x-custom"));
    }

    #[test]
    fn write_problem_sets_status_and_content_type() {
        let mut response = BufferedResponse::new();
        let problem = Problem::from_status(StatusCode::CONFLICT);

        response.write_problem(&problem).unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(response.headers()[header::CONTENT_TYPE], APPLICATION_PROBLEM_JSON);

        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["status"], 409);
    }

    #[test]
    fn write_problem_refuses_started_response() {
        let mut response = BufferedResponse::new();
        response.start();

        let result = response.write_problem(&Problem::from_status(StatusCode::CONFLICT));
        assert!(matches!(result, Err(SinkError::AlreadyStarted)));
    }
}
