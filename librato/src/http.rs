//! HTTP seam between the transport and the network.
//!
//! [`Transport`](crate::transport::Transport) speaks to an [`HttpClient`];
//! production code uses [`ReqwestClient`], tests substitute a fake.

use std::fmt;
use std::time::Duration;

use crate::error::{BoxError, TransportError};

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `DELETE`
    Delete,
}

impl Method {
    /// Returns `true` if parameters travel in a JSON body rather than the
    /// query string.
    pub fn carries_body(self) -> bool {
        !matches!(self, Self::Get)
    }

    fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        })
    }
}

/// A fully built request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Request method.
    pub method: Method,
    /// Absolute URL including any query string.
    pub url: String,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// JSON body, if any.
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    /// Looks up a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A response as read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// The `Content-Type` header, if present.
    pub content_type: Option<String>,
    /// Raw body bytes.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// A response with a JSON body.
    pub fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: Some("application/json;charset=utf-8".to_string()),
            body: body.as_bytes().to_vec(),
        }
    }

    /// A response with no body.
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            content_type: None,
            body: Vec::new(),
        }
    }
}

/// Sends one request and reads its response.
///
/// Implementations report a peer that hung up before responding as
/// [`TransportError::ConnectionClosed`]; the transport reconnects in that
/// case instead of failing.
pub trait HttpClient {
    /// Sends `request`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if no response could be read.
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Blocking reqwest client. Every call opens a new connection.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    timeout: Duration,
}

impl ReqwestClient {
    /// Creates a client applying `timeout` to each request.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl HttpClient for ReqwestClient {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        // No idle connections are kept, so each call dials afresh.
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| TransportError::ClientCreate { source: e })?;

        let mut builder = client.request(request.method.as_reqwest(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().map_err(send_error)?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().map_err(send_error)?.to_vec();

        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}

/// Maps a reqwest failure, singling out connections the peer dropped.
fn send_error(err: reqwest::Error) -> TransportError {
    if !err.is_timeout() && !err.is_connect() && peer_closed(&err) {
        TransportError::ConnectionClosed {
            source: Box::new(err),
        }
    } else {
        TransportError::Request {
            source: Box::new(err),
        }
    }
}

fn peer_closed(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ) {
                return true;
            }
        }
        // hyper reports an incomplete message without an io::Error underneath
        if e.to_string().contains("connection closed before message completed") {
            return true;
        }
        current = e.source();
    }
    false
}

/// Wraps any error as a [`TransportError::Request`].
pub fn request_error(err: impl Into<BoxError>) -> TransportError {
    TransportError::Request { source: err.into() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_body_rules() {
        assert!(!Method::Get.carries_body());
        assert!(Method::Post.carries_body());
        assert!(Method::Put.carries_body());
        assert!(Method::Delete.carries_body());
        assert_eq!(Method::Delete.to_string(), "DELETE");
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let req = HttpRequest {
            method: Method::Get,
            url: "http://localhost/".to_string(),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: None,
        };
        assert_eq!(req.header("content-type"), Some("application/json"));
        assert_eq!(req.header("authorization"), None);
    }

    #[test]
    fn test_peer_closed_detection() {
        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(peer_closed(&reset));
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(!peer_closed(&refused));
    }

    #[test]
    fn test_request_error_wraps() {
        let err = request_error("dns failure");
        assert!(matches!(err, TransportError::Request { .. }));
        assert_eq!(err.to_string(), "HTTP request failed: dns failure");
    }
}
