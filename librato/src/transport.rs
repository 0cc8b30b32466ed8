//! Authenticated request execution with retry on server errors.
//!
//! [`Transport::execute`] is the single entry point every API call goes
//! through:
//!
//! 1. Build the request: Basic auth, `User-Agent`, and parameters either as
//!    a JSON body (`POST`/`PUT`/`DELETE`) or on the query string (`GET`,
//!    lists exploded as `key[]=v`).
//! 2. Send it over a fresh connection.
//! 3. Below 500, decode the body; 4xx becomes a [`ClientError`], anything
//!    else is returned.
//! 4. At 500 or above, ask the [`RetryPolicy`](crate::retry::RetryPolicy)
//!    how long to wait, sleep, and go back to step 2.
//!
//! A connection the peer dropped before responding is re-dialled without
//! consuming a backoff step.

use std::time::Instant;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::ConnectionConfig;
use crate::error::{ClientError, LibratoError, Result, TransportError};
use crate::http::{HttpClient, HttpRequest, HttpResponse, Method, ReqwestClient};
use crate::retry::RetryDecision;

/// Consecutive dropped connections tolerated before giving up.
const MAX_RECONNECTS: u32 = 3;

/// Executes API requests for one connection.
pub struct Transport {
    config: ConnectionConfig,
    client: Box<dyn HttpClient>,
    authorization: String,
    user_agent: String,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("base_url", &self.config.base_url())
            .field("user", &self.config.user)
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Creates a transport backed by [`ReqwestClient`].
    pub fn new(config: ConnectionConfig) -> Self {
        let client = ReqwestClient::new(config.timeout);
        Self::with_client(config, client)
    }

    /// Creates a transport backed by a custom client.
    pub fn with_client(config: ConnectionConfig, client: impl HttpClient + 'static) -> Self {
        Self {
            authorization: authorization_header(&config.user, &config.token),
            user_agent: user_agent(),
            client: Box::new(client),
            config,
        }
    }

    /// The configuration this transport was built from.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Executes one logical request.
    ///
    /// `path` is relative to the configured base path (e.g. `metrics`).
    /// Returns the decoded JSON body, or `None` for an empty or undecodable
    /// one.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on a 4xx response, and [`TransportError`] on
    /// network failure or once the retry policy stops retrying 5xx responses.
    pub fn execute(
        &self,
        method: Method,
        path: &str,
        params: Option<&Map<String, Value>>,
    ) -> Result<Option<Value>> {
        let request = self.build_request(method, path, params)?;
        let started = Instant::now();
        let mut retry = self.config.retry.start();
        let mut reconnects = 0;

        loop {
            debug!(
                method = %request.method,
                url = %request.url,
                attempt = retry.attempts(),
                "sending request"
            );

            let response = match self.client.send(&request) {
                Ok(response) => response,
                Err(TransportError::ConnectionClosed { source }) if reconnects < MAX_RECONNECTS => {
                    reconnects += 1;
                    debug!(error = %source, reconnects, "connection closed before response, reconnecting");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            reconnects = 0;

            if response.status < 500 {
                return process_response(&response);
            }

            match retry.next(started.elapsed()) {
                RetryDecision::Wait(wait) => {
                    warn!(
                        status = response.status,
                        wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                        "server error, waiting before retry"
                    );
                    std::thread::sleep(wait);
                }
                RetryDecision::MaxRetries => {
                    return Err(TransportError::RetriesExhausted {
                        status: response.status,
                        attempts: retry.attempts(),
                    }
                    .into());
                }
                RetryDecision::Deadline(deadline) => {
                    return Err(TransportError::DeadlineExceeded {
                        status: response.status,
                        deadline,
                    }
                    .into());
                }
            }
        }
    }

    /// Serializes `body` and `POST`s it to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if `body` does not serialize to a JSON object, or
    /// if [`execute`](Self::execute) fails.
    pub fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<Option<Value>> {
        let params = match serde_json::to_value(body)? {
            Value::Object(map) => map,
            other => return Err(LibratoError::InvalidBody(json_kind(&other))),
        };
        self.execute(Method::Post, path, Some(&params))
    }

    /// Builds the request without sending it.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be serialized.
    pub fn build_request(
        &self,
        method: Method,
        path: &str,
        params: Option<&Map<String, Value>>,
    ) -> Result<HttpRequest> {
        let mut url = format!("{}{}", self.config.base_url(), path.trim_start_matches('/'));
        let mut headers = vec![
            ("Authorization".to_string(), self.authorization.clone()),
            ("User-Agent".to_string(), self.user_agent.clone()),
        ];
        let mut body = None;

        if let Some(params) = params {
            if method.carries_body() {
                body = Some(serde_json::to_vec(params)?);
                headers.push(("Content-Type".to_string(), "application/json".to_string()));
            } else if !params.is_empty() {
                url.push('?');
                url.push_str(&encode_query(params));
            }
        }

        Ok(HttpRequest {
            method,
            url,
            headers,
            body,
        })
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Decodes a sub-500 response, classifying 4xx statuses.
fn process_response(response: &HttpResponse) -> Result<Option<Value>> {
    let payload = decode_body(response);
    if response.status >= 400 {
        return Err(ClientError::classify(response.status, payload.as_ref()).into());
    }
    Ok(payload)
}

/// Decodes a response body according to its declared content type.
///
/// JSON (or an undeclared type) is parsed, with malformed documents treated
/// as no payload. Any other non-empty body becomes a string payload.
pub fn decode_body(response: &HttpResponse) -> Option<Value> {
    if response.body.is_empty() {
        return None;
    }
    let content_type = response
        .content_type
        .as_deref()
        .unwrap_or("")
        .to_ascii_lowercase();
    let text = decode_text(&response.body, charset(&content_type));

    if content_type.is_empty() || content_type.contains("json") {
        serde_json::from_str(&text).ok()
    } else {
        Some(Value::String(text))
    }
}

fn charset(content_type: &str) -> &str {
    content_type
        .split(';')
        .filter_map(|part| part.trim().strip_prefix("charset="))
        .map(|c| c.trim_matches('"'))
        .next()
        .unwrap_or("utf-8")
}

fn decode_text(bytes: &[u8], charset: &str) -> String {
    match charset {
        "iso-8859-1" | "latin1" | "latin-1" => bytes.iter().map(|&b| char::from(b)).collect(),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Encodes parameters as a query string.
///
/// Lists become repeated `key[]=value` pairs; nulls are skipped; nested
/// objects are sent as JSON text.
pub fn encode_query(params: &Map<String, Value>) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        match value {
            Value::Array(items) => {
                let list_key = format!("{key}[]");
                for item in items {
                    serializer.append_pair(&list_key, &query_value(item));
                }
            }
            Value::Null => {}
            other => {
                serializer.append_pair(key, &query_value(other));
            }
        }
    }
    serializer.finish()
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `Basic base64(user:token)`.
pub fn authorization_header(user: &str, token: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{user}:{token}")))
}

/// `librato-rs/<version> (<os>; <arch>) rust`.
pub fn user_agent() -> String {
    format!(
        "librato-rs/{} ({}; {}) rust",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::retry::RetryPolicy;

    /// Replays scripted outcomes and records every request.
    #[derive(Clone, Default)]
    struct Scripted {
        outcomes: Rc<RefCell<VecDeque<std::result::Result<HttpResponse, TransportError>>>>,
        sent: Rc<RefCell<Vec<HttpRequest>>>,
    }

    impl Scripted {
        fn push(&self, outcome: std::result::Result<HttpResponse, TransportError>) -> &Self {
            self.outcomes.borrow_mut().push_back(outcome);
            self
        }
    }

    impl HttpClient for Scripted {
        fn send(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
            self.sent.borrow_mut().push(request.clone());
            self.outcomes
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Ok(HttpResponse::empty(200)))
        }
    }

    fn closed() -> TransportError {
        TransportError::ConnectionClosed {
            source: "peer hung up".into(),
        }
    }

    fn transport(client: Scripted, retry: RetryPolicy) -> Transport {
        let config = ConnectionConfig::new("user_test", "key_test").with_retry(retry);
        Transport::with_client(config, client)
    }

    fn no_wait() -> RetryPolicy {
        RetryPolicy::default().with_backoff(|_| Duration::ZERO)
    }

    #[test]
    fn test_authorization_header() {
        assert_eq!(
            authorization_header("user_test", "key_test"),
            "Basic dXNlcl90ZXN0OmtleV90ZXN0"
        );
    }

    #[test]
    fn test_user_agent_format() {
        let ua = user_agent();
        assert!(ua.starts_with(&format!("librato-rs/{}", env!("CARGO_PKG_VERSION"))));
        assert!(ua.contains(std::env::consts::OS));
    }

    #[test]
    fn test_encode_query() {
        let params = json!({"name": "abcd"});
        assert_eq!(encode_query(params.as_object().unwrap()), "name=abcd");

        let params = json!({"sources": ["a", "b"]});
        assert_eq!(
            encode_query(params.as_object().unwrap()),
            "sources%5B%5D=a&sources%5B%5D=b"
        );

        assert_eq!(encode_query(&Map::new()), "");
    }

    #[test]
    fn test_get_params_on_query_string() {
        let t = transport(Scripted::default(), no_wait());
        let params = json!({"duration": 60, "tags_search": "a=b"});
        let req = t
            .build_request(Method::Get, "metrics/cpu", params.as_object())
            .unwrap();
        assert_eq!(
            req.url,
            "https://metrics-api.librato.com/v1/metrics/cpu?duration=60&tags_search=a%3Db"
        );
        assert!(req.body.is_none());
        assert!(req.header("Content-Type").is_none());
        assert_eq!(req.header("Authorization"), Some("Basic dXNlcl90ZXN0OmtleV90ZXN0"));
        assert!(req.header("User-Agent").is_some());
    }

    #[test]
    fn test_post_params_in_json_body() {
        let t = transport(Scripted::default(), no_wait());
        let params = json!({"gauges": [{"name": "a", "value": 1}]});
        let req = t
            .build_request(Method::Post, "/metrics", params.as_object())
            .unwrap();
        assert_eq!(req.url, "https://metrics-api.librato.com/v1/metrics");
        assert_eq!(req.header("content-type"), Some("application/json"));
        let body: Value = serde_json::from_slice(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body, params);
    }

    #[test]
    fn test_success_returns_decoded_body() {
        let client = Scripted::default();
        client.push(Ok(HttpResponse::json(200, r#"{"metrics": []}"#)));
        let t = transport(client, no_wait());
        let body = t.execute(Method::Get, "metrics", None).unwrap();
        assert_eq!(body, Some(json!({"metrics": []})));
    }

    #[test]
    fn test_empty_body_is_none() {
        let t = transport(Scripted::default(), no_wait());
        assert_eq!(t.execute(Method::Post, "metrics", None).unwrap(), None);
    }

    #[test]
    fn test_retries_server_errors_until_success() {
        let client = Scripted::default();
        client
            .push(Ok(HttpResponse::empty(500)))
            .push(Ok(HttpResponse::empty(503)))
            .push(Ok(HttpResponse::json(200, "{}")));
        let t = transport(client.clone(), no_wait());

        assert_eq!(t.execute(Method::Get, "metrics", None).unwrap(), Some(json!({})));
        assert_eq!(client.sent.borrow().len(), 3);
    }

    #[test]
    fn test_backoff_function_receives_previous_wait() {
        let client = Scripted::default();
        client
            .push(Ok(HttpResponse::empty(500)))
            .push(Ok(HttpResponse::empty(500)))
            .push(Ok(HttpResponse::empty(200)));

        // BackoffFn must be Send + Sync, so record through a channel.
        let (tx, rx) = std::sync::mpsc::channel();
        let tx = std::sync::Mutex::new(tx);
        let retry = RetryPolicy::default().with_backoff(move |d| {
            if let Ok(tx) = tx.lock() {
                let _ = tx.send(d);
            }
            Duration::ZERO
        });
        let t = transport(client, retry);
        t.execute(Method::Get, "metrics", None).unwrap();

        let seen: Vec<Duration> = rx.try_iter().collect();
        assert_eq!(seen, vec![Duration::from_secs(1), Duration::ZERO]);
    }

    #[test]
    fn test_bounded_retries_exhaust() {
        let client = Scripted::default();
        for _ in 0..5 {
            client.push(Ok(HttpResponse::empty(502)));
        }
        let t = transport(client.clone(), RetryPolicy::bounded(2).with_backoff(|_| Duration::ZERO));

        let err = t.execute(Method::Get, "metrics", None).unwrap_err();
        assert!(matches!(
            err,
            LibratoError::Transport(TransportError::RetriesExhausted {
                status: 502,
                attempts: 3
            })
        ));
        assert_eq!(client.sent.borrow().len(), 3);
    }

    #[test]
    fn test_client_error_is_not_retried() {
        let client = Scripted::default();
        client.push(Ok(HttpResponse::json(
            404,
            r#"{"errors":{"request":["Not found"]}}"#,
        )));
        let t = transport(client.clone(), no_wait());

        let err = t.execute(Method::Get, "metrics/nope", None).unwrap_err();
        match err {
            LibratoError::Client(ClientError::NotFound { message }) => {
                assert_eq!(message, "request: Not found");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(client.sent.borrow().len(), 1);
    }

    #[test]
    fn test_text_plain_unauthorized() {
        let client = Scripted::default();
        client.push(Ok(HttpResponse {
            status: 401,
            content_type: Some("text/plain".to_string()),
            body: b"Credentials are required to access this resource.".to_vec(),
        }));
        let t = transport(client, no_wait());

        let err = t.execute(Method::Post, "metrics", None).unwrap_err();
        match err {
            LibratoError::Client(e @ ClientError::Unauthorized { .. }) => {
                assert_eq!(e.message(), "Credentials are required to access this resource.");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_malformed_json_tolerated() {
        let client = Scripted::default();
        client.push(Ok(HttpResponse::json(400, "{not json")));
        let t = transport(client, no_wait());

        let err = t.execute(Method::Get, "metrics", None).unwrap_err();
        match err {
            LibratoError::Client(e) => {
                assert_eq!(e.code(), 400);
                assert_eq!(e.message(), "");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_latin1_charset() {
        let response = HttpResponse {
            status: 200,
            content_type: Some("text/plain; charset=ISO-8859-1".to_string()),
            body: vec![0x63, 0x61, 0x66, 0xE9],
        };
        assert_eq!(decode_body(&response), Some(Value::String("café".to_string())));
    }

    #[test]
    fn test_reconnects_without_backoff() {
        let client = Scripted::default();
        client.push(Err(closed())).push(Ok(HttpResponse::json(200, "[]")));
        // A backoff call would panic: dropped connections must not consume one.
        let retry = RetryPolicy::default().with_backoff(|_| panic!("backoff consulted"));
        let t = transport(client.clone(), retry);

        assert_eq!(t.execute(Method::Get, "metrics", None).unwrap(), Some(json!([])));
        assert_eq!(client.sent.borrow().len(), 2);
    }

    #[test]
    fn test_persistent_connection_drops_surface() {
        let client = Scripted::default();
        for _ in 0..=MAX_RECONNECTS {
            client.push(Err(closed()));
        }
        let t = transport(client.clone(), no_wait());

        let err = t.execute(Method::Get, "metrics", None).unwrap_err();
        assert!(matches!(
            err,
            LibratoError::Transport(TransportError::ConnectionClosed { .. })
        ));
        assert_eq!(
            client.sent.borrow().len(),
            usize::try_from(MAX_RECONNECTS).unwrap() + 1
        );
    }

    #[test]
    fn test_deadline_stops_retries() {
        let client = Scripted::default();
        for _ in 0..3 {
            client.push(Ok(HttpResponse::empty(503)));
        }
        // The first wait alone overruns the deadline, so nothing sleeps.
        let retry = RetryPolicy::default()
            .with_backoff(|_| Duration::from_secs(1))
            .with_deadline(Duration::from_millis(500));
        let t = transport(client.clone(), retry);

        let err = t.execute(Method::Post, "metrics", None).unwrap_err();
        match err {
            LibratoError::Transport(TransportError::DeadlineExceeded { status, deadline }) => {
                assert_eq!(status, 503);
                assert_eq!(deadline, Duration::from_millis(500));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(client.sent.borrow().len(), 1);
    }

    #[test]
    fn test_post_rejects_non_object_body() {
        let client = Scripted::default();
        let t = transport(client.clone(), no_wait());

        let err = t.post("metrics", &vec![1, 2, 3]).unwrap_err();
        assert!(matches!(err, LibratoError::InvalidBody("an array")));
        assert_eq!(
            err.to_string(),
            "request body must be a JSON object, got an array"
        );
        assert!(client.sent.borrow().is_empty());
    }

    #[test]
    fn test_network_failure_propagates() {
        let client = Scripted::default();
        client.push(Err(crate::http::request_error("dns lookup failed")));
        let t = transport(client, no_wait());

        let err = t.execute(Method::Get, "metrics", None).unwrap_err();
        assert!(matches!(err, LibratoError::Transport(TransportError::Request { .. })));
    }
}
