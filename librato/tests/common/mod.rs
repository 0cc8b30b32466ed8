//! In-memory stand-in for the metrics API.
//!
//! Stores posted gauges per name and serves them back from
//! `GET metrics/<name>`, so tests can check what a submission left behind.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use librato::error::TransportError;
use librato::http::{HttpClient, HttpRequest, HttpResponse, Method};
use librato::{Connection, ConnectionConfig, RetryPolicy};
use serde_json::{Value, json};

#[derive(Default)]
struct State {
    /// metric name -> source -> values, in arrival order
    gauges: BTreeMap<String, BTreeMap<String, Vec<Value>>>,
    /// Statuses to answer with before serving normally.
    fail_with: VecDeque<u16>,
    posts: usize,
}

/// Fake API server reachable through [`HttpClient`].
#[derive(Clone, Default)]
pub struct FakeApi {
    state: Rc<RefCell<State>>,
}

impl FakeApi {
    /// Answers the next `n` requests with `status`.
    pub fn fail_next(&self, n: usize, status: u16) {
        let mut state = self.state.borrow_mut();
        for _ in 0..n {
            state.fail_with.push_back(status);
        }
    }

    /// Number of successful POSTs.
    pub fn posts(&self) -> usize {
        self.state.borrow().posts
    }

    /// A connection to this server that never sleeps between retries.
    pub fn connect(&self) -> Connection {
        let config = ConnectionConfig::new("user_test", "key_test")
            .with_retry(RetryPolicy::default().with_backoff(|_| std::time::Duration::ZERO));
        Connection::with_client(config, self.clone())
    }

    fn store(&self, body: &Value) {
        let mut state = self.state.borrow_mut();
        let default_source = body
            .get("source")
            .and_then(Value::as_str)
            .unwrap_or("unassigned")
            .to_string();
        for key in ["gauges", "counters"] {
            for entry in body.get(key).and_then(Value::as_array).into_iter().flatten() {
                let Some(name) = entry.get("name").and_then(Value::as_str) else {
                    continue;
                };
                let source = entry
                    .get("source")
                    .and_then(Value::as_str)
                    .map_or(default_source.clone(), str::to_string);
                let value = entry
                    .get("value")
                    .cloned()
                    .or_else(|| entry.get("sum").cloned())
                    .unwrap_or(Value::Null);
                state
                    .gauges
                    .entry(name.to_string())
                    .or_default()
                    .entry(source)
                    .or_default()
                    .push(json!({"value": value}));
            }
        }
        state.posts += 1;
    }

    fn fetch(&self, name: &str) -> HttpResponse {
        let state = self.state.borrow();
        match state.gauges.get(name) {
            Some(by_source) => HttpResponse::json(
                200,
                &json!({"name": name, "type": "gauge", "measurements": by_source}).to_string(),
            ),
            None => HttpResponse::json(404, r#"{"errors":{"request":["Not found"]}}"#),
        }
    }
}

impl HttpClient for FakeApi {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        if let Some(status) = self.state.borrow_mut().fail_with.pop_front() {
            return Ok(HttpResponse::empty(status));
        }

        let path = request
            .url
            .split("/v1/")
            .nth(1)
            .unwrap_or_default()
            .split('?')
            .next()
            .unwrap_or_default()
            .to_string();

        match (request.method, path.as_str()) {
            (Method::Post, "metrics") => {
                let body: Value = request
                    .body
                    .as_deref()
                    .and_then(|b| serde_json::from_slice(b).ok())
                    .unwrap_or(Value::Null);
                self.store(&body);
                Ok(HttpResponse::empty(200))
            }
            (Method::Get, p) if p.starts_with("metrics/") => Ok(self.fetch(&p["metrics/".len()..])),
            _ => Ok(HttpResponse::json(404, r#"{"errors":{"request":["Not found"]}}"#)),
        }
    }
}
