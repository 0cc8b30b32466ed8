//! Recording HTTP client for unit tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use serde_json::Value;

use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::error::TransportError;
use crate::http::{HttpClient, HttpRequest, HttpResponse};
use crate::measurement::Tags;

/// Records every request; replies from a script, then with `200` and no body.
#[derive(Clone, Default)]
pub(crate) struct Recorder {
    replies: Rc<RefCell<VecDeque<HttpResponse>>>,
    sent: Rc<RefCell<Vec<HttpRequest>>>,
}

impl Recorder {
    pub(crate) fn reply(&self, response: HttpResponse) {
        self.replies.borrow_mut().push_back(response);
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.sent.borrow().clone()
    }

    /// `(url, json body)` for every request sent.
    pub(crate) fn bodies(&self) -> Vec<(String, Value)> {
        self.sent
            .borrow()
            .iter()
            .map(|r| {
                let body = r
                    .body
                    .as_deref()
                    .and_then(|b| serde_json::from_slice(b).ok())
                    .unwrap_or(Value::Null);
                (r.url.clone(), body)
            })
            .collect()
    }
}

impl HttpClient for Recorder {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.sent.borrow_mut().push(request.clone());
        Ok(self
            .replies
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| HttpResponse::empty(200)))
    }
}

/// A connection to a recorder, with optional connection-level tags.
pub(crate) fn connection(tags: Tags) -> (Connection, Recorder) {
    let recorder = Recorder::default();
    let config = ConnectionConfig::new("user_test", "key_test").with_tags(tags);
    (Connection::with_client(config, recorder.clone()), recorder)
}
