//! Process-lifetime handle on the API.
//!
//! A [`Connection`] owns the [`Transport`], the metric-name sanitizer and
//! the default tag set. Queues and aggregators borrow it for submission.

use serde_json::{Map, Value};

use crate::aggregator::{Aggregator, AggregatorOptions};
use crate::config::ConnectionConfig;
use crate::error::Result;
use crate::http::{HttpClient, Method};
use crate::measurement::{SubmitOptions, Tags};
use crate::queue::{Queue, QueueGuard, QueueOptions};
use crate::transport::Transport;

/// Credentials, transport and defaults shared by every submission.
#[derive(Debug)]
pub struct Connection {
    transport: Transport,
    tags: Tags,
}

impl Connection {
    /// Creates a connection using the reqwest-backed transport.
    pub fn new(config: ConnectionConfig) -> Self {
        let tags = config.tags.clone();
        Self {
            transport: Transport::new(config),
            tags,
        }
    }

    /// Creates a connection over a custom HTTP client.
    pub fn with_client(config: ConnectionConfig, client: impl HttpClient + 'static) -> Self {
        let tags = config.tags.clone();
        Self {
            transport: Transport::with_client(config, client),
            tags,
        }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Executes a raw API request. See [`Transport::execute`].
    ///
    /// # Errors
    ///
    /// Returns a client error on 4xx, or a transport error.
    pub fn execute(
        &self,
        method: Method,
        path: &str,
        params: Option<&Map<String, Value>>,
    ) -> Result<Option<Value>> {
        self.transport.execute(method, path, params)
    }

    /// Applies the configured sanitizer to a metric name.
    pub fn sanitize(&self, name: &str) -> String {
        self.transport.config().sanitizer.apply(name)
    }

    /// Default tags merged beneath every tagged submission.
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Replaces the default tags.
    pub fn set_tags(&mut self, tags: Tags) {
        self.tags = tags;
    }

    /// Merges `tags` into the default tags; new values win.
    pub fn add_tags(&mut self, tags: Tags) {
        self.tags.extend(tags);
    }

    /// Creates an empty queue.
    pub fn new_queue(&self, options: QueueOptions) -> Queue<'_> {
        Queue::new(self, options)
    }

    /// Creates a queue that submits when dropped.
    pub fn queue_guard(&self, options: QueueOptions) -> QueueGuard<'_> {
        QueueGuard::new(self.new_queue(options))
    }

    /// Runs `f` with a fresh queue and submits it afterwards, even if `f`
    /// fails. See [`Queue::scope`].
    ///
    /// # Errors
    ///
    /// Returns the error from `f`, or else the error from submitting.
    pub fn with_queue<'a, T>(
        &'a self,
        options: QueueOptions,
        f: impl FnOnce(&mut Queue<'a>) -> Result<T>,
    ) -> Result<T> {
        Queue::scope(self, options, f)
    }

    /// Creates an empty aggregator.
    pub fn new_aggregator(&self, options: AggregatorOptions) -> Aggregator<'_> {
        Aggregator::new(self, options)
    }

    /// Submits a single measurement immediately.
    ///
    /// Takes the tagged path when `options.tags` is set, like
    /// [`Queue::add`].
    ///
    /// # Errors
    ///
    /// Returns a client error on 4xx, or a transport error.
    pub fn submit(&self, name: &str, value: f64, options: SubmitOptions) -> Result<()> {
        let mut queue = self.new_queue(QueueOptions::default());
        queue.add(name, value, options)?;
        queue.submit()
    }

    /// Submits a single tagged measurement immediately.
    ///
    /// # Errors
    ///
    /// Returns a client error on 4xx, or a transport error.
    pub fn submit_tagged(&self, name: &str, value: f64, options: SubmitOptions) -> Result<()> {
        let mut queue = self.new_queue(QueueOptions::default());
        queue.add_tagged(name, value, options)?;
        queue.submit()
    }

    /// Fetches a legacy metric and its measurements (`GET metrics/<name>`).
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotFound`](crate::ClientError::NotFound) for an
    /// unknown metric, or a transport error.
    pub fn get(&self, name: &str, query: &Map<String, Value>) -> Result<Option<Value>> {
        let path = format!("metrics/{}", self.sanitize(name));
        self.execute(Method::Get, &path, Some(query))
    }

    /// Fetches tagged series for a metric (`GET measurements/<name>`).
    ///
    /// # Errors
    ///
    /// Returns a client error on 4xx, or a transport error.
    pub fn get_tagged(&self, name: &str, query: &Map<String, Value>) -> Result<Option<Value>> {
        let path = format!("measurements/{}", self.sanitize(name));
        self.execute(Method::Get, &path, Some(query))
    }

    /// Lists metric definitions (`GET metrics`).
    ///
    /// # Errors
    ///
    /// Returns a client error on 4xx, or a transport error.
    pub fn list_metrics(&self, query: &Map<String, Value>) -> Result<Vec<Value>> {
        let body = self.execute(Method::Get, "metrics", Some(query))?;
        Ok(match body {
            Some(Value::Object(mut map)) => match map.remove("metrics") {
                Some(Value::Array(metrics)) => metrics,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        })
    }
}

/// Shorthand for `Connection::new(ConnectionConfig::new(user, token))`.
pub fn connect(user: impl Into<String>, token: impl Into<String>) -> Connection {
    Connection::new(ConnectionConfig::new(user, token))
}
