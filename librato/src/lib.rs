//! # librato
//!
//! Client-side submission pipeline for the Librato metrics API.
//!
//! Submitting one HTTP request per sample is slow and expensive. This crate
//! batches and pre-aggregates measurements on the client, then posts them
//! through a transport that retries server errors and classifies client
//! errors.
//!
//! **Status**: The API is not yet stable.
//!
//! ## Key Properties
//!
//! - Client-side `(count, sum, min, max)` rollup per metric
//! - Bounded chunks: at most 300 measurements per request
//! - Legacy (`gauges`/`counters` + `source`) and tagged (`measurements` +
//!   `tags`) payloads, never mixed in one request
//! - Configurable retry policy for 5xx responses; typed errors for 4xx
//! - Synchronous and single-threaded: no background threads, no pooling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use librato::{Connection, ConnectionConfig, QueueOptions, SubmitOptions, tags};
//!
//! # fn main() -> librato::Result<()> {
//! let conn = Connection::new(
//!     ConnectionConfig::new("me@example.com", "token").with_tags(tags([("region", "eu")])),
//! );
//!
//! conn.with_queue(QueueOptions::default(), |q| {
//!     q.add("temperature", 21.5, SubmitOptions::default().with_source("kitchen"))?;
//!     q.add_tagged("cpu", 0.42, SubmitOptions::default().with_tags(tags([("host", "web1")])))
//! })?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`Connection`] — Credentials, transport, sanitizer and default tags
//! - [`Queue`] — Batches measurements into bounded chunks
//! - [`Aggregator`] — Rolls samples up before they are queued or sent
//! - [`Transport`] — Executes requests with retry and error classification
//!
//! ## Modules
//!
//! - [`connection`] — Connection handle and convenience calls
//! - [`queue`] — Chunked batching and scoped submission
//! - [`aggregator`] — Statistical rollup and time flooring
//! - [`transport`] — Request building, response decoding, retry loop
//! - [`http`] — HTTP client seam and the reqwest implementation
//! - [`retry`] — Backoff and retry limits
//! - [`measurement`] — Wire payload types
//! - [`config`] — Connection configuration and config files
//! - [`sanitize`] — Metric-name sanitizers
//! - [`error`] — Error types

pub mod aggregator;
pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod measurement;
pub mod queue;
pub mod retry;
pub mod sanitize;
pub mod transport;

#[cfg(test)]
mod test_support;

// Re-export primary API types at crate root for convenience.
pub use aggregator::{Aggregator, AggregatorOptions};
pub use config::{ConnectionConfig, Protocol};
pub use connection::{Connection, connect};
pub use error::{ClientError, LibratoError, Result, TransportError};
pub use measurement::{MetricKind, Payload, SubmitOptions, Tags, tags};
pub use queue::{MAX_MEASUREMENTS_PER_CHUNK, Queue, QueueGuard, QueueOptions};
pub use retry::RetryPolicy;
pub use sanitize::Sanitizer;
pub use transport::Transport;
