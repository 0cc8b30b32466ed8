//! Size-bounded batching of measurements.
//!
//! Sending one measurement per HTTP request is wasteful, so a [`Queue`]
//! collects measurements into chunks of at most
//! [`MAX_MEASUREMENTS_PER_CHUNK`] entries and posts one chunk per request on
//! [`submit`](Queue::submit).
//!
//! Legacy (`gauges`/`counters`) and tagged (`measurements`) entries live in
//! separate chunk lists, each bounded independently. Direct writes and
//! aggregator flushes ([`add_aggregator`](Queue::add_aggregator)) converge on
//! the same chunking code.
//!
//! # Lifecycle
//!
//! ```text
//! Empty ──add*──► Accumulating ──submit / auto-submit──► Empty
//! ```
//!
//! A failed submit does not re-queue anything: chunks already posted stay
//! posted, the rest are dropped and the error is returned.
//!
//! # Scoped use
//!
//! [`Queue::scope`] hands a queue to a closure and submits it when the
//! closure returns, whether it succeeded or not. [`QueueGuard`] does the same
//! on drop, which also covers unwinding.

use std::ops::{Deref, DerefMut};

use tracing::{debug, info, warn};

use crate::aggregator::Aggregator;
use crate::connection::Connection;
use crate::error::Result;
use crate::measurement::{
    AggregatedStat, LegacyMeasurement, LegacyPayload, MetricKind, Payload, Reading, SubmitOptions,
    TaggedMeasurement, TaggedPayload, Tags, merge_tags,
};

/// Upper bound on entries in one chunk.
pub const MAX_MEASUREMENTS_PER_CHUNK: usize = 300;

/// Construction options for a [`Queue`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueOptions {
    /// Queue-level tags, layered over the connection's tags.
    pub tags: Tags,
    /// Submit automatically once this many measurements are pending.
    pub auto_submit_count: Option<usize>,
}

impl QueueOptions {
    /// Sets the queue-level tags.
    #[must_use]
    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    /// Enables auto-submit at `count` pending measurements.
    #[must_use]
    pub fn with_auto_submit_count(mut self, count: usize) -> Self {
        self.auto_submit_count = Some(count);
        self
    }
}

/// Batches measurements into bounded chunks.
#[derive(Debug)]
pub struct Queue<'a> {
    connection: &'a Connection,
    chunks: Vec<LegacyPayload>,
    tagged_chunks: Vec<TaggedPayload>,
    tags: Tags,
    auto_submit_count: Option<usize>,
}

impl<'a> Queue<'a> {
    /// Creates an empty queue submitting through `connection`.
    ///
    /// The queue's tag set is the connection's tags overridden by
    /// `options.tags`.
    pub fn new(connection: &'a Connection, options: QueueOptions) -> Self {
        Self {
            connection,
            chunks: Vec::new(),
            tagged_chunks: Vec::new(),
            tags: merge_tags(connection.tags(), &options.tags),
            auto_submit_count: options.auto_submit_count,
        }
    }

    /// Runs `f` with a fresh queue and submits it afterwards.
    ///
    /// The queue is submitted even when `f` fails. `f`'s error takes
    /// precedence over a submission error.
    ///
    /// # Errors
    ///
    /// Returns the error from `f`, or else the error from submitting.
    pub fn scope<T>(
        connection: &'a Connection,
        options: QueueOptions,
        f: impl FnOnce(&mut Queue<'a>) -> Result<T>,
    ) -> Result<T> {
        let mut guard = QueueGuard::new(Queue::new(connection, options));
        let outcome = f(&mut *guard);
        let submitted = guard.finish();
        let value = outcome?;
        submitted?;
        Ok(value)
    }

    /// The queue's tag set.
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Merges `tags` into the queue's tag set; new values win.
    pub fn add_tags(&mut self, tags: Tags) {
        self.tags.extend(tags);
    }

    /// Replaces the queue's tag set.
    pub fn set_tags(&mut self, tags: Tags) {
        self.tags = tags;
    }

    /// Queues one measurement.
    ///
    /// With `options.tags` set the measurement takes the tagged path (see
    /// [`add_tagged`](Self::add_tagged)); otherwise it becomes a legacy
    /// gauge or counter entry. Non-finite values are dropped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error only if this call triggers an auto-submit that fails.
    pub fn add(&mut self, name: &str, value: f64, options: SubmitOptions) -> Result<()> {
        if !value.is_finite() {
            warn!(metric = name, value, "dropping non-finite measurement");
            return Ok(());
        }
        if options.tags.is_some() {
            return self.add_tagged(name, value, options);
        }

        let measurement = LegacyMeasurement {
            name: self.connection.sanitize(name),
            reading: Reading::Value { value },
            source: options.source,
            measure_time: options.time,
        };
        self.push_legacy(options.kind, measurement);
        self.auto_submit()
    }

    /// Queues one tagged measurement as a single-sample summary.
    ///
    /// When `options.inherit_tags` is set the queue's tags are merged beneath
    /// the measurement's own, which win on conflict. Non-finite values are
    /// dropped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error only if this call triggers an auto-submit that fails.
    pub fn add_tagged(&mut self, name: &str, value: f64, options: SubmitOptions) -> Result<()> {
        if !value.is_finite() {
            warn!(metric = name, value, "dropping non-finite measurement");
            return Ok(());
        }
        let own = options.tags.unwrap_or_default();
        let tags = if options.inherit_tags {
            merge_tags(&self.tags, &own)
        } else {
            own
        };

        let measurement = TaggedMeasurement {
            name: self.connection.sanitize(name),
            reading: Reading::Summary(AggregatedStat::single(value)),
            tags,
            time: options.time,
        };
        self.push_tagged(measurement);
        self.auto_submit()
    }

    /// Moves every summary out of `aggregator`, then clears it.
    ///
    /// Untagged summaries become legacy gauges stamped with the aggregator's
    /// source and floored measure time. Tagged summaries carry the
    /// aggregator's tags (layered over the queue's) and the same time.
    ///
    /// # Errors
    ///
    /// Returns an error only if this call triggers an auto-submit that fails.
    pub fn add_aggregator(&mut self, aggregator: &mut Aggregator<'_>) -> Result<()> {
        let time = aggregator.floor_measure_time();
        let source = aggregator.source().map(str::to_string);

        for (name, stat) in aggregator.measurements() {
            let measurement = LegacyMeasurement {
                name: self.connection.sanitize(name),
                reading: Reading::Summary(*stat),
                source: source.clone(),
                measure_time: time,
            };
            self.push_legacy(MetricKind::Gauge, measurement);
        }

        let tags = merge_tags(&self.tags, aggregator.tags());
        for (name, stat) in aggregator.tagged_measurements() {
            let measurement = TaggedMeasurement {
                name: self.connection.sanitize(name),
                reading: Reading::Summary(*stat),
                tags: tags.clone(),
                time,
            };
            self.push_tagged(measurement);
        }

        aggregator.clear();
        self.auto_submit()
    }

    /// Posts every chunk, legacy first, then tagged.
    ///
    /// Both chunk lists are emptied before anything is sent, so a failure
    /// loses whatever was not yet posted.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by the transport; later chunks are not
    /// sent.
    pub fn submit(&mut self) -> Result<()> {
        let chunks = std::mem::take(&mut self.chunks);
        let tagged_chunks = std::mem::take(&mut self.tagged_chunks);
        let (legacy_count, tagged_count) = (chunks.len(), tagged_chunks.len());

        let payloads = chunks
            .into_iter()
            .map(Payload::Legacy)
            .chain(tagged_chunks.into_iter().map(|mut chunk| {
                chunk.tags = merge_tags(&self.tags, &chunk.tags);
                Payload::Tagged(chunk)
            }));

        for payload in payloads.filter(|p| !p.is_empty()) {
            debug!(
                endpoint = payload.endpoint(),
                measurements = payload.len(),
                "posting chunk"
            );
            self.connection.transport().post(payload.endpoint(), &payload)?;
        }

        if legacy_count + tagged_count > 0 {
            info!(
                legacy_chunks = legacy_count,
                tagged_chunks = tagged_count,
                "submitted queue"
            );
        }
        Ok(())
    }

    /// Total pending measurements across both chunk lists.
    pub fn len(&self) -> usize {
        self.chunks.iter().map(LegacyPayload::len).sum::<usize>()
            + self.tagged_chunks.iter().map(TaggedPayload::len).sum::<usize>()
    }

    /// Returns `true` if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pending legacy chunks, oldest first.
    pub fn chunks(&self) -> &[LegacyPayload] {
        &self.chunks
    }

    /// Pending tagged chunks, oldest first.
    pub fn tagged_chunks(&self) -> &[TaggedPayload] {
        &self.tagged_chunks
    }

    /// Number of pending legacy chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Number of pending tagged chunks.
    pub fn tagged_chunk_count(&self) -> usize {
        self.tagged_chunks.len()
    }

    /// The legacy chunk new entries are appended to.
    pub fn current_chunk(&self) -> Option<&LegacyPayload> {
        self.chunks.last()
    }

    /// The tagged chunk new entries are appended to.
    pub fn current_tagged_chunk(&self) -> Option<&TaggedPayload> {
        self.tagged_chunks.last()
    }

    fn push_legacy(&mut self, kind: MetricKind, measurement: LegacyMeasurement) {
        if self
            .chunks
            .last()
            .is_none_or(|c| c.len() >= MAX_MEASUREMENTS_PER_CHUNK)
        {
            self.chunks.push(LegacyPayload::default());
        }
        if let Some(chunk) = self.chunks.last_mut() {
            chunk.push(kind, measurement);
        }
    }

    fn push_tagged(&mut self, measurement: TaggedMeasurement) {
        if self
            .tagged_chunks
            .last()
            .is_none_or(|c| c.len() >= MAX_MEASUREMENTS_PER_CHUNK)
        {
            self.tagged_chunks.push(TaggedPayload::default());
        }
        if let Some(chunk) = self.tagged_chunks.last_mut() {
            chunk.measurements.push(measurement);
        }
    }

    fn auto_submit(&mut self) -> Result<()> {
        match self.auto_submit_count {
            Some(threshold) if self.len() >= threshold => {
                debug!(threshold, "auto-submit threshold reached");
                self.submit()
            }
            _ => Ok(()),
        }
    }
}

/// Owns a [`Queue`] and submits it when dropped.
///
/// Prefer [`finish`](Self::finish), which reports submission errors; on drop
/// they can only be logged.
#[derive(Debug)]
pub struct QueueGuard<'a> {
    queue: Queue<'a>,
}

impl<'a> QueueGuard<'a> {
    /// Wraps `queue`.
    pub fn new(queue: Queue<'a>) -> Self {
        Self { queue }
    }

    /// Submits the queue.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by the transport.
    pub fn finish(mut self) -> Result<()> {
        self.queue.submit()
    }
}

impl<'a> Deref for QueueGuard<'a> {
    type Target = Queue<'a>;

    fn deref(&self) -> &Self::Target {
        &self.queue
    }
}

impl DerefMut for QueueGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.queue
    }
}

impl Drop for QueueGuard<'_> {
    fn drop(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        if let Err(e) = self.queue.submit() {
            warn!(error = %e, "failed to submit queue on drop");
        }
    }
}
