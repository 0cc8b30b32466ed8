//! Client-side statistical rollup.
//!
//! An [`Aggregator`] folds many samples per metric name into one
//! `(count, sum, min, max)` record, so a burst of `add` calls becomes a single
//! wire entry per metric. Untagged ([`add`](Aggregator::add)) and tagged
//! ([`add_tagged`](Aggregator::add_tagged)) samples are kept apart and
//! rendered as the legacy and tagged payload shapes respectively.
//!
//! With a `period` set, every flush is stamped with the measure time floored
//! to a multiple of that period, so all stats from one snapshot in the same
//! clock bucket share an identical timestamp.
//!
//! # Example
//!
//! ```rust,no_run
//! use librato::{AggregatorOptions, Connection, ConnectionConfig};
//!
//! # fn main() -> librato::Result<()> {
//! let conn = Connection::new(ConnectionConfig::new("me@example.com", "token"));
//! let mut agg = conn.new_aggregator(AggregatorOptions::default().with_period(60));
//! for latency in [12.0, 18.5, 9.1] {
//!     agg.add("request.latency", latency);
//! }
//! agg.submit()?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::connection::Connection;
use crate::error::Result;
use crate::measurement::{
    AggregatedStat, LegacyMeasurement, LegacyPayload, Payload, Reading, TaggedMeasurement,
    TaggedPayload, Tags, merge_tags,
};

/// Construction options for an [`Aggregator`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregatorOptions {
    /// Source attached to legacy payloads.
    pub source: Option<String>,
    /// Flooring period in seconds. Non-positive values disable flooring.
    pub period: Option<i64>,
    /// Explicit measure time (Unix seconds).
    pub measure_time: Option<i64>,
    /// Tags attached to tagged payloads.
    pub tags: Tags,
}

impl AggregatorOptions {
    /// Sets the source.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Sets the flooring period.
    #[must_use]
    pub fn with_period(mut self, period: i64) -> Self {
        self.period = Some(period);
        self
    }

    /// Sets the measure time.
    #[must_use]
    pub fn with_measure_time(mut self, measure_time: i64) -> Self {
        self.measure_time = Some(measure_time);
        self
    }

    /// Sets the tags.
    #[must_use]
    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }
}

/// Accumulates per-metric summaries until submitted or cleared.
#[derive(Debug)]
pub struct Aggregator<'a> {
    connection: &'a Connection,
    measurements: BTreeMap<String, AggregatedStat>,
    tagged_measurements: BTreeMap<String, AggregatedStat>,
    source: Option<String>,
    period: Option<i64>,
    measure_time: Option<i64>,
    tags: Tags,
}

impl<'a> Aggregator<'a> {
    /// Creates an empty aggregator submitting through `connection`.
    pub fn new(connection: &'a Connection, options: AggregatorOptions) -> Self {
        Self {
            connection,
            measurements: BTreeMap::new(),
            tagged_measurements: BTreeMap::new(),
            source: options.source,
            period: options.period,
            measure_time: options.measure_time,
            tags: options.tags,
        }
    }

    /// Folds `value` into the untagged summary for `name`.
    ///
    /// Non-finite values are dropped with a warning.
    pub fn add(&mut self, name: &str, value: f64) {
        record(&mut self.measurements, name, value);
    }

    /// Folds `value` into the tagged summary for `name`.
    ///
    /// Non-finite values are dropped with a warning.
    pub fn add_tagged(&mut self, name: &str, value: f64) {
        record(&mut self.tagged_measurements, name, value);
    }

    /// Untagged summaries by metric name.
    pub fn measurements(&self) -> &BTreeMap<String, AggregatedStat> {
        &self.measurements
    }

    /// Tagged summaries by metric name.
    pub fn tagged_measurements(&self) -> &BTreeMap<String, AggregatedStat> {
        &self.tagged_measurements
    }

    /// Returns `true` if nothing has been added since the last flush.
    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty() && self.tagged_measurements.is_empty()
    }

    /// The configured source.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Sets the source.
    pub fn set_source(&mut self, source: Option<String>) {
        self.source = source;
    }

    /// The configured period.
    pub fn period(&self) -> Option<i64> {
        self.period
    }

    /// Sets the period.
    pub fn set_period(&mut self, period: Option<i64>) {
        self.period = period;
    }

    /// The explicit measure time, if any.
    pub fn measure_time(&self) -> Option<i64> {
        self.measure_time
    }

    /// Sets the explicit measure time.
    pub fn set_measure_time(&mut self, measure_time: Option<i64>) {
        self.measure_time = measure_time;
    }

    /// The aggregator's tag set.
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Merges `tags` into the tag set; new values win.
    pub fn add_tags(&mut self, tags: Tags) {
        self.tags.extend(tags);
    }

    /// Replaces the tag set.
    pub fn set_tags(&mut self, tags: Tags) {
        self.tags = tags;
    }

    /// The timestamp to stamp on the next flush.
    ///
    /// With a period, the explicit measure time (or the wall clock) is
    /// floored to a multiple of it. Without one, the explicit measure time is
    /// returned as is.
    pub fn floor_measure_time(&self) -> Option<i64> {
        match self.period.filter(|p| *p > 0) {
            Some(period) => {
                let t = self.measure_time.unwrap_or_else(unix_now);
                Some(floor_time(t, period))
            }
            None => self.measure_time,
        }
    }

    /// Renders the untagged summaries as a legacy payload.
    pub fn to_payload(&self) -> LegacyPayload {
        let gauges = self
            .measurements
            .iter()
            .map(|(name, stat)| LegacyMeasurement {
                name: self.connection.sanitize(name),
                reading: Reading::Summary(*stat),
                source: None,
                measure_time: None,
            })
            .collect();

        LegacyPayload {
            gauges,
            counters: Vec::new(),
            source: self.source.clone(),
            measure_time: self.floor_measure_time(),
        }
    }

    /// Renders the tagged summaries as a tagged payload.
    ///
    /// Payload tags are the connection's tags overridden by the aggregator's.
    pub fn to_tagged_payload(&self) -> TaggedPayload {
        let measurements = self
            .tagged_measurements
            .iter()
            .map(|(name, stat)| TaggedMeasurement {
                name: self.connection.sanitize(name),
                reading: Reading::Summary(*stat),
                tags: Tags::new(),
                time: None,
            })
            .collect();

        TaggedPayload {
            measurements,
            tags: merge_tags(self.connection.tags(), &self.tags),
            time: self.floor_measure_time(),
        }
    }

    /// Non-empty payloads in submission order: legacy, then tagged.
    pub fn payloads(&self) -> Vec<Payload> {
        let mut payloads = Vec::with_capacity(2);
        if !self.measurements.is_empty() {
            payloads.push(Payload::Legacy(self.to_payload()));
        }
        if !self.tagged_measurements.is_empty() {
            payloads.push(Payload::Tagged(self.to_tagged_payload()));
        }
        payloads
    }

    /// Empties the summaries and forgets the explicit measure time.
    ///
    /// Source, period and tags are kept.
    pub fn clear(&mut self) {
        self.measurements.clear();
        self.tagged_measurements.clear();
        self.measure_time = None;
    }

    /// Posts the current payloads, then clears.
    ///
    /// The aggregator is cleared even if a post fails; the failed data is
    /// not retained.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by the transport.
    pub fn submit(&mut self) -> Result<()> {
        let payloads = self.payloads();
        self.clear();

        for payload in &payloads {
            self.connection.transport().post(payload.endpoint(), payload)?;
            info!(
                endpoint = payload.endpoint(),
                measurements = payload.len(),
                "submitted aggregated payload"
            );
        }
        Ok(())
    }
}

fn record(stats: &mut BTreeMap<String, AggregatedStat>, name: &str, value: f64) {
    if !value.is_finite() {
        warn!(metric = name, value, "dropping non-finite sample");
        return;
    }
    match stats.get_mut(name) {
        Some(stat) => stat.record(value),
        None => {
            stats.insert(name.to_string(), AggregatedStat::single(value));
        }
    }
}

/// Floors `t` to the nearest lower multiple of `period`.
///
/// A non-positive `period` leaves `t` unchanged.
pub fn floor_time(t: i64, period: i64) -> i64 {
    if period <= 0 {
        return t;
    }
    t - t.rem_euclid(period)
}

/// Current Unix time in seconds.
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
