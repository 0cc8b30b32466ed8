//! Wire types for measurement submission.
//!
//! Two payload shapes exist and are never mixed:
//!
//! - [`LegacyPayload`] — `{"gauges": [...], "counters": [...]}` posted to
//!   `metrics`, each entry optionally carrying a `source` string.
//! - [`TaggedPayload`] — `{"measurements": [...], "tags": {...}}` posted to
//!   `measurements`, each entry optionally carrying its own tag set.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A key/value tag set. Ordered so that payloads serialize deterministically.
pub type Tags = BTreeMap<String, String>;

/// Merges two tag sets; keys in `overrides` win.
pub fn merge_tags(base: &Tags, overrides: &Tags) -> Tags {
    let mut merged = base.clone();
    merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Legacy metric type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// A point-in-time sample.
    #[default]
    Gauge,
    /// A monotonically reported sample.
    Counter,
}

/// Running `(count, sum, min, max)` summary of one metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AggregatedStat {
    /// Number of contributed values.
    pub count: u64,
    /// Exact running sum.
    pub sum: f64,
    /// Smallest contributed value.
    pub min: f64,
    /// Largest contributed value.
    pub max: f64,
}

impl AggregatedStat {
    /// A summary of exactly one value.
    pub fn single(value: f64) -> Self {
        Self {
            count: 1,
            sum: value,
            min: value,
            max: value,
        }
    }

    /// Folds another value into the summary.
    pub fn record(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }
}

/// What a measurement carries: a raw value or a pre-aggregated summary.
///
/// Summaries never include `value`; the API derives the mean from
/// `sum / count`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reading {
    /// A single raw sample.
    Value {
        /// The sample.
        value: f64,
    },
    /// A `(count, sum, min, max)` summary.
    Summary(AggregatedStat),
}

/// One entry of a legacy payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegacyMeasurement {
    /// Metric name.
    pub name: String,
    /// Sample or summary.
    #[serde(flatten)]
    pub reading: Reading,
    /// Source the sample belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Unix timestamp in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measure_time: Option<i64>,
}

/// One entry of a tagged payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaggedMeasurement {
    /// Metric name.
    pub name: String,
    /// Sample or summary.
    #[serde(flatten)]
    pub reading: Reading,
    /// Measurement-level tags.
    #[serde(skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
    /// Unix timestamp in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,
}

/// Body of a legacy (`gauges`/`counters`) submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LegacyPayload {
    /// Gauge entries.
    pub gauges: Vec<LegacyMeasurement>,
    /// Counter entries.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub counters: Vec<LegacyMeasurement>,
    /// Default source for entries without one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Default timestamp for entries without one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measure_time: Option<i64>,
}

impl LegacyPayload {
    /// Number of gauges and counters together.
    pub fn len(&self) -> usize {
        self.gauges.len() + self.counters.len()
    }

    /// Returns `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends an entry to the list matching `kind`.
    pub fn push(&mut self, kind: MetricKind, measurement: LegacyMeasurement) {
        match kind {
            MetricKind::Gauge => self.gauges.push(measurement),
            MetricKind::Counter => self.counters.push(measurement),
        }
    }
}

/// Body of a tagged (`measurements`) submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaggedPayload {
    /// Measurement entries.
    pub measurements: Vec<TaggedMeasurement>,
    /// Payload-level tags applied to entries without their own.
    #[serde(skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
    /// Default timestamp for entries without one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,
}

impl TaggedPayload {
    /// Number of entries.
    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    /// Returns `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }
}

/// A submission body of either shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// Posted to `metrics`.
    Legacy(LegacyPayload),
    /// Posted to `measurements`.
    Tagged(TaggedPayload),
}

impl Payload {
    /// API path (relative to the base path) this payload is posted to.
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::Legacy(_) => "metrics",
            Self::Tagged(_) => "measurements",
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        match self {
            Self::Legacy(p) => p.len(),
            Self::Tagged(p) => p.len(),
        }
    }

    /// Returns `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-call options for queue and connection submissions.
///
/// Defaults: gauge, no source, no explicit time, no tags, and tags
/// inherited from the enclosing queue or connection.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitOptions {
    /// Legacy metric type; ignored on the tagged path.
    pub kind: MetricKind,
    /// Legacy source; ignored on the tagged path.
    pub source: Option<String>,
    /// Unix timestamp in seconds.
    pub time: Option<i64>,
    /// Measurement tags. `Some` routes the measurement to the tagged path.
    pub tags: Option<Tags>,
    /// Merge the enclosing tag set beneath the measurement's own tags.
    pub inherit_tags: bool,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            kind: MetricKind::Gauge,
            source: None,
            time: None,
            tags: None,
            inherit_tags: true,
        }
    }
}

impl SubmitOptions {
    /// Counter options.
    pub fn counter() -> Self {
        Self {
            kind: MetricKind::Counter,
            ..Self::default()
        }
    }

    /// Sets the source.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Sets the timestamp.
    #[must_use]
    pub fn with_time(mut self, time: i64) -> Self {
        self.time = Some(time);
        self
    }

    /// Sets the tags, routing the measurement to the tagged path.
    #[must_use]
    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = Some(tags);
        self
    }

    /// Sets whether enclosing tags are inherited.
    #[must_use]
    pub fn with_inherit_tags(mut self, inherit: bool) -> Self {
        self.inherit_tags = inherit;
        self
    }
}

/// Builds a [`Tags`] map from string pairs.
pub fn tags<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Tags
where
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
