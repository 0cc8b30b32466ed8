//! Metric-name sanitizers.
//!
//! A connection applies its [`Sanitizer`] to every metric name before it is
//! queued. The default is [`sanitize_no_op`], which leaves names untouched so
//! the API reports invalid names as a `BadRequest`.

use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;

/// Maximum metric name length accepted by the API.
pub const MAX_METRIC_NAME_LEN: usize = 255;

static DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^-.:_\w]+").expect("pattern is valid"));

/// A pluggable metric-name sanitizer.
#[derive(Clone)]
pub struct Sanitizer(Arc<dyn Fn(&str) -> String + Send + Sync>);

impl Sanitizer {
    /// Wraps a sanitizing function.
    pub fn new(f: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Sanitizer that returns names unchanged.
    pub fn no_op() -> Self {
        Self::new(sanitize_no_op)
    }

    /// Sanitizer that rewrites names into the API's accepted character set.
    pub fn metric_name() -> Self {
        Self::new(sanitize_metric_name)
    }

    /// Applies the sanitizer to `name`.
    pub fn apply(&self, name: &str) -> String {
        (self.0)(name)
    }
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::no_op()
    }
}

impl fmt::Debug for Sanitizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Sanitizer(..)")
    }
}

/// Returns `name` unchanged.
pub fn sanitize_no_op(name: &str) -> String {
    name.to_string()
}

/// Replaces each run of disallowed characters with `-` and truncates the
/// result to [`MAX_METRIC_NAME_LEN`] characters.
pub fn sanitize_metric_name(name: &str) -> String {
    DISALLOWED
        .replace_all(name, "-")
        .chars()
        .take(MAX_METRIC_NAME_LEN)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_op() {
        for name in ["323***", "name1", "name2"] {
            assert_eq!(sanitize_no_op(name), name);
        }
    }

    #[test]
    fn test_valid_chars_untouched() {
        let valid = "abcdefghijklmnopqrstuvwxyz.:-_";
        assert_eq!(sanitize_metric_name(valid), valid);
        assert_eq!(
            sanitize_metric_name(&valid.to_uppercase()),
            valid.to_uppercase()
        );
    }

    #[test]
    fn test_truncates_long_names() {
        let long = "a".repeat(500);
        assert_eq!(sanitize_metric_name(&long), "a".repeat(255));
    }

    #[test]
    fn test_collapses_invalid_runs() {
        assert_eq!(
            sanitize_metric_name("   \t\nbat$$$*[]()m#@%^&=`~an"),
            "-bat-m-an"
        );
        assert_eq!(sanitize_metric_name("Just*toBeSafe"), "Just-toBeSafe");
    }

    #[test]
    fn test_sanitizer_wrapper() {
        let s = Sanitizer::metric_name();
        assert_eq!(s.apply("cpu load"), "cpu-load");
        let custom = Sanitizer::new(|n| n.to_lowercase());
        assert_eq!(custom.apply("CPU"), "cpu");
        assert_eq!(Sanitizer::default().apply("a b"), "a b");
    }
}
