//! Connection configuration.
//!
//! [`ConnectionConfig`] is built in code with `with_*` methods, or loaded
//! from a JSON file with [`ConnectionConfig::from_file`]. Fields missing from
//! the file take the same defaults as [`ConnectionConfig::new`].
//!
//! ```json
//! {
//!   "user": "me@example.com",
//!   "token": "abc123",
//!   "hostname": "metrics-api.librato.com",
//!   "protocol": "https",
//!   "timeout_secs": 30,
//!   "max_retries": 5,
//!   "sanitize": true,
//!   "tags": {"region": "us-east-1"}
//! }
//! ```

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, Result};
use crate::measurement::Tags;
use crate::retry::RetryPolicy;
use crate::sanitize::Sanitizer;

/// Default API host.
pub const DEFAULT_HOSTNAME: &str = "metrics-api.librato.com";

/// Default API base path.
pub const DEFAULT_BASE_PATH: &str = "/v1/";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// URL scheme used to reach the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    /// Plain HTTP, for local test servers.
    Http,
    /// HTTPS.
    #[default]
    Https,
}

impl Protocol {
    /// The URL scheme.
    pub fn scheme(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl FromStr for Protocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            _ => Err(ConfigError::InvalidProtocol(s.to_string())),
        }
    }
}

/// Settings shared by every request a connection makes.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Account user (usually an email address).
    pub user: String,
    /// API token.
    pub token: String,
    /// API host, optionally with `:port`.
    pub hostname: String,
    /// Path prefix for every resource, e.g. `/v1/`.
    pub base_path: String,
    /// URL scheme.
    pub protocol: Protocol,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Retry behaviour on server errors.
    pub retry: RetryPolicy,
    /// Applied to every metric name before it is queued.
    pub sanitizer: Sanitizer,
    /// Default tags merged beneath every tagged submission.
    pub tags: Tags,
}

impl ConnectionConfig {
    /// Creates a config with defaults for everything but credentials.
    ///
    /// Defaults: `https://metrics-api.librato.com/v1/`, 30s timeout,
    /// unbounded doubling retry, no-op sanitizer, no tags.
    pub fn new(user: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            token: token.into(),
            hostname: DEFAULT_HOSTNAME.to_string(),
            base_path: DEFAULT_BASE_PATH.to_string(),
            protocol: Protocol::Https,
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            sanitizer: Sanitizer::no_op(),
            tags: Tags::new(),
        }
    }

    /// Loads a config from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, if the protocol
    /// is unknown, or if credentials are missing.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let file: ConfigFile = serde_json::from_str(&data).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        file.into_config()
    }

    /// Sets the API host.
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Sets the base path. A trailing `/` is added if missing.
    #[must_use]
    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        let mut base_path = base_path.into();
        if !base_path.ends_with('/') {
            base_path.push('/');
        }
        self.base_path = base_path;
        self
    }

    /// Sets the protocol.
    #[must_use]
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the metric-name sanitizer.
    #[must_use]
    pub fn with_sanitizer(mut self, sanitizer: Sanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    /// Sets the default tag set.
    #[must_use]
    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    /// Base URL every resource path is appended to.
    pub fn base_url(&self) -> String {
        format!("{}://{}{}", self.protocol.scheme(), self.hostname, self.base_path)
    }
}

/// On-disk form of [`ConnectionConfig`].
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    /// Account user.
    pub user: Option<String>,
    /// API token.
    pub token: Option<String>,
    /// API host.
    pub hostname: Option<String>,
    /// Base path.
    pub base_path: Option<String>,
    /// `http` or `https`.
    pub protocol: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Retry ceiling; absent means unbounded.
    pub max_retries: Option<u32>,
    /// Overall retry deadline in seconds.
    pub retry_deadline_secs: Option<u64>,
    /// Use [`Sanitizer::metric_name`] instead of the no-op sanitizer.
    pub sanitize: bool,
    /// Default tags.
    pub tags: Tags,
}

impl ConfigFile {
    /// Converts the file form into a config, applying defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if credentials are missing or the protocol is unknown.
    pub fn into_config(self) -> Result<ConnectionConfig> {
        let user = self.user.filter(|u| !u.is_empty()).ok_or(ConfigError::Missing("user"))?;
        let token = self
            .token
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::Missing("token"))?;

        let mut config = ConnectionConfig::new(user, token).with_tags(self.tags);
        if let Some(hostname) = self.hostname {
            config = config.with_hostname(hostname);
        }
        if let Some(base_path) = self.base_path {
            config = config.with_base_path(base_path);
        }
        if let Some(protocol) = self.protocol {
            config = config.with_protocol(protocol.parse()?);
        }
        if let Some(secs) = self.timeout_secs {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        if let Some(max) = self.max_retries {
            config.retry = config.retry.with_max_retries(max);
        }
        if let Some(secs) = self.retry_deadline_secs {
            config.retry = config.retry.with_deadline(Duration::from_secs(secs));
        }
        if self.sanitize {
            config = config.with_sanitizer(Sanitizer::metric_name());
        }
        Ok(config)
    }
}
