use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::Url;
use crate::errors::ConfigError;

/// Highest progress value a job may report before its url is known.
pub const MAX_PROGRESS_CAP: f64 = 0.99;

// Durations are written as milliseconds in config files
fn serialize_millis<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

fn deserialize_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let millis = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(millis))
}

/// Upload aggregator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Cadence of synthetic progress updates
    #[serde(serialize_with = "serialize_millis", deserialize_with = "deserialize_millis")]
    pub progress_interval: Duration,
    /// Progress added on every tick
    pub progress_step: f64,
    /// Ceiling for progress while the transport call is outstanding
    pub progress_cap: f64,
    /// Maximum simultaneous transport calls, unbounded when `None`
    pub max_concurrent: Option<usize>,
    pub command_buffer: usize,
    pub event_capacity: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            progress_interval: Duration::from_millis(200),
            progress_step: 0.1,
            progress_cap: 0.9,
            max_concurrent: None,
            command_buffer: 64,
            event_capacity: 256,
        }
    }
}

impl AggregatorConfig {
    /// Clamp values the worker cannot run with.
    pub fn normalized(mut self) -> Self {
        if !self.progress_cap.is_finite() {
            self.progress_cap = Self::default().progress_cap;
        }
        self.progress_cap = self.progress_cap.clamp(0.0, MAX_PROGRESS_CAP);
        if !self.progress_step.is_finite() || self.progress_step < 0.0 {
            self.progress_step = 0.0;
        }
        if self.progress_interval.is_zero() {
            self.progress_interval = Self::default().progress_interval;
        }
        self.max_concurrent = self.max_concurrent.filter(|limit| *limit > 0);
        self.command_buffer = self.command_buffer.max(1);
        self.event_capacity = self.event_capacity.max(1);
        self
    }
}

/// HTTP upload transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpTransportConfig {
    pub endpoint: Url,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    /// JSON field holding the uploaded url in the response body
    #[serde(default = "default_url_field")]
    pub url_field: String,
    #[serde(
        default = "default_timeout",
        serialize_with = "serialize_millis",
        deserialize_with = "deserialize_millis"
    )]
    pub timeout: Duration,
}

fn default_content_type() -> String {
    "application/octet-stream".to_string()
}

fn default_url_field() -> String {
    "url".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

impl HttpTransportConfig {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            token: None,
            content_type: default_content_type(),
            url_field: default_url_field(),
            timeout: default_timeout(),
        }
    }
}

/// Listing creation endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingConfig {
    pub endpoint: Url,
    #[serde(default)]
    pub token: Option<String>,
}

/// Application config, read from `config.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    pub transport: HttpTransportConfig,
    #[serde(default)]
    pub listing: Option<ListingConfig>,
}

impl AppConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: AppConfig = toml::from_str(content)?;
        config.aggregator = config.aggregator.normalized();
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}
