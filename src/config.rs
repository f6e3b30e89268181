//! Client configuration
//!
//! All options are resolved once at construction; the builder validates the
//! endpoint URL and fails with [`HecError::Config`] on bad input.

use crate::serialize::Metadata;
use crate::transport::HttpSettings;
use crate::{deep_merge, Backoff, HecError};
use reqwest::Url;
use serde_json::{Map, Value};
use std::time::Duration;

pub(crate) const HEALTH_PATH: &str = "/services/collector/health";

/// Resolved client configuration.
#[derive(Debug, Clone)]
pub struct HecConfig {
    /// Ingest endpoint.
    pub url: Url,
    /// Bearer token; the auth header is omitted when unset.
    pub token: Option<String>,
    pub user_agent: String,
    pub validate_certificate: bool,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Per-host socket cap.
    pub max_sockets: usize,
    pub keep_alive: bool,
    /// Compress request bodies.
    pub gzip: bool,
    /// Emit multi-measurement envelopes instead of fanning out.
    pub multi_metric_format: bool,
    /// Byte threshold that triggers an eager flush.
    pub max_queue_size: usize,
    /// Entry-count threshold; `None` disables the trigger.
    pub max_queue_entries: Option<usize>,
    /// Idle flush delay.
    pub flush_time: Duration,
    /// Retry cap per batch.
    pub max_retries: usize,
    /// Wait-time strategy between send attempts.
    pub retry_wait_time: Backoff,
    /// Applied where a record omits a metadata field.
    pub default_metadata: Metadata,
    /// Deep-merged under each record's own fields.
    pub default_fields: Map<String, Value>,
}

impl HecConfig {
    /// Configuration with all defaults for an endpoint.
    pub fn new(url: &str) -> Result<Self, HecError> {
        Self::builder(url).finish()
    }

    pub fn builder(url: impl Into<String>) -> HecConfigBuilder {
        HecConfigBuilder {
            url: url.into(),
            token: None,
            user_agent: None,
            validate_certificate: true,
            timeout: Duration::from_secs(30),
            max_sockets: 128,
            keep_alive: true,
            gzip: false,
            multi_metric_format: false,
            max_queue_size: 1024 * 1024,
            max_queue_entries: None,
            flush_time: Duration::ZERO,
            max_retries: 10,
            retry_wait_time: Backoff::exponential(
                Duration::from_millis(100),
                2.0,
                Duration::from_secs(5),
            ),
            default_metadata: Metadata::default(),
            default_fields: Map::new(),
        }
    }

    /// The health endpoint: the ingest URL with its path replaced.
    pub(crate) fn health_url(&self) -> Url {
        let mut url = self.url.clone();
        url.set_path(HEALTH_PATH);
        url.set_query(None);
        url
    }

    pub(crate) fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            keep_alive: self.keep_alive,
            max_sockets_per_host: self.max_sockets,
            timeout: self.timeout,
            validate_certificate: self.validate_certificate,
        }
    }
}

/// Builder for [`HecConfig`].
#[derive(Debug, Clone)]
pub struct HecConfigBuilder {
    url: String,
    token: Option<String>,
    user_agent: Option<String>,
    validate_certificate: bool,
    timeout: Duration,
    max_sockets: usize,
    keep_alive: bool,
    gzip: bool,
    multi_metric_format: bool,
    max_queue_size: usize,
    max_queue_entries: Option<usize>,
    flush_time: Duration,
    max_retries: usize,
    retry_wait_time: Backoff,
    default_metadata: Metadata,
    default_fields: Map<String, Value>,
}

impl HecConfigBuilder {
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn validate_certificate(mut self, validate: bool) -> Self {
        self.validate_certificate = validate;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_sockets(mut self, max_sockets: usize) -> Self {
        self.max_sockets = max_sockets;
        self
    }

    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn gzip(mut self, gzip: bool) -> Self {
        self.gzip = gzip;
        self
    }

    pub fn multi_metric_format(mut self, enabled: bool) -> Self {
        self.multi_metric_format = enabled;
        self
    }

    pub fn max_queue_size(mut self, bytes: usize) -> Self {
        self.max_queue_size = bytes;
        self
    }

    /// Entry-count flush trigger; `None` disables it.
    pub fn max_queue_entries(mut self, entries: Option<usize>) -> Self {
        self.max_queue_entries = entries;
        self
    }

    pub fn flush_time(mut self, delay: Duration) -> Self {
        self.flush_time = delay;
        self
    }

    pub fn max_retries(mut self, retries: usize) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn retry_wait_time(mut self, backoff: impl Into<Backoff>) -> Self {
        self.retry_wait_time = backoff.into();
        self
    }

    pub fn default_metadata(mut self, metadata: Metadata) -> Self {
        self.default_metadata = metadata;
        self
    }

    pub fn default_fields(mut self, fields: Map<String, Value>) -> Self {
        self.default_fields = fields;
        self
    }

    /// Validate and resolve.
    pub fn finish(self) -> Result<HecConfig, HecError> {
        let url = Url::parse(&self.url)
            .map_err(|e| HecError::Config(format!("invalid HEC URL {:?}: {e}", self.url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(HecError::Config(format!(
                "unsupported URL scheme {:?}, expected http or https",
                url.scheme()
            )));
        }
        if self.max_queue_size == 0 {
            return Err(HecError::Config("max_queue_size must be > 0".to_string()));
        }
        Ok(HecConfig {
            url,
            token: self.token,
            user_agent: self
                .user_agent
                .unwrap_or_else(|| format!("hec-sink/{}", env!("CARGO_PKG_VERSION"))),
            validate_certificate: self.validate_certificate,
            timeout: self.timeout,
            max_sockets: self.max_sockets,
            keep_alive: self.keep_alive,
            gzip: self.gzip,
            multi_metric_format: self.multi_metric_format,
            max_queue_size: self.max_queue_size,
            max_queue_entries: self.max_queue_entries,
            flush_time: self.flush_time,
            max_retries: self.max_retries,
            retry_wait_time: self.retry_wait_time,
            default_metadata: self.default_metadata,
            default_fields: self.default_fields,
        })
    }
}

/// Partial configuration applied by [`HecClient::clone_with`].
///
/// Empty values (blank strings, empty maps, all-unset metadata) are
/// dropped before deciding whether the override set is empty.
///
/// [`HecClient::clone_with`]: crate::HecClient::clone_with
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub url: Option<String>,
    pub token: Option<String>,
    pub user_agent: Option<String>,
    pub gzip: Option<bool>,
    pub multi_metric_format: Option<bool>,
    pub max_queue_size: Option<usize>,
    pub max_queue_entries: Option<Option<usize>>,
    pub flush_time: Option<Duration>,
    pub max_retries: Option<usize>,
    pub retry_wait_time: Option<Backoff>,
    pub default_metadata: Option<Metadata>,
    pub default_fields: Option<Map<String, Value>>,
}

impl ConfigOverrides {
    /// Drop blank values.
    pub(crate) fn normalized(mut self) -> Self {
        if self.url.as_deref().is_some_and(str::is_empty) {
            self.url = None;
        }
        if self.token.as_deref().is_some_and(str::is_empty) {
            self.token = None;
        }
        if self.user_agent.as_deref().is_some_and(str::is_empty) {
            self.user_agent = None;
        }
        if self.default_metadata.as_ref().is_some_and(|m| *m == Metadata::default()) {
            self.default_metadata = None;
        }
        if self.default_fields.as_ref().is_some_and(Map::is_empty) {
            self.default_fields = None;
        }
        self
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.url.is_none()
            && self.token.is_none()
            && self.user_agent.is_none()
            && self.gzip.is_none()
            && self.multi_metric_format.is_none()
            && self.max_queue_size.is_none()
            && self.max_queue_entries.is_none()
            && self.flush_time.is_none()
            && self.max_retries.is_none()
            && self.retry_wait_time.is_none()
            && self.default_metadata.is_none()
            && self.default_fields.is_none()
    }

    pub(crate) fn changes_url(&self, base: &HecConfig) -> bool {
        self.url.as_ref().is_some_and(|u| u != base.url.as_str())
    }

    /// Base configuration with these overrides merged on top.
    ///
    /// `default_fields` deep-merges; metadata merges per field; everything
    /// else is replaced wholesale.
    pub(crate) fn apply(self, base: &HecConfig) -> Result<HecConfig, HecError> {
        let mut merged = base.clone();
        if let Some(url) = self.url {
            merged.url = Url::parse(&url)
                .map_err(|e| HecError::Config(format!("invalid HEC URL {url:?}: {e}")))?;
        }
        if let Some(token) = self.token {
            merged.token = Some(token);
        }
        if let Some(user_agent) = self.user_agent {
            merged.user_agent = user_agent;
        }
        if let Some(gzip) = self.gzip {
            merged.gzip = gzip;
        }
        if let Some(multi) = self.multi_metric_format {
            merged.multi_metric_format = multi;
        }
        if let Some(bytes) = self.max_queue_size {
            merged.max_queue_size = bytes;
        }
        if let Some(entries) = self.max_queue_entries {
            merged.max_queue_entries = entries;
        }
        if let Some(delay) = self.flush_time {
            merged.flush_time = delay;
        }
        if let Some(retries) = self.max_retries {
            merged.max_retries = retries;
        }
        if let Some(backoff) = self.retry_wait_time {
            merged.retry_wait_time = backoff;
        }
        if let Some(metadata) = self.default_metadata {
            merged.default_metadata = Metadata {
                host: metadata.host.or(merged.default_metadata.host),
                source: metadata.source.or(merged.default_metadata.source),
                sourcetype: metadata.sourcetype.or(merged.default_metadata.sourcetype),
                index: metadata.index.or(merged.default_metadata.index),
            };
        }
        if let Some(fields) = self.default_fields {
            deep_merge(&mut merged.default_fields, &fields);
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_are_applied() {
        let config = HecConfig::new("https://hec.example.com:8088/services/collector").unwrap();
        assert!(config.token.is_none());
        assert!(config.validate_certificate);
        assert!(config.keep_alive);
        assert!(!config.gzip);
        assert!(!config.multi_metric_format);
        assert_eq!(config.max_queue_size, 1024 * 1024);
        assert_eq!(config.max_queue_entries, None);
        assert_eq!(config.flush_time, Duration::ZERO);
        assert!(config.user_agent.starts_with("hec-sink/"));
    }

    #[test]
    fn invalid_url_is_a_config_error() {
        let err = HecConfig::new("not a url").unwrap_err();
        assert!(matches!(err, HecError::Config(_)));

        let err = HecConfig::new("ftp://hec.example.com/").unwrap_err();
        assert!(matches!(err, HecError::Config(_)));
    }

    #[test]
    fn health_url_replaces_the_path() {
        let config =
            HecConfig::new("https://hec.example.com:8088/services/collector/event?channel=x")
                .unwrap();
        assert_eq!(
            config.health_url().as_str(),
            "https://hec.example.com:8088/services/collector/health"
        );
    }

    #[test]
    fn normalized_overrides_drop_blank_values() {
        let overrides = ConfigOverrides {
            url: Some(String::new()),
            token: Some(String::new()),
            default_fields: Some(Map::new()),
            default_metadata: Some(Metadata::default()),
            ..ConfigOverrides::default()
        };
        assert!(overrides.normalized().is_empty());
    }

    #[test]
    fn apply_deep_merges_default_fields() {
        let base = HecConfig::builder("https://hec.example.com/")
            .default_fields({
                let mut m = Map::new();
                m.insert("env".to_string(), json!("prod"));
                m.insert("nested".to_string(), json!({"a": 1}));
                m
            })
            .finish()
            .unwrap();

        let mut fields = Map::new();
        fields.insert("nested".to_string(), json!({"b": 2}));
        let merged = ConfigOverrides {
            default_fields: Some(fields),
            gzip: Some(true),
            ..ConfigOverrides::default()
        }
        .apply(&base)
        .unwrap();

        assert!(merged.gzip);
        assert_eq!(merged.default_fields["env"], json!("prod"));
        assert_eq!(merged.default_fields["nested"], json!({"a": 1, "b": 2}));
    }

    #[test]
    fn changes_url_detects_only_real_changes() {
        let base = HecConfig::new("https://hec.example.com/services/collector").unwrap();
        let same = ConfigOverrides {
            url: Some("https://hec.example.com/services/collector".to_string()),
            ..ConfigOverrides::default()
        };
        assert!(!same.changes_url(&base));
        let different = ConfigOverrides {
            url: Some("https://other.example.com/services/collector".to_string()),
            ..ConfigOverrides::default()
        };
        assert!(different.changes_url(&base));
    }
}
