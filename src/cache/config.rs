//! Cache policy configuration.
//!
//! A [`CacheConfig`] is built once at startup, either through the builder
//! methods or from JSON, and then shared read-only between all in-flight
//! requests.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// One day, in seconds.
pub const DEFAULT_TTL_SECONDS: u64 = 60 * 60 * 24;

/// Content type sent with bodies replayed from the cache.
pub const DEFAULT_HIT_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Errors raised while loading a [`CacheConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read cache config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid cache config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Caching policy: TTL, host allow-list, status allow-list and URL exclusions.
///
/// | Setting                | Default                      |
/// |------------------------|------------------------------|
/// | `ttl_seconds`          | `86400` (one day)            |
/// | `enabled_hosts`        | empty, every host is cached  |
/// | `enabled_status_codes` | `{"200"}`                    |
/// | `exclude_urls`         | empty                        |
/// | `hit_content_type`     | `text/html; charset=utf-8`   |
///
/// Hosts and exclusions are substring matches. Status codes are kept as
/// strings and compared against the decimal form of the response status.
///
/// Only the body is stored. A hit is always replayed as `200 OK` with
/// `hit_content_type`, so an entry captured from a `301` or `404` response
/// comes back as a `200` carrying the original body.
///
/// # Examples
///
/// ```
/// use pagecache::cache::CacheConfig;
///
/// let config = CacheConfig::new()
///     .ttl_seconds(600)
///     .enable_host("example.com")
///     .exclude_url("/admin");
///
/// assert_eq!(config.ttl().as_secs(), 600);
/// assert!(config.allows_status(200));
/// assert!(!config.allows_status(404));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    #[serde(alias = "ttlSeconds")]
    ttl_seconds: u64,

    #[serde(alias = "enabledHosts")]
    enabled_hosts: BTreeSet<String>,

    #[serde(alias = "enabledHttpStatusCodes", alias = "enabledStatusCodes")]
    enabled_status_codes: BTreeSet<String>,

    #[serde(alias = "excludeUrls")]
    exclude_urls: BTreeSet<String>,

    #[serde(alias = "hitContentType")]
    hit_content_type: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheConfig {
    /// Creates a configuration with the defaults listed above.
    pub fn new() -> Self {
        Self {
            ttl_seconds: DEFAULT_TTL_SECONDS,
            enabled_hosts: BTreeSet::new(),
            enabled_status_codes: BTreeSet::from(["200".to_owned()]),
            exclude_urls: BTreeSet::new(),
            hit_content_type: DEFAULT_HIT_CONTENT_TYPE.to_owned(),
        }
    }

    /// Parses a JSON document. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Json`] on malformed JSON or unknown fields.
    ///
    /// # Examples
    ///
    /// ```
    /// use pagecache::cache::CacheConfig;
    ///
    /// let config = CacheConfig::from_json(r#"{
    ///     "ttlSeconds": 3600,
    ///     "enabledHttpStatusCodes": ["200", "301"],
    ///     "excludeUrls": ["/login"]
    /// }"#).unwrap();
    ///
    /// assert_eq!(config.ttl().as_secs(), 3600);
    /// assert!(config.allows_status(301));
    /// assert!(config.excludes("/login?next=/"));
    /// ```
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read and
    /// [`ConfigError::Json`] if its contents are invalid.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Sets the time-to-live of stored entries, in seconds.
    #[must_use]
    pub fn ttl_seconds(mut self, seconds: u64) -> Self {
        self.ttl_seconds = seconds;
        self
    }

    /// Adds a host substring to the allow-list. Once the list is non-empty,
    /// only matching hosts are cached.
    #[must_use]
    pub fn enable_host(mut self, host: impl Into<String>) -> Self {
        self.enabled_hosts.insert(host.into());
        self
    }

    /// Replaces the status allow-list.
    #[must_use]
    pub fn enabled_status_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enabled_status_codes = codes.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a status code to the allow-list.
    #[must_use]
    pub fn enable_status_code(mut self, code: u16) -> Self {
        self.enabled_status_codes.insert(code.to_string());
        self
    }

    /// Adds a URI substring that makes a request ineligible.
    #[must_use]
    pub fn exclude_url(mut self, fragment: impl Into<String>) -> Self {
        self.exclude_urls.insert(fragment.into());
        self
    }

    /// Sets the `Content-Type` sent with replayed bodies.
    #[must_use]
    pub fn hit_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.hit_content_type = content_type.into();
        self
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn enabled_hosts(&self) -> &BTreeSet<String> {
        &self.enabled_hosts
    }

    pub fn exclude_urls(&self) -> &BTreeSet<String> {
        &self.exclude_urls
    }

    pub fn content_type(&self) -> &str {
        &self.hit_content_type
    }

    /// Returns `true` if `host` passes the allow-list.
    ///
    /// An empty allow-list passes every request, including ones with no host
    /// at all. A non-empty list needs a host containing one of its entries.
    pub fn allows_host(&self, host: Option<&str>) -> bool {
        if self.enabled_hosts.is_empty() {
            return true;
        }
        host.is_some_and(|host| self.enabled_hosts.iter().any(|h| host.contains(h.as_str())))
    }

    /// Returns `true` if `status` is in the status allow-list.
    pub fn allows_status(&self, status: u16) -> bool {
        self.enabled_status_codes.contains(&status.to_string())
    }

    /// Returns `true` if `uri` contains any excluded fragment.
    pub fn excludes(&self, uri: &str) -> bool {
        self.exclude_urls
            .iter()
            .any(|fragment| uri.contains(fragment.as_str()))
    }
}
