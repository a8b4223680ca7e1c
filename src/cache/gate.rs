//! Per-request cache decision and capture.
//!
//! A [`CacheGate`] is created for every inbound request. It decides whether
//! the request takes part in caching at all, serves a fresh stored body when
//! there is one, and otherwise captures the handler's output so it can be
//! persisted once the final status is known.
//!
//! ```text
//! Idle → Evaluated ─┬─ Served                       (stored body replayed)
//!                   └─ Capturing ─┬─ Stored + flushed
//!                                 └─ Discarded + flushed
//! ```
//!
//! Every capturing path flushes the captured body to the client exactly
//! once. Storage failures never reach the client: a failed lookup serves the
//! request uncached and a failed write still delivers the body.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use tracing::{debug, warn};

use super::capture::ResponseWriter;
use super::clock::Clock;
use super::config::CacheConfig;
use super::key::CacheKey;
use super::store::{CacheStore, StorageError};
use crate::http::{Method, Request};

/// The parts of a request the cache looks at.
///
/// # Examples
///
/// ```
/// use pagecache::cache::RequestInfo;
/// use pagecache::http::Method;
///
/// let info = RequestInfo::new(Method::Get, "/page?id=5")
///     .with_server_host("backend.internal")
///     .with_forwarded_host("www.example.com");
///
/// assert_eq!(info.effective_host(), Some("www.example.com"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    method: Method,
    uri: String,
    forwarded_host: Option<String>,
    server_host: Option<String>,
}

impl RequestInfo {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            forwarded_host: None,
            server_host: None,
        }
    }

    /// Sets the host reported by a fronting proxy.
    #[must_use]
    pub fn with_forwarded_host(mut self, host: impl Into<String>) -> Self {
        self.forwarded_host = Some(host.into());
        self
    }

    /// Sets the host name the server was addressed by.
    #[must_use]
    pub fn with_server_host(mut self, host: impl Into<String>) -> Self {
        self.server_host = Some(host.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Raw request URI: path plus query string.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The forwarded host when present, otherwise the server host.
    pub fn effective_host(&self) -> Option<&str> {
        self.forwarded_host
            .as_deref()
            .or(self.server_host.as_deref())
    }
}

impl From<&Request> for RequestInfo {
    fn from(request: &Request) -> Self {
        Self {
            method: request.method().clone(),
            uri: request.raw_uri().to_owned(),
            forwarded_host: request.forwarded_host().map(str::to_owned),
            server_host: request.host().map(str::to_owned),
        }
    }
}

/// Result of [`CacheGate::before_handle`].
#[derive(Debug)]
pub enum Decision<W> {
    /// A fresh stored body has been written to the client sink. The rest of
    /// the pipeline, the handler included, must be skipped.
    Served(W),
    /// Run the handler, writing its body into the given writer, then pass
    /// the writer to [`CacheGate::after_handle`].
    Proceed(ResponseWriter<W>),
}

/// What [`CacheGate::after_handle`] did with the handler output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Capture never began; the body went straight to the client.
    Bypassed,
    /// The body was persisted and flushed to the client.
    Stored,
    /// The request or status was not eligible; the body was flushed only.
    Discarded,
    /// Persisting failed; the body was flushed anyway.
    StoreFailed,
}

/// Cache decision logic bound to a single request.
pub struct CacheGate {
    config: Arc<CacheConfig>,
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    request: RequestInfo,
    key: CacheKey,
}

impl CacheGate {
    /// Binds the shared cache state to one request and derives its key.
    pub fn new(
        config: Arc<CacheConfig>,
        store: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
        request: RequestInfo,
    ) -> Self {
        let key = CacheKey::from_uri(request.uri());
        Self {
            config,
            store,
            clock,
            request,
            key,
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn request(&self) -> &RequestInfo {
        &self.request
    }

    /// Returns `true` if this request takes part in caching.
    ///
    /// Only `GET` requests are eligible, the effective host must pass the
    /// host allow-list, and the URI must not contain an excluded fragment.
    pub fn is_cacheable(&self) -> bool {
        self.request.method == Method::Get
            && self.config.allows_host(self.request.effective_host())
            && !self.config.excludes(&self.request.uri)
    }

    /// Serves from storage or picks the writer for the handler's output.
    ///
    /// # Errors
    ///
    /// Only errors from writing to `client` are returned. Storage errors
    /// are logged and the request proceeds uncached.
    pub fn before_handle<W: Write>(&self, mut client: W) -> io::Result<Decision<W>> {
        if !self.is_cacheable() {
            debug!(uri = %self.request.uri, "request not cacheable");
            return Ok(Decision::Proceed(ResponseWriter::Direct(client)));
        }

        match self.lookup() {
            Ok(Some(body)) => {
                debug!(key = %self.key, uri = %self.request.uri, bytes = body.len(), "cache hit");
                client.write_all(&body)?;
                client.flush()?;
                Ok(Decision::Served(client))
            }
            Ok(None) => {
                debug!(key = %self.key, uri = %self.request.uri, "cache miss, capturing");
                Ok(Decision::Proceed(ResponseWriter::capturing(client)))
            }
            Err(e) => {
                warn!(key = %self.key, uri = %self.request.uri, error = %e, "cache lookup failed, serving uncached");
                Ok(Decision::Proceed(ResponseWriter::Direct(client)))
            }
        }
    }

    /// Settles a capture once the handler has finished with `status`.
    ///
    /// Persists the captured body when the request is still cacheable and
    /// the status is allowed, then writes it to the client once and hands
    /// the client sink back.
    ///
    /// # Errors
    ///
    /// Only errors from writing to the client sink are returned.
    pub fn after_handle<W: Write>(
        &self,
        writer: ResponseWriter<W>,
        status: impl Into<u16>,
    ) -> io::Result<(CaptureOutcome, W)> {
        let (capture, mut client) = match writer {
            ResponseWriter::Direct(client) => return Ok((CaptureOutcome::Bypassed, client)),
            ResponseWriter::Capturing { capture, client } => (capture, client),
        };
        let status = status.into();
        let body = capture.into_bytes();

        let outcome = if self.is_cacheable() && self.config.allows_status(status) {
            match self.store.write(&self.key, &body) {
                Ok(()) => {
                    debug!(key = %self.key, uri = %self.request.uri, bytes = body.len(), "response stored");
                    CaptureOutcome::Stored
                }
                Err(e) => {
                    warn!(key = %self.key, uri = %self.request.uri, error = %e, "failed to store response");
                    CaptureOutcome::StoreFailed
                }
            }
        } else {
            debug!(key = %self.key, status, "response not stored");
            CaptureOutcome::Discarded
        };

        client.write_all(&body)?;
        client.flush()?;
        Ok((outcome, client))
    }

    // A racing overwrite can remove the entry between the stat and the read;
    // that reads as a miss.
    fn lookup(&self) -> Result<Option<Bytes>, StorageError> {
        if !self.store.exists(&self.key)? {
            return Ok(None);
        }
        if !self.is_fresh(self.store.mod_time(&self.key)?) {
            return Ok(None);
        }
        match self.store.read(&self.key) {
            Ok(body) => Ok(Some(body)),
            Err(StorageError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn is_fresh(&self, modified: SystemTime) -> bool {
        modified
            .checked_add(self.config.ttl())
            .is_some_and(|expires| expires > self.clock.now())
    }
}
