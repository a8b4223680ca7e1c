//! Request-level response caching.
//!
//! A GET request whose host and URI pass the configured policy is looked up
//! by the SHA-1 of its raw URI. A fresh entry is replayed without running
//! the handler; otherwise the handler's body is captured and, when the
//! status is allowed, persisted for the next request. Entries expire lazily:
//! an entry older than the TTL is ignored and later overwritten.
//!
//! - [`CacheConfig`]: TTL, host allow-list, status allow-list, URL exclusions.
//! - [`CacheKey`]: digest of the raw request URI.
//! - [`CacheStore`]: storage contract, with [`FsStore`] and [`MemoryStore`].
//! - [`CacheGate`]: the per-request decision and capture logic.
//! - [`CacheMiddleware`]: the gate wired into the middleware pipeline.
//!
//! There is no request coalescing: concurrent misses for one key all run the
//! handler and the last write wins.

mod capture;
mod clock;
mod config;
mod gate;
mod key;
mod middleware;
mod store;

pub use capture::{CaptureBuffer, ResponseWriter};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, ConfigError, DEFAULT_HIT_CONTENT_TYPE, DEFAULT_TTL_SECONDS};
pub use gate::{CacheGate, CaptureOutcome, Decision, RequestInfo};
pub use key::CacheKey;
pub use middleware::{CACHE_STATUS_HEADER, CacheMiddleware};
pub use store::{CacheStore, FsStore, MemoryStore, StorageError};
