//! Response caching as a pipeline stage.

use std::io::Write;
use std::pin::Pin;
use std::sync::Arc;

use tracing::warn;

use super::clock::{Clock, SystemClock};
use super::config::CacheConfig;
use super::gate::{CacheGate, CaptureOutcome, Decision, RequestInfo};
use super::store::CacheStore;
use crate::{
    Response, StatusCode,
    context::Context,
    middleware::{Middleware, Next},
};

/// Response header reporting how the cache handled a request.
pub const CACHE_STATUS_HEADER: &str = "X-Cache";

/// Middleware that serves stored bodies and stores fresh ones.
///
/// For each request a [`CacheGate`] is built from the request line and host
/// headers.
///
/// - **Hit**: the stored body is returned as `200 OK` with the configured
///   content type, whatever status it was captured from. The rest of the
///   pipeline is **not** called.
/// - **Miss**: the pipeline runs, its body is captured, persisted if the
///   status is allowed, and returned to the client unchanged.
/// - **Not cacheable**: the pipeline runs untouched.
///
/// The outcome is reported in the `X-Cache` header as `HIT`, `MISS` or
/// `BYPASS`.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use pagecache::cache::{CacheConfig, CacheMiddleware, FsStore};
/// use pagecache::middleware::from_middleware;
///
/// let store = FsStore::open("/var/cache/pages")?;
/// let cache = CacheMiddleware::new(
///     CacheConfig::new().exclude_url("/admin"),
///     Arc::new(store),
/// );
/// let handler = from_middleware(Arc::new(cache));
/// # Ok::<(), std::io::Error>(())
/// ```
pub struct CacheMiddleware {
    config: Arc<CacheConfig>,
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
}

impl CacheMiddleware {
    /// Creates the middleware with the system clock.
    pub fn new(config: CacheConfig, store: Arc<dyn CacheStore>) -> Self {
        Self {
            config: Arc::new(config),
            store,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the clock used for freshness checks.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Builds the gate for one request.
    pub fn gate(&self, request: RequestInfo) -> CacheGate {
        CacheGate::new(
            Arc::clone(&self.config),
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            request,
        )
    }
}

impl Middleware for CacheMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let gate = self.gate(RequestInfo::from(ctx.request()));
        let content_type = self.config.content_type().to_owned();

        Box::pin(async move {
            let mut writer = match gate.before_handle(Vec::<u8>::new()) {
                Ok(Decision::Served(body)) => {
                    return Response::new(StatusCode::OK)
                        .header("Content-Type", content_type)
                        .header(CACHE_STATUS_HEADER, "HIT")
                        .body_bytes(body);
                }
                Ok(Decision::Proceed(writer)) => writer,
                Err(e) => {
                    warn!(key = %gate.key(), error = %e, "cache replay failed, serving uncached");
                    return next.run(ctx).await;
                }
            };

            let mut response = next.run(ctx).await;
            let body = response.take_body();
            if let Err(e) = writer.write_all(&body) {
                warn!(key = %gate.key(), error = %e, "failed to capture response body");
                response.set_body(body);
                return response;
            }

            match gate.after_handle(writer, response.status()) {
                Ok((outcome, delivered)) => {
                    let label = match outcome {
                        CaptureOutcome::Bypassed => "BYPASS",
                        CaptureOutcome::Stored
                        | CaptureOutcome::Discarded
                        | CaptureOutcome::StoreFailed => "MISS",
                    };
                    response.set_body(delivered);
                    response.set_header(CACHE_STATUS_HEADER, label);
                }
                Err(e) => {
                    warn!(key = %gate.key(), error = %e, "failed to flush captured body");
                    response.set_body(body);
                }
            }
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, UNIX_EPOCH};

    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::cache::store::MemoryStore;
    use crate::http::Request;
    use crate::middleware::{MiddlewareHandler, endpoint, from_middleware};

    fn request(raw: &str) -> Context {
        let (req, _) = Request::parse(raw.as_bytes()).unwrap();
        Context::new(req)
    }

    fn get(uri: &str) -> Context {
        request(&format!("GET {uri} HTTP/1.1\r\nHost: localhost\r\n\r\n"))
    }

    fn pipeline(
        cache: CacheMiddleware,
        status: StatusCode,
        calls: Arc<AtomicUsize>,
    ) -> Vec<MiddlewareHandler> {
        vec![
            from_middleware(Arc::new(cache)),
            endpoint(move |ctx: Context| {
                let calls = Arc::clone(&calls);
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    Response::new(status)
                        .header("Content-Type", "text/html")
                        .body(format!("<p>{} #{n}</p>", ctx.request().raw_uri()))
                }
            }),
        ]
    }

    fn cache(store: Arc<MemoryStore>, clock: Arc<ManualClock>) -> CacheMiddleware {
        cache_with(CacheConfig::new(), store, clock)
    }

    fn cache_with(
        config: CacheConfig,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
    ) -> CacheMiddleware {
        CacheMiddleware::new(config.ttl_seconds(60), store).with_clock(clock)
    }

    #[tokio::test]
    async fn hit_skips_downstream() {
        let clock = Arc::new(ManualClock::new(UNIX_EPOCH + Duration::from_secs(1_000)));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = pipeline(cache(store.clone(), clock.clone()), StatusCode::OK, calls.clone());

        let first = Next::new(chain.clone()).run(get("/foo")).await;
        assert_eq!(first.headers().get("x-cache"), Some("MISS"));
        assert_eq!(first.body_ref(), b"<p>/foo #1</p>");

        let second = Next::new(chain).run(get("/foo")).await;
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(second.headers().get("x-cache"), Some("HIT"));
        assert_eq!(
            second.headers().get("content-type"),
            Some("text/html; charset=utf-8")
        );
        assert_eq!(second.body_ref(), b"<p>/foo #1</p>");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn post_is_bypassed() {
        let clock = Arc::new(ManualClock::new(UNIX_EPOCH));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = pipeline(cache(store.clone(), clock), StatusCode::OK, calls.clone());

        let ctx = request("POST /foo HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\n\r\n");
        let response = Next::new(chain).run(ctx).await;
        assert_eq!(response.headers().get("x-cache"), Some("BYPASS"));
        assert_eq!(response.body_ref(), b"<p>/foo #1</p>");
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn error_status_keeps_body_and_headers() {
        let clock = Arc::new(ManualClock::new(UNIX_EPOCH));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = pipeline(cache(store.clone(), clock), StatusCode::NOT_FOUND, calls.clone());

        let response = Next::new(chain.clone()).run(get("/gone")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers().get("content-type"), Some("text/html"));
        assert_eq!(response.body_ref(), b"<p>/gone #1</p>");
        assert!(store.is_empty());

        Next::new(chain).run(get("/gone")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unnamed_status_can_be_allow_listed() {
        let clock = Arc::new(ManualClock::new(UNIX_EPOCH));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let calls = Arc::new(AtomicUsize::new(0));
        let config = CacheConfig::new().enabled_status_codes(["203", "299"]);
        let status = StatusCode::from_u16(299).unwrap();
        let chain = pipeline(cache_with(config, store.clone(), clock), status, calls.clone());

        let first = Next::new(chain.clone()).run(get("/odd")).await;
        assert_eq!(first.status().as_u16(), 299);
        assert_eq!(first.headers().get("x-cache"), Some("MISS"));
        assert_eq!(store.write_count(), 1);

        let second = Next::new(chain).run(get("/odd")).await;
        assert_eq!(second.headers().get("x-cache"), Some("HIT"));
        assert_eq!(second.body_ref(), b"<p>/odd #1</p>");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stored_not_found_replays_as_ok() {
        let clock = Arc::new(ManualClock::new(UNIX_EPOCH));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let calls = Arc::new(AtomicUsize::new(0));
        let config = CacheConfig::new().enabled_status_codes(["404"]);
        let chain = pipeline(
            cache_with(config, store.clone(), clock),
            StatusCode::NOT_FOUND,
            calls.clone(),
        );

        let first = Next::new(chain.clone()).run(get("/gone")).await;
        assert_eq!(first.status(), StatusCode::NOT_FOUND);

        let second = Next::new(chain).run(get("/gone")).await;
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(
            second.headers().get("content-type"),
            Some("text/html; charset=utf-8")
        );
        assert_eq!(second.body_ref(), b"<p>/gone #1</p>");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
