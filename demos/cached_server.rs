//! Serves a slow page behind the response cache.
//!
//! ```text
//! cargo run --example cached_server -- [CONFIG.json] [CACHE_DIR]
//! curl -i http://127.0.0.1:8080/page?id=5
//! ```
//!
//! The first request takes a second and answers `X-Cache: MISS`; repeats
//! within the TTL answer `X-Cache: HIT` immediately.

use std::sync::Arc;
use std::time::Duration;

use pagecache::cache::{CacheConfig, CacheMiddleware, FsStore};
use pagecache::context::Context;
use pagecache::middleware::{LoggerMiddleware, endpoint, from_middleware};
use pagecache::{Response, Server, StatusCode};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,pagecache=debug")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => CacheConfig::from_json_file(path)?,
        None => CacheConfig::new().ttl_seconds(60).exclude_url("/admin"),
    };
    let cache_dir = args.next().unwrap_or_else(|| "./page-cache".to_owned());
    let store = FsStore::open(cache_dir)?;

    let server = Server::bind("127.0.0.1:8080").await?;
    tracing::info!(addr = %server.local_addr(), root = %store.root().display(), "demo ready");

    server
        .serve(vec![
            from_middleware(Arc::new(LoggerMiddleware)),
            from_middleware(Arc::new(CacheMiddleware::new(config, Arc::new(store)))),
            endpoint(render),
        ])
        .await?;
    Ok(())
}

async fn render(ctx: Context) -> Response {
    tokio::time::sleep(Duration::from_secs(1)).await;
    match ctx.request().path() {
        "/page" | "/admin" => Response::new(StatusCode::OK)
            .header("Content-Type", "text/html; charset=utf-8")
            .body(format!(
                "<html><body>rendered {}</body></html>",
                ctx.request().raw_uri()
            )),
        _ => Response::new(StatusCode::NOT_FOUND).body("not found"),
    }
}
