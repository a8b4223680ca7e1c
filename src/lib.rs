//! # pagecache
//!
//! Request-level HTTP response caching on top of a small async HTTP/1.1
//! server framework.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pagecache::cache::{CacheConfig, CacheMiddleware, FsStore};
//! use pagecache::middleware::{LoggerMiddleware, endpoint, from_middleware};
//! use pagecache::{Response, Server, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = FsStore::open("./cache")?;
//!     let cache = CacheMiddleware::new(
//!         CacheConfig::new().ttl_seconds(3600).exclude_url("/admin"),
//!         Arc::new(store),
//!     );
//!
//!     let server = Server::bind("127.0.0.1:8080").await?;
//!     server
//!         .serve(vec![
//!             from_middleware(Arc::new(LoggerMiddleware)),
//!             from_middleware(Arc::new(cache)),
//!             endpoint(|ctx| async move {
//!                 Response::new(StatusCode::OK)
//!                     .header("Content-Type", "text/html; charset=utf-8")
//!                     .body(format!("<h1>{}</h1>", ctx.request().path()))
//!             }),
//!         ])
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod context;
pub mod http;
pub mod middleware;
pub mod server;

pub use http::{Headers, Method, Request, Response, StatusCode};
pub use server::{Server, ServerError};
