//! Per-request context passed down the middleware pipeline.
//!
//! Everything a layer knows about the request travels in the [`Context`]
//! value; nothing is read from process-wide state.

use crate::Request;

/// Per-request context.
#[derive(Debug)]
pub struct Context {
    request: Request,
}

impl Context {
    /// Create a new context from a request
    pub fn new(request: Request) -> Self {
        Self { request }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn into_request(self) -> Request {
        self.request
    }
}
