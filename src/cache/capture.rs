//! Output sinks for the downstream handler.
//!
//! [`CacheGate::before_handle`](super::CacheGate::before_handle) picks a
//! [`ResponseWriter`] for the request: either the client sink itself, or a
//! [`CaptureBuffer`] that holds the bytes back until
//! [`CacheGate::after_handle`](super::CacheGate::after_handle) has decided
//! whether to persist them.

use std::io::{self, Write};

use bytes::{Bytes, BytesMut};

/// Request-scoped accumulator for handler output.
#[derive(Debug, Default)]
pub struct CaptureBuffer {
    buf: BytesMut,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes captured so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Releases the buffer, returning its contents.
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

impl Write for CaptureBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The sink a downstream handler writes its body into.
///
/// # Examples
///
/// ```
/// use std::io::Write;
/// use pagecache::cache::{CaptureBuffer, ResponseWriter};
///
/// let mut writer = ResponseWriter::Capturing {
///     capture: CaptureBuffer::new(),
///     client: Vec::<u8>::new(),
/// };
/// writer.write_all(b"<html>").unwrap();
///
/// assert_eq!(writer.captured(), Some(&b"<html>"[..]));
/// ```
#[derive(Debug)]
pub enum ResponseWriter<W> {
    /// Writes go straight to the client.
    Direct(W),
    /// Writes are held in `capture`; `client` receives nothing until the
    /// capture is settled.
    Capturing { capture: CaptureBuffer, client: W },
}

impl<W: Write> ResponseWriter<W> {
    /// Starts capturing in front of `client`.
    pub fn capturing(client: W) -> Self {
        Self::Capturing {
            capture: CaptureBuffer::new(),
            client,
        }
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self, Self::Capturing { .. })
    }

    /// Bytes held back so far, or `None` when writing directly.
    pub fn captured(&self) -> Option<&[u8]> {
        match self {
            Self::Direct(_) => None,
            Self::Capturing { capture, .. } => Some(capture.as_bytes()),
        }
    }
}

impl<W: Write> Write for ResponseWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match self {
            Self::Direct(client) => client.write(data),
            Self::Capturing { capture, .. } => capture.write(data),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Direct(client) => client.flush(),
            Self::Capturing { .. } => Ok(()),
        }
    }
}
