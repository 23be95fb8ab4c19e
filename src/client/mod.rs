//! HTTP/1.1 client connection interface.
//!
//! [`conn::handshake`] splits an IO object into a [`conn::SendRequest`]
//! handle and a [`conn::Connection`] future. The future owns all protocol
//! state and must be polled (usually by spawning it) for anything to
//! happen; the handle submits requests, which pipeline strictly: requests
//! go out in activation order and responses come back in the same order.
//!
//! Each request is a *stream*: submitted with [`conn::SendRequest::make_request`],
//! scheduled with [`conn::StreamHandle::activate`], observed through its
//! [`StreamHandler`] callbacks, and released by dropping the handle. For
//! `Transfer-Encoding: chunked` requests, body chunks are supplied
//! asynchronously — from any thread — with
//! [`conn::StreamHandle::write_chunk`]; a zero-size chunk terminates the
//! body.

pub mod conn;
pub(crate) mod dispatch;

use std::error::Error as StdError;
use std::fmt;

use crate::body::BodySource;
use crate::message::{RequestHead, Response, ResponseHead};

type BoxError = Box<dyn StdError + Send + Sync>;

/// Per-stream callbacks, invoked on the connection task.
///
/// Any callback may fail by returning an error; a failure stops the
/// engine, fails the stream with an opaque user error carrying the cause,
/// and shuts the connection down.
pub trait StreamHandler: Send {
    /// An informational (1xx) response arrived ahead of the final one.
    fn on_informational(&mut self, _head: &ResponseHead) -> Result<(), BoxError> {
        Ok(())
    }

    /// The final response's status line and headers arrived.
    fn on_headers(&mut self, _head: &ResponseHead) -> Result<(), BoxError> {
        Ok(())
    }

    /// A slice of response body arrived.
    ///
    /// The returned value is how many bytes of read window to re-open
    /// immediately (clamped to `data.len()`). Returning less holds the
    /// window shut until [`conn::StreamHandle::update_window`] re-opens
    /// it. The default re-opens everything.
    fn on_body(&mut self, data: &[u8]) -> Result<usize, BoxError> {
        Ok(data.len())
    }

    /// The stream reached its terminal state. Fires exactly once for
    /// every activated stream, in pipeline order.
    fn on_complete(&mut self, result: Result<Response, crate::Error>);
}

/// A [`StreamHandler`] that accumulates the response and discards it.
struct NoopHandler;

impl StreamHandler for NoopHandler {
    fn on_complete(&mut self, result: Result<Response, crate::Error>) {
        match result {
            Ok(response) => trace!("unobserved stream completed, status {}", response.status()),
            Err(e) => debug!("unobserved stream failed: {}", e),
        }
    }
}

/// Everything needed to submit one request.
pub struct RequestOptions {
    pub(crate) head: RequestHead,
    pub(crate) body: Option<Box<dyn BodySource>>,
    pub(crate) handler: Box<dyn StreamHandler>,
    pub(crate) collect_body: bool,
}

impl RequestOptions {
    /// Options for `head` with no body and no handler.
    pub fn new(head: RequestHead) -> RequestOptions {
        RequestOptions {
            head,
            body: None,
            handler: Box::new(NoopHandler),
            collect_body: true,
        }
    }

    /// Attaches a body source, framed by the request's `Content-Length`
    /// header. (Chunked bodies are supplied per-chunk with
    /// [`conn::StreamHandle::write_chunk`] instead.)
    pub fn body<B: BodySource + 'static>(mut self, body: B) -> RequestOptions {
        self.body = Some(Box::new(body));
        self
    }

    /// Sets the stream's callbacks.
    pub fn handler<H: StreamHandler + 'static>(mut self, handler: H) -> RequestOptions {
        self.handler = Box::new(handler);
        self
    }

    /// Whether body bytes also accumulate into the [`Response`] handed to
    /// `on_complete` (default `true`; turn off for large streamed bodies).
    pub fn collect_body(mut self, enabled: bool) -> RequestOptions {
        self.collect_body = enabled;
        self
    }
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("method", &self.head.method)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}
