//! Request and response message types.
//!
//! A request head is what the user hands to `make_request`; the response
//! types are what the engine accumulates while the decoder runs and hands
//! to the stream's completion callback.

use bytes::Bytes;
use http::{Method, StatusCode};

use crate::headers::Headers;

/// The head of an outgoing request: method, path, and headers.
///
/// Everything is serialized byte-for-byte: the method and path keep their
/// case, headers keep their order, duplicates, and spelling. The version is
/// always `HTTP/1.1`.
#[derive(Clone, Debug)]
pub struct RequestHead {
    /// The request method.
    pub method: Method,
    /// The request target, copied to the wire verbatim.
    pub path: Bytes,
    /// The request headers, in the order they will be written.
    pub headers: Headers,
}

impl RequestHead {
    /// Creates a request head with no headers.
    pub fn new<P: Into<Bytes>>(method: Method, path: P) -> RequestHead {
        RequestHead {
            method,
            path: path.into(),
            headers: Headers::new(),
        }
    }

    /// Builder-style header append.
    pub fn header<N, V>(mut self, name: N, value: V) -> RequestHead
    where
        N: Into<Bytes>,
        V: Into<Bytes>,
    {
        self.headers.add(name, value);
        self
    }
}

/// The head of a received response: status, reason phrase, and headers.
#[derive(Clone, Debug)]
pub struct ResponseHead {
    /// The response status code.
    pub status: StatusCode,
    /// The reason phrase exactly as received.
    pub reason: Bytes,
    /// The response headers, in wire order.
    pub headers: Headers,
}

impl ResponseHead {
    pub(crate) fn new(status: StatusCode, reason: Bytes) -> ResponseHead {
        ResponseHead {
            status,
            reason,
            headers: Headers::new(),
        }
    }
}

/// A complete response, delivered to the stream's completion callback.
#[derive(Debug)]
pub struct Response {
    /// The final (non-informational) response head.
    pub head: ResponseHead,
    /// The accumulated body bytes, if body collection was left enabled.
    pub body: Bytes,
    /// Informational (1xx) responses received before the final one.
    pub informationals: Vec<ResponseHead>,
}

impl Response {
    /// The final response status.
    pub fn status(&self) -> StatusCode {
        self.head.status
    }

    /// The final response headers.
    pub fn headers(&self) -> &Headers {
        &self.head.headers
    }
}
