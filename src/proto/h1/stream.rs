use bytes::{Bytes, BytesMut};
use http::{Method, StatusCode};

use super::chunks::ChunkQueue;
use crate::body::BodySource;
use crate::client::dispatch::NewStream;
use crate::client::StreamHandler;
use crate::headers;
use crate::message::{RequestHead, Response, ResponseHead};

/// One request/response exchange.
///
/// The request head is held only until fully sent, then dropped. The send
/// and receive sides finish independently (a server may answer before the
/// request body is done); the completion callback fires exactly once, when
/// both are finished or when the stream fails.
pub(crate) struct Stream {
    pub(crate) id: u64,
    pub(crate) head: Option<RequestHead>,
    pub(crate) body: Option<Box<dyn BodySource>>,
    pub(crate) chunks: ChunkQueue,
    pub(crate) chunked: bool,
    pub(crate) is_head_request: bool,
    pub(crate) requested_upgrade: bool,
    pub(crate) close_requested: bool,
    pub(crate) handler: Box<dyn StreamHandler>,
    pub(crate) collect_body: bool,
    /// Response head block currently being parsed.
    pub(crate) pending_head: Option<ResponseHead>,
    pub(crate) resp_head: Option<ResponseHead>,
    pub(crate) informationals: Vec<ResponseHead>,
    pub(crate) body_acc: BytesMut,
    /// Read credit for body bytes, in bytes.
    pub(crate) window: u64,
    pub(crate) activated: bool,
    pub(crate) sent: bool,
    pub(crate) received: bool,
    pub(crate) completed: bool,
    pub(crate) released: bool,
}

impl Stream {
    pub(crate) fn new(new: NewStream, window: u64) -> Stream {
        let chunked = headers::transfer_encoding_is_chunked(&new.head.headers);
        let is_head_request = new.head.method == Method::HEAD;
        let requested_upgrade = headers::requests_upgrade(&new.head.headers);
        let close_requested = headers::connection_has_close(&new.head.headers);
        Stream {
            id: new.id,
            head: Some(new.head),
            body: new.body,
            chunks: ChunkQueue::new(),
            chunked,
            is_head_request,
            requested_upgrade,
            close_requested,
            handler: new.handler,
            collect_body: new.collect_body,
            pending_head: None,
            resp_head: None,
            informationals: Vec::new(),
            body_acc: BytesMut::new(),
            window,
            activated: false,
            sent: false,
            received: false,
            completed: false,
            released: false,
        }
    }

    /// Fires the completion callback with the accumulated response.
    pub(crate) fn complete_ok(&mut self) {
        if self.completed {
            return;
        }
        debug_assert!(self.sent && self.received);
        self.completed = true;
        let head = self
            .resp_head
            .take()
            .unwrap_or_else(|| ResponseHead::new(StatusCode::OK, Bytes::new()));
        let response = Response {
            head,
            body: self.body_acc.split().freeze(),
            informationals: std::mem::take(&mut self.informationals),
        };
        trace!("stream {} complete, status {}", self.id, response.status());
        self.handler.on_complete(Ok(response));
    }

    /// Fails the stream: drains queued chunks and fires the completion
    /// callback with `error`, exactly once.
    pub(crate) fn complete_err(&mut self, error: crate::Error) {
        if self.completed {
            return;
        }
        self.completed = true;
        self.body = None;
        self.chunks.drain_with_error(|| error.dup_reason());
        debug!("stream {} failed: {}", self.id, error);
        self.handler.on_complete(Err(error));
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        // chunk completions fire exactly once, even for streams that are
        // discarded without ever failing or completing
        self.chunks.drain_with_error(crate::Error::new_closed);
    }
}
