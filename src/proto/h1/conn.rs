use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use http::StatusCode;
use tokio::io::{AsyncRead, AsyncWrite};

use super::decode::{DecodeSink, Decoder, HeaderBlock};
use super::encode::{Encode, Encoder, Source};
use super::io::Buffered;
use super::stream::Stream;
use crate::body::Chunk;
use crate::client::dispatch::{Call, Shared};
use crate::headers;
use crate::message::ResponseHead;
use crate::upgrade::Downstream;

/// The connection engine.
///
/// Owns the transport buffers, the encoder and decoder, and the two FIFOs
/// that realize HTTP/1.1 pipelining: `outgoing` is activation order, and a
/// stream joins `inbound` the moment its request starts sending, so the
/// head of `inbound` is always the decoder's subject. At most one stream
/// is the encoder's subject (the head of `outgoing`) and at most one the
/// decoder's (the head of `inbound`).
///
/// Everything here runs on the task polling the `Connection` future; the
/// only way in from other threads is the command channel.
pub(crate) struct Conn<T> {
    io: Buffered<T>,
    decoder: Decoder,
    encoder: Option<Encoder>,
    streams: HashMap<u64, Stream>,
    outgoing: VecDeque<u64>,
    inbound: VecDeque<u64>,
    shared: Arc<Shared>,
    downstream: Option<Box<dyn Downstream>>,
    downstream_live: bool,
    initial_window: u64,
    /// `Connection: close` seen on a response, or a close-carrying request
    /// finished sending; shut down once the closing exchange completes.
    closing: bool,
    /// A request carrying `Connection: close` was fully sent; nothing
    /// queued behind it will be encoded.
    close_sent: bool,
    switched: bool,
    terminated: bool,
    /// The connection's shutdown reason; `None` is a clean close.
    error: Option<crate::Error>,
}

impl<T> Conn<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(
        io: T,
        max_buf_size: usize,
        initial_window: u64,
        shared: Arc<Shared>,
        downstream: Option<Box<dyn Downstream>>,
    ) -> Conn<T> {
        Conn {
            io: Buffered::new(io, max_buf_size),
            decoder: Decoder::new(max_buf_size),
            encoder: None,
            streams: HashMap::new(),
            outgoing: VecDeque::new(),
            inbound: VecDeque::new(),
            shared,
            downstream,
            downstream_live: false,
            initial_window,
            closing: false,
            close_sent: false,
            switched: false,
            terminated: false,
            error: None,
        }
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub(crate) fn is_switched(&self) -> bool {
        self.switched
    }

    /// No exchange in progress and nothing queued.
    pub(crate) fn is_idle(&self) -> bool {
        self.outgoing.is_empty() && self.inbound.is_empty() && self.encoder.is_none()
    }

    // ===== command channel =====

    pub(crate) fn handle_call(&mut self, call: Call) {
        match call {
            Call::NewStream(new) => {
                let id = new.id;
                trace!("stream {} submitted", id);
                let stream = Stream::new(new, self.initial_window);
                self.streams.insert(id, stream);
            }
            Call::Activate(id) => self.activate(id),
            Call::WriteChunk(id, chunk) => self.write_chunk(id, chunk),
            Call::UpdateWindow(id, n) => {
                if let Some(stream) = self.streams.get_mut(&id) {
                    stream.window = stream.window.saturating_add(n);
                    trace!("stream {} window re-opened to {}", id, stream.window);
                }
            }
            Call::Release(id) => self.release(id),
            Call::InstallDownstream(handler) => {
                self.downstream = Some(handler);
                if self.switched {
                    self.install_downstream();
                }
            }
            Call::WriteRaw(data) => {
                if self.switched && !self.terminated {
                    trace!("writing {} raw bytes through", data.len());
                    self.io.buffer_raw(&data);
                } else {
                    debug!("dropping {} raw bytes: protocols not switched", data.len());
                }
            }
            Call::Close => {
                if !self.terminated {
                    debug!("connection close requested");
                    self.shutdown(None);
                }
            }
        }
    }

    fn activate(&mut self, id: u64) {
        let already = match self.streams.get_mut(&id) {
            Some(stream) => {
                let was = stream.activated;
                stream.activated = true;
                was
            }
            None => return,
        };
        if already {
            return;
        }
        if self.switched {
            self.fail_stream(id, crate::Error::new_switched_protocols());
        } else if self.terminated || self.closing || self.close_sent {
            self.fail_stream(id, crate::Error::new_closed());
        } else {
            trace!("stream {} activated", id);
            self.outgoing.push_back(id);
        }
    }

    fn write_chunk(&mut self, id: u64, chunk: Chunk) {
        if self.terminated {
            chunk.finish(Err(crate::Error::new_closed()));
            return;
        }
        match self.streams.get_mut(&id) {
            Some(stream) if stream.chunked && !stream.completed => {
                if let Err(chunk) = stream.chunks.push(chunk) {
                    chunk.finish(Err(crate::Error::new_user_chunk_after_eof()));
                }
            }
            Some(_) => chunk.finish(Err(crate::Error::new_user_not_chunked())),
            None => chunk.finish(Err(crate::Error::new_closed())),
        }
    }

    fn release(&mut self, id: u64) {
        let remove = match self.streams.get_mut(&id) {
            Some(stream) => {
                stream.released = true;
                // an unactivated stream vanishes quietly; a terminal one
                // has already fired its completion
                !stream.activated || stream.completed
            }
            None => false,
        };
        if remove {
            trace!("stream {} released", id);
            self.streams.remove(&id);
        }
    }

    // ===== write side =====

    pub(crate) fn poll_write(&mut self, cx: &mut Context<'_>) {
        if self.terminated {
            return;
        }
        if self.switched {
            self.poll_flush_logged(cx);
            return;
        }
        loop {
            if self.terminated || self.switched {
                break;
            }
            if self.encoder.is_none() && !self.take_next_outgoing() {
                break;
            }
            if !self.io.can_buffer() {
                match self.io.poll_flush(cx) {
                    Poll::Ready(Ok(())) => continue,
                    Poll::Ready(Err(e)) => {
                        self.shutdown(Some(crate::Error::new_io(e)));
                        return;
                    }
                    Poll::Pending => return,
                }
            }
            let id = *self.outgoing.front().expect("encoder has a subject");
            let (result, head_done) = {
                let Conn {
                    ref mut io,
                    ref mut streams,
                    ref mut encoder,
                    ..
                } = *self;
                let stream = streams.get_mut(&id).expect("outgoing stream exists");
                let encoder = encoder.as_mut().expect("encoder present");
                let max = io.max_buf_size();
                let result = {
                    let mut src = Source {
                        head: stream.head.as_ref(),
                        body: &mut stream.body,
                        chunks: &mut stream.chunks,
                    };
                    encoder.encode(io.write_buf(), max, &mut src)
                };
                (result, encoder.head_done())
            };
            if head_done {
                // the request is only borrowed until fully sent
                if let Some(stream) = self.streams.get_mut(&id) {
                    stream.head = None;
                }
            }
            match result {
                Ok(Encode::Progress) => continue,
                Ok(Encode::NeedMoreBody) => {
                    trace!("stream {} waiting for more body", id);
                    break;
                }
                Ok(Encode::Done) => {
                    trace!("stream {} request fully sent", id);
                    self.encoder = None;
                    self.outgoing.pop_front();
                    let (close_requested, received) = {
                        let stream = self.streams.get_mut(&id).expect("sent stream exists");
                        stream.sent = true;
                        (stream.close_requested, stream.received)
                    };
                    if close_requested {
                        debug!("connection: close sent; no further requests will be encoded");
                        self.close_sent = true;
                        self.shared.set_closing();
                    }
                    if received {
                        self.finish_exchange(id);
                    }
                }
                Err(e) => {
                    let reason = e.dup_reason();
                    self.encoder = None;
                    self.outgoing.pop_front();
                    self.fail_stream(id, e);
                    self.shutdown(Some(reason));
                    return;
                }
            }
        }
        if !self.terminated {
            self.poll_flush_logged(cx);
        }
    }

    /// Makes the head of the outgoing FIFO the encoder's subject; the
    /// stream simultaneously joins the inbound FIFO, since its response
    /// may start arriving before its body finishes sending.
    fn take_next_outgoing(&mut self) -> bool {
        if self.close_sent {
            return false;
        }
        let id = match self.outgoing.front().copied() {
            Some(id) => id,
            None => return false,
        };
        let built = {
            let stream = self.streams.get(&id).expect("outgoing stream exists");
            let head = stream.head.as_ref().expect("queued stream has a request head");
            Encoder::new(head).map(|encoder| (encoder, stream.is_head_request))
        };
        let (encoder, is_head) = match built {
            Ok(pair) => pair,
            Err(e) => {
                let reason = e.dup_reason();
                self.outgoing.pop_front();
                self.fail_stream(id, e);
                self.shutdown(Some(reason));
                return false;
            }
        };
        trace!("stream {} begins sending", id);
        if self.inbound.is_empty() {
            self.decoder.reset(is_head);
        }
        self.inbound.push_back(id);
        self.encoder = Some(encoder);
        true
    }

    fn poll_flush_logged(&mut self, cx: &mut Context<'_>) {
        if let Poll::Ready(Err(e)) = self.io.poll_flush(cx) {
            debug!("write error: {}", e);
            self.shutdown(Some(crate::Error::new_io(e)));
        }
    }

    // ===== read side =====

    pub(crate) fn poll_read(&mut self, cx: &mut Context<'_>) {
        loop {
            if self.terminated {
                return;
            }
            if self.switched {
                self.poll_read_switched(cx);
                return;
            }
            let mut window_blocked = false;
            while !self.io.read_buf().is_empty() {
                if self.inbound.is_empty() {
                    debug!("received bytes with no request outstanding");
                    self.shutdown(Some(crate::Error::new_unexpected_message()));
                    return;
                }
                let id = *self.inbound.front().expect("inbound head");
                let decoded = {
                    let Conn {
                        ref io,
                        ref mut decoder,
                        ref mut streams,
                        ..
                    } = *self;
                    let stream = streams.get_mut(&id).expect("inbound stream exists");
                    let mut sink = StreamSink { stream };
                    decoder.decode(io.read_buf(), &mut sink)
                };
                let consumed = match decoded {
                    Ok(n) => n,
                    Err(e) => {
                        let reason = e.dup_reason();
                        self.inbound.pop_front();
                        self.fail_stream(id, e);
                        self.shutdown(Some(reason));
                        return;
                    }
                };
                self.io.consume(consumed);
                if self.decoder.is_complete() {
                    self.inbound.pop_front();
                    self.handle_response_end(id);
                    if self.terminated || self.switched {
                        break;
                    }
                    let next_is_head = self
                        .inbound
                        .front()
                        .and_then(|next| self.streams.get(next))
                        .map(|s| s.is_head_request)
                        .unwrap_or(false);
                    self.decoder.reset(next_is_head);
                    continue;
                }
                if consumed == 0 {
                    // body bytes offered, window shut; update_window or an
                    // on_body re-open resumes us
                    window_blocked = true;
                    break;
                }
            }
            if self.terminated {
                return;
            }
            if self.switched {
                continue;
            }
            if window_blocked {
                return;
            }
            match self.io.poll_read_from_io(cx) {
                Poll::Ready(Ok(0)) => {
                    self.handle_read_eof();
                    return;
                }
                Poll::Ready(Ok(_)) => continue,
                Poll::Ready(Err(e)) => {
                    debug!("read error: {}", e);
                    self.shutdown(Some(crate::Error::new_io(e)));
                    return;
                }
                Poll::Pending => return,
            }
        }
    }

    fn poll_read_switched(&mut self, cx: &mut Context<'_>) {
        loop {
            if self.terminated {
                return;
            }
            let buffered = self.io.take_read_buf();
            if !buffered.is_empty() {
                match self.downstream.as_mut() {
                    Some(handler) => {
                        trace!("forwarding {} bytes downstream", buffered.len());
                        if let Err(cause) = handler.on_read(&buffered) {
                            self.shutdown(Some(crate::Error::new_user_callback(cause)));
                            return;
                        }
                    }
                    None => {
                        debug!("bytes after protocol switch with no downstream handler");
                        self.shutdown(Some(crate::Error::new_unexpected_message()));
                        return;
                    }
                }
            }
            match self.io.poll_read_from_io(cx) {
                Poll::Ready(Ok(0)) => {
                    debug!("transport finished after protocol switch");
                    self.shutdown(None);
                    return;
                }
                Poll::Ready(Ok(_)) => continue,
                Poll::Ready(Err(e)) => {
                    self.shutdown(Some(crate::Error::new_io(e)));
                    return;
                }
                Poll::Pending => return,
            }
        }
    }

    fn handle_read_eof(&mut self) {
        if let Some(&id) = self.inbound.front() {
            if self.decoder.is_eof_body() {
                // EOF terminates an unframed body
                let finished = {
                    let Conn {
                        ref mut decoder,
                        ref mut streams,
                        ..
                    } = *self;
                    let stream = streams.get_mut(&id).expect("inbound stream exists");
                    let mut sink = StreamSink { stream };
                    decoder.finish_eof(&mut sink)
                };
                self.inbound.pop_front();
                match finished {
                    Ok(()) => {
                        self.handle_response_end(id);
                        if !self.terminated {
                            self.shutdown(None);
                        }
                    }
                    Err(e) => {
                        let reason = e.dup_reason();
                        self.fail_stream(id, e);
                        self.shutdown(Some(reason));
                    }
                }
                return;
            }
        }
        if self.decoder.is_at_message_start() {
            debug!("transport closed while idle");
            self.shutdown(None);
        } else {
            debug!("transport closed mid-response");
            self.shutdown(Some(crate::Error::new_incomplete()));
        }
    }

    /// The decoder finished a response for `id` (already popped from the
    /// inbound FIFO).
    fn handle_response_end(&mut self, id: u64) {
        let (status, requested_upgrade, sent) = match self.streams.get(&id) {
            Some(stream) => (
                stream.resp_head.as_ref().map(|h| h.status),
                stream.requested_upgrade,
                stream.sent,
            ),
            None => return,
        };
        if status == Some(StatusCode::SWITCHING_PROTOCOLS) {
            if !requested_upgrade {
                debug!("101 response for a request that did not ask to upgrade");
                let err = crate::Error::new_unexpected_message();
                let reason = err.dup_reason();
                self.fail_stream(id, err);
                self.shutdown(Some(reason));
                return;
            }
            self.begin_switch(id);
            return;
        }
        if sent {
            self.finish_exchange(id);
        } else {
            trace!("stream {} response done; request still sending", id);
        }
    }

    /// Both directions of `id` are done: observe `Connection: close`
    /// before the completion callback, fire it, then shut down if either
    /// side asked to close.
    fn finish_exchange(&mut self, id: u64) {
        let close = match self.streams.get(&id) {
            Some(stream) => {
                stream.close_requested
                    || stream
                        .resp_head
                        .as_ref()
                        .map(|h| headers::connection_has_close(&h.headers))
                        .unwrap_or(false)
            }
            None => false,
        };
        if close {
            debug!("connection: close latched");
            self.closing = true;
            self.shared.set_closing();
            self.shared.set_closed();
        }
        self.complete_stream(id);
        if close && !self.terminated {
            self.shutdown(None);
        }
    }

    fn begin_switch(&mut self, id: u64) {
        debug!("101 switching protocols");
        self.switched = true;
        self.shared.set_switched();
        if let Some(stream) = self.streams.get_mut(&id) {
            // the write direction is ceded along with the pipe
            stream.sent = true;
            stream.received = true;
        }
        self.complete_stream(id);
        if let Some(encoder) = self.encoder.take() {
            if let Some(chunk) = encoder.into_pending_chunk() {
                chunk.finish(Err(crate::Error::new_switched_protocols()));
            }
        }
        let pending: Vec<u64> = self
            .inbound
            .drain(..)
            .chain(self.outgoing.drain(..))
            .collect();
        for pending_id in pending {
            self.fail_stream(pending_id, crate::Error::new_switched_protocols());
        }
        if self.downstream.is_some() {
            self.install_downstream();
        }
    }

    fn install_downstream(&mut self) {
        if !self.downstream_live {
            self.downstream_live = true;
            if let Some(handler) = self.downstream.as_mut() {
                handler.on_install();
            }
        }
    }

    // ===== completion & shutdown =====

    fn complete_stream(&mut self, id: u64) {
        let remove = match self.streams.get_mut(&id) {
            Some(stream) => {
                stream.complete_ok();
                stream.released
            }
            None => false,
        };
        if remove {
            self.streams.remove(&id);
        }
    }

    fn fail_stream(&mut self, id: u64, error: crate::Error) {
        let remove = match self.streams.get_mut(&id) {
            Some(stream) => {
                stream.complete_err(error);
                stream.released
            }
            None => false,
        };
        if remove {
            self.streams.remove(&id);
        }
    }

    /// Drains everything and latches the terminal state. In-flight streams
    /// get the shutdown reason; queued ones that never started get
    /// `CONNECTION_CLOSED`; unactivated streams vanish without a callback.
    fn shutdown(&mut self, reason: Option<crate::Error>) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        self.shared.set_closed();
        match reason.as_ref() {
            Some(e) => debug!("connection shutting down: {}", e),
            None => trace!("connection shutting down cleanly"),
        }
        if let Some(encoder) = self.encoder.take() {
            if let Some(chunk) = encoder.into_pending_chunk() {
                chunk.finish(Err(match reason.as_ref() {
                    Some(e) => e.dup_reason(),
                    None => crate::Error::new_closed(),
                }));
            }
        }
        let in_flight: Vec<u64> = self.inbound.drain(..).collect();
        let queued: Vec<u64> = self.outgoing.drain(..).collect();
        for id in in_flight {
            let err = match reason.as_ref() {
                Some(e) => e.dup_reason(),
                None => crate::Error::new_closed(),
            };
            self.fail_stream(id, err);
        }
        for id in queued {
            self.fail_stream(id, crate::Error::new_closed());
        }
        // keep only completed streams whose handles are still live
        self.streams.retain(|_, s| s.completed && !s.released);
        if self.error.is_none() {
            self.error = reason;
        }
    }

    /// Final flush + transport shutdown; resolves to the connection result.
    pub(crate) fn poll_terminate(&mut self, cx: &mut Context<'_>) -> Poll<crate::Result<()>> {
        debug_assert!(self.terminated);
        match self.io.poll_flush(cx) {
            Poll::Ready(Ok(())) => {}
            Poll::Ready(Err(e)) => trace!("flush error during shutdown: {}", e),
            Poll::Pending => return Poll::Pending,
        }
        match self.io.poll_shutdown(cx) {
            Poll::Ready(Ok(())) => {}
            Poll::Ready(Err(e)) => {
                if self.error.is_none() {
                    self.error = Some(crate::Error::new_shutdown(e));
                }
            }
            Poll::Pending => return Poll::Pending,
        }
        if let Some(mut handler) = self.downstream.take() {
            if self.downstream_live {
                handler.on_shutdown(self.error.as_ref());
            }
        }
        Poll::Ready(match self.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        })
    }
}

/// Routes decoder events into the inbound head stream, enforcing its read
/// window on body delivery.
struct StreamSink<'a> {
    stream: &'a mut Stream,
}

impl<'a> DecodeSink for StreamSink<'a> {
    fn on_status(&mut self, status: StatusCode, reason: &[u8]) -> crate::Result<()> {
        self.stream.pending_head = Some(ResponseHead::new(
            status,
            Bytes::copy_from_slice(reason),
        ));
        Ok(())
    }

    fn on_header(&mut self, name: &[u8], value: &[u8]) -> crate::Result<()> {
        if let Some(head) = self.stream.pending_head.as_mut() {
            head.headers
                .add(Bytes::copy_from_slice(name), Bytes::copy_from_slice(value));
        }
        Ok(())
    }

    fn on_headers_done(&mut self, block: HeaderBlock) -> crate::Result<()> {
        let head = self
            .stream
            .pending_head
            .take()
            .expect("headers done without status");
        match block {
            HeaderBlock::Informational => {
                trace!("stream {} informational response {}", self.stream.id, head.status);
                self.stream
                    .handler
                    .on_informational(&head)
                    .map_err(crate::Error::new_user_callback)?;
                self.stream.informationals.push(head);
            }
            HeaderBlock::Main => {
                self.stream
                    .handler
                    .on_headers(&head)
                    .map_err(crate::Error::new_user_callback)?;
                self.stream.resp_head = Some(head);
            }
        }
        Ok(())
    }

    fn on_body(&mut self, data: &[u8]) -> crate::Result<usize> {
        let take = std::cmp::min(data.len() as u64, self.stream.window) as usize;
        if take == 0 {
            trace!("stream {} window exhausted", self.stream.id);
            return Ok(0);
        }
        let delivered = &data[..take];
        let reopen = self
            .stream
            .handler
            .on_body(delivered)
            .map_err(crate::Error::new_user_callback)?;
        let reopen = std::cmp::min(reopen, take) as u64;
        if self.stream.collect_body {
            self.stream.body_acc.extend_from_slice(delivered);
        }
        self.stream.window = self.stream.window - take as u64 + reopen;
        Ok(take)
    }

    fn on_complete(&mut self) -> crate::Result<()> {
        self.stream.received = true;
        Ok(())
    }
}
