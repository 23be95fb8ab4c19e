//! Lower-level connection builders and handles.
//!
//! ```no_run
//! # async fn run(io: impl tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin) -> h1pipe::Result<()> {
//! use h1pipe::client::{conn, RequestOptions};
//! use h1pipe::message::RequestHead;
//! use http::Method;
//!
//! let (mut send, connection) = conn::handshake(io);
//!
//! let head = RequestHead::new(Method::GET, "/");
//! let mut stream = send.make_request(RequestOptions::new(head))?;
//! stream.activate()?;
//!
//! // drive the connection; it resolves once the pipe shuts down
//! connection.await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

use super::dispatch::{self, Call, NewStream};
use super::RequestOptions;
use crate::body::Chunk;
use crate::proto::h1::conn::Conn;
use crate::proto::h1::dispatch::Dispatcher;
use crate::proto::h1::io::{DEFAULT_MAX_BUFFER_SIZE, MINIMUM_MAX_BUFFER_SIZE};
use crate::upgrade::Downstream;

/// Default per-stream read window for response bodies, in bytes.
pub const DEFAULT_INITIAL_READ_WINDOW: u64 = 256 * 1024;

/// Returns a handle/driver pair over some IO.
///
/// This is a shortcut for `Builder::new().handshake(io)`.
pub fn handshake<T>(io: T) -> (SendRequest, Connection<T>)
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    Builder::new().handshake(io)
}

/// A builder to configure an HTTP/1.1 connection.
pub struct Builder {
    initial_read_window: u64,
    max_buf_size: usize,
    downstream: Option<Box<dyn Downstream>>,
}

impl Builder {
    /// Creates a builder with default options.
    pub fn new() -> Builder {
        Builder {
            initial_read_window: DEFAULT_INITIAL_READ_WINDOW,
            max_buf_size: DEFAULT_MAX_BUFFER_SIZE,
            downstream: None,
        }
    }

    /// Sets each stream's initial read window: how many response body
    /// bytes may be delivered before the user re-opens credit.
    pub fn initial_read_window(&mut self, window: u64) -> &mut Builder {
        self.initial_read_window = window;
        self
    }

    /// Sets the maximum buffer size: one write-buffer fill, and the cap on
    /// a response head's size.
    ///
    /// # Panics
    ///
    /// The minimum is 8192.
    pub fn max_buf_size(&mut self, max: usize) -> &mut Builder {
        assert!(
            max >= MINIMUM_MAX_BUFFER_SIZE,
            "the max_buf_size cannot be smaller than {}",
            MINIMUM_MAX_BUFFER_SIZE,
        );
        self.max_buf_size = max;
        self
    }

    /// Pre-installs the handler that takes over the pipe after a
    /// successful `101 Switching Protocols` response.
    pub fn downstream(&mut self, handler: Box<dyn Downstream>) -> &mut Builder {
        self.downstream = Some(handler);
        self
    }

    /// Splits `io` into a request handle and the connection driver.
    ///
    /// The `Connection` future must be polled for any progress to happen.
    pub fn handshake<T>(&mut self, io: T) -> (SendRequest, Connection<T>)
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let (tx, rx) = dispatch::channel();
        let conn = Conn::new(
            io,
            self.max_buf_size,
            self.initial_read_window,
            rx.shared().clone(),
            self.downstream.take(),
        );
        let connection = Connection {
            inner: Dispatcher::new(conn, rx),
        };
        let send = SendRequest {
            dispatch: tx,
            next_id: 1,
        };
        (send, connection)
    }
}

impl Default for Builder {
    fn default() -> Builder {
        Builder::new()
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("initial_read_window", &self.initial_read_window)
            .field("max_buf_size", &self.max_buf_size)
            .field("has_downstream", &self.downstream.is_some())
            .finish()
    }
}

/// The sender side of an established connection.
pub struct SendRequest {
    dispatch: dispatch::Sender,
    next_id: u64,
}

impl SendRequest {
    /// Submits a request, returning its stream handle.
    ///
    /// The stream is *unactivated*: it occupies no place in any queue
    /// until [`StreamHandle::activate`] is called. Fails synchronously
    /// once the connection is closed or closing (`CONNECTION_CLOSED`) or
    /// has switched protocols (`SWITCHED_PROTOCOLS`).
    pub fn make_request(&mut self, options: RequestOptions) -> crate::Result<StreamHandle> {
        let shared = self.dispatch.shared();
        if !shared.is_open() || shared.is_closing() {
            return Err(crate::Error::new_closed());
        }
        if shared.is_switched() {
            return Err(crate::Error::new_switched_protocols());
        }
        let id = self.next_id;
        self.next_id += 1;
        let chunked = crate::headers::transfer_encoding_is_chunked(&options.head.headers);
        let call = Call::NewStream(NewStream {
            id,
            head: options.head,
            body: options.body,
            handler: options.handler,
            collect_body: options.collect_body,
        });
        self.dispatch
            .send(call)
            .map_err(|_| crate::Error::new_closed())?;
        Ok(StreamHandle {
            id,
            chunked,
            activated: false,
            terminated: false,
            tx: self.dispatch.tx(),
        })
    }

    /// Polls whether the connection is ready to take requests.
    pub fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<crate::Result<()>> {
        self.dispatch.poll_ready(cx)
    }

    /// Waits until the connection is ready to take requests.
    pub async fn ready(&mut self) -> crate::Result<()> {
        futures_util::future::poll_fn(|cx| self.poll_ready(cx)).await
    }

    /// Checks if the connection is ready without registering interest.
    pub fn is_ready(&self) -> bool {
        self.dispatch.is_ready()
    }

    /// Whether the connection is open. Flips false synchronously on
    /// [`close_connection`](SendRequest::close_connection); the actual
    /// drain is asynchronous.
    pub fn is_open(&self) -> bool {
        self.dispatch.shared().is_open()
    }

    /// Whether `make_request` can still succeed: false once the
    /// connection is closing, closed, or has switched protocols.
    pub fn new_requests_allowed(&self) -> bool {
        self.dispatch.shared().new_requests_allowed()
    }

    /// Closes the connection. Idempotent. Streams still in flight or
    /// queued complete with `CONNECTION_CLOSED`.
    pub fn close_connection(&self) {
        self.dispatch.shared().set_closed();
        let _ = self.dispatch.send(Call::Close);
    }

    /// Installs the handler that takes over the pipe after a `101`
    /// response; may be called before or after the switch (for instance
    /// from a header callback observing the 101).
    pub fn install_downstream(&self, handler: Box<dyn Downstream>) {
        let _ = self.dispatch.send(Call::InstallDownstream(handler));
    }

    /// Writes raw bytes through the pipe. Valid only after a successful
    /// protocol switch; bytes pass through untouched.
    pub fn write_raw<B: Into<Bytes>>(&self, data: B) -> crate::Result<()> {
        if !self.dispatch.shared().is_switched() {
            return Err(crate::Error::new_user_not_upgraded());
        }
        self.dispatch
            .send(Call::WriteRaw(data.into()))
            .map_err(|_| crate::Error::new_closed())
    }
}

impl fmt::Debug for SendRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendRequest").finish()
    }
}

/// A handle to one submitted request/response exchange.
///
/// Dropping the handle releases the stream: the engine still drives it to
/// completion (and fires its callbacks), then frees it. Dropping an
/// unactivated handle discards the stream silently.
pub struct StreamHandle {
    id: u64,
    chunked: bool,
    activated: bool,
    terminated: bool,
    tx: dispatch::Tx,
}

impl StreamHandle {
    /// The stream's id, unique within its connection.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Schedules the stream onto the connection, in call order.
    /// Idempotent; only the first call has an effect.
    pub fn activate(&mut self) -> crate::Result<()> {
        if self.activated {
            return Ok(());
        }
        self.activated = true;
        self.tx
            .unbounded_send(Call::Activate(self.id))
            .map_err(|_| crate::Error::new_closed())
    }

    /// Submits one body chunk for a `Transfer-Encoding: chunked` request.
    ///
    /// Valid before or after activation; chunks go out in call order, and
    /// calls from off the connection task are posted to it. The zero-size
    /// chunk terminates the body and must be the last call.
    pub fn write_chunk(&mut self, chunk: Chunk) -> crate::Result<()> {
        if !self.chunked {
            let err = crate::Error::new_user_not_chunked();
            chunk.finish(Err(err.dup_reason()));
            return Err(err);
        }
        if self.terminated {
            let err = crate::Error::new_user_chunk_after_eof();
            chunk.finish(Err(err.dup_reason()));
            return Err(err);
        }
        let terminator = chunk.is_terminator();
        match self.tx.unbounded_send(Call::WriteChunk(self.id, chunk)) {
            Ok(()) => {
                if terminator {
                    self.terminated = true;
                }
                Ok(())
            }
            Err(rejected) => {
                if let Call::WriteChunk(_, chunk) = rejected.into_inner() {
                    chunk.finish(Err(crate::Error::new_closed()));
                }
                Err(crate::Error::new_closed())
            }
        }
    }

    /// Grants `n` bytes of response body read credit to this stream.
    /// Safe to call from any thread.
    pub fn update_window(&self, n: u64) {
        let _ = self.tx.unbounded_send(Call::UpdateWindow(self.id, n));
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        let _ = self.tx.unbounded_send(Call::Release(self.id));
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.id)
            .field("chunked", &self.chunked)
            .finish()
    }
}

/// A future that processes all HTTP state for the IO object.
///
/// Resolves `Ok(())` on a clean shutdown (explicit close, a
/// `Connection: close` exchange, or transport EOF while idle) and
/// `Err(_)` with the shutdown reason otherwise. After a successful
/// protocol switch with a downstream handler installed, it keeps pumping
/// bytes in both directions until the transport ends.
#[must_use = "futures do nothing unless polled"]
pub struct Connection<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    inner: Dispatcher<T>,
}

impl<T> Future for Connection<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    type Output = crate::Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().inner.poll(cx)
    }
}

impl<T> fmt::Debug for Connection<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").finish()
    }
}
