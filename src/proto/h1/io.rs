use std::io;
use std::mem::MaybeUninit;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures_util::ready;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// The initial buffer size allocated before trying to read from IO.
pub(crate) const INIT_BUFFER_SIZE: usize = 8192;

/// The minimum value that can be set to max buffer size.
pub(crate) const MINIMUM_MAX_BUFFER_SIZE: usize = INIT_BUFFER_SIZE;

/// The default maximum buffer size: bounds both one write-buffer fill and
/// how large a response head may grow before the connection errors.
pub(crate) const DEFAULT_MAX_BUFFER_SIZE: usize = 8192 + 4096 * 100;

/// Buffered IO: a read buffer the decoder consumes from, and a single
/// bounded flatten buffer the encoder fills before each flush.
///
/// The write side is the spec's byte-sink contract: the encoder acquires
/// capacity up to `max_buf_size`, fills, and `poll_flush` is the push.
pub(crate) struct Buffered<T> {
    io: T,
    read_buf: BytesMut,
    write_buf: BytesMut,
    max_buf_size: usize,
}

impl<T> Buffered<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(io: T, max_buf_size: usize) -> Buffered<T> {
        debug_assert!(max_buf_size >= MINIMUM_MAX_BUFFER_SIZE);
        Buffered {
            io,
            read_buf: BytesMut::with_capacity(0),
            write_buf: BytesMut::with_capacity(0),
            max_buf_size,
        }
    }

    pub(crate) fn max_buf_size(&self) -> usize {
        self.max_buf_size
    }

    pub(crate) fn read_buf(&self) -> &[u8] {
        self.read_buf.as_ref()
    }

    /// Marks `n` leading read bytes as consumed.
    pub(crate) fn consume(&mut self, n: usize) {
        self.read_buf.advance(n);
    }

    /// Takes the entire unconsumed read buffer.
    pub(crate) fn take_read_buf(&mut self) -> Bytes {
        self.read_buf.split().freeze()
    }

    pub(crate) fn write_buf(&mut self) -> &mut BytesMut {
        &mut self.write_buf
    }

    /// Whether the write buffer still has capacity to fill.
    pub(crate) fn can_buffer(&self) -> bool {
        self.write_buf.len() < self.max_buf_size
    }

    pub(crate) fn has_buffered_write(&self) -> bool {
        !self.write_buf.is_empty()
    }

    /// Appends raw bytes to the write buffer, bypassing the encoder. Used
    /// only after a protocol switch.
    pub(crate) fn buffer_raw(&mut self, data: &[u8]) {
        self.write_buf.extend_from_slice(data);
    }

    pub(crate) fn poll_read_from_io(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<usize>> {
        self.read_buf.reserve(INIT_BUFFER_SIZE);
        let dst = self.read_buf.chunk_mut();
        let dst = unsafe { &mut *(dst as *mut _ as *mut [MaybeUninit<u8>]) };
        let mut buf = ReadBuf::uninit(dst);
        match Pin::new(&mut self.io).poll_read(cx, &mut buf) {
            Poll::Ready(Ok(())) => {
                let n = buf.filled().len();
                unsafe {
                    self.read_buf.advance_mut(n);
                }
                trace!("read {} bytes", n);
                Poll::Ready(Ok(n))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }

    pub(crate) fn poll_flush(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while !self.write_buf.is_empty() {
            let n = ready!(Pin::new(&mut self.io).poll_write(cx, &self.write_buf))?;
            debug!("flushed {} bytes", n);
            if n == 0 {
                trace!(
                    "write returned zero, but {} bytes remaining",
                    self.write_buf.len()
                );
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.write_buf.advance(n);
        }
        Pin::new(&mut self.io).poll_flush(cx)
    }

    pub(crate) fn poll_shutdown(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_shutdown(cx)
    }
}
