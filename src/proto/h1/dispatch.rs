use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite};

use super::conn::Conn;
use crate::client::dispatch::Receiver;

/// Drives one connection: applies queued commands, then pumps the write
/// and read sides until nothing progresses.
///
/// Every wakeup drains the command channel first, so the channel's waker
/// is always registered; entry points that park the engine without an IO
/// waker (an empty chunk queue, an exhausted read window) are resumed by
/// the command that un-parks them.
pub(crate) struct Dispatcher<T> {
    conn: Conn<T>,
    rx: Receiver,
    client_gone: bool,
}

impl<T> Dispatcher<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(conn: Conn<T>, rx: Receiver) -> Dispatcher<T> {
        Dispatcher {
            conn,
            rx,
            client_gone: false,
        }
    }

    pub(crate) fn poll(&mut self, cx: &mut Context<'_>) -> Poll<crate::Result<()>> {
        self.poll_commands(cx);
        if !self.conn.is_terminated() {
            self.conn.poll_write(cx);
        }
        if !self.conn.is_terminated() {
            self.conn.poll_read(cx);
        }
        if self.client_gone
            && !self.conn.is_terminated()
            && !self.conn.is_switched()
            && self.conn.is_idle()
        {
            trace!("all handles dropped and connection idle; closing");
            self.conn.handle_call(crate::client::dispatch::Call::Close);
        }
        if self.conn.is_terminated() {
            return self.conn.poll_terminate(cx);
        }
        Poll::Pending
    }

    fn poll_commands(&mut self, cx: &mut Context<'_>) {
        if self.client_gone {
            return;
        }
        loop {
            match self.rx.poll_recv(cx) {
                Poll::Ready(Some(call)) => self.conn.handle_call(call),
                Poll::Ready(None) => {
                    trace!("command channel closed");
                    self.client_gone = true;
                    return;
                }
                Poll::Pending => return,
            }
        }
    }
}
