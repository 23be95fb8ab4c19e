//! The command channel between user handles and the connection task.
//!
//! Engine state is only ever touched on the connection task (spec: one
//! event loop owns the FIFOs, cursors, and windows). Every public entry
//! point that mutates state therefore becomes a [`Call`] envelope pushed
//! onto an unbounded channel and applied when the `Connection` future is
//! next polled. The channel preserves per-thread submission order, which
//! is exactly the ordering guarantee the API makes.
//!
//! A few observations have to be synchronous — `make_request` failing on a
//! closed or switched connection, `is_open`, `new_requests_allowed` — so
//! those flags live in a shared atomic cell updated by the engine and read
//! by any thread.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_channel::mpsc;
use futures_core::Stream;

use crate::body::{BodySource, Chunk};
use crate::client::StreamHandler;
use crate::message::RequestHead;
use crate::upgrade::Downstream;

pub(crate) type Tx = mpsc::UnboundedSender<Call>;

pub(crate) enum Call {
    NewStream(NewStream),
    Activate(u64),
    WriteChunk(u64, Chunk),
    UpdateWindow(u64, u64),
    Release(u64),
    InstallDownstream(Box<dyn Downstream>),
    WriteRaw(Bytes),
    Close,
}

pub(crate) struct NewStream {
    pub(crate) id: u64,
    pub(crate) head: RequestHead,
    pub(crate) body: Option<Box<dyn BodySource>>,
    pub(crate) handler: Box<dyn StreamHandler>,
    pub(crate) collect_body: bool,
}

/// Connection state observable synchronously from any thread.
pub(crate) struct Shared {
    open: AtomicBool,
    closing: AtomicBool,
    switched: AtomicBool,
}

impl Shared {
    fn new() -> Shared {
        Shared {
            open: AtomicBool::new(true),
            closing: AtomicBool::new(false),
            switched: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub(crate) fn set_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    pub(crate) fn set_closing(&self) {
        self.closing.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_switched(&self) -> bool {
        self.switched.load(Ordering::SeqCst)
    }

    pub(crate) fn set_switched(&self) {
        self.switched.store(true, Ordering::SeqCst);
    }

    pub(crate) fn new_requests_allowed(&self) -> bool {
        self.is_open() && !self.is_closing() && !self.is_switched()
    }
}

pub(crate) fn channel() -> (Sender, Receiver) {
    let (tx, rx) = mpsc::unbounded();
    let (giver, taker) = want::new();
    let shared = Arc::new(Shared::new());
    (
        Sender {
            inner: tx,
            giver,
            shared: shared.clone(),
        },
        Receiver {
            inner: rx,
            taker,
            shared,
        },
    )
}

pub(crate) struct Sender {
    inner: Tx,
    giver: want::Giver,
    shared: Arc<Shared>,
}

impl Sender {
    /// Sends a call; on failure (the connection task is gone) the envelope
    /// is handed back so its resources can be completed with an error.
    pub(crate) fn send(&self, call: Call) -> Result<(), Call> {
        self.inner.unbounded_send(call).map_err(|e| e.into_inner())
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    pub(crate) fn tx(&self) -> Tx {
        self.inner.clone()
    }

    pub(crate) fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<crate::Result<()>> {
        self.giver
            .poll_want(cx)
            .map_err(|_| crate::Error::new_closed())
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.giver.is_wanting()
    }
}

pub(crate) struct Receiver {
    inner: mpsc::UnboundedReceiver<Call>,
    taker: want::Taker,
    shared: Arc<Shared>,
}

impl Receiver {
    pub(crate) fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<Call>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(item) => Poll::Ready(item),
            Poll::Pending => {
                // Nothing queued; tell `poll_ready` callers we want more.
                self.taker.want();
                Poll::Pending
            }
        }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.taker.cancel();
    }
}
