//! Test harness: a scripted mock transport and a recording stream handler.
//!
//! The mock transport is driven entirely by hand: tests push read slices
//! and EOF onto it, poll the `Connection` future directly (via
//! `tokio_test::task::spawn`), and inspect the captured write bytes.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use h1pipe::client::StreamHandler;
use h1pipe::message::{Response, ResponseHead};

// ===== mock transport =====

#[derive(Default)]
struct MockInner {
    reads: VecDeque<Vec<u8>>,
    eof: bool,
    written: Vec<u8>,
    read_waker: Option<Waker>,
    shutdown: bool,
}

/// The IO object handed to the connection.
pub struct Mock {
    inner: Arc<Mutex<MockInner>>,
}

/// The test's side of the mock transport.
pub struct MockHandle {
    inner: Arc<Mutex<MockInner>>,
}

pub fn mock() -> (Mock, MockHandle) {
    let inner = Arc::new(Mutex::new(MockInner::default()));
    (
        Mock {
            inner: inner.clone(),
        },
        MockHandle { inner },
    )
}

impl MockHandle {
    /// Queues bytes for the connection to read, as one slice.
    pub fn push_read(&self, data: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        inner.reads.push_back(data.to_vec());
        if let Some(waker) = inner.read_waker.take() {
            waker.wake();
        }
    }

    /// Signals transport EOF after any queued reads drain.
    pub fn push_eof(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.eof = true;
        if let Some(waker) = inner.read_waker.take() {
            waker.wake();
        }
    }

    /// Everything the connection has written so far.
    pub fn written(&self) -> Vec<u8> {
        self.inner.lock().unwrap().written.clone()
    }

    /// Takes the captured writes, resetting the capture buffer.
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.inner.lock().unwrap().written)
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.lock().unwrap().shutdown
    }
}

impl AsyncRead for Mock {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(chunk) = inner.reads.pop_front() {
            let n = buf.remaining().min(chunk.len());
            buf.put_slice(&chunk[..n]);
            if n < chunk.len() {
                inner.reads.push_front(chunk[n..].to_vec());
            }
            return Poll::Ready(Ok(()));
        }
        if inner.eof {
            return Poll::Ready(Ok(()));
        }
        inner.read_waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl AsyncWrite for Mock {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut inner = self.inner.lock().unwrap();
        inner.written.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.inner.lock().unwrap().shutdown = true;
        Poll::Ready(Ok(()))
    }
}

// ===== recording stream handler =====

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Everything observed about one stream.
#[derive(Default)]
pub struct StreamState {
    pub informationals: Vec<(u16, Vec<(String, String)>)>,
    pub status: Option<u16>,
    pub headers: Vec<(String, String)>,
    /// Body bytes as delivered to `on_body`.
    pub body: Vec<u8>,
    /// Body bytes from the completed `Response` accumulator.
    pub response_body: Vec<u8>,
    /// `Some(Ok(()))` for SUCCESS, `Some(Err(_))` for a failure.
    pub outcome: Option<Result<(), h1pipe::Error>>,
    /// Result of the `probe_open` closure at completion time.
    pub open_at_complete: Option<bool>,
}

impl StreamState {
    pub fn completed_ok(&self) -> bool {
        matches!(self.outcome, Some(Ok(())))
    }

    pub fn error(&self) -> &h1pipe::Error {
        match self.outcome {
            Some(Err(ref e)) => e,
            _ => panic!("stream did not fail"),
        }
    }
}

/// How much window `on_body` re-opens.
#[derive(Clone, Copy)]
pub enum Reopen {
    All,
    Nothing,
}

/// Which callback should return an error.
#[derive(Clone, Copy, PartialEq)]
pub enum FailAt {
    Informational,
    Headers,
    Body,
}

pub struct TestHandler {
    state: Arc<Mutex<StreamState>>,
    reopen: Reopen,
    fail: Option<FailAt>,
    tag: Option<(u64, Arc<Mutex<Vec<u64>>>)>,
    probe: Option<Box<dyn Fn() -> bool + Send>>,
}

impl TestHandler {
    pub fn new() -> (TestHandler, Arc<Mutex<StreamState>>) {
        let state = Arc::new(Mutex::new(StreamState::default()));
        (
            TestHandler {
                state: state.clone(),
                reopen: Reopen::All,
                fail: None,
                tag: None,
                probe: None,
            },
            state,
        )
    }

    /// Sets the window re-open policy for `on_body`.
    pub fn reopen(mut self, reopen: Reopen) -> TestHandler {
        self.reopen = reopen;
        self
    }

    /// Makes the given callback return an error.
    pub fn fail_at(mut self, fail: FailAt) -> TestHandler {
        self.fail = Some(fail);
        self
    }

    /// Records `id` into `order` when the stream completes.
    pub fn tag(mut self, id: u64, order: Arc<Mutex<Vec<u64>>>) -> TestHandler {
        self.tag = Some((id, order));
        self
    }

    /// Evaluates `probe` at completion time (e.g. to observe `is_open`).
    pub fn probe_open<F>(mut self, probe: F) -> TestHandler
    where
        F: Fn() -> bool + Send + 'static,
    {
        self.probe = Some(Box::new(probe));
        self
    }
}

fn header_list(head: &ResponseHead) -> Vec<(String, String)> {
    head.headers
        .iter()
        .map(|(n, v)| {
            (
                String::from_utf8_lossy(n).into_owned(),
                String::from_utf8_lossy(v).into_owned(),
            )
        })
        .collect()
}

impl StreamHandler for TestHandler {
    fn on_informational(&mut self, head: &ResponseHead) -> Result<(), BoxError> {
        if self.fail == Some(FailAt::Informational) {
            return Err("informational callback failure".into());
        }
        self.state
            .lock()
            .unwrap()
            .informationals
            .push((head.status.as_u16(), header_list(head)));
        Ok(())
    }

    fn on_headers(&mut self, head: &ResponseHead) -> Result<(), BoxError> {
        if self.fail == Some(FailAt::Headers) {
            return Err("headers callback failure".into());
        }
        let mut state = self.state.lock().unwrap();
        state.status = Some(head.status.as_u16());
        state.headers = header_list(head);
        Ok(())
    }

    fn on_body(&mut self, data: &[u8]) -> Result<usize, BoxError> {
        if self.fail == Some(FailAt::Body) {
            return Err("body callback failure".into());
        }
        self.state.lock().unwrap().body.extend_from_slice(data);
        Ok(match self.reopen {
            Reopen::All => data.len(),
            Reopen::Nothing => 0,
        })
    }

    fn on_complete(&mut self, result: Result<Response, h1pipe::Error>) {
        let mut state = self.state.lock().unwrap();
        assert!(state.outcome.is_none(), "completion fired twice");
        if let Some(probe) = self.probe.as_ref() {
            state.open_at_complete = Some(probe());
        }
        match result {
            Ok(response) => {
                state.status = Some(response.status().as_u16());
                state.response_body = response.body.to_vec();
                state.outcome = Some(Ok(()));
            }
            Err(e) => state.outcome = Some(Err(e)),
        }
        if let Some((id, ref order)) = self.tag {
            order.lock().unwrap().push(id);
        }
    }
}

// ===== recording downstream handler =====

/// Records everything forwarded to the downstream protocol after a 101.
#[derive(Default)]
pub struct DownstreamState {
    pub installed: bool,
    pub read: Vec<u8>,
    pub shutdown: bool,
    pub shutdown_error: bool,
}

pub struct TestDownstream {
    state: Arc<Mutex<DownstreamState>>,
}

impl TestDownstream {
    pub fn new() -> (TestDownstream, Arc<Mutex<DownstreamState>>) {
        let state = Arc::new(Mutex::new(DownstreamState::default()));
        (
            TestDownstream {
                state: state.clone(),
            },
            state,
        )
    }
}

impl h1pipe::upgrade::Downstream for TestDownstream {
    fn on_install(&mut self) {
        self.state.lock().unwrap().installed = true;
    }

    fn on_read(&mut self, data: &[u8]) -> Result<(), BoxError> {
        self.state.lock().unwrap().read.extend_from_slice(data);
        Ok(())
    }

    fn on_shutdown(&mut self, error: Option<&h1pipe::Error>) {
        let mut state = self.state.lock().unwrap();
        state.shutdown = true;
        state.shutdown_error = error.is_some();
    }
}
