#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(test, deny(rust_2018_idioms))]

//! # h1pipe
//!
//! An HTTP/1.1 **client connection engine**: one full-duplex byte pipe
//! multiplexing a queue of request/response exchanges with strict
//! pipelining, asynchronous chunked request bodies, read-window flow
//! control, and in-place hand-off to a downstream protocol after a
//! `101 Switching Protocols` response.
//!
//! This is a building block, not a client: there is no connector, no
//! pool, no TLS, no redirects. You bring an established
//! [`AsyncRead`](tokio::io::AsyncRead) + [`AsyncWrite`](tokio::io::AsyncWrite)
//! transport; [`client::conn::handshake`] splits it into a request handle
//! and a [`client::conn::Connection`] future that owns all protocol state.
//!
//! ## Shape of the engine
//!
//! - Requests are **streams**: submitted, then *activated* to join the
//!   outgoing queue. The encoder serializes one stream at a time into
//!   bounded write buffers; responses are matched to streams strictly in
//!   the order their requests started sending (HTTP/1.1 pipelining).
//! - Wire bytes are preserved verbatim: method, path, and header bytes go
//!   out exactly as given, with no normalization, reordering, or
//!   de-duplication.
//! - Chunked request bodies are fed chunk-by-chunk, from any thread,
//!   while the request is in flight; chunk extensions of any size stream
//!   across write buffers.
//! - Response body delivery spends per-stream read-window credit, which
//!   the body callback (or an explicit `update_window`) re-opens.

#[macro_use]
extern crate tracing;

pub use crate::error::{Error, Result};

pub mod body;
pub mod client;
mod error;
pub mod headers;
pub mod message;
mod proto;
pub mod upgrade;
