//! Protocol upgrade hand-off.
//!
//! When a stream that asked to upgrade receives `101 Switching Protocols`,
//! the connection stops speaking HTTP and cedes the byte pipe to a
//! [`Downstream`] handler: every byte read after the response's terminating
//! CRLF — including bytes that arrived in the same input slice — reaches
//! `on_read` untouched, and raw writes flow back out through
//! [`SendRequest::write_raw`](crate::client::conn::SendRequest::write_raw).
//!
//! A handler can be installed up front with
//! [`Builder::downstream`](crate::client::conn::Builder::downstream) or
//! later with
//! [`SendRequest::install_downstream`](crate::client::conn::SendRequest::install_downstream)
//! (for instance from a header callback, once the 101 has been seen). If
//! bytes arrive after the switch while no handler is installed, the
//! connection shuts down with a protocol error.

use std::error::Error as StdError;

/// The protocol that takes over the connection after a `101` response.
pub trait Downstream: Send {
    /// Called once, when the pipe is handed over (or when the handler is
    /// installed, if protocols have already switched).
    fn on_install(&mut self) {}

    /// Called with every slice of bytes read after the switch, in order,
    /// unmodified. Returning an error shuts the connection down.
    fn on_read(&mut self, data: &[u8]) -> Result<(), Box<dyn StdError + Send + Sync>>;

    /// Called once when the connection terminates after the switch;
    /// `error` is `None` for a clean shutdown.
    fn on_shutdown(&mut self, _error: Option<&crate::Error>) {}
}
