//! Error and Result module.

use std::error::Error as StdError;
use std::fmt;

/// Result type often returned from methods that can have `h1pipe` `Error`s.
pub type Result<T> = std::result::Result<T, Error>;

type Cause = Box<dyn StdError + Send + Sync>;

/// Represents errors that can occur while driving an HTTP/1.1 connection.
pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: Kind,
    cause: Option<Cause>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum Kind {
    /// The peer sent bytes that violate the HTTP/1.1 grammar.
    Parse(Parse),
    /// The transport reached EOF in the middle of a response.
    IncompleteMessage,
    /// Response bytes arrived while no stream was awaiting a response.
    UnexpectedMessage,
    /// An outgoing body produced more or fewer bytes than it declared.
    BodyLengthMismatch,
    /// The stream was abandoned because the connection switched protocols.
    SwitchedProtocols,
    /// The connection is closed, closing, or was shut down.
    ChannelClosed,
    /// An `io::Error` occurred while reading or writing the transport.
    Io,
    /// Error calling `AsyncWrite::poll_shutdown()`.
    Shutdown,
    /// The error was caused by user code.
    User(User),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum Parse {
    StatusLine,
    Version,
    Header,
    ContentLength,
    ChunkSize,
    TooLarge,
    Internal,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum User {
    /// Error returned from a `BodySource::read()`.
    Body,
    /// A stream or chunk callback returned an error.
    Callback,
    /// `write_chunk` was called on a request that is not chunked.
    NotChunked,
    /// A chunk was submitted after the zero-size terminator.
    ChunkAfterEof,
    /// The request carried an unparseable `Content-Length` header.
    ContentLength,
    /// `write_raw` was called before protocols were switched.
    NotUpgraded,
}

impl Error {
    /// Returns true if this was caused by bytes violating the HTTP/1.1
    /// protocol: a grammar error, a truncated response, or response bytes
    /// arriving with no stream awaiting them.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self.inner.kind,
            Kind::Parse(_) | Kind::IncompleteMessage | Kind::UnexpectedMessage
        )
    }

    /// Returns true if the connection was closed or shutting down.
    pub fn is_closed(&self) -> bool {
        matches!(self.inner.kind, Kind::ChannelClosed)
    }

    /// Returns true if the stream was abandoned by a successful
    /// `101 Switching Protocols` hand-off.
    pub fn is_switched_protocols(&self) -> bool {
        matches!(self.inner.kind, Kind::SwitchedProtocols)
    }

    /// Returns true if an outgoing body yielded more or fewer bytes than
    /// its declared length.
    pub fn is_body_length_mismatch(&self) -> bool {
        matches!(self.inner.kind, Kind::BodyLengthMismatch)
    }

    /// Returns true if this error was caused by user code: a callback or
    /// body source returning an error, or a misused chunk API.
    pub fn is_user(&self) -> bool {
        matches!(self.inner.kind, Kind::User(_))
    }

    /// Returns true if this was caused by an `io::Error` on the transport.
    pub fn is_io(&self) -> bool {
        matches!(self.inner.kind, Kind::Io | Kind::Shutdown)
    }

    /// Consumes the error, returning its cause.
    pub fn into_cause(self) -> Option<Box<dyn StdError + Send + Sync>> {
        self.inner.cause
    }

    pub(crate) fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(ErrorImpl { kind, cause: None }),
        }
    }

    pub(crate) fn with<C: Into<Cause>>(mut self, cause: C) -> Error {
        self.inner.cause = Some(cause.into());
        self
    }

    /// Re-creates an error of the same kind, without the cause.
    ///
    /// Used when one failure has to be reported to several streams: the
    /// original (with its cause) goes to the culprit and the connection,
    /// the duplicates to everything drained behind it.
    pub(crate) fn dup_reason(&self) -> Error {
        Error::new(self.inner.kind)
    }

    pub(crate) fn new_parse(parse: Parse) -> Error {
        Error::new(Kind::Parse(parse))
    }

    pub(crate) fn new_incomplete() -> Error {
        Error::new(Kind::IncompleteMessage)
    }

    pub(crate) fn new_unexpected_message() -> Error {
        Error::new(Kind::UnexpectedMessage)
    }

    pub(crate) fn new_body_length_mismatch() -> Error {
        Error::new(Kind::BodyLengthMismatch)
    }

    pub(crate) fn new_switched_protocols() -> Error {
        Error::new(Kind::SwitchedProtocols)
    }

    pub(crate) fn new_closed() -> Error {
        Error::new(Kind::ChannelClosed)
    }

    pub(crate) fn new_io(cause: std::io::Error) -> Error {
        Error::new(Kind::Io).with(cause)
    }

    pub(crate) fn new_shutdown(cause: std::io::Error) -> Error {
        Error::new(Kind::Shutdown).with(cause)
    }

    pub(crate) fn new_user_body(cause: Cause) -> Error {
        Error::new(Kind::User(User::Body)).with(cause)
    }

    pub(crate) fn new_user_callback(cause: Cause) -> Error {
        Error::new(Kind::User(User::Callback)).with(cause)
    }

    pub(crate) fn new_user_not_chunked() -> Error {
        Error::new(Kind::User(User::NotChunked))
    }

    pub(crate) fn new_user_chunk_after_eof() -> Error {
        Error::new(Kind::User(User::ChunkAfterEof))
    }

    pub(crate) fn new_user_content_length() -> Error {
        Error::new(Kind::User(User::ContentLength))
    }

    pub(crate) fn new_user_not_upgraded() -> Error {
        Error::new(Kind::User(User::NotUpgraded))
    }

    fn description(&self) -> &str {
        match self.inner.kind {
            Kind::Parse(Parse::StatusLine) => "invalid response status line",
            Kind::Parse(Parse::Version) => "invalid HTTP version",
            Kind::Parse(Parse::Header) => "invalid header",
            Kind::Parse(Parse::ContentLength) => "invalid content-length",
            Kind::Parse(Parse::ChunkSize) => "invalid chunk size line",
            Kind::Parse(Parse::TooLarge) => "message head too large",
            Kind::Parse(Parse::Internal) => "internal parser error",
            Kind::IncompleteMessage => "connection closed before message completed",
            Kind::UnexpectedMessage => "received bytes with no request outstanding",
            Kind::BodyLengthMismatch => "outgoing body length differs from declared length",
            Kind::SwitchedProtocols => "stream abandoned by protocol switch",
            Kind::ChannelClosed => "connection closed",
            Kind::Io => "connection error",
            Kind::Shutdown => "error shutting down connection",
            Kind::User(User::Body) => "error from outgoing body source",
            Kind::User(User::Callback) => "error returned from user callback",
            Kind::User(User::NotChunked) => "chunk written to a request without chunked encoding",
            Kind::User(User::ChunkAfterEof) => "chunk written after the terminating chunk",
            Kind::User(User::ContentLength) => "request has unparseable content-length",
            Kind::User(User::NotUpgraded) => "raw write before protocols switched",
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tuple = f.debug_tuple("h1pipe::Error");
        tuple.field(&self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            tuple.field(cause);
        }
        tuple.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref cause) = self.inner.cause {
            write!(f, "{}: {}", self.description(), cause)
        } else {
            f.write_str(self.description())
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .cause
            .as_ref()
            .map(|cause| &**cause as &(dyn StdError + 'static))
    }
}
