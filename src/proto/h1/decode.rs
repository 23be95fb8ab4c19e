use std::cmp;

use bytes::BytesMut;
use http::StatusCode;

use crate::error::Parse;
use crate::headers::{parse_content_length_value, value_has_token};

/// Maximum number of headers in one response head.
pub(crate) const DEFAULT_MAX_HEADERS: usize = 100;

/// Maximum amount of bytes allowed in chunked extensions, per body.
const CHUNKED_EXTENSIONS_LIMIT: u64 = 1024 * 16;

/// Events surfaced while parsing one response.
///
/// `on_body` returns how many of the offered bytes were accepted; the
/// decoder stops consuming when a sink accepts less than offered (the
/// read window closed) and resumes from that exact byte later.
pub(crate) trait DecodeSink {
    fn on_status(&mut self, status: StatusCode, reason: &[u8]) -> crate::Result<()>;
    fn on_header(&mut self, name: &[u8], value: &[u8]) -> crate::Result<()>;
    fn on_headers_done(&mut self, block: HeaderBlock) -> crate::Result<()>;
    fn on_body(&mut self, data: &[u8]) -> crate::Result<usize>;
    fn on_complete(&mut self) -> crate::Result<()>;
}

/// Which kind of header block just finished.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum HeaderBlock {
    /// A 1xx block; another status line follows.
    Informational,
    /// The final response's headers.
    Main,
}

/// Parses HTTP/1.1 responses from arbitrarily sliced input.
///
/// The head (status line + headers) accumulates into a scratch buffer and
/// is handed to httparse once the blank line arrives; body framing is a
/// resumable byte state machine. Input may arrive one byte at a time —
/// every state picks up exactly where it stopped.
pub(crate) struct Decoder {
    state: State,
    scratch: BytesMut,
    scan: usize,
    is_head: bool,
    max_head_size: usize,
}

enum State {
    Head,
    Body(BodyKind),
    Done,
}

enum BodyKind {
    /// `Content-Length` framing; counts down remaining bytes.
    Length(u64),
    /// `Transfer-Encoding: chunked`.
    Chunked {
        state: ChunkedState,
        size: u64,
        ext_cnt: u64,
        trailer_cnt: usize,
    },
    /// No length information: body runs until the connection closes.
    Eof,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum ChunkedState {
    Start,
    Size,
    SizeLws,
    Extension,
    SizeLf,
    Body,
    BodyCr,
    BodyLf,
    Trailer,
    TrailerLf,
    EndCr,
    EndLf,
    End,
}

impl Decoder {
    pub(crate) fn new(max_head_size: usize) -> Decoder {
        Decoder {
            state: State::Head,
            scratch: BytesMut::new(),
            scan: 0,
            is_head: false,
            max_head_size,
        }
    }

    /// Re-arms the decoder for the next response. `is_head` is whether the
    /// matched request used the `HEAD` method (which forbids a body).
    pub(crate) fn reset(&mut self, is_head: bool) {
        self.state = State::Head;
        self.scratch.clear();
        self.scan = 0;
        self.is_head = is_head;
    }

    /// Whether the current response has been fully parsed.
    pub(crate) fn is_complete(&self) -> bool {
        matches!(self.state, State::Done)
    }

    /// Whether no byte of a response has been seen yet.
    pub(crate) fn is_at_message_start(&self) -> bool {
        matches!(self.state, State::Head) && self.scratch.is_empty()
    }

    /// Whether the current body has no framing and runs to transport EOF.
    pub(crate) fn is_eof_body(&self) -> bool {
        matches!(self.state, State::Body(BodyKind::Eof))
    }

    /// Transport EOF: completes an EOF-delimited body, errors mid-message.
    pub(crate) fn finish_eof<S: DecodeSink>(&mut self, sink: &mut S) -> crate::Result<()> {
        match self.state {
            State::Body(BodyKind::Eof) => {
                sink.on_complete()?;
                self.state = State::Done;
                Ok(())
            }
            _ => Err(crate::Error::new_incomplete()),
        }
    }

    /// Consumes bytes from `buf`, emitting events; returns how many bytes
    /// were consumed. Stops at the end of a complete response, when input
    /// runs out, or when the sink stops accepting body bytes.
    pub(crate) fn decode<S: DecodeSink>(
        &mut self,
        buf: &[u8],
        sink: &mut S,
    ) -> crate::Result<usize> {
        let mut pos = 0;
        loop {
            match self.state {
                State::Head => {
                    let before = self.scratch.len();
                    self.scratch.extend_from_slice(&buf[pos..]);
                    let search_from = self.scan.saturating_sub(3);
                    match find_blank_line(&self.scratch[search_from..]) {
                        Some(i) => {
                            let head_end = search_from + i + 4;
                            pos += head_end - before;
                            self.scratch.truncate(head_end);
                            self.parse_head(sink)?;
                        }
                        None => {
                            pos = buf.len();
                            self.scan = self.scratch.len();
                            if self.scratch.len() > self.max_head_size {
                                debug!("response head over {} bytes", self.max_head_size);
                                return Err(crate::Error::new_parse(Parse::TooLarge));
                            }
                            return Ok(pos);
                        }
                    }
                }
                State::Body(BodyKind::Length(ref mut remaining)) => {
                    let avail = buf.len() - pos;
                    if avail == 0 {
                        return Ok(pos);
                    }
                    let offered = cmp::min(avail as u64, *remaining) as usize;
                    let accepted = sink.on_body(&buf[pos..pos + offered])?;
                    debug_assert!(accepted <= offered);
                    pos += accepted;
                    *remaining -= accepted as u64;
                    if *remaining == 0 {
                        sink.on_complete()?;
                        self.state = State::Done;
                        return Ok(pos);
                    }
                    // either input ran out or the window closed
                    return Ok(pos);
                }
                State::Body(BodyKind::Chunked { .. }) => {
                    let done = self.decode_chunked(buf, &mut pos, sink)?;
                    if done {
                        self.state = State::Done;
                    }
                    return Ok(pos);
                }
                State::Body(BodyKind::Eof) => {
                    let avail = buf.len() - pos;
                    if avail == 0 {
                        return Ok(pos);
                    }
                    let accepted = sink.on_body(&buf[pos..])?;
                    pos += accepted;
                    return Ok(pos);
                }
                State::Done => return Ok(pos),
            }
        }
    }

    fn parse_head<S: DecodeSink>(&mut self, sink: &mut S) -> crate::Result<()> {
        let (status, te_chunked, content_length) = {
            let mut headers = [httparse::EMPTY_HEADER; DEFAULT_MAX_HEADERS];
            let mut resp = httparse::Response::new(&mut headers);
            match resp.parse(&self.scratch) {
                Ok(httparse::Status::Complete(_)) => {}
                Ok(httparse::Status::Partial) => {
                    return Err(crate::Error::new_parse(Parse::Internal));
                }
                Err(httparse::Error::Version) => {
                    return Err(crate::Error::new_parse(Parse::Version));
                }
                Err(httparse::Error::Status) => {
                    return Err(crate::Error::new_parse(Parse::StatusLine));
                }
                Err(e) => {
                    return Err(crate::Error::new_parse(Parse::Header).with(e));
                }
            }
            let code = resp.code.expect("complete parse has code");
            let status = StatusCode::from_u16(code)
                .map_err(|_| crate::Error::new_parse(Parse::StatusLine))?;
            trace!("parsed response head, status {}", status);
            let reason = resp.reason.unwrap_or("");
            sink.on_status(status, reason.as_bytes())?;

            let mut te_chunked = false;
            let mut content_length: Option<u64> = None;
            for header in resp.headers.iter() {
                sink.on_header(header.name.as_bytes(), header.value)?;
                if header.name.eq_ignore_ascii_case("transfer-encoding") {
                    if value_has_token(header.value, "chunked") {
                        te_chunked = true;
                    }
                } else if header.name.eq_ignore_ascii_case("content-length") {
                    let n = parse_content_length_value(header.value)
                        .map_err(|()| crate::Error::new_parse(Parse::ContentLength))?;
                    match content_length {
                        Some(prev) if prev != n => {
                            return Err(crate::Error::new_parse(Parse::ContentLength));
                        }
                        _ => content_length = Some(n),
                    }
                }
            }
            (status, te_chunked, content_length)
        };
        self.scratch.clear();
        self.scan = 0;

        if status.is_informational() && status != StatusCode::SWITCHING_PROTOCOLS {
            sink.on_headers_done(HeaderBlock::Informational)?;
            self.state = State::Head;
            return Ok(());
        }
        sink.on_headers_done(HeaderBlock::Main)?;

        let no_body = self.is_head
            || status.is_informational()
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_MODIFIED;
        if no_body {
            sink.on_complete()?;
            self.state = State::Done;
        } else if te_chunked {
            self.state = State::Body(BodyKind::Chunked {
                state: ChunkedState::Start,
                size: 0,
                ext_cnt: 0,
                trailer_cnt: 0,
            });
        } else if let Some(n) = content_length {
            if n == 0 {
                sink.on_complete()?;
                self.state = State::Done;
            } else {
                self.state = State::Body(BodyKind::Length(n));
            }
        } else {
            debug!("response without framing headers, reading to EOF");
            self.state = State::Body(BodyKind::Eof);
        }
        Ok(())
    }

    fn decode_chunked<S: DecodeSink>(
        &mut self,
        buf: &[u8],
        pos: &mut usize,
        sink: &mut S,
    ) -> crate::Result<bool> {
        let max_trailer_bytes = self.max_head_size;
        let (state, size, ext_cnt, trailer_cnt) = match self.state {
            State::Body(BodyKind::Chunked {
                ref mut state,
                ref mut size,
                ref mut ext_cnt,
                ref mut trailer_cnt,
            }) => (state, size, ext_cnt, trailer_cnt),
            _ => unreachable!("decode_chunked outside chunked body"),
        };
        loop {
            if *state == ChunkedState::End {
                sink.on_complete()?;
                return Ok(true);
            }
            if *state == ChunkedState::Body {
                let avail = buf.len() - *pos;
                if avail == 0 {
                    return Ok(false);
                }
                let offered = cmp::min(avail as u64, *size) as usize;
                let accepted = sink.on_body(&buf[*pos..*pos + offered])?;
                debug_assert!(accepted <= offered);
                *pos += accepted;
                *size -= accepted as u64;
                if accepted < offered {
                    return Ok(false);
                }
                if *size == 0 {
                    *state = ChunkedState::BodyCr;
                }
                continue;
            }

            let b = if *pos < buf.len() {
                let b = buf[*pos];
                *pos += 1;
                b
            } else {
                return Ok(false);
            };
            *state = match *state {
                ChunkedState::Start => match hex_digit(b) {
                    Some(d) => {
                        *size = d;
                        ChunkedState::Size
                    }
                    None => {
                        debug!("chunk size line missing size digit");
                        return Err(crate::Error::new_parse(Parse::ChunkSize));
                    }
                },
                ChunkedState::Size => match b {
                    b'\t' | b' ' => ChunkedState::SizeLws,
                    b';' => ChunkedState::Extension,
                    b'\r' => ChunkedState::SizeLf,
                    _ => match hex_digit(b) {
                        Some(d) => {
                            *size = size
                                .checked_mul(16)
                                .and_then(|s| s.checked_add(d))
                                .ok_or_else(|| {
                                    debug!("chunk size overflow");
                                    crate::Error::new_parse(Parse::ChunkSize)
                                })?;
                            ChunkedState::Size
                        }
                        None => return Err(crate::Error::new_parse(Parse::ChunkSize)),
                    },
                },
                ChunkedState::SizeLws => match b {
                    b'\t' | b' ' => ChunkedState::SizeLws,
                    b';' => ChunkedState::Extension,
                    b'\r' => ChunkedState::SizeLf,
                    _ => return Err(crate::Error::new_parse(Parse::ChunkSize)),
                },
                // Extensions are semantically opaque; skip to the CRLF. A
                // bare LF is rejected so sloppy peers can't smuggle one.
                ChunkedState::Extension => match b {
                    b'\r' => ChunkedState::SizeLf,
                    b'\n' => return Err(crate::Error::new_parse(Parse::ChunkSize)),
                    _ => {
                        *ext_cnt += 1;
                        if *ext_cnt >= CHUNKED_EXTENSIONS_LIMIT {
                            debug!("chunk extensions over limit");
                            return Err(crate::Error::new_parse(Parse::ChunkSize));
                        }
                        ChunkedState::Extension
                    }
                },
                ChunkedState::SizeLf => match b {
                    b'\n' => {
                        if *size == 0 {
                            ChunkedState::EndCr
                        } else {
                            trace!("incoming chunk, size {}", size);
                            ChunkedState::Body
                        }
                    }
                    _ => return Err(crate::Error::new_parse(Parse::ChunkSize)),
                },
                ChunkedState::BodyCr => match b {
                    b'\r' => ChunkedState::BodyLf,
                    _ => return Err(crate::Error::new_parse(Parse::ChunkSize)),
                },
                ChunkedState::BodyLf => match b {
                    b'\n' => ChunkedState::Start,
                    _ => return Err(crate::Error::new_parse(Parse::ChunkSize)),
                },
                ChunkedState::Trailer => {
                    *trailer_cnt += 1;
                    if *trailer_cnt >= max_trailer_bytes {
                        debug!("chunk trailers over limit");
                        return Err(crate::Error::new_parse(Parse::TooLarge));
                    }
                    match b {
                        b'\r' => ChunkedState::TrailerLf,
                        _ => ChunkedState::Trailer,
                    }
                }
                ChunkedState::TrailerLf => match b {
                    b'\n' => ChunkedState::EndCr,
                    _ => return Err(crate::Error::new_parse(Parse::Header)),
                },
                ChunkedState::EndCr => match b {
                    b'\r' => ChunkedState::EndLf,
                    // not the final CRLF: a trailer line begins
                    _ => {
                        *trailer_cnt += 1;
                        if *trailer_cnt >= max_trailer_bytes {
                            return Err(crate::Error::new_parse(Parse::TooLarge));
                        }
                        ChunkedState::Trailer
                    }
                },
                ChunkedState::EndLf => match b {
                    b'\n' => ChunkedState::End,
                    _ => return Err(crate::Error::new_parse(Parse::ChunkSize)),
                },
                ChunkedState::Body | ChunkedState::End => unreachable!(),
            };
        }
    }
}

fn find_blank_line(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn hex_digit(b: u8) -> Option<u64> {
    match b {
        b'0'..=b'9' => Some((b - b'0') as u64),
        b'a'..=b'f' => Some((b + 10 - b'a') as u64),
        b'A'..=b'F' => Some((b + 10 - b'A') as u64),
        _ => None,
    }
}
