use std::cmp;
use std::fmt;

use bytes::BytesMut;

use super::chunks::ChunkQueue;
use crate::body::{BodySource, BodyStatus, Chunk};
use crate::headers;
use crate::message::RequestHead;

/// Serializes one request into bounded write buffers.
///
/// Every region of the wire format — method, path, each header name and
/// value, chunk size lines, chunk extensions, payloads — is written
/// through a resumable cursor, so an encode call can stop at any byte
/// when the destination buffer fills and pick up exactly there on the
/// next call. Nothing is required to fit in a single buffer.
pub(crate) struct Encoder {
    head: Option<HeadCursor>,
    kind: Kind,
}

/// What an encode call accomplished.
#[derive(Debug, PartialEq)]
pub(crate) enum Encode {
    /// The destination buffer filled up; call again with fresh space.
    Progress,
    /// A chunked body has no chunk to emit right now; re-schedule when the
    /// user writes one.
    NeedMoreBody,
    /// The request is fully serialized.
    Done,
}

/// Borrowed per-stream inputs the encoder drains.
pub(crate) struct Source<'a> {
    pub(crate) head: Option<&'a RequestHead>,
    pub(crate) body: &'a mut Option<Box<dyn BodySource>>,
    pub(crate) chunks: &'a mut ChunkQueue,
}

enum Kind {
    /// No body framing headers; the request ends with its head.
    NoBody,
    /// `Content-Length` framing; enforces the declared length.
    Length { declared: u64, written: u64 },
    /// `Transfer-Encoding: chunked`; drains the stream's chunk queue.
    Chunked(ChunkState),
}

impl Encoder {
    /// Picks the body framing from the request's headers.
    pub(crate) fn new(head: &RequestHead) -> crate::Result<Encoder> {
        let kind = if headers::transfer_encoding_is_chunked(&head.headers) {
            Kind::Chunked(ChunkState::new())
        } else {
            match headers::content_length(&head.headers) {
                Ok(Some(n)) => Kind::Length {
                    declared: n,
                    written: 0,
                },
                Ok(None) => Kind::NoBody,
                Err(()) => return Err(crate::Error::new_user_content_length()),
            }
        };
        Ok(Encoder {
            head: Some(HeadCursor::new()),
            kind,
        })
    }

    /// Whether the request head has been fully written out.
    pub(crate) fn head_done(&self) -> bool {
        self.head.is_none()
    }

    /// Takes back a chunk the encoder was mid-way through, so its
    /// completion callback can be failed when the stream dies.
    pub(crate) fn into_pending_chunk(self) -> Option<Chunk> {
        match self.kind {
            Kind::Chunked(state) => state.current,
            _ => None,
        }
    }

    /// Writes as many wire bytes into `dst` as fit under `max`.
    pub(crate) fn encode(
        &mut self,
        dst: &mut BytesMut,
        max: usize,
        src: &mut Source<'_>,
    ) -> crate::Result<Encode> {
        if let Some(cursor) = self.head.as_mut() {
            let head = src.head.expect("request head released before fully sent");
            if !cursor.write(head, dst, max) {
                return Ok(Encode::Progress);
            }
            self.head = None;
            trace!("request head encoded");
        }
        match self.kind {
            Kind::NoBody => Ok(Encode::Done),
            Kind::Length {
                declared,
                ref mut written,
            } => encode_length(dst, max, src, declared, written),
            Kind::Chunked(ref mut state) => state.encode(dst, max, src),
        }
    }
}

fn encode_length(
    dst: &mut BytesMut,
    max: usize,
    src: &mut Source<'_>,
    declared: u64,
    written: &mut u64,
) -> crate::Result<Encode> {
    loop {
        if *written == declared {
            if let Some(body) = src.body.as_ref() {
                if body.status() == BodyStatus::Ok {
                    debug!("body source still has data past {} declared bytes", declared);
                    return Err(crate::Error::new_body_length_mismatch());
                }
            }
            return Ok(Encode::Done);
        }
        if dst.len() >= max {
            return Ok(Encode::Progress);
        }
        let body = match src.body.as_mut() {
            Some(body) => body,
            None => {
                debug!("content-length {} with no body source", declared);
                return Err(crate::Error::new_body_length_mismatch());
            }
        };
        let space = cmp::min((max - dst.len()) as u64, declared - *written) as usize;
        let n = read_into(body.as_mut(), dst, space)?;
        *written += n as u64;
        if body.status() == BodyStatus::Eof && *written < declared {
            debug!("body source ended after {} of {} declared bytes", written, declared);
            return Err(crate::Error::new_body_length_mismatch());
        }
        if n == 0 {
            return Ok(Encode::NeedMoreBody);
        }
    }
}

/// Reads up to `space` bytes from `body` directly onto the tail of `dst`.
fn read_into(
    body: &mut dyn BodySource,
    dst: &mut BytesMut,
    space: usize,
) -> crate::Result<usize> {
    let start = dst.len();
    dst.resize(start + space, 0);
    match body.read(&mut dst[start..]) {
        Ok(n) => {
            debug_assert!(n <= space, "body source wrote past the destination");
            let n = cmp::min(n, space);
            dst.truncate(start + n);
            Ok(n)
        }
        Err(cause) => {
            dst.truncate(start);
            Err(crate::Error::new_user_body(cause))
        }
    }
}

/// Copies from `src[*offset..]` into `dst`, bounded by `max`; true once
/// the whole region has been written.
fn copy_region(dst: &mut BytesMut, max: usize, src: &[u8], offset: &mut usize) -> bool {
    let space = max - dst.len();
    let n = cmp::min(space, src.len() - *offset);
    dst.extend_from_slice(&src[*offset..*offset + n]);
    *offset += n;
    *offset == src.len()
}

// ===== request head =====

struct HeadCursor {
    region: Region,
    index: usize,
    offset: usize,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Region {
    Method,
    Sp,
    Path,
    Line,
    Name,
    Sep,
    Value,
    Crlf,
    End,
}

impl HeadCursor {
    fn new() -> HeadCursor {
        HeadCursor {
            region: Region::Method,
            index: 0,
            offset: 0,
        }
    }

    fn advance(&mut self, next: Region) {
        self.region = next;
        self.offset = 0;
    }

    fn write(&mut self, head: &RequestHead, dst: &mut BytesMut, max: usize) -> bool {
        loop {
            if dst.len() >= max {
                return false;
            }
            match self.region {
                Region::Method => {
                    if copy_region(dst, max, head.method.as_str().as_bytes(), &mut self.offset) {
                        self.advance(Region::Sp);
                    }
                }
                Region::Sp => {
                    if copy_region(dst, max, b" ", &mut self.offset) {
                        self.advance(Region::Path);
                    }
                }
                Region::Path => {
                    if copy_region(dst, max, &head.path, &mut self.offset) {
                        self.advance(Region::Line);
                    }
                }
                Region::Line => {
                    if copy_region(dst, max, b" HTTP/1.1\r\n", &mut self.offset) {
                        if head.headers.is_empty() {
                            self.advance(Region::End);
                        } else {
                            self.index = 0;
                            self.advance(Region::Name);
                        }
                    }
                }
                Region::Name => {
                    let name = &head.headers.entries()[self.index].0;
                    if copy_region(dst, max, name, &mut self.offset) {
                        self.advance(Region::Sep);
                    }
                }
                Region::Sep => {
                    if copy_region(dst, max, b": ", &mut self.offset) {
                        self.advance(Region::Value);
                    }
                }
                Region::Value => {
                    let value = &head.headers.entries()[self.index].1;
                    if copy_region(dst, max, value, &mut self.offset) {
                        self.advance(Region::Crlf);
                    }
                }
                Region::Crlf => {
                    if copy_region(dst, max, b"\r\n", &mut self.offset) {
                        self.index += 1;
                        if self.index == head.headers.len() {
                            self.advance(Region::End);
                        } else {
                            self.advance(Region::Name);
                        }
                    }
                }
                Region::End => {
                    if copy_region(dst, max, b"\r\n", &mut self.offset) {
                        return true;
                    }
                }
            }
        }
    }
}

// ===== chunked body =====

struct ChunkState {
    current: Option<Chunk>,
    phase: Phase,
    size_line: SizeLine,
    ext: usize,
    offset: usize,
    sent: u64,
    done: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Phase {
    SizeLine,
    ExtSemi,
    ExtKey,
    ExtEq,
    ExtValue,
    LineCrlf,
    Payload,
    PayloadCrlf,
    EndCrlf,
}

enum ChunkStep {
    Continue,
    NeedMoreBody,
    Finished,
}

impl ChunkState {
    fn new() -> ChunkState {
        ChunkState {
            current: None,
            phase: Phase::SizeLine,
            size_line: SizeLine::new(0),
            ext: 0,
            offset: 0,
            sent: 0,
            done: false,
        }
    }

    fn encode(
        &mut self,
        dst: &mut BytesMut,
        max: usize,
        src: &mut Source<'_>,
    ) -> crate::Result<Encode> {
        loop {
            if self.done {
                return Ok(Encode::Done);
            }
            let mut chunk = match self.current.take() {
                Some(chunk) => chunk,
                None => match src.chunks.pop() {
                    Some(chunk) => {
                        self.begin(&chunk);
                        chunk
                    }
                    None => return Ok(Encode::NeedMoreBody),
                },
            };
            if dst.len() >= max {
                self.current = Some(chunk);
                return Ok(Encode::Progress);
            }
            match self.step(&mut chunk, dst, max) {
                Ok(ChunkStep::Continue) => {
                    self.current = Some(chunk);
                }
                Ok(ChunkStep::NeedMoreBody) => {
                    self.current = Some(chunk);
                    return Ok(Encode::NeedMoreBody);
                }
                Ok(ChunkStep::Finished) => {
                    let terminator = chunk.is_terminator();
                    chunk.finish(Ok(()));
                    if terminator {
                        self.done = true;
                        return Ok(Encode::Done);
                    }
                    self.phase = Phase::SizeLine;
                }
                Err(e) => {
                    chunk.finish(Err(e.dup_reason()));
                    return Err(e);
                }
            }
        }
    }

    fn begin(&mut self, chunk: &Chunk) {
        trace!("encoding chunk, declared size {}", chunk.size);
        self.size_line = SizeLine::new(chunk.size);
        self.phase = Phase::SizeLine;
        self.ext = 0;
        self.offset = 0;
        self.sent = 0;
    }

    fn advance(&mut self, next: Phase) {
        self.phase = next;
        self.offset = 0;
    }

    fn step(&mut self, chunk: &mut Chunk, dst: &mut BytesMut, max: usize) -> crate::Result<ChunkStep> {
        match self.phase {
            Phase::SizeLine => {
                if self.size_line.write(dst, max) {
                    if chunk.extensions.is_empty() {
                        self.advance(Phase::LineCrlf);
                    } else {
                        self.ext = 0;
                        self.advance(Phase::ExtSemi);
                    }
                }
            }
            Phase::ExtSemi => {
                if copy_region(dst, max, b";", &mut self.offset) {
                    self.advance(Phase::ExtKey);
                }
            }
            Phase::ExtKey => {
                if copy_region(dst, max, &chunk.extensions[self.ext].0, &mut self.offset) {
                    self.advance(Phase::ExtEq);
                }
            }
            Phase::ExtEq => {
                if copy_region(dst, max, b"=", &mut self.offset) {
                    self.advance(Phase::ExtValue);
                }
            }
            Phase::ExtValue => {
                if copy_region(dst, max, &chunk.extensions[self.ext].1, &mut self.offset) {
                    self.ext += 1;
                    if self.ext < chunk.extensions.len() {
                        self.advance(Phase::ExtSemi);
                    } else {
                        self.advance(Phase::LineCrlf);
                    }
                }
            }
            Phase::LineCrlf => {
                if copy_region(dst, max, b"\r\n", &mut self.offset) {
                    if chunk.is_terminator() {
                        self.advance(Phase::EndCrlf);
                    } else {
                        self.advance(Phase::Payload);
                    }
                }
            }
            Phase::Payload => {
                let declared = chunk.size;
                if self.sent == declared {
                    if let Some(data) = chunk.data.as_ref() {
                        if data.status() == BodyStatus::Ok {
                            debug!("chunk source still has data past {} declared bytes", declared);
                            return Err(crate::Error::new_body_length_mismatch());
                        }
                    }
                    self.advance(Phase::PayloadCrlf);
                    return Ok(ChunkStep::Continue);
                }
                let data = match chunk.data.as_mut() {
                    Some(data) => data,
                    None => {
                        debug!("chunk declared {} bytes with no payload source", declared);
                        return Err(crate::Error::new_body_length_mismatch());
                    }
                };
                let space = cmp::min((max - dst.len()) as u64, declared - self.sent) as usize;
                let n = read_into(data.as_mut(), dst, space)?;
                self.sent += n as u64;
                if data.status() == BodyStatus::Eof && self.sent < declared {
                    debug!("chunk source ended after {} of {} declared bytes", self.sent, declared);
                    return Err(crate::Error::new_body_length_mismatch());
                }
                if n == 0 {
                    return Ok(ChunkStep::NeedMoreBody);
                }
            }
            Phase::PayloadCrlf => {
                if copy_region(dst, max, b"\r\n", &mut self.offset) {
                    return Ok(ChunkStep::Finished);
                }
            }
            Phase::EndCrlf => {
                if copy_region(dst, max, b"\r\n", &mut self.offset) {
                    return Ok(ChunkStep::Finished);
                }
            }
        }
        Ok(ChunkStep::Continue)
    }
}

// ===== chunk size line =====

// each byte of a u64 becomes 2 hex chars
const CHUNK_SIZE_MAX_BYTES: usize = 16;

/// The lowercase hex size at the start of a chunk line, staged in a stack
/// buffer so it can be written out across buffer boundaries.
#[derive(Clone, Copy)]
struct SizeLine {
    bytes: [u8; CHUNK_SIZE_MAX_BYTES],
    pos: u8,
    len: u8,
}

impl SizeLine {
    fn new(size: u64) -> SizeLine {
        use std::fmt::Write;
        let mut line = SizeLine {
            bytes: [0; CHUNK_SIZE_MAX_BYTES],
            pos: 0,
            len: 0,
        };
        write!(&mut line, "{:x}", size).expect("CHUNK_SIZE_MAX_BYTES should fit any u64");
        line
    }

    fn write(&mut self, dst: &mut BytesMut, max: usize) -> bool {
        let space = max - dst.len();
        let n = cmp::min(space, (self.len - self.pos) as usize);
        dst.extend_from_slice(&self.bytes[self.pos as usize..self.pos as usize + n]);
        self.pos += n as u8;
        self.pos == self.len
    }
}

impl fmt::Write for SizeLine {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let len = self.len as usize;
        self.bytes[len..len + s.len()].copy_from_slice(s.as_bytes());
        self.len += s.len() as u8;
        Ok(())
    }
}
