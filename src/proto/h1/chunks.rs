use std::collections::VecDeque;
use std::fmt;

use crate::body::Chunk;

/// Per-stream FIFO of user-submitted chunks awaiting the encoder.
///
/// The zero-size terminator latches the queue: pushing anything after it
/// is rejected, and the encoder knows the body is finished once the
/// terminator has been drained.
pub(crate) struct ChunkQueue {
    queue: VecDeque<Chunk>,
    terminated: bool,
}

impl ChunkQueue {
    pub(crate) fn new() -> ChunkQueue {
        ChunkQueue {
            queue: VecDeque::new(),
            terminated: false,
        }
    }

    /// Enqueues a chunk; hands it back if the terminator already arrived.
    pub(crate) fn push(&mut self, chunk: Chunk) -> Result<(), Chunk> {
        if self.terminated {
            return Err(chunk);
        }
        if chunk.is_terminator() {
            self.terminated = true;
        }
        self.queue.push_back(chunk);
        Ok(())
    }

    pub(crate) fn pop(&mut self) -> Option<Chunk> {
        self.queue.pop_front()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Fails every queued chunk's completion callback with `reason`.
    pub(crate) fn drain_with_error<F>(&mut self, mut reason: F)
    where
        F: FnMut() -> crate::Error,
    {
        for chunk in self.queue.drain(..) {
            chunk.finish(Err(reason()));
        }
    }
}

impl fmt::Debug for ChunkQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkQueue")
            .field("len", &self.queue.len())
            .field("terminated", &self.terminated)
            .finish()
    }
}
