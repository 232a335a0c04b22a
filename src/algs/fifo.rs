//! Double-buffered byte FIFO.
//!
//! Bytes are pushed into one of two vectors and read back from the front
//! one. A single push is never split between the two, so a reader that
//! knows where a record starts can decode it from one contiguous slice.

use crate::topo_error::TopoError;

/// Default initial capacity of each half.
pub const DEFAULT_FIFO_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct FifoBuffer {
    front: Vec<u8>,
    back: Vec<u8>,
    head: usize,
}

impl Default for FifoBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_FIFO_CAPACITY)
    }
}

impl FifoBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            front: Vec::with_capacity(capacity),
            back: Vec::with_capacity(capacity),
            head: 0,
        }
    }

    /// Bytes not yet popped.
    pub fn len(&self) -> usize {
        self.front.len() - self.head + self.back.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `bytes` as one contiguous run.
    pub fn push(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        if self.head == self.front.len() && self.back.is_empty() {
            // everything was read; start over at the beginning of front
            self.front.clear();
            self.head = 0;
            self.front.extend_from_slice(bytes);
            return;
        }
        let fits = self.front.capacity() - self.front.len() >= bytes.len();
        if self.back.is_empty() && fits {
            self.front.extend_from_slice(bytes);
        } else {
            self.back.extend_from_slice(bytes);
        }
    }

    /// Unread bytes of the front half.
    pub fn top(&self) -> Option<&[u8]> {
        let rest = &self.front[self.head..];
        if rest.is_empty() { None } else { Some(rest) }
    }

    /// Consume `n` bytes from the front half.
    pub fn pop(&mut self, n: usize) -> Result<(), TopoError> {
        let available = self.front.len() - self.head;
        if n > available {
            return Err(TopoError::BufferUnderrun {
                requested: n,
                available,
            });
        }
        self.advance(n);
        Ok(())
    }

    fn advance(&mut self, n: usize) {
        self.head += n;
        if self.head == self.front.len() {
            std::mem::swap(&mut self.front, &mut self.back);
            self.back.clear();
            self.head = 0;
        }
    }

    /// Move every pending byte into `other`, one front run at a time.
    pub fn transfer_to(&mut self, other: &mut FifoBuffer) -> usize {
        let mut moved = 0;
        loop {
            let n = match self.top() {
                Some(run) => {
                    other.push(run);
                    run.len()
                }
                None => break,
            };
            self.advance(n);
            moved += n;
        }
        moved
    }
}
