//! Unbounded FIFO of PCM blobs, drained in fixed-size chunks.
//!
//! Producers (sentence synthesis tasks) append variable-length blobs; the
//! single consumer (the clocked track source) reads exactly n bytes every
//! 20 ms, zero-padded when the queue runs dry. Silence on underflow is how
//! pauses between sentences are rendered — it is not an error.

use std::collections::VecDeque;
use std::sync::Mutex;

/// Concurrency-safe FIFO audio queue.
///
/// No blob is ever dropped except by [`AudioQueue::clear`]; reads strictly
/// advance a `(current, offset)` cursor through the queued blobs.
pub struct AudioQueue {
    inner: Mutex<Inner>,
}

struct Inner {
    chunks: VecDeque<Vec<u8>>,
    /// Partially-consumed blob at the head.
    current: Vec<u8>,
    offset: usize,
}

impl AudioQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                chunks: VecDeque::new(),
                current: Vec::new(),
                offset: 0,
            }),
        }
    }

    /// Total bytes currently readable.
    pub fn available(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        let mut total = inner.current.len() - inner.offset;
        for chunk in &inner.chunks {
            total += chunk.len();
        }
        total
    }

    /// Append a PCM blob to the back of the queue. Empty blobs are ignored.
    pub fn enqueue(&self, data: Vec<u8>) {
        if data.is_empty() {
            return;
        }
        self.inner.lock().unwrap().chunks.push_back(data);
    }

    /// Read exactly `n` bytes, advancing the cursor through queued blobs.
    ///
    /// Any bytes beyond what is available come back as zeros (silence).
    /// Never blocks.
    pub fn read(&self, n: usize) -> Vec<u8> {
        let mut inner = self.inner.lock().unwrap();
        let mut result = vec![0u8; n];
        let mut written = 0;

        while written < n {
            if inner.offset >= inner.current.len() {
                match inner.chunks.pop_front() {
                    Some(next) => {
                        inner.current = next;
                        inner.offset = 0;
                    }
                    // Queue drained — the rest stays silent.
                    None => break,
                }
            }

            let remaining = inner.current.len() - inner.offset;
            let to_copy = remaining.min(n - written);
            let off = inner.offset;
            result[written..written + to_copy]
                .copy_from_slice(&inner.current[off..off + to_copy]);
            inner.offset += to_copy;
            written += to_copy;
        }

        result
    }

    /// Discard the cursor and every queued blob.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.chunks.clear();
        inner.current = Vec::new();
        inner.offset = 0;
    }
}

impl Default for AudioQueue {
    fn default() -> Self {
        Self::new()
    }
}
