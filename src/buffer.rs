//! Cross-thread sample queue.
//!
//! [`SampleQueue`] moves owned blocks of samples between the source, the
//! demodulator and the audio sink. It is a FIFO of blocks protected by a
//! mutex and a condition variable, with a one-shot end-of-stream marker.
//! An empty block returned by [`SampleQueue::pull`] means the stream has
//! ended; empty blocks are never stored.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

struct Inner<T> {
    queue: VecDeque<Vec<T>>,
    /// Total number of samples across all queued blocks.
    qlen: usize,
    end_marked: bool,
}

/// Thread-safe FIFO of sample blocks with an end-of-stream marker.
pub struct SampleQueue<T> {
    inner: Mutex<Inner<T>>,
    cond: Condvar,
}

impl<T> SampleQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                qlen: 0,
                end_marked: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Append a block of samples to the queue and wake all waiters.
    /// Empty blocks are discarded.
    pub fn push(&self, samples: Vec<T>) {
        if samples.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.qlen += samples.len();
        inner.queue.push_back(samples);
        drop(inner);
        self.cond.notify_all();
    }

    /// Mark the end of the data stream. Idempotent.
    pub fn push_end(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.end_marked = true;
        drop(inner);
        self.cond.notify_all();
    }

    /// Total number of samples currently queued.
    pub fn queued_samples(&self) -> usize {
        self.inner.lock().unwrap().qlen
    }

    /// Remove and return the block at the head of the queue.
    ///
    /// Blocks the caller while the queue is empty and the end marker has not
    /// been pushed. Once the end marker is reached and the queue has drained,
    /// returns an empty vector.
    pub fn pull(&self) -> Vec<T> {
        let mut inner = self.inner.lock().unwrap();
        while inner.queue.is_empty() && !inner.end_marked {
            inner = self.cond.wait(inner).unwrap();
        }
        match inner.queue.pop_front() {
            Some(block) => {
                inner.qlen -= block.len();
                block
            }
            None => Vec::new(),
        }
    }

    /// True once the end marker has been pushed and all blocks consumed.
    pub fn end_reached(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.qlen == 0 && inner.end_marked
    }

    /// Block until the queue holds at least `minfill` samples or the end
    /// marker has been pushed.
    pub fn wait_for_fill(&self, minfill: usize) {
        let mut inner = self.inner.lock().unwrap();
        while inner.qlen < minfill && !inner.end_marked {
            inner = self.cond.wait(inner).unwrap();
        }
    }

    /// True while the queue holds fewer than `minfill` samples.
    pub fn is_below(&self, minfill: usize) -> bool {
        self.inner.lock().unwrap().qlen < minfill
    }
}

impl<T> Default for SampleQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
