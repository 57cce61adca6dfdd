//! Bounded per-consumer frame queue (newest wins)

use crate::camera::Frame;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

/// Single-producer/single-consumer frame buffer
///
/// `push` never blocks: when full, the oldest frames are discarded.
pub struct FrameQueue {
    frames: Mutex<VecDeque<Frame>>,
    max_len: usize,
    notify: Notify,
    dropped: AtomicU64,
}

impl FrameQueue {
    pub fn new(max_len: usize) -> Self {
        let max_len = max_len.max(1);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(max_len)),
            max_len,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    fn frames(&self) -> MutexGuard<'_, VecDeque<Frame>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue, dropping the oldest frames beyond the bound
    pub fn push(&self, frame: Frame) {
        let mut dropped = 0;
        {
            let mut frames = self.frames();
            while frames.len() >= self.max_len {
                frames.pop_front();
                dropped += 1;
            }
            frames.push_back(frame);
        }
        if dropped > 0 {
            self.dropped.fetch_add(dropped, Ordering::Relaxed);
        }
        self.notify.notify_one();
    }

    pub fn try_pop(&self) -> Option<Frame> {
        self.frames().pop_front()
    }

    /// Wait up to `timeout` for a frame
    ///
    /// May return `None` early; callers poll in a loop.
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<Frame> {
        if let Some(frame) = self.try_pop() {
            return Some(frame);
        }
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
        self.try_pop()
    }

    /// Discard everything buffered, returning how many frames were dropped
    pub fn drain(&self) -> usize {
        let mut frames = self.frames();
        let n = frames.len();
        frames.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.frames().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Frames discarded by backpressure so far
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
