use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::AudioFrame;

/// What to do when a bounded queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the frame that has waited longest
    #[default]
    DropOldest,
    /// Refuse the incoming frame
    DropNewest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after evicting the oldest frame
    EvictedOldest,
    /// Refused because the queue was full
    Rejected,
}

struct Inner {
    frames: Mutex<VecDeque<AudioFrame>>,
    /// None keeps the queue unbounded
    capacity: Option<usize>,
    policy: OverflowPolicy,
    dropped: AtomicU64,
}

/// FIFO of decoded frames between the network side and the playback pipeline.
///
/// The lock is only held for the push or pop itself, never across device I/O.
#[derive(Clone)]
pub struct PlaybackQueue {
    inner: Arc<Inner>,
}

impl PlaybackQueue {
    pub fn unbounded() -> Self {
        Self::with_limit(None, OverflowPolicy::default())
    }

    pub fn bounded(capacity: usize, policy: OverflowPolicy) -> Self {
        Self::with_limit(Some(capacity.max(1)), policy)
    }

    pub fn with_limit(capacity: Option<usize>, policy: OverflowPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                frames: Mutex::new(VecDeque::with_capacity(capacity.unwrap_or(16))),
                capacity,
                policy,
                dropped: AtomicU64::new(0),
            }),
        }
    }

    pub fn push(&self, frame: AudioFrame) -> PushOutcome {
        let mut frames = self.inner.frames.lock();

        let full = self
            .inner
            .capacity
            .map(|cap| frames.len() >= cap)
            .unwrap_or(false);

        if !full {
            frames.push_back(frame);
            return PushOutcome::Queued;
        }

        self.inner.dropped.fetch_add(1, Ordering::Relaxed);
        match self.inner.policy {
            OverflowPolicy::DropOldest => {
                frames.pop_front();
                frames.push_back(frame);
                PushOutcome::EvictedOldest
            }
            OverflowPolicy::DropNewest => PushOutcome::Rejected,
        }
    }

    pub fn try_pop(&self) -> Option<AudioFrame> {
        self.inner.frames.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.frames.lock().is_empty()
    }

    /// Drop everything queued (e.g. when a new session starts)
    pub fn clear(&self) {
        self.inner.frames.lock().clear();
    }

    /// Frames lost to the overflow policy so far
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

impl Default for PlaybackQueue {
    fn default() -> Self {
        Self::unbounded()
    }
}
