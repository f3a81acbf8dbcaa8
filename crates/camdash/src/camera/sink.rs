//! Frame delivery capability shared by the latest-frame buffer and the
//! bounded queue.

use super::buffer::FrameBuffer;
use super::frame::Frame;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// Where a capture worker hands its decoded frames
pub trait FrameSink: Send + Sync {
    /// Deliver a decoded frame
    fn publish(&self, frame: Frame);

    /// Record a frame that was decoded and then discarded
    fn mark_dropped(&self);

    /// Frames delivered so far
    fn frames_published(&self) -> u64;

    /// Time of the last delivered frame
    fn last_frame_time(&self) -> Option<Instant>;
}

/// How the manager delivers frames to consumers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "mode")]
pub enum SinkMode {
    /// Latest frame only
    #[default]
    Buffer,
    /// Bounded FIFO; the oldest frame is evicted when full
    Queue { capacity: usize },
}

/// Bounded frame queue for consumers that want every frame in order
pub struct FrameQueue {
    frames: Mutex<VecDeque<Frame>>,
    capacity: usize,
    published: AtomicU64,
    dropped: AtomicU64,
    last_frame_time: Mutex<Option<Instant>>,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            last_frame_time: Mutex::new(None),
        }
    }

    /// Take the oldest queued frame
    pub fn pop(&self) -> Option<Frame> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    pub fn len(&self) -> usize {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl FrameSink for FrameQueue {
    fn publish(&self, frame: Frame) {
        let mut frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
        if frames.len() >= self.capacity {
            frames.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        frames.push_back(frame);
        drop(frames);

        self.published.fetch_add(1, Ordering::Release);
        *self
            .last_frame_time
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    fn mark_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn frames_published(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }

    fn last_frame_time(&self) -> Option<Instant> {
        *self
            .last_frame_time
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// A camera's sink, kept typed so accessors can hand out the concrete handle
#[derive(Clone)]
pub enum CameraSink {
    Buffer(Arc<FrameBuffer>),
    Queue(Arc<FrameQueue>),
}

impl CameraSink {
    pub fn for_mode(mode: SinkMode) -> Self {
        match mode {
            SinkMode::Buffer => CameraSink::Buffer(Arc::new(FrameBuffer::new())),
            SinkMode::Queue { capacity } => CameraSink::Queue(Arc::new(FrameQueue::new(capacity))),
        }
    }

    pub fn as_sink(&self) -> Arc<dyn FrameSink> {
        match self {
            CameraSink::Buffer(buffer) => buffer.clone(),
            CameraSink::Queue(queue) => queue.clone(),
        }
    }

    pub fn buffer(&self) -> Option<Arc<FrameBuffer>> {
        match self {
            CameraSink::Buffer(buffer) => Some(buffer.clone()),
            CameraSink::Queue(_) => None,
        }
    }

    pub fn queue(&self) -> Option<Arc<FrameQueue>> {
        match self {
            CameraSink::Queue(queue) => Some(queue.clone()),
            CameraSink::Buffer(_) => None,
        }
    }

    pub fn dropped_count(&self) -> u64 {
        match self {
            CameraSink::Buffer(buffer) => buffer.dropped_count(),
            CameraSink::Queue(queue) => queue.dropped_count(),
        }
    }
}
