//! Latest-frame buffer shared between one capture worker and any number of readers.
//!
//! The writer swaps an `Arc<Frame>` into a single slot under an exclusive
//! lock; readers clone the `Arc` under a shared lock. The frame count is
//! mirrored into an atomic while the write lock is held, so `read_if_new`
//! can answer "nothing new" without touching the lock at all.

use super::frame::Frame;
use super::sink::FrameSink;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

#[derive(Default)]
struct Slot {
    frame: Option<Arc<Frame>>,
    sequence: u64,
    last_frame_time: Option<Instant>,
    started_at: Option<Instant>,
}

/// Capture statistics derived from the frame count
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureStats {
    /// Average frames per second since the first write
    pub fps: f64,
    /// Frames written since creation or the last reset
    pub total_frames: u64,
    /// Time since the first write
    pub uptime: Duration,
}

/// Single-slot store holding the most recent frame of one camera
#[derive(Default)]
pub struct FrameBuffer {
    slot: RwLock<Slot>,
    frame_count: AtomicU64,
    dropped_count: AtomicU64,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> RwLockReadGuard<'_, Slot> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot_mut(&self) -> RwLockWriteGuard<'_, Slot> {
        self.slot.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish a new frame, replacing whatever was there
    pub fn write(&self, frame: Frame) {
        let frame = Arc::new(frame);
        let now = Instant::now();

        let mut slot = self.slot_mut();
        slot.frame = Some(frame);
        slot.sequence += 1;
        slot.last_frame_time = Some(now);
        slot.started_at.get_or_insert(now);
        self.frame_count.store(slot.sequence, Ordering::Release);
    }

    /// Latest frame, or `None` if nothing has been written yet
    pub fn read(&self) -> Option<Arc<Frame>> {
        self.slot().frame.clone()
    }

    /// Latest frame and its sequence number if it is newer than `last_seen`.
    ///
    /// Polling faster than the producer costs one atomic load per call.
    pub fn read_if_new(&self, last_seen: u64) -> Option<(Arc<Frame>, u64)> {
        if self.frame_count.load(Ordering::Acquire) <= last_seen {
            return None;
        }
        let slot = self.slot();
        if slot.sequence <= last_seen {
            // reset raced with us
            return None;
        }
        slot.frame.clone().map(|frame| (frame, slot.sequence))
    }

    /// Count a frame that was decoded but deliberately not published
    pub fn mark_dropped(&self) {
        self.dropped_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Acquire)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    pub fn last_frame_time(&self) -> Option<Instant> {
        self.slot().last_frame_time
    }

    /// True when no frame arrived within `window` (or ever)
    pub fn is_stale(&self, window: Duration) -> bool {
        match self.last_frame_time() {
            Some(t) => t.elapsed() > window,
            None => true,
        }
    }

    pub fn capture_stats(&self) -> CaptureStats {
        let slot = self.slot();
        let total_frames = slot.sequence;
        let uptime = slot
            .started_at
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO);
        let secs = uptime.as_secs_f64();
        let fps = if secs > 0.0 {
            total_frames as f64 / secs
        } else {
            0.0
        };
        CaptureStats {
            fps,
            total_frames,
            uptime,
        }
    }

    /// Drop the stored frame and zero every counter
    pub fn reset(&self) {
        let mut slot = self.slot_mut();
        *slot = Slot::default();
        self.frame_count.store(0, Ordering::Release);
        self.dropped_count.store(0, Ordering::Relaxed);
    }
}

impl FrameSink for FrameBuffer {
    fn publish(&self, frame: Frame) {
        self.write(frame);
    }

    fn mark_dropped(&self) {
        FrameBuffer::mark_dropped(self);
    }

    fn frames_published(&self) -> u64 {
        self.frame_count()
    }

    fn last_frame_time(&self) -> Option<Instant> {
        FrameBuffer::last_frame_time(self)
    }
}
