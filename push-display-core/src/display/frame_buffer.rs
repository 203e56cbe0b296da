//! Double-buffered hand-off of encoded frames between render and delivery.
//!
//! Two owned slots plus an atomic index naming the newest one. The
//! producer always writes the slot that is *not* the newest, then flips
//! the index; the consumer clones whatever the index names. Each slot
//! lock is held only for a pointer move or a refcount bump, never for
//! an encode or a transfer.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::display::encoder::WireFrame;

const EMPTY: usize = usize::MAX;

/// Latest-wins frame store shared by the render and delivery loops.
#[derive(Debug)]
pub struct FrameBuffer {
    slots: [Mutex<Option<WireFrame>>; 2],
    latest: AtomicUsize,
    published: AtomicU64,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            slots: [Mutex::new(None), Mutex::new(None)],
            latest: AtomicUsize::new(EMPTY),
            published: AtomicU64::new(0),
        }
    }

    /// Store `frame` as the newest frame, overwriting the older slot.
    pub fn publish(&self, frame: WireFrame) {
        let current = self.latest.load(Ordering::Acquire);
        let next = if current == 0 { 1 } else { 0 };
        *self.slot(next) = Some(frame);
        self.latest.store(next, Ordering::Release);
        self.published.fetch_add(1, Ordering::AcqRel);
    }

    /// The most recently published frame, or `None` before the first
    /// [`publish`](Self::publish).
    pub fn latest(&self) -> Option<WireFrame> {
        match self.latest.load(Ordering::Acquire) {
            EMPTY => None,
            idx => self.slot(idx).clone(),
        }
    }

    /// Number of frames published so far.
    pub fn generation(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }

    fn slot(&self, idx: usize) -> MutexGuard<'_, Option<WireFrame>> {
        // A poisoned slot still holds a complete frame or `None`.
        self.slots[idx]
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────
