//! A single buffer-cache frame.
//!
//! The sector a frame caches is protected by the cache's `bh_lock`
//! (`BhState::sector_of`, see `cache::mod`), not by the frame's own mutex.
//! Everything else about a frame — its bytes, dirty bit, and clock
//! reference bit — lives behind `Frame::lock`. `in_use` is a third, separate
//! flag: it must be readable by the clock sweep without blocking on a
//! frame that is currently pinned by another caller, so it lives outside
//! the mutex as an atomic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::param::SECTOR_SIZE;

pub(super) struct FrameInner {
    pub data: [u8; SECTOR_SIZE],
    pub dirty: bool,
    /// Clock reference bit.
    pub accessed: bool,
}

pub(super) struct Frame {
    /// Pinned by a reader/writer right now. Peeked by the clock sweep
    /// without acquiring `lock`.
    pub in_use: AtomicBool,
    pub lock: Mutex<FrameInner>,
}

impl Frame {
    pub fn new() -> Self {
        Self {
            in_use: AtomicBool::new(false),
            lock: Mutex::new(FrameInner {
                data: [0u8; SECTOR_SIZE],
                dirty: false,
                accessed: false,
            }),
        }
    }

    pub fn pin(&self) {
        self.in_use.store(true, Ordering::Release);
    }

    pub fn unpin(&self) {
        self.in_use.store(false, Ordering::Release);
    }

    pub fn is_pinned(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }
}

/// RAII guard over a pinned frame. Unpins the frame on drop; exposes the
/// frame's bytes only through length-checked slices, never a raw pointer,
/// replacing a raw `void* data` handle with something that cannot be held
/// past the scope of the copy it serves.
pub(super) struct FrameGuard<'a> {
    pub idx: usize,
    frame: &'a Frame,
    pub inner: MutexGuard<'a, FrameInner>,
}

impl<'a> FrameGuard<'a> {
    pub fn new(idx: usize, frame: &'a Frame, inner: MutexGuard<'a, FrameInner>) -> Self {
        frame.pin();
        Self { idx, frame, inner }
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        self.frame.unpin();
    }
}
