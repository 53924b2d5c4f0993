//! Drop-oldest ring of frames ready for the consumer

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::utils::CachePadded;
use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;

use super::frame::FrameBuffer;

/// Ring buffer of captured frames that never blocks the producer
///
/// When full, pushing evicts the oldest frame; eviction hands the frame back
/// to the caller so its storage can be recycled.
pub struct FrameRingBuffer {
    ring: HeapRb<FrameBuffer>,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    frames_written: AtomicUsize,
    frames_read: AtomicUsize,
    frames_dropped: AtomicUsize,
}

/// Counters of a ring: (written, read, dropped)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingStats {
    pub written: usize,
    pub read: usize,
    pub dropped: usize,
}

impl FrameRingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: HeapRb::new(capacity.max(1)),
            stats: CachePadded::new(Stats::default()),
        }
    }

    /// Producer: push a frame, returning the evicted oldest frame if full
    pub fn push(&mut self, frame: FrameBuffer) -> Option<FrameBuffer> {
        let evicted = self.ring.push_overwrite(frame);
        if evicted.is_some() {
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.frames_written.fetch_add(1, Ordering::Relaxed);
        evicted
    }

    /// Consumer: pop the oldest frame
    pub fn pop(&mut self) -> Option<FrameBuffer> {
        let frame = self.ring.try_pop()?;
        self.stats.frames_read.fetch_add(1, Ordering::Relaxed);
        Some(frame)
    }

    /// Producer: take the oldest unconsumed frame back to reuse its storage
    pub fn evict_oldest(&mut self) -> Option<FrameBuffer> {
        let frame = self.ring.try_pop()?;
        self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
        Some(frame)
    }

    /// Record a frame the producer had to discard without queueing it
    pub fn note_dropped(&self) {
        self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.ring.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Discard every queued frame
    pub fn clear(&mut self) -> usize {
        let mut cleared = 0;
        while self.ring.try_pop().is_some() {
            cleared += 1;
        }
        cleared
    }

    pub fn stats(&self) -> RingStats {
        RingStats {
            written: self.stats.frames_written.load(Ordering::Relaxed),
            read: self.stats.frames_read.load(Ordering::Relaxed),
            dropped: self.stats.frames_dropped.load(Ordering::Relaxed),
        }
    }
}
