//! Bounded pool of pixel storage with lease tracking
//!
//! Every buffer handed out carries a lease id. Returning it (explicitly or on
//! drop) happens under the pool lock, so a recycled slot is never visible to
//! the next acquirer before the previous holder is fully done with it.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crossbeam::utils::CachePadded;
use tracing::debug;

use crate::error::CaptureError;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Fixed-capacity pool of equally sized byte buffers
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

struct PoolShared {
    id: u64,
    label: &'static str,
    buffer_len: usize,
    capacity: usize,
    slots: Mutex<Slots>,
    stats: CachePadded<PoolStats>,
}

struct Slots {
    free: Vec<(usize, Vec<u8>)>,
    leases: Vec<Option<u64>>,
    next_lease: u64,
    open: bool,
}

#[derive(Default)]
struct PoolStats {
    in_use: AtomicUsize,
    high_water: AtomicUsize,
    exhausted: AtomicUsize,
}

/// Snapshot of pool usage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolUsage {
    pub capacity: usize,
    pub in_use: usize,
    pub high_water: usize,
    pub exhausted: usize,
}

impl BufferPool {
    /// Pre-allocate `capacity` buffers of `buffer_len` bytes each
    pub fn new(label: &'static str, capacity: usize, buffer_len: usize) -> Self {
        let free = (0..capacity)
            .rev()
            .map(|slot| (slot, vec![0u8; buffer_len]))
            .collect();

        Self {
            shared: Arc::new(PoolShared {
                id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
                label,
                buffer_len,
                capacity,
                slots: Mutex::new(Slots {
                    free,
                    leases: vec![None; capacity],
                    next_lease: 1,
                    open: true,
                }),
                stats: CachePadded::new(PoolStats::default()),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn buffer_len(&self) -> usize {
        self.shared.buffer_len
    }

    /// Take a free buffer without blocking
    pub fn try_acquire(&self) -> Option<PooledBuffer> {
        let mut slots = self.shared.lock();
        if !slots.open {
            return None;
        }

        let Some((slot, data)) = slots.free.pop() else {
            self.shared.stats.exhausted.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let lease = slots.next_lease;
        slots.next_lease += 1;
        slots.leases[slot] = Some(lease);
        drop(slots);

        let in_use = self.shared.stats.in_use.fetch_add(1, Ordering::AcqRel) + 1;
        self.shared
            .stats
            .high_water
            .fetch_max(in_use, Ordering::AcqRel);

        Some(PooledBuffer {
            shared: Arc::clone(&self.shared),
            slot,
            lease,
            data,
        })
    }

    /// Check that `buffer` is a live lease of this pool
    pub fn verify(&self, buffer: &PooledBuffer) -> Result<(), CaptureError> {
        if buffer.shared.id != self.shared.id {
            return Err(CaptureError::BufferMisuse(format!(
                "buffer from pool {} returned to {} pool {}",
                buffer.shared.id, self.shared.label, self.shared.id
            )));
        }

        let slots = self.shared.lock();
        if !slots.open {
            return Err(CaptureError::BufferMisuse(format!(
                "buffer used after {} pool was invalidated",
                self.shared.label
            )));
        }
        match slots.leases.get(buffer.slot).copied().flatten() {
            Some(lease) if lease == buffer.lease => Ok(()),
            _ => Err(CaptureError::BufferMisuse(format!(
                "stale lease {} on {} slot {}",
                buffer.lease, self.shared.label, buffer.slot
            ))),
        }
    }

    /// Invalidate every outstanding lease; returned buffers are discarded
    pub fn close(&self) {
        let mut slots = self.shared.lock();
        if !slots.open {
            return;
        }
        slots.open = false;
        slots.free.clear();
        debug!(pool = self.shared.label, "Buffer pool closed");
    }

    pub fn usage(&self) -> PoolUsage {
        let stats = &self.shared.stats;
        PoolUsage {
            capacity: self.shared.capacity,
            in_use: stats.in_use.load(Ordering::Acquire),
            high_water: stats.high_water.load(Ordering::Acquire),
            exhausted: stats.exhausted.load(Ordering::Relaxed),
        }
    }
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn reclaim(&self, slot: usize, lease: u64, data: Vec<u8>) {
        let mut slots = self.lock();
        let live = slots.leases.get(slot).copied().flatten() == Some(lease);
        if live {
            slots.leases[slot] = None;
            if slots.open {
                slots.free.push((slot, data));
            }
        }
        drop(slots);
        self.stats.in_use.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Exclusive lease on one pool slot; returns itself to the pool on drop
pub struct PooledBuffer {
    shared: Arc<PoolShared>,
    slot: usize,
    lease: u64,
    data: Vec<u8>,
}

impl PooledBuffer {
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn pool_id(&self) -> u64 {
        self.shared.id
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        self.shared.reclaim(self.slot, self.lease, data);
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("pool", &self.shared.id)
            .field("slot", &self.slot)
            .field("lease", &self.lease)
            .field("len", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_is_bounded() {
        let pool = BufferPool::new("test", 2, 16);
        let a = pool.try_acquire().unwrap();
        let _b = pool.try_acquire().unwrap();
        assert!(pool.try_acquire().is_none());
        assert_eq!(pool.usage().exhausted, 1);

        drop(a);
        assert!(pool.try_acquire().is_some());
        assert_eq!(pool.usage().high_water, 2);
    }

    #[test]
    fn buffers_have_requested_length() {
        let pool = BufferPool::new("test", 1, 64);
        let buf = pool.try_acquire().unwrap();
        assert_eq!(buf.len(), 64);
    }

    #[test]
    fn foreign_buffer_is_misuse() {
        let ours = BufferPool::new("ours", 1, 4);
        let theirs = BufferPool::new("theirs", 1, 4);
        let buf = theirs.try_acquire().unwrap();
        assert!(matches!(
            ours.verify(&buf),
            Err(CaptureError::BufferMisuse(_))
        ));
        assert!(theirs.verify(&buf).is_ok());
    }

    #[test]
    fn buffers_outstanding_at_close_are_invalidated() {
        let pool = BufferPool::new("test", 2, 4);
        let buf = pool.try_acquire().unwrap();
        pool.close();
        assert!(matches!(
            pool.verify(&buf),
            Err(CaptureError::BufferMisuse(_))
        ));
        drop(buf);
        assert_eq!(pool.usage().in_use, 0);
        assert!(pool.try_acquire().is_none());
    }
}
