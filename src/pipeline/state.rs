//! Per-session mutable state of the scheduler

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwap;
use crossbeam::utils::CachePadded;
use flume::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use super::stats::PipelineStats;
use crate::capture::pool::BufferPool;
use crate::effect::EffectPlan;
use crate::error::StorageError;
use crate::utils::lock_unpoisoned;

/// An effect plan plus the pool its output frames are written into
pub(crate) struct ActiveEffect {
    pub plan: EffectPlan,
    pub pool: BufferPool,
}

/// State of one running session
///
/// The effect is swapped atomically; each acquired frame snapshots it, so a
/// frame already in flight finishes with the effect it started with.
pub(crate) struct PipelineState {
    effect: ArcSwap<ActiveEffect>,
    capacity: usize,
    in_flight: CachePadded<AtomicUsize>,
    in_flight_high_water: AtomicUsize,
    last_acquired: AtomicU64,
    capture: Mutex<Option<PendingCapture>>,
    counters: Counters,
}

#[derive(Default)]
struct Counters {
    acquired: AtomicU64,
    presented: AtomicU64,
    persisted: AtomicU64,
    dropped_backpressure: AtomicU64,
    dropped_sink: AtomicU64,
    dropped_stale: AtomicU64,
    dropped_cancelled: AtomicU64,
    stream_ended: AtomicBool,
}

/// Why a frame left the pipeline without being presented
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DropReason {
    Backpressure,
    Sink,
    Stale,
    Cancelled,
}

impl DropReason {
    fn label(self) -> &'static str {
        match self {
            DropReason::Backpressure => "backpressure",
            DropReason::Sink => "sink",
            DropReason::Stale => "stale",
            DropReason::Cancelled => "cancelled",
        }
    }
}

impl PipelineState {
    pub fn new(effect: Arc<ActiveEffect>, capacity: usize) -> Self {
        Self {
            effect: ArcSwap::new(effect),
            capacity,
            in_flight: CachePadded::new(AtomicUsize::new(0)),
            in_flight_high_water: AtomicUsize::new(0),
            last_acquired: AtomicU64::new(0),
            capture: Mutex::new(None),
            counters: Counters::default(),
        }
    }

    pub fn current_effect(&self) -> Arc<ActiveEffect> {
        self.effect.load_full()
    }

    pub fn swap_effect(&self, effect: Arc<ActiveEffect>) {
        self.effect.store(effect);
    }

    pub fn record_acquired(&self, sequence: u64) {
        self.last_acquired.fetch_max(sequence, Ordering::AcqRel);
        self.counters.acquired.fetch_add(1, Ordering::Relaxed);
    }

    /// Claim an in-flight slot, or `None` when at capacity
    pub fn try_reserve(self: &Arc<Self>) -> Option<InFlightSlot> {
        let reserved = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .ok()?
            + 1;
        self.in_flight_high_water
            .fetch_max(reserved, Ordering::AcqRel);
        metrics::gauge!("funnycam_frames_in_flight").set(reserved as f64);

        Some(InFlightSlot {
            state: Arc::clone(self),
        })
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn note_dropped(&self, reason: DropReason) {
        let counter = match reason {
            DropReason::Backpressure => &self.counters.dropped_backpressure,
            DropReason::Sink => &self.counters.dropped_sink,
            DropReason::Stale => &self.counters.dropped_stale,
            DropReason::Cancelled => &self.counters.dropped_cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("funnycam_frames_dropped_total", "reason" => reason.label()).increment(1);
    }

    pub fn note_presented(&self) {
        self.counters.presented.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("funnycam_frames_presented_total").increment(1);
    }

    pub fn note_persisted(&self) {
        self.counters.persisted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("funnycam_frames_persisted_total").increment(1);
    }

    pub fn note_stream_ended(&self) {
        self.counters.stream_ended.store(true, Ordering::Release);
    }

    /// Ask for the next frame acquired from now on to be persisted
    pub fn request_capture(&self) -> CaptureTicket {
        let (tx, rx) = flume::bounded(1);
        let mut pending = lock_unpoisoned(&self.capture);
        let issued_at = match pending.as_mut() {
            // Coalesce onto the capture already waiting for a frame
            Some(existing) => {
                existing.waiters.push(tx);
                existing.issued_at
            }
            None => {
                let issued_at = self.last_acquired.load(Ordering::Acquire) + 1;
                *pending = Some(PendingCapture {
                    issued_at,
                    waiters: vec![tx],
                });
                issued_at
            }
        };
        CaptureTicket { rx, issued_at }
    }

    /// Take the pending capture if `sequence` satisfies it
    pub fn take_capture_for(&self, sequence: u64) -> Option<PendingCapture> {
        let mut pending = lock_unpoisoned(&self.capture);
        match pending.as_ref() {
            Some(p) if sequence >= p.issued_at => pending.take(),
            _ => None,
        }
    }

    /// Resolve an outstanding capture with `Cancelled`
    pub fn cancel_capture(&self) {
        if let Some(pending) = lock_unpoisoned(&self.capture).take() {
            pending.complete(Err(StorageError::Cancelled));
        }
    }

    pub fn snapshot(&self) -> PipelineStats {
        let c = &self.counters;
        PipelineStats {
            acquired: c.acquired.load(Ordering::Relaxed),
            presented: c.presented.load(Ordering::Relaxed),
            persisted: c.persisted.load(Ordering::Relaxed),
            dropped_backpressure: c.dropped_backpressure.load(Ordering::Relaxed),
            dropped_sink: c.dropped_sink.load(Ordering::Relaxed),
            dropped_stale: c.dropped_stale.load(Ordering::Relaxed),
            dropped_cancelled: c.dropped_cancelled.load(Ordering::Relaxed),
            in_flight: self.in_flight(),
            in_flight_high_water: self.in_flight_high_water.load(Ordering::Acquire),
            capacity: self.capacity,
            stream_ended: c.stream_ended.load(Ordering::Acquire),
            camera: None,
        }
    }
}

/// One reserved in-flight slot; released when dropped
pub(crate) struct InFlightSlot {
    state: Arc<PipelineState>,
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        let remaining = self.state.in_flight.fetch_sub(1, Ordering::AcqRel) - 1;
        metrics::gauge!("funnycam_frames_in_flight").set(remaining as f64);
    }
}

pub(crate) struct PendingCapture {
    issued_at: u64,
    waiters: Vec<Sender<Result<PathBuf, StorageError>>>,
}

impl PendingCapture {
    pub fn complete(self, result: Result<PathBuf, StorageError>) {
        for waiter in self.waiters {
            let _ = waiter.send(result.clone());
        }
    }
}

/// Handle to the outcome of one `request_capture` call
pub struct CaptureTicket {
    rx: Receiver<Result<PathBuf, StorageError>>,
    issued_at: u64,
}

impl CaptureTicket {
    /// First sequence number eligible for this capture
    pub fn issued_at(&self) -> u64 {
        self.issued_at
    }

    /// Block until the capture is persisted, failed, or cancelled
    pub fn wait(self) -> Result<PathBuf, StorageError> {
        self.rx.recv().unwrap_or(Err(StorageError::Cancelled))
    }

    /// `None` if still pending after `timeout`
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<PathBuf, StorageError>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(StorageError::Cancelled)),
        }
    }

    /// Non-blocking check
    pub fn try_result(&self) -> Option<Result<PathBuf, StorageError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(StorageError::Cancelled)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use super::*;
    use crate::effect::{EffectDescriptor, EffectEngine, FrameGeometry};

    fn state(capacity: usize) -> Arc<PipelineState> {
        let engine = EffectEngine::with_builtin_effects(StdDuration::from_millis(33));
        let plan = engine
            .configure(&EffectDescriptor::new("normal"), FrameGeometry::new(4, 4))
            .unwrap();
        let pool = BufferPool::new("test", capacity, plan.output().frame_len());
        Arc::new(PipelineState::new(Arc::new(ActiveEffect { plan, pool }), capacity))
    }

    #[test]
    fn reservations_are_bounded_and_released_on_drop() {
        let state = state(2);
        let a = state.try_reserve().unwrap();
        let b = state.try_reserve().unwrap();
        assert!(state.try_reserve().is_none());
        assert_eq!(state.in_flight(), 2);

        drop(a);
        assert_eq!(state.in_flight(), 1);
        let _c = state.try_reserve().unwrap();
        drop(b);
        assert_eq!(state.snapshot().in_flight_high_water, 2);
    }

    #[test]
    fn capture_waits_for_a_newer_frame() {
        let state = state(1);
        state.record_acquired(10);
        let ticket = state.request_capture();
        assert_eq!(ticket.issued_at(), 11);

        assert!(state.take_capture_for(10).is_none());
        let pending = state.take_capture_for(11).unwrap();
        pending.complete(Ok(PathBuf::from("a.png")));
        assert_eq!(ticket.wait(), Ok(PathBuf::from("a.png")));
        assert!(state.take_capture_for(12).is_none());
    }

    #[test]
    fn concurrent_requests_share_one_capture() {
        let state = state(1);
        let first = state.request_capture();
        let second = state.request_capture();
        assert_eq!(first.issued_at(), second.issued_at());

        state
            .take_capture_for(first.issued_at())
            .unwrap()
            .complete(Err(StorageError::StorageFull));
        assert_eq!(first.wait(), Err(StorageError::StorageFull));
        assert_eq!(second.wait(), Err(StorageError::StorageFull));
    }

    #[test]
    fn cancelled_capture_reports_cancelled() {
        let state = state(1);
        let ticket = state.request_capture();
        assert!(ticket.try_result().is_none());
        state.cancel_capture();
        assert_eq!(ticket.wait(), Err(StorageError::Cancelled));
    }
}
