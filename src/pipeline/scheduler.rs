//! Pipeline Scheduler
//!
//! One session runs three kinds of threads connected by bounded channels:
//!
//! ```text
//! acquire ──jobs──> transform worker(s) ──presented──> presenter
//!    │                                                     │
//!    └── drops when max_in_flight frames are in progress   └── Presentation Sink,
//!                                                              pending capture
//! ```
//!
//! An in-flight slot is reserved when a frame is acquired and released when
//! its last buffer is dropped, so at most `max_in_flight` camera frames are
//! being worked on at once. Presentation follows "latest only": a frame
//! older than the last presented one is discarded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use tracing::{debug, error, info, instrument, warn};

use super::state::{ActiveEffect, CaptureTicket, DropReason, InFlightSlot, PipelineState};
use super::stats::PipelineStats;
use crate::capture::pool::BufferPool;
use crate::capture::{CameraSource, CameraStream, FrameBuffer, FramePoll};
use crate::effect::{EffectDescriptor, EffectEngine, FrameGeometry};
use crate::error::{PipelineError, PipelineResult};
use crate::sink::{CaptureSink, FileCaptureSink, PresentationSink};
use crate::utils::lock_unpoisoned;
use crate::{CaptureConfig, Config, PipelineConfig};

/// How long the acquisition loop waits before rechecking for cancellation
const ACQUIRE_POLL: Duration = Duration::from_millis(20);

/// Externally visible lifecycle state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineStatus {
    Idle,
    Running,
    Stopping,
    /// Unrecoverable device or ownership error; `start` recovers
    Faulted(String),
}

type SharedPresenter = Arc<Mutex<Box<dyn PresentationSink>>>;
type SharedStorage = Arc<Mutex<Box<dyn CaptureSink>>>;

/// Camera → effect → sinks pipeline
///
/// The four control calls (`start`, `update_effect`, `request_capture`,
/// `stop`) may be issued from any thread.
pub struct Pipeline {
    source: CameraSource,
    engine: Arc<EffectEngine>,
    presenter: SharedPresenter,
    storage: SharedStorage,
    capture_config: CaptureConfig,
    config: PipelineConfig,
    session: Mutex<Option<Session>>,
    status: Arc<Mutex<PipelineStatus>>,
    last_stats: Mutex<PipelineStats>,
}

impl Pipeline {
    /// Pipeline that presents nowhere and saves captures per `config.storage`
    pub fn new(source: CameraSource, engine: EffectEngine, config: &Config) -> Self {
        let discard = |_: &FrameBuffer| {};
        Self {
            source,
            engine: Arc::new(engine),
            presenter: Arc::new(Mutex::new(Box::new(discard))),
            storage: Arc::new(Mutex::new(Box::new(FileCaptureSink::new(
                config.storage.directory.clone(),
                config.storage.format,
            )))),
            capture_config: config.capture.clone(),
            config: config.pipeline.clone(),
            session: Mutex::new(None),
            status: Arc::new(Mutex::new(PipelineStatus::Idle)),
            last_stats: Mutex::new(PipelineStats::default()),
        }
    }

    pub fn with_presentation_sink<S: PresentationSink + 'static>(self, sink: S) -> Self {
        *lock_unpoisoned(&self.presenter) = Box::new(sink);
        self
    }

    pub fn with_capture_sink<S: CaptureSink + 'static>(self, sink: S) -> Self {
        *lock_unpoisoned(&self.storage) = Box::new(sink);
        self
    }

    pub fn status(&self) -> PipelineStatus {
        lock_unpoisoned(&self.status).clone()
    }

    /// Counters of the running session, or of the last one after `stop`
    pub fn stats(&self) -> PipelineStats {
        match lock_unpoisoned(&self.session).as_ref() {
            Some(session) => session.stats(),
            None => *lock_unpoisoned(&self.last_stats),
        }
    }

    /// Open the camera and begin processing with `descriptor`
    ///
    /// Allowed from `Idle` and `Faulted`. Camera and effect configuration
    /// errors are returned here and leave the pipeline `Idle`.
    #[instrument(skip(self), fields(camera = %self.source.name(), effect = %descriptor))]
    pub fn start(&self, descriptor: EffectDescriptor) -> PipelineResult<()> {
        let mut slot = lock_unpoisoned(&self.session);
        if let Some(session) = slot.take() {
            if !session.shared.is_faulted() {
                *slot = Some(session);
                return Err(PipelineError::AlreadyRunning);
            }
            info!("Restarting faulted pipeline");
            self.shutdown(session);
        }

        let stream = Arc::new(self.source.open(&self.capture_config)?);
        let format = stream.format().clone();
        let geometry = FrameGeometry::new(format.width, format.height);
        let effect = self.build_effect(&descriptor, geometry)?;

        let capacity = self.config.max_in_flight.max(1);
        let shared = Arc::new(SessionShared {
            state: Arc::new(PipelineState::new(effect, capacity)),
            stream,
            geometry,
            stop: AtomicBool::new(false),
            faulted: AtomicBool::new(false),
            status: Arc::clone(&self.status),
        });

        // Threads may fault the session as soon as they exist
        *lock_unpoisoned(&self.status) = PipelineStatus::Running;
        let session = match self.spawn_session(Arc::clone(&shared)) {
            Ok(session) => session,
            Err(e) => {
                shared.stop.store(true, Ordering::Release);
                shared.stream.close();
                *lock_unpoisoned(&self.status) = PipelineStatus::Idle;
                return Err(e);
            }
        };
        info!(
            "Pipeline running: {}x{}@{}, {} in flight, {} transform worker(s)",
            format.width,
            format.height,
            format.fps,
            capacity,
            session.workers
        );
        *slot = Some(session);
        Ok(())
    }

    /// Switch effects; frames already in flight finish with the old one
    #[instrument(skip(self), fields(effect = %descriptor))]
    pub fn update_effect(&self, descriptor: EffectDescriptor) -> PipelineResult<()> {
        let slot = lock_unpoisoned(&self.session);
        let session = Self::running(&slot)?;
        let effect = self.build_effect(&descriptor, session.shared.geometry)?;
        session.shared.state.swap_effect(effect);
        info!("Effect updated");
        Ok(())
    }

    /// Persist the first processed frame acquired after this call
    ///
    /// The ticket resolves with the file path or the Capture Sink's error.
    pub fn request_capture(&self) -> PipelineResult<CaptureTicket> {
        let slot = lock_unpoisoned(&self.session);
        let session = Self::running(&slot)?;
        let ticket = session.shared.state.request_capture();
        debug!(issued_at = ticket.issued_at(), "Capture requested");
        Ok(ticket)
    }

    /// Stop acquiring, drain or cancel in-flight work and close the camera
    ///
    /// Blocks until every buffer is released, or until `stop_timeout` after
    /// which release is forced. Stopping an idle pipeline is a no-op.
    #[instrument(skip(self))]
    pub fn stop(&self) -> PipelineResult<()> {
        let mut slot = lock_unpoisoned(&self.session);
        match slot.take() {
            Some(session) => {
                self.shutdown(session);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn running(slot: &Option<Session>) -> PipelineResult<&Session> {
        let session = slot.as_ref().ok_or(PipelineError::NotRunning)?;
        if session.shared.is_faulted() {
            return Err(PipelineError::Faulted(session.shared.fault_reason()));
        }
        Ok(session)
    }

    fn build_effect(
        &self,
        descriptor: &EffectDescriptor,
        geometry: FrameGeometry,
    ) -> PipelineResult<Arc<ActiveEffect>> {
        let plan = self.engine.configure(descriptor, geometry)?;
        debug!(
            estimated = ?plan.estimated_cost(),
            budget = ?self.engine.frame_budget(),
            "Effect plan ready"
        );
        let pool = BufferPool::new(
            "effect",
            self.config.max_in_flight.max(1),
            plan.output().frame_len(),
        );
        Ok(Arc::new(ActiveEffect { plan, pool }))
    }

    fn spawn_session(&self, shared: Arc<SessionShared>) -> PipelineResult<Session> {
        let capacity = shared.state.current_effect().pool.capacity();
        let (jobs_tx, jobs_rx) = flume::bounded::<Job>(capacity);
        let (present_tx, present_rx) = flume::bounded::<Presented>(1);
        let (done_tx, done_rx) = flume::bounded::<()>(0);
        let workers = self.config.transform_workers.max(1);
        let present_timeout = self.config.present_timeout();

        let mut threads = Vec::with_capacity(workers + 2);
        let spawn = |name: String, body: Box<dyn FnOnce() + Send>| {
            thread::Builder::new()
                .name(name)
                .spawn(body)
                .map_err(|e| PipelineError::Config(format!("failed to spawn pipeline thread: {e}")))
        };

        {
            let shared = Arc::clone(&shared);
            let presenter = Arc::clone(&self.presenter);
            let storage = Arc::clone(&self.storage);
            let done = done_tx.clone();
            threads.push(spawn(
                "funnycam-present".into(),
                Box::new(move || {
                    present_loop(&shared, present_rx, &presenter, &storage);
                    drop(done);
                }),
            )?);
        }

        let cores = if self.config.pin_workers {
            core_affinity::get_core_ids().unwrap_or_default()
        } else {
            Vec::new()
        };
        for index in 0..workers {
            let shared = Arc::clone(&shared);
            let jobs = jobs_rx.clone();
            let present = present_tx.clone();
            let done = done_tx.clone();
            let core = (!cores.is_empty()).then(|| cores[index % cores.len()]);
            threads.push(spawn(
                format!("funnycam-transform-{index}"),
                Box::new(move || {
                    if let Some(core) = core {
                        if !core_affinity::set_for_current(core) {
                            warn!(core = core.id, "Could not pin transform worker");
                        }
                    }
                    transform_loop(&shared, jobs, present, present_timeout);
                    drop(done);
                }),
            )?);
        }
        drop(jobs_rx);
        drop(present_tx);

        {
            let shared = Arc::clone(&shared);
            let done = done_tx;
            threads.push(spawn(
                "funnycam-acquire".into(),
                Box::new(move || {
                    acquire_loop(&shared, jobs_tx);
                    drop(done);
                }),
            )?);
        }

        Ok(Session {
            shared,
            threads,
            done: done_rx,
            workers,
        })
    }

    /// Tear down one session; the pipeline ends up `Idle`
    fn shutdown(&self, session: Session) {
        *lock_unpoisoned(&self.status) = PipelineStatus::Stopping;
        let started = Instant::now();
        let shared = &session.shared;
        shared.stop.store(true, Ordering::Release);

        let deadline = started + self.config.stop_timeout();
        let drained = loop {
            match session.done.recv_deadline(deadline) {
                Ok(()) => continue,
                Err(RecvTimeoutError::Disconnected) => break true,
                Err(RecvTimeoutError::Timeout) => break false,
            }
        };

        if drained {
            for handle in session.threads {
                if handle.join().is_err() {
                    error!("A pipeline thread panicked");
                }
            }
        } else {
            warn!(
                in_flight = shared.state.in_flight(),
                "Pipeline threads did not finish within {:?}; forcing buffer release",
                self.config.stop_timeout()
            );
        }

        shared.state.cancel_capture();
        shared.stream.close();
        let camera = shared.stream.stats();

        let mut stats = shared.state.snapshot();
        stats.camera = Some(camera);
        *lock_unpoisoned(&self.last_stats) = stats;
        *lock_unpoisoned(&self.status) = PipelineStatus::Idle;
        info!(
            presented = stats.presented,
            dropped = stats.dropped(),
            "Pipeline stopped in {:?}",
            started.elapsed()
        );
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Some(session) = lock_unpoisoned(&self.session).take() {
            self.shutdown(session);
        }
    }
}

struct Session {
    shared: Arc<SessionShared>,
    threads: Vec<JoinHandle<()>>,
    /// Disconnects once every session thread has exited
    done: Receiver<()>,
    workers: usize,
}

impl Session {
    fn stats(&self) -> PipelineStats {
        let mut stats = self.shared.state.snapshot();
        stats.camera = Some(self.shared.stream.stats());
        stats
    }
}

struct SessionShared {
    state: Arc<PipelineState>,
    stream: Arc<CameraStream>,
    geometry: FrameGeometry,
    /// Set by `stop` or by a fault; every loop winds down when it sees it
    stop: AtomicBool,
    faulted: AtomicBool,
    status: Arc<Mutex<PipelineStatus>>,
}

impl SessionShared {
    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }

    fn fault_reason(&self) -> String {
        match &*lock_unpoisoned(&self.status) {
            PipelineStatus::Faulted(reason) => reason.clone(),
            _ => "session faulted".into(),
        }
    }

    /// Terminate the session; ignored once it is already stopping
    fn fault(&self, reason: String) {
        if self.stop.swap(true, Ordering::AcqRel) {
            return;
        }
        error!("Pipeline faulted: {}", reason);
        {
            // Flag and status change together
            let mut status = lock_unpoisoned(&self.status);
            self.faulted.store(true, Ordering::Release);
            *status = PipelineStatus::Faulted(reason);
        }
        self.state.cancel_capture();
    }

    /// Hand an input frame back to the camera, faulting on misuse
    fn release(&self, frame: FrameBuffer) {
        if let Err(e) = self.stream.release(frame) {
            self.fault(e.to_string());
        }
    }
}

/// Camera frame on its way to a transform worker
///
/// Field order matters: buffers are returned before the slot is freed.
struct Job {
    frame: FrameBuffer,
    effect: Arc<ActiveEffect>,
    slot: InFlightSlot,
}

/// Processed frame on its way to the presenter
struct Presented {
    frame: FrameBuffer,
    _slot: InFlightSlot,
}

fn acquire_loop(shared: &SessionShared, jobs: Sender<Job>) {
    let state = &shared.state;
    while !shared.stopping() {
        let frame = match shared.stream.next_frame_timeout(ACQUIRE_POLL) {
            Ok(FramePoll::Frame(frame)) => frame,
            Ok(FramePoll::Timeout) => continue,
            Ok(FramePoll::Closed) => {
                info!("Camera stream ended");
                state.note_stream_ended();
                break;
            }
            Err(e) => {
                shared.fault(e.to_string());
                break;
            }
        };

        state.record_acquired(frame.sequence());
        let Some(slot) = state.try_reserve() else {
            debug!(sequence = frame.sequence(), "In-flight limit reached, dropping frame");
            state.note_dropped(DropReason::Backpressure);
            shared.release(frame);
            continue;
        };

        let job = Job {
            frame,
            effect: state.current_effect(),
            slot,
        };
        match jobs.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) | Err(TrySendError::Disconnected(job)) => {
                state.note_dropped(DropReason::Backpressure);
                let Job { frame, effect, slot } = job;
                shared.release(frame);
                drop(effect);
                drop(slot);
            }
        }
    }
}

fn transform_loop(
    shared: &SessionShared,
    jobs: Receiver<Job>,
    present: Sender<Presented>,
    present_timeout: Duration,
) {
    let state = &shared.state;
    for Job { frame, effect, slot } in jobs.iter() {
        if shared.stopping() {
            state.note_dropped(DropReason::Cancelled);
            shared.release(frame);
            drop(slot);
            continue;
        }

        let Some(storage) = effect.pool.try_acquire() else {
            warn!(sequence = frame.sequence(), "Effect output pool exhausted");
            state.note_dropped(DropReason::Backpressure);
            shared.release(frame);
            drop(slot);
            continue;
        };

        let output = match effect.plan.apply(&frame, storage) {
            Ok(output) => output,
            Err(e) => {
                shared.release(frame);
                drop(slot);
                shared.fault(format!("transform failed: {e}"));
                continue;
            }
        };
        shared.release(frame);

        let sequence = output.sequence();
        match present.send_timeout(Presented { frame: output, _slot: slot }, present_timeout) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) | Err(SendTimeoutError::Disconnected(_)) => {
                debug!(sequence, "Presentation stage busy, dropping frame");
                state.note_dropped(DropReason::Sink);
            }
        }
    }
}

fn present_loop(
    shared: &SessionShared,
    frames: Receiver<Presented>,
    presenter: &SharedPresenter,
    storage: &SharedStorage,
) {
    let state = &shared.state;
    let mut last_presented = 0u64;
    for presented in frames.iter() {
        let frame = &presented.frame;
        let sequence = frame.sequence();
        if shared.stopping() {
            state.note_dropped(DropReason::Cancelled);
            continue;
        }
        if sequence <= last_presented {
            debug!(sequence, last_presented, "Discarding stale frame");
            state.note_dropped(DropReason::Stale);
            continue;
        }

        {
            let mut sink = lock_unpoisoned(presenter);
            if shared.stopping() {
                state.note_dropped(DropReason::Cancelled);
                continue;
            }
            sink.present(frame);
        }
        last_presented = sequence;
        state.note_presented();

        if let Some(pending) = state.take_capture_for(sequence) {
            let result = lock_unpoisoned(storage).persist(frame);
            match &result {
                Ok(path) => {
                    state.note_persisted();
                    debug!(sequence, "Capture persisted to {}", path.display());
                }
                Err(e) => warn!(sequence, "Capture failed: {}", e),
            }
            pending.complete(result);
        }
    }
}
