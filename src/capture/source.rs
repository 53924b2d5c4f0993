//! Camera Source: session-guarded access to a capture backend
//!
//! Backends push frames from their own thread through a [`FrameFeed`]; the
//! pipeline pulls them with [`CameraStream::next_frame`]. The feed never
//! blocks the producer: when every buffer is taken, the oldest unconsumed
//! frame is recycled.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use super::frame::{FrameBuffer, FrameMetadata, PixelFormat, Rotation};
use super::pool::{BufferPool, PoolUsage};
use super::ringbuf::FrameRingBuffer;
use crate::error::{CaptureError, CaptureResult};
use crate::utils::lock_unpoisoned;
use crate::CaptureConfig;

/// What the pipeline asks of a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    pub rotation: Rotation,
}

impl From<&CaptureConfig> for StreamRequest {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            fps: config.fps,
            format: config.format,
            rotation: config.rotation,
        }
    }
}

/// Format a backend agreed to deliver; frames reach the pipeline as RGBA
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Format of the device data before decoding
    pub source_format: PixelFormat,
    pub rotation: Rotation,
}

impl StreamFormat {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }

    pub fn stride(&self) -> u32 {
        self.width * 4
    }

    pub fn frame_len(&self) -> usize {
        self.stride() as usize * self.height as usize
    }
}

/// Hardware/driver boundary
///
/// Implementations deliver frames from their own capture thread (or driver
/// callback) through the [`FrameFeed`] they receive in `start`.
pub trait CameraBackend: Send {
    fn describe(&self) -> String;

    /// Configure the device; fails with `DeviceUnavailable` or `ConfigUnsupported`
    fn negotiate(&mut self, request: &StreamRequest) -> CaptureResult<StreamFormat>;

    /// Begin delivering frames into `feed`
    fn start(&mut self, feed: FrameFeed) -> CaptureResult<()>;

    /// Stop capture; returns once no further `submit` call can happen
    fn stop(&mut self);
}

type BackendSlot = Arc<Mutex<Option<Box<dyn CameraBackend>>>>;

/// Owner of the camera hardware; hands it to at most one session at a time
pub struct CameraSource {
    slot: BackendSlot,
    name: String,
}

impl CameraSource {
    pub fn new<B: CameraBackend + 'static>(backend: B) -> Self {
        let name = backend.describe();
        Self {
            slot: Arc::new(Mutex::new(Some(Box::new(backend)))),
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True while a stream holds the device
    pub fn in_use(&self) -> bool {
        lock_unpoisoned(&self.slot).is_none()
    }

    /// Begin capture; the returned stream is the session token for the device
    #[instrument(skip(self, config), fields(camera = %self.name))]
    pub fn open(&self, config: &CaptureConfig) -> CaptureResult<CameraStream> {
        let mut backend = lock_unpoisoned(&self.slot).take().ok_or_else(|| {
            CaptureError::DeviceUnavailable(format!("{} is held by another session", self.name))
        })?;

        match Self::start_backend(backend.as_mut(), config) {
            Ok(shared) => {
                info!(
                    "Capture stream open: {}x{}@{} ({:?}), {} buffers",
                    shared.format.width,
                    shared.format.height,
                    shared.format.fps,
                    shared.format.source_format,
                    shared.pool.capacity()
                );
                Ok(CameraStream {
                    shared,
                    backend: Mutex::new(Some(backend)),
                    home: Arc::clone(&self.slot),
                })
            }
            Err(e) => {
                *lock_unpoisoned(&self.slot) = Some(backend);
                Err(e)
            }
        }
    }

    fn start_backend(
        backend: &mut dyn CameraBackend,
        config: &CaptureConfig,
    ) -> CaptureResult<Arc<StreamShared>> {
        if config.buffer_count < 2 {
            return Err(CaptureError::ConfigUnsupported(format!(
                "buffer_count {} is below the minimum of 2",
                config.buffer_count
            )));
        }
        if config.width == 0 || config.height == 0 || config.fps == 0 {
            return Err(CaptureError::ConfigUnsupported(format!(
                "{}x{}@{} is not a valid mode",
                config.width, config.height, config.fps
            )));
        }

        let request = StreamRequest::from(config);
        let format = backend.negotiate(&request)?;
        if format.width != request.width || format.height != request.height {
            return Err(CaptureError::ConfigUnsupported(format!(
                "requested {}x{}, device negotiated {}x{}",
                request.width, request.height, format.width, format.height
            )));
        }

        let capacity = config.buffer_count as usize;
        let shared = Arc::new(StreamShared {
            pool: BufferPool::new("camera", capacity, format.frame_len()),
            format,
            queue: Mutex::new(QueueState {
                ring: FrameRingBuffer::new(capacity),
                ended: false,
                fault: None,
            }),
            ready: Condvar::new(),
            next_sequence: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        backend.start(FrameFeed {
            shared: Arc::clone(&shared),
        })?;
        Ok(shared)
    }
}

struct StreamShared {
    format: StreamFormat,
    pool: BufferPool,
    queue: Mutex<QueueState>,
    ready: Condvar,
    next_sequence: AtomicU64,
    closed: AtomicBool,
}

struct QueueState {
    ring: FrameRingBuffer,
    ended: bool,
    fault: Option<String>,
}

impl StreamShared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        lock_unpoisoned(&self.queue)
    }
}

/// Result of handing one sensor frame to the feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    Queued(u64),
    /// No storage was free and nothing was queued to recycle
    Dropped,
    Closed,
}

/// Producer handle given to a backend's capture thread
#[derive(Clone)]
pub struct FrameFeed {
    shared: Arc<StreamShared>,
}

impl FrameFeed {
    pub fn format(&self) -> &StreamFormat {
        &self.shared.format
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Deliver one sensor frame
    ///
    /// `fill` receives the frame's sequence number and its RGBA storage. If
    /// it fails, the storage goes back to the pool and the error is returned.
    pub fn submit<E, F>(&self, device_timestamp: Option<Duration>, fill: F) -> Result<Submitted, E>
    where
        F: FnOnce(u64, &mut [u8]) -> Result<(), E>,
    {
        let shared = &self.shared;
        if self.is_closed() {
            return Ok(Submitted::Closed);
        }
        let timestamp = Instant::now();

        let mut storage = match shared.pool.try_acquire() {
            Some(buffer) => buffer,
            None => {
                let mut queue = shared.lock();
                match queue.ring.evict_oldest() {
                    Some(oldest) => {
                        drop(queue);
                        debug!(sequence = oldest.sequence(), "Recycling oldest unconsumed frame");
                        metrics::counter!("funnycam_frames_dropped_total", "reason" => "camera")
                            .increment(1);
                        oldest.into_storage()
                    }
                    None => {
                        queue.ring.note_dropped();
                        metrics::counter!("funnycam_frames_dropped_total", "reason" => "camera")
                            .increment(1);
                        return Ok(Submitted::Dropped);
                    }
                }
            }
        };

        let sequence = shared.next_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        fill(sequence, storage.as_mut_slice())?;

        let format = &shared.format;
        let meta = FrameMetadata {
            sequence,
            width: format.width,
            height: format.height,
            stride: format.stride(),
            format: PixelFormat::Rgba8,
            rotation: format.rotation,
            timestamp,
            device_timestamp,
            effect: None,
        };
        let frame = FrameBuffer::new(meta, storage);

        let mut queue = shared.lock();
        if self.is_closed() {
            return Ok(Submitted::Closed);
        }
        let evicted = queue.ring.push(frame);
        shared.ready.notify_one();
        drop(queue);
        drop(evicted);

        Ok(Submitted::Queued(sequence))
    }

    /// Mark the end of the stream; queued frames remain readable
    pub fn finish(&self) {
        let mut queue = self.shared.lock();
        queue.ended = true;
        self.shared.ready.notify_all();
    }

    /// Report an unrecoverable device error
    pub fn fault(&self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("Camera fault: {}", reason);
        let mut queue = self.shared.lock();
        queue.fault.get_or_insert(reason);
        self.shared.ready.notify_all();
    }
}

/// Outcome of a bounded wait for the next frame
#[derive(Debug)]
pub enum FramePoll {
    Frame(FrameBuffer),
    Timeout,
    /// Stream closed or ended and drained
    Closed,
}

/// Counters of one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamStats {
    pub produced: usize,
    pub delivered: usize,
    pub dropped: usize,
    pub pool: PoolUsage,
}

/// Open capture session; dropping it closes the stream
pub struct CameraStream {
    shared: Arc<StreamShared>,
    backend: Mutex<Option<Box<dyn CameraBackend>>>,
    home: BackendSlot,
}

impl CameraStream {
    pub fn format(&self) -> &StreamFormat {
        &self.shared.format
    }

    /// Block until a frame is available; `None` once the stream is closed
    pub fn next_frame(&self) -> CaptureResult<Option<FrameBuffer>> {
        match self.poll(None)? {
            FramePoll::Frame(frame) => Ok(Some(frame)),
            FramePoll::Timeout | FramePoll::Closed => Ok(None),
        }
    }

    /// Like `next_frame`, giving up after `timeout`
    pub fn next_frame_timeout(&self, timeout: Duration) -> CaptureResult<FramePoll> {
        self.poll(Some(Instant::now() + timeout))
    }

    fn poll(&self, deadline: Option<Instant>) -> CaptureResult<FramePoll> {
        let shared = &self.shared;
        let mut queue = shared.lock();
        loop {
            if self.is_closed() {
                return Ok(FramePoll::Closed);
            }
            if let Some(frame) = queue.ring.pop() {
                return Ok(FramePoll::Frame(frame));
            }
            if let Some(reason) = &queue.fault {
                return Err(CaptureError::DeviceLost(reason.clone()));
            }
            if queue.ended {
                return Ok(FramePoll::Closed);
            }

            queue = match deadline {
                None => shared.ready.wait(queue).unwrap_or_else(|e| e.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(FramePoll::Timeout);
                    }
                    shared
                        .ready
                        .wait_timeout(queue, deadline - now)
                        .unwrap_or_else(|e| e.into_inner())
                        .0
                }
            };
        }
    }

    /// Return a frame's storage to the capture subsystem
    ///
    /// Frames from another stream or from before `close` are `BufferMisuse`.
    pub fn release(&self, frame: FrameBuffer) -> CaptureResult<()> {
        let verdict = self.shared.pool.verify(frame.storage());
        drop(frame);
        verdict
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Stop capture and invalidate unreleased buffers; blocks until quiesced
    #[instrument(skip(self))]
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let backend = lock_unpoisoned(&self.backend).take();
        let name = backend.as_ref().map(|b| b.describe()).unwrap_or_default();
        let backend = backend.map(|mut b| {
            b.stop();
            b
        });

        let mut queue = self.shared.lock();
        let discarded = queue.ring.clear();
        self.shared.ready.notify_all();
        drop(queue);

        let usage = self.shared.pool.usage();
        if usage.in_use > 0 {
            debug!(outstanding = usage.in_use, "Invalidating unreleased camera buffers");
        }
        self.shared.pool.close();

        if let Some(backend) = backend {
            *lock_unpoisoned(&self.home) = Some(backend);
        }
        info!(discarded, "Capture stream closed: {}", name);
    }

    pub fn stats(&self) -> StreamStats {
        let ring = self.shared.lock().ring.stats();
        StreamStats {
            produced: ring.written,
            delivered: ring.read,
            dropped: ring.dropped,
            pool: self.shared.pool.usage(),
        }
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.close();
    }
}
