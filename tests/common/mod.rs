// Shared helpers for the pipeline integration tests
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use funnycam::capture::synthetic::read_stamp;
use funnycam::capture::{FrameBuffer, PixelFormat};
use funnycam::error::StorageError;
use funnycam::sink::{CaptureSink, PresentationSink};
use funnycam::{Config, Pipeline, PipelineStats};

/// Config for a synthetic camera at `width`x`height`@`fps`
pub fn config(width: u32, height: u32, fps: u32) -> Config {
    let mut config = Config::default();
    config.capture.width = width;
    config.capture.height = height;
    config.capture.fps = fps;
    config.capture.format = PixelFormat::Rgb24;
    config.storage.directory = std::env::temp_dir().join("funnycam-tests");
    config
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub fn wait_for_stats(
    pipeline: &Pipeline,
    timeout: Duration,
    mut condition: impl FnMut(&PipelineStats) -> bool,
) -> PipelineStats {
    wait_until(timeout, || condition(&pipeline.stats()));
    pipeline.stats()
}

/// What a recording sink saw for one frame
#[derive(Debug, Clone)]
pub struct Seen {
    pub sequence: u64,
    pub effect: Option<String>,
    pub stamp: Option<u64>,
    pub checksum: u64,
    /// Checksum unchanged after holding the frame for `hold`
    pub stable: bool,
}

fn checksum(data: &[u8]) -> u64 {
    data.iter()
        .enumerate()
        .fold(0u64, |acc, (i, &b)| acc.wrapping_mul(31).wrapping_add(b as u64 ^ i as u64))
}

fn observe(frame: &FrameBuffer, hold: Duration) -> Seen {
    let before = checksum(frame.data());
    if !hold.is_zero() {
        thread::sleep(hold);
    }
    Seen {
        sequence: frame.sequence(),
        effect: frame.meta().effect.as_ref().map(|e| e.effect.clone()),
        stamp: read_stamp(frame.data()),
        checksum: before,
        stable: checksum(frame.data()) == before,
    }
}

/// Presentation sink that records every frame, optionally slowly
#[derive(Clone, Default)]
pub struct RecordingSink {
    seen: Arc<Mutex<Vec<Seen>>>,
    hold: Duration,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spend `hold` inside every `present` call
    pub fn slow(hold: Duration) -> Self {
        Self {
            hold,
            ..Self::default()
        }
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    pub fn sequences(&self) -> Vec<u64> {
        self.seen().iter().map(|s| s.sequence).collect()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn clear(&self) {
        self.seen.lock().unwrap().clear();
    }
}

impl PresentationSink for RecordingSink {
    fn present(&mut self, frame: &FrameBuffer) {
        let seen = observe(frame, self.hold);
        self.seen.lock().unwrap().push(seen);
    }
}

/// Capture sink that records frames instead of writing files
#[derive(Clone, Default)]
pub struct RecordingCapture {
    seen: Arc<Mutex<Vec<Seen>>>,
    fail_with: Option<StorageError>,
}

impl RecordingCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(error: StorageError) -> Self {
        Self {
            fail_with: Some(error),
            ..Self::default()
        }
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

impl CaptureSink for RecordingCapture {
    fn persist(&mut self, frame: &FrameBuffer) -> Result<PathBuf, StorageError> {
        let seen = observe(frame, Duration::ZERO);
        let sequence = seen.sequence;
        self.seen.lock().unwrap().push(seen);
        match &self.fail_with {
            Some(error) => Err(error.clone()),
            None => Ok(PathBuf::from(format!("capture-{sequence}.png"))),
        }
    }
}
