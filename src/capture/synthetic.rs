//! Deterministic test-pattern camera
//!
//! Behaves like a callback-driven sensor: a private thread produces frames at
//! the negotiated rate whether or not anyone is reading them.

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::decoder;
use super::frame::PixelFormat;
use super::source::{CameraBackend, FrameFeed, StreamFormat, StreamRequest, Submitted};
use crate::error::{CaptureError, CaptureResult};

/// How fast the synthetic sensor emits frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// One frame per negotiated frame interval
    RealTime,
    /// Fixed interval regardless of fps
    Interval(Duration),
    /// As fast as the producer thread can go
    Unpaced,
}

/// Camera backend that renders a gradient test pattern
pub struct SyntheticCamera {
    modes: Vec<(u32, u32)>,
    max_fps: u32,
    pacing: Pacing,
    frame_limit: Option<u64>,
    fault_after: Option<u64>,
    unavailable: Option<String>,
    format: Option<StreamFormat>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Default for SyntheticCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticCamera {
    pub fn new() -> Self {
        Self {
            modes: vec![(320, 240), (640, 480), (800, 600), (1280, 720), (1920, 1080)],
            max_fps: 60,
            pacing: Pacing::RealTime,
            frame_limit: None,
            fault_after: None,
            unavailable: None,
            format: None,
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Resolutions `open` accepts
    pub fn modes(&self) -> &[(u32, u32)] {
        &self.modes
    }

    /// Replace the offered resolutions
    pub fn with_modes(mut self, modes: &[(u32, u32)]) -> Self {
        self.modes = modes.to_vec();
        self
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// End the stream after `frames` sensor frames
    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    /// Report a device fault after `frames` sensor frames
    pub fn with_fault_after(mut self, frames: u64) -> Self {
        self.fault_after = Some(frames);
        self
    }

    /// Refuse to open, as if permission was denied
    pub fn unavailable(mut self, reason: impl Into<String>) -> Self {
        self.unavailable = Some(reason.into());
        self
    }
}

impl CameraBackend for SyntheticCamera {
    fn describe(&self) -> String {
        "synthetic test pattern".into()
    }

    fn negotiate(&mut self, request: &StreamRequest) -> CaptureResult<StreamFormat> {
        if let Some(reason) = &self.unavailable {
            return Err(CaptureError::DeviceUnavailable(reason.clone()));
        }
        if !self.modes.contains(&(request.width, request.height)) {
            return Err(CaptureError::ConfigUnsupported(format!(
                "{}x{} not offered",
                request.width, request.height
            )));
        }
        if request.fps > self.max_fps {
            return Err(CaptureError::ConfigUnsupported(format!(
                "{} fps above maximum {}",
                request.fps, self.max_fps
            )));
        }
        if request.format == PixelFormat::Mjpeg || (request.format == PixelFormat::Yuyv4 && request.width % 2 != 0) {
            return Err(CaptureError::ConfigUnsupported(format!(
                "{:?} output not offered",
                request.format
            )));
        }

        let format = StreamFormat {
            width: request.width,
            height: request.height,
            fps: request.fps,
            source_format: request.format,
            rotation: request.rotation,
        };
        self.format = Some(format.clone());
        Ok(format)
    }

    fn start(&mut self, feed: FrameFeed) -> CaptureResult<()> {
        let format = self
            .format
            .clone()
            .ok_or_else(|| CaptureError::ConfigUnsupported("start before negotiate".into()))?;

        self.stop.store(false, Ordering::Release);
        let producer = Producer {
            pattern: Pattern::new(&format),
            interval: match self.pacing {
                Pacing::RealTime => Some(format.frame_interval()),
                Pacing::Interval(interval) => Some(interval),
                Pacing::Unpaced => None,
            },
            frame_limit: self.frame_limit,
            fault_after: self.fault_after,
            stop: Arc::clone(&self.stop),
        };

        let worker = thread::Builder::new()
            .name("funnycam-synthetic".into())
            .spawn(move || producer.run(feed))?;
        self.worker = Some(worker);
        info!(
            "Synthetic camera streaming {}x{}@{}",
            format.width, format.height, format.fps
        );
        Ok(())
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

struct Producer {
    pattern: Pattern,
    interval: Option<Duration>,
    frame_limit: Option<u64>,
    fault_after: Option<u64>,
    stop: Arc<AtomicBool>,
}

impl Producer {
    fn run(self, feed: FrameFeed) {
        let started = Instant::now();
        let mut deadline = started;
        let mut produced = 0u64;

        while !self.stop.load(Ordering::Acquire) && !feed.is_closed() {
            if self.frame_limit.is_some_and(|limit| produced >= limit) {
                debug!(produced, "Synthetic stream reached its frame limit");
                feed.finish();
                break;
            }
            if self.fault_after.is_some_and(|n| produced >= n) {
                feed.fault("synthetic sensor stopped responding");
                break;
            }

            if let Some(interval) = self.interval {
                let now = Instant::now();
                if deadline > now {
                    thread::sleep(deadline - now);
                }
                deadline = deadline.max(now) + interval;
            }

            let outcome = feed.submit::<Infallible, _>(Some(started.elapsed()), |sequence, out| {
                self.pattern.render(sequence, out);
                Ok(())
            });
            produced += 1;
            if matches!(outcome, Ok(Submitted::Closed)) {
                break;
            }
        }
    }
}

/// Base image in the device format, plus a moving bar and sequence stamp
struct Pattern {
    width: u32,
    height: u32,
    source_format: PixelFormat,
    base: Vec<u8>,
}

impl Pattern {
    fn new(format: &StreamFormat) -> Self {
        let (w, h) = (format.width as usize, format.height as usize);
        let mut rgba = vec![0u8; w * h * 4];
        for y in 0..h {
            for x in 0..w {
                let px = &mut rgba[(y * w + x) * 4..][..4];
                let checker = ((x / 32) + (y / 32)) % 2 == 0;
                px[0] = (x * 255 / w.max(1)) as u8;
                px[1] = (y * 255 / h.max(1)) as u8;
                px[2] = if checker { 200 } else { 60 };
                px[3] = 255;
            }
        }

        let base = match format.source_format {
            PixelFormat::Rgb24 => rgba
                .chunks_exact(4)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect(),
            PixelFormat::Yuyv4 => {
                let mut yuyv = Vec::with_capacity(w * h * 2);
                decoder::rgba_to_yuyv(&rgba, &mut yuyv);
                yuyv
            }
            _ => rgba,
        };

        Self {
            width: format.width,
            height: format.height,
            source_format: format.source_format,
            base,
        }
    }

    fn render(&self, sequence: u64, out: &mut [u8]) {
        // The base pattern always matches the negotiated format
        if decoder::decode_into(&self.base, self.source_format, self.width, self.height, out)
            .is_err()
        {
            out.fill(0);
        }

        let (w, h) = (self.width as usize, self.height as usize);
        let bar_x = (sequence as usize * 4) % w;
        let bar_w = 8.min(w - bar_x);
        for y in 0..h {
            let row = &mut out[(y * w + bar_x) * 4..][..bar_w * 4];
            for px in row.chunks_exact_mut(4) {
                px.copy_from_slice(&[255, 255, 255, 255]);
            }
        }

        stamp_sequence(out, sequence);
    }
}

/// Write `sequence` into the first two pixels
pub fn stamp_sequence(rgba: &mut [u8], sequence: u64) {
    if rgba.len() >= 8 {
        rgba[..8].copy_from_slice(&sequence.to_le_bytes());
    }
}

/// Read back a stamp written by [`stamp_sequence`]
pub fn read_stamp(rgba: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = rgba.get(..8)?.try_into().ok()?;
    Some(u64::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::Rotation;

    fn request(width: u32, height: u32, format: PixelFormat) -> StreamRequest {
        StreamRequest {
            width,
            height,
            fps: 30,
            format,
            rotation: Rotation::Deg0,
        }
    }

    #[test]
    fn negotiates_offered_modes_only() {
        let mut camera = SyntheticCamera::new().with_modes(&[(64, 48)]);
        assert!(camera.negotiate(&request(64, 48, PixelFormat::Rgba8)).is_ok());
        assert!(matches!(
            camera.negotiate(&request(128, 96, PixelFormat::Rgba8)),
            Err(CaptureError::ConfigUnsupported(_))
        ));
        assert!(matches!(
            camera.negotiate(&request(64, 48, PixelFormat::Mjpeg)),
            Err(CaptureError::ConfigUnsupported(_))
        ));
    }

    #[test]
    fn unavailable_camera_refuses() {
        let mut camera = SyntheticCamera::new().unavailable("permission denied");
        assert!(matches!(
            camera.negotiate(&request(640, 480, PixelFormat::Rgba8)),
            Err(CaptureError::DeviceUnavailable(_))
        ));
    }

    #[test]
    fn pattern_is_deterministic_and_stamped() {
        let format = StreamFormat {
            width: 16,
            height: 8,
            fps: 30,
            source_format: PixelFormat::Yuyv4,
            rotation: Rotation::Deg0,
        };
        let pattern = Pattern::new(&format);
        let mut a = vec![0u8; 16 * 8 * 4];
        let mut b = vec![0u8; 16 * 8 * 4];
        pattern.render(3, &mut a);
        pattern.render(3, &mut b);
        assert_eq!(a, b);
        assert_eq!(read_stamp(&a), Some(3));
    }
}
