//! Presentation sinks that hand frames to a UI thread or just count them

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use flume::{Receiver, Sender, TrySendError};
use tracing::{debug, info};

use super::PresentationSink;
use crate::capture::FrameBuffer;
use crate::effect::EffectDescriptor;

/// Owned copy of a processed frame for rendering on another thread
#[derive(Clone)]
pub struct PreviewFrame {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub pixels: Bytes,
    pub effect: Option<Arc<EffectDescriptor>>,
    pub captured_at: Instant,
}

/// Copies each frame into a bounded channel; drops it if the UI is behind
pub struct PreviewSink {
    tx: Sender<PreviewFrame>,
    dropped: u64,
}

impl PreviewSink {
    pub fn channel(depth: usize) -> (Self, Receiver<PreviewFrame>) {
        let (tx, rx) = flume::bounded(depth.max(1));
        (Self { tx, dropped: 0 }, rx)
    }
}

impl PresentationSink for PreviewSink {
    fn present(&mut self, frame: &FrameBuffer) {
        let preview = PreviewFrame {
            sequence: frame.sequence(),
            width: frame.width(),
            height: frame.height(),
            pixels: Bytes::copy_from_slice(frame.data()),
            effect: frame.meta().effect.clone(),
            captured_at: frame.meta().timestamp,
        };

        match self.tx.try_send(preview) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                debug!(dropped = self.dropped, "Preview consumer behind, frame skipped");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// Headless presentation: logs throughput and latency periodically
pub struct HeadlessSink {
    every: Duration,
    window_start: Instant,
    frames: u64,
    total: u64,
    latency_sum: Duration,
}

impl HeadlessSink {
    pub fn new(every: Duration) -> Self {
        Self {
            every,
            window_start: Instant::now(),
            frames: 0,
            total: 0,
            latency_sum: Duration::ZERO,
        }
    }
}

impl PresentationSink for HeadlessSink {
    fn present(&mut self, frame: &FrameBuffer) {
        self.frames += 1;
        self.total += 1;
        self.latency_sum += frame.meta().timestamp.elapsed();

        let elapsed = self.window_start.elapsed();
        if elapsed >= self.every {
            let fps = self.frames as f64 / elapsed.as_secs_f64();
            let latency = self.latency_sum / self.frames.max(1) as u32;
            info!(
                total = self.total,
                "Presenting {:.1} fps, mean latency {:?}, effect {}",
                fps,
                latency,
                frame
                    .meta()
                    .effect
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_default()
            );
            self.frames = 0;
            self.latency_sum = Duration::ZERO;
            self.window_start = Instant::now();
        }
    }
}
