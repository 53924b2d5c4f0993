//! V4L2 camera backend
//!
//! Memory-mapped streaming on a dedicated thread; every dequeued buffer is
//! decoded straight into pooled RGBA storage.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::decoder;
use super::frame::PixelFormat;
use super::source::{CameraBackend, FrameFeed, StreamFormat, StreamRequest, Submitted};
use crate::error::{CaptureError, CaptureResult};

/// Linux V4L2 capture device
pub struct V4l2Camera {
    path: String,
    buffer_count: u32,
    device: Option<Device>,
    format: Option<StreamFormat>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl V4l2Camera {
    pub fn new(path: impl Into<String>, buffer_count: u32) -> Self {
        Self {
            path: path.into(),
            buffer_count,
            device: None,
            format: None,
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    fn fourcc(format: PixelFormat) -> Option<FourCC> {
        match format {
            PixelFormat::Mjpeg => Some(FourCC::new(b"MJPG")),
            PixelFormat::Yuyv4 => Some(FourCC::new(b"YUYV")),
            PixelFormat::Rgb24 => Some(FourCC::new(b"RGB3")),
            PixelFormat::Rgba8 => None,
        }
    }
}

impl CameraBackend for V4l2Camera {
    fn describe(&self) -> String {
        format!("V4L2 {}", self.path)
    }

    #[instrument(skip(self), fields(device = %self.path))]
    fn negotiate(&mut self, request: &StreamRequest) -> CaptureResult<StreamFormat> {
        let device =
            Device::with_path(&self.path).map_err(|e| CaptureError::from_open_error(&self.path, e))?;

        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CaptureError::ConfigUnsupported(format!(
                "{} does not support video capture",
                self.path
            )));
        }

        let fourcc = Self::fourcc(request.format).ok_or_else(|| {
            CaptureError::ConfigUnsupported(format!("{:?} is not a V4L2 capture format", request.format))
        })?;

        let mut fmt = device.format()?;
        fmt.width = request.width;
        fmt.height = request.height;
        fmt.fourcc = fourcc;
        let actual = device
            .set_format(&fmt)
            .map_err(|e| CaptureError::from_open_error(&self.path, e))?;

        if actual.width != request.width || actual.height != request.height || actual.fourcc != fourcc {
            return Err(CaptureError::ConfigUnsupported(format!(
                "requested {}x{} {}, device offers {}x{} {}",
                request.width, request.height, fourcc, actual.width, actual.height, actual.fourcc
            )));
        }

        let params = device.set_params(&Parameters::with_fps(request.fps))?;
        let fps = match params.interval.numerator {
            0 => request.fps,
            n => params.interval.denominator / n,
        };
        if fps < request.fps {
            warn!("Device limited to {} fps (requested {})", fps, request.fps);
        }

        let format = StreamFormat {
            width: actual.width,
            height: actual.height,
            fps: fps.max(1),
            source_format: request.format,
            rotation: request.rotation,
        };
        self.device = Some(device);
        self.format = Some(format.clone());
        Ok(format)
    }

    fn start(&mut self, feed: FrameFeed) -> CaptureResult<()> {
        let device = self
            .device
            .take()
            .ok_or_else(|| CaptureError::ConfigUnsupported("start before negotiate".into()))?;
        let format = self
            .format
            .clone()
            .ok_or_else(|| CaptureError::ConfigUnsupported("start before negotiate".into()))?;

        // Request buffers here so allocation failures surface from open()
        let stream = MmapStream::with_buffers(&device, Type::VideoCapture, self.buffer_count)
            .map_err(|e| CaptureError::from_open_error(&self.path, e))?;
        info!("Capture stream started with {} buffers", self.buffer_count);

        self.stop.store(false, Ordering::Release);
        let stop = Arc::clone(&self.stop);
        let worker = thread::Builder::new()
            .name("funnycam-v4l2".into())
            .spawn(move || capture_loop(device, stream, format, feed, stop))?;
        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.device = None;
    }
}

fn capture_loop(
    _device: Device,
    mut stream: MmapStream<'static>,
    format: StreamFormat,
    feed: FrameFeed,
    stop: Arc<AtomicBool>,
) {
    let mut corrupt = 0u64;

    while !stop.load(Ordering::Acquire) && !feed.is_closed() {
        let (buf, meta) = match stream.next() {
            Ok(next) => next,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                continue
            }
            Err(e) => {
                feed.fault(format!("dequeue failed: {e}"));
                break;
            }
        };

        let device_timestamp = Duration::from_secs(meta.timestamp.sec as u64)
            + Duration::from_micros(meta.timestamp.usec as u64);

        let outcome = feed.submit(Some(device_timestamp), |_, out| {
            decoder::decode_into(buf, format.source_format, format.width, format.height, out)
        });
        match outcome {
            Ok(Submitted::Closed) => break,
            Ok(_) => {}
            Err(e) => {
                corrupt += 1;
                warn!(corrupt, "Skipping undecodable frame: {}", e);
            }
        }
    }
}
