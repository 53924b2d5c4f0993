use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::pool::PooledBuffer;
use crate::effect::EffectDescriptor;

/// Frame with exclusively owned pixel storage
///
/// Immutable once produced: pixels are only reachable through `&[u8]`.
/// Dropping a frame returns its storage to the pool it came from.
pub struct FrameBuffer {
    meta: FrameMetadata,
    storage: PooledBuffer,
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub rotation: Rotation,
    /// Monotonic capture timestamp for latency tracking
    pub timestamp: Instant,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
    /// Effect that produced this frame, `None` for raw camera frames
    pub effect: Option<Arc<EffectDescriptor>>,
}

/// Pixel formats we support
///
/// Frames inside the pipeline are always `Rgba8`; the others describe what a
/// device delivers before decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgba8,
    Rgb24,
    Yuyv4,
    Mjpeg,
}

impl PixelFormat {
    /// Bytes per pixel for packed formats
    pub fn bytes_per_pixel(self) -> Option<u32> {
        match self {
            PixelFormat::Rgba8 => Some(4),
            PixelFormat::Rgb24 => Some(3),
            PixelFormat::Yuyv4 => Some(2),
            PixelFormat::Mjpeg => None,
        }
    }
}

/// Clockwise rotation the viewer should apply to display the frame upright
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl FrameBuffer {
    pub fn new(meta: FrameMetadata, storage: PooledBuffer) -> Self {
        debug_assert!(
            storage.len() >= (meta.stride as usize) * (meta.height as usize),
            "storage smaller than declared frame"
        );
        Self { meta, storage }
    }

    pub fn meta(&self) -> &FrameMetadata {
        &self.meta
    }

    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    pub fn stride(&self) -> u32 {
        self.meta.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.meta.format
    }

    /// Pixel bytes, `stride * height` long
    pub fn data(&self) -> &[u8] {
        let len = (self.meta.stride as usize) * (self.meta.height as usize);
        &self.storage.as_slice()[..len]
    }

    pub fn pool_id(&self) -> u64 {
        self.storage.pool_id()
    }

    pub(crate) fn storage(&self) -> &PooledBuffer {
        &self.storage
    }

    /// Give up the frame and keep its storage lease for reuse
    pub(crate) fn into_storage(self) -> PooledBuffer {
        self.storage
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("sequence", &self.meta.sequence)
            .field("width", &self.meta.width)
            .field("height", &self.meta.height)
            .field("format", &self.meta.format)
            .field("storage", &self.storage)
            .finish()
    }
}
