pub mod decoder;
pub mod frame;
pub mod pool;
pub mod ringbuf;
pub mod source;
pub mod synthetic;
pub mod v4l2;

pub use frame::{FrameBuffer, FrameMetadata, PixelFormat, Rotation};
pub use pool::{BufferPool, PoolUsage, PooledBuffer};
pub use source::{
    CameraBackend, CameraSource, CameraStream, FrameFeed, FramePoll, StreamFormat, StreamRequest,
    StreamStats, Submitted,
};
pub use synthetic::{Pacing, SyntheticCamera};
pub use v4l2::V4l2Camera;
