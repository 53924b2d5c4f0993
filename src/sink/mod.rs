//! Downstream collaborators of the pipeline

pub mod preview;
pub mod storage;

use std::path::PathBuf;

use crate::capture::FrameBuffer;
use crate::error::StorageError;

pub use preview::{HeadlessSink, PreviewFrame, PreviewSink};
pub use storage::{FileCaptureSink, StorageFormat};

/// Rendering surface for processed frames
///
/// The frame is only borrowed: implementations must copy what they keep
/// before returning, after which the pipeline releases the buffer.
pub trait PresentationSink: Send {
    fn present(&mut self, frame: &FrameBuffer);
}

impl<F> PresentationSink for F
where
    F: FnMut(&FrameBuffer) + Send,
{
    fn present(&mut self, frame: &FrameBuffer) {
        self(frame)
    }
}

/// Storage for explicitly requested captures
pub trait CaptureSink: Send {
    /// Persist `frame` losslessly, returning where it was written
    fn persist(&mut self, frame: &FrameBuffer) -> Result<PathBuf, StorageError>;
}
