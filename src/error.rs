//! Error taxonomy for capture, effects, storage and the scheduler

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors raised by the Camera Source and its buffer pool
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Hardware busy, permission denied, or another session holds the camera
    #[error("camera device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The device does not offer the requested format/resolution/rate
    #[error("unsupported capture configuration: {0}")]
    ConfigUnsupported(String),

    /// Ownership discipline violated (foreign, stale or double-released buffer)
    #[error("frame buffer misuse: {0}")]
    BufferMisuse(String),

    /// Unrecoverable device error while streaming
    #[error("camera device lost: {0}")]
    DeviceLost(String),

    #[error("camera I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CaptureError {
    /// Map an OS error from opening a device into the taxonomy
    pub fn from_open_error(path: &str, err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(libc::EBUSY) | Some(libc::EACCES) | Some(libc::EPERM) | Some(libc::ENOENT)
            | Some(libc::ENODEV) | Some(libc::ENXIO) => {
                CaptureError::DeviceUnavailable(format!("{path}: {err}"))
            }
            _ => CaptureError::Io(err),
        }
    }
}

/// Errors raised while configuring an effect
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EffectError {
    #[error("unknown effect '{0}'")]
    UnknownEffect(String),

    #[error("invalid parameter '{name}' for effect '{effect}': {reason}")]
    InvalidParameter {
        effect: String,
        name: String,
        reason: String,
    },

    /// Configuration-time rejection: the transform cannot keep up with the frame interval
    #[error("effect '{effect}' too expensive: estimated {estimated:?} exceeds budget {budget:?}")]
    EffectTooExpensive {
        effect: String,
        estimated: Duration,
        budget: Duration,
    },

    #[error("effect '{effect}' cannot process input: {reason}")]
    UnsupportedInput { effect: String, reason: String },
}

/// Capture Sink failures; cloned to every waiter of a coalesced capture
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage full")]
    StorageFull,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("I/O failure: {0}")]
    IoFailure(String),

    #[error("failed to encode frame: {0}")]
    Encode(String),

    /// The pipeline stopped before an eligible frame was delivered
    #[error("capture cancelled before a frame was delivered")]
    Cancelled,
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        if err.raw_os_error() == Some(libc::ENOSPC) || err.raw_os_error() == Some(libc::EDQUOT) {
            return StorageError::StorageFull;
        }
        match err.kind() {
            io::ErrorKind::PermissionDenied => StorageError::PermissionDenied(err.to_string()),
            _ => StorageError::IoFailure(err.to_string()),
        }
    }
}

impl From<image::ImageError> for StorageError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(io) => io.into(),
            other => StorageError::Encode(other.to_string()),
        }
    }
}

/// Errors returned by the four control calls of the pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Effect(#[from] EffectError),

    #[error("pipeline is not running")]
    NotRunning,

    #[error("pipeline is already running")]
    AlreadyRunning,

    /// Terminal until `start()` is called again
    #[error("pipeline faulted: {0}")]
    Faulted(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type CaptureResult<T> = std::result::Result<T, CaptureError>;
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enospc_maps_to_storage_full() {
        let err = io::Error::from_raw_os_error(libc::ENOSPC);
        assert_eq!(StorageError::from(err), StorageError::StorageFull);
    }

    #[test]
    fn permission_denied_is_preserved() {
        let err = io::Error::new(io::ErrorKind::PermissionDenied, "read-only");
        assert!(matches!(
            StorageError::from(err),
            StorageError::PermissionDenied(_)
        ));
    }

    #[test]
    fn busy_device_is_unavailable() {
        let err = io::Error::from_raw_os_error(libc::EBUSY);
        assert!(matches!(
            CaptureError::from_open_error("/dev/video0", err),
            CaptureError::DeviceUnavailable(_)
        ));
    }
}
