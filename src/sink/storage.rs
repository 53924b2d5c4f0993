//! File-backed capture sink

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use image::{ExtendedColorType, ImageFormat};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::CaptureSink;
use crate::capture::{FrameBuffer, PixelFormat};
use crate::error::StorageError;

/// Lossless on-disk formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageFormat {
    #[default]
    Png,
    Bmp,
}

impl StorageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            StorageFormat::Png => "png",
            StorageFormat::Bmp => "bmp",
        }
    }

    fn image_format(&self) -> ImageFormat {
        match self {
            StorageFormat::Png => ImageFormat::Png,
            StorageFormat::Bmp => ImageFormat::Bmp,
        }
    }
}

/// Writes captures as timestamp-named images into one directory
pub struct FileCaptureSink {
    directory: PathBuf,
    format: StorageFormat,
}

impl FileCaptureSink {
    pub fn new(directory: impl Into<PathBuf>, format: StorageFormat) -> Self {
        Self {
            directory: directory.into(),
            format,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// `yyyy.MM.dd.HH.mm.ss.SSS.ext`, suffixed when the name is taken
    fn next_path(&self) -> PathBuf {
        let stem = Local::now().format("%Y.%m.%d.%H.%M.%S%.3f").to_string();
        let ext = self.format.extension();

        let mut path = self.directory.join(format!("{stem}.{ext}"));
        let mut n = 1;
        while path.exists() {
            path = self.directory.join(format!("{stem}-{n}.{ext}"));
            n += 1;
        }
        path
    }
}

impl CaptureSink for FileCaptureSink {
    #[instrument(skip(self, frame), fields(sequence = frame.sequence()))]
    fn persist(&mut self, frame: &FrameBuffer) -> Result<PathBuf, StorageError> {
        if frame.format() != PixelFormat::Rgba8 || frame.stride() != frame.width() * 4 {
            return Err(StorageError::Encode(format!(
                "cannot store {:?} frame with stride {}",
                frame.format(),
                frame.stride()
            )));
        }

        fs::create_dir_all(&self.directory)?;
        let path = self.next_path();
        image::save_buffer_with_format(
            &path,
            frame.data(),
            frame.width(),
            frame.height(),
            ExtendedColorType::Rgba8,
            self.format.image_format(),
        )?;

        info!("Saved capture to {}", path.display());
        Ok(path)
    }
}
