pub mod capture;
#[cfg(feature = "sdl-preview")]
pub mod display;
pub mod effect;
pub mod error;
pub mod pipeline;
pub mod sink;
pub mod utils;

use std::path::{Path, PathBuf};
use std::time::Duration;

use capture::frame::{PixelFormat, Rotation};
use serde::{Deserialize, Serialize};

use crate::effect::EffectDescriptor;
use crate::error::PipelineError;
use crate::sink::StorageFormat;
use crate::utils::FoundDevice;

pub use crate::pipeline::{CaptureTicket, Pipeline, PipelineStats, PipelineStatus};

/// Prefix of configuration environment variables, e.g. `FUNNYCAM__CAPTURE__FPS`
pub const ENV_PREFIX: &str = "FUNNYCAM";

/// System configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub pipeline: PipelineConfig,
    pub effect: EffectConfig,
    pub storage: StorageConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Empty path means auto-detect
    pub device: FoundDevice,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Format requested from the device; frames are decoded to RGBA
    pub format: PixelFormat,
    /// Camera buffer pool size
    pub buffer_count: u32,
    pub rotation: Rotation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Camera frames being transformed or presented at once
    pub max_in_flight: usize,
    pub transform_workers: usize,
    /// Bounded wait for the presentation stage before a frame is dropped
    pub present_timeout_ms: u64,
    /// After this long `stop` forces buffer release
    pub stop_timeout_ms: u64,
    pub pin_workers: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectConfig {
    pub default: EffectDescriptor,
    /// Per-frame transform budget; 0 derives it from the capture fps
    pub frame_budget_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub directory: PathBuf,
    pub format: StorageFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: FoundDevice::new(String::new(), PixelFormat::Mjpeg),
            width: 640,
            height: 480,
            fps: 30,
            format: PixelFormat::Mjpeg,
            buffer_count: 4,
            rotation: Rotation::Deg0,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 2,
            transform_workers: 1,
            present_timeout_ms: 5,
            stop_timeout_ms: 1000,
            pin_workers: false,
        }
    }
}

impl PipelineConfig {
    pub fn present_timeout(&self) -> Duration {
        Duration::from_millis(self.present_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl Default for EffectConfig {
    fn default() -> Self {
        Self {
            default: EffectDescriptor::default(),
            frame_budget_ms: 0,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let pictures = dirs::picture_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join("Pictures")))
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            directory: pictures.join("FunnyCamera"),
            format: StorageFormat::Png,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
        }
    }
}

impl Config {
    /// Defaults, then the TOML file at `path` if given, then `FUNNYCAM__*` variables
    ///
    /// A `path` that does not exist is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, PipelineError> {
        let defaults = config::Config::try_from(&Config::default()).map_err(config_error)?;
        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let loaded: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(config_error)?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject settings no backend or scheduler can honour
    pub fn validate(&self) -> Result<(), PipelineError> {
        let c = &self.capture;
        if c.width == 0 || c.height == 0 {
            return Err(PipelineError::Config(format!(
                "capture size {}x{} must be non-zero",
                c.width, c.height
            )));
        }
        if c.fps == 0 {
            return Err(PipelineError::Config("capture fps must be non-zero".into()));
        }
        if c.buffer_count < 2 {
            return Err(PipelineError::Config(format!(
                "capture buffer_count {} is below the minimum of 2",
                c.buffer_count
            )));
        }
        if self.pipeline.max_in_flight == 0 {
            return Err(PipelineError::Config("pipeline max_in_flight must be at least 1".into()));
        }
        if self.pipeline.transform_workers == 0 {
            return Err(PipelineError::Config(
                "pipeline transform_workers must be at least 1".into(),
            ));
        }
        if self.display.width == 0 || self.display.height == 0 {
            return Err(PipelineError::Config("display size must be non-zero".into()));
        }
        Ok(())
    }

    /// Time one frame transform may take
    pub fn frame_budget(&self) -> Duration {
        match self.effect.frame_budget_ms {
            0 => Duration::from_secs(1) / self.capture.fps.max(1),
            ms => Duration::from_millis(ms),
        }
    }
}

fn config_error(e: config::ConfigError) -> PipelineError {
    PipelineError::Config(e.to_string())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.pipeline.max_in_flight, 2);
        assert_eq!(config.frame_budget(), Duration::from_secs(1) / 30);
        assert!(config.storage.directory.ends_with("FunnyCamera"));
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[capture]
width = 1280
height = 720
format = "rgb24"

[pipeline]
max_in_flight = 1

[effect]
frame_budget_ms = 20

[effect.default]
effect = "overlay"
params = {{ sticker = "speech", x = 0.25 }}
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!((config.capture.width, config.capture.height), (1280, 720));
        assert_eq!(config.capture.format, PixelFormat::Rgb24);
        assert_eq!(config.capture.fps, 30);
        assert_eq!(config.pipeline.max_in_flight, 1);
        assert_eq!(config.frame_budget(), Duration::from_millis(20));
        assert_eq!(config.effect.default.effect, "overlay");
        assert_eq!(config.effect.default.choice("sticker"), Some("speech"));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("funnycam.toml");
        assert!(matches!(
            Config::load(Some(&missing)),
            Err(PipelineError::Config(_))
        ));
        assert!(Config::load(None).is_ok());
    }

    #[test]
    fn impossible_values_are_rejected() {
        let mut config = Config::default();
        config.capture.buffer_count = 1;
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));

        let mut config = Config::default();
        config.pipeline.max_in_flight = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.capture.fps = 0;
        assert!(config.validate().is_err());
    }
}
