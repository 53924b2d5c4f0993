//! FunnyCamera: live camera preview with funny effects

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use funnycam::capture::{CameraSource, PixelFormat, SyntheticCamera, V4l2Camera};
use funnycam::effect::{EffectDescriptor, EffectEngine};
use funnycam::sink::HeadlessSink;
use funnycam::{utils, Config, Pipeline};

#[derive(Parser)]
#[command(name = "funnycam")]
#[command(about = "Live camera preview with funny effects")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use the built-in test pattern instead of a V4L2 device
    #[arg(long)]
    synthetic: bool,

    /// Starting effect, e.g. `warp:strength=0.8,curve=warm`
    #[arg(short, long)]
    effect: Option<EffectDescriptor>,

    /// Log statistics instead of opening a window
    #[arg(long)]
    headless: bool,

    /// Stop after this many seconds (headless only)
    #[arg(short, long)]
    duration: Option<u64>,

    /// Save one capture shortly after starting (headless only)
    #[arg(long)]
    capture: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("funnycam=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    let cli = Cli::parse();
    info!("FunnyCamera launching...");

    let mut config = Config::load(cli.config.as_deref())?;
    let source = open_source(&cli, &mut config).await?;

    let engine = EffectEngine::with_builtin_effects(config.frame_budget());
    let descriptor = cli.effect.clone().unwrap_or_else(|| config.effect.default.clone());
    info!(
        "Effects: {}; frame budget {:?}",
        engine.effects().collect::<Vec<_>>().join(", "),
        engine.frame_budget()
    );

    if cli.headless || !cfg!(feature = "sdl-preview") {
        if !cli.headless {
            warn!("Built without the preview window, running headless");
        }
        run_headless(&cli, &config, source, engine, descriptor).await
    } else {
        run_preview(&config, source, engine, descriptor)
    }
}

async fn open_source(cli: &Cli, config: &mut Config) -> Result<CameraSource> {
    if cli.synthetic {
        // The test pattern cannot produce MJPEG
        if config.capture.format == PixelFormat::Mjpeg {
            config.capture.format = PixelFormat::Rgb24;
        }
        return Ok(CameraSource::new(SyntheticCamera::new()));
    }

    // Auto-detect capture device if needed
    if config.capture.device.path.is_empty() {
        let device = utils::auto_detect_device().await?;
        config.capture.format = device.format;
        config.capture.device = device;
    }
    info!("Using capture device: {:?}", config.capture.device);

    Ok(CameraSource::new(V4l2Camera::new(
        config.capture.device.path.clone(),
        config.capture.buffer_count,
    )))
}

async fn run_headless(
    cli: &Cli,
    config: &Config,
    source: CameraSource,
    engine: EffectEngine,
    descriptor: EffectDescriptor,
) -> Result<()> {
    let pipeline = Pipeline::new(source, engine, config)
        .with_presentation_sink(HeadlessSink::new(Duration::from_secs(2)));
    pipeline.start(descriptor)?;

    if cli.capture {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let ticket = pipeline.request_capture()?;
        match tokio::task::spawn_blocking(move || ticket.wait()).await? {
            Ok(path) => info!("Saved {}", path.display()),
            Err(e) => warn!("Capture failed: {}", e),
        }
    }

    match cli.duration {
        Some(seconds) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
                _ = tokio::signal::ctrl_c() => info!("Interrupted"),
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
            info!("Interrupted");
        }
    }

    pipeline.stop()?;
    let stats = pipeline.stats();
    info!(
        "Presented {} of {} frames, {} dropped, {} captured",
        stats.presented,
        stats.acquired,
        stats.dropped(),
        stats.persisted
    );
    Ok(())
}

#[cfg(feature = "sdl-preview")]
fn run_preview(
    config: &Config,
    source: CameraSource,
    engine: EffectEngine,
    descriptor: EffectDescriptor,
) -> Result<()> {
    use funnycam::display::{EffectControls, Sdl2Display};
    use funnycam::sink::PreviewSink;

    let (preview, frames) = PreviewSink::channel(2);
    let pipeline = Pipeline::new(source, engine, config).with_presentation_sink(preview);
    pipeline.start(descriptor.clone())?;

    // Initialize SDL2
    let sdl_context = sdl2::init().map_err(|e| eyre!(e))?;
    let mut display = Sdl2Display::new(&sdl_context, config.display.width, config.display.height)?;
    let result = display.run(&sdl_context, frames, &pipeline, EffectControls::new(descriptor));

    pipeline.stop()?;
    info!("FunnyCamera shutting down");
    result
}

#[cfg(not(feature = "sdl-preview"))]
fn run_preview(
    _config: &Config,
    _source: CameraSource,
    _engine: EffectEngine,
    _descriptor: EffectDescriptor,
) -> Result<()> {
    Err(eyre!("preview window not compiled in"))
}
