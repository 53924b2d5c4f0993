//! SDL2 Window Display Module
//! Shows processed frames in an SDL2 window and turns key presses into
//! pipeline control calls.

use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use flume::{Receiver, RecvTimeoutError};
use sdl2::event::Event;
use sdl2::keyboard::Scancode;
use sdl2::pixels::PixelFormatEnum;
use sdl2::render::{Canvas, TextureCreator};
use sdl2::video::{Window, WindowContext};
use tracing::{info, warn};

use super::controls::EffectControls;
use crate::effect::EffectDescriptor;
use crate::pipeline::{CaptureTicket, Pipeline};
use crate::sink::PreviewFrame;

/// How long to wait for a frame before servicing window events again
const FRAME_WAIT: Duration = Duration::from_millis(16);

/// SDL2 Window Display
/// Handles window creation, the event loop and frame rendering.
pub struct Sdl2Display {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
}

impl Sdl2Display {
    pub fn new(sdl_context: &sdl2::Sdl, width: u32, height: u32) -> Result<Self> {
        let video_subsystem = sdl_context.video().map_err(|e| eyre!(e))?;

        let window = video_subsystem
            .window("FunnyCamera", width, height)
            .position_centered()
            .resizable()
            .build()?;

        let canvas = window.into_canvas().present_vsync().build()?;
        let texture_creator = canvas.texture_creator();

        Ok(Self {
            canvas,
            texture_creator,
        })
    }

    /// Draw an RGBA frame scaled to the window
    pub fn render_frame(&mut self, frame: &PreviewFrame) -> Result<()> {
        // RGBA byte order is ABGR8888 on little-endian hosts
        let mut texture = self
            .texture_creator
            .create_texture_streaming(PixelFormatEnum::ABGR8888, frame.width, frame.height)
            .map_err(|e| eyre!(e))?;

        texture
            .update(None, &frame.pixels, (frame.width * 4) as usize)
            .map_err(|e| eyre!(e))?;

        self.canvas.clear();
        self.canvas
            .copy(&texture, None, None)
            .map_err(|e| eyre!(e))?;

        self.canvas.present();
        Ok(())
    }

    fn set_title(&mut self, descriptor: &EffectDescriptor) {
        let title = format!("FunnyCamera - {descriptor}");
        if let Err(e) = self.canvas.window_mut().set_title(&title) {
            warn!("Failed to set window title: {}", e);
        }
    }

    /// Run until the window closes, `Esc` is pressed or the frames stop
    ///
    /// Keys: `1/2/3` select an effect, arrows adjust it, `C` cycles its
    /// curve or sticker, `Space` captures.
    pub fn run(
        &mut self,
        sdl_context: &sdl2::Sdl,
        frames: Receiver<PreviewFrame>,
        pipeline: &Pipeline,
        mut controls: EffectControls,
    ) -> Result<()> {
        let mut event_pump = sdl_context.event_pump().map_err(|e| eyre!(e))?;
        let mut captures: Vec<CaptureTicket> = Vec::new();
        self.set_title(controls.descriptor());

        'running: loop {
            for event in event_pump.poll_iter() {
                let Event::KeyDown {
                    scancode: Some(key),
                    ..
                } = event
                else {
                    if let Event::Quit { .. } = event {
                        info!("Quit event received");
                        break 'running;
                    }
                    continue;
                };

                let previous = controls.descriptor().clone();
                let changed = match key {
                    Scancode::Escape => break 'running,
                    Scancode::Num1 => controls.select(1).cloned(),
                    Scancode::Num2 => controls.select(2).cloned(),
                    Scancode::Num3 => controls.select(3).cloned(),
                    Scancode::Left => controls.nudge(-1.0, 0.0).cloned(),
                    Scancode::Right => controls.nudge(1.0, 0.0).cloned(),
                    Scancode::Up => controls.nudge(0.0, -1.0).cloned(),
                    Scancode::Down => controls.nudge(0.0, 1.0).cloned(),
                    Scancode::C => controls.cycle().cloned(),
                    Scancode::Space => {
                        match pipeline.request_capture() {
                            Ok(ticket) => captures.push(ticket),
                            Err(e) => warn!("Capture unavailable: {}", e),
                        }
                        None
                    }
                    _ => None,
                };

                if let Some(descriptor) = changed {
                    match pipeline.update_effect(descriptor.clone()) {
                        Ok(()) => self.set_title(&descriptor),
                        Err(e) => {
                            warn!("Effect rejected: {}", e);
                            controls = EffectControls::new(previous);
                        }
                    }
                }
            }

            captures.retain(|ticket| match ticket.try_result() {
                None => true,
                Some(Ok(path)) => {
                    info!("Saved {}", path.display());
                    false
                }
                Some(Err(e)) => {
                    warn!("Capture failed: {}", e);
                    false
                }
            });

            match frames.recv_timeout(FRAME_WAIT) {
                Ok(frame) => self.render_frame(&frame)?,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Preview stream closed");
                    break;
                }
            }
        }

        Ok(())
    }
}
