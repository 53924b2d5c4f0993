//! Effect Engine
//!
//! Effects are configured once per descriptor and input geometry into an
//! immutable [`EffectPlan`] (lookup tables, warp maps, sprites). Applying a
//! plan is a pure function of the input frame.

pub mod curve;
pub mod descriptor;
pub mod normal;
pub mod overlay;
pub mod warp;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, instrument};

use crate::capture::frame::{FrameBuffer, FrameMetadata, PixelFormat};
use crate::capture::pool::PooledBuffer;
use crate::error::EffectError;

pub use curve::CURVES;
pub use descriptor::{EffectDescriptor, EffectParams, ParamDomain, ParamSpec, ParamValue};
pub use normal::NormalEffect;
pub use overlay::{OverlayEffect, STICKERS};
pub use warp::WarpEffect;

/// Dimensions of a packed RGBA frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
}

impl FrameGeometry {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn of(frame: &FrameBuffer) -> Self {
        Self::new(frame.width(), frame.height())
    }

    pub fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn stride(&self) -> u32 {
        self.width * 4
    }

    pub fn frame_len(&self) -> usize {
        self.pixels() * 4
    }
}

/// One kind of visual effect
pub trait Effect: Send + Sync {
    fn name(&self) -> &'static str;

    /// Declared parameters and their domains
    fn params(&self) -> &'static [ParamSpec];

    /// Estimated single-core cost per output pixel, in nanoseconds
    fn cost_per_pixel_ns(&self, params: &EffectParams) -> f64;

    /// Precompute everything needed to transform frames of `input` geometry
    fn prepare(
        &self,
        params: &EffectParams,
        input: FrameGeometry,
    ) -> Result<Box<dyn Transform>, EffectError>;
}

/// Prepared, immutable transform
pub trait Transform: Send + Sync {
    fn output(&self) -> FrameGeometry;

    /// Write the transformed `input` into `output` (`output().frame_len()` bytes)
    fn apply(&self, input: &[u8], output: &mut [u8]);
}

/// Registry of effects plus the per-frame time budget
pub struct EffectEngine {
    effects: BTreeMap<&'static str, Arc<dyn Effect>>,
    frame_budget: Duration,
}

impl EffectEngine {
    pub fn new(frame_budget: Duration) -> Self {
        Self {
            effects: BTreeMap::new(),
            frame_budget,
        }
    }

    /// Engine with `normal`, `warp` and `overlay` registered
    pub fn with_builtin_effects(frame_budget: Duration) -> Self {
        let mut engine = Self::new(frame_budget);
        engine.register(NormalEffect);
        engine.register(WarpEffect);
        engine.register(OverlayEffect);
        engine
    }

    pub fn register<E: Effect + 'static>(&mut self, effect: E) {
        self.effects.insert(effect.name(), Arc::new(effect));
    }

    pub fn effects(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.effects.keys().copied()
    }

    pub fn frame_budget(&self) -> Duration {
        self.frame_budget
    }

    /// Validate `descriptor` and build a plan for `input`-sized frames
    ///
    /// Fails with `EffectTooExpensive` when the estimated cost exceeds the
    /// frame budget, so the pipeline never degrades silently at run time.
    #[instrument(skip(self), fields(effect = %descriptor.effect))]
    pub fn configure(
        &self,
        descriptor: &EffectDescriptor,
        input: FrameGeometry,
    ) -> Result<EffectPlan, EffectError> {
        let effect = self
            .effects
            .get(descriptor.effect.as_str())
            .ok_or_else(|| EffectError::UnknownEffect(descriptor.effect.clone()))?;

        if input.width == 0 || input.height == 0 {
            return Err(EffectError::UnsupportedInput {
                effect: effect.name().into(),
                reason: format!("empty {}x{} frame", input.width, input.height),
            });
        }

        let params = EffectParams::resolve(effect.name(), effect.params(), descriptor)?;
        let pixels = input.pixels().max(1) as f64;
        let estimated = Duration::from_nanos((pixels * effect.cost_per_pixel_ns(&params)) as u64);
        if estimated > self.frame_budget {
            return Err(EffectError::EffectTooExpensive {
                effect: effect.name().into(),
                estimated,
                budget: self.frame_budget,
            });
        }

        let transform = effect.prepare(&params, input)?;
        let descriptor = Arc::new(params.to_descriptor(effect.name()));
        debug!(%descriptor, ?estimated, "Effect configured");

        Ok(EffectPlan {
            descriptor,
            transform,
            input,
            estimated,
        })
    }

    /// One-shot transform: configure `descriptor` and apply it to `frame`
    pub fn apply(
        &self,
        descriptor: &EffectDescriptor,
        frame: &FrameBuffer,
        output: PooledBuffer,
    ) -> Result<FrameBuffer, EffectError> {
        self.configure(descriptor, FrameGeometry::of(frame))?
            .apply(frame, output)
    }
}

/// A configured effect bound to one input geometry
pub struct EffectPlan {
    descriptor: Arc<EffectDescriptor>,
    transform: Box<dyn Transform>,
    input: FrameGeometry,
    estimated: Duration,
}

impl EffectPlan {
    /// Descriptor after validation and clamping
    pub fn descriptor(&self) -> &Arc<EffectDescriptor> {
        &self.descriptor
    }

    pub fn input(&self) -> FrameGeometry {
        self.input
    }

    pub fn output(&self) -> FrameGeometry {
        self.transform.output()
    }

    pub fn estimated_cost(&self) -> Duration {
        self.estimated
    }

    /// Transform `input` into `storage`, producing a new frame
    pub fn apply(&self, input: &FrameBuffer, mut storage: PooledBuffer) -> Result<FrameBuffer, EffectError> {
        let name = &self.descriptor.effect;
        if FrameGeometry::of(input) != self.input || input.format() != PixelFormat::Rgba8 {
            return Err(EffectError::UnsupportedInput {
                effect: name.clone(),
                reason: format!(
                    "plan built for {}x{} RGBA, got {}x{} {:?}",
                    self.input.width,
                    self.input.height,
                    input.width(),
                    input.height(),
                    input.format()
                ),
            });
        }
        let output = self.output();
        if storage.len() < output.frame_len() {
            return Err(EffectError::UnsupportedInput {
                effect: name.clone(),
                reason: format!("output buffer holds {} bytes, need {}", storage.len(), output.frame_len()),
            });
        }

        let started = Instant::now();
        self.transform
            .apply(input.data(), &mut storage.as_mut_slice()[..output.frame_len()]);
        metrics::histogram!("funnycam_transform_time_us").record(started.elapsed().as_micros() as f64);

        let src = input.meta();
        let meta = FrameMetadata {
            sequence: src.sequence,
            width: output.width,
            height: output.height,
            stride: output.stride(),
            format: PixelFormat::Rgba8,
            rotation: src.rotation,
            timestamp: src.timestamp,
            device_timestamp: src.device_timestamp,
            effect: Some(Arc::clone(&self.descriptor)),
        };
        Ok(FrameBuffer::new(meta, storage))
    }
}

/// Copy a packed RGBA frame
pub(crate) fn copy_frame(input: &[u8], output: &mut [u8]) {
    let len = output.len().min(input.len());
    output[..len].copy_from_slice(&input[..len]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_effect_is_rejected() {
        let engine = EffectEngine::with_builtin_effects(Duration::from_millis(33));
        let err = engine
            .configure(&EffectDescriptor::new("sepia"), FrameGeometry::new(64, 48))
            .err();
        assert_eq!(err, Some(EffectError::UnknownEffect("sepia".into())));
    }

    #[test]
    fn expensive_effect_is_rejected_at_configuration() {
        let engine = EffectEngine::with_builtin_effects(Duration::from_micros(100));
        let err = engine
            .configure(&EffectDescriptor::default(), FrameGeometry::new(1920, 1080))
            .err();
        assert!(matches!(err, Some(EffectError::EffectTooExpensive { .. })));
    }

    #[test]
    fn plan_carries_clamped_descriptor() {
        let engine = EffectEngine::with_builtin_effects(Duration::from_millis(33));
        let plan = engine
            .configure(
                &EffectDescriptor::new("warp").with("strength", 4.0),
                FrameGeometry::new(64, 48),
            )
            .unwrap();
        assert_eq!(plan.descriptor().number("strength"), Some(1.0));
        assert_eq!(plan.output(), FrameGeometry::new(64, 48));
    }

    #[test]
    fn builtins_are_registered() {
        let engine = EffectEngine::with_builtin_effects(Duration::from_millis(33));
        let names: Vec<_> = engine.effects().collect();
        assert_eq!(names, ["normal", "overlay", "warp"]);
    }
}
