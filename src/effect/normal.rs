use super::{copy_frame, Effect, EffectParams, FrameGeometry, ParamSpec, Transform};
use crate::error::EffectError;

/// Plain preview, no distortion
pub struct NormalEffect;

impl Effect for NormalEffect {
    fn name(&self) -> &'static str {
        "normal"
    }

    fn params(&self) -> &'static [ParamSpec] {
        &[]
    }

    fn cost_per_pixel_ns(&self, _params: &EffectParams) -> f64 {
        0.3
    }

    fn prepare(
        &self,
        _params: &EffectParams,
        input: FrameGeometry,
    ) -> Result<Box<dyn Transform>, EffectError> {
        Ok(Box::new(Identity { geometry: input }))
    }
}

struct Identity {
    geometry: FrameGeometry,
}

impl Transform for Identity {
    fn output(&self) -> FrameGeometry {
        self.geometry
    }

    fn apply(&self, input: &[u8], output: &mut [u8]) {
        copy_frame(input, output);
    }
}
