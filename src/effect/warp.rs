//! The funny warp: bulge or pinch around an anchor, plus a colour curve
//!
//! Every output pixel samples exactly one input pixel. The mapping is
//! computed once per plan, so applying it is a gather and is bit-for-bit
//! reproducible.

use super::curve::{CurveLut, CURVES};
use super::{Effect, EffectParams, FrameGeometry, ParamSpec, Transform};
use crate::error::EffectError;

const PARAMS: &[ParamSpec] = &[
    ParamSpec::range("strength", -1.0, 1.0, 0.5),
    ParamSpec::range("radius", 0.05, 1.0, 0.35),
    ParamSpec::range("center_x", 0.0, 1.0, 0.5),
    ParamSpec::range("center_y", 0.0, 1.0, 0.5),
    ParamSpec::choice("curve", CURVES, "none"),
];

/// Localised magnification (strength > 0) or pinch (strength < 0)
pub struct WarpEffect;

impl Effect for WarpEffect {
    fn name(&self) -> &'static str {
        "warp"
    }

    fn params(&self) -> &'static [ParamSpec] {
        PARAMS
    }

    fn cost_per_pixel_ns(&self, params: &EffectParams) -> f64 {
        match params.choice("curve") {
            "none" => 4.0,
            _ => 5.5,
        }
    }

    fn prepare(
        &self,
        params: &EffectParams,
        input: FrameGeometry,
    ) -> Result<Box<dyn Transform>, EffectError> {
        let curve = CurveLut::named(params.choice("curve"));
        Ok(Box::new(WarpMap {
            geometry: input,
            map: build_map(
                input,
                params.number("strength"),
                params.number("radius"),
                params.number("center_x"),
                params.number("center_y"),
            ),
            curve: (!curve.is_identity()).then_some(curve),
        }))
    }
}

/// For each output pixel, the index of the input pixel it shows
fn build_map(geometry: FrameGeometry, strength: f32, radius: f32, cx: f32, cy: f32) -> Vec<u32> {
    let (w, h) = (geometry.width as usize, geometry.height as usize);
    let cx = cx * (w - 1) as f32;
    let cy = cy * (h - 1) as f32;
    let r_max = radius * w.min(h) as f32;

    let mut map = Vec::with_capacity(w * h);
    for y in 0..h {
        for x in 0..w {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            let dist = (dx * dx + dy * dy).sqrt();

            let (sx, sy) = if dist < r_max && r_max > 0.0 {
                let r = dist / r_max;
                // 1 at the rim, (1 - strength) at the anchor
                let scale = 1.0 - strength * (1.0 - r * r);
                (cx + dx * scale, cy + dy * scale)
            } else {
                (x as f32, y as f32)
            };

            let sx = (sx.round() as i64).clamp(0, w as i64 - 1) as usize;
            let sy = (sy.round() as i64).clamp(0, h as i64 - 1) as usize;
            map.push((sy * w + sx) as u32);
        }
    }
    map
}

struct WarpMap {
    geometry: FrameGeometry,
    map: Vec<u32>,
    curve: Option<CurveLut>,
}

impl Transform for WarpMap {
    fn output(&self) -> FrameGeometry {
        self.geometry
    }

    fn apply(&self, input: &[u8], output: &mut [u8]) {
        for (dst, &src) in output.chunks_exact_mut(4).zip(&self.map) {
            let src = src as usize * 4;
            dst.copy_from_slice(&input[src..src + 4]);
        }
        if let Some(curve) = &self.curve {
            for px in output.chunks_exact_mut(4) {
                curve.apply(px);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::EffectDescriptor;

    fn prepare(descriptor: &EffectDescriptor, geometry: FrameGeometry) -> Box<dyn Transform> {
        let params = EffectParams::resolve("warp", PARAMS, descriptor).unwrap();
        WarpEffect.prepare(&params, geometry).unwrap()
    }

    fn gradient(geometry: FrameGeometry) -> Vec<u8> {
        (0..geometry.pixels())
            .flat_map(|i| [(i % 251) as u8, (i / 7 % 256) as u8, 17, 255])
            .collect()
    }

    #[test]
    fn zero_strength_is_identity() {
        let geometry = FrameGeometry::new(32, 24);
        let transform = prepare(&EffectDescriptor::new("warp").with("strength", 0.0), geometry);
        let input = gradient(geometry);
        let mut output = vec![0u8; geometry.frame_len()];
        transform.apply(&input, &mut output);
        assert_eq!(input, output);
    }

    #[test]
    fn pixels_outside_radius_are_untouched() {
        let geometry = FrameGeometry::new(40, 40);
        let transform = prepare(
            &EffectDescriptor::new("warp")
                .with("strength", 0.9)
                .with("radius", 0.1),
            geometry,
        );
        let input = gradient(geometry);
        let mut output = vec![0u8; geometry.frame_len()];
        transform.apply(&input, &mut output);

        // Corner is far outside the 4px radius around the centre
        assert_eq!(&output[..4], &input[..4]);
        assert_ne!(input, output);
    }

    #[test]
    fn bulge_magnifies_the_anchor() {
        let geometry = FrameGeometry::new(21, 21);
        let map = build_map(geometry, 0.5, 0.5, 0.5, 0.5);
        // One pixel right of centre samples closer to the centre
        let centre = 10 * 21 + 10;
        assert_eq!(map[centre], centre as u32);
        assert_eq!(map[centre + 1], centre as u32 + 1);
        assert_eq!(map[centre + 4], centre as u32 + 2);
    }
}
