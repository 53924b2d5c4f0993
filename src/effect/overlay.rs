//! Sticker overlays: a cartoon character or a speech bubble, dragged around
//! the frame and alpha-blended over the preview.

use super::{copy_frame, Effect, EffectParams, FrameGeometry, ParamSpec, Transform};
use crate::error::EffectError;

/// Sticker names accepted by the `sticker` parameter
pub const STICKERS: &[&str] = &["character", "speech"];

const PARAMS: &[ParamSpec] = &[
    ParamSpec::choice("sticker", STICKERS, "character"),
    ParamSpec::range("x", 0.0, 1.0, 0.5),
    ParamSpec::range("y", 0.0, 1.0, 0.5),
    ParamSpec::range("scale", 0.1, 1.0, 0.4),
];

pub struct OverlayEffect;

impl Effect for OverlayEffect {
    fn name(&self) -> &'static str {
        "overlay"
    }

    fn params(&self) -> &'static [ParamSpec] {
        PARAMS
    }

    fn cost_per_pixel_ns(&self, params: &EffectParams) -> f64 {
        let scale = params.number("scale") as f64;
        // Full-frame copy plus blending over the sticker's share of the frame
        0.3 + 3.0 * scale * scale
    }

    fn prepare(
        &self,
        params: &EffectParams,
        input: FrameGeometry,
    ) -> Result<Box<dyn Transform>, EffectError> {
        let size = ((input.width.min(input.height) as f32) * params.number("scale")).round() as u32;
        let size = size.max(1);
        let sprite = match params.choice("sticker") {
            "speech" => Sprite::speech_bubble(size),
            _ => Sprite::character(size),
        };

        // (x, y) is where the sticker's centre lands
        let left = (params.number("x") * input.width as f32).round() as i64 - sprite.width as i64 / 2;
        let top = (params.number("y") * input.height as f32).round() as i64 - sprite.height as i64 / 2;

        Ok(Box::new(StickerOverlay {
            geometry: input,
            sprite,
            left,
            top,
        }))
    }
}

/// Straight-alpha RGBA sprite
struct Sprite {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

impl Sprite {
    fn draw(width: u32, height: u32, shade: impl Fn(f32, f32) -> [u8; 4]) -> Self {
        let mut rgba = Vec::with_capacity(width as usize * height as usize * 4);
        for y in 0..height {
            for x in 0..width {
                // Normalised to [-1, 1] with the centre at the origin
                let u = (x as f32 + 0.5) / width as f32 * 2.0 - 1.0;
                let v = (y as f32 + 0.5) / height as f32 * 2.0 - 1.0;
                rgba.extend_from_slice(&shade(u, v));
            }
        }
        Self { width, height, rgba }
    }

    /// Round yellow face with eyes, blush and a wide grin
    fn character(size: u32) -> Self {
        Self::draw(size, size, |u, v| {
            let d = (u * u + v * v).sqrt();
            if d > 0.96 {
                return [0, 0, 0, 0];
            }
            if d > 0.9 {
                return [40, 30, 10, 255];
            }
            let eye = |ex: f32| ((u - ex).powi(2) + (v + 0.3).powi(2)).sqrt() < 0.13;
            if eye(-0.35) || eye(0.35) {
                return [30, 30, 30, 255];
            }
            let mouth_r = (u * u + (v - 0.05).powi(2)).sqrt();
            if v > 0.15 && (0.45..0.58).contains(&mouth_r) {
                return [150, 20, 30, 255];
            }
            let cheek = |cx: f32| ((u - cx).powi(2) + (v - 0.15).powi(2)).sqrt() < 0.14;
            if cheek(-0.6) || cheek(0.6) {
                return [250, 140, 140, 255];
            }
            [255, 214, 40, 255]
        })
    }

    /// White speech bubble with an outline, a tail and three dots
    fn speech_bubble(size: u32) -> Self {
        let height = (size * 3 / 4).max(1);
        Self::draw(size, height, |u, v| {
            // Ellipse occupies the upper part, tail pokes out bottom-left
            let ev = (v + 0.15) / 0.8;
            let e = (u * u + ev * ev).sqrt();
            let in_tail = v > 0.45 && u < -0.2 && u > -0.6 && (u + 0.6) > (v - 0.45) * 1.4;
            if e > 1.0 && !in_tail {
                return [0, 0, 0, 0];
            }
            if e > 0.92 && !in_tail {
                return [20, 20, 20, 255];
            }
            let dot = |dx: f32| ((u - dx).powi(2) + (ev).powi(2)).sqrt() < 0.09;
            if dot(-0.35) || dot(0.0) || dot(0.35) {
                return [20, 20, 20, 255];
            }
            [255, 255, 255, 240]
        })
    }
}

struct StickerOverlay {
    geometry: FrameGeometry,
    sprite: Sprite,
    left: i64,
    top: i64,
}

impl Transform for StickerOverlay {
    fn output(&self) -> FrameGeometry {
        self.geometry
    }

    fn apply(&self, input: &[u8], output: &mut [u8]) {
        copy_frame(input, output);

        let (fw, fh) = (self.geometry.width as i64, self.geometry.height as i64);
        let sw = self.sprite.width as i64;

        let x0 = self.left.max(0);
        let x1 = (self.left + sw).min(fw);
        let y0 = self.top.max(0);
        let y1 = (self.top + self.sprite.height as i64).min(fh);
        if x0 >= x1 || y0 >= y1 {
            return;
        }

        for y in y0..y1 {
            let sy = y - self.top;
            let src_row = &self.sprite.rgba[((sy * sw + (x0 - self.left)) * 4) as usize..][..((x1 - x0) * 4) as usize];
            let dst_row = &mut output[((y * fw + x0) * 4) as usize..][..((x1 - x0) * 4) as usize];
            for (dst, src) in dst_row.chunks_exact_mut(4).zip(src_row.chunks_exact(4)) {
                blend(dst, src);
            }
        }
    }
}

#[inline]
fn blend(dst: &mut [u8], src: &[u8]) {
    let a = src[3] as u32;
    if a == 0 {
        return;
    }
    let inv = 255 - a;
    for c in 0..3 {
        dst[c] = ((src[c] as u32 * a + dst[c] as u32 * inv + 127) / 255) as u8;
    }
    dst[3] = 255;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::EffectDescriptor;

    fn run(descriptor: &EffectDescriptor, geometry: FrameGeometry) -> Vec<u8> {
        let params = EffectParams::resolve("overlay", PARAMS, descriptor).unwrap();
        let transform = OverlayEffect.prepare(&params, geometry).unwrap();
        let input = vec![10u8; geometry.frame_len()];
        let mut output = vec![0u8; geometry.frame_len()];
        transform.apply(&input, &mut output);
        output
    }

    #[test]
    fn sticker_lands_at_requested_position() {
        let geometry = FrameGeometry::new(100, 100);
        let output = run(
            &EffectDescriptor::new("overlay")
                .with("x", 0.25)
                .with("y", 0.25)
                .with("scale", 0.3),
            geometry,
        );
        let px = |x: usize, y: usize| &output[(y * 100 + x) * 4..][..4];

        // Face colour near the sticker centre, untouched frame far away
        assert_ne!(px(25, 25), &[10, 10, 10, 10]);
        assert_eq!(px(90, 90), &[10, 10, 10, 10]);
    }

    #[test]
    fn sticker_partly_off_frame_is_clipped() {
        let geometry = FrameGeometry::new(50, 40);
        let output = run(
            &EffectDescriptor::new("overlay")
                .with("sticker", "speech")
                .with("x", 1.0)
                .with("y", 0.0),
            geometry,
        );
        assert_eq!(output.len(), geometry.frame_len());
    }

    #[test]
    fn blend_respects_alpha() {
        let mut dst = [0, 0, 0, 255];
        blend(&mut dst, &[255, 255, 255, 0]);
        assert_eq!(dst, [0, 0, 0, 255]);
        blend(&mut dst, &[255, 255, 255, 255]);
        assert_eq!(dst, [255, 255, 255, 255]);
    }
}
