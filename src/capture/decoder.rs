//! Device format → RGBA conversion

use thiserror::Error;
use zune_jpeg::JpegDecoder;

use super::frame::PixelFormat;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("JPEG decode failed: {0}")]
    Jpeg(String),

    #[error("decoded {got_width}x{got_height}, expected {width}x{height}")]
    Dimensions {
        width: u32,
        height: u32,
        got_width: usize,
        got_height: usize,
    },

    #[error("source buffer too short: {got} bytes, need {expected}")]
    Truncated { expected: usize, got: usize },
}

/// Decode one device frame into tightly packed RGBA
pub fn decode_into(
    data: &[u8],
    format: PixelFormat,
    width: u32,
    height: u32,
    out: &mut [u8],
) -> Result<(), DecodeError> {
    let pixels = width as usize * height as usize;
    let out = &mut out[..pixels * 4];

    if let Some(bpp) = format.bytes_per_pixel() {
        let expected = pixels * bpp as usize;
        if data.len() < expected {
            return Err(DecodeError::Truncated {
                expected,
                got: data.len(),
            });
        }
    }

    match format {
        PixelFormat::Mjpeg => {
            let mut decoder = JpegDecoder::new(data);
            let rgb = decoder.decode().map_err(|e| DecodeError::Jpeg(e.to_string()))?;
            if let Some((w, h)) = decoder.dimensions() {
                if w != width as usize || h != height as usize {
                    return Err(DecodeError::Dimensions {
                        width,
                        height,
                        got_width: w,
                        got_height: h,
                    });
                }
            }
            rgb_to_rgba(&rgb, out, pixels)
        }
        PixelFormat::Rgb24 => rgb_to_rgba(data, out, pixels),
        PixelFormat::Rgba8 => {
            out.copy_from_slice(&data[..pixels * 4]);
            Ok(())
        }
        PixelFormat::Yuyv4 => yuyv_to_rgba(data, out, pixels),
    }
}

fn rgb_to_rgba(rgb: &[u8], out: &mut [u8], pixels: usize) -> Result<(), DecodeError> {
    let src = rgb.get(..pixels * 3).ok_or(DecodeError::Truncated {
        expected: pixels * 3,
        got: rgb.len(),
    })?;
    for (dst, px) in out.chunks_exact_mut(4).zip(src.chunks_exact(3)) {
        dst[..3].copy_from_slice(px);
        dst[3] = 255;
    }
    Ok(())
}

/// BT.601 limited-range YUYV (YUY2) to RGBA
fn yuyv_to_rgba(yuyv: &[u8], out: &mut [u8], pixels: usize) -> Result<(), DecodeError> {
    let src = yuyv.get(..pixels * 2).ok_or(DecodeError::Truncated {
        expected: pixels * 2,
        got: yuyv.len(),
    })?;
    for (dst, quad) in out.chunks_exact_mut(8).zip(src.chunks_exact(4)) {
        let (y0, u, y1, v) = (quad[0], quad[1], quad[2], quad[3]);
        write_yuv(&mut dst[..4], y0, u, v);
        write_yuv(&mut dst[4..], y1, u, v);
    }
    Ok(())
}

#[inline]
fn write_yuv(dst: &mut [u8], y: u8, u: u8, v: u8) {
    let c = 298 * (y as i32 - 16);
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    dst[0] = ((c + 409 * e + 128) >> 8).clamp(0, 255) as u8;
    dst[1] = ((c - 100 * d - 208 * e + 128) >> 8).clamp(0, 255) as u8;
    dst[2] = ((c + 516 * d + 128) >> 8).clamp(0, 255) as u8;
    dst[3] = 255;
}

/// Encode RGBA as YUYV (used by the synthetic camera)
pub fn rgba_to_yuyv(rgba: &[u8], out: &mut Vec<u8>) {
    out.clear();
    for pair in rgba.chunks_exact(8) {
        let (y0, u0, v0) = rgb_to_yuv(pair[0], pair[1], pair[2]);
        let (y1, u1, v1) = rgb_to_yuv(pair[4], pair[5], pair[6]);
        let u = ((u0 as u16 + u1 as u16) / 2) as u8;
        let v = ((v0 as u16 + v1 as u16) / 2) as u8;
        out.extend_from_slice(&[y0, u, y1, v]);
    }
}

fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
    let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
    let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
    (
        y.clamp(0, 255) as u8,
        u.clamp(0, 255) as u8,
        v.clamp(0, 255) as u8,
    )
}
