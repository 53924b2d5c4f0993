//! Colour curves as per-channel lookup tables

pub const CURVES: &[&str] = &["none", "warm", "cool", "pop", "mono"];

/// Precomputed colour curve
#[derive(Clone)]
pub struct CurveLut {
    r: [u8; 256],
    g: [u8; 256],
    b: [u8; 256],
    mono: bool,
    identity: bool,
}

impl CurveLut {
    /// Build the named curve; unknown names fall back to identity
    pub fn named(name: &str) -> Self {
        let identity = table(|v| v);
        match name {
            "warm" => Self::new(table(|v| v * 1.12 + 6.0), identity, table(|v| v * 0.85), false),
            "cool" => Self::new(table(|v| v * 0.88), identity, table(|v| v * 1.12 + 6.0), false),
            "pop" => {
                let s = table(s_curve);
                Self::new(s, s, s, false)
            }
            "mono" => Self::new(identity, identity, identity, true),
            _ => Self::new(identity, identity, identity, false),
        }
    }

    fn new(r: [u8; 256], g: [u8; 256], b: [u8; 256], mono: bool) -> Self {
        let identity = !mono && [r, g, b].iter().all(|t| t.iter().enumerate().all(|(i, v)| *v as usize == i));
        Self {
            r,
            g,
            b,
            mono,
            identity,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.identity
    }

    /// Apply in place to one RGBA pixel
    #[inline]
    pub fn apply(&self, px: &mut [u8]) {
        if self.mono {
            // BT.601 luma
            let y = ((77 * px[0] as u32 + 150 * px[1] as u32 + 29 * px[2] as u32 + 128) >> 8) as u8;
            px[0] = y;
            px[1] = y;
            px[2] = y;
            return;
        }
        px[0] = self.r[px[0] as usize];
        px[1] = self.g[px[1] as usize];
        px[2] = self.b[px[2] as usize];
    }
}

fn table(f: impl Fn(f32) -> f32) -> [u8; 256] {
    let mut t = [0u8; 256];
    for (i, slot) in t.iter_mut().enumerate() {
        *slot = f(i as f32).round().clamp(0.0, 255.0) as u8;
    }
    t
}

/// Contrast boost around mid-grey
fn s_curve(v: f32) -> f32 {
    let x = v / 255.0;
    let y = if x < 0.5 {
        2.0 * x * x
    } else {
        1.0 - 2.0 * (1.0 - x) * (1.0 - x)
    };
    // Blend halfway so highlights keep detail
    (0.5 * x + 0.5 * y) * 255.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_identity() {
        assert!(CurveLut::named("none").is_identity());
        assert!(!CurveLut::named("warm").is_identity());
    }

    #[test]
    fn mono_equalises_channels() {
        let lut = CurveLut::named("mono");
        let mut px = [200, 10, 90, 255];
        lut.apply(&mut px);
        assert_eq!(px[0], px[1]);
        assert_eq!(px[1], px[2]);
        assert_eq!(px[3], 255);
    }

    #[test]
    fn pop_keeps_extremes() {
        let lut = CurveLut::named("pop");
        let mut black = [0, 0, 0, 255];
        let mut white = [255, 255, 255, 255];
        lut.apply(&mut black);
        lut.apply(&mut white);
        assert_eq!(black, [0, 0, 0, 255]);
        assert_eq!(white, [255, 255, 255, 255]);
    }
}
