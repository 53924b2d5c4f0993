//! Keyboard-driven effect selection for the preview window

use crate::effect::{EffectDescriptor, CURVES, STICKERS};

/// Effects reachable from the number keys, in key order
pub const EFFECT_KEYS: [&str; 3] = ["normal", "warp", "overlay"];

/// Current descriptor as edited from the keyboard
#[derive(Debug, Clone)]
pub struct EffectControls {
    current: EffectDescriptor,
}

impl EffectControls {
    pub fn new(initial: EffectDescriptor) -> Self {
        Self { current: initial }
    }

    pub fn descriptor(&self) -> &EffectDescriptor {
        &self.current
    }

    /// Switch to the effect bound to number key `key` (1-based)
    pub fn select(&mut self, key: usize) -> Option<&EffectDescriptor> {
        let name = *EFFECT_KEYS.get(key.checked_sub(1)?)?;
        if self.current.effect == name {
            return None;
        }
        self.current = EffectDescriptor::new(name);
        Some(&self.current)
    }

    /// Arrow keys: warp strength/radius, or sticker position
    pub fn nudge(&mut self, dx: f32, dy: f32) -> Option<&EffectDescriptor> {
        match self.current.effect.as_str() {
            "warp" => {
                let strength = self.current.number("strength").unwrap_or(0.5);
                let radius = self.current.number("radius").unwrap_or(0.35);
                self.set("strength", (strength - dy * 0.1).clamp(-1.0, 1.0));
                self.set("radius", (radius + dx * 0.05).clamp(0.05, 1.0));
            }
            "overlay" => {
                let x = self.current.number("x").unwrap_or(0.5);
                let y = self.current.number("y").unwrap_or(0.5);
                self.set("x", (x + dx * 0.05).clamp(0.0, 1.0));
                self.set("y", (y + dy * 0.05).clamp(0.0, 1.0));
            }
            _ => return None,
        }
        Some(&self.current)
    }

    /// `C`: next colour curve, or the other sticker
    pub fn cycle(&mut self) -> Option<&EffectDescriptor> {
        let (name, options): (&str, &[&str]) = match self.current.effect.as_str() {
            "warp" => ("curve", CURVES),
            "overlay" => ("sticker", STICKERS),
            _ => return None,
        };
        let current = self.current.choice(name).unwrap_or(options[0]);
        let index = options.iter().position(|o| *o == current).unwrap_or(0);
        let next = options[(index + 1) % options.len()];
        self.current.params.insert(name.into(), next.into());
        Some(&self.current)
    }

    fn set(&mut self, name: &str, value: f32) {
        self.current.params.insert(name.into(), value.into());
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::effect::{EffectEngine, FrameGeometry};

    #[test]
    fn number_keys_select_effects() {
        let mut controls = EffectControls::new(EffectDescriptor::new("normal"));
        assert!(controls.select(1).is_none());
        assert_eq!(controls.select(3).map(|d| d.effect.clone()), Some("overlay".into()));
        assert!(controls.select(4).is_none());
        assert!(controls.select(0).is_none());
    }

    #[test]
    fn arrows_stay_within_parameter_ranges() {
        let mut controls = EffectControls::new(EffectDescriptor::new("overlay"));
        for _ in 0..40 {
            controls.nudge(1.0, -1.0);
        }
        assert_eq!(controls.descriptor().number("x"), Some(1.0));
        assert_eq!(controls.descriptor().number("y"), Some(0.0));

        let mut controls = EffectControls::new(EffectDescriptor::new("warp"));
        controls.nudge(0.0, -1.0);
        let strength = controls.descriptor().number("strength").unwrap();
        assert!((strength - 0.6).abs() < 1e-6);
    }

    #[test]
    fn cycle_wraps_around() {
        let mut controls = EffectControls::new(EffectDescriptor::new("overlay"));
        controls.cycle();
        assert_eq!(controls.descriptor().choice("sticker"), Some("speech"));
        controls.cycle();
        assert_eq!(controls.descriptor().choice("sticker"), Some("character"));
        assert!(EffectControls::new(EffectDescriptor::new("normal")).cycle().is_none());
    }

    #[test]
    fn cycle_visits_every_curve_the_warp_accepts() {
        let engine = EffectEngine::with_builtin_effects(Duration::from_millis(33));
        let mut controls = EffectControls::new(EffectDescriptor::new("warp"));
        let mut seen = Vec::new();
        for _ in 0..CURVES.len() {
            let descriptor = controls.cycle().cloned().unwrap();
            engine
                .configure(&descriptor, FrameGeometry::new(64, 48))
                .unwrap();
            seen.push(descriptor.choice("curve").unwrap().to_string());
        }
        seen.sort();
        let mut expected: Vec<String> = CURVES.iter().map(|c| c.to_string()).collect();
        expected.sort();
        assert_eq!(seen, expected);
    }
}
