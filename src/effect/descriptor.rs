//! Effect descriptors and parameter domains

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::EffectError;

/// Parameter value supplied by the UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f32),
    Choice(String),
}

impl From<f32> for ParamValue {
    fn from(value: f32) -> Self {
        ParamValue::Number(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Choice(value.to_owned())
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Number(n) => write!(f, "{n}"),
            ParamValue::Choice(c) => f.write_str(c),
        }
    }
}

/// Named, parameterised selection of an effect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectDescriptor {
    pub effect: String,
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
}

impl EffectDescriptor {
    pub fn new(effect: impl Into<String>) -> Self {
        Self {
            effect: effect.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn number(&self, name: &str) -> Option<f32> {
        match self.params.get(name)? {
            ParamValue::Number(n) => Some(*n),
            ParamValue::Choice(_) => None,
        }
    }

    pub fn choice(&self, name: &str) -> Option<&str> {
        match self.params.get(name)? {
            ParamValue::Choice(c) => Some(c),
            ParamValue::Number(_) => None,
        }
    }
}

impl Default for EffectDescriptor {
    fn default() -> Self {
        EffectDescriptor::new("warp").with("strength", 0.5)
    }
}

impl fmt::Display for EffectDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.effect)?;
        for (i, (name, value)) in self.params.iter().enumerate() {
            let sep = if i == 0 { ':' } else { ',' };
            write!(f, "{sep}{name}={value}")?;
        }
        Ok(())
    }
}

/// Parses `name[:key=value,...]`, e.g. `warp:strength=0.5,curve=warm`
impl FromStr for EffectDescriptor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, rest) = match s.split_once(':') {
            Some((name, rest)) => (name, Some(rest)),
            None => (s, None),
        };
        let name = name.trim();
        if name.is_empty() {
            return Err("missing effect name".into());
        }

        let mut descriptor = EffectDescriptor::new(name);
        for pair in rest.into_iter().flat_map(|r| r.split(',')).filter(|p| !p.trim().is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| format!("expected key=value, got '{pair}'"))?;
            let value = match value.trim().parse::<f32>() {
                Ok(n) => ParamValue::Number(n),
                Err(_) => ParamValue::Choice(value.trim().to_owned()),
            };
            descriptor.params.insert(key.trim().to_owned(), value);
        }
        Ok(descriptor)
    }
}

/// Declared domain of one parameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamDomain {
    Range { min: f32, max: f32, default: f32 },
    Choice {
        options: &'static [&'static str],
        default: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub domain: ParamDomain,
}

impl ParamSpec {
    pub const fn range(name: &'static str, min: f32, max: f32, default: f32) -> Self {
        Self {
            name,
            domain: ParamDomain::Range { min, max, default },
        }
    }

    pub const fn choice(
        name: &'static str,
        options: &'static [&'static str],
        default: &'static str,
    ) -> Self {
        Self {
            name,
            domain: ParamDomain::Choice { options, default },
        }
    }
}

/// Parameters validated against an effect's declared domain
///
/// Every declared parameter is present; numbers are clamped into range.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectParams {
    values: BTreeMap<&'static str, ParamValue>,
}

impl EffectParams {
    pub fn resolve(
        effect: &str,
        specs: &[ParamSpec],
        descriptor: &EffectDescriptor,
    ) -> Result<Self, EffectError> {
        for name in descriptor.params.keys() {
            if !specs.iter().any(|s| s.name == name.as_str()) {
                warn!(effect, param = %name, "Ignoring unknown effect parameter");
            }
        }

        let invalid = |name: &str, reason: String| EffectError::InvalidParameter {
            effect: effect.to_owned(),
            name: name.to_owned(),
            reason,
        };

        let mut values = BTreeMap::new();
        for spec in specs {
            let supplied = descriptor.params.get(spec.name);
            let value = match (spec.domain, supplied) {
                (ParamDomain::Range { default, .. }, None) => ParamValue::Number(default),
                (ParamDomain::Range { min, max, .. }, Some(ParamValue::Number(n))) => {
                    if !n.is_finite() {
                        return Err(invalid(spec.name, format!("{n} is not a finite number")));
                    }
                    ParamValue::Number(n.clamp(min, max))
                }
                (ParamDomain::Range { .. }, Some(ParamValue::Choice(c))) => {
                    return Err(invalid(spec.name, format!("expected a number, got '{c}'")));
                }
                (ParamDomain::Choice { default, .. }, None) => ParamValue::Choice(default.into()),
                (ParamDomain::Choice { options, .. }, Some(ParamValue::Choice(c))) => {
                    if !options.contains(&c.as_str()) {
                        return Err(invalid(
                            spec.name,
                            format!("'{c}' is not one of {}", options.join("|")),
                        ));
                    }
                    ParamValue::Choice(c.clone())
                }
                (ParamDomain::Choice { .. }, Some(ParamValue::Number(n))) => {
                    return Err(invalid(spec.name, format!("expected a choice, got {n}")));
                }
            };
            values.insert(spec.name, value);
        }

        Ok(Self { values })
    }

    /// Declared numeric parameter; 0.0 if the effect never declared it
    pub fn number(&self, name: &str) -> f32 {
        match self.values.get(name) {
            Some(ParamValue::Number(n)) => *n,
            _ => 0.0,
        }
    }

    /// Declared choice parameter; empty if the effect never declared it
    pub fn choice(&self, name: &str) -> &str {
        match self.values.get(name) {
            Some(ParamValue::Choice(c)) => c,
            _ => "",
        }
    }

    /// The descriptor as it will actually be applied
    pub fn to_descriptor(&self, effect: &str) -> EffectDescriptor {
        EffectDescriptor {
            effect: effect.to_owned(),
            params: self
                .values
                .iter()
                .map(|(k, v)| ((*k).to_owned(), v.clone()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPECS: &[ParamSpec] = &[
        ParamSpec::range("strength", -1.0, 1.0, 0.5),
        ParamSpec::choice("curve", &["none", "warm"], "none"),
    ];

    #[test]
    fn numbers_are_clamped_and_defaults_filled() {
        let descriptor = EffectDescriptor::new("warp").with("strength", 7.0);
        let params = EffectParams::resolve("warp", SPECS, &descriptor).unwrap();
        assert_eq!(params.number("strength"), 1.0);
        assert_eq!(params.choice("curve"), "none");
    }

    #[test]
    fn unknown_choice_is_rejected() {
        let descriptor = EffectDescriptor::new("warp").with("curve", "sepia");
        let err = EffectParams::resolve("warp", SPECS, &descriptor).unwrap_err();
        assert!(matches!(err, EffectError::InvalidParameter { ref name, .. } if name == "curve"));
    }

    #[test]
    fn nan_is_rejected() {
        let descriptor = EffectDescriptor::new("warp").with("strength", f32::NAN);
        assert!(EffectParams::resolve("warp", SPECS, &descriptor).is_err());
    }

    #[test]
    fn parses_cli_syntax() {
        let descriptor: EffectDescriptor = "warp:strength=0.25,curve=warm".parse().unwrap();
        assert_eq!(descriptor.effect, "warp");
        assert_eq!(descriptor.number("strength"), Some(0.25));
        assert_eq!(descriptor.choice("curve"), Some("warm"));
        assert_eq!(descriptor.to_string(), "warp:curve=warm,strength=0.25");

        let bare: EffectDescriptor = "normal".parse().unwrap();
        assert!(bare.params.is_empty());
        assert!("warp:strength".parse::<EffectDescriptor>().is_err());
    }
}
