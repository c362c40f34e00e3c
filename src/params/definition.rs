//! `ParameterDefinition`: spec §3/§4.1.

use super::value::{ParamKind, ParamValue};
use crate::errors::CoreError;
use serde::{Deserialize, Serialize};

/// A single optimizable parameter. Immutable after construction — invariants
/// are enforced once, in [`ParameterDefinition::new`], and never rechecked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub name: String,
    pub kind: ParamKind,
    pub min: Option<ParamValue>,
    pub max: Option<ParamValue>,
    pub default: Option<ParamValue>,
    pub step: Option<ParamValue>,
    pub required: bool,
}

impl ParameterDefinition {
    /// Construct and validate a definition.
    ///
    /// Invariants (spec §3): `min <= max`; `step > 0` if present; `default`
    /// (if set) lies in `[min, max]` and is step-aligned from `min`.
    pub fn new(
        name: impl Into<String>,
        kind: ParamKind,
        min: Option<ParamValue>,
        max: Option<ParamValue>,
        default: Option<ParamValue>,
        step: Option<ParamValue>,
        required: bool,
    ) -> Result<Self, CoreError> {
        if let (Some(min), Some(max)) = (&min, &max) {
            if min > max {
                return Err(CoreError::InvalidArgument(format!(
                    "min ({min}) must be <= max ({max})"
                )));
            }
        }
        if let Some(step) = &step {
            if step.as_f64() <= 0.0 {
                return Err(CoreError::InvalidArgument(
                    "step must be > 0 if present".to_string(),
                ));
            }
        }
        if let (Some(default), Some(min)) = (&default, &min) {
            if default < min {
                return Err(CoreError::InvalidArgument(
                    "default must be >= min".to_string(),
                ));
            }
            if let Some(max) = &max {
                if default > max {
                    return Err(CoreError::InvalidArgument(
                        "default must be <= max".to_string(),
                    ));
                }
            }
            if let Some(step) = &step {
                if !default.is_step_aligned(min, step) {
                    return Err(CoreError::InvalidArgument(
                        "default must be step-aligned from min".to_string(),
                    ));
                }
            }
        }
        Ok(Self {
            name: name.into(),
            kind,
            min,
            max,
            default,
            step,
            required,
        })
    }

    /// Bounded range with a positive step: the only shape the explorer can
    /// enumerate more than one value from.
    #[must_use]
    pub fn is_bounded(&self) -> bool {
        self.min.is_some() && self.max.is_some() && self.step.is_some()
    }

    /// `value_count` per spec §4.1: `⌊(max-min)/step⌋ + 1` for bounded
    /// ranges, `None` ("unknown") otherwise or on overflow.
    #[must_use]
    pub fn value_count(&self) -> Option<i64> {
        if !self.is_bounded() {
            return None;
        }
        let min = self.min.as_ref()?.as_f64();
        let max = self.max.as_ref()?.as_f64();
        let step = self.step.as_ref()?.as_f64();
        if step <= 0.0 || max < min {
            return None;
        }
        let count = ((max - min) / step).floor() + 1.0;
        if !count.is_finite() || count > i64::MAX as f64 {
            return None;
        }
        Some(count as i64)
    }

    /// Lazily emits `min, min+step, min+2*step, ..., <= max`. Unbounded
    /// ranges emit only `default` (if set), else nothing.
    #[must_use]
    pub fn generate_values(&self) -> Vec<ParamValue> {
        if self.is_bounded() {
            let Some(count) = self.value_count() else {
                return Vec::new();
            };
            let min = self.min.unwrap();
            let step = self.step.unwrap();
            (0..count).map(|i| min.add_step(&step, i)).collect()
        } else if let Some(default) = self.default {
            vec![default]
        } else {
            Vec::new()
        }
    }

    /// `validate` per spec §4.1: presence, range, and step-alignment.
    pub fn validate_value(&self, value: Option<&ParamValue>) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let Some(value) = value else {
            if self.required {
                errors.push(format!("missing required parameter '{}'", self.name));
            }
            return if errors.is_empty() { Ok(()) } else { Err(errors) };
        };
        if let Some(min) = &self.min {
            if value < min {
                errors.push(format!(
                    "'{}' value {value} is below minimum {min}",
                    self.name
                ));
            }
        }
        if let Some(max) = &self.max {
            if value > max {
                errors.push(format!(
                    "'{}' value {value} is above maximum {max}",
                    self.name
                ));
            }
        }
        if let (Some(min), Some(step)) = (&self.min, &self.step) {
            if !value.is_step_aligned(min, step) {
                errors.push(format!(
                    "'{}' value {value} is not step-aligned from {min} by {step}",
                    self.name
                ));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_def(min: i64, max: i64, step: i64) -> ParameterDefinition {
        ParameterDefinition::new(
            "x",
            ParamKind::Integer,
            Some(ParamValue::Integer(min)),
            Some(ParamValue::Integer(max)),
            None,
            Some(ParamValue::Integer(step)),
            true,
        )
        .unwrap()
    }

    #[test]
    fn value_count_matches_generated_values() {
        let def = int_def(1, 5, 1);
        assert_eq!(def.value_count(), Some(5));
        assert_eq!(def.generate_values().len(), 5);
    }

    #[test]
    fn rejects_min_greater_than_max() {
        let result = ParameterDefinition::new(
            "x",
            ParamKind::Integer,
            Some(ParamValue::Integer(5)),
            Some(ParamValue::Integer(1)),
            None,
            Some(ParamValue::Integer(1)),
            true,
        );
        assert!(result.is_err());
    }

    #[test]
    fn rejects_non_positive_step() {
        let result = ParameterDefinition::new(
            "x",
            ParamKind::Integer,
            Some(ParamValue::Integer(1)),
            Some(ParamValue::Integer(5)),
            None,
            Some(ParamValue::Integer(0)),
            true,
        );
        assert!(result.is_err());
    }

    #[test]
    fn every_emitted_value_in_range_and_aligned() {
        let def = int_def(0, 20, 3);
        for v in def.generate_values() {
            let f = v.as_f64();
            assert!((0.0..=20.0).contains(&f));
            assert_eq!((f as i64) % 3, 0);
        }
    }

    #[test]
    fn unbounded_emits_only_default() {
        let def = ParameterDefinition::new(
            "x",
            ParamKind::Integer,
            None,
            None,
            Some(ParamValue::Integer(7)),
            None,
            false,
        )
        .unwrap();
        assert_eq!(def.generate_values(), vec![ParamValue::Integer(7)]);
        assert_eq!(def.value_count(), None);
    }
}
