//! Tagged sum type over the three numeric parameter kinds (spec §9: "the
//! target should use a tagged sum type ... with exhaustive matches for
//! enumeration, validation, and hashing").

use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ParamKind {
    Integer,
    Decimal,
    Double,
}

/// A single numeric parameter value, tagged by kind. All arithmetic used by
/// the explorer and validator is delegated through the variant that matches
/// the owning definition's `ParamKind` — there is no heterogeneous
/// container, per spec §9.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Integer(i64),
    Decimal(Decimal),
    Double(f64),
}

impl ParamValue {
    #[must_use]
    pub fn kind(&self) -> ParamKind {
        match self {
            ParamValue::Integer(_) => ParamKind::Integer,
            ParamValue::Decimal(_) => ParamKind::Decimal,
            ParamValue::Double(_) => ParamKind::Double,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> f64 {
        match self {
            ParamValue::Integer(v) => *v as f64,
            ParamValue::Decimal(v) => v.to_string().parse().unwrap_or(0.0),
            ParamValue::Double(v) => *v,
        }
    }

    /// Canonical, culture-invariant numeric rendering used both for display
    /// and as the input to hashing (spec §3/§4.1): fixed precision, no
    /// locale-dependent grouping, full significant digits for `Decimal`.
    #[must_use]
    pub fn canonical_string(&self) -> String {
        match self {
            ParamValue::Integer(v) => v.to_string(),
            ParamValue::Decimal(v) => v.normalize().to_string(),
            ParamValue::Double(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    format!("{v:.1}")
                } else {
                    format!("{v:.17}")
                        .trim_end_matches('0')
                        .trim_end_matches('.')
                        .to_string()
                }
            }
        }
    }

    #[must_use]
    pub fn add_step(&self, step: &ParamValue, n: i64) -> ParamValue {
        match (self, step) {
            (ParamValue::Integer(base), ParamValue::Integer(s)) => {
                ParamValue::Integer(base + s * n)
            }
            (ParamValue::Decimal(base), ParamValue::Decimal(s)) => {
                ParamValue::Decimal(base + s * Decimal::from(n))
            }
            (ParamValue::Double(base), ParamValue::Double(s)) => {
                ParamValue::Double(base + s * n as f64)
            }
            _ => *self,
        }
    }

    /// `(value - min) mod step == 0`, per spec §4.1.
    #[must_use]
    pub fn is_step_aligned(&self, min: &ParamValue, step: &ParamValue) -> bool {
        match (self, min, step) {
            (ParamValue::Integer(v), ParamValue::Integer(m), ParamValue::Integer(s)) => {
                if *s == 0 {
                    return false;
                }
                (v - m) % s == 0
            }
            (ParamValue::Decimal(v), ParamValue::Decimal(m), ParamValue::Decimal(s)) => {
                if s.is_zero() {
                    return false;
                }
                ((v - m) % s).abs() < Decimal::new(1, 9)
            }
            (ParamValue::Double(v), ParamValue::Double(m), ParamValue::Double(s)) => {
                if *s == 0.0 {
                    return false;
                }
                let rem = (v - m) % s;
                rem.abs() < 1e-9 || (rem.abs() - s.abs()).abs() < 1e-9
            }
            _ => false,
        }
    }
}

impl PartialEq for ParamValue {
    fn eq(&self, other: &Self) -> bool {
        self.partial_cmp(other) == Some(Ordering::Equal)
    }
}

impl PartialOrd for ParamValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.as_f64().partial_cmp(&other.as_f64())
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical_string())
    }
}
