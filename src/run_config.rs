//! On-disk backtest run configuration (spec §6). A caller-authored JSON
//! file names the strategy, the training/validation periods, the
//! securities universe, and the parameters to optimize over; this module
//! loads and validates it into the types the pipeline consumes directly.

use crate::errors::CoreError;
use crate::params::{ParamKind, ParamValue, ParameterDefinition};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Period {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptimizableParameterSpec {
    #[serde(rename = "type")]
    kind: ParamKind,
    min_value: Option<ParamValue>,
    max_value: Option<ParamValue>,
    step_value: Option<ParamValue>,
}

/// Deserialized shape of the on-disk JSON (spec §6). Property names are
/// camelCase in the file; `load` normalizes key casing before parsing, so
/// this struct itself only has to match canonical camelCase.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestRunConfig {
    pub strategy_name: String,
    pub strategy_version: String,
    training_period: Period,
    validation_period: Period,
    pub securities: Vec<String>,
    optimizable_parameters: HashMap<String, OptimizableParameterSpec>,
    pub history_path: PathBuf,
    pub initial_capital: Decimal,
    pub trade_volume: Decimal,
}

impl BacktestRunConfig {
    /// Reads and parses the on-disk configuration. Deserialization is
    /// case-insensitive on the fixed structural keys (spec §6); parameter
    /// names inside `optimizableParameters` are left exactly as written,
    /// since those are caller-chosen identifiers, not protocol fields.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CoreError::InvalidArgument(format!("reading {}: {e}", path.display())))?;
        let mut value: Value = serde_json::from_str(&raw)
            .map_err(|e| CoreError::InvalidArgument(format!("parsing {}: {e}", path.display())))?;
        normalize_keys(&mut value);
        serde_json::from_value(value)
            .map_err(|e| CoreError::InvalidArgument(format!("invalid run configuration: {e}")))
    }

    #[must_use]
    pub fn training_start(&self) -> DateTime<Utc> {
        self.training_period.start
    }

    #[must_use]
    pub fn training_end(&self) -> DateTime<Utc> {
        self.training_period.end
    }

    #[must_use]
    pub fn validation_start(&self) -> DateTime<Utc> {
        self.validation_period.start
    }

    #[must_use]
    pub fn validation_end(&self) -> DateTime<Utc> {
        self.validation_period.end
    }

    /// Converts `optimizableParameters` into the pipeline's
    /// [`ParameterDefinition`] list, validating each one the same way a
    /// hand-built definition would be (spec §4.1).
    pub fn parameter_definitions(&self) -> Result<Vec<ParameterDefinition>, CoreError> {
        self.optimizable_parameters
            .iter()
            .map(|(name, spec)| {
                ParameterDefinition::new(
                    name.clone(),
                    spec.kind,
                    spec.min_value,
                    spec.max_value,
                    None,
                    spec.step_value,
                    true,
                )
            })
            .collect()
    }
}

/// Canonical camelCase names for every structural (non-parameter-name) key
/// this config format uses, at any nesting depth.
const STRUCTURAL_KEYS: &[&str] = &[
    "strategyName",
    "strategyVersion",
    "trainingPeriod",
    "validationPeriod",
    "securities",
    "optimizableParameters",
    "historyPath",
    "initialCapital",
    "tradeVolume",
    "start",
    "end",
    "type",
    "minValue",
    "maxValue",
    "stepValue",
];

/// Rewrites object keys to their canonical casing wherever they match a
/// known structural key case-insensitively, recursing into every nested
/// object and array. Keys under `optimizableParameters` that don't match a
/// structural name (i.e. the parameter names themselves) are left alone.
fn normalize_keys(value: &mut Value) {
    match value {
        Value::Object(map) => {
            let old = std::mem::take(map);
            for (key, mut child) in old {
                normalize_keys(&mut child);
                let canonical = STRUCTURAL_KEYS
                    .iter()
                    .find(|k| k.eq_ignore_ascii_case(&key))
                    .map_or(key, |k| (*k).to_string());
                map.insert(canonical, child);
            }
        }
        Value::Array(items) => {
            for item in items {
                normalize_keys(item);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_fixture(json: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(json.as_bytes()).unwrap();
        f
    }

    #[test]
    fn loads_well_formed_config() {
        let json = r#"{
            "strategyName": "movingAverageCross",
            "strategyVersion": "1.2.0",
            "trainingPeriod": {"start": "2024-01-01T00:00:00Z", "end": "2024-06-01T00:00:00Z"},
            "validationPeriod": {"start": "2024-06-01T00:00:00Z", "end": "2024-09-01T00:00:00Z"},
            "securities": ["AAPL", "MSFT"],
            "optimizableParameters": {
                "fast": {"type": "integer", "minValue": 5, "maxValue": 20, "stepValue": 1},
                "slow": {"type": "integer", "minValue": 20, "maxValue": 60, "stepValue": 5}
            },
            "historyPath": "/data/history",
            "initialCapital": "100000.00",
            "tradeVolume": "1000"
        }"#;
        let f = write_fixture(json);
        let config = BacktestRunConfig::load(f.path()).unwrap();
        assert_eq!(config.strategy_name, "movingAverageCross");
        assert_eq!(config.securities, vec!["AAPL", "MSFT"]);
        assert_eq!(config.initial_capital, Decimal::new(10000000, 2));

        let defs = config.parameter_definitions().unwrap();
        assert_eq!(defs.len(), 2);
    }

    #[test]
    fn deserialization_is_case_insensitive_on_structural_keys() {
        let json = r#"{
            "StrategyName": "x",
            "strategyversion": "1.0.0",
            "TRAININGPERIOD": {"Start": "2024-01-01T00:00:00Z", "END": "2024-02-01T00:00:00Z"},
            "validationPeriod": {"start": "2024-02-01T00:00:00Z", "end": "2024-03-01T00:00:00Z"},
            "securities": [],
            "optimizableParameters": {},
            "historyPath": "/data",
            "initialCapital": "1",
            "tradeVolume": "1"
        }"#;
        let f = write_fixture(json);
        let config = BacktestRunConfig::load(f.path()).unwrap();
        assert_eq!(config.strategy_name, "x");
        assert_eq!(config.strategy_version, "1.0.0");
    }

    #[test]
    fn rejects_unknown_param_kind() {
        let json = r#"{
            "strategyName": "x",
            "strategyVersion": "1.0.0",
            "trainingPeriod": {"start": "2024-01-01T00:00:00Z", "end": "2024-02-01T00:00:00Z"},
            "validationPeriod": {"start": "2024-02-01T00:00:00Z", "end": "2024-03-01T00:00:00Z"},
            "securities": [],
            "optimizableParameters": {
                "fast": {"type": "imaginary", "minValue": 1, "maxValue": 2, "stepValue": 1}
            },
            "historyPath": "/data",
            "initialCapital": "1",
            "tradeVolume": "1"
        }"#;
        let f = write_fixture(json);
        assert!(BacktestRunConfig::load(f.path()).is_err());
    }
}
