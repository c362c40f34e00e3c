//! Immutable pipeline context: spec §4.4/§9. Each phase consumes a context
//! and returns a new one with additional fields populated; earlier fields
//! are never mutated in place. `Diagnostics` accumulates per-phase timing
//! and counts via a functional merge.

use crate::metrics::PerformanceMetrics;
use crate::params::{ParameterDefinition, ParameterSet, ParameterSpaceExplorer};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Threshold applied to a named [`PerformanceMetrics`] field during the
/// filtering phase (spec §4.4 phase 3).
#[derive(Debug, Clone)]
pub struct MetricThreshold {
    pub field: MetricField,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricField {
    TotalReturn,
    AnnualizedReturn,
    Sharpe,
    Sortino,
    MaxDrawdown,
    WinRate,
    ProfitFactor,
}

impl MetricField {
    #[must_use]
    pub fn extract(self, m: &PerformanceMetrics) -> f64 {
        match self {
            MetricField::TotalReturn => m.total_return,
            MetricField::AnnualizedReturn => m.annualized_return,
            MetricField::Sharpe => m.sharpe,
            MetricField::Sortino => m.sortino,
            MetricField::MaxDrawdown => m.max_drawdown,
            MetricField::WinRate => m.win_rate,
            MetricField::ProfitFactor => m.profit_factor,
        }
    }
}

/// The immutable parameters of one pipeline run. Everything a phase needs
/// to know about "what to run" lives here; "what's been computed so far"
/// lives in [`PipelineContext`].
pub struct PipelineConfig {
    pub definitions: Vec<ParameterDefinition>,
    pub securities: Vec<String>,
    pub training_start: chrono::DateTime<chrono::Utc>,
    pub training_end: chrono::DateTime<chrono::Utc>,
    pub initial_capital: Decimal,
    pub trade_volume: Decimal,
    pub parallel_workers: usize,
    pub metric_filters: Vec<MetricThreshold>,
    pub export_dir: PathBuf,
}

/// One parameter set's outcome. Keyed by parameter hash in the context's
/// `optimization_results` map. Created once by the optimization phase,
/// never mutated afterward (spec §3).
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationResult {
    pub parameter_hash: String,
    #[serde(skip)]
    pub parameters: ParameterSet,
    pub training_metrics: Option<PerformanceMetrics>,
    pub validation_metrics: Option<PerformanceMetrics>,
    pub error: Option<String>,
    pub export_path: Option<PathBuf>,
}

/// Functional accumulator of per-phase timing and counts. `merge` never
/// drops an existing entry; later phases only add.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    entries: HashMap<String, DiagnosticEntry>,
}

#[derive(Debug, Clone)]
pub struct DiagnosticEntry {
    pub elapsed: Duration,
    pub count: usize,
}

impl Diagnostics {
    #[must_use]
    pub fn merged(&self, phase: &str, entry: DiagnosticEntry) -> Self {
        let mut entries = self.entries.clone();
        entries.insert(phase.to_string(), entry);
        Self { entries }
    }

    #[must_use]
    pub fn get(&self, phase: &str) -> Option<&DiagnosticEntry> {
        self.entries.get(phase)
    }
}

/// The conceptually-immutable pipeline context threaded through every
/// phase. Each phase function takes a `&PipelineContext` (or owned, since
/// phases run sequentially and the prior context is otherwise unused) and
/// returns a new one with its own field populated; prior fields are copied
/// forward untouched — no phase mutates a field it didn't itself populate.
pub struct PipelineContext {
    pub config: Arc<PipelineConfig>,
    /// The validated explorer over `config.definitions`, not a materialized
    /// combination list — phase 2 streams combinations out of this lazily
    /// (spec §4.2/§9: the Cartesian product must never be fully
    /// materialized in memory).
    pub explorer: Option<Arc<ParameterSpaceExplorer>>,
    pub optimization_results: Option<Arc<HashMap<String, OptimizationResult>>>,
    pub filtered_results: Option<Arc<Vec<OptimizationResult>>>,
    pub export_paths: Option<Arc<Vec<PathBuf>>>,
    pub diagnostics: Diagnostics,
}

impl PipelineContext {
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config: Arc::new(config),
            explorer: None,
            optimization_results: None,
            filtered_results: None,
            export_paths: None,
            diagnostics: Diagnostics::default(),
        }
    }

    /// Records phase 1's output: the validated explorer plus the total
    /// combination count it reports (for diagnostics only — never used to
    /// size an allocation).
    #[must_use]
    pub fn with_explorer(&self, explorer: ParameterSpaceExplorer, total_combinations: i64, elapsed: Duration) -> Self {
        Self {
            config: Arc::clone(&self.config),
            explorer: Some(Arc::new(explorer)),
            optimization_results: self.optimization_results.clone(),
            filtered_results: self.filtered_results.clone(),
            export_paths: self.export_paths.clone(),
            diagnostics: self.diagnostics.merged(
                "generate",
                DiagnosticEntry {
                    elapsed,
                    count: total_combinations.max(0) as usize,
                },
            ),
        }
    }

    #[must_use]
    pub fn with_optimization_results(
        &self,
        results: HashMap<String, OptimizationResult>,
        elapsed: Duration,
    ) -> Self {
        Self {
            config: Arc::clone(&self.config),
            explorer: self.explorer.clone(),
            optimization_results: Some(Arc::new(results.clone())),
            filtered_results: self.filtered_results.clone(),
            export_paths: self.export_paths.clone(),
            diagnostics: self.diagnostics.merged(
                "optimize",
                DiagnosticEntry {
                    elapsed,
                    count: results.len(),
                },
            ),
        }
    }

    #[must_use]
    pub fn with_filtered_results(&self, results: Vec<OptimizationResult>, elapsed: Duration) -> Self {
        Self {
            config: Arc::clone(&self.config),
            explorer: self.explorer.clone(),
            optimization_results: self.optimization_results.clone(),
            filtered_results: Some(Arc::new(results.clone())),
            export_paths: self.export_paths.clone(),
            diagnostics: self.diagnostics.merged(
                "filter",
                DiagnosticEntry {
                    elapsed,
                    count: results.len(),
                },
            ),
        }
    }

    #[must_use]
    pub fn with_export_paths(&self, paths: Vec<PathBuf>, elapsed: Duration) -> Self {
        Self {
            config: Arc::clone(&self.config),
            explorer: self.explorer.clone(),
            optimization_results: self.optimization_results.clone(),
            filtered_results: self.filtered_results.clone(),
            export_paths: Some(Arc::new(paths.clone())),
            diagnostics: self.diagnostics.merged(
                "export",
                DiagnosticEntry {
                    elapsed,
                    count: paths.len(),
                },
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> PipelineConfig {
        PipelineConfig {
            definitions: Vec::new(),
            securities: vec!["AAPL".to_string()],
            training_start: chrono::Utc::now(),
            training_end: chrono::Utc::now(),
            initial_capital: Decimal::new(10000, 0),
            trade_volume: Decimal::new(100, 0),
            parallel_workers: 4,
            metric_filters: Vec::new(),
            export_dir: PathBuf::from("/tmp/export"),
        }
    }

    #[test]
    fn earlier_phase_fields_survive_later_phase_transitions() {
        use crate::params::value::{ParamKind, ParamValue};

        let def = ParameterDefinition::new(
            "x",
            ParamKind::Integer,
            Some(ParamValue::Integer(1)),
            Some(ParamValue::Integer(1)),
            None,
            Some(ParamValue::Integer(1)),
            true,
        )
        .unwrap();
        let explorer = ParameterSpaceExplorer::new(&[def]).unwrap();

        let ctx = PipelineContext::new(sample_config());
        let ctx = ctx.with_explorer(explorer, 1, Duration::from_millis(1));
        let ctx = ctx.with_optimization_results(HashMap::new(), Duration::from_millis(1));
        assert!(ctx.explorer.is_some());
        assert_eq!(ctx.diagnostics.get("generate").unwrap().count, 1);
        assert!(ctx.diagnostics.get("generate").is_some());
        assert!(ctx.diagnostics.get("optimize").is_some());
    }
}
