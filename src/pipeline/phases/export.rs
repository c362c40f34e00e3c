//! Phase 5 — Artifact Export: spec §4.4. Writes one report directory per
//! surviving result and returns the paths.

use crate::errors::CoreError;
use crate::pipeline::context::PipelineContext;
use serde::Serialize;
use std::time::Instant;

#[derive(Serialize)]
struct ReportFile<'a> {
    parameter_hash: &'a str,
    training_metrics: &'a Option<crate::metrics::PerformanceMetrics>,
    validation_metrics: &'a Option<crate::metrics::PerformanceMetrics>,
    error: &'a Option<String>,
}

pub fn export(ctx: &PipelineContext) -> Result<PipelineContext, CoreError> {
    let start = Instant::now();
    let results = ctx
        .filtered_results
        .clone()
        .ok_or_else(|| CoreError::InvalidArgument("export phase requires filtered_results".into()))?;

    std::fs::create_dir_all(&ctx.config.export_dir)
        .map_err(|e| CoreError::InvalidArgument(format!("failed to create export directory: {e}")))?;

    let mut paths = Vec::with_capacity(results.len());
    for result in results.iter() {
        let dir = ctx.config.export_dir.join(&result.parameter_hash);
        std::fs::create_dir_all(&dir)
            .map_err(|e| CoreError::InvalidArgument(format!("failed to create report directory: {e}")))?;

        let report = ReportFile {
            parameter_hash: &result.parameter_hash,
            training_metrics: &result.training_metrics,
            validation_metrics: &result.validation_metrics,
            error: &result.error,
        };
        let report_path = dir.join("report.json");
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| CoreError::InvalidArgument(format!("failed to serialize report: {e}")))?;
        std::fs::write(&report_path, json)
            .map_err(|e| CoreError::InvalidArgument(format!("failed to write report: {e}")))?;
        paths.push(report_path);
    }

    Ok(ctx.with_export_paths(paths, start.elapsed()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::context::{OptimizationResult, PipelineConfig};
    use rust_decimal::Decimal;
    use tempfile::tempdir;

    #[test]
    fn writes_one_report_per_result() {
        let dir = tempdir().unwrap();
        let config = PipelineConfig {
            definitions: Vec::new(),
            securities: Vec::new(),
            training_start: chrono::Utc::now(),
            training_end: chrono::Utc::now(),
            initial_capital: Decimal::ZERO,
            trade_volume: Decimal::ZERO,
            parallel_workers: 1,
            metric_filters: Vec::new(),
            export_dir: dir.path().to_path_buf(),
        };
        let ctx = PipelineContext::new(config);
        let ctx = ctx.with_filtered_results(
            vec![OptimizationResult {
                parameter_hash: "abc123".to_string(),
                parameters: crate::params::ParameterSet::new(),
                training_metrics: None,
                validation_metrics: None,
                error: None,
                export_path: None,
            }],
            std::time::Duration::ZERO,
        );
        let ctx = export(&ctx).unwrap();
        let paths = ctx.export_paths.unwrap();
        assert_eq!(paths.len(), 1);
        assert!(paths[0].exists());
    }
}
