//! Phase 3 — Filtering: spec §4.4. Retains only results whose training
//! metrics satisfy every configured threshold; order is preserved (the
//! iteration order of the optimization phase's result map — insertion
//! order is not guaranteed there, so "order preserved" means this phase
//! does not itself reorder, not that it recovers enumeration order).

use crate::errors::CoreError;
use crate::pipeline::context::{MetricThreshold, PipelineContext};
use std::time::Instant;

pub fn filter(ctx: &PipelineContext) -> Result<PipelineContext, CoreError> {
    let start = Instant::now();
    let results = ctx
        .optimization_results
        .clone()
        .ok_or_else(|| CoreError::InvalidArgument("filter phase requires optimization_results".into()))?;

    let filtered: Vec<_> = results
        .values()
        .filter(|r| {
            r.training_metrics
                .as_ref()
                .is_some_and(|m| ctx.config.metric_filters.iter().all(|t| passes(t, m)))
        })
        .cloned()
        .collect();

    Ok(ctx.with_filtered_results(filtered, start.elapsed()))
}

fn passes(threshold: &MetricThreshold, metrics: &crate::metrics::PerformanceMetrics) -> bool {
    let value = threshold.field.extract(metrics);
    if let Some(min) = threshold.min {
        if value < min {
            return false;
        }
    }
    if let Some(max) = threshold.max {
        if value > max {
            return false;
        }
    }
    true
}
