//! Walk-Forward Validator: spec §4.5. Slides (or anchors) a training
//! window across the configured date range, optimizes on each training
//! window, then evaluates the winning parameter set on the following
//! out-of-sample test window. A window whose training phase produces no
//! usable result is skipped with a warning rather than failing the run
//! (the same skip-on-error posture as phase 2's worker failures).

use crate::errors::CoreError;
use crate::metrics::{self, PerformanceMetrics};
use crate::pipeline::context::{OptimizationResult, PipelineConfig, PipelineContext};
use crate::pipeline::phases::generate::generate;
use crate::pipeline::phases::optimize::{optimize, run_one, StrategyFactory};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkForwardMode {
    /// The training window starts anew each step (fixed length, slides forward).
    Rolling,
    /// The training window start stays fixed; its end grows each step.
    Anchored,
}

#[derive(Debug, Clone)]
pub struct WalkForwardConfig {
    pub window_size: chrono::Duration,
    pub step: chrono::Duration,
    pub mode: WalkForwardMode,
    pub range_start: DateTime<Utc>,
    pub range_end: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct Window {
    pub train_start: DateTime<Utc>,
    pub train_end: DateTime<Utc>,
    pub test_start: DateTime<Utc>,
    pub test_end: DateTime<Utc>,
}

/// Builds the (train, test) window sequence for a walk-forward run.
/// Stops once a training window would run past `range_end`; the final
/// test window is clipped to `range_end`.
#[must_use]
pub fn enumerate_windows(cfg: &WalkForwardConfig) -> Vec<Window> {
    let mut windows = Vec::new();
    let mut i: i32 = 0;
    loop {
        let train_start = match cfg.mode {
            WalkForwardMode::Rolling => cfg.range_start + cfg.step * i,
            WalkForwardMode::Anchored => cfg.range_start,
        };
        let train_end = match cfg.mode {
            WalkForwardMode::Rolling => train_start + cfg.window_size,
            WalkForwardMode::Anchored => cfg.range_start + cfg.window_size + cfg.step * i,
        };
        if train_end >= cfg.range_end {
            break;
        }
        let test_start = train_end;
        let test_end = (test_start + cfg.step).min(cfg.range_end);
        windows.push(Window {
            train_start,
            train_end,
            test_start,
            test_end,
        });
        if test_end >= cfg.range_end {
            break;
        }
        i += 1;
    }
    windows
}

#[derive(Debug, Clone)]
pub struct WindowResult {
    pub window: Window,
    pub best_parameter_hash: String,
    pub training_metrics: PerformanceMetrics,
    pub validation_metrics: PerformanceMetrics,
    /// `training.sharpe - validation.sharpe`; positive means performance
    /// degraded out-of-sample.
    pub degradation: f64,
}

#[derive(Debug, Clone)]
pub struct WalkForwardSummary {
    pub windows: Vec<WindowResult>,
    /// Mean out-of-sample Sharpe divided by mean in-sample Sharpe across
    /// windows that produced a result. `0.0` if no window did.
    pub walk_forward_efficiency: f64,
    /// Fraction of windows whose out-of-sample period was profitable.
    pub consistency: f64,
}

#[allow(clippy::too_many_arguments)]
pub async fn validate(
    base: &PipelineConfig,
    wf: &WalkForwardConfig,
    factory: StrategyFactory,
    market_data: Arc<HashMap<String, Vec<crate::market_data::MarketMessage>>>,
    initial_capital: Decimal,
    trade_volume: Decimal,
    cancel: Option<CancellationToken>,
) -> Result<WalkForwardSummary, CoreError> {
    let windows = enumerate_windows(wf);
    let mut results = Vec::new();

    for window in windows {
        let train_config = PipelineConfig {
            definitions: base.definitions.clone(),
            securities: base.securities.clone(),
            training_start: window.train_start,
            training_end: window.train_end,
            initial_capital: base.initial_capital,
            trade_volume: base.trade_volume,
            parallel_workers: base.parallel_workers,
            metric_filters: Vec::new(),
            export_dir: base.export_dir.clone(),
        };

        let ctx = PipelineContext::new(train_config);
        let ctx = match generate(&ctx) {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(error = %e, ?window, "walk-forward: skipping window, generate failed");
                continue;
            }
        };
        let ctx = match optimize(&ctx, Arc::clone(&factory), Arc::clone(&market_data), cancel.clone()).await {
            Ok(ctx) => ctx,
            Err(CoreError::OperationCancelled) => return Err(CoreError::OperationCancelled),
            Err(e) => {
                warn!(error = %e, ?window, "walk-forward: skipping window, optimize failed");
                continue;
            }
        };

        let best = ctx
            .optimization_results
            .as_ref()
            .and_then(|results| best_of(results.values()));

        let Some(best) = best else {
            warn!(?window, "walk-forward: skipping window, no usable training result");
            continue;
        };

        let mut runner = factory();
        let validation_metrics = match run_one(
            runner.as_mut(),
            &best.parameters,
            &base.securities,
            window.test_start,
            window.test_end,
            initial_capital,
            trade_volume,
            &market_data,
        ) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, ?window, "walk-forward: skipping window, validation run failed");
                continue;
            }
        };

        let training_metrics = best.training_metrics.clone().expect("best_of only returns scored results");
        let degradation = training_metrics.sharpe - validation_metrics.sharpe;

        results.push(WindowResult {
            window,
            best_parameter_hash: best.parameter_hash.clone(),
            training_metrics,
            validation_metrics,
            degradation,
        });
    }

    let walk_forward_efficiency = if results.is_empty() {
        0.0
    } else {
        let train_mean: f64 =
            results.iter().map(|r| r.training_metrics.sharpe).sum::<f64>() / results.len() as f64;
        let test_mean: f64 =
            results.iter().map(|r| r.validation_metrics.sharpe).sum::<f64>() / results.len() as f64;
        if train_mean.abs() > f64::EPSILON {
            test_mean / train_mean
        } else {
            0.0
        }
    };

    let consistency = if results.is_empty() {
        0.0
    } else {
        let profitable = results
            .iter()
            .filter(|r| r.validation_metrics.total_return > 0.0)
            .count();
        profitable as f64 / results.len() as f64
    };

    Ok(WalkForwardSummary {
        windows: results,
        walk_forward_efficiency,
        consistency,
    })
}

fn best_of<'a>(results: impl Iterator<Item = &'a OptimizationResult>) -> Option<&'a OptimizationResult> {
    results
        .filter(|r| r.training_metrics.is_some())
        .max_by_key(|r| metrics::rank_key(r.training_metrics.as_ref().expect("filtered above")))
}
