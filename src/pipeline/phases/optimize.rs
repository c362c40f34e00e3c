//! Phase 2 — Optimization: spec §4.4. Streams combinations out of phase 1's
//! explorer one at a time, bounded by `parallel_workers` — a worker slot is
//! acquired *before* the next combination is even decoded, so enumeration
//! never runs ahead of execution and never materializes the full Cartesian
//! product (spec §4.2/§9). Workers share the market-data cache but nothing
//! else; a worker exception is captured into that result's `error` field
//! rather than failing the run (spec §7 "worker-failure").

use crate::errors::CoreError;
use crate::market_data::MarketMessage;
use crate::metrics;
use crate::params::hash::hash as hash_parameters;
use crate::pipeline::context::{OptimizationResult, PipelineContext};
use crate::strategy_runner::StrategyRunner;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Constructs one fresh, isolated strategy instance per worker.
pub type StrategyFactory = Arc<dyn Fn() -> Box<dyn StrategyRunner> + Send + Sync>;

pub async fn optimize(
    ctx: &PipelineContext,
    factory: StrategyFactory,
    market_data: Arc<HashMap<String, Vec<MarketMessage>>>,
    cancel: Option<CancellationToken>,
) -> Result<PipelineContext, CoreError> {
    let start = Instant::now();
    let explorer = ctx
        .explorer
        .clone()
        .ok_or_else(|| CoreError::InvalidArgument("optimize phase requires a generated explorer".into()))?;

    let semaphore = Arc::new(Semaphore::new(ctx.config.parallel_workers.max(1)));
    let mut tasks = tokio::task::JoinSet::new();

    // Library-level progress hook, not a CLI feature: a caller driving the
    // pipeline from a long-running process sees the same bar the teacher's
    // optimizer examples draw across parallel backtest runs.
    let total = explorer.total_combinations().unwrap_or(0).max(0);
    let progress = ProgressBar::new(total as u64);
    progress.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} parameter sets ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let mut combinations = explorer.enumerate(cancel.clone())?;
    let mut results = HashMap::new();

    loop {
        // Acquiring a permit before pulling the next combination bounds how
        // far enumeration runs ahead of execution to `parallel_workers`
        // outstanding combinations, instead of spawning one task per
        // combination up front.
        let permit = Arc::clone(&semaphore).acquire_owned().await.expect("semaphore never closed");

        let set = match combinations.next() {
            Some(Ok(set)) => set,
            Some(Err(e)) => {
                drop(permit);
                progress.finish_and_clear();
                tasks.abort_all();
                return Err(e);
            }
            None => {
                drop(permit);
                break;
            }
        };

        let factory = Arc::clone(&factory);
        let market_data = Arc::clone(&market_data);
        let config = Arc::clone(&ctx.config);
        let cancel = cancel.clone();

        tasks.spawn(async move {
            let _permit = permit;
            if cancel.as_ref().is_some_and(tokio_util::sync::CancellationToken::is_cancelled) {
                return Err(CoreError::OperationCancelled);
            }

            let parameter_hash = hash_parameters(&set);
            let mut runner = factory();
            let result = run_one(
                runner.as_mut(),
                &set,
                &config.securities,
                config.training_start,
                config.training_end,
                config.initial_capital,
                config.trade_volume,
                &market_data,
            );

            Ok(match result {
                Ok(training_metrics) => OptimizationResult {
                    parameter_hash,
                    parameters: set,
                    training_metrics: Some(training_metrics),
                    validation_metrics: None,
                    error: None,
                    export_path: None,
                },
                Err(e) => OptimizationResult {
                    parameter_hash,
                    parameters: set,
                    training_metrics: None,
                    validation_metrics: None,
                    error: Some(e.to_string()),
                    export_path: None,
                },
            })
        });

        // Drain whatever has already finished so `results`/`progress` stay
        // current and their permits return to the semaphore promptly,
        // rather than waiting for a full batch before pulling more.
        while let Some(joined) = tasks.try_join_next() {
            match joined {
                Ok(Ok(r)) => {
                    results.insert(r.parameter_hash.clone(), r);
                    progress.inc(1);
                }
                Ok(Err(CoreError::OperationCancelled)) => {
                    progress.finish_and_clear();
                    tasks.abort_all();
                    return Err(CoreError::OperationCancelled);
                }
                Ok(Err(e)) => {
                    progress.finish_and_clear();
                    tasks.abort_all();
                    return Err(e);
                }
                Err(join_err) => {
                    progress.finish_and_clear();
                    tasks.abort_all();
                    return Err(CoreError::WorkerFailure(join_err.to_string()));
                }
            }
        }
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(r)) => {
                results.insert(r.parameter_hash.clone(), r);
                progress.inc(1);
            }
            Ok(Err(CoreError::OperationCancelled)) => {
                progress.finish_and_clear();
                tasks.abort_all();
                return Err(CoreError::OperationCancelled);
            }
            Ok(Err(e)) => {
                progress.finish_and_clear();
                return Err(e);
            }
            Err(join_err) => {
                progress.finish_and_clear();
                return Err(CoreError::WorkerFailure(join_err.to_string()));
            }
        }
    }
    progress.finish_and_clear();

    Ok(ctx.with_optimization_results(results, start.elapsed()))
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn run_one(
    runner: &mut dyn StrategyRunner,
    set: &crate::params::ParameterSet,
    securities: &[String],
    start: chrono::DateTime<chrono::Utc>,
    end: chrono::DateTime<chrono::Utc>,
    initial_capital: rust_decimal::Decimal,
    trade_volume: rust_decimal::Decimal,
    market_data: &HashMap<String, Vec<MarketMessage>>,
) -> Result<metrics::PerformanceMetrics, CoreError> {
    runner.set_parameters(set)?;
    runner.set_universe(securities);
    runner.run(start, end, initial_capital, trade_volume, market_data)?;

    let trades: Vec<metrics::Trade> = runner
        .trades()
        .iter()
        .map(|t| metrics::Trade {
            realized_pnl: t.realized_pnl.map_or(0.0, |d| d.to_string().parse().unwrap_or(0.0)),
        })
        .collect();
    let trading_period_days = (end - start).num_days();
    Ok(metrics::compute(
        runner.daily_returns(),
        &trades,
        initial_capital,
        runner.final_capital(),
        trading_period_days,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::value::{ParamKind, ParamValue};
    use crate::params::ParameterDefinition;
    use crate::pipeline::context::PipelineConfig;
    use crate::pipeline::phases::generate::generate;
    use crate::strategy_runner::{IndicatorSample, Trade};
    use rust_decimal::Decimal;
    use std::path::PathBuf;

    struct AlwaysFailsRunner;
    impl StrategyRunner for AlwaysFailsRunner {
        fn set_parameters(&mut self, _params: &crate::params::ParameterSet) -> Result<(), CoreError> {
            Ok(())
        }
        fn set_universe(&mut self, _securities: &[String]) {}
        fn run(
            &mut self,
            _start: chrono::DateTime<chrono::Utc>,
            _end: chrono::DateTime<chrono::Utc>,
            _initial_capital: Decimal,
            _trade_volume: Decimal,
            _market_data: &HashMap<String, Vec<MarketMessage>>,
        ) -> Result<(), CoreError> {
            Err(CoreError::WorkerFailure("boom".to_string()))
        }
        fn trades(&self) -> &[Trade] {
            &[]
        }
        fn daily_returns(&self) -> &[f64] {
            &[]
        }
        fn final_capital(&self) -> Decimal {
            Decimal::ZERO
        }
        fn indicators(&self) -> &[IndicatorSample] {
            &[]
        }
        fn version(&self) -> &str {
            "test"
        }
        fn parameter_hash(&self) -> Option<&str> {
            None
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            definitions: vec![ParameterDefinition::new(
                "fast",
                ParamKind::Integer,
                Some(ParamValue::Integer(1)),
                Some(ParamValue::Integer(2)),
                None,
                Some(ParamValue::Integer(1)),
                true,
            )
            .unwrap()],
            securities: vec!["AAPL".to_string()],
            training_start: chrono::Utc::now() - chrono::Duration::days(30),
            training_end: chrono::Utc::now(),
            initial_capital: Decimal::new(10000, 0),
            trade_volume: Decimal::new(100, 0),
            parallel_workers: 2,
            metric_filters: Vec::new(),
            export_dir: PathBuf::from("/tmp/export"),
        }
    }

    #[tokio::test]
    async fn worker_failure_is_captured_not_fatal() {
        let ctx = PipelineContext::new(config());
        let ctx = generate(&ctx).unwrap();
        let factory: StrategyFactory = Arc::new(|| Box::new(AlwaysFailsRunner));
        let ctx = optimize(&ctx, factory, Arc::new(HashMap::new()), None).await.unwrap();

        let results = ctx.optimization_results.unwrap();
        assert_eq!(results.len(), 2);
        for r in results.values() {
            assert!(r.error.is_some());
            assert!(r.training_metrics.is_none());
        }
    }
}
