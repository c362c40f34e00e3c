//! External interface: strategy runner (spec §6). The pipeline treats the
//! actual trading strategy as an opaque collaborator conforming to this
//! capability set; the core never inspects its internals.

use crate::errors::CoreError;
use crate::market_data::MarketMessage;
use crate::params::ParameterSet;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// One completed buy/sell pairing (or equivalent) with its realized PnL.
/// `realized_pnl` is `Some(_)` only for round-trip-completed trades; see
/// spec invariant 9 (win rate over completed round trips only).
#[derive(Debug, Clone)]
pub struct Trade {
    pub security: String,
    pub entry_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
    pub realized_pnl: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct IndicatorSample {
    pub name: String,
    pub security: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// A caller-supplied strategy type conforming to the capability set the
/// pipeline depends on: { set parameters, set security/portfolio, run,
/// expose own trades, expose indicators, version string, parameter hash }.
///
/// Implementations are expected to be cheap to construct per worker — the
/// pipeline instantiates one per `(parameter set, window)` pair and never
/// shares a strategy instance across workers.
pub trait StrategyRunner: Send {
    /// Applies one fully-validated `ParameterSet` to this strategy instance.
    fn set_parameters(&mut self, params: &ParameterSet) -> Result<(), CoreError>;

    /// Restricts the strategy to the given securities for this run.
    fn set_universe(&mut self, securities: &[String]);

    /// Runs the strategy over `[start, end]` against `market_data`, with the
    /// given starting capital and trade volume, and returns once complete.
    /// `market_data` is keyed by security and pre-loaded once per run —
    /// parameter sets don't affect which bars are needed, so the pipeline
    /// loads it once through [`crate::market_data::SharedMarketDataCache`]
    /// and shares the same map across every worker.
    fn run(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        initial_capital: Decimal,
        trade_volume: Decimal,
        market_data: &std::collections::HashMap<String, Vec<MarketMessage>>,
    ) -> Result<(), CoreError>;

    /// The strategy's own trade log, populated only after `run` completes.
    fn trades(&self) -> &[Trade];

    /// Daily return series over the run window, for Sharpe/Sortino/drawdown.
    fn daily_returns(&self) -> &[f64];

    /// Capital remaining at the end of the run.
    fn final_capital(&self) -> Decimal;

    /// Indicator values computed during the run, for event-store logging
    /// and state-snapshot reconstruction.
    fn indicators(&self) -> &[IndicatorSample];

    /// A stable version string identifying the strategy implementation,
    /// recorded alongside results for reproducibility.
    fn version(&self) -> &str;

    /// The deterministic hash of the parameter set currently applied (see
    /// [`crate::params::hash::hash`]), or `None` before `set_parameters`.
    fn parameter_hash(&self) -> Option<&str>;
}
