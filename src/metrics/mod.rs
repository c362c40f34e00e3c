//! `PerformanceMetrics`: spec §3. Computed per (strategy, period) from a
//! strategy's completed trade log.

use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A single closed round-trip trade, the unit [`compute`] consumes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Trade {
    /// Realized PnL for this round trip. Zero means the trade never
    /// actually closed a position with gain/loss (spec §3/§8.9) and is
    /// excluded from win-rate accounting.
    pub realized_pnl: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PerformanceMetrics {
    pub total_return: f64,
    pub annualized_return: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub max_drawdown: f64,
    pub win_count: u64,
    pub lose_count: u64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    #[schemars(with = "String")]
    pub initial_capital: Decimal,
    #[schemars(with = "String")]
    pub final_capital: Decimal,
    pub trading_period_days: i64,
}

/// Computes [`PerformanceMetrics`] from a daily-return series and a trade
/// log. Win rate is computed over *round-trip completed* trades only —
/// trades with non-zero realized PnL, per spec §3 and the normative
/// resolution of the win-rate Open Question in §9 (see DESIGN.md).
#[must_use]
pub fn compute(
    daily_returns: &[f64],
    trades: &[Trade],
    initial_capital: Decimal,
    final_capital: Decimal,
    trading_period_days: i64,
) -> PerformanceMetrics {
    let completed: Vec<&Trade> = trades.iter().filter(|t| t.realized_pnl != 0.0).collect();
    let win_count = completed.iter().filter(|t| t.realized_pnl > 0.0).count() as u64;
    let lose_count = completed.iter().filter(|t| t.realized_pnl < 0.0).count() as u64;
    let win_rate = if win_count + lose_count > 0 {
        win_count as f64 / (win_count + lose_count) as f64
    } else {
        0.0
    };

    let gross_win: f64 = completed
        .iter()
        .filter(|t| t.realized_pnl > 0.0)
        .map(|t| t.realized_pnl)
        .sum();
    let gross_loss: f64 = completed
        .iter()
        .filter(|t| t.realized_pnl < 0.0)
        .map(|t| t.realized_pnl.abs())
        .sum();
    let profit_factor = if gross_loss > 0.0 {
        gross_win / gross_loss
    } else if gross_win > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };
    let avg_win = if win_count > 0 {
        gross_win / win_count as f64
    } else {
        0.0
    };
    let avg_loss = if lose_count > 0 {
        gross_loss / lose_count as f64
    } else {
        0.0
    };

    let total_return = if !initial_capital.is_zero() {
        ((final_capital - initial_capital) / initial_capital)
            .to_string()
            .parse::<f64>()
            .unwrap_or(0.0)
    } else {
        0.0
    };
    let years = (trading_period_days as f64 / 365.25).max(1.0 / 365.25);
    let annualized_return = (1.0 + total_return).powf(1.0 / years) - 1.0;

    let mean = mean_of(daily_returns);
    let std = sample_stddev(daily_returns, mean).unwrap_or(0.0);
    let sharpe = if std > 0.0 {
        mean / std * (252.0_f64).sqrt()
    } else {
        0.0
    };

    let downside: Vec<f64> = daily_returns.iter().copied().filter(|r| *r < 0.0).collect();
    let downside_mean = mean_of(&downside);
    let downside_std = sample_stddev(&downside, downside_mean).unwrap_or(0.0);
    let sortino = if downside_std > 0.0 {
        mean / downside_std * (252.0_f64).sqrt()
    } else {
        0.0
    };

    let max_drawdown = max_drawdown_from_returns(daily_returns);

    PerformanceMetrics {
        total_return,
        annualized_return,
        sharpe,
        sortino,
        max_drawdown,
        win_count,
        lose_count,
        win_rate,
        profit_factor,
        avg_win,
        avg_loss,
        initial_capital,
        final_capital,
        trading_period_days,
    }
}

fn mean_of(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Sample standard deviation — `None` with fewer than 2 samples (spec §4.7).
fn sample_stddev(values: &[f64], mean: f64) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(variance.sqrt())
}

fn max_drawdown_from_returns(daily_returns: &[f64]) -> f64 {
    let mut equity = 1.0;
    let mut peak = 1.0;
    let mut max_dd = 0.0;
    for r in daily_returns {
        equity *= 1.0 + r;
        peak = peak.max(equity);
        let dd = (peak - equity) / peak;
        max_dd = max_dd.max(dd);
    }
    max_dd
}

/// Lexicographic descending comparator over (Sharpe, Sortino, total-return),
/// used by the walk-forward validator (spec §4.5) to pick a window's "best"
/// result.
#[must_use]
pub fn rank_key(m: &PerformanceMetrics) -> (ordered_float::OrderedFloat<f64>, ordered_float::OrderedFloat<f64>, ordered_float::OrderedFloat<f64>) {
    use ordered_float::OrderedFloat as OF;
    (OF(m.sharpe), OF(m.sortino), OF(m.total_return))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn win_rate_counts_only_completed_round_trips() {
        let trades = vec![
            Trade { realized_pnl: 100.0 },
            Trade { realized_pnl: -50.0 },
            Trade { realized_pnl: 0.0 }, // still open / break-even, excluded
        ];
        let m = compute(&[0.01, -0.005, 0.02], &trades, dec!(10000), dec!(10050), 3);
        assert_eq!(m.win_count, 1);
        assert_eq!(m.lose_count, 1);
        assert!((m.win_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn aggregation_bounds_hold_for_stddev() {
        let values = vec![0.01, -0.02, 0.03, 0.0, 0.015];
        let mean = mean_of(&values);
        let std = sample_stddev(&values, mean).unwrap();
        assert!(std >= 0.0);
    }
}
