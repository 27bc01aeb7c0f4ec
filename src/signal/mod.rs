//! Pure, stateless signal computation for pair trading. No I/O, no database
//! access — every function here is a deterministic transform over price
//! arrays, ported from the statistical-arbitrage model this crate trades.

use crate::types::ExitReason;

/// OLS hedge ratio: `a = beta * b + alpha`, solved as the closed-form slope
/// of simple linear regression rather than a general polynomial fit.
pub fn hedge_ratio(prices_a: &[f64], prices_b: &[f64]) -> f64 {
    if prices_a.len() < 2 {
        return 1.0;
    }
    let n = prices_a.len() as f64;
    let mean_a: f64 = prices_a.iter().sum::<f64>() / n;
    let mean_b: f64 = prices_b.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_b = 0.0;
    for (a, b) in prices_a.iter().zip(prices_b.iter()) {
        let db = b - mean_b;
        cov += (a - mean_a) * db;
        var_b += db * db;
    }
    if var_b == 0.0 {
        return 0.0;
    }
    cov / var_b
}

/// `(z_score, current_spread, spread_mean, spread_std)` over the last
/// `window` candles. Sample standard deviation uses `ddof=1`; a zero or
/// non-finite std collapses the z-score to `0.0` rather than dividing by it.
pub fn zscore_value(prices_a: &[f64], prices_b: &[f64], hedge_ratio: f64, window: usize) -> (f64, f64, f64, f64) {
    let spread: Vec<f64> = prices_a
        .iter()
        .zip(prices_b.iter())
        .map(|(a, b)| a - hedge_ratio * b)
        .collect();
    let start = spread.len().saturating_sub(window);
    let spread_window = &spread[start..];

    let n = spread_window.len() as f64;
    let mean = spread_window.iter().sum::<f64>() / n;
    let variance = spread_window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std = variance.sqrt();
    let current = *spread.last().unwrap_or(&0.0);

    if std == 0.0 || std.is_nan() {
        return (0.0, current, mean, std);
    }
    ((current - mean) / std, current, mean, std)
}

/// Ornstein-Uhlenbeck half-life of mean reversion for a spread series.
/// `+inf` if there isn't enough data or the series isn't mean-reverting
/// (regression slope `>= 0`).
pub fn half_life(spread: &[f64]) -> f64 {
    if spread.len() < 5 {
        return f64::INFINITY;
    }
    let lag = &spread[..spread.len() - 1];
    let delta: Vec<f64> = spread.windows(2).map(|w| w[1] - w[0]).collect();
    let beta = hedge_ratio(&delta, lag);
    if beta >= 0.0 {
        return f64::INFINITY;
    }
    -std::f64::consts::LN_2 / beta
}

/// Wilder-smoothed RSI over the diffs of `values`. Returns `NaN` if there
/// isn't at least `period + 2` points to seed and smooth the average.
pub fn rsi(values: &[f64], period: usize) -> f64 {
    let n = values.len();
    if n < period + 2 {
        return f64::NAN;
    }
    let deltas: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();
    let gains: Vec<f64> = deltas.iter().map(|d| d.max(0.0)).collect();
    let losses: Vec<f64> = deltas.iter().map(|d| (-d).max(0.0)).collect();

    let mut avg_gain = gains[..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss = losses[..period].iter().sum::<f64>() / period as f64;

    for i in period..deltas.len() {
        avg_gain = (avg_gain * (period - 1) as f64 + gains[i]) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + losses[i]) / period as f64;
    }

    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

/// Snapshot of everything a cycle needs to decide entry/exit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalResult {
    pub z_score: f64,
    pub hedge_ratio: f64,
    pub half_life: f64,
    pub rsi: f64,
    pub current_spread: f64,
    pub spread_mean: f64,
    pub spread_std: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntrySignal {
    pub should_enter: bool,
    pub direction: i32,
    pub skip_reason: Option<&'static str>,
    pub notional: f64,
}

impl EntrySignal {
    fn skip(reason: &'static str) -> Self {
        Self {
            should_enter: false,
            direction: 0,
            skip_reason: Some(reason),
            notional: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitSignal {
    pub should_exit: bool,
    pub exit_reason: Option<ExitReason>,
    pub unrealized_pnl: f64,
    pub unrealized_pct: f64,
}

/// Bundles hedge ratio (trained window) + z-score/spread (trading window,
/// same beta) + half-life (trading-window spread) + RSI (on the price
/// ratio, not on either leg alone).
pub fn compute_signals(
    prices_a: &[f64],
    prices_b: &[f64],
    train_prices_a: &[f64],
    train_prices_b: &[f64],
    window_candles: usize,
    train_candles: usize,
    rsi_period: usize,
) -> SignalResult {
    let ta_start = train_prices_a.len().saturating_sub(train_candles);
    let tb_start = train_prices_b.len().saturating_sub(train_candles);
    let hr = hedge_ratio(&train_prices_a[ta_start..], &train_prices_b[tb_start..]);

    let wa_start = prices_a.len().saturating_sub(window_candles);
    let wb_start = prices_b.len().saturating_sub(window_candles);
    let (z, spread_now, spread_mean, spread_std) =
        zscore_value(&prices_a[wa_start..], &prices_b[wb_start..], hr, window_candles);

    let spread_window: Vec<f64> = prices_a[wa_start..]
        .iter()
        .zip(prices_b[wb_start..].iter())
        .map(|(a, b)| a - hr * b)
        .collect();
    let hl = half_life(&spread_window);

    let ratio: Vec<f64> = prices_a.iter().zip(prices_b.iter()).map(|(a, b)| a / b).collect();
    let r = rsi(&ratio, rsi_period);

    SignalResult {
        z_score: z,
        hedge_ratio: hr,
        half_life: hl,
        rsi: r,
        current_spread: spread_now,
        spread_mean,
        spread_std,
    }
}

#[allow(clippy::too_many_arguments)]
pub fn evaluate_entry(
    signals: &SignalResult,
    entry_z: f64,
    max_half_life: f64,
    rsi_upper: f64,
    rsi_lower: f64,
    current_equity: f64,
    equity_floor: f64,
    leverage: f64,
) -> EntrySignal {
    let z = signals.z_score;

    if z.abs() <= entry_z {
        return EntrySignal::skip("no_signal");
    }

    let use_hl = max_half_life > 0.0;
    if use_hl && !(signals.half_life > 0.0 && signals.half_life <= max_half_life) {
        return EntrySignal::skip("half_life");
    }

    let use_rsi = rsi_lower > 0.0 || rsi_upper < 100.0;
    if use_rsi && !signals.rsi.is_nan() && (signals.rsi < rsi_lower || signals.rsi > rsi_upper) {
        return EntrySignal::skip("rsi");
    }

    if current_equity < equity_floor {
        return EntrySignal::skip("equity_floor");
    }

    let direction = if z > entry_z { -1 } else { 1 };
    EntrySignal {
        should_enter: true,
        direction,
        skip_reason: None,
        notional: current_equity * leverage,
    }
}

#[allow(clippy::too_many_arguments)]
pub fn evaluate_exit(
    signals: &SignalResult,
    position_direction: i32,
    entry_spread: f64,
    entry_price_a: f64,
    entry_price_b: f64,
    entry_hedge_ratio: f64,
    entry_notional: f64,
    current_equity: f64,
    exit_z: f64,
    stop_z: f64,
    stop_loss_pct: f64,
    current_price_a: f64,
    current_price_b: f64,
) -> ExitSignal {
    let z = signals.z_score;

    let exit_spread = current_price_a - entry_hedge_ratio * current_price_b;
    let spread_change = exit_spread - entry_spread;
    let dollar_per_unit = entry_price_a + entry_hedge_ratio.abs() * entry_price_b;
    let spread_units = if dollar_per_unit != 0.0 {
        entry_notional / dollar_per_unit
    } else {
        0.0
    };
    let unreal_pnl = position_direction as f64 * spread_change * spread_units;
    let unreal_pct = if current_equity != 0.0 {
        unreal_pnl / current_equity * 100.0
    } else {
        0.0
    };

    if stop_loss_pct > 0.0 && unreal_pct <= -stop_loss_pct {
        return ExitSignal {
            should_exit: true,
            exit_reason: Some(ExitReason::StopLoss),
            unrealized_pnl: unreal_pnl,
            unrealized_pct: unreal_pct,
        };
    }

    if position_direction == 1 && (z > -exit_z || z > stop_z) {
        return ExitSignal {
            should_exit: true,
            exit_reason: Some(if z > -exit_z { ExitReason::Signal } else { ExitReason::StopZ }),
            unrealized_pnl: unreal_pnl,
            unrealized_pct: unreal_pct,
        };
    }

    if position_direction == -1 && (z < exit_z || z < -stop_z) {
        return ExitSignal {
            should_exit: true,
            exit_reason: Some(if z < exit_z { ExitReason::Signal } else { ExitReason::StopZ }),
            unrealized_pnl: unreal_pnl,
            unrealized_pct: unreal_pct,
        };
    }

    ExitSignal {
        should_exit: false,
        exit_reason: None,
        unrealized_pnl: unreal_pnl,
        unrealized_pct: unreal_pct,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hedge_ratio_of_identical_series_is_one() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0];
        let b = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert!((hedge_ratio(&a, &b) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn hedge_ratio_short_series_defaults_to_one() {
        assert_eq!(hedge_ratio(&[1.0], &[1.0]), 1.0);
    }

    #[test]
    fn zscore_flat_spread_is_zero() {
        let a = [10.0, 10.0, 10.0, 10.0];
        let b = [5.0, 5.0, 5.0, 5.0];
        let (z, _, _, std) = zscore_value(&a, &b, 1.0, 4);
        assert_eq!(z, 0.0);
        assert_eq!(std, 0.0);
    }

    #[test]
    fn half_life_short_series_is_infinite() {
        assert_eq!(half_life(&[1.0, 2.0, 3.0]), f64::INFINITY);
    }

    #[test]
    fn half_life_mean_reverting_series_is_finite_positive() {
        let spread: Vec<f64> = (0..50).map(|i| (-(i as f64) * 0.1).exp() * 3.0 - 1.5).collect();
        let hl = half_life(&spread);
        assert!(hl.is_finite());
        assert!(hl > 0.0);
    }

    #[test]
    fn rsi_insufficient_data_is_nan() {
        assert!(rsi(&[1.0, 2.0, 3.0], 14).is_nan());
    }

    #[test]
    fn rsi_all_gains_is_100() {
        let values: Vec<f64> = (0..20).map(|i| i as f64).collect();
        assert_eq!(rsi(&values, 14), 100.0);
    }

    #[test]
    fn evaluate_entry_no_signal_below_threshold() {
        let s = SignalResult {
            z_score: 1.0,
            hedge_ratio: 1.0,
            half_life: 10.0,
            rsi: 50.0,
            current_spread: 0.0,
            spread_mean: 0.0,
            spread_std: 1.0,
        };
        let e = evaluate_entry(&s, 2.0, 50.0, 70.0, 20.0, 1000.0, 400.0, 5.0);
        assert!(!e.should_enter);
        assert_eq!(e.skip_reason, Some("no_signal"));
    }

    #[test]
    fn evaluate_entry_short_spread_when_z_above_entry() {
        let s = SignalResult {
            z_score: 3.0,
            hedge_ratio: 1.0,
            half_life: 10.0,
            rsi: 50.0,
            current_spread: 0.0,
            spread_mean: 0.0,
            spread_std: 1.0,
        };
        let e = evaluate_entry(&s, 2.0, 50.0, 70.0, 20.0, 1000.0, 400.0, 5.0);
        assert!(e.should_enter);
        assert_eq!(e.direction, -1);
        assert_eq!(e.notional, 5000.0);
    }

    #[test]
    fn evaluate_entry_below_equity_floor_skips() {
        let s = SignalResult {
            z_score: 3.0,
            hedge_ratio: 1.0,
            half_life: 10.0,
            rsi: 50.0,
            current_spread: 0.0,
            spread_mean: 0.0,
            spread_std: 1.0,
        };
        let e = evaluate_entry(&s, 2.0, 50.0, 70.0, 20.0, 100.0, 400.0, 5.0);
        assert!(!e.should_enter);
        assert_eq!(e.skip_reason, Some("equity_floor"));
    }

    #[test]
    fn evaluate_exit_stop_loss_takes_priority() {
        let s = SignalResult {
            z_score: 0.0,
            hedge_ratio: 1.0,
            half_life: 10.0,
            rsi: 50.0,
            current_spread: 0.0,
            spread_mean: 0.0,
            spread_std: 1.0,
        };
        let e = evaluate_exit(&s, 1, 0.0, 100.0, 50.0, 1.0, 1000.0, 100.0, 0.5, 4.0, 10.0, 50.0, 200.0);
        assert!(e.should_exit);
        assert_eq!(e.exit_reason, Some(ExitReason::StopLoss));
    }

    #[test]
    fn evaluate_exit_signal_before_stop_z() {
        let s = SignalResult {
            z_score: -0.2,
            hedge_ratio: 1.0,
            half_life: 10.0,
            rsi: 50.0,
            current_spread: 0.0,
            spread_mean: 0.0,
            spread_std: 1.0,
        };
        let e = evaluate_exit(&s, 1, 0.0, 100.0, 50.0, 1.0, 1000.0, 100_000.0, 0.5, 4.0, 10.0, 100.0, 50.0);
        assert!(e.should_exit);
        assert_eq!(e.exit_reason, Some(ExitReason::Signal));
    }
}
