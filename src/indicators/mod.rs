//! Indicator Kernel (C1).
//!
//! Pure functions over a candle slice, adapted from the teacher's
//! `strategy::indicators` module but rewritten to the numeric semantics the
//! specification pins down explicitly: EMA seeded with the SMA of the first
//! `period` samples, RSI/ATR/ADX on Wilder smoothing, and documented neutral
//! defaults on insufficient data rather than the teacher's `0.0` fallback.
//!
//! Every function is stateless and total: there is no failure mode, only the
//! neutral-default edge case the specification calls out.

pub mod patterns;
pub mod structure;

use crate::exchange::types::Candle;
pub use patterns::{detect_patterns, Pattern};
pub use structure::{detect_fair_value_gaps, detect_order_blocks, pivot_points, FairValueGap, OrderBlock, PivotPoints};

/// Simple moving average of closing price over the trailing `period` candles.
pub fn sma(candles: &[Candle], period: usize) -> f64 {
    if candles.len() < period || period == 0 {
        return candles.last().map(|c| c.close).unwrap_or(0.0);
    }
    let sum: f64 = candles.iter().rev().take(period).map(|c| c.close).sum();
    sum / period as f64
}

/// Exponential moving average, seeded with the SMA of the first `period`
/// samples per the specification's numeric semantics.
pub fn ema(candles: &[Candle], period: usize) -> f64 {
    if candles.is_empty() {
        return 0.0;
    }
    if candles.len() < period || period == 0 {
        return candles.last().unwrap().close;
    }
    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut value = candles[..period].iter().map(|c| c.close).sum::<f64>() / period as f64;
    for candle in &candles[period..] {
        value = (candle.close - value) * multiplier + value;
    }
    value
}

/// Wilder-smoothed RSI. Returns the documented neutral default (50) when
/// fewer than `period + 1` candles are available.
pub fn rsi(candles: &[Candle], period: usize) -> f64 {
    if candles.len() < period + 1 {
        return 50.0;
    }

    let changes: Vec<f64> = candles.windows(2).map(|w| w[1].close - w[0].close).collect();
    let (mut avg_gain, mut avg_loss) = {
        let seed = &changes[..period];
        let gain: f64 = seed.iter().filter(|c| **c > 0.0).sum();
        let loss: f64 = seed.iter().filter(|c| **c < 0.0).map(|c| -c).sum();
        (gain / period as f64, loss / period as f64)
    };

    for change in &changes[period..] {
        let (gain, loss) = if *change >= 0.0 { (*change, 0.0) } else { (0.0, -change) };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

/// Stochastic RSI over the RSI series computed on a trailing window.
pub fn stoch_rsi(candles: &[Candle], rsi_period: usize, stoch_period: usize) -> f64 {
    if candles.len() < rsi_period + stoch_period {
        return 50.0;
    }
    let mut rsi_series = Vec::with_capacity(stoch_period);
    for i in 0..stoch_period {
        let end = candles.len() - i;
        rsi_series.push(rsi(&candles[..end], rsi_period));
    }
    let current = rsi_series[0];
    let min = rsi_series.iter().cloned().fold(f64::MAX, f64::min);
    let max = rsi_series.iter().cloned().fold(f64::MIN, f64::max);
    if (max - min).abs() < f64::EPSILON {
        50.0
    } else {
        (current - min) / (max - min) * 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Macd {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// MACD(12, 26, 9) computed from a proper EMA-of-MACD signal line rather
/// than the teacher's constant-weight approximation.
pub fn macd(candles: &[Candle]) -> Macd {
    const FAST: usize = 12;
    const SLOW: usize = 26;
    const SIGNAL: usize = 9;

    if candles.len() < SLOW + SIGNAL {
        let m = ema(candles, FAST) - ema(candles, SLOW);
        return Macd { macd: m, signal: m, histogram: 0.0 };
    }

    let mut macd_series = Vec::with_capacity(candles.len() - SLOW + 1);
    for end in SLOW..=candles.len() {
        let window = &candles[..end];
        macd_series.push(ema(window, FAST) - ema(window, SLOW));
    }

    let signal_seed = macd_series[..SIGNAL].iter().sum::<f64>() / SIGNAL as f64;
    let sig_multiplier = 2.0 / (SIGNAL as f64 + 1.0);
    let mut signal = signal_seed;
    for value in &macd_series[SIGNAL..] {
        signal = (value - signal) * sig_multiplier + signal;
    }

    let macd_now = *macd_series.last().unwrap();
    Macd { macd: macd_now, signal, histogram: macd_now - signal }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bollinger {
    pub upper: f64,
    pub mid: f64,
    pub lower: f64,
}

/// Bollinger bands, period 20 / k=2 by default.
pub fn bollinger(candles: &[Candle], period: usize, k: f64) -> Bollinger {
    let mid = sma(candles, period);
    if candles.len() < period || period == 0 {
        return Bollinger { upper: mid, mid, lower: mid };
    }
    let variance = candles
        .iter()
        .rev()
        .take(period)
        .map(|c| (c.close - mid).powi(2))
        .sum::<f64>()
        / period as f64;
    let stddev = variance.sqrt();
    Bollinger { upper: mid + k * stddev, mid, lower: mid - k * stddev }
}

/// Band width as a percentage of the mid band, used by the volatility
/// regime classifier.
pub fn bollinger_band_width_pct(candles: &[Candle], period: usize) -> f64 {
    let b = bollinger(candles, period, 2.0);
    if b.mid.abs() < f64::EPSILON {
        0.0
    } else {
        (b.upper - b.lower) / b.mid * 100.0
    }
}

fn true_range(candle: &Candle, prev_close: f64) -> f64 {
    let a = candle.high - candle.low;
    let b = (candle.high - prev_close).abs();
    let c = (candle.low - prev_close).abs();
    a.max(b).max(c)
}

/// Wilder-smoothed Average True Range. Returns 0.0 on insufficient data
/// (there is no meaningful neutral ATR, unlike RSI/ADX).
pub fn atr(candles: &[Candle], period: usize) -> f64 {
    if candles.len() < period + 1 {
        return 0.0;
    }
    let trs: Vec<f64> = candles
        .windows(2)
        .map(|w| true_range(&w[1], w[0].close))
        .collect();

    let mut value = trs[..period].iter().sum::<f64>() / period as f64;
    for tr in &trs[period..] {
        value = (value * (period as f64 - 1.0) + tr) / period as f64;
    }
    value
}

/// ATR expressed as a percentage of the latest close.
pub fn atr_pct(candles: &[Candle], period: usize) -> f64 {
    match candles.last() {
        Some(c) if c.close.abs() > f64::EPSILON => atr(candles, period) / c.close * 100.0,
        _ => 0.0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adx {
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
}

/// ADX(14) with +DI/-DI, Wilder-smoothed. Returns the documented neutral
/// default (adx=25, di=50/50) on fewer than `2*period` candles — the
/// specification flags the exact smoothing as an open question (the source
/// used a simplified variant); this implementation follows the textbook
/// Wilder smoothing, recorded as the Open Question decision in DESIGN.md.
pub fn adx(candles: &[Candle], period: usize) -> Adx {
    if candles.len() < period * 2 {
        return Adx { adx: 25.0, plus_di: 50.0, minus_di: 50.0 };
    }

    let mut plus_dm = Vec::with_capacity(candles.len() - 1);
    let mut minus_dm = Vec::with_capacity(candles.len() - 1);
    let mut trs = Vec::with_capacity(candles.len() - 1);

    for w in candles.windows(2) {
        let up_move = w[1].high - w[0].high;
        let down_move = w[0].low - w[1].low;
        plus_dm.push(if up_move > down_move && up_move > 0.0 { up_move } else { 0.0 });
        minus_dm.push(if down_move > up_move && down_move > 0.0 { down_move } else { 0.0 });
        trs.push(true_range(&w[1], w[0].close));
    }

    let smooth = |series: &[f64], period: usize| -> Vec<f64> {
        let mut out = Vec::with_capacity(series.len() - period + 1);
        let mut value = series[..period].iter().sum::<f64>();
        out.push(value);
        for x in &series[period..] {
            value = value - value / period as f64 + x;
            out.push(value);
        }
        out
    };

    let smoothed_tr = smooth(&trs, period);
    let smoothed_plus = smooth(&plus_dm, period);
    let smoothed_minus = smooth(&minus_dm, period);

    let mut dx_series = Vec::with_capacity(smoothed_tr.len());
    for i in 0..smoothed_tr.len() {
        let tr = smoothed_tr[i];
        let plus_di = if tr > 0.0 { 100.0 * smoothed_plus[i] / tr } else { 0.0 };
        let minus_di = if tr > 0.0 { 100.0 * smoothed_minus[i] / tr } else { 0.0 };
        let sum = plus_di + minus_di;
        let dx = if sum > 0.0 { 100.0 * (plus_di - minus_di).abs() / sum } else { 0.0 };
        dx_series.push((dx, plus_di, minus_di));
    }

    if dx_series.len() < period {
        let (dx, plus_di, minus_di) = *dx_series.last().unwrap();
        return Adx { adx: dx, plus_di, minus_di };
    }

    let mut adx_value = dx_series[..period].iter().map(|(dx, _, _)| dx).sum::<f64>() / period as f64;
    for (dx, _, _) in &dx_series[period..] {
        adx_value = (adx_value * (period as f64 - 1.0) + dx) / period as f64;
    }

    let (_, plus_di, minus_di) = *dx_series.last().unwrap();
    Adx { adx: adx_value, plus_di, minus_di }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Direction {
    Long,
    Short,
    #[default]
    Neutral,
}

/// Bundled indicator outputs for one scan, plus a technical direction and
/// confidence derived from them. The specification's C3 contract takes a
/// `(direction, confidence)` pair as its technical input but never says how
/// that is derived from raw indicators — this scorer fills that gap,
/// grounded in the teacher's `agents::market_analyzer` trend/volatility
/// weighting style.
#[derive(Debug, Clone, Copy)]
pub struct IndicatorSnapshot {
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub rsi14: f64,
    pub stoch_rsi: f64,
    pub macd: Macd,
    pub bollinger: Bollinger,
    pub atr14: f64,
    pub atr_pct: f64,
    pub adx14: Adx,
    pub insufficient: bool,
}

impl IndicatorSnapshot {
    pub fn compute(candles: &[Candle]) -> Self {
        Self {
            ema_fast: ema(candles, 9),
            ema_slow: ema(candles, 21),
            rsi14: rsi(candles, 14),
            stoch_rsi: stoch_rsi(candles, 14, 14),
            macd: macd(candles),
            bollinger: bollinger(candles, 20, 2.0),
            atr14: atr(candles, 14),
            atr_pct: atr_pct(candles, 14),
            adx14: adx(candles, 14),
            insufficient: candles.len() < 28,
        }
    }

    /// Derives a (direction, confidence) pair from the bundled indicators.
    /// Confidence is a 0-100 score built from trend alignment (EMA cross +
    /// ADX strength), momentum (RSI displacement from 50, MACD histogram
    /// sign), and mean-reversion context (Bollinger position).
    pub fn classify_technical(&self) -> (Direction, f64) {
        if self.insufficient {
            return (Direction::Neutral, 0.0);
        }

        let mut long_score = 0.0f64;
        let mut short_score = 0.0f64;

        if self.ema_fast > self.ema_slow {
            long_score += 20.0;
        } else if self.ema_fast < self.ema_slow {
            short_score += 20.0;
        }

        let trend_strength = (self.adx14.adx / 100.0).min(1.0) * 25.0;
        if self.adx14.plus_di > self.adx14.minus_di {
            long_score += trend_strength;
        } else {
            short_score += trend_strength;
        }

        let rsi_deviation = (self.rsi14 - 50.0).abs().min(30.0) / 30.0 * 20.0;
        if self.rsi14 > 50.0 {
            long_score += rsi_deviation;
        } else if self.rsi14 < 50.0 {
            short_score += rsi_deviation;
        }

        if self.macd.histogram > 0.0 {
            long_score += 15.0;
        } else if self.macd.histogram < 0.0 {
            short_score += 15.0;
        }

        let band_span = self.bollinger.upper - self.bollinger.lower;
        if band_span.abs() > f64::EPSILON {
            let position = (self.ema_fast - self.bollinger.lower) / band_span;
            if position > 0.5 {
                long_score += (position - 0.5) * 40.0;
            } else {
                short_score += (0.5 - position) * 40.0;
            }
        }

        let (direction, confidence) = if long_score > short_score {
            (Direction::Long, long_score)
        } else if short_score > long_score {
            (Direction::Short, short_score)
        } else {
            (Direction::Neutral, 0.0)
        };

        (direction, confidence.min(100.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(close: f64) -> Candle {
        Candle {
            open_time_ms: 0,
            open: close,
            high: close * 1.001,
            low: close * 0.999,
            close,
            volume: 100.0,
            close_time_ms: 0,
            quote_volume: 0.0,
            trades: 0,
        }
    }

    fn series(closes: &[f64]) -> Vec<Candle> {
        closes.iter().map(|c| candle(*c)).collect()
    }

    #[test]
    fn rsi_on_fewer_than_period_plus_one_candles_is_neutral() {
        let candles = series(&[1.0, 2.0, 3.0]);
        assert_eq!(rsi(&candles, 14), 50.0);
    }

    #[test]
    fn adx_on_fewer_than_two_periods_is_neutral_default() {
        let candles = series(&[1.0; 10]);
        let result = adx(&candles, 14);
        assert_eq!(result.adx, 25.0);
        assert_eq!(result.plus_di, 50.0);
        assert_eq!(result.minus_di, 50.0);
    }

    #[test]
    fn ema_seeds_with_sma_of_first_period() {
        let candles = series(&[1.0, 2.0, 3.0]);
        assert_eq!(ema(&candles, 3), 2.0);
    }

    #[test]
    fn rsi_is_100_when_all_moves_are_gains() {
        let candles = series(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(rsi(&candles, 5), 100.0);
    }

    #[test]
    fn uptrend_candles_classify_long() {
        let mut closes = vec![100.0];
        for i in 1..40 {
            closes.push(100.0 + i as f64 * 1.5);
        }
        let candles = series(&closes);
        let snapshot = IndicatorSnapshot::compute(&candles);
        let (direction, confidence) = snapshot.classify_technical();
        assert_eq!(direction, Direction::Long);
        assert!(confidence > 0.0);
    }

    #[test]
    fn insufficient_data_yields_neutral_zero_confidence() {
        let candles = series(&[100.0, 101.0]);
        let snapshot = IndicatorSnapshot::compute(&candles);
        assert!(snapshot.insufficient);
        assert_eq!(snapshot.classify_technical(), (Direction::Neutral, 0.0));
    }
}
