//! Pivot points, Fair Value Gap, and Order Block detection (Indicator Kernel).

use crate::exchange::types::Candle;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PivotPoints {
    pub pivot: f64,
    pub r1: f64,
    pub r2: f64,
    pub s1: f64,
    pub s2: f64,
    pub fib_r1: f64,
    pub fib_r2: f64,
    pub fib_s1: f64,
    pub fib_s2: f64,
}

/// Classic and Fibonacci pivot points computed from the prior candle's
/// high/low/close.
pub fn pivot_points(prior: &Candle) -> PivotPoints {
    let pivot = (prior.high + prior.low + prior.close) / 3.0;
    let range = prior.high - prior.low;
    PivotPoints {
        pivot,
        r1: 2.0 * pivot - prior.low,
        r2: pivot + range,
        s1: 2.0 * pivot - prior.high,
        s2: pivot - range,
        fib_r1: pivot + 0.382 * range,
        fib_r2: pivot + 0.618 * range,
        fib_s1: pivot - 0.382 * range,
        fib_s2: pivot - 0.618 * range,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GapDirection {
    Bullish,
    Bearish,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FairValueGap {
    pub direction: GapDirection,
    pub top: f64,
    pub bottom: f64,
    pub index: usize,
}

/// Three-candle gap detector: the middle candle's wicks fail to overlap the
/// outer two candles, leaving an untraded price zone likely to be revisited.
pub fn detect_fair_value_gaps(candles: &[Candle]) -> Vec<FairValueGap> {
    let mut gaps = Vec::new();
    if candles.len() < 3 {
        return gaps;
    }
    for i in 0..candles.len() - 2 {
        let (a, _b, c) = (&candles[i], &candles[i + 1], &candles[i + 2]);
        if c.low > a.high {
            gaps.push(FairValueGap {
                direction: GapDirection::Bullish,
                top: c.low,
                bottom: a.high,
                index: i + 1,
            });
        } else if c.high < a.low {
            gaps.push(FairValueGap {
                direction: GapDirection::Bearish,
                top: a.low,
                bottom: c.high,
                index: i + 1,
            });
        }
    }
    gaps
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderBlock {
    pub direction: GapDirection,
    pub high: f64,
    pub low: f64,
    pub index: usize,
}

/// Last opposing candle preceding a strong move (>= 1%) in the opposite
/// direction from that candle's body.
pub fn detect_order_blocks(candles: &[Candle]) -> Vec<OrderBlock> {
    const STRONG_MOVE_PCT: f64 = 1.0;
    let mut blocks = Vec::new();
    if candles.len() < 2 {
        return blocks;
    }
    for i in 0..candles.len() - 1 {
        let candidate = &candles[i];
        let mover = &candles[i + 1];
        let move_pct = (mover.close - mover.open).abs() / mover.open.max(f64::EPSILON) * 100.0;
        if move_pct < STRONG_MOVE_PCT {
            continue;
        }
        let mover_is_bullish = mover.close > mover.open;
        let candidate_is_bearish = candidate.close < candidate.open;
        let candidate_is_bullish = candidate.close > candidate.open;

        if mover_is_bullish && candidate_is_bearish {
            blocks.push(OrderBlock {
                direction: GapDirection::Bullish,
                high: candidate.high,
                low: candidate.low,
                index: i,
            });
        } else if !mover_is_bullish && candidate_is_bullish {
            blocks.push(OrderBlock {
                direction: GapDirection::Bearish,
                high: candidate.high,
                low: candidate.low,
                index: i,
            });
        }
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open_time_ms: 0,
            open,
            high,
            low,
            close,
            volume: 1.0,
            close_time_ms: 0,
            quote_volume: 0.0,
            trades: 0,
        }
    }

    #[test]
    fn pivot_points_use_prior_hlc() {
        let prior = c(100.0, 110.0, 90.0, 105.0);
        let pivots = pivot_points(&prior);
        assert!((pivots.pivot - 101.6666).abs() < 0.01);
        assert!(pivots.r1 > pivots.pivot);
        assert!(pivots.s1 < pivots.pivot);
    }

    #[test]
    fn detects_bullish_fair_value_gap() {
        let candles = vec![c(100.0, 101.0, 99.0, 100.5), c(102.0, 103.0, 101.5, 102.8), c(103.5, 104.0, 102.5, 103.8)];
        let gaps = detect_fair_value_gaps(&candles);
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].direction, GapDirection::Bullish);
    }

    #[test]
    fn detects_order_block_preceding_strong_move() {
        let candles = vec![c(100.0, 101.0, 99.0, 99.5), c(99.5, 105.0, 99.4, 104.8)];
        let blocks = detect_order_blocks(&candles);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].direction, GapDirection::Bullish);
    }
}
