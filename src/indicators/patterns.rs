//! Simple candlestick pattern detection, part of the Indicator Kernel.

use crate::exchange::types::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    Hammer,
    BullishEngulfing,
    BearishEngulfing,
    MorningStar,
    EveningStar,
    ThreeWhiteSoldiers,
    ThreeBlackCrows,
}

fn body(c: &Candle) -> f64 {
    (c.close - c.open).abs()
}

fn range(c: &Candle) -> f64 {
    (c.high - c.low).max(f64::EPSILON)
}

fn lower_wick(c: &Candle) -> f64 {
    c.open.min(c.close) - c.low
}

fn upper_wick(c: &Candle) -> f64 {
    c.high - c.open.max(c.close)
}

fn is_bullish(c: &Candle) -> bool {
    c.close > c.open
}

fn is_bearish(c: &Candle) -> bool {
    c.close < c.open
}

fn is_hammer(c: &Candle) -> bool {
    let b = body(c);
    let r = range(c);
    b / r < 0.35 && lower_wick(c) > b * 2.0 && upper_wick(c) < b
}

fn is_bullish_engulfing(prev: &Candle, cur: &Candle) -> bool {
    is_bearish(prev) && is_bullish(cur) && cur.open <= prev.close && cur.close >= prev.open
}

fn is_bearish_engulfing(prev: &Candle, cur: &Candle) -> bool {
    is_bullish(prev) && is_bearish(cur) && cur.open >= prev.close && cur.close <= prev.open
}

fn is_morning_star(a: &Candle, b: &Candle, c: &Candle) -> bool {
    is_bearish(a)
        && body(b) / range(b) < 0.3
        && b.high.max(b.low) < a.close
        && is_bullish(c)
        && c.close > (a.open + a.close) / 2.0
}

fn is_evening_star(a: &Candle, b: &Candle, c: &Candle) -> bool {
    is_bullish(a)
        && body(b) / range(b) < 0.3
        && b.low.min(b.high) > a.close
        && is_bearish(c)
        && c.close < (a.open + a.close) / 2.0
}

fn is_three_white_soldiers(candles: &[Candle]) -> bool {
    candles.len() == 3
        && candles.iter().all(is_bullish)
        && candles[0].close < candles[1].close
        && candles[1].close < candles[2].close
        && candles.windows(2).all(|w| w[1].open > w[0].open && w[1].open < w[0].close)
}

fn is_three_black_crows(candles: &[Candle]) -> bool {
    candles.len() == 3
        && candles.iter().all(is_bearish)
        && candles[0].close > candles[1].close
        && candles[1].close > candles[2].close
        && candles.windows(2).all(|w| w[1].open < w[0].open && w[1].open > w[0].close)
}

/// Detects all patterns whose window ends at the last candle.
pub fn detect_patterns(candles: &[Candle]) -> Vec<Pattern> {
    let mut found = Vec::new();
    let n = candles.len();
    if n == 0 {
        return found;
    }

    if is_hammer(&candles[n - 1]) {
        found.push(Pattern::Hammer);
    }

    if n >= 2 {
        let prev = &candles[n - 2];
        let cur = &candles[n - 1];
        if is_bullish_engulfing(prev, cur) {
            found.push(Pattern::BullishEngulfing);
        }
        if is_bearish_engulfing(prev, cur) {
            found.push(Pattern::BearishEngulfing);
        }
    }

    if n >= 3 {
        let (a, b, c) = (&candles[n - 3], &candles[n - 2], &candles[n - 1]);
        if is_morning_star(a, b, c) {
            found.push(Pattern::MorningStar);
        }
        if is_evening_star(a, b, c) {
            found.push(Pattern::EveningStar);
        }
        let last3 = &candles[n - 3..];
        if is_three_white_soldiers(last3) {
            found.push(Pattern::ThreeWhiteSoldiers);
        }
        if is_three_black_crows(last3) {
            found.push(Pattern::ThreeBlackCrows);
        }
    }

    found
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
    fn detects_hammer() {
        let candles = vec![c(100.0, 100.5, 95.0, 100.3)];
        assert!(detect_patterns(&candles).contains(&Pattern::Hammer));
    }

    #[test]
    fn detects_bullish_engulfing() {
        let candles = vec![c(100.0, 100.2, 98.0, 98.5), c(98.0, 101.5, 97.8, 101.0)];
        assert!(detect_patterns(&candles).contains(&Pattern::BullishEngulfing));
    }

    #[test]
    fn detects_three_white_soldiers() {
        let candles = vec![
            c(100.0, 102.0, 99.5, 101.8),
            c(101.2, 103.5, 101.0, 103.2),
            c(103.0, 105.5, 102.8, 105.0),
        ];
        assert!(detect_patterns(&candles).contains(&Pattern::ThreeWhiteSoldiers));
    }
}
