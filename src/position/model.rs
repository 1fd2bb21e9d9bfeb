//! Position data model and lifecycle state machine (C6a).
//!
//! Grounded in the teacher's `capital::manager::EnhancedPosition` field
//! layout, generalized from the teacher's fixed-12-USDT single-mode shape
//! to the multi-mode `(symbol, side, mode)` keyed model the specification
//! describes. `Option<T>` stands in for every "unset" field rather than a
//! sentinel value, per the crate-wide convention.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::exchange::types::{MarginType, Side};
use crate::mode::Mode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSource {
    Ai,
    Strategy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TpStatus {
    Pending,
    Hit,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeProfitLevel {
    pub level: u8,
    pub price: f64,
    pub qty_share: f64,
    pub algo_id: Option<String>,
    pub status: TpStatus,
}

/// `(symbol, side, mode)` — unique key for a managed position under the
/// default (non-hedge) invariant; hedge mode relaxes uniqueness to
/// `(symbol, mode)` per side, so the key stays the same shape either way.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    pub symbol: String,
    pub side: Side,
    pub mode: Mode,
}

impl PositionKey {
    pub fn new(symbol: impl Into<String>, side: Side, mode: Mode) -> Self {
        Self { symbol: symbol.into(), side, mode }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionState {
    Intent,
    EntryPending,
    Managing,
    PartialClosed,
    Trailing,
    Closing,
    Closed,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    // identity
    pub symbol: String,
    pub side: Side,
    pub mode: Mode,
    pub source: PositionSource,
    pub chain_id: String,
    pub state: PositionState,

    // sizing
    pub entry_price: f64,
    pub original_qty: f64,
    pub remaining_qty: f64,
    pub leverage: f64,
    pub margin_type: MarginType,

    // risk state
    pub stop_loss: f64,
    pub original_stop_loss: f64,
    pub stop_loss_algo_id: Option<String>,
    pub highest_price: f64,
    pub lowest_price: f64,
    pub trailing_active: bool,
    pub trailing_percent: f64,
    pub moved_to_breakeven: bool,

    // TP ladder
    pub tp_ladder: Vec<TakeProfitLevel>,

    // economics
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub custom_roi_percent: Option<f64>,

    // timestamps
    pub entry_time: DateTime<Utc>,
    pub last_llm_update: Option<DateTime<Utc>>,
    pub max_hold_end: Option<DateTime<Utc>>,
}

impl Position {
    pub fn key(&self) -> PositionKey {
        PositionKey::new(self.symbol.clone(), self.side, self.mode)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, PositionState::Closed | PositionState::Archived)
    }

    /// Invariant 1: `0 <= remainingQty <= originalQty`.
    pub fn check_qty_invariant(&self) -> bool {
        self.remaining_qty >= 0.0 && self.remaining_qty <= self.original_qty + f64::EPSILON
    }

    /// Invariant 2: sum of pending|hit TP shares equals original qty to
    /// step-size rounding tolerance.
    pub fn check_tp_ladder_invariant(&self, tolerance: f64) -> bool {
        let total: f64 = self
            .tp_ladder
            .iter()
            .filter(|tp| matches!(tp.status, TpStatus::Pending | TpStatus::Hit))
            .map(|tp| tp.qty_share * self.original_qty)
            .sum();
        (total - self.original_qty).abs() <= tolerance.max(1e-9)
    }

    /// Invariant 3: SL below entry and TP strictly increasing for LONG,
    /// mirrored for SHORT.
    pub fn check_price_ordering_invariant(&self) -> bool {
        let sl_ok = match self.side {
            Side::Long => self.original_stop_loss < self.entry_price,
            Side::Short => self.original_stop_loss > self.entry_price,
        };
        let mut prices: Vec<f64> = self.tp_ladder.iter().map(|tp| tp.price).collect();
        let tp_ok = match self.side {
            Side::Long => prices.windows(2).all(|w| w[0] < w[1]),
            Side::Short => {
                prices.reverse();
                prices.windows(2).all(|w| w[0] < w[1])
            }
        };
        sl_ok && tp_ok
    }

    pub fn next_pending_tp(&self) -> Option<&TakeProfitLevel> {
        self.tp_ladder.iter().find(|tp| tp.status == TpStatus::Pending)
    }

    pub fn next_pending_tp_mut(&mut self) -> Option<&mut TakeProfitLevel> {
        self.tp_ladder.iter_mut().find(|tp| tp.status == TpStatus::Pending)
    }

    pub fn is_final_tp(&self, level: u8) -> bool {
        self.tp_ladder.iter().map(|tp| tp.level).max() == Some(level)
    }

    /// Unrealized PnL percent before fees/leverage, signed by side.
    pub fn raw_pnl_pct(&self, mark_price: f64) -> f64 {
        match self.side {
            Side::Long => (mark_price - self.entry_price) / self.entry_price * 100.0,
            Side::Short => (self.entry_price - mark_price) / self.entry_price * 100.0,
        }
    }

    /// ROI after leverage but before fees, the quantity compared against the
    /// effective early-profit target before fee deduction happens upstream.
    pub fn leveraged_roi_pct(&self, mark_price: f64) -> f64 {
        self.raw_pnl_pct(mark_price) * self.leverage
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub side: Side,
    pub mode: Mode,
    pub chain_id: String,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    pub realized_pnl: f64,
    pub fees_paid: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub close_reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_long() -> Position {
        Position {
            symbol: "BTCUSDT".to_string(),
            side: Side::Long,
            mode: Mode::Scalp,
            source: PositionSource::Ai,
            chain_id: "chain-1".to_string(),
            state: PositionState::Managing,
            entry_price: 100.0,
            original_qty: 1.0,
            remaining_qty: 1.0,
            leverage: 10.0,
            margin_type: MarginType::Isolated,
            stop_loss: 99.0,
            original_stop_loss: 99.0,
            stop_loss_algo_id: None,
            highest_price: 100.0,
            lowest_price: 100.0,
            trailing_active: false,
            trailing_percent: 0.5,
            moved_to_breakeven: false,
            tp_ladder: vec![
                TakeProfitLevel { level: 1, price: 101.5, qty_share: 0.25, algo_id: None, status: TpStatus::Pending },
                TakeProfitLevel { level: 2, price: 103.0, qty_share: 0.25, algo_id: None, status: TpStatus::Pending },
                TakeProfitLevel { level: 3, price: 104.5, qty_share: 0.25, algo_id: None, status: TpStatus::Pending },
                TakeProfitLevel { level: 4, price: 106.0, qty_share: 0.25, algo_id: None, status: TpStatus::Pending },
            ],
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            custom_roi_percent: None,
            entry_time: Utc::now(),
            last_llm_update: None,
            max_hold_end: None,
        }
    }

    #[test]
    fn qty_invariant_holds_for_fresh_position() {
        let p = sample_long();
        assert!(p.check_qty_invariant());
    }

    #[test]
    fn tp_ladder_invariant_sums_to_original_qty() {
        let p = sample_long();
        assert!(p.check_tp_ladder_invariant(1e-6));
    }

    #[test]
    fn price_ordering_invariant_holds_for_long() {
        let p = sample_long();
        assert!(p.check_price_ordering_invariant());
    }

    #[test]
    fn price_ordering_invariant_catches_inverted_short() {
        let mut p = sample_long();
        p.side = Side::Short;
        p.original_stop_loss = 101.0;
        assert!(!p.check_price_ordering_invariant());
    }

    #[test]
    fn leveraged_roi_scales_raw_pnl_by_leverage() {
        let p = sample_long();
        assert!((p.leveraged_roi_pct(101.0) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn is_final_tp_matches_highest_level() {
        let p = sample_long();
        assert!(p.is_final_tp(4));
        assert!(!p.is_final_tp(2));
    }
}
