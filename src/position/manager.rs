//! Position Manager (C6b) — the design-critical component.
//!
//! Owns every mutation of `Position` state. Grounded in the teacher's
//! `position::position_manager::PositionManager` method shapes
//! (`open_position`, `update_position_price`/`update_all_positions`,
//! `check_stop_losses`/`check_take_profits`) and `agents::zero_loss_enforcer`'s
//! guard-chain style for `open_position`'s pre-checks, generalized from the
//! teacher's flat single-SL/single-TP position to the multi-mode
//! TP-ladder/trailing lifecycle the specification describes.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex as AsyncMutex, RwLock as AsyncRwLock};
use tracing::{info, warn};

use crate::blocklist::BlockedSymbolRegistry;
use crate::circuit_breaker::CircuitBreaker;
use crate::config::Settings;
use crate::decision::Decision;
use crate::error::{GinieError, GinieResult, Outcome};
use crate::exchange::types::{MarginType, OrderParams, OrderStatus, OrderType, Side, SymbolSpec};
use crate::exchange::Exchange;
use crate::indicators::Direction;
use crate::instance::InstanceControl;
use crate::mode::ModePolicy;
use crate::precision::PrecisionCache;
use crate::store::Store;

use super::model::{Position, PositionKey, PositionSource, PositionState, TakeProfitLevel, TpStatus, TradeRecord};

/// Multiplier `k` in `max(mode.minSL%, k · ATR%)`.
const ADAPTIVE_SL_ATR_MULTIPLIER: f64 = 1.5;
/// Slippage buffer applied to SL exits and reused for move-to-breakeven.
const SLIPPAGE_BUFFER_PCT: f64 = 0.1;
const TAKER_FEE_PCT: f64 = 0.05;
const EARLY_PROFIT_FLOOR_PCT: f64 = 0.1;
const ULTRA_FAST_SECURE_AFTER: chrono::Duration = chrono::Duration::seconds(1);
const ULTRA_FAST_FORCE_EXIT_AFTER: chrono::Duration = chrono::Duration::seconds(3);

pub struct PositionManager {
    exchange: Arc<dyn Exchange>,
    precision: Arc<PrecisionCache>,
    circuit_breaker: Arc<CircuitBreaker>,
    blocklist: Arc<BlockedSymbolRegistry>,
    instance: Arc<InstanceControl>,
    store: Arc<dyn Store>,
    settings: Arc<Settings>,
    positions: AsyncRwLock<HashMap<PositionKey, Position>>,
    symbol_locks: std::sync::Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

pub struct CloseOutcome {
    pub remaining_qty: f64,
    pub realized_pnl_delta: f64,
    pub reason: String,
}

impl PositionManager {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        precision: Arc<PrecisionCache>,
        circuit_breaker: Arc<CircuitBreaker>,
        blocklist: Arc<BlockedSymbolRegistry>,
        instance: Arc<InstanceControl>,
        store: Arc<dyn Store>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            exchange,
            precision,
            circuit_breaker,
            blocklist,
            instance,
            store,
            settings,
            positions: AsyncRwLock::new(HashMap::new()),
            symbol_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, symbol: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.symbol_locks.lock().unwrap();
        locks.entry(symbol.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    pub async fn open_positions_snapshot(&self) -> Vec<Position> {
        self.positions.read().await.values().cloned().collect()
    }

    pub async fn get(&self, key: &PositionKey) -> Option<Position> {
        self.positions.read().await.get(key).cloned()
    }

    fn count_active_for_mode(positions: &HashMap<PositionKey, Position>, mode: crate::mode::Mode) -> usize {
        positions.values().filter(|p| p.mode == mode && !p.is_closed()).count()
    }

    // ---- open_position --------------------------------------------------

    /// Pre-checks in order, per the specification: instance active, circuit
    /// breaker, symbol not blocked, confidence floor, capacity, precision.
    /// Guard rejections (a)-(e) never error — they resolve to
    /// `Outcome::Skipped`. Order/precision failures (f) and beyond resolve
    /// to `Outcome::Rejected`.
    pub async fn open_position(
        &self,
        decision: &Decision,
        spec: &SymbolSpec,
        capital: f64,
        leverage: f64,
        policy: &ModePolicy,
        atr_pct: f64,
    ) -> GinieResult<Outcome> {
        if !self.instance.is_active() {
            return Ok(Outcome::Skipped { reason: "instance not active".to_string() });
        }

        let (allowed, reason) = self.circuit_breaker.can_trade();
        if !allowed {
            return Ok(Outcome::Skipped { reason: reason.unwrap_or_else(|| "circuit open".to_string()) });
        }

        if let Some((reason, _)) = self.blocklist.status(&decision.symbol) {
            return Ok(Outcome::Skipped { reason: format!("symbol blocked: {reason}") });
        }

        if decision.final_confidence < policy.min_confidence {
            return Ok(Outcome::Skipped {
                reason: format!("confidence {:.1} below minimum {:.1}", decision.final_confidence, policy.min_confidence),
            });
        }

        let side = match decision.final_direction {
            Direction::Long => Side::Long,
            Direction::Short => Side::Short,
            Direction::Neutral => return Ok(Outcome::Skipped { reason: "neutral direction".to_string() }),
        };

        {
            let positions = self.positions.read().await;
            let active = Self::count_active_for_mode(&positions, policy.mode);
            if active >= policy.max_concurrent {
                return Ok(Outcome::Skipped { reason: format!("capacity {active}/{} for mode", policy.max_concurrent) });
            }
        }

        let lock = self.lock_for(&decision.symbol).await;
        let _guard = lock.lock().await;

        // Re-check uniqueness under the symbol lock: at most one open
        // position per (symbol, side, mode) absent hedge mode.
        {
            let positions = self.positions.read().await;
            let key = PositionKey::new(decision.symbol.clone(), side, policy.mode);
            if positions.get(&key).map(|p| !p.is_closed()).unwrap_or(false) {
                return Ok(Outcome::Skipped { reason: "position already open for (symbol, side, mode)".to_string() });
            }
        }

        let mark_price = match self.exchange.mark_price(&decision.symbol).await {
            Ok(p) => p,
            Err(e) => return Ok(Outcome::Rejected { reason: format!("mark price unavailable: {e}") }),
        };

        let raw_qty = (capital * leverage) / mark_price;
        let qty = match self.precision.round_qty(&decision.symbol, raw_qty, mark_price) {
            Ok(q) => q,
            Err(e) => {
                self.blocklist.record_block(&decision.symbol, e.to_string());
                return Ok(Outcome::Rejected { reason: e.to_string() });
            }
        };

        let order = OrderParams {
            symbol: decision.symbol.clone(),
            side: side.opening_order_side(),
            order_type: OrderType::Market,
            quantity: qty,
            price: None,
            trigger_price: None,
            reduce_only: false,
            position_side: side,
            close_position: false,
        };

        let ack = match self.exchange.place_order(order).await {
            Ok(ack) if ack.status != OrderStatus::Rejected => ack,
            Ok(ack) => {
                self.blocklist.record_block(&decision.symbol, "entry order rejected by exchange");
                return Ok(Outcome::Rejected { reason: format!("entry rejected: {:?}", ack.status) });
            }
            Err(e) => {
                self.blocklist.record_block(&decision.symbol, e.to_string());
                return Ok(Outcome::Rejected { reason: format!("entry order failed: {e}") });
            }
        };

        let entry_price = ack.avg_price.unwrap_or(mark_price);
        let chain_id = uuid::Uuid::new_v4().to_string();

        let sl_pct = effective_sl_pct(decision, policy, atr_pct);
        let stop_loss = self
            .precision
            .round_price_for_sl(&decision.symbol, sl_price(entry_price, sl_pct, side), side)
            .map_err(|e| GinieError::PrecisionMissing(e.to_string()))?;

        let tp_ladder = build_tp_ladder(decision, policy, spec, entry_price, side, &self.precision)?;
        let custom_roi_percent = Some(self.settings.roi_target_for(&decision.symbol, &chain_id, policy.mode));

        let mut position = Position {
            symbol: decision.symbol.clone(),
            side,
            mode: policy.mode,
            source: PositionSource::Ai,
            chain_id: chain_id.clone(),
            state: PositionState::Managing,
            entry_price,
            original_qty: qty,
            remaining_qty: qty,
            leverage,
            margin_type: MarginType::Isolated,
            stop_loss,
            original_stop_loss: stop_loss,
            stop_loss_algo_id: None,
            highest_price: entry_price,
            lowest_price: entry_price,
            trailing_active: false,
            trailing_percent: policy.trailing_pct,
            moved_to_breakeven: false,
            tp_ladder,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            custom_roi_percent,
            entry_time: Utc::now(),
            last_llm_update: decision.llm_confidence.map(|_| Utc::now()),
            max_hold_end: None,
        };

        if let Ok(ack) = self
            .exchange
            .place_order(OrderParams {
                symbol: decision.symbol.clone(),
                side: side.closing_order_side(),
                order_type: OrderType::StopMarket,
                quantity: position.remaining_qty,
                price: None,
                trigger_price: Some(stop_loss),
                reduce_only: true,
                position_side: side,
                close_position: false,
            })
            .await
        {
            position.stop_loss_algo_id = Some(ack.order_id);
        } else {
            warn!(symbol = %decision.symbol, "SL algo order placement failed, falling back to software enforcement");
        }

        if let Some(tp1) = position.tp_ladder.first() {
            let qty = self.precision.round_qty(&decision.symbol, tp1.qty_share * position.original_qty, entry_price).unwrap_or(0.0);
            if qty > 0.0 {
                if let Ok(ack) = self
                    .exchange
                    .place_order(OrderParams {
                        symbol: decision.symbol.clone(),
                        side: side.closing_order_side(),
                        order_type: OrderType::TakeProfitMarket,
                        quantity: qty,
                        price: None,
                        trigger_price: Some(tp1.price),
                        reduce_only: true,
                        position_side: side,
                        close_position: false,
                    })
                    .await
                {
                    position.tp_ladder[0].algo_id = Some(ack.order_id);
                }
            }
        }

        let key = position.key();
        self.persist(&position).await;
        self.positions.write().await.insert(key, position);

        info!(symbol = %decision.symbol, %chain_id, "opened position");
        Ok(Outcome::Opened { chain_id })
    }

    async fn persist(&self, position: &Position) {
        let key = format!("ginie:position:{}:{:?}:{:?}", position.symbol, position.side, position.mode);
        if let Ok(json) = serde_json::to_string(position) {
            if let Err(e) = self.store.set(&key, &json).await {
                warn!(error = %e, "failed to persist position");
            }
        }
    }

    async fn archive(&self, position: &Position, exit_price: f64, close_reason: &str) {
        let record = TradeRecord {
            symbol: position.symbol.clone(),
            side: position.side,
            mode: position.mode,
            chain_id: position.chain_id.clone(),
            entry_price: position.entry_price,
            exit_price,
            quantity: position.original_qty,
            realized_pnl: position.realized_pnl,
            fees_paid: position.original_qty * position.entry_price * (TAKER_FEE_PCT / 100.0) * 2.0,
            entry_time: position.entry_time,
            exit_time: Utc::now(),
            close_reason: close_reason.to_string(),
        };
        let key = format!("ginie:trade:{}:{}", position.symbol, position.chain_id);
        if let Ok(json) = serde_json::to_string(&record) {
            let _ = self.store.set(&key, &json).await;
        }
        self.circuit_breaker.record_trade(position.raw_pnl_pct(exit_price));
    }

    // ---- on_mark_price ----------------------------------------------------

    /// Fast path (500 ms cadence). Updates every open position on `symbol`
    /// in priority order: SL check, TP cascade, trailing, early profit,
    /// ultra-fast time exits.
    pub async fn on_mark_price(&self, symbol: &str, price: f64) -> GinieResult<()> {
        let lock = self.lock_for(symbol).await;
        let _guard = lock.lock().await;

        let keys: Vec<PositionKey> = {
            let positions = self.positions.read().await;
            positions.keys().filter(|k| k.symbol == symbol).cloned().collect()
        };

        for key in keys {
            self.tick_position(&key, price).await?;
        }
        Ok(())
    }

    async fn tick_position(&self, key: &PositionKey, price: f64) -> GinieResult<()> {
        let mut positions = self.positions.write().await;
        let Some(position) = positions.get_mut(key) else { return Ok(()) };
        if position.is_closed() {
            return Ok(());
        }

        position.highest_price = position.highest_price.max(price);
        position.lowest_price = position.lowest_price.min(price);
        position.unrealized_pnl = match position.side {
            Side::Long => (price - position.entry_price) * position.remaining_qty,
            Side::Short => (position.entry_price - price) * position.remaining_qty,
        };

        // 1. stop loss, highest priority.
        let sl_hit = match position.side {
            Side::Long => price <= position.stop_loss,
            Side::Short => price >= position.stop_loss,
        };
        if sl_hit {
            let exit_price = slippage_adjusted_exit(price, position.side);
            self.close_full_locked(position, exit_price, "stop_loss_hit").await;
            let archived = position.clone();
            drop(positions);
            self.archive(&archived, exit_price, "stop_loss_hit").await;
            return Ok(());
        }

        // 2. TP cascade — may hit multiple levels in one tick; only the
        // final newly-pending level gets an exchange order placed.
        let mut hit_any = false;
        loop {
            let Some(idx) = position
                .tp_ladder
                .iter()
                .position(|tp| tp.status == TpStatus::Pending)
            else {
                break;
            };
            let triggered = match position.side {
                Side::Long => price >= position.tp_ladder[idx].price,
                Side::Short => price <= position.tp_ladder[idx].price,
            };
            if !triggered {
                break;
            }

            let share = position.tp_ladder[idx].qty_share;
            let level = position.tp_ladder[idx].level;
            let is_final = position.is_final_tp(level);

            // The final level never executes as a flat-qty close: it rides
            // under the trailing stop instead, so the runner isn't capped.
            if !is_final {
                let close_qty = self
                    .precision
                    .round_qty(&key.symbol, share * position.original_qty, price)
                    .unwrap_or(0.0);

                if close_qty <= 0.0 {
                    // zero-qty level: skip it, roll its share into the next pending level.
                    position.tp_ladder[idx].status = TpStatus::Cancelled;
                    if let Some(next) = position.tp_ladder.iter_mut().skip(idx + 1).find(|tp| tp.status == TpStatus::Pending) {
                        next.qty_share += share;
                    }
                    continue;
                }

                position.remaining_qty = (position.remaining_qty - close_qty).max(0.0);
                position.realized_pnl += match position.side {
                    Side::Long => (price - position.entry_price) * close_qty,
                    Side::Short => (position.entry_price - price) * close_qty,
                };
            }

            position.tp_ladder[idx].status = TpStatus::Hit;
            hit_any = true;

            if level == 1 && !position.moved_to_breakeven {
                position.stop_loss = breakeven_price(position.entry_price, position.side);
                position.moved_to_breakeven = true;
            }

            if is_final {
                position.trailing_active = true;
                position.state = PositionState::Trailing;
                break;
            } else {
                position.state = PositionState::PartialClosed;
            }
        }

        if hit_any && position.remaining_qty <= 0.0 {
            position.state = PositionState::Closed;
            let archived = position.clone();
            drop(positions);
            self.archive(&archived, price, "tp_ladder_complete").await;
            return Ok(());
        }

        if hit_any {
            let next_pending = position.next_pending_tp().cloned();
            let symbol = key.symbol.clone();
            let side = position.side;
            let remaining = position.remaining_qty;
            drop(positions);
            let _ = self.exchange.cancel_all_algo(&symbol).await;
            if let Some(next) = next_pending {
                let qty = self.precision.round_qty(&symbol, next.qty_share * remaining.max(0.0), price).unwrap_or(0.0);
                if qty > 0.0 {
                    if let Ok(ack) = self
                        .exchange
                        .place_order(OrderParams {
                            symbol: symbol.clone(),
                            side: side.closing_order_side(),
                            order_type: OrderType::TakeProfitMarket,
                            quantity: qty,
                            price: None,
                            trigger_price: Some(next.price),
                            reduce_only: true,
                            position_side: side,
                            close_position: false,
                        })
                        .await
                    {
                        if let Some(position) = self.positions.write().await.get_mut(key) {
                            if let Some(level) = position.next_pending_tp_mut() {
                                level.algo_id = Some(ack.order_id);
                            }
                        }
                    }
                }
            }
            return Ok(());
        }

        // 3. trailing stop.
        if position.trailing_active {
            let candidate = match position.side {
                Side::Long => position.highest_price * (1.0 - position.trailing_percent / 100.0),
                Side::Short => position.lowest_price * (1.0 + position.trailing_percent / 100.0),
            };
            position.stop_loss = match position.side {
                Side::Long => position.stop_loss.max(candidate),
                Side::Short => position.stop_loss.min(candidate),
            };
        }

        // 4. early profit booking.
        let roi_pct = position.leveraged_roi_pct(price) - 2.0 * TAKER_FEE_PCT * position.leverage;
        let target = position.custom_roi_percent.unwrap_or(0.0).max(EARLY_PROFIT_FLOOR_PCT);
        if target > EARLY_PROFIT_FLOOR_PCT && roi_pct >= target {
            self.close_full_locked(position, price, "early_profit").await;
            let archived = position.clone();
            drop(positions);
            self.archive(&archived, price, "early_profit").await;
            return Ok(());
        }

        // 5. ultra-fast time exits.
        if position.mode == crate::mode::Mode::UltraFast {
            let elapsed = Utc::now() - position.entry_time;
            if elapsed > ULTRA_FAST_FORCE_EXIT_AFTER {
                self.close_full_locked(position, price, "time_exit_forced").await;
                let archived = position.clone();
                drop(positions);
                self.archive(&archived, price, "time_exit_forced").await;
                return Ok(());
            }
            if elapsed > ULTRA_FAST_SECURE_AFTER && position.raw_pnl_pct(price) > 0.0 && !position.trailing_active {
                position.trailing_active = true;
                position.trailing_percent = position.trailing_percent.min(0.2);
            }
        }

        Ok(())
    }

    async fn close_full_locked(&self, position: &mut Position, exit_price: f64, reason: &str) {
        let qty = position.remaining_qty;
        position.realized_pnl += match position.side {
            Side::Long => (exit_price - position.entry_price) * qty,
            Side::Short => (position.entry_price - exit_price) * qty,
        };
        position.remaining_qty = 0.0;
        position.state = PositionState::Closed;

        let _ = self
            .exchange
            .place_order(OrderParams {
                symbol: position.symbol.clone(),
                side: position.side.closing_order_side(),
                order_type: OrderType::Limit,
                quantity: qty,
                price: Some(exit_price),
                trigger_price: None,
                reduce_only: true,
                position_side: position.side,
                close_position: true,
            })
            .await;
        let _ = self.exchange.cancel_all_algo(&position.symbol).await;

        info!(symbol = %position.symbol, %reason, "closed position");
    }

    // ---- reconciliation ----------------------------------------------------

    pub async fn on_account_update(&self, symbol: &str, side: Side, remaining_qty: f64, realized_pnl_delta: f64) -> GinieResult<()> {
        let mut positions = self.positions.write().await;
        let Some((_, position)) = positions.iter_mut().find(|(k, p)| k.symbol == symbol && p.side == side && !p.is_closed()) else {
            return Ok(());
        };

        if !remaining_qty.is_finite() || !realized_pnl_delta.is_finite() {
            return Err(GinieError::DataIntegrity(format!("non-finite account update for {symbol}")));
        }

        position.remaining_qty = remaining_qty;
        position.realized_pnl += realized_pnl_delta;

        if remaining_qty <= 0.0 && !position.is_closed() {
            position.state = PositionState::Closed;
            let archived = position.clone();
            drop(positions);
            self.archive(&archived, archived.entry_price, "reconciled_closed").await;
        }
        Ok(())
    }

    pub async fn on_order_update(&self, symbol: &str, order_id: &str, status: OrderStatus, filled_qty: f64, avg_price: f64) -> GinieResult<()> {
        let mut positions = self.positions.write().await;
        for position in positions.values_mut().filter(|p| p.symbol == symbol) {
            if position.stop_loss_algo_id.as_deref() == Some(order_id) && status == OrderStatus::Filled {
                position.remaining_qty = (position.remaining_qty - filled_qty).max(0.0);
                position.realized_pnl += match position.side {
                    Side::Long => (avg_price - position.entry_price) * filled_qty,
                    Side::Short => (position.entry_price - avg_price) * filled_qty,
                };
                if position.remaining_qty <= 0.0 {
                    position.state = PositionState::Closed;
                }
            }
            for tp in position.tp_ladder.iter_mut() {
                if tp.algo_id.as_deref() == Some(order_id) && status == OrderStatus::Filled {
                    tp.status = TpStatus::Hit;
                }
            }
        }
        Ok(())
    }

    /// Full rebuild from exchange truth: discards local state for positions
    /// the exchange no longer reports, reimports quantity/entry price for
    /// positions it does, and adopts exchange positions this instance has no
    /// local record of at all — orphans left behind by a failed-over peer.
    pub async fn resync_with_exchange(&self) -> anyhow::Result<()> {
        let exchange_positions = self.exchange.positions().await?;
        let mut positions = self.positions.write().await;

        for (key, position) in positions.iter_mut() {
            if let Some(found) = exchange_positions.iter().find(|ep| ep.symbol == key.symbol && ep.side == key.side) {
                position.remaining_qty = found.quantity;
                position.entry_price = found.entry_price;
                position.leverage = found.leverage;
                position.margin_type = found.margin_type;
            } else if !position.is_closed() {
                position.remaining_qty = 0.0;
                position.state = PositionState::Closed;
            }
        }

        // An adopted position carries no TP-ladder or mode history, so it
        // recovers straight into Trailing under the Swing default trailing
        // percent rather than guessing at a ladder that no longer exists.
        for found in &exchange_positions {
            let already_tracked = positions.keys().any(|k| k.symbol == found.symbol && k.side == found.side);
            if already_tracked {
                continue;
            }
            let mode = crate::mode::Mode::Swing;
            let policy = ModePolicy::default_for(mode);
            let stop_loss = sl_price(found.entry_price, policy.min_sl_pct, found.side);
            let chain_id = uuid::Uuid::new_v4().to_string();
            let custom_roi_percent = Some(self.settings.roi_target_for(&found.symbol, &chain_id, mode));
            let adopted = Position {
                symbol: found.symbol.clone(),
                side: found.side,
                mode,
                source: PositionSource::Ai,
                chain_id,
                state: PositionState::Trailing,
                entry_price: found.entry_price,
                original_qty: found.quantity,
                remaining_qty: found.quantity,
                leverage: found.leverage,
                margin_type: found.margin_type,
                stop_loss,
                original_stop_loss: stop_loss,
                stop_loss_algo_id: None,
                highest_price: found.entry_price,
                lowest_price: found.entry_price,
                trailing_active: true,
                trailing_percent: policy.trailing_pct,
                moved_to_breakeven: false,
                tp_ladder: vec![],
                realized_pnl: 0.0,
                unrealized_pnl: 0.0,
                custom_roi_percent,
                entry_time: Utc::now(),
                last_llm_update: None,
                max_hold_end: None,
            };
            warn!(symbol = %found.symbol, "adopted orphaned exchange position with no local record");
            positions.insert(adopted.key(), adopted);
        }
        Ok(())
    }

    /// Recomputes SL/TP via ATR (and, optionally, a refreshed LLM opinion),
    /// replacing exchange orders only when the change improves protection:
    /// SL may only move toward breakeven/profit, TP may only tighten after
    /// profitable drift.
    pub async fn recalculate_adaptive_sl_tp(&self, symbol: &str, atr_pct: f64, mark_price: f64) -> GinieResult<()> {
        let mut positions = self.positions.write().await;
        for (key, position) in positions.iter_mut().filter(|(k, p)| k.symbol == symbol && !p.is_closed()) {
            let candidate_sl_pct = (ADAPTIVE_SL_ATR_MULTIPLIER * atr_pct).max(0.01);
            let candidate = sl_price(position.entry_price, candidate_sl_pct, position.side);
            let improves = match position.side {
                Side::Long => candidate > position.stop_loss && candidate <= mark_price,
                Side::Short => candidate < position.stop_loss && candidate >= mark_price,
            };
            if improves {
                if let Ok(rounded) = self.precision.round_price_for_sl(&key.symbol, candidate, position.side) {
                    position.stop_loss = rounded;
                    position.last_llm_update = Some(Utc::now());
                }
            }
        }
        Ok(())
    }
}

fn effective_sl_pct(decision: &Decision, policy: &ModePolicy, atr_pct: f64) -> f64 {
    let adaptive = (ADAPTIVE_SL_ATR_MULTIPLIER * atr_pct).max(policy.min_sl_pct);
    if decision.suggested_sl_pct > 0.0 {
        decision.suggested_sl_pct.max(policy.min_sl_pct)
    } else {
        adaptive
    }
}

fn sl_price(entry_price: f64, sl_pct: f64, side: Side) -> f64 {
    match side {
        Side::Long => entry_price * (1.0 - sl_pct / 100.0),
        Side::Short => entry_price * (1.0 + sl_pct / 100.0),
    }
}

fn breakeven_price(entry_price: f64, side: Side) -> f64 {
    match side {
        Side::Long => entry_price * (1.0 + SLIPPAGE_BUFFER_PCT / 100.0),
        Side::Short => entry_price * (1.0 - SLIPPAGE_BUFFER_PCT / 100.0),
    }
}

fn slippage_adjusted_exit(price: f64, side: Side) -> f64 {
    match side {
        Side::Long => price * (1.0 - SLIPPAGE_BUFFER_PCT / 100.0),
        Side::Short => price * (1.0 + SLIPPAGE_BUFFER_PCT / 100.0),
    }
}

fn build_tp_ladder(
    decision: &Decision,
    policy: &ModePolicy,
    spec: &SymbolSpec,
    entry_price: f64,
    side: Side,
    precision: &PrecisionCache,
) -> GinieResult<Vec<TakeProfitLevel>> {
    let _ = spec;
    let scale = if decision.suggested_tp_pct > 0.0 {
        let last_default = policy.tp_ladder.last().map(|l| l.trigger_pct).unwrap_or(1.0).max(0.01);
        decision.suggested_tp_pct / last_default
    } else {
        1.0
    };

    let mut levels = Vec::with_capacity(policy.tp_ladder.len());
    for (idx, level) in policy.tp_ladder.iter().enumerate() {
        let trigger_pct = level.trigger_pct * scale;
        let raw_price = match side {
            Side::Long => entry_price * (1.0 + trigger_pct / 100.0),
            Side::Short => entry_price * (1.0 - trigger_pct / 100.0),
        };
        let price = precision.round_price_for_tp(&decision.symbol, raw_price, side)?;
        levels.push(TakeProfitLevel {
            level: (idx + 1) as u8,
            price,
            qty_share: level.qty_share,
            algo_id: None,
            status: TpStatus::Pending,
        });
    }
    Ok(levels)
}

#[allow(dead_code)]
fn last_update(position: &Position) -> Option<DateTime<Utc>> {
    position.last_llm_update
}
