//! Shared fixtures for the end-to-end scenario tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;
use std::sync::Arc;

use async_trait::async_trait;

use ginie::exchange::types::{
    Candle, ExchangePosition, Interval, OrderAck, OrderParams, OrderStatus, SymbolSpec,
};
use ginie::exchange::Exchange;

/// An exchange double that always fills at a settable mark price and never
/// rejects an order, mirroring the unit-test double in `position::manager`
/// but exposed here since private test items don't cross the crate boundary.
pub struct FakeExchange {
    mark_price: StdMutex<f64>,
    order_counter: AtomicU64,
    placed: StdMutex<Vec<OrderParams>>,
    positions: StdMutex<Vec<ExchangePosition>>,
}

impl FakeExchange {
    pub fn new(mark_price: f64) -> Self {
        Self {
            mark_price: StdMutex::new(mark_price),
            order_counter: AtomicU64::new(0),
            placed: StdMutex::new(Vec::new()),
            positions: StdMutex::new(Vec::new()),
        }
    }

    pub fn set_mark_price(&self, price: f64) {
        *self.mark_price.lock().unwrap() = price;
    }

    pub fn placed_orders(&self) -> Vec<OrderParams> {
        self.placed.lock().unwrap().clone()
    }

    pub fn set_positions(&self, positions: Vec<ExchangePosition>) {
        *self.positions.lock().unwrap() = positions;
    }
}

#[async_trait]
impl Exchange for FakeExchange {
    async fn klines(&self, _symbol: &str, _interval: Interval, _limit: usize) -> anyhow::Result<Vec<Candle>> {
        Ok(vec![])
    }

    async fn mark_price(&self, _symbol: &str) -> anyhow::Result<f64> {
        Ok(*self.mark_price.lock().unwrap())
    }

    async fn exchange_info(&self) -> anyhow::Result<Vec<SymbolSpec>> {
        Ok(vec![])
    }

    async fn place_order(&self, params: OrderParams) -> anyhow::Result<OrderAck> {
        let id = self.order_counter.fetch_add(1, Ordering::SeqCst);
        let avg_price = params.price.unwrap_or(*self.mark_price.lock().unwrap());
        self.placed.lock().unwrap().push(params);
        Ok(OrderAck { order_id: format!("order-{id}"), avg_price: Some(avg_price), status: OrderStatus::Filled })
    }

    async fn cancel_order(&self, _symbol: &str, _order_id: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn cancel_all_algo(&self, _symbol: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn open_orders(&self, _symbol: &str) -> anyhow::Result<Vec<OrderAck>> {
        Ok(vec![])
    }

    async fn positions(&self) -> anyhow::Result<Vec<ExchangePosition>> {
        Ok(self.positions.lock().unwrap().clone())
    }
}

pub fn btc_spec() -> SymbolSpec {
    SymbolSpec {
        symbol: "BTCUSDT".to_string(),
        price_precision: 2,
        quantity_precision: 3,
        tick_size: 0.01,
        step_size: 0.001,
        min_notional: 5.0,
    }
}

/// Builds a fully wired `PositionManager` against a fresh `FakeExchange`,
/// with the calling instance already elected active.
pub async fn build_manager(
    mark_price: f64,
    spec: SymbolSpec,
    circuit_breaker_config: ginie::circuit_breaker::CircuitBreakerConfig,
) -> (Arc<ginie::position::PositionManager>, Arc<FakeExchange>, Arc<ginie::circuit_breaker::CircuitBreaker>, Arc<ginie::instance::InstanceControl>) {
    let exchange = Arc::new(FakeExchange::new(mark_price));
    let precision = Arc::new(ginie::precision::PrecisionCache::new());
    precision.insert(spec);
    let circuit_breaker = Arc::new(ginie::circuit_breaker::CircuitBreaker::new(circuit_breaker_config));
    let blocklist = Arc::new(ginie::blocklist::BlockedSymbolRegistry::new(ginie::blocklist::BlocklistConfig::default()));
    let store: Arc<dyn ginie::store::Store> = Arc::new(ginie::store::InMemoryStore::new());
    let instance = Arc::new(ginie::instance::InstanceControl::new("node-a", store.clone(), 30));
    instance.try_elect().await.unwrap();
    let settings = Arc::new(ginie::config::Settings::default());

    let manager = Arc::new(ginie::position::PositionManager::new(
        exchange.clone(),
        precision,
        circuit_breaker.clone(),
        blocklist,
        instance.clone(),
        store,
        settings,
    ));
    (manager, exchange, circuit_breaker, instance)
}

pub fn test_decision(symbol: &str, direction: ginie::indicators::Direction, final_confidence: f64) -> ginie::decision::Decision {
    ginie::decision::Decision {
        symbol: symbol.to_string(),
        mode: Some(ginie::mode::Mode::Swing),
        direction,
        tech_confidence: final_confidence,
        llm_direction: None,
        llm_confidence: None,
        reasoning: "scenario test".to_string(),
        key_factors: vec![],
        risk_level: "moderate".to_string(),
        suggested_sl_pct: 0.0,
        suggested_tp_pct: 0.0,
        final_confidence,
        final_direction: direction,
        agreement: false,
        skipped_llm: true,
        used_cache: false,
        llm_latency_ms: None,
        timestamp: chrono::Utc::now(),
    }
}
