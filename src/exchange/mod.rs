//! Exchange integration surface.
//!
//! `Exchange` is the abstract contract the core depends on (spec section 6).
//! The REST/WebSocket client is deliberately out of scope as a design
//! concern; [`bybit::BybitExchange`] is the one concrete adapter the crate
//! ships so it remains runnable end to end, grounded in the teacher's
//! `bybit::client::BybitClient` / `exchange::bybit::adapter::BybitAdapter`.

pub mod bybit;
pub mod types;

pub use types::*;

use async_trait::async_trait;

#[async_trait]
pub trait Exchange: Send + Sync {
    async fn klines(&self, symbol: &str, interval: Interval, limit: usize) -> anyhow::Result<Vec<Candle>>;
    async fn mark_price(&self, symbol: &str) -> anyhow::Result<f64>;
    async fn exchange_info(&self) -> anyhow::Result<Vec<SymbolSpec>>;

    async fn place_order(&self, params: OrderParams) -> anyhow::Result<OrderAck>;
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> anyhow::Result<()>;
    async fn cancel_all_algo(&self, symbol: &str) -> anyhow::Result<()>;
    async fn open_orders(&self, symbol: &str) -> anyhow::Result<Vec<OrderAck>>;
    async fn positions(&self) -> anyhow::Result<Vec<ExchangePosition>>;
}
