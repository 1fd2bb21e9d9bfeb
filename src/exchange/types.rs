//! Shared exchange types: candles, symbol precision, orders, positions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub enum Interval {
    OneSecond,
    OneMinute,
    ThreeMinutes,
    FiveMinutes,
    FifteenMinutes,
    OneHour,
    FourHours,
    OneDay,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::OneSecond => "1s",
            Interval::OneMinute => "1m",
            Interval::ThreeMinutes => "3m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::OneHour => "1h",
            Interval::FourHours => "4h",
            Interval::OneDay => "1d",
        }
    }
}

/// Immutable OHLCV candle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time_ms: i64,
    pub quote_volume: f64,
    pub trades: u64,
}

/// Exchange-imposed quantization for one symbol, cached per symbol and
/// reloaded on a live-mode switch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolSpec {
    pub symbol: String,
    pub price_precision: u32,
    pub quantity_precision: u32,
    pub tick_size: f64,
    pub step_size: f64,
    pub min_notional: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    /// Side the exchange order must take to reduce/close this position side.
    pub fn closing_order_side(&self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Sell,
            Side::Short => OrderSide::Buy,
        }
    }

    pub fn opening_order_side(&self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    StopMarket,
    TakeProfitMarket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarginType {
    Isolated,
    Crossed,
}

/// Parameters for `Exchange::place_order`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderParams {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: f64,
    pub price: Option<f64>,
    pub trigger_price: Option<f64>,
    pub reduce_only: bool,
    pub position_side: Side,
    pub close_position: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub avg_price: Option<f64>,
    pub status: OrderStatus,
}

/// Exchange-reported position snapshot, used by `resync_with_exchange`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub entry_price: f64,
    pub leverage: f64,
    pub margin_type: MarginType,
}

/// User-data stream events the core reconciles against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StreamEvent {
    MarkPrice {
        symbol: String,
        price: f64,
        at: DateTime<Utc>,
    },
    OrderUpdate {
        symbol: String,
        order_id: String,
        status: OrderStatus,
        filled_qty: f64,
        avg_price: f64,
    },
    AccountUpdate {
        symbol: String,
        side: Side,
        remaining_qty: f64,
        realized_pnl_delta: f64,
    },
    Kline {
        symbol: String,
        interval: Interval,
        candle: Candle,
    },
}
