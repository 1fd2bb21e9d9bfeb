//! Bybit V5-style REST adapter.
//!
//! Adapted from the teacher's `bybit::client::BybitClient` and
//! `exchange::bybit::adapter::BybitAdapter`: HMAC-SHA256 request signing,
//! `retCode`-based error mapping, and a thin `reqwest` client. Retargeted
//! here to implement the [`Exchange`](crate::exchange::Exchange) trait
//! rather than exposing ad hoc methods, and extended with the retry/backoff
//! policy the specification requires for recoverable exchange errors.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{debug, warn};

use crate::exchange::types::*;
use crate::exchange::Exchange;

type HmacSha256 = Hmac<Sha256>;

pub struct BybitExchange {
    api_key: String,
    api_secret: String,
    base_url: String,
    client: Client,
    /// Deadline applied to every outbound call, per the specification's
    /// "every outbound exchange call carries a deadline" rule.
    call_timeout: Duration,
    /// Bounded retry budget for recoverable errors (rate limits, transient 5xx).
    max_retries: u32,
}

impl BybitExchange {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>, is_testnet: bool) -> Self {
        let base_url = if is_testnet {
            "https://api-testnet.bybit.com".to_string()
        } else {
            "https://api.bybit.com".to_string()
        };

        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            base_url,
            client: Client::new(),
            call_timeout: Duration::from_secs(8),
            max_retries: 3,
        }
    }

    fn timestamp_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock before epoch")
            .as_millis() as u64
    }

    fn sign(&self, timestamp: u64, recv_window: &str, payload: &str) -> String {
        let message = format!("{timestamp}{}{recv_window}{payload}", self.api_key);
        let mut mac =
            HmacSha256::new_from_slice(self.api_secret.as_bytes()).expect("hmac key of any size");
        mac.update(message.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn post(&self, endpoint: &str, params: Value) -> Result<Value> {
        self.with_retries(|| async {
            let url = format!("{}{endpoint}", self.base_url);
            let body = params.to_string();
            let timestamp = self.timestamp_ms();
            let recv_window = "5000";
            let signature = self.sign(timestamp, recv_window, &body);

            let response = self
                .client
                .post(&url)
                .timeout(self.call_timeout)
                .header("X-BAPI-API-KEY", &self.api_key)
                .header("X-BAPI-SIGN", signature)
                .header("X-BAPI-TIMESTAMP", timestamp.to_string())
                .header("X-BAPI-RECV-WINDOW", recv_window)
                .header("Content-Type", "application/json")
                .body(body)
                .send()
                .await?;

            parse_bybit_response(response.text().await?)
        })
        .await
    }

    async fn get(&self, endpoint: &str, query: &[(&str, String)]) -> Result<Value> {
        self.with_retries(|| async {
            let url = format!("{}{endpoint}", self.base_url);
            let query_string = query
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("&");
            let timestamp = self.timestamp_ms();
            let recv_window = "5000";
            let signature = self.sign(timestamp, recv_window, &query_string);

            let response = self
                .client
                .get(&url)
                .timeout(self.call_timeout)
                .query(query)
                .header("X-BAPI-API-KEY", &self.api_key)
                .header("X-BAPI-SIGN", signature)
                .header("X-BAPI-TIMESTAMP", timestamp.to_string())
                .header("X-BAPI-RECV-WINDOW", recv_window)
                .send()
                .await?;

            parse_bybit_response(response.text().await?)
        })
        .await
    }

    /// Retries recoverable errors (rate limit code 10006, transient 5xx
    /// surfaced as a generic error) with exponential backoff up to
    /// `max_retries`, per the specification's recoverable-error policy.
    async fn with_retries<F, Fut>(&self, mut call: F) -> Result<Value>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<Value>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(v) => return Ok(v),
                Err(e) if attempt < self.max_retries && is_recoverable(&e) => {
                    attempt += 1;
                    let backoff = Duration::from_millis(200 * 2u64.pow(attempt));
                    warn!(attempt, %e, "retrying recoverable exchange error");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn is_recoverable(err: &anyhow::Error) -> bool {
    let msg = err.to_string();
    msg.contains("10006") || msg.contains("rate limit") || msg.contains("timed out")
}

fn parse_bybit_response(text: String) -> Result<Value> {
    let value: Value = serde_json::from_str(&text)?;
    let ret_code = value["retCode"].as_i64().unwrap_or(-1);
    if ret_code != 0 {
        let ret_msg = value["retMsg"].as_str().unwrap_or("unknown error");
        return Err(anyhow!("bybit error {ret_code}: {ret_msg}"));
    }
    Ok(value)
}

fn order_side_str(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "Buy",
        OrderSide::Sell => "Sell",
    }
}

fn order_type_str(t: OrderType) -> &'static str {
    match t {
        OrderType::Market => "Market",
        OrderType::Limit => "Limit",
        OrderType::StopMarket => "Market",
        OrderType::TakeProfitMarket => "Market",
    }
}

#[async_trait]
impl Exchange for BybitExchange {
    async fn klines(&self, symbol: &str, interval: Interval, limit: usize) -> Result<Vec<Candle>> {
        let limit_str = limit.to_string();
        let response = self
            .get(
                "/v5/market/kline",
                &[
                    ("category", "linear".to_string()),
                    ("symbol", symbol.to_string()),
                    ("interval", interval.as_str().to_string()),
                    ("limit", limit_str),
                ],
            )
            .await?;

        let rows = response["result"]["list"]
            .as_array()
            .ok_or_else(|| anyhow!("malformed kline response"))?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in rows.iter().rev() {
            let get = |i: usize| -> f64 {
                row.get(i)
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse::<f64>().ok())
                    .unwrap_or(0.0)
            };
            let open_time_ms = row
                .get(0)
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<i64>().ok())
                .unwrap_or(0);
            candles.push(Candle {
                open_time_ms,
                open: get(1),
                high: get(2),
                low: get(3),
                close: get(4),
                volume: get(5),
                close_time_ms: open_time_ms,
                quote_volume: get(6),
                trades: 0,
            });
        }
        Ok(candles)
    }

    async fn mark_price(&self, symbol: &str) -> Result<f64> {
        let response = self
            .get(
                "/v5/market/tickers",
                &[("category", "linear".to_string()), ("symbol", symbol.to_string())],
            )
            .await?;
        response["result"]["list"][0]["markPrice"]
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| anyhow!("missing mark price for {symbol}"))
    }

    async fn exchange_info(&self) -> Result<Vec<SymbolSpec>> {
        let response = self
            .get("/v5/market/instruments-info", &[("category", "linear".to_string())])
            .await?;
        let rows = response["result"]["list"]
            .as_array()
            .ok_or_else(|| anyhow!("malformed instruments-info response"))?;

        let mut specs = Vec::with_capacity(rows.len());
        for row in rows {
            let symbol = row["symbol"].as_str().unwrap_or_default().to_string();
            let tick_size = row["priceFilter"]["tickSize"]
                .as_str()
                .and_then(|s| s.parse::<f64>().ok())
                .unwrap_or(0.01);
            let step_size = row["lotSizeFilter"]["qtyStep"]
                .as_str()
                .and_then(|s| s.parse::<f64>().ok())
                .unwrap_or(0.001);
            let min_notional = row["lotSizeFilter"]["minNotionalValue"]
                .as_str()
                .and_then(|s| s.parse::<f64>().ok())
                .unwrap_or(5.0);
            specs.push(SymbolSpec {
                symbol,
                price_precision: decimals_in(tick_size),
                quantity_precision: decimals_in(step_size),
                tick_size,
                step_size,
                min_notional,
            });
        }
        Ok(specs)
    }

    async fn place_order(&self, params: OrderParams) -> Result<OrderAck> {
        let mut body = json!({
            "category": "linear",
            "symbol": params.symbol,
            "side": order_side_str(params.side),
            "orderType": order_type_str(params.order_type),
            "qty": format!("{}", params.quantity),
            "reduceOnly": params.reduce_only,
        });
        if let Some(price) = params.price {
            body["price"] = json!(format!("{price}"));
        }
        if let Some(trigger) = params.trigger_price {
            body["triggerPrice"] = json!(format!("{trigger}"));
            body["triggerDirection"] = json!(match params.order_type {
                OrderType::StopMarket => match params.position_side {
                    Side::Long => 2,
                    Side::Short => 1,
                },
                _ => match params.position_side {
                    Side::Long => 1,
                    Side::Short => 2,
                },
            });
        }
        if params.close_position {
            body["closeOnTrigger"] = json!(true);
        }

        debug!(?body, "placing order");
        let response = self.post("/v5/order/create", body).await?;
        let order_id = response["result"]["orderId"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        Ok(OrderAck {
            order_id,
            avg_price: None,
            status: OrderStatus::New,
        })
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()> {
        self.post(
            "/v5/order/cancel",
            json!({"category": "linear", "symbol": symbol, "orderId": order_id}),
        )
        .await?;
        Ok(())
    }

    async fn cancel_all_algo(&self, symbol: &str) -> Result<()> {
        self.post(
            "/v5/order/cancel-all",
            json!({"category": "linear", "symbol": symbol}),
        )
        .await?;
        Ok(())
    }

    async fn open_orders(&self, symbol: &str) -> Result<Vec<OrderAck>> {
        let response = self
            .get(
                "/v5/order/realtime",
                &[("category", "linear".to_string()), ("symbol", symbol.to_string())],
            )
            .await?;
        let rows = response["result"]["list"].as_array().cloned().unwrap_or_default();
        Ok(rows
            .into_iter()
            .map(|row| OrderAck {
                order_id: row["orderId"].as_str().unwrap_or_default().to_string(),
                avg_price: row["avgPrice"].as_str().and_then(|s| s.parse().ok()),
                status: match row["orderStatus"].as_str().unwrap_or_default() {
                    "Filled" => OrderStatus::Filled,
                    "PartiallyFilled" => OrderStatus::PartiallyFilled,
                    "Cancelled" => OrderStatus::Canceled,
                    "Rejected" => OrderStatus::Rejected,
                    _ => OrderStatus::New,
                },
            })
            .collect())
    }

    async fn positions(&self) -> Result<Vec<ExchangePosition>> {
        let response = self
            .get("/v5/position/list", &[("category", "linear".to_string())])
            .await?;
        let rows = response["result"]["list"].as_array().cloned().unwrap_or_default();
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let quantity = row["size"].as_str()?.parse::<f64>().ok()?;
                if quantity == 0.0 {
                    return None;
                }
                Some(ExchangePosition {
                    symbol: row["symbol"].as_str()?.to_string(),
                    side: match row["side"].as_str()? {
                        "Buy" => Side::Long,
                        _ => Side::Short,
                    },
                    quantity,
                    entry_price: row["avgPrice"].as_str()?.parse().ok()?,
                    leverage: row["leverage"].as_str()?.parse().unwrap_or(1.0),
                    margin_type: if row["tradeMode"].as_i64().unwrap_or(0) == 0 {
                        MarginType::Crossed
                    } else {
                        MarginType::Isolated
                    },
                })
            })
            .collect())
    }
}

fn decimals_in(step: f64) -> u32 {
    if step <= 0.0 {
        return 0;
    }
    let s = format!("{step}");
    s.split('.').nth(1).map(|frac| frac.len() as u32).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_for_same_inputs() {
        let ex = BybitExchange::new("key", "secret", true);
        let a = ex.sign(1_000, "5000", "payload");
        let b = ex.sign(1_000, "5000", "payload");
        assert_eq!(a, b);
    }

    #[test]
    fn signature_changes_with_payload() {
        let ex = BybitExchange::new("key", "secret", true);
        let a = ex.sign(1_000, "5000", "payload-a");
        let b = ex.sign(1_000, "5000", "payload-b");
        assert_ne!(a, b);
    }

    #[test]
    fn decimals_in_counts_fractional_digits() {
        assert_eq!(decimals_in(0.00001), 5);
        assert_eq!(decimals_in(0.1), 1);
        assert_eq!(decimals_in(1.0), 0);
    }

    #[test]
    fn parse_bybit_response_surfaces_error_code() {
        let err = parse_bybit_response(r#"{"retCode":10001,"retMsg":"bad request"}"#.to_string())
            .unwrap_err();
        assert!(err.to_string().contains("10001"));
    }
}
