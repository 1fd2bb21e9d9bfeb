//! Symbol Precision Cache (C4).
//!
//! Rounds price/quantity to exchange tick/step requirements, with
//! direction-aware floor/ceil variants for stop-loss vs take-profit
//! placement. Grounded in the teacher's capital precision handling
//! (`capital::precision_allocator`) but generalized from a fixed 12 USDT
//! allocation to arbitrary symbols/sizes per the specification.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{GinieError, GinieResult};
use crate::exchange::types::{Side, SymbolSpec};
use crate::exchange::Exchange;

fn round_to_step(value: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }
    (value / step).round() * step
}

fn floor_to_step(value: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }
    (value / step).floor() * step
}

fn ceil_to_step(value: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }
    (value / step).ceil() * step
}

/// Caches `SymbolSpec`s and applies tick/step rounding, refreshing from the
/// exchange on demand when a symbol is unknown.
pub struct PrecisionCache {
    specs: RwLock<HashMap<String, SymbolSpec>>,
}

impl PrecisionCache {
    pub fn new() -> Self {
        Self { specs: RwLock::new(HashMap::new()) }
    }

    pub fn insert(&self, spec: SymbolSpec) {
        self.specs.write().unwrap().insert(spec.symbol.clone(), spec);
    }

    pub fn get(&self, symbol: &str) -> Option<SymbolSpec> {
        self.specs.read().unwrap().get(symbol).cloned()
    }

    /// Refreshes the full symbol table from the exchange. Idempotent:
    /// calling it repeatedly without exchange-side changes leaves the cache
    /// in the same state.
    pub async fn refresh(&self, exchange: &dyn Exchange) -> anyhow::Result<()> {
        let specs = exchange.exchange_info().await?;
        let mut guard = self.specs.write().unwrap();
        for spec in specs {
            guard.insert(spec.symbol.clone(), spec);
        }
        Ok(())
    }

    async fn ensure(&self, symbol: &str, exchange: &dyn Exchange) -> GinieResult<SymbolSpec> {
        if let Some(spec) = self.get(symbol) {
            return Ok(spec);
        }
        self.refresh(exchange)
            .await
            .map_err(|_| GinieError::PrecisionMissing(symbol.to_string()))?;
        self.get(symbol)
            .ok_or_else(|| GinieError::PrecisionMissing(symbol.to_string()))
    }

    pub fn round_price(&self, symbol: &str, price: f64) -> GinieResult<f64> {
        let spec = self.get(symbol).ok_or_else(|| GinieError::PrecisionMissing(symbol.to_string()))?;
        Ok(round_to_step(price, spec.tick_size))
    }

    /// Floors for LONG (favourable close price), ceils for SHORT.
    pub fn round_price_for_tp(&self, symbol: &str, price: f64, side: Side) -> GinieResult<f64> {
        let spec = self.get(symbol).ok_or_else(|| GinieError::PrecisionMissing(symbol.to_string()))?;
        Ok(match side {
            Side::Long => floor_to_step(price, spec.tick_size),
            Side::Short => ceil_to_step(price, spec.tick_size),
        })
    }

    /// Ceils for LONG (defensive), floors for SHORT.
    pub fn round_price_for_sl(&self, symbol: &str, price: f64, side: Side) -> GinieResult<f64> {
        let spec = self.get(symbol).ok_or_else(|| GinieError::PrecisionMissing(symbol.to_string()))?;
        Ok(match side {
            Side::Long => ceil_to_step(price, spec.tick_size),
            Side::Short => floor_to_step(price, spec.tick_size),
        })
    }

    /// Floors quantity to step size; rejects if the resulting notional is
    /// below the symbol's minimum.
    pub fn round_qty(&self, symbol: &str, qty: f64, price: f64) -> GinieResult<f64> {
        let spec = self.get(symbol).ok_or_else(|| GinieError::PrecisionMissing(symbol.to_string()))?;
        let rounded = floor_to_step(qty, spec.step_size);
        if rounded * price < spec.min_notional {
            return Err(GinieError::PrecisionMissing(format!(
                "{symbol}: qty {rounded} below min notional {}",
                spec.min_notional
            )));
        }
        Ok(rounded)
    }

    pub async fn round_price_ensuring(&self, symbol: &str, price: f64, exchange: &dyn Exchange) -> GinieResult<f64> {
        self.ensure(symbol, exchange).await?;
        self.round_price(symbol, price)
    }
}

impl Default for PrecisionCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> SymbolSpec {
        SymbolSpec {
            symbol: "BTCUSDT".to_string(),
            price_precision: 1,
            quantity_precision: 3,
            tick_size: 0.1,
            step_size: 0.001,
            min_notional: 5.0,
        }
    }

    #[test]
    fn round_price_for_tp_floors_long_and_ceils_short() {
        let cache = PrecisionCache::new();
        cache.insert(spec());
        assert_eq!(cache.round_price_for_tp("BTCUSDT", 100.07, Side::Long).unwrap(), 100.0);
        assert_eq!(cache.round_price_for_tp("BTCUSDT", 100.03, Side::Short).unwrap(), 100.1);
    }

    #[test]
    fn round_price_for_sl_ceils_long_and_floors_short() {
        let cache = PrecisionCache::new();
        cache.insert(spec());
        assert_eq!(cache.round_price_for_sl("BTCUSDT", 100.03, Side::Long).unwrap(), 100.1);
        assert_eq!(cache.round_price_for_sl("BTCUSDT", 100.07, Side::Short).unwrap(), 100.0);
    }

    #[test]
    fn round_price_for_tp_is_idempotent() {
        let cache = PrecisionCache::new();
        cache.insert(spec());
        let once = cache.round_price_for_tp("BTCUSDT", 0.059070088, Side::Long).unwrap();
        let twice = cache.round_price_for_tp("BTCUSDT", once, Side::Long).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn tick_aligned_self_heal_example_from_spec() {
        let cache = PrecisionCache::new();
        cache.insert(SymbolSpec {
            symbol: "XUSDT".to_string(),
            price_precision: 5,
            quantity_precision: 0,
            tick_size: 0.00001,
            step_size: 1.0,
            min_notional: 5.0,
        });
        let rounded = cache.round_price_for_tp("XUSDT", 0.059070088, Side::Long).unwrap();
        assert!((rounded - 0.05907).abs() < 1e-9);
    }

    #[test]
    fn qty_below_min_notional_is_rejected() {
        let cache = PrecisionCache::new();
        cache.insert(spec());
        let result = cache.round_qty("BTCUSDT", 0.0001, 100.0);
        assert!(result.is_err());
    }

    #[test]
    fn unknown_symbol_is_precision_missing() {
        let cache = PrecisionCache::new();
        assert!(matches!(cache.round_price("NOPE", 1.0), Err(GinieError::PrecisionMissing(_))));
    }
}
