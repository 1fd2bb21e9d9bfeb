//! Blocked-Symbol Registry (C8).
//!
//! Tracks per-symbol cooldowns after repeated failures (rejected orders,
//! precision errors, exchange errors), escalating cooldown length
//! exponentially and promoting a symbol to a permanent blacklist after too
//! many blocks. No direct teacher precedent — the teacher's closest analog
//! is the thin `monitoring::unified_error_manager::RecoveryAction::Backoff`
//! variant, which carries no cooldown/escalation logic of its own. Modeled
//! instead on this crate's own `circuit_breaker` state-machine style
//! (cooldown window, trip/reset transitions), escalated per-symbol with a
//! doubling cooldown and a permanent tier.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
struct Entry {
    block_count: u32,
    unblock_at: Option<DateTime<Utc>>,
    permanent: bool,
    last_reason: String,
}

#[derive(Debug, Clone)]
pub struct BlocklistConfig {
    pub base_cooldown_secs: i64,
    pub max_cooldown_secs: i64,
    pub permanent_after_blocks: u32,
}

impl Default for BlocklistConfig {
    fn default() -> Self {
        Self {
            base_cooldown_secs: 60,
            max_cooldown_secs: 86_400,
            permanent_after_blocks: 6,
        }
    }
}

pub struct BlockedSymbolRegistry {
    entries: RwLock<HashMap<String, Entry>>,
    config: BlocklistConfig,
}

impl BlockedSymbolRegistry {
    pub fn new(config: BlocklistConfig) -> Self {
        Self { entries: RwLock::new(HashMap::new()), config }
    }

    /// Records a failure for `symbol`, doubling the cooldown from the base
    /// for each prior block (`base * 2^(count-1)`, capped), and promoting to
    /// permanent once `permanent_after_blocks` is reached.
    pub fn record_block(&self, symbol: &str, reason: impl Into<String>) {
        let mut entries = self.entries.write().unwrap();
        let entry = entries.entry(symbol.to_string()).or_insert(Entry {
            block_count: 0,
            unblock_at: None,
            permanent: false,
            last_reason: String::new(),
        });

        entry.block_count += 1;
        entry.last_reason = reason.into();

        if entry.block_count >= self.config.permanent_after_blocks {
            entry.permanent = true;
            entry.unblock_at = None;
            return;
        }

        let exponent = entry.block_count.saturating_sub(1).min(20);
        let cooldown_secs = (self.config.base_cooldown_secs as i64)
            .saturating_mul(1i64 << exponent)
            .min(self.config.max_cooldown_secs);
        entry.unblock_at = Some(Utc::now() + chrono::Duration::seconds(cooldown_secs));
    }

    pub fn is_blocked(&self, symbol: &str) -> bool {
        self.status(symbol).is_some()
    }

    /// Returns `Some((reason, unblock_at))` if blocked, `None` otherwise.
    /// A symbol whose cooldown has elapsed self-heals back to unblocked and
    /// is evicted from the table rather than lingering with a stale timer.
    pub fn status(&self, symbol: &str) -> Option<(String, Option<DateTime<Utc>>)> {
        {
            let entries = self.entries.read().unwrap();
            let entry = entries.get(symbol)?;
            if entry.permanent {
                return Some((entry.last_reason.clone(), None));
            }
            let unblock_at = entry.unblock_at?;
            if Utc::now() < unblock_at {
                return Some((entry.last_reason.clone(), Some(unblock_at)));
            }
        }
        self.entries.write().unwrap().remove(symbol);
        None
    }

    pub fn clear(&self, symbol: &str) {
        self.entries.write().unwrap().remove(symbol);
    }

    pub fn blocked_symbols(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap();
        entries
            .iter()
            .filter(|(_, e)| e.permanent || e.unblock_at.map(|t| t > Utc::now()).unwrap_or(false))
            .map(|(s, _)| s.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_block_uses_base_cooldown() {
        let registry = BlockedSymbolRegistry::new(BlocklistConfig::default());
        registry.record_block("BTCUSDT", "precision error");
        let (_, unblock_at) = registry.status("BTCUSDT").unwrap();
        let remaining = unblock_at.unwrap() - Utc::now();
        assert!(remaining.num_seconds() <= 60 && remaining.num_seconds() > 50);
    }

    #[test]
    fn cooldown_doubles_each_block() {
        let registry = BlockedSymbolRegistry::new(BlocklistConfig {
            base_cooldown_secs: 10,
            max_cooldown_secs: 100_000,
            permanent_after_blocks: 100,
        });
        registry.record_block("ETHUSDT", "rejected");
        registry.record_block("ETHUSDT", "rejected");
        let (_, unblock_at) = registry.status("ETHUSDT").unwrap();
        let remaining = unblock_at.unwrap() - Utc::now();
        assert!(remaining.num_seconds() > 15 && remaining.num_seconds() <= 20);
    }

    #[test]
    fn becomes_permanent_after_threshold() {
        let registry = BlockedSymbolRegistry::new(BlocklistConfig {
            base_cooldown_secs: 1,
            max_cooldown_secs: 100,
            permanent_after_blocks: 3,
        });
        for _ in 0..3 {
            registry.record_block("SOLUSDT", "rejected");
        }
        let (_, unblock_at) = registry.status("SOLUSDT").unwrap();
        assert!(unblock_at.is_none());
    }

    #[test]
    fn unblocks_after_cooldown_elapses() {
        let registry = BlockedSymbolRegistry::new(BlocklistConfig {
            base_cooldown_secs: -1,
            max_cooldown_secs: 100,
            permanent_after_blocks: 100,
        });
        registry.record_block("DOGEUSDT", "rejected");
        assert!(!registry.is_blocked("DOGEUSDT"));
    }

    #[test]
    fn clear_removes_entry() {
        let registry = BlockedSymbolRegistry::new(BlocklistConfig::default());
        registry.record_block("XRPUSDT", "rejected");
        registry.clear("XRPUSDT");
        assert!(!registry.is_blocked("XRPUSDT"));
    }
}
