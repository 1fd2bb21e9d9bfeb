//! Mode Policy (C5).
//!
//! Per-mode parameter sets: scan cadence, SL/TP percentages, TP ladder
//! shares, minimum confidence, max concurrent positions, leverage cap.
//! Defaults match the specification's table and are overridable from
//! `Settings`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub enum Mode {
    UltraFast,
    Scalp,
    Swing,
    Position,
}

impl Mode {
    pub const ALL: [Mode; 4] = [Mode::UltraFast, Mode::Scalp, Mode::Swing, Mode::Position];

    pub fn llm_cache_ttl(&self) -> Duration {
        match self {
            Mode::UltraFast => Duration::from_secs(0),
            Mode::Scalp => Duration::from_secs(60),
            Mode::Swing => Duration::from_secs(300),
            Mode::Position => Duration::from_secs(900),
        }
    }

    pub fn llm_timeout(&self) -> Duration {
        match self {
            Mode::UltraFast => Duration::from_secs(2),
            Mode::Scalp => Duration::from_secs(5),
            Mode::Swing => Duration::from_secs(10),
            Mode::Position => Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TpLevel {
    pub qty_share: f64,
    pub trigger_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModePolicy {
    pub mode: Mode,
    pub enabled: bool,
    pub scan_cadence: Duration,
    pub monitor_cadence: Duration,
    pub min_confidence: f64,
    pub tp_ladder: Vec<TpLevel>,
    pub min_sl_pct: f64,
    pub leverage_cap: f64,
    pub max_concurrent: usize,
    pub trailing_pct: f64,
    pub early_profit_roi_target_pct: f64,
}

impl ModePolicy {
    pub fn default_for(mode: Mode) -> Self {
        match mode {
            Mode::UltraFast => ModePolicy {
                mode,
                enabled: true,
                scan_cadence: Duration::from_secs(5),
                monitor_cadence: Duration::from_millis(500),
                min_confidence: 50.0,
                tp_ladder: vec![TpLevel { qty_share: 1.0, trigger_pct: 1.0 }],
                min_sl_pct: 0.3,
                leverage_cap: 20.0,
                max_concurrent: 5,
                trailing_pct: 0.2,
                early_profit_roi_target_pct: 36.0,
            },
            Mode::Scalp => ModePolicy {
                mode,
                enabled: true,
                scan_cadence: Duration::from_secs(30),
                monitor_cadence: Duration::from_secs(1),
                min_confidence: 55.0,
                tp_ladder: vec![
                    TpLevel { qty_share: 0.25, trigger_pct: 1.5 },
                    TpLevel { qty_share: 0.25, trigger_pct: 3.0 },
                    TpLevel { qty_share: 0.25, trigger_pct: 4.5 },
                    TpLevel { qty_share: 0.25, trigger_pct: 6.0 },
                ],
                min_sl_pct: 0.5,
                leverage_cap: 10.0,
                max_concurrent: 5,
                trailing_pct: 0.5,
                early_profit_roi_target_pct: 40.0,
            },
            Mode::Swing => ModePolicy {
                mode,
                enabled: true,
                scan_cadence: Duration::from_secs(120),
                monitor_cadence: Duration::from_secs(5),
                min_confidence: 60.0,
                tp_ladder: vec![
                    TpLevel { qty_share: 0.25, trigger_pct: 3.0 },
                    TpLevel { qty_share: 0.25, trigger_pct: 6.0 },
                    TpLevel { qty_share: 0.25, trigger_pct: 10.0 },
                    TpLevel { qty_share: 0.25, trigger_pct: 15.0 },
                ],
                min_sl_pct: 1.0,
                leverage_cap: 5.0,
                max_concurrent: 8,
                trailing_pct: 1.0,
                early_profit_roi_target_pct: 45.0,
            },
            Mode::Position => ModePolicy {
                mode,
                enabled: true,
                scan_cadence: Duration::from_secs(600),
                monitor_cadence: Duration::from_secs(15),
                min_confidence: 65.0,
                tp_ladder: vec![
                    TpLevel { qty_share: 0.25, trigger_pct: 5.0 },
                    TpLevel { qty_share: 0.25, trigger_pct: 10.0 },
                    TpLevel { qty_share: 0.25, trigger_pct: 18.0 },
                    TpLevel { qty_share: 0.25, trigger_pct: 25.0 },
                ],
                min_sl_pct: 2.0,
                leverage_cap: 3.0,
                max_concurrent: 10,
                trailing_pct: 2.0,
                early_profit_roi_target_pct: 50.0,
            },
        }
    }
}

/// One policy per mode, override-able from `Settings`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModePolicyTable {
    pub policies: std::collections::HashMap<String, ModePolicy>,
}

impl ModePolicyTable {
    pub fn defaults() -> Self {
        let mut policies = std::collections::HashMap::new();
        for mode in Mode::ALL {
            policies.insert(format!("{mode:?}"), ModePolicy::default_for(mode));
        }
        Self { policies }
    }

    pub fn get(&self, mode: Mode) -> &ModePolicy {
        self.policies
            .get(&format!("{mode:?}"))
            .expect("mode policy table initialized for all modes")
    }

    pub fn get_mut(&mut self, mode: Mode) -> &mut ModePolicy {
        self.policies
            .entry(format!("{mode:?}"))
            .or_insert_with(|| ModePolicy::default_for(mode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ultra_fast_uses_single_tp_with_full_share() {
        let policy = ModePolicy::default_for(Mode::UltraFast);
        assert_eq!(policy.tp_ladder.len(), 1);
        assert_eq!(policy.tp_ladder[0].qty_share, 1.0);
    }

    #[test]
    fn other_modes_use_four_equal_shares() {
        for mode in [Mode::Scalp, Mode::Swing, Mode::Position] {
            let policy = ModePolicy::default_for(mode);
            assert_eq!(policy.tp_ladder.len(), 4);
            let total: f64 = policy.tp_ladder.iter().map(|l| l.qty_share).sum();
            assert!((total - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn table_covers_all_modes() {
        let table = ModePolicyTable::defaults();
        for mode in Mode::ALL {
            assert_eq!(table.get(mode).mode, mode);
        }
    }
}
