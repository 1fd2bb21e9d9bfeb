//! Decision record: context for one scan, independent of outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::indicators::Direction;
use crate::mode::Mode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub symbol: String,
    #[serde(skip)]
    pub mode: Option<Mode>,
    #[serde(skip)]
    pub direction: Direction,
    pub tech_confidence: f64,
    #[serde(skip)]
    pub llm_direction: Option<Direction>,
    pub llm_confidence: Option<f64>,
    pub reasoning: String,
    pub key_factors: Vec<String>,
    pub risk_level: String,
    pub suggested_sl_pct: f64,
    pub suggested_tp_pct: f64,
    pub final_confidence: f64,
    #[serde(skip)]
    pub final_direction: Direction,
    pub agreement: bool,
    pub skipped_llm: bool,
    pub used_cache: bool,
    pub llm_latency_ms: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

impl Decision {
    pub fn is_tradable(&self) -> bool {
        !matches!(self.final_direction, Direction::Neutral)
    }
}

/// Outcome of a scan that fed a `Decision` through the Position Manager,
/// logged at scan-time regardless of whether a position was opened (per the
/// "scans produce Decision records regardless of outcome" propagation
/// policy).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRecord {
    pub decision: Decision,
    pub outcome: ScanOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScanOutcome {
    Opened { chain_id: String },
    Skipped { reason: String },
    Rejected { reason: String },
}
