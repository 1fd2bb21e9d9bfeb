//! LLM advisory contract (`LLMClient`) and response parsing.
//!
//! Provider selection (OpenAI/Anthropic/local) is out of scope; this module
//! only specifies the trait the core depends on and the strict-then-tolerant
//! JSON parser for the advisory payload. No teacher precedent — the teacher
//! has no LLM/AI-provider integration module at all. The tolerant-parsing
//! shape is modeled on the only parse-and-fall-back-on-missing-field
//! pattern the teacher has: `bybit::client::BybitClient`'s response
//! handling, which reads fields off an untyped `Value` with
//! `.as_i64().unwrap_or(-1)` rather than failing the whole decode on one
//! missing field (`src/bybit/client.rs:101-106`). This parser applies that
//! same per-field tolerance, falling back to the defaults the specification
//! names explicitly instead of `-1`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::indicators::Direction;

#[async_trait]
pub trait LLMClient: Send + Sync {
    async fn advise(&self, symbol: &str, prompt: &str) -> anyhow::Result<String>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmAdvice {
    pub direction: Direction,
    pub confidence: f64,
    pub suggested_sl_pct: f64,
    pub suggested_tp_pct: f64,
    pub risk_level: String,
    pub hold_duration: String,
    pub reasoning: String,
}

impl Default for LlmAdvice {
    /// Documented defaults for malformed/unparseable LLM output:
    /// HOLD / 50 / 2.0 / 4.0 / moderate / hours.
    fn default() -> Self {
        Self {
            direction: Direction::Neutral,
            confidence: 50.0,
            suggested_sl_pct: 2.0,
            suggested_tp_pct: 4.0,
            risk_level: "moderate".to_string(),
            hold_duration: "hours".to_string(),
            reasoning: "malformed or unparseable LLM response, using safe defaults".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StrictPayload {
    direction: String,
    confidence: f64,
    #[serde(default)]
    suggested_sl_pct: Option<f64>,
    #[serde(default)]
    suggested_tp_pct: Option<f64>,
    #[serde(default)]
    risk_level: Option<String>,
    #[serde(default)]
    hold_duration: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

fn parse_direction(raw: &str) -> Direction {
    match raw.trim().to_uppercase().as_str() {
        "LONG" | "BUY" => Direction::Long,
        "SHORT" | "SELL" => Direction::Short,
        _ => Direction::Neutral,
    }
}

/// Parses a raw LLM response, first as strict JSON, then tolerantly
/// extracting the first `{...}` block from surrounding prose, falling back
/// to documented defaults on total failure.
pub fn parse_response(raw: &str) -> LlmAdvice {
    if let Some(advice) = try_strict(raw) {
        return advice;
    }
    if let Some(start) = raw.find('{') {
        if let Some(end) = raw.rfind('}') {
            if end > start {
                if let Some(advice) = try_strict(&raw[start..=end]) {
                    return advice;
                }
            }
        }
    }
    LlmAdvice::default()
}

fn try_strict(raw: &str) -> Option<LlmAdvice> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let payload: StrictPayload = serde_json::from_value(value).ok()?;
    let confidence = payload.confidence.clamp(0.0, 100.0);
    Some(LlmAdvice {
        direction: parse_direction(&payload.direction),
        confidence,
        suggested_sl_pct: payload.suggested_sl_pct.unwrap_or(2.0).max(0.01),
        suggested_tp_pct: payload.suggested_tp_pct.unwrap_or(4.0).max(0.01),
        risk_level: payload.risk_level.unwrap_or_else(|| "moderate".to_string()),
        hold_duration: payload.hold_duration.unwrap_or_else(|| "hours".to_string()),
        reasoning: payload.reasoning.unwrap_or_default(),
    })
}
