//! Error kinds for the trading core.
//!
//! Mirrors the error handling table in the specification: recoverable
//! exchange errors are retried by callers, precision errors are re-rounded
//! once, guard rejections are summarized into `Outcome` rather than
//! propagated, and only fatal errors reach the scheduler as `anyhow::Error`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GinieError {
    #[error("exchange rejected order for {symbol}: {reason}")]
    ExchangeRejected { symbol: String, reason: String },

    #[error("precision missing for symbol {0}")]
    PrecisionMissing(String),

    #[error("fused confidence {confidence:.1} below mode minimum {minimum:.1}")]
    ConfidenceBelowThreshold { confidence: f64, minimum: f64 },

    #[error("capacity exceeded: {open}/{cap} positions open for mode")]
    CapacityExceeded { open: usize, cap: usize },

    #[error("circuit breaker open: {reason}")]
    CircuitOpen { reason: String },

    #[error("symbol {symbol} blocked until {unblock_at:?}: {reason}")]
    SymbolBlocked {
        symbol: String,
        reason: String,
        unblock_at: Option<chrono::DateTime<chrono::Utc>>,
    },

    #[error("instance is not active")]
    NotActiveInstance,

    #[error("insufficient candle data for {symbol}: have {have}, need {need}")]
    InsufficientData {
        symbol: String,
        have: usize,
        need: usize,
    },

    #[error("data integrity violation: {0}")]
    DataIntegrity(String),

    #[error("position not found: {0:?}")]
    PositionNotFound(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("exchange transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed settings: {0}")]
    MalformedSettings(String),
}

pub type GinieResult<T> = Result<T, GinieError>;

/// Outcome of a scan-to-open pipeline attempt, per the propagation policy:
/// guard rejections and skip reasons never bubble up as errors.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Opened { chain_id: String },
    Skipped { reason: String },
    Rejected { reason: String },
}
