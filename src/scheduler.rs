//! Scheduler (C9).
//!
//! One periodic scan task per enabled mode, one 500ms position monitor
//! loop, one stream-event consumer, one 60s cleanup loop, all observing a
//! shared shutdown signal. Grounded in the teacher's
//! `deployment::production_manager::start_trading_loop` running-flag idiom
//! (`while *is_running.read().await && !*emergency_stop.read().await { ... }`)
//! generalized to `tokio::sync::watch` for graceful cancellation, and
//! `exchange::asset_scanner::AssetScanner` for the optional dynamic
//! watchlist refresh.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{watch, Semaphore};
use tracing::{info, warn};

use crate::blocklist::BlockedSymbolRegistry;
use crate::decision::{Decision, ScanOutcome, ScanRecord};
use crate::error::Outcome;
use crate::exchange::types::{Interval, StreamEvent};
use crate::exchange::Exchange;
use crate::fusion::fuse;
use crate::indicators::IndicatorSnapshot;
use crate::llm::LLMClient;
use crate::mode::{Mode, ModePolicyTable};
use crate::position::PositionManager;
use crate::precision::PrecisionCache;
use crate::volatility::Regime;

const MAX_SYMBOL_CONCURRENCY: usize = 8;
const MONITOR_INTERVAL: Duration = Duration::from_millis(500);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
const CANDLE_LOOKBACK: usize = 120;

/// Per-mode LLM cache entry.
struct LlmCacheEntry {
    advice: crate::llm::LlmAdvice,
    at: std::time::Instant,
}

pub struct SchedulerConfig {
    pub watchlist: Vec<String>,
    pub dynamic_watchlist: bool,
    pub llm_weight: f64,
    pub default_capital: f64,
    pub default_leverage: f64,
}

pub struct Scheduler {
    exchange: Arc<dyn Exchange>,
    position_manager: Arc<PositionManager>,
    precision: Arc<PrecisionCache>,
    blocklist: Arc<BlockedSymbolRegistry>,
    modes: Arc<tokio::sync::RwLock<ModePolicyTable>>,
    llm: Option<Arc<dyn LLMClient>>,
    config: SchedulerConfig,
    llm_cache: Arc<std::sync::Mutex<HashMap<(String, Mode), LlmCacheEntry>>>,
    scan_records: Arc<std::sync::Mutex<Vec<ScanRecord>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        position_manager: Arc<PositionManager>,
        precision: Arc<PrecisionCache>,
        blocklist: Arc<BlockedSymbolRegistry>,
        modes: ModePolicyTable,
        llm: Option<Arc<dyn LLMClient>>,
        config: SchedulerConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            exchange,
            position_manager,
            precision,
            blocklist,
            modes: Arc::new(tokio::sync::RwLock::new(modes)),
            llm,
            config,
            llm_cache: Arc::new(std::sync::Mutex::new(HashMap::new())),
            scan_records: Arc::new(std::sync::Mutex::new(Vec::new())),
            shutdown_tx,
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn scan_records_snapshot(&self) -> Vec<ScanRecord> {
        self.scan_records.lock().unwrap().clone()
    }

    /// Spawns the scan loop for every enabled mode, the monitor loop, and
    /// the cleanup loop; returns their join handles so a caller can await a
    /// graceful shutdown.
    pub fn spawn(self: Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        for mode in Mode::ALL {
            let scheduler = self.clone();
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                scheduler.run_scan_loop(mode, &mut shutdown_rx).await;
            }));
        }

        {
            let scheduler = self.clone();
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                scheduler.run_monitor_loop(&mut shutdown_rx).await;
            }));
        }

        {
            let scheduler = self.clone();
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                scheduler.run_cleanup_loop(&mut shutdown_rx).await;
            }));
        }

        handles
    }

    async fn run_scan_loop(&self, mode: Mode, shutdown_rx: &mut watch::Receiver<bool>) {
        loop {
            let cadence = { self.modes.read().await.get(mode).scan_cadence };
            tokio::select! {
                _ = tokio::time::sleep(cadence) => {}
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!(?mode, "scan loop shutting down");
                        return;
                    }
                }
            }

            let enabled = { self.modes.read().await.get(mode).enabled };
            if !enabled {
                continue;
            }
            if let Err(e) = self.scan_tick(mode).await {
                warn!(?mode, error = %e, "scan tick failed");
            }
        }
    }

    async fn watchlist(&self) -> Vec<String> {
        if !self.config.dynamic_watchlist {
            return self.config.watchlist.clone();
        }
        // Dynamic refresh hook: enumerate symbols, falling back to the
        // static watchlist if the exchange call fails.
        match self.exchange.exchange_info().await {
            Ok(specs) => specs.into_iter().map(|s| s.symbol).take(self.config.watchlist.len().max(20)).collect(),
            Err(_) => self.config.watchlist.clone(),
        }
    }

    async fn scan_tick(&self, mode: Mode) -> anyhow::Result<()> {
        let symbols: Vec<String> = self.watchlist().await.into_iter().filter(|s| !self.blocklist.is_blocked(s)).collect();
        let semaphore = Arc::new(Semaphore::new(MAX_SYMBOL_CONCURRENCY));

        futures::stream::iter(symbols.into_iter().map(|symbol| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore.acquire_owned().await?;
                self.scan_symbol(&symbol, mode).await
            }
        }))
        .buffer_unordered(MAX_SYMBOL_CONCURRENCY)
        .for_each(|result| async {
            if let Err(e) = result {
                warn!(error = %e, "symbol scan failed");
            }
        })
        .await;

        Ok(())
    }

    async fn scan_symbol(&self, symbol: &str, mode: Mode) -> anyhow::Result<()> {
        let candles = self.exchange.klines(symbol, Interval::FiveMinutes, CANDLE_LOOKBACK).await?;
        if candles.len() < 20 {
            return Ok(());
        }

        let snapshot = IndicatorSnapshot::compute(&candles);
        let (tech_direction, tech_confidence) = snapshot.classify_technical();
        let atr_pct = snapshot.atr_pct;
        let band_width_pct = crate::indicators::bollinger_band_width_pct(&candles, 20);
        let regime = Regime::classify(atr_pct, band_width_pct);

        let llm_opinion = self.llm_opinion(symbol, mode).await;

        let policy = { self.modes.read().await.get(mode).clone() };
        let fusion = fuse(tech_direction, tech_confidence, llm_opinion.as_ref().map(|(a, _)| (a.direction, a.confidence)), self.config.llm_weight);

        let decision = Decision {
            symbol: symbol.to_string(),
            mode: Some(mode),
            direction: tech_direction,
            tech_confidence,
            llm_direction: llm_opinion.as_ref().map(|(a, _)| a.direction),
            llm_confidence: llm_opinion.as_ref().map(|(a, _)| a.confidence),
            reasoning: llm_opinion.as_ref().map(|(a, _)| a.reasoning.clone()).unwrap_or_else(|| "technical only".to_string()),
            key_factors: vec![format!("{:?} regime", regime)],
            risk_level: llm_opinion.as_ref().map(|(a, _)| a.risk_level.clone()).unwrap_or_else(|| "moderate".to_string()),
            suggested_sl_pct: llm_opinion.as_ref().map(|(a, _)| a.suggested_sl_pct).unwrap_or(0.0),
            suggested_tp_pct: llm_opinion.as_ref().map(|(a, _)| a.suggested_tp_pct).unwrap_or(0.0),
            final_confidence: fusion.confidence,
            final_direction: fusion.direction,
            agreement: fusion.agreement,
            skipped_llm: fusion.skipped_llm,
            used_cache: llm_opinion.as_ref().map(|(_, cached)| *cached).unwrap_or(false),
            llm_latency_ms: None,
            timestamp: chrono::Utc::now(),
        };

        let outcome = if decision.is_tradable() {
            let spec = match self.precision.get(symbol) {
                Some(spec) => spec,
                None => {
                    self.precision.refresh(self.exchange.as_ref()).await.ok();
                    match self.precision.get(symbol) {
                        Some(spec) => spec,
                        None => {
                            self.record_scan(decision, ScanOutcome::Skipped { reason: "no symbol precision".to_string() });
                            return Ok(());
                        }
                    }
                }
            };
            match self
                .position_manager
                .open_position(&decision, &spec, self.config.default_capital, self.config.default_leverage, &policy, atr_pct)
                .await
            {
                Ok(Outcome::Opened { chain_id }) => ScanOutcome::Opened { chain_id },
                Ok(Outcome::Skipped { reason }) => ScanOutcome::Skipped { reason },
                Ok(Outcome::Rejected { reason }) => ScanOutcome::Rejected { reason },
                Err(e) => ScanOutcome::Rejected { reason: e.to_string() },
            }
        } else {
            ScanOutcome::Skipped { reason: "neutral fused direction".to_string() }
        };

        self.record_scan(decision, outcome);
        Ok(())
    }

    async fn llm_opinion(&self, symbol: &str, mode: Mode) -> Option<(crate::llm::LlmAdvice, bool)> {
        let llm = self.llm.as_ref()?;
        let ttl = mode.llm_cache_ttl();

        if !ttl.is_zero() {
            let cache = self.llm_cache.lock().unwrap();
            if let Some(entry) = cache.get(&(symbol.to_string(), mode)) {
                if entry.at.elapsed() < ttl {
                    return Some((entry.advice.clone(), true));
                }
            }
        }

        let timeout = mode.llm_timeout();
        let prompt = format!("Advise on {symbol} for mode {mode:?}.");
        let result = tokio::time::timeout(timeout, llm.advise(symbol, &prompt)).await;

        let advice = match result {
            Ok(Ok(raw)) => crate::llm::parse_response(&raw),
            _ => return None,
        };

        if !ttl.is_zero() {
            self.llm_cache.lock().unwrap().insert((symbol.to_string(), mode), LlmCacheEntry { advice: advice.clone(), at: std::time::Instant::now() });
        }
        Some((advice, false))
    }

    fn record_scan(&self, decision: Decision, outcome: ScanOutcome) {
        let mut records = self.scan_records.lock().unwrap();
        records.push(ScanRecord { decision, outcome });
        if records.len() > 1000 {
            let excess = records.len() - 1000;
            records.drain(0..excess);
        }
    }

    async fn run_monitor_loop(&self, shutdown_rx: &mut watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(MONITOR_INTERVAL) => {}
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("monitor loop shutting down");
                        return;
                    }
                }
            }

            let symbols: Vec<String> = self
                .position_manager
                .open_positions_snapshot()
                .await
                .into_iter()
                .map(|p| p.symbol)
                .collect::<std::collections::HashSet<_>>()
                .into_iter()
                .collect();

            for symbol in symbols {
                let price = match self.exchange.mark_price(&symbol).await {
                    Ok(p) => p,
                    Err(_) => continue,
                };
                if let Err(e) = self.position_manager.on_mark_price(&symbol, price).await {
                    warn!(%symbol, error = %e, "mark price tick failed");
                }
            }
        }
    }

    async fn run_cleanup_loop(&self, shutdown_rx: &mut watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(CLEANUP_INTERVAL) => {}
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("cleanup loop shutting down");
                        return;
                    }
                }
            }
            self.llm_cache.lock().unwrap().retain(|(_, mode), entry| entry.at.elapsed() < mode.llm_cache_ttl());
        }
    }

    /// Hands a stream event off to the Position Manager on the per-symbol
    /// serialized path.
    pub async fn handle_stream_event(&self, event: StreamEvent) {
        match event {
            StreamEvent::MarkPrice { symbol, price, .. } => {
                if let Err(e) = self.position_manager.on_mark_price(&symbol, price).await {
                    warn!(%symbol, error = %e, "stream mark price handling failed");
                }
            }
            StreamEvent::OrderUpdate { symbol, order_id, status, filled_qty, avg_price } => {
                if let Err(e) = self.position_manager.on_order_update(&symbol, &order_id, status, filled_qty, avg_price).await {
                    warn!(%symbol, error = %e, "order update handling failed");
                }
            }
            StreamEvent::AccountUpdate { symbol, side, remaining_qty, realized_pnl_delta } => {
                if let Err(e) = self.position_manager.on_account_update(&symbol, side, remaining_qty, realized_pnl_delta).await {
                    warn!(%symbol, error = %e, "account update handling failed");
                }
            }
            StreamEvent::Kline { .. } => {}
        }
    }
}
