//! Circuit Breaker (C7).
//!
//! Three-state machine gating new trades by loss-per-hour, daily loss,
//! consecutive losses, trade rate, and daily trade cap. Grounded in the
//! teacher's `agents::zero_loss_enforcer` approval-gate style, generalized
//! from a single win-probability gate into the full state machine the
//! specification requires, with observer callbacks per the Design Notes'
//! guidance (`OnTrip`/`OnReset` → a typed observer list).

use std::sync::Mutex;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// <= 0 disables that dimension.
    pub max_consecutive_losses: i64,
    pub max_loss_per_hour: f64,
    pub max_daily_loss: f64,
    pub max_trades_per_minute: i64,
    pub max_daily_trades: i64,
    pub cooldown_secs: i64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_consecutive_losses: 5,
            max_loss_per_hour: 5.0,
            max_daily_loss: 10.0,
            max_trades_per_minute: 10,
            max_daily_trades: 200,
            cooldown_secs: 300,
        }
    }
}

struct Counters {
    consecutive_losses: i64,
    hourly_loss: f64,
    daily_loss: f64,
    trades_this_minute: i64,
    daily_trades: i64,
    minute_bucket: u32,
    hour_bucket: u32,
    day_bucket: i64,
}

impl Counters {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            consecutive_losses: 0,
            hourly_loss: 0.0,
            daily_loss: 0.0,
            trades_this_minute: 0,
            daily_trades: 0,
            minute_bucket: now.minute(),
            hour_bucket: now.hour(),
            day_bucket: now.num_days_from_ce() as i64,
        }
    }

    fn roll_windows(&mut self, now: DateTime<Utc>) {
        if now.minute() != self.minute_bucket {
            self.minute_bucket = now.minute();
            self.trades_this_minute = 0;
        }
        if now.hour() != self.hour_bucket {
            self.hour_bucket = now.hour();
            self.hourly_loss = 0.0;
        }
        let day = now.num_days_from_ce() as i64;
        if day != self.day_bucket {
            self.day_bucket = day;
            self.daily_loss = 0.0;
            self.daily_trades = 0;
        }
    }
}

struct Inner {
    state: State,
    counters: Counters,
    last_trip_time: Option<DateTime<Utc>>,
    last_trip_reason: Option<String>,
    config: CircuitBreakerConfig,
}

/// `onTrip`/`onReset` observers are invoked exactly once per transition.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    on_trip: Mutex<Vec<Box<dyn Fn(&str) + Send + Sync>>>,
    on_reset: Mutex<Vec<Box<dyn Fn() + Send + Sync>>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let now = Utc::now();
        Self {
            inner: Mutex::new(Inner {
                state: State::Closed,
                counters: Counters::new(now),
                last_trip_time: None,
                last_trip_reason: None,
                config,
            }),
            on_trip: Mutex::new(Vec::new()),
            on_reset: Mutex::new(Vec::new()),
        }
    }

    pub fn on_trip(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.on_trip.lock().unwrap().push(Box::new(callback));
    }

    pub fn on_reset(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.on_reset.lock().unwrap().push(Box::new(callback));
    }

    pub fn state(&self) -> State {
        self.inner.lock().unwrap().state
    }

    /// Reads are lock-free from the caller's perspective in spirit (a single
    /// short-held mutex, no writer starvation risk since writes are brief).
    pub fn can_trade(&self) -> (bool, Option<String>) {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        inner.counters.roll_windows(now);

        match inner.state {
            State::Closed => (true, None),
            State::Open => {
                let cooldown = chrono::Duration::seconds(inner.config.cooldown_secs);
                let elapsed = inner
                    .last_trip_time
                    .map(|t| now - t >= cooldown)
                    .unwrap_or(true);
                if elapsed {
                    inner.state = State::HalfOpen;
                    (true, None)
                } else {
                    (false, inner.last_trip_reason.clone())
                }
            }
            State::HalfOpen => (true, None),
        }
    }

    /// Records a trade's realized PnL% and outcome, updating counters and
    /// possibly transitioning state. NaN/Inf PnL is ignored entirely.
    pub fn record_trade(&self, pnl_pct: f64) {
        if !pnl_pct.is_finite() {
            return;
        }

        let mut trip_reason: Option<String> = None;
        let mut fired_reset = false;

        {
            let mut inner = self.inner.lock().unwrap();
            let now = Utc::now();
            inner.counters.roll_windows(now);

            inner.counters.daily_trades += 1;
            inner.counters.trades_this_minute += 1;

            let is_loss = pnl_pct < 0.0;
            if is_loss {
                inner.counters.consecutive_losses += 1;
                inner.counters.hourly_loss += -pnl_pct;
                inner.counters.daily_loss += -pnl_pct;
            } else {
                inner.counters.consecutive_losses = 0;
            }

            match inner.state {
                State::HalfOpen => {
                    if is_loss {
                        inner.state = State::Open;
                        inner.last_trip_time = Some(now);
                        inner.last_trip_reason = Some("half-open probation trade lost".to_string());
                        trip_reason = inner.last_trip_reason.clone();
                    } else {
                        inner.state = State::Closed;
                        fired_reset = true;
                    }
                }
                State::Closed => {
                    let cfg = &inner.config;
                    let reason = if cfg.max_consecutive_losses > 0
                        && inner.counters.consecutive_losses >= cfg.max_consecutive_losses
                    {
                        Some(format!("consecutive losses: {}", inner.counters.consecutive_losses))
                    } else if cfg.max_loss_per_hour > 0.0 && inner.counters.hourly_loss >= cfg.max_loss_per_hour {
                        Some(format!("hourly loss: {:.2}%", inner.counters.hourly_loss))
                    } else if cfg.max_daily_loss > 0.0 && inner.counters.daily_loss >= cfg.max_daily_loss {
                        Some(format!("daily loss: {:.2}%", inner.counters.daily_loss))
                    } else if cfg.max_trades_per_minute > 0
                        && inner.counters.trades_this_minute as i64 >= cfg.max_trades_per_minute
                    {
                        Some(format!("trade rate: {}/min", inner.counters.trades_this_minute))
                    } else if cfg.max_daily_trades > 0 && inner.counters.daily_trades >= cfg.max_daily_trades {
                        Some(format!("daily trade cap: {}", inner.counters.daily_trades))
                    } else {
                        None
                    };

                    if let Some(reason) = reason {
                        inner.state = State::Open;
                        inner.last_trip_time = Some(now);
                        inner.last_trip_reason = Some(reason.clone());
                        trip_reason = Some(reason);
                    }
                }
                State::Open => {}
            }
        }

        if let Some(reason) = trip_reason {
            for callback in self.on_trip.lock().unwrap().iter() {
                callback(&reason);
            }
        }
        if fired_reset {
            for callback in self.on_reset.lock().unwrap().iter() {
                callback();
            }
        }
    }

    pub fn manual_reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = State::Closed;
        inner.counters.consecutive_losses = 0;
        inner.last_trip_time = None;
        inner.last_trip_reason = None;
    }

    pub fn remaining_cooldown(&self) -> Option<chrono::Duration> {
        let inner = self.inner.lock().unwrap();
        match inner.state {
            State::Open => {
                let cooldown = chrono::Duration::seconds(inner.config.cooldown_secs);
                inner.last_trip_time.map(|t| (t + cooldown) - Utc::now())
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn trips_on_consecutive_losses() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig { max_consecutive_losses: 5, ..CircuitBreakerConfig::default() });
        let trip_count = Arc::new(AtomicUsize::new(0));
        let tc = trip_count.clone();
        cb.on_trip(move |_| {
            tc.fetch_add(1, Ordering::SeqCst);
        });

        for pnl in [-0.4, -0.6, -0.5, -0.3, -0.2] {
            cb.record_trade(pnl);
        }

        assert_eq!(cb.state(), State::Open);
        assert_eq!(trip_count.load(Ordering::SeqCst), 1);
        let (allowed, reason) = cb.can_trade();
        assert!(!allowed);
        assert_eq!(reason.unwrap(), "consecutive losses: 5");
    }

    #[test]
    fn nan_pnl_is_ignored() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::default());
        cb.record_trade(f64::NAN);
        cb.record_trade(f64::INFINITY);
        assert_eq!(cb.state(), State::Closed);
    }

    #[test]
    fn zero_threshold_disables_dimension() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            max_consecutive_losses: 0,
            max_loss_per_hour: 0.0,
            max_daily_loss: 0.0,
            max_trades_per_minute: 0,
            max_daily_trades: 0,
            cooldown_secs: 60,
        });
        for _ in 0..50 {
            cb.record_trade(-5.0);
        }
        assert_eq!(cb.state(), State::Closed);
    }

    #[test]
    fn manual_reset_returns_to_closed() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig { max_consecutive_losses: 1, ..CircuitBreakerConfig::default() });
        cb.record_trade(-1.0);
        assert_eq!(cb.state(), State::Open);
        cb.manual_reset();
        assert_eq!(cb.state(), State::Closed);
    }
}
