//! Instance Control (C10).
//!
//! Active/standby election over the shared `Store`: compare-and-swap an
//! `active_instance_id` key guarded by a TTL heartbeat, publish `activated`
//! on success, demote on renewal failure. No teacher precedent — the
//! teacher runs single-instance and has no leader-election or CAS code
//! anywhere. Built on this crate's own `store::Store` trait, using the
//! teacher's `deployment::production_manager` active/standby boolean-flag
//! style (`is_running`/`emergency_stop`) as the only structural precedent
//! for a gated control surface.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::store::Store;

const ACTIVE_KEY: &str = "ginie:active_instance_id";
const ACTIVATED_CHANNEL: &str = "ginie:activated";

#[derive(Debug, Clone, PartialEq)]
pub struct InstanceState {
    pub instance_id: String,
    pub is_active: bool,
    pub last_heartbeat_at: Option<chrono::DateTime<chrono::Utc>>,
}

pub struct InstanceControl {
    instance_id: String,
    store: Arc<dyn Store>,
    ttl_secs: i64,
    is_active: AtomicBool,
}

impl InstanceControl {
    pub fn new(instance_id: impl Into<String>, store: Arc<dyn Store>, ttl_secs: i64) -> Self {
        Self { instance_id: instance_id.into(), store, ttl_secs, is_active: AtomicBool::new(false) }
    }

    pub fn is_active(&self) -> bool {
        self.is_active.load(Ordering::SeqCst)
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Attempts to become active by CAS-ing the lock key from empty/expired
    /// to this instance's id. Returns `true` if this call won election (or
    /// this instance was already active and renewed successfully).
    pub async fn try_elect(&self) -> anyhow::Result<bool> {
        if self.is_active() {
            return self.renew_heartbeat().await;
        }

        let current = self.store.get(ACTIVE_KEY).await?;
        let won = self
            .store
            .compare_and_swap(ACTIVE_KEY, current.as_deref(), &self.instance_id, self.ttl_secs)
            .await?;

        if won {
            self.is_active.store(true, Ordering::SeqCst);
            self.store.publish(ACTIVATED_CHANNEL, &self.instance_id).await?;
            info!(instance_id = %self.instance_id, "elected active instance");
        }
        Ok(won)
    }

    /// Renews the heartbeat TTL; demotes this instance on failure (lock
    /// stolen by a stale-heartbeat rival, or store transiently unavailable).
    pub async fn renew_heartbeat(&self) -> anyhow::Result<bool> {
        let renewed = self
            .store
            .compare_and_swap(ACTIVE_KEY, Some(self.instance_id.as_str()), &self.instance_id, self.ttl_secs)
            .await?;

        if !renewed {
            self.is_active.store(false, Ordering::SeqCst);
            warn!(instance_id = %self.instance_id, "lost active lease, demoting");
        }
        Ok(renewed)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs((self.ttl_secs / 2).max(1) as u64)
    }

    pub async fn state(&self) -> anyhow::Result<InstanceState> {
        Ok(InstanceState {
            instance_id: self.instance_id.clone(),
            is_active: self.is_active(),
            last_heartbeat_at: if self.is_active() { Some(chrono::Utc::now()) } else { None },
        })
    }
}
