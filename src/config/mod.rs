//! Settings Store Adapter (C11).
//!
//! Atomic read-modify-write over a TOML file: load, mutate, write to a
//! sibling temp file, rename over the original. The load-validate/
//! save-pretty-TOML shape follows the teacher's
//! `deployment::config_manager::{load_config, save_config}`; the
//! temp-then-rename write itself has no teacher precedent (the teacher's
//! `save_config` writes the file directly) and is this crate's own
//! addition, generalized from a single flat struct to the full
//! configuration surface the specification enumerates (mode table, circuit
//! breaker, LLM weight/cache, per-symbol and per-position ROI overrides,
//! instance defaults).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::{GinieError, GinieResult};
use crate::mode::{Mode, ModePolicyTable};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    pub weight: f64,
    pub cache_ttl_secs: HashMap<String, u64>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        let mut cache_ttl_secs = HashMap::new();
        for mode in Mode::ALL {
            cache_ttl_secs.insert(format!("{mode:?}"), mode.llm_cache_ttl().as_secs());
        }
        Self { weight: 0.3, cache_ttl_secs }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSettings {
    pub active_by_default: bool,
    pub heartbeat_ttl_secs: i64,
}

impl Default for InstanceSettings {
    fn default() -> Self {
        Self { active_by_default: false, heartbeat_ttl_secs: 15 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolOverride {
    pub roi_target_pct: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub modes: ModePolicyTable,
    pub circuit_breaker: CircuitBreakerConfig,
    pub llm: LlmSettings,
    pub instance: InstanceSettings,
    #[serde(default)]
    pub symbol_overrides: HashMap<String, SymbolOverride>,
    #[serde(default)]
    pub position_roi_overrides: HashMap<String, f64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            modes: ModePolicyTable::defaults(),
            circuit_breaker: CircuitBreakerConfig::default(),
            llm: LlmSettings::default(),
            instance: InstanceSettings::default(),
            symbol_overrides: HashMap::new(),
            position_roi_overrides: HashMap::new(),
        }
    }
}

impl Settings {
    pub fn roi_target_for(&self, symbol: &str, position_id: &str, mode: Mode) -> f64 {
        if let Some(pct) = self.position_roi_overrides.get(position_id) {
            return *pct;
        }
        if let Some(pct) = self.symbol_overrides.get(symbol).and_then(|o| o.roi_target_pct) {
            return pct;
        }
        self.modes.get(mode).early_profit_roi_target_pct
    }
}

/// Loads settings from `path`, falling back to defaults (and writing them
/// out) when the file does not yet exist.
pub async fn load(path: &Path) -> GinieResult<Settings> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => toml::from_str(&contents).map_err(|e| GinieError::MalformedSettings(e.to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let defaults = Settings::default();
            save(path, &defaults).await?;
            Ok(defaults)
        }
        Err(e) => Err(GinieError::MalformedSettings(e.to_string())),
    }
}

/// Writes `settings` to `path` atomically: serialize, write to a temp file
/// in the same directory, then rename over the destination.
pub async fn save(path: &Path, settings: &Settings) -> GinieResult<()> {
    let serialized = toml::to_string_pretty(settings).map_err(|e| GinieError::MalformedSettings(e.to_string()))?;

    let tmp_path = tmp_path_for(path);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| GinieError::Store(e.to_string()))?;
    }
    tokio::fs::write(&tmp_path, serialized)
        .await
        .map_err(|e| GinieError::Store(e.to_string()))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| GinieError::Store(e.to_string()))?;
    Ok(())
}

/// Load → mutate → save, read-modify-write against the same file.
pub async fn update(path: &Path, mutate: impl FnOnce(&mut Settings)) -> GinieResult<Settings> {
    let mut settings = load(path).await?;
    mutate(&mut settings);
    save(path, &settings).await?;
    Ok(settings)
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_seeds_defaults() {
        let dir = std::env::temp_dir().join(format!("ginie-test-{}", uuid::Uuid::new_v4()));
        let path = dir.join("settings.toml");
        let settings = load(&path).await.unwrap();
        assert_eq!(settings.llm.weight, 0.3);
        assert!(path.exists());
        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn round_trips_through_save_and_load() {
        let dir = std::env::temp_dir().join(format!("ginie-test-{}", uuid::Uuid::new_v4()));
        let path = dir.join("settings.toml");
        let mut settings = Settings::default();
        settings.llm.weight = 0.5;
        save(&path, &settings).await.unwrap();
        let reloaded = load(&path).await.unwrap();
        assert_eq!(reloaded.llm.weight, 0.5);
        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn update_applies_mutation_atomically() {
        let dir = std::env::temp_dir().join(format!("ginie-test-{}", uuid::Uuid::new_v4()));
        let path = dir.join("settings.toml");
        load(&path).await.unwrap();
        update(&path, |s| {
            s.symbol_overrides.insert("BTCUSDT".to_string(), SymbolOverride { roi_target_pct: Some(1.5) });
        })
        .await
        .unwrap();
        let reloaded = load(&path).await.unwrap();
        assert_eq!(reloaded.symbol_overrides.get("BTCUSDT").unwrap().roi_target_pct, Some(1.5));
        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[test]
    fn roi_target_prefers_position_then_symbol_then_mode_default() {
        let mut settings = Settings::default();
        settings.symbol_overrides.insert("ETHUSDT".to_string(), SymbolOverride { roi_target_pct: Some(0.8) });
        settings.position_roi_overrides.insert("pos-1".to_string(), 1.2);

        assert_eq!(settings.roi_target_for("ETHUSDT", "pos-1", Mode::Scalp), 1.2);
        assert_eq!(settings.roi_target_for("ETHUSDT", "pos-2", Mode::Scalp), 0.8);
        assert_eq!(
            settings.roi_target_for("SOLUSDT", "pos-3", Mode::Scalp),
            ModePolicyTable::defaults().get(Mode::Scalp).early_profit_roi_target_pct
        );
    }
}
