use crate::audio::MAX_VOLUME;
use crate::engine::{EngineConfig, FocusDeniedPolicy};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const APP_DIR: &str = "encore";
const SETTINGS_FILE: &str = "settings.json";
const CONFIG_DIR_ENV: &str = "ENCORE_CONFIG_DIR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub volume: f32,
    pub duck_volume_ratio: f32,
    pub focus_denied: FocusDeniedPolicy,
    pub shuffle: bool,
    pub repeat: bool,
    pub completion_poll_ms: u64,
    pub output_device: Option<String>,
    pub route_poll_ms: u64,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            volume: 1.0,
            duck_volume_ratio: 0.2,
            focus_denied: FocusDeniedPolicy::StayPaused,
            shuffle: false,
            repeat: false,
            completion_poll_ms: 100,
            output_device: None,
            route_poll_ms: 1_000,
            log_filter: String::from("encore=info"),
        }
    }
}

impl Settings {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            volume: self.volume.clamp(0.0, MAX_VOLUME),
            duck_ratio: self.duck_volume_ratio.clamp(0.0, 1.0),
            focus_denied: self.focus_denied,
            shuffle_seed: None,
        }
    }

    pub fn completion_poll(&self) -> Duration {
        Duration::from_millis(self.completion_poll_ms.max(10))
    }

    pub fn route_poll(&self) -> Duration {
        Duration::from_millis(self.route_poll_ms.max(50))
    }
}

pub fn config_root() -> Result<PathBuf> {
    if let Ok(override_dir) = env::var(CONFIG_DIR_ENV) {
        return Ok(PathBuf::from(override_dir));
    }

    let base = dirs::config_dir().context("no configuration directory on this platform")?;
    Ok(base.join(APP_DIR))
}

pub fn settings_path() -> Result<PathBuf> {
    Ok(config_root()?.join(SETTINGS_FILE))
}

pub fn ensure_config_dir() -> Result<PathBuf> {
    let root = config_root()?;
    fs::create_dir_all(&root).with_context(|| format!("failed to create {}", root.display()))?;
    Ok(root)
}

pub fn load_settings() -> Result<Settings> {
    let path = settings_path()?;
    if !path.exists() {
        return Ok(Settings::default());
    }

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read settings file {}", path.display()))?;
    let settings: Settings = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse settings file {}", path.display()))?;
    Ok(settings)
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    ensure_config_dir()?;
    let path = settings_path()?;
    let json = serde_json::to_string_pretty(settings)?;
    fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
