use crate::Result;
use anyhow::anyhow;
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

// TOML configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_library_alias")]
    pub library_alias: String,
    #[serde(default = "default_preview_rows")]
    pub preview_rows: u32,
    #[serde(default = "default_max_eval_steps")]
    pub max_eval_steps: u64,
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
    #[serde(default = "default_dead_band_policy")]
    pub dead_band_policy: String,
    #[serde(default)]
    pub clamp_upper: bool,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_bind")]
    pub bind: String,
    /// 空なら制限なし
    #[serde(default)]
    pub data_root: String,
    #[serde(default = "default_preview_debounce")]
    pub preview_debounce: String,
}

#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_formula_path")]
    pub formula_path: String,
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_rust_log_format")]
    pub rust_log_format: String,
}

// Default values
fn default_library_alias() -> String {
    "np".to_string()
}
fn default_preview_rows() -> u32 {
    10
}
fn default_max_eval_steps() -> u64 {
    100_000
}
fn default_utc_offset_hours() -> i32 {
    8 // 中国標準時
}
fn default_dead_band_policy() -> String {
    "retain".to_string()
}
fn default_server_bind() -> String {
    "0.0.0.0:8000".to_string()
}
fn default_preview_debounce() -> String {
    "300ms".to_string()
}
fn default_formula_path() -> String {
    "data/formulas.json".to_string()
}
fn default_rust_log_format() -> String {
    "json".to_string()
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            library_alias: default_library_alias(),
            preview_rows: default_preview_rows(),
            max_eval_steps: default_max_eval_steps(),
            utc_offset_hours: default_utc_offset_hours(),
            dead_band_policy: default_dead_band_policy(),
            clamp_upper: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_server_bind(),
            data_root: String::new(),
            preview_debounce: default_preview_debounce(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            formula_path: default_formula_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            rust_log_format: default_rust_log_format(),
        }
    }
}

static CONFIG: Lazy<Config> = Lazy::new(|| {
    load_config().unwrap_or_else(|e| {
        eprintln!(
            "Warning: Failed to load config files: {}. Using defaults.",
            e
        );
        Config::default()
    })
});

static CONFIG_STORE: Lazy<Arc<Mutex<HashMap<String, String>>>> =
    Lazy::new(|| Arc::new(Mutex::new(HashMap::new())));

pub fn get(name: &str) -> Result<String> {
    // Priority 1: CONFIG_STORE (runtime overrides)
    if let Some(value) = get_from_store(name) {
        if value.is_empty() {
            return Err(anyhow!("{} is empty", name));
        }
        return Ok(value);
    }

    // Priority 2: Environment variables
    if let Ok(val) = std::env::var(name)
        && !val.is_empty()
    {
        return Ok(val);
    }

    // Priority 3: TOML config
    let toml_value = match name {
        "SCORING_LIBRARY_ALIAS" => Some(CONFIG.scoring.library_alias.clone()),
        "SCORING_PREVIEW_ROWS" => Some(CONFIG.scoring.preview_rows.to_string()),
        "SCORING_MAX_EVAL_STEPS" => Some(CONFIG.scoring.max_eval_steps.to_string()),
        "SCORING_UTC_OFFSET_HOURS" => Some(CONFIG.scoring.utc_offset_hours.to_string()),
        "SCORING_DEAD_BAND_POLICY" => Some(CONFIG.scoring.dead_band_policy.clone()),
        "SCORING_CLAMP_UPPER" => Some(CONFIG.scoring.clamp_upper.to_string()),
        "SERVER_BIND" => Some(CONFIG.server.bind.clone()),
        "SERVER_DATA_ROOT" => {
            if !CONFIG.server.data_root.is_empty() {
                Some(CONFIG.server.data_root.clone())
            } else {
                None
            }
        }
        "SERVER_PREVIEW_DEBOUNCE" => Some(CONFIG.server.preview_debounce.clone()),
        "FORMULA_STORE_PATH" => Some(CONFIG.store.formula_path.clone()),
        "RUST_LOG_FORMAT" => Some(CONFIG.logging.rust_log_format.clone()),
        _ => None,
    };

    if let Some(value) = toml_value
        && !value.is_empty()
    {
        return Ok(value);
    }

    Err(anyhow!("Configuration key not found: {}", name))
}

/// 値を取得してパースする。未設定・パース失敗時は `default`。
pub fn get_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    get(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// テスト用: 設定値を上書きする
///
/// 注: `#[cfg(test)]` にすると他クレートのテストから参照できないため
/// `#[doc(hidden)]` で公開している
#[doc(hidden)]
pub fn set(name: &str, value: &str) {
    if let Ok(mut store) = CONFIG_STORE.lock() {
        store.insert(name.to_string(), value.to_string());
    }
}

/// テスト用: 設定値を CONFIG_STORE から削除する
#[doc(hidden)]
pub fn remove(name: &str) {
    if let Ok(mut store) = CONFIG_STORE.lock() {
        store.remove(name);
    }
}

/// テスト用: CONFIG_STORE に値をセットし、Drop 時に自動で元に戻す RAII ガード。
///
/// テストが途中で panic しても確実にクリーンアップされる。
#[doc(hidden)]
pub struct ConfigGuard {
    key: String,
    previous: Option<String>,
}

impl ConfigGuard {
    pub fn new(key: &str, value: &str) -> Self {
        let previous = get_from_store(key);
        set(key, value);
        Self {
            key: key.to_string(),
            previous,
        }
    }
}

impl Drop for ConfigGuard {
    fn drop(&mut self) {
        match &self.previous {
            Some(prev) => set(&self.key, prev),
            None => remove(&self.key),
        }
    }
}

fn get_from_store(name: &str) -> Option<String> {
    if let Ok(store) = CONFIG_STORE.lock() {
        store.get(name).cloned()
    } else {
        None
    }
}

/// Load configuration from TOML files with priority:
/// 1. config/config.local.toml (git-ignored, for local overrides)
/// 2. config/config.toml (git-managed template)
/// 3. Default values
fn load_config() -> Result<Config> {
    let mut config = Config::default();

    let base_path = "config/config.toml";
    if Path::new(base_path).exists() {
        let content = fs::read_to_string(base_path)?;
        config = toml::from_str(&content)?;
    }

    let local_path = "config/config.local.toml";
    if Path::new(local_path).exists() {
        let content = fs::read_to_string(local_path)?;
        let local_config: Config = toml::from_str(&content)?;
        merge_config(&mut config, local_config);
    }

    Ok(config)
}

/// Merge local config into base config (local values override base values)
fn merge_config(base: &mut Config, local: Config) {
    // Scoring
    if local.scoring.library_alias != default_library_alias() {
        base.scoring.library_alias = local.scoring.library_alias;
    }
    if local.scoring.preview_rows != default_preview_rows() {
        base.scoring.preview_rows = local.scoring.preview_rows;
    }
    if local.scoring.max_eval_steps != default_max_eval_steps() {
        base.scoring.max_eval_steps = local.scoring.max_eval_steps;
    }
    if local.scoring.utc_offset_hours != default_utc_offset_hours() {
        base.scoring.utc_offset_hours = local.scoring.utc_offset_hours;
    }
    if local.scoring.dead_band_policy != default_dead_band_policy() {
        base.scoring.dead_band_policy = local.scoring.dead_band_policy;
    }
    if local.scoring.clamp_upper {
        base.scoring.clamp_upper = local.scoring.clamp_upper;
    }

    // Server
    if local.server.bind != default_server_bind() {
        base.server.bind = local.server.bind;
    }
    if !local.server.data_root.is_empty() {
        base.server.data_root = local.server.data_root;
    }
    if local.server.preview_debounce != default_preview_debounce() {
        base.server.preview_debounce = local.server.preview_debounce;
    }

    // Store
    if local.store.formula_path != default_formula_path() {
        base.store.formula_path = local.store.formula_path;
    }

    // Logging
    if local.logging.rust_log_format != default_rust_log_format() {
        base.logging.rust_log_format = local.logging.rust_log_format;
    }
}

/// Get TOML-based configuration
pub fn config() -> &'static Config {
    &CONFIG
}
