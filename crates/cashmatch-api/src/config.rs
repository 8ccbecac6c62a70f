//! Process configuration.
//!
//! The engine config is a JSON file named by `CASHMATCH_CONFIG`; every field
//! is optional and falls back to the defaults in `cashmatch_types::constants`.
//! Secrets never live in the file: the webhook signing secret comes from
//! `CASHMATCH_WEBHOOK_SECRET`.

use std::path::Path;

use cashmatch_types::{CashMatchError, EngineConfig, Result};

pub const CONFIG_PATH_ENV: &str = "CASHMATCH_CONFIG";
pub const WEBHOOK_SECRET_ENV: &str = "CASHMATCH_WEBHOOK_SECRET";
pub const INSTANCE_ID_ENV: &str = "CASHMATCH_INSTANCE_ID";
/// `json` switches log output to one JSON object per line.
pub const LOG_FORMAT_ENV: &str = "CASHMATCH_LOG_FORMAT";

/// Read, override from the environment, and validate.
pub fn load_config() -> Result<EngineConfig> {
    let config = match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) => from_file(Path::new(&path))?,
        Err(_) => EngineConfig::default(),
    };
    let config = apply_env_overrides(config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

pub fn from_file(path: &Path) -> Result<EngineConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| CashMatchError::Configuration(format!("{}: {e}", path.display())))?;
    from_json(&raw)
}

pub fn from_json(raw: &str) -> Result<EngineConfig> {
    serde_json::from_str(raw).map_err(|e| CashMatchError::Configuration(e.to_string()))
}

/// Environment values win over the file. Blank values are ignored.
pub fn apply_env_overrides<F>(mut config: EngineConfig, lookup: F) -> EngineConfig
where
    F: Fn(&str) -> Option<String>,
{
    let present = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(secret) = present(WEBHOOK_SECRET_ENV) {
        config.webhook.signing_secret = secret;
    }
    if let Some(instance) = present(INSTANCE_ID_ENV) {
        config.instance_id = Some(instance);
    }
    config
}

#[must_use]
pub fn json_logs_requested() -> bool {
    std::env::var(LOG_FORMAT_ENV).is_ok_and(|v| v.eq_ignore_ascii_case("json"))
}
