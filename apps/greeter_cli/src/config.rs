use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{anyhow, Context};
use serde::Deserialize;
use sync_core::{EngineOptions, DEFAULT_GREETING_FEE_WEI, DEFAULT_INITIAL_GREETING};
use url::Url;

pub const SETTINGS_FILE: &str = "greeter.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    pub database_url: String,
    pub rpc_url: String,
    pub account: Option<String>,
    pub greeting_fee_wei: u128,
    pub initial_greeting: String,
    pub confirmation_poll_ms: u64,
    pub greeter_bytecode_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./data/greeter.db".into(),
            rpc_url: "http://127.0.0.1:8545".into(),
            account: None,
            greeting_fee_wei: DEFAULT_GREETING_FEE_WEI,
            initial_greeting: DEFAULT_INITIAL_GREETING.into(),
            confirmation_poll_ms: 500,
            greeter_bytecode_path: None,
        }
    }
}

impl Settings {
    pub fn rpc_url(&self) -> anyhow::Result<Url> {
        Url::parse(&self.rpc_url).with_context(|| format!("invalid rpc_url '{}'", self.rpc_url))
    }

    pub fn confirmation_poll(&self) -> Duration {
        Duration::from_millis(self.confirmation_poll_ms)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            greeting_fee_wei: self.greeting_fee_wei,
            initial_greeting: self.initial_greeting.clone(),
        }
    }

    /// Creation bytecode for deployments, from either a raw hex file or a
    /// compiler artifact with a `bytecode` field.
    pub fn load_bytecode(&self) -> anyhow::Result<Option<Arc<Vec<u8>>>> {
        let Some(path) = &self.greeter_bytecode_path else {
            return Ok(None);
        };
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read bytecode from {}", path.display()))?;
        let hex = match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(artifact) => artifact
                .get("bytecode")
                .and_then(|value| value.as_str())
                .map(str::to_string)
                .ok_or_else(|| anyhow!("{} has no bytecode field", path.display()))?,
            Err(_) => raw.trim().to_string(),
        };
        let bytes = chain_integration::abi::decode_hex(&hex)
            .with_context(|| format!("invalid bytecode in {}", path.display()))?;
        Ok(Some(Arc::new(bytes)))
    }
}

pub fn load_settings() -> Settings {
    load_settings_from(Path::new(SETTINGS_FILE), |key| std::env::var(key).ok())
}

/// Defaults, then the flat `key = "value"` table in `path`, then environment
/// variables. `APP__*` names win over `GREETER_*` ones.
pub fn load_settings_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> Settings {
    let mut values: HashMap<String, String> = HashMap::new();

    if let Ok(raw) = fs::read_to_string(path) {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            values.extend(file_cfg);
        }
    }

    for key in [
        "database_url",
        "rpc_url",
        "account",
        "greeting_fee_wei",
        "initial_greeting",
        "confirmation_poll_ms",
        "greeter_bytecode_path",
    ] {
        let upper = key.to_ascii_uppercase();
        for name in [format!("GREETER_{upper}"), format!("APP__{upper}")] {
            if let Some(value) = env(&name) {
                values.insert(key.to_string(), value);
            }
        }
    }

    let mut settings = Settings::default();
    if let Some(v) = values.remove("database_url") {
        settings.database_url = v;
    }
    if let Some(v) = values.remove("rpc_url") {
        settings.rpc_url = v;
    }
    if let Some(v) = values.remove("account") {
        settings.account = Some(v).filter(|account| !account.trim().is_empty());
    }
    if let Some(v) = values.remove("greeting_fee_wei") {
        if let Ok(parsed) = v.parse::<u128>() {
            settings.greeting_fee_wei = parsed;
        }
    }
    if let Some(v) = values.remove("initial_greeting") {
        settings.initial_greeting = v;
    }
    if let Some(v) = values.remove("confirmation_poll_ms") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.confirmation_poll_ms = parsed;
        }
    }
    if let Some(v) = values.remove("greeter_bytecode_path") {
        settings.greeter_bytecode_path = Some(PathBuf::from(v));
    }

    settings
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    storage::ensure_sqlite_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:") || raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        return format!("sqlite://{}", path.replace('\\', "/"));
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
