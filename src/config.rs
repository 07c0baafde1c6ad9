use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Config {
    // Connection settings
    pub target: String,
    pub dial_block: bool,
    pub dial_timeout_ms: Option<u64>,

    // Demo workload
    pub calls: u32,
    pub concurrency: u32,

    // Exposition
    pub instance: String,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target: "localhost:10000".to_string(),
            dial_block: false,
            dial_timeout_ms: None,
            calls: 100,
            concurrency: 5,
            instance: "rpc-meter".to_string(),
            debug: false,
        }
    }
}

impl Config {
    pub fn dial_timeout(&self) -> Option<Duration> {
        self.dial_timeout_ms.map(Duration::from_millis)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target.trim().is_empty() {
            return Err(ConfigError::MissingTarget);
        }
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("target is required")]
    MissingTarget,
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,
}

pub fn load_config() -> anyhow::Result<Config> {
    load_config_from(|key| std::env::var(key).ok())
}

/// Build a config from an arbitrary variable lookup.
pub fn load_config_from<F>(var: F) -> anyhow::Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = Config::default();

    let target = var("RPCMETER_TARGET").unwrap_or(defaults.target);

    let dial_block = var("RPCMETER_DIAL_BLOCK")
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false);

    let dial_timeout_ms = var("RPCMETER_DIAL_TIMEOUT_MS").and_then(|v| v.parse().ok());

    let calls = var("RPCMETER_CALLS")
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.calls);

    let concurrency = var("RPCMETER_CONCURRENCY")
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.concurrency);

    let instance = var("RPCMETER_INSTANCE").unwrap_or(defaults.instance);

    let debug = var("DEBUG").is_some();

    let cfg = Config {
        target,
        dial_block,
        dial_timeout_ms,
        calls,
        concurrency,
        instance,
        debug,
    };
    cfg.validate()?;

    Ok(cfg)
}
