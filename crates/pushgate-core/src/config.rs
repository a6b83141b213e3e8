use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// Default number of broker shards. One is enough for correctness; more
/// shards narrow the blast radius of a slow SSE consumer.
pub const DEFAULT_SHARDS: usize = 4;

/// Top-level config (pushgate.toml + PUSHGATE_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushgateConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub demo: DemoConfig,
}

impl Default for PushgateConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            broker: BrokerConfig::default(),
            demo: DemoConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Number of shard event loops. Values below 1 are clamped to 1 at
    /// broker construction; the count is fixed for the broker's lifetime.
    #[serde(default = "default_shards")]
    pub shards: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            shards: DEFAULT_SHARDS,
        }
    }
}

/// Synthetic traffic generator for load testing the push path.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DemoConfig {
    /// When true the gateway emits random broadcast and per-identity
    /// messages in the background. Defaults to false.
    #[serde(default)]
    pub enabled: bool,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_shards() -> usize {
    DEFAULT_SHARDS
}

impl PushgateConfig {
    /// Load config from a TOML file with PUSHGATE_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.pushgate/pushgate.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: PushgateConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("PUSHGATE_").split("_"))
            .extract()
            .map_err(|e| crate::error::ConfigError::Invalid(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.pushgate/pushgate.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = PushgateConfig::default();
        assert_eq!(config.gateway.port, DEFAULT_PORT);
        assert_eq!(config.broker.shards, DEFAULT_SHARDS);
        assert!(!config.demo.enabled);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = PushgateConfig::load(Some("/nonexistent/pushgate.toml")).unwrap();
        assert_eq!(config.gateway.bind, DEFAULT_BIND);
    }
}
