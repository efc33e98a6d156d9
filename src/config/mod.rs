//! Configuration management for misp-glue
//!
//! Loads the TOML configuration, applies `GLUE_*` environment overrides and
//! validates the result before anything touches the network.

use crate::error::{GlueError, Result};
use crate::modules::AllowList;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod validator;

const REDACTED: &str = "********";

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub feed: FeedConfig,
    pub modules: ModuleServiceConfig,
    pub misp: MispConfig,
    pub enrichment: EnrichmentConfig,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
}

/// ZMQ feed the MISP instance publishes events on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub host: String,
    pub port: u16,
    /// Bytes stripped from the front of every message (the `misp_json ` topic)
    #[serde(default = "default_prefix_len")]
    pub prefix_len: usize,
    /// Resubscribe after this long without a message; "0s" disables
    #[serde(default = "default_idle_reconnect")]
    pub idle_reconnect: String,
    /// Pause between reconnect attempts
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval: String,
}

fn default_prefix_len() -> usize {
    10
}

fn default_idle_reconnect() -> String {
    "5m".to_string()
}

fn default_reconnect_interval() -> String {
    "1s".to_string()
}

/// misp-modules HTTP service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleServiceConfig {
    pub host: String,
    pub port: u16,
    pub timeout: String,
}

impl ModuleServiceConfig {
    /// Base URL of the module service
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// MISP instance events are written back to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MispConfig {
    pub url: String,
    /// Inline API key; takes precedence over `api_key_env`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub api_key_env: String,
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,
    pub timeout: String,
}

fn default_verify_tls() -> bool {
    true
}

impl MispConfig {
    /// Resolve the API key from the config file or the named environment variable
    pub fn resolve_api_key(&self) -> Result<String> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.is_empty()) {
            return Ok(key.clone());
        }

        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.is_empty() => Ok(key),
            Ok(_) => Err(GlueError::Config(format!(
                "Environment variable {} is empty",
                self.api_key_env
            ))),
            Err(_) => Err(GlueError::Config(format!(
                "No misp.api_key set and environment variable {} is not set",
                self.api_key_env
            ))),
        }
    }
}

/// When enriched events are pushed back to MISP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteBack {
    /// One update per event, after every attribute has been through its modules
    #[default]
    PerEvent,
    /// One update after every module invocation that added attributes
    PerModule,
}

/// Which modules run and what extra configuration they receive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    pub enabled: AllowList,
    #[serde(default)]
    pub write_back: WriteBack,
    /// Module name -> payload forwarded verbatim as the request's `config`
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(GlueError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| GlueError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;

        Self::from_toml_str(&content)
    }

    /// Parse, override and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| GlueError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Copy safe to print: an inline API key is masked
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.misp.api_key.is_some() {
            config.misp.api_key = Some(REDACTED.to_string());
        }
        config
    }

    /// Apply environment variable overrides
    /// Environment variables in format: GLUE_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("GLUE_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "FEED__HOST" => self.feed.host = value.to_string(),
            "FEED__PORT" => self.feed.port = parse_port(path, value)?,
            "MODULES__HOST" => self.modules.host = value.to_string(),
            "MODULES__PORT" => self.modules.port = parse_port(path, value)?,
            "MISP__URL" => self.misp.url = value.to_string(),
            "MISP__API_KEY" => self.misp.api_key = Some(value.to_string()),
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| GlueError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("misp-glue").join("config.toml"))
    }
}

fn parse_port(path: &str, value: &str) -> Result<u16> {
    value.parse().map_err(|_| GlueError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}' as a port", value),
    })
}

/// Parse a duration string such as "500ms", "30s", "5m", "1h" or bare seconds
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();

    // "ms" before "s" because "ms" ends with "s"
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim().parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.trim().parse::<u64>().ok().map(|h| Duration::from_secs(h * 3600))
    } else {
        s.parse().ok().map(Duration::from_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
            },
            feed: FeedConfig {
                host: "127.0.0.1".to_string(),
                port: 50000,
                prefix_len: default_prefix_len(),
                idle_reconnect: default_idle_reconnect(),
                reconnect_interval: default_reconnect_interval(),
            },
            modules: ModuleServiceConfig {
                host: "127.0.0.1".to_string(),
                port: 6666,
                timeout: "30s".to_string(),
            },
            misp: MispConfig {
                url: "https://127.0.0.1".to_string(),
                api_key: None,
                api_key_env: "MISP_API_KEY".to_string(),
                verify_tls: true,
                timeout: "30s".to_string(),
            },
            enrichment: EnrichmentConfig {
                enabled: AllowList::All,
                write_back: WriteBack::PerEvent,
                config: HashMap::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("7"), Some(Duration::from_secs(7)));
        assert_eq!(parse_duration("soon"), None);
    }

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_toml_str(
            r#"
[_meta]
schema_version = "1.0.0"

[feed]
host = "misp.local"
port = 50000

[modules]
host = "modules.local"
port = 6666
timeout = "10s"

[misp]
url = "https://misp.local"
api_key = "secret"
api_key_env = "MISP_API_KEY"
timeout = "20s"

[enrichment]
enabled = ["dns", "virustotal"]
write_back = "per_module"

[enrichment.config.virustotal]
apikey = "vt-key"
event_limit = 5
"#,
        )
        .unwrap();

        assert_eq!(config.feed.prefix_len, 10);
        assert_eq!(config.feed.idle_reconnect, "5m");
        assert_eq!(config.feed.reconnect_interval, "1s");
        assert!(config.misp.verify_tls);
        assert_eq!(config.modules.base_url(), "http://modules.local:6666");
        assert_eq!(config.enrichment.write_back, WriteBack::PerModule);
        assert!(config.enrichment.enabled.permits("dns"));
        assert!(!config.enrichment.enabled.permits("shodan"));
        assert_eq!(
            config.enrichment.config["virustotal"],
            serde_json::json!({"apikey": "vt-key", "event_limit": 5})
        );
        assert_eq!(config.misp.resolve_api_key().unwrap(), "secret");
    }

    #[test]
    fn test_all_keyword_and_default_write_back() {
        let mut config = Config::default();
        config.misp.api_key = Some("k".to_string());
        let text = toml::to_string_pretty(&config).unwrap();
        assert!(text.contains("enabled = \"ALL\""));

        let parsed = Config::from_toml_str(&text).unwrap();
        assert_eq!(parsed.enrichment.enabled, AllowList::All);
        assert_eq!(parsed.enrichment.write_back, WriteBack::PerEvent);
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load(Path::new("/nonexistent/misp-glue.toml")).unwrap_err();
        assert!(matches!(err, GlueError::ConfigNotFound { .. }));
    }

    #[test]
    fn test_api_key_from_named_env_var() {
        let mut config = Config::default();
        config.misp.api_key_env = "MISP_GLUE_TEST_KEY_VAR".to_string();
        std::env::set_var("MISP_GLUE_TEST_KEY_VAR", "from-env");
        assert_eq!(config.misp.resolve_api_key().unwrap(), "from-env");

        config.misp.api_key_env = "MISP_GLUE_TEST_KEY_UNSET".to_string();
        assert!(config.misp.resolve_api_key().is_err());
    }

    #[test]
    fn test_redacted_masks_inline_api_key() {
        let mut config = Config::default();
        config.misp.api_key = Some("s3cr3t-key".to_string());

        let shown = serde_json::to_string_pretty(&config.redacted()).unwrap();
        assert!(!shown.contains("s3cr3t-key"));
        assert!(shown.contains(REDACTED));
        assert_eq!(config.misp.api_key.as_deref(), Some("s3cr3t-key"));

        let without_key = Config::default().redacted();
        assert!(without_key.misp.api_key.is_none());
    }
}
