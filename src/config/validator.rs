use crate::config::{parse_duration, Config};
use crate::error::{GlueError, Result, ValidationError};
use crate::modules::AllowList;

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_feed(config, &mut errors);
        Self::validate_modules(config, &mut errors);
        Self::validate_misp(config, &mut errors);
        Self::validate_enrichment(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(GlueError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_feed(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.feed.host.trim().is_empty() {
            errors.push(ValidationError::new("feed.host", "Feed host cannot be empty"));
        }

        if config.feed.port == 0 {
            errors.push(ValidationError::new(
                "feed.port",
                "Feed port must be greater than 0",
            ));
        }

        if parse_duration(&config.feed.idle_reconnect).is_none() {
            errors.push(ValidationError::new(
                "feed.idle_reconnect",
                format!("Invalid duration format: {}", config.feed.idle_reconnect),
            ));
        }

        Self::validate_timeout(
            "feed.reconnect_interval",
            &config.feed.reconnect_interval,
            errors,
        );
    }

    fn validate_modules(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.modules.host.trim().is_empty() {
            errors.push(ValidationError::new(
                "modules.host",
                "Module service host cannot be empty",
            ));
        }

        if config.modules.port == 0 {
            errors.push(ValidationError::new(
                "modules.port",
                "Module service port must be greater than 0",
            ));
        }

        Self::validate_timeout("modules.timeout", &config.modules.timeout, errors);
    }

    fn validate_misp(config: &Config, errors: &mut Vec<ValidationError>) {
        match url::Url::parse(&config.misp.url) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(url) => errors.push(ValidationError::new(
                "misp.url",
                format!("Unsupported URL scheme: {}", url.scheme()),
            )),
            Err(e) => errors.push(ValidationError::new(
                "misp.url",
                format!("Invalid URL '{}': {}", config.misp.url, e),
            )),
        }

        if config.misp.api_key.is_none() && config.misp.api_key_env.trim().is_empty() {
            errors.push(ValidationError::new(
                "misp.api_key_env",
                "Either misp.api_key or misp.api_key_env must be set",
            ));
        }

        Self::validate_timeout("misp.timeout", &config.misp.timeout, errors);
    }

    fn validate_enrichment(config: &Config, errors: &mut Vec<ValidationError>) {
        if let AllowList::Only(names) = &config.enrichment.enabled {
            if names.is_empty() {
                errors.push(ValidationError::new(
                    "enrichment.enabled",
                    "Module list is empty; use \"ALL\" or name at least one module",
                ));
            }
        }
    }

    fn validate_timeout(path: &str, value: &str, errors: &mut Vec<ValidationError>) {
        match parse_duration(value) {
            Some(d) if !d.is_zero() => {}
            Some(_) => errors.push(ValidationError::new(path, "Timeout must be greater than 0")),
            None => errors.push(ValidationError::new(
                path,
                format!("Invalid duration format: {}", value),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_empty_allow_list() {
        let mut config = Config::default();
        config.enrichment.enabled = AllowList::Only(BTreeSet::new());
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = Config::default();
        config.feed.port = 0;
        config.misp.url = "not a url".to_string();
        config.modules.timeout = "0s".to_string();

        match ConfigValidator::validate(&config) {
            Err(GlueError::ConfigValidation { errors }) => {
                let paths: Vec<_> = errors.iter().map(|e| e.path.as_str()).collect();
                assert_eq!(paths, vec!["feed.port", "modules.timeout", "misp.url"]);
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_feed_reconnect_settings() {
        let mut config = Config::default();
        config.feed.idle_reconnect = "0s".to_string();
        assert!(ConfigValidator::validate(&config).is_ok());

        config.feed.idle_reconnect = "whenever".to_string();
        config.feed.reconnect_interval = "0ms".to_string();
        match ConfigValidator::validate(&config) {
            Err(GlueError::ConfigValidation { errors }) => {
                let paths: Vec<_> = errors.iter().map(|e| e.path.as_str()).collect();
                assert_eq!(paths, vec!["feed.idle_reconnect", "feed.reconnect_interval"]);
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }
}
