//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

use std::time::Duration;

use serde::Deserialize;

use crate::aggregate::AggregationPolicy;
use crate::bus::MessagingConfig;
use crate::clients::HttpClientConfig;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "FRUSTRATION_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "FRUSTRATION";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "FRUSTRATION_LOG";

/// Default consumer group name.
pub const DEFAULT_CONSUMER_GROUP: &str = "frustration-stats";

/// Errors that can occur loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Load(#[from] config::ConfigError),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Messaging configuration.
    pub messaging: MessagingConfig,
    /// Aggregation pipeline configuration.
    pub pipeline: PipelineConfig,
    /// Fact-manager service endpoint.
    pub facts: EndpointConfig,
    /// User/team directory service endpoint.
    pub directory: EndpointConfig,
}

/// Aggregation pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Master switch; when false nothing is wired up.
    pub enabled: bool,
    /// Topic to consume submitted forms from. Empty disables the listener.
    pub topic: String,
    /// Topic to publish composites to. Empty disables sending;
    /// aggregation still runs and the result is dropped.
    pub send_topic: String,
    /// Consumer group name.
    pub group: String,
    /// Policy for variables missing from some submissions.
    pub aggregation: AggregationPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            topic: String::new(),
            send_topic: String::new(),
            group: DEFAULT_CONSUMER_GROUP.to_string(),
            aggregation: AggregationPolicy::default(),
        }
    }
}

/// An external HTTP service endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Service base URL, without trailing slash.
    pub url: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_secs: 30,
        }
    }
}

impl EndpointConfig {
    /// Convert to client connection settings.
    pub fn client_config(&self) -> HttpClientConfig {
        HttpClientConfig::new(self.url.clone()).with_timeout(Duration::from_secs(self.timeout_secs))
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `FRUSTRATION_CONFIG` environment variable (if set)
    /// 4. Environment variables with `FRUSTRATION` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        // Add config file from path argument if provided
        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        // Add config file from CONFIG_ENV_VAR env var if set
        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            // Environment variables with CONFIG_ENV_PREFIX prefix
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MessagingType;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(!config.pipeline.enabled);
        assert!(config.pipeline.topic.is_empty());
        assert_eq!(config.pipeline.group, DEFAULT_CONSUMER_GROUP);
        assert_eq!(config.pipeline.aggregation, AggregationPolicy::ZeroFill);
        assert_eq!(config.messaging.messaging_type, MessagingType::Channel);
    }

    #[test]
    fn test_config_from_yaml() {
        use ::config::{Config as ConfigLib, File, FileFormat};

        let yaml = r#"
messaging:
  type: kafka
  kafka:
    bootstrap_servers: "broker:9092"
pipeline:
  enabled: true
  topic: form-results
  send_topic: form-composites
  aggregation: contributors_only
facts:
  url: "http://facts.local"
  timeout_secs: 5
directory:
  url: "http://users.local"
"#;

        let config: Config = ConfigLib::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.messaging.messaging_type, MessagingType::Kafka);
        assert_eq!(config.messaging.kafka.bootstrap_servers, "broker:9092");
        assert!(config.pipeline.enabled);
        assert_eq!(config.pipeline.topic, "form-results");
        assert_eq!(config.pipeline.send_topic, "form-composites");
        assert_eq!(
            config.pipeline.aggregation,
            AggregationPolicy::ContributorsOnly
        );
        assert_eq!(config.facts.url, "http://facts.local");
        assert_eq!(config.facts.timeout_secs, 5);
        assert_eq!(config.directory.timeout_secs, 30);
    }

    #[test]
    fn test_endpoint_client_config() {
        let endpoint = EndpointConfig {
            url: "http://facts.local".to_string(),
            timeout_secs: 5,
        };
        let client = endpoint.client_config();
        assert_eq!(client.base_url, "http://facts.local");
        assert_eq!(client.timeout, Duration::from_secs(5));
    }
}
