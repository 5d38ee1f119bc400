//! Configuration
//!
//! YAML configuration with env-var overrides for API keys
//! (`<NAME>_API_KEY`, e.g. `OPENWEATHERMAP_API_KEY`).

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::OracleError;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub aggregator: AggregatorSettings,
    #[serde(default)]
    pub consensus: ConsensusSettings,
    #[serde(default)]
    pub weather_apis: HashMap<String, ApiSettings>,
    /// Operator identities this node simulates locally. Production
    /// deployments receive these from the registrar transport instead.
    #[serde(default = "default_operators")]
    pub operators: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorSettings {
    #[serde(default = "default_min_operators")]
    pub min_operators: usize,
    #[serde(default = "default_response_timeout")]
    pub response_timeout_secs: u64,
    /// Reserved for stake-weighted quorum variants; unused in the
    /// pure-count path.
    #[serde(default = "default_consensus_threshold")]
    pub consensus_threshold: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsensusSettings {
    #[serde(default = "default_min_sources")]
    pub min_sources: usize,
    #[serde(default = "default_mad_threshold")]
    pub mad_threshold: f64,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_max_cache_entries")]
    pub max_cache_entries: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiSettings {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_min_operators() -> usize {
    3
}
fn default_response_timeout() -> u64 {
    60
}
fn default_consensus_threshold() -> f64 {
    0.67
}
fn default_min_sources() -> usize {
    3
}
fn default_mad_threshold() -> f64 {
    2.5
}
fn default_cache_ttl() -> u64 {
    300
}
fn default_max_cache_entries() -> usize {
    10_000
}
fn default_rate_limit() -> u32 {
    60
}
fn default_operators() -> Vec<String> {
    (1..=5).map(|i| format!("op{}", i)).collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            aggregator: AggregatorSettings::default(),
            consensus: ConsensusSettings::default(),
            weather_apis: HashMap::new(),
            operators: default_operators(),
        }
    }
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            min_operators: default_min_operators(),
            response_timeout_secs: default_response_timeout(),
            consensus_threshold: default_consensus_threshold(),
        }
    }
}

impl Default for ConsensusSettings {
    fn default() -> Self {
        Self {
            min_sources: default_min_sources(),
            mad_threshold: default_mad_threshold(),
            cache_ttl_secs: default_cache_ttl(),
            max_cache_entries: default_max_cache_entries(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, OracleError> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| OracleError::Config(format!("read {}: {}", path.as_ref().display(), e)))?;
        let mut config: Config = serde_yaml::from_str(&raw)
            .map_err(|e| OracleError::Config(format!("parse config: {}", e)))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// `<NAME>_API_KEY` env vars take precedence over file values.
    pub fn apply_env_overrides(&mut self) {
        for (name, api) in self.weather_apis.iter_mut() {
            let var = format!("{}_API_KEY", name.to_uppercase());
            if let Ok(key) = std::env::var(&var) {
                if !key.is_empty() {
                    api.api_key = Some(key);
                }
            }
        }
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.aggregator.response_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.consensus.cache_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.aggregator.min_operators, 3);
        assert_eq!(config.aggregator.response_timeout_secs, 60);
        assert_eq!(config.consensus.min_sources, 3);
        assert!((config.consensus.mad_threshold - 2.5).abs() < f64::EPSILON);
        assert_eq!(config.consensus.cache_ttl_secs, 300);
        assert_eq!(config.consensus.max_cache_entries, 10_000);
        assert_eq!(config.operators.len(), 5);
    }

    #[test]
    fn test_parse_weather_apis() {
        let yaml = r#"
aggregator:
  min_operators: 2
weather_apis:
  openmeteo:
    rate_limit: 30
  openweathermap:
    rate_limit: 10
    api_key: abc123
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.aggregator.min_operators, 2);
        assert_eq!(config.weather_apis["openmeteo"].rate_limit, 30);
        assert_eq!(
            config.weather_apis["openweathermap"].api_key.as_deref(),
            Some("abc123")
        );
        assert!(config.weather_apis["openmeteo"].api_key.is_none());
    }
}
