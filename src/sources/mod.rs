//! Source Registry
//!
//! Abstracts the upstream weather providers behind a uniform fetch call.
//! Providers are interchangeable as long as they satisfy the trait contract;
//! the registry wires them up from configuration.

pub mod cache;
pub mod providers;
pub mod rate_limit;

pub use cache::{cache_key, WeatherCache};
pub use rate_limit::RateLimiter;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::info;

use crate::config::Config;
use crate::error::OracleError;
use crate::metrics;
use crate::types::{GeoPoint, ProviderReading};

/// A weather provider capability: a stable name plus a deadline-aware fetch.
#[async_trait]
pub trait WeatherSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, point: &GeoPoint, deadline: Instant) -> Result<ProviderReading, OracleError>;
}

pub struct SourceRegistry {
    sources: RwLock<HashMap<String, Arc<dyn WeatherSource>>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            sources: RwLock::new(HashMap::new()),
        }
    }

    /// Build the registry from configuration. Keyed providers are only
    /// registered when an API key is present; Open-Meteo is keyless.
    pub fn from_config(config: &Config, cache: WeatherCache) -> Self {
        let mut sources: Vec<Arc<dyn WeatherSource>> = Vec::new();

        for (name, api) in &config.weather_apis {
            let base_url = api.base_url.as_deref();
            match name.as_str() {
                "openmeteo" => {
                    sources.push(Arc::new(providers::OpenMeteoSource::new(
                        base_url,
                        api.rate_limit,
                        cache.clone(),
                    )));
                }
                "openweathermap" => {
                    if let Some(key) = api.api_key.as_deref() {
                        sources.push(Arc::new(providers::OpenWeatherMapSource::new(
                            base_url,
                            key,
                            api.rate_limit,
                            cache.clone(),
                        )));
                    }
                }
                "weatherapi" => {
                    if let Some(key) = api.api_key.as_deref() {
                        sources.push(Arc::new(providers::WeatherApiSource::new(
                            base_url,
                            key,
                            api.rate_limit,
                            cache.clone(),
                        )));
                    }
                }
                "tomorrowio" => {
                    if let Some(key) = api.api_key.as_deref() {
                        sources.push(Arc::new(providers::TomorrowIoSource::new(
                            base_url,
                            key,
                            api.rate_limit,
                            cache.clone(),
                        )));
                    }
                }
                "visualcrossing" => {
                    if let Some(key) = api.api_key.as_deref() {
                        sources.push(Arc::new(providers::VisualCrossingSource::new(
                            base_url,
                            key,
                            api.rate_limit,
                            cache.clone(),
                        )));
                    }
                }
                other => {
                    info!(source = other, "ignoring unknown weather source in config");
                }
            }
        }

        let mut map = HashMap::new();
        for source in sources {
            map.insert(source.name().to_string(), source);
        }
        metrics::set_active_sources(map.len());

        Self {
            sources: RwLock::new(map),
        }
    }

    pub async fn register(&self, source: Arc<dyn WeatherSource>) {
        let mut map = self.sources.write().await;
        map.insert(source.name().to_string(), source);
        metrics::set_active_sources(map.len());
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn WeatherSource>> {
        self.sources.read().await.get(name).cloned()
    }

    pub async fn all(&self) -> Vec<Arc<dyn WeatherSource>> {
        let map = self.sources.read().await;
        let mut sources: Vec<_> = map.values().cloned().collect();
        sources.sort_by(|a, b| a.name().cmp(b.name()));
        sources
    }

    /// Names sorted for deterministic sharding.
    pub async fn names(&self) -> Vec<String> {
        let map = self.sources.read().await;
        let mut names: Vec<String> = map.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.sources.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sources.read().await.is_empty()
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiSettings;
    use std::time::Duration;

    #[tokio::test]
    async fn test_from_config_skips_keyless_providers() {
        let mut config = Config::default();
        config.weather_apis.insert(
            "openmeteo".into(),
            ApiSettings {
                base_url: None,
                rate_limit: 60,
                api_key: None,
            },
        );
        config.weather_apis.insert(
            "openweathermap".into(),
            ApiSettings {
                base_url: None,
                rate_limit: 60,
                api_key: None,
            },
        );
        config.weather_apis.insert(
            "weatherapi".into(),
            ApiSettings {
                base_url: None,
                rate_limit: 60,
                api_key: Some("key".into()),
            },
        );

        let cache = WeatherCache::new(Duration::from_secs(300), 100);
        let registry = SourceRegistry::from_config(&config, cache);
        assert_eq!(registry.names().await, vec!["OpenMeteo", "WeatherAPI"]);
    }
}
