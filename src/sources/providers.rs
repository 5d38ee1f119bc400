//! Weather providers
//!
//! Concrete upstream integrations sharing a base client: token-bucket
//! pacing, a 30-second per-request timeout, uniform decoding into
//! [`ProviderReading`] and cache insertion on success. Unit conversions
//! happen here: km/h -> m/s by /3.6, mph -> m/s by *0.277778.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::debug;

use crate::error::OracleError;
use crate::sources::cache::{cache_key, WeatherCache};
use crate::sources::rate_limit::RateLimiter;
use crate::sources::WeatherSource;
use crate::types::{GeoPoint, ProviderReading};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const KMH_TO_MPS: f64 = 1.0 / 3.6;
pub const MPH_TO_MPS: f64 = 0.277778;

/// Shared plumbing for every provider: URL base, key, limiter, HTTP client
/// and the cross-provider cache handle.
pub struct SourceClient {
    name: &'static str,
    base_url: String,
    api_key: String,
    limiter: RateLimiter,
    client: reqwest::Client,
    cache: WeatherCache,
}

impl SourceClient {
    pub fn new(
        name: &'static str,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        rate_per_minute: u32,
        cache: WeatherCache,
    ) -> Self {
        Self {
            name,
            base_url: base_url.into(),
            api_key: api_key.into(),
            limiter: RateLimiter::per_minute(rate_per_minute),
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            cache,
        }
    }

    async fn cached(&self, point: &GeoPoint) -> Option<ProviderReading> {
        let hit = self.cache.get(&cache_key(self.name, point)).await;
        if hit.is_some() {
            debug!(source = self.name, "cache hit");
        }
        hit
    }

    async fn store(&self, point: &GeoPoint, reading: &ProviderReading) {
        self.cache
            .insert(cache_key(self.name, point), reading.clone())
            .await;
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        deadline: Instant,
    ) -> Result<T, OracleError> {
        if !self.limiter.acquire_until(deadline).await {
            return Err(OracleError::RateLimitCancelled {
                provider: self.name.to_string(),
            });
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| OracleError::Upstream {
                provider: self.name.to_string(),
                message: e.to_string(),
            })?;

        response.json::<T>().await.map_err(|e| OracleError::Upstream {
            provider: self.name.to_string(),
            message: format!("decode failed: {}", e),
        })
    }

    fn reading(&self, temperature_c: f64) -> ProviderReading {
        ProviderReading {
            source: self.name.to_string(),
            temperature_c,
            humidity_pct: None,
            wind_mps: None,
            precip_mm: None,
            pressure_hpa: None,
            measured_at: Utc::now(),
            confidence: None,
        }
    }
}

// ── Open-Meteo (keyless) ─────────────────────────────────────────────────────

pub struct OpenMeteoSource {
    base: SourceClient,
}

#[derive(Deserialize)]
struct OpenMeteoResponse {
    current: OpenMeteoCurrent,
}

#[derive(Deserialize)]
struct OpenMeteoCurrent {
    temperature_2m: f64,
    relative_humidity_2m: Option<f64>,
    surface_pressure: Option<f64>,
    wind_speed_10m: Option<f64>,
    precipitation: Option<f64>,
}

impl OpenMeteoSource {
    pub fn new(base_url: Option<&str>, rate_per_minute: u32, cache: WeatherCache) -> Self {
        Self {
            base: SourceClient::new(
                "OpenMeteo",
                base_url.unwrap_or("https://api.open-meteo.com/v1"),
                "",
                rate_per_minute,
                cache,
            ),
        }
    }
}

#[async_trait]
impl WeatherSource for OpenMeteoSource {
    fn name(&self) -> &str {
        self.base.name
    }

    async fn fetch(&self, point: &GeoPoint, deadline: Instant) -> Result<ProviderReading, OracleError> {
        if let Some(hit) = self.base.cached(point).await {
            return Ok(hit);
        }

        let url = format!(
            "{}/forecast?latitude={:.6}&longitude={:.6}&current=temperature_2m,relative_humidity_2m,surface_pressure,wind_speed_10m,precipitation",
            self.base.base_url, point.latitude, point.longitude
        );
        let data: OpenMeteoResponse = self.base.get_json(&url, deadline).await?;

        let mut reading = self.base.reading(data.current.temperature_2m);
        reading.humidity_pct = data.current.relative_humidity_2m;
        reading.pressure_hpa = data.current.surface_pressure;
        // Open-Meteo reports wind in km/h.
        reading.wind_mps = data.current.wind_speed_10m.map(|w| w * KMH_TO_MPS);
        reading.precip_mm = data.current.precipitation;

        self.base.store(point, &reading).await;
        Ok(reading)
    }
}

// ── OpenWeatherMap ───────────────────────────────────────────────────────────

pub struct OpenWeatherMapSource {
    base: SourceClient,
}

#[derive(Deserialize)]
struct OwmResponse {
    main: OwmMain,
    wind: Option<OwmWind>,
    rain: Option<OwmRain>,
}

#[derive(Deserialize)]
struct OwmMain {
    temp: f64,
    humidity: Option<f64>,
    pressure: Option<f64>,
}

#[derive(Deserialize)]
struct OwmWind {
    speed: Option<f64>,
}

#[derive(Deserialize)]
struct OwmRain {
    #[serde(rename = "1h")]
    one_hour: Option<f64>,
}

impl OpenWeatherMapSource {
    pub fn new(
        base_url: Option<&str>,
        api_key: &str,
        rate_per_minute: u32,
        cache: WeatherCache,
    ) -> Self {
        Self {
            base: SourceClient::new(
                "OpenWeatherMap",
                base_url.unwrap_or("https://api.openweathermap.org/data/2.5"),
                api_key,
                rate_per_minute,
                cache,
            ),
        }
    }
}

#[async_trait]
impl WeatherSource for OpenWeatherMapSource {
    fn name(&self) -> &str {
        self.base.name
    }

    async fn fetch(&self, point: &GeoPoint, deadline: Instant) -> Result<ProviderReading, OracleError> {
        if let Some(hit) = self.base.cached(point).await {
            return Ok(hit);
        }

        let url = format!(
            "{}/weather?lat={:.6}&lon={:.6}&appid={}&units=metric",
            self.base.base_url, point.latitude, point.longitude, self.base.api_key
        );
        let data: OwmResponse = self.base.get_json(&url, deadline).await?;

        let mut reading = self.base.reading(data.main.temp);
        reading.humidity_pct = data.main.humidity;
        reading.pressure_hpa = data.main.pressure;
        // Metric units give wind in m/s already.
        reading.wind_mps = data.wind.and_then(|w| w.speed);
        reading.precip_mm = data.rain.and_then(|r| r.one_hour);

        self.base.store(point, &reading).await;
        Ok(reading)
    }
}

// ── WeatherAPI ───────────────────────────────────────────────────────────────

pub struct WeatherApiSource {
    base: SourceClient,
}

#[derive(Deserialize)]
struct WeatherApiResponse {
    current: WeatherApiCurrent,
}

#[derive(Deserialize)]
struct WeatherApiCurrent {
    temp_c: f64,
    humidity: Option<f64>,
    pressure_mb: Option<f64>,
    wind_kph: Option<f64>,
    precip_mm: Option<f64>,
}

impl WeatherApiSource {
    pub fn new(
        base_url: Option<&str>,
        api_key: &str,
        rate_per_minute: u32,
        cache: WeatherCache,
    ) -> Self {
        Self {
            base: SourceClient::new(
                "WeatherAPI",
                base_url.unwrap_or("https://api.weatherapi.com/v1"),
                api_key,
                rate_per_minute,
                cache,
            ),
        }
    }
}

#[async_trait]
impl WeatherSource for WeatherApiSource {
    fn name(&self) -> &str {
        self.base.name
    }

    async fn fetch(&self, point: &GeoPoint, deadline: Instant) -> Result<ProviderReading, OracleError> {
        if let Some(hit) = self.base.cached(point).await {
            return Ok(hit);
        }

        let url = format!(
            "{}/current.json?key={}&q={:.6},{:.6}",
            self.base.base_url, self.base.api_key, point.latitude, point.longitude
        );
        let data: WeatherApiResponse = self.base.get_json(&url, deadline).await?;

        let mut reading = self.base.reading(data.current.temp_c);
        reading.humidity_pct = data.current.humidity;
        reading.pressure_hpa = data.current.pressure_mb;
        reading.wind_mps = data.current.wind_kph.map(|w| w * KMH_TO_MPS);
        reading.precip_mm = data.current.precip_mm;

        self.base.store(point, &reading).await;
        Ok(reading)
    }
}

// ── Tomorrow.io ──────────────────────────────────────────────────────────────

pub struct TomorrowIoSource {
    base: SourceClient,
}

#[derive(Deserialize)]
struct TomorrowResponse {
    data: TomorrowData,
}

#[derive(Deserialize)]
struct TomorrowData {
    values: TomorrowValues,
}

#[derive(Deserialize)]
struct TomorrowValues {
    temperature: f64,
    humidity: Option<f64>,
    #[serde(rename = "pressureSurfaceLevel")]
    pressure_surface_level: Option<f64>,
    #[serde(rename = "windSpeed")]
    wind_speed: Option<f64>,
    #[serde(rename = "rainIntensity")]
    rain_intensity: Option<f64>,
}

impl TomorrowIoSource {
    pub fn new(
        base_url: Option<&str>,
        api_key: &str,
        rate_per_minute: u32,
        cache: WeatherCache,
    ) -> Self {
        Self {
            base: SourceClient::new(
                "TomorrowIO",
                base_url.unwrap_or("https://api.tomorrow.io/v4"),
                api_key,
                rate_per_minute,
                cache,
            ),
        }
    }
}

#[async_trait]
impl WeatherSource for TomorrowIoSource {
    fn name(&self) -> &str {
        self.base.name
    }

    async fn fetch(&self, point: &GeoPoint, deadline: Instant) -> Result<ProviderReading, OracleError> {
        if let Some(hit) = self.base.cached(point).await {
            return Ok(hit);
        }

        let url = format!(
            "{}/weather/realtime?location={:.6},{:.6}&apikey={}&units=metric",
            self.base.base_url, point.latitude, point.longitude, self.base.api_key
        );
        let data: TomorrowResponse = self.base.get_json(&url, deadline).await?;

        let mut reading = self.base.reading(data.data.values.temperature);
        reading.humidity_pct = data.data.values.humidity;
        reading.pressure_hpa = data.data.values.pressure_surface_level;
        // Metric realtime endpoint reports wind in m/s.
        reading.wind_mps = data.data.values.wind_speed;
        reading.precip_mm = data.data.values.rain_intensity;

        self.base.store(point, &reading).await;
        Ok(reading)
    }
}

// ── Visual Crossing ──────────────────────────────────────────────────────────

pub struct VisualCrossingSource {
    base: SourceClient,
}

#[derive(Deserialize)]
struct VisualCrossingResponse {
    #[serde(rename = "currentConditions")]
    current_conditions: VisualCrossingCurrent,
}

#[derive(Deserialize)]
struct VisualCrossingCurrent {
    temp: f64,
    humidity: Option<f64>,
    pressure: Option<f64>,
    windspeed: Option<f64>,
    precip: Option<f64>,
}

impl VisualCrossingSource {
    pub fn new(
        base_url: Option<&str>,
        api_key: &str,
        rate_per_minute: u32,
        cache: WeatherCache,
    ) -> Self {
        Self {
            base: SourceClient::new(
                "VisualCrossing",
                base_url.unwrap_or(
                    "https://weather.visualcrossing.com/VisualCrossingWebServices/rest/services/timeline",
                ),
                api_key,
                rate_per_minute,
                cache,
            ),
        }
    }
}

#[async_trait]
impl WeatherSource for VisualCrossingSource {
    fn name(&self) -> &str {
        self.base.name
    }

    async fn fetch(&self, point: &GeoPoint, deadline: Instant) -> Result<ProviderReading, OracleError> {
        if let Some(hit) = self.base.cached(point).await {
            return Ok(hit);
        }

        let url = format!(
            "{}/{:.6},{:.6}/today?key={}&unitGroup=metric&include=current",
            self.base.base_url, point.latitude, point.longitude, self.base.api_key
        );
        let data: VisualCrossingResponse = self.base.get_json(&url, deadline).await?;

        let mut reading = self.base.reading(data.current_conditions.temp);
        reading.humidity_pct = data.current_conditions.humidity;
        reading.pressure_hpa = data.current_conditions.pressure;
        reading.wind_mps = data.current_conditions.windspeed.map(|w| w * MPH_TO_MPS);
        reading.precip_mm = data.current_conditions.precip;

        self.base.store(point, &reading).await;
        Ok(reading)
    }
}
