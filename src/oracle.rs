//! Oracle service
//!
//! Wires the source registry, executor pool and aggregator into the
//! end-to-end weather verification flow: create task, select and distribute
//! operators, fan out fetches, collect responses to quorum, await consensus.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Timelike, Utc};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::aggregator::Aggregator;
use crate::config::Config;
use crate::consensus::ConsensusEngine;
use crate::error::OracleError;
use crate::executor::{Executor, ExecutorPool};
use crate::metrics;
use crate::sources::{SourceRegistry, WeatherCache};
use crate::types::{ConsensusResult, GeoPoint, ProviderReading, Task};

const LIVE_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Oracle {
    registry: Arc<SourceRegistry>,
    aggregator: Aggregator,
    pool: ExecutorPool,
    operators: Vec<String>,
}

impl Oracle {
    /// Build the oracle from configuration. Fails when no weather source is
    /// configured.
    pub async fn new(config: &Config) -> Result<Self, OracleError> {
        let cache = WeatherCache::new(config.cache_ttl(), config.consensus.max_cache_entries);
        let _ = cache.spawn_sweeper();
        let registry = Arc::new(SourceRegistry::from_config(config, cache));
        if registry.is_empty().await {
            return Err(OracleError::Config(
                "no weather data sources configured".to_string(),
            ));
        }
        Ok(Self::with_registry(config, registry).await)
    }

    /// Build against an externally-assembled registry; the seam tests use
    /// to inject mock sources.
    pub async fn with_registry(config: &Config, registry: Arc<SourceRegistry>) -> Self {
        let engine = ConsensusEngine::new(
            config.consensus.min_sources,
            config.consensus.mad_threshold,
        );
        let aggregator = Aggregator::new(
            config.aggregator.min_operators,
            config.response_timeout(),
            config.aggregator.consensus_threshold,
            engine,
        );
        let _ = aggregator.coalescer().spawn_sweeper();

        let pool = ExecutorPool::new();
        for operator_id in &config.operators {
            pool.add(Executor::new(
                operator_id.clone(),
                registry.clone(),
                config.response_timeout(),
                3,
            ))
            .await;
        }

        Self {
            registry,
            aggregator,
            pool,
            operators: config.operators.clone(),
        }
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    /// Run one weather verification end to end and return the consensus
    /// result.
    pub async fn verify(&self, point: GeoPoint, threshold: f64) -> Result<ConsensusResult, OracleError> {
        point.validate()?;

        let task_id = format!("task-{}", Uuid::new_v4());

        // Piggyback on an in-flight task for the same rounded coordinate
        // when one exists. Advisory: on any failure we run our own task.
        if let Some(primary) = self.aggregator.coalescer().attach(&point, &task_id).await {
            if let Ok(result) = self.aggregator.wait_for_completion(&primary).await {
                info!(task_id = %task_id, primary = %primary, "shared coalesced result");
                return Ok(result);
            }
        }

        info!(
            task_id = %task_id,
            city = %point.label(),
            threshold,
            "starting weather verification"
        );

        let started = Instant::now();
        self.aggregator
            .create_task(Task {
                task_id: task_id.clone(),
                point,
                threshold,
                created_at: Utc::now(),
                chain_id: None,
            })
            .await?;

        let sources = self.registry.names().await;
        let distributions = self
            .aggregator
            .distribute_task(&task_id, &self.operators, &sources)
            .await?;
        metrics::observe_phase("distribution", started.elapsed().as_secs_f64());

        let execution_started = Instant::now();
        let responses = self.pool.execute_all(distributions).await;
        let mut accepted = 0usize;
        for response in responses {
            match self.aggregator.collect_response(response).await {
                Ok(()) => accepted += 1,
                Err(e) => warn!(task_id = %task_id, error = %e, "response rejected"),
            }
        }
        metrics::observe_phase("execution", execution_started.elapsed().as_secs_f64());

        if accepted < self.aggregator.min_operators() {
            self.aggregator
                .mark_failed(&task_id, "insufficient_responses")
                .await;
            return Err(OracleError::InsufficientResponses {
                got: accepted,
                need: self.aggregator.min_operators(),
            });
        }

        let aggregation_started = Instant::now();
        let result = self.aggregator.wait_for_completion(&task_id).await;
        metrics::observe_phase("aggregation", aggregation_started.elapsed().as_secs_f64());
        result
    }

    /// Fetch every configured source once for a live snapshot, falling back
    /// to a synthetic reading when nothing is reachable.
    pub async fn live_snapshot(&self, point: &GeoPoint) -> Vec<ProviderReading> {
        let deadline = Instant::now() + LIVE_FETCH_TIMEOUT;
        let mut set = JoinSet::new();
        for source in self.registry.all().await {
            let point = point.clone();
            set.spawn(async move { source.fetch(&point, deadline).await });
        }

        let mut readings = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(reading)) => readings.push(reading),
                Ok(Err(e)) => warn!(error = %e, "live fetch failed"),
                Err(e) => warn!(error = %e, "live fetch panicked"),
            }
        }
        readings.sort_by(|a, b| a.source.cmp(&b.source));

        if readings.is_empty() {
            warn!("no live sources reachable, synthesizing fallback reading");
            readings.push(fallback_reading(point));
        }
        readings
    }
}

/// Synthetic reading used when no upstream is reachable: a coarse
/// latitude/season/hour model at half confidence.
fn fallback_reading(point: &GeoPoint) -> ProviderReading {
    let now = Utc::now();
    let base = 20.0 + point.latitude / 10.0;
    let diurnal = 5.0 * ((now.hour() as f64) * std::f64::consts::PI / 12.0).sin();
    let seasonal = match now.month() {
        12 | 1 | 2 => -10.0,
        6..=8 => 10.0,
        _ => 0.0,
    };

    ProviderReading {
        source: "fallback".to_string(),
        temperature_c: base + diurnal + seasonal,
        humidity_pct: Some((60.0 + point.longitude / 50.0).clamp(0.0, 100.0)),
        wind_mps: Some(3.0 + (point.latitude / 20.0).abs()),
        precip_mm: None,
        pressure_hpa: Some(1013.25 + point.latitude / 100.0),
        measured_at: now,
        confidence: Some(0.5),
    }
}
