//! Executor
//!
//! Runs one operator's share of a task: fetches the assigned sources in
//! parallel under a concurrency bound, scores per-sample confidence, signs
//! each sample and the response. Individual source failures are tolerated;
//! the executor fails only when nothing came back at all.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::consensus::signing;
use crate::error::OracleError;
use crate::sources::SourceRegistry;
use crate::types::{Observation, OperatorResponse, ProviderReading, TaskDistribution};

const DEFAULT_MAX_CONCURRENT: usize = 3;

pub struct Executor {
    pub operator_id: String,
    registry: Arc<SourceRegistry>,
    task_timeout: Duration,
    semaphore: Arc<Semaphore>,
}

impl Executor {
    pub fn new(
        operator_id: impl Into<String>,
        registry: Arc<SourceRegistry>,
        task_timeout: Duration,
        max_concurrent: usize,
    ) -> Self {
        Self {
            operator_id: operator_id.into(),
            registry,
            task_timeout,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn with_defaults(operator_id: impl Into<String>, registry: Arc<SourceRegistry>) -> Self {
        Self::new(
            operator_id,
            registry,
            Duration::from_secs(60),
            DEFAULT_MAX_CONCURRENT,
        )
    }

    /// Execute one distribution. Returns the signed response, or
    /// [`OracleError::NoObservations`] when every assigned source failed.
    pub async fn execute(&self, dist: &TaskDistribution) -> Result<OperatorResponse, OracleError> {
        let deadline = self.effective_deadline(dist);
        let task_id = dist.task.task_id.clone();

        info!(
            operator_id = %self.operator_id,
            task_id = %task_id,
            sources = dist.assigned_sources.len(),
            "executor starting task"
        );

        let mut set = JoinSet::new();
        for name in &dist.assigned_sources {
            let Some(source) = self.registry.get(name).await else {
                warn!(source = %name, "unknown data source, skipping");
                continue;
            };

            let semaphore = self.semaphore.clone();
            let operator_id = self.operator_id.clone();
            let task_id = task_id.clone();
            let point = dist.task.point.clone();
            let name = name.clone();

            set.spawn(async move {
                let permit =
                    match tokio::time::timeout_at(deadline, semaphore.acquire_owned()).await {
                        Ok(Ok(permit)) => permit,
                        _ => {
                            warn!(source = %name, task_id = %task_id, "deadline hit before slot");
                            return None;
                        }
                    };

                let started = Instant::now();
                let fetched = tokio::time::timeout_at(deadline, source.fetch(&point, deadline))
                    .await
                    .unwrap_or_else(|_| {
                        Err(OracleError::Upstream {
                            provider: name.clone(),
                            message: "deadline exceeded".to_string(),
                        })
                    });
                let wall = started.elapsed();
                drop(permit);

                match fetched {
                    Ok(reading) => {
                        let obs = score_and_sign(&operator_id, &task_id, reading, wall);
                        debug!(
                            source = %name,
                            task_id = %task_id,
                            temperature = obs.temperature_c,
                            confidence = obs.confidence,
                            "fetched observation"
                        );
                        Some(obs)
                    }
                    Err(e) => {
                        warn!(source = %name, task_id = %task_id, error = %e, "fetch failed");
                        None
                    }
                }
            });
        }

        let mut observations = Vec::new();
        while let Some(joined) = set.join_next().await {
            if let Ok(Some(obs)) = joined {
                observations.push(obs);
            }
        }

        if observations.is_empty() {
            return Err(OracleError::NoObservations(task_id));
        }

        let mean_temp =
            observations.iter().map(|o| o.temperature_c).sum::<f64>() / observations.len() as f64;
        let signature = signing::sign(&self.operator_id, &task_id, mean_temp);

        info!(
            operator_id = %self.operator_id,
            task_id = %task_id,
            observations = observations.len(),
            "executor completed task"
        );

        Ok(OperatorResponse {
            operator_id: self.operator_id.clone(),
            task_id,
            observations,
            signature,
            timestamp: Utc::now(),
        })
    }

    fn effective_deadline(&self, dist: &TaskDistribution) -> Instant {
        let remaining = (dist.deadline - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        Instant::now() + remaining.min(self.task_timeout)
    }
}

/// Wrap a decoded reading into a signed observation, attenuating the
/// producer confidence by fetch latency and sample age.
fn score_and_sign(
    operator_id: &str,
    task_id: &str,
    reading: ProviderReading,
    wall: Duration,
) -> Observation {
    let mut confidence = reading.confidence.unwrap_or(1.0);
    if wall > Duration::from_secs(5) {
        confidence *= 0.9;
    }
    if wall > Duration::from_secs(10) {
        confidence *= 0.8;
    }

    let age = Utc::now() - reading.measured_at;
    if age > chrono::Duration::minutes(5) {
        confidence *= 0.9;
    }
    if age > chrono::Duration::minutes(10) {
        confidence *= 0.7;
    }

    Observation {
        signature: signing::sign(operator_id, task_id, reading.temperature_c),
        source: reading.source,
        measured_at: reading.measured_at,
        temperature_c: reading.temperature_c,
        humidity_pct: reading.humidity_pct,
        wind_mps: reading.wind_mps,
        precip_mm: reading.precip_mm,
        pressure_hpa: reading.pressure_hpa,
        confidence,
    }
}

/// Executors keyed by operator id.
#[derive(Clone, Default)]
pub struct ExecutorPool {
    executors: Arc<RwLock<std::collections::HashMap<String, Arc<Executor>>>>,
}

impl ExecutorPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, executor: Executor) {
        self.executors
            .write()
            .await
            .insert(executor.operator_id.clone(), Arc::new(executor));
    }

    pub async fn get(&self, operator_id: &str) -> Option<Arc<Executor>> {
        self.executors.read().await.get(operator_id).cloned()
    }

    /// Run every distribution on its operator's executor concurrently,
    /// returning whatever responses came back. Failures are logged and
    /// count as non-responses.
    pub async fn execute_all(&self, distributions: Vec<TaskDistribution>) -> Vec<OperatorResponse> {
        let mut set = JoinSet::new();
        for dist in distributions {
            let Some(executor) = self.get(&dist.operator_id).await else {
                warn!(operator_id = %dist.operator_id, "no executor for operator");
                continue;
            };
            set.spawn(async move { executor.execute(&dist).await });
        }

        let mut responses = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(response)) => responses.push(response),
                Ok(Err(e)) => warn!(error = %e, "executor failed"),
                Err(e) => warn!(error = %e, "executor task panicked"),
            }
        }
        responses
    }
}
