//! Aggregator
//!
//! Owns every task's lifecycle: deterministic operator selection, source
//! sharding, response collection with quorum, and the aggregation trigger.
//! State transitions are monotonic and happen only under the write lock;
//! critical sections never touch the network.

pub mod coalesce;

pub use coalesce::RequestCoalescer;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::consensus::{signing, ConsensusEngine};
use crate::error::OracleError;
use crate::metrics;
use crate::types::{
    ConsensusResult, Observation, OperatorResponse, Task, TaskDistribution, TaskState, TaskStatus,
};

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_GRACE_DELAY: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct Aggregator {
    inner: Arc<AggregatorInner>,
}

struct AggregatorInner {
    min_operators: usize,
    response_timeout: Duration,
    /// Reserved for stake-weighted quorum variants.
    #[allow(dead_code)]
    consensus_threshold: f64,
    grace_delay: Duration,
    engine: ConsensusEngine,
    tasks: RwLock<HashMap<String, TaskState>>,
    coalescer: RequestCoalescer,
}

impl Aggregator {
    pub fn new(
        min_operators: usize,
        response_timeout: Duration,
        consensus_threshold: f64,
        engine: ConsensusEngine,
    ) -> Self {
        Self {
            inner: Arc::new(AggregatorInner {
                min_operators,
                response_timeout,
                consensus_threshold,
                grace_delay: DEFAULT_GRACE_DELAY,
                engine,
                tasks: RwLock::new(HashMap::new()),
                coalescer: RequestCoalescer::new(),
            }),
        }
    }

    /// Shorten the straggler grace window; used by tests.
    pub fn with_grace_delay(self, grace_delay: Duration) -> Self {
        let inner = Arc::try_unwrap(self.inner)
            .unwrap_or_else(|_| panic!("with_grace_delay requires exclusive ownership"));
        Self {
            inner: Arc::new(AggregatorInner {
                grace_delay,
                ..inner
            }),
        }
    }

    pub fn coalescer(&self) -> &RequestCoalescer {
        &self.inner.coalescer
    }

    pub fn min_operators(&self) -> usize {
        self.inner.min_operators
    }

    /// Register a new task in `Pending`.
    pub async fn create_task(&self, task: Task) -> Result<(), OracleError> {
        let mut tasks = self.inner.tasks.write().await;
        if tasks.contains_key(&task.task_id) {
            return Err(OracleError::DuplicateTaskId(task.task_id));
        }

        info!(
            task_id = %task.task_id,
            city = %task.point.label(),
            threshold = task.threshold,
            "created task"
        );
        tasks.insert(task.task_id.clone(), TaskState::new(task));
        metrics::record_task_created();
        Ok(())
    }

    /// Select operators deterministically, shard the sources and move the
    /// task to `Distributed`. Returns one distribution per selected operator.
    pub async fn distribute_task(
        &self,
        task_id: &str,
        available_operators: &[String],
        available_sources: &[String],
    ) -> Result<Vec<TaskDistribution>, OracleError> {
        if available_sources.is_empty() {
            return Err(OracleError::BadRequest(
                "no weather sources available".to_string(),
            ));
        }

        let mut tasks = self.inner.tasks.write().await;
        let state = tasks
            .get_mut(task_id)
            .ok_or_else(|| OracleError::TaskNotFound(task_id.to_string()))?;

        if state.status != TaskStatus::Pending {
            return Err(OracleError::InvalidState {
                task_id: task_id.to_string(),
                state: state.status,
                expected: "pending",
            });
        }

        let selected = select_operators(available_operators, task_id, self.inner.min_operators);
        if selected.len() < self.inner.min_operators {
            return Err(OracleError::InsufficientOperators {
                got: selected.len(),
                need: self.inner.min_operators,
            });
        }

        let shards = shard_sources(available_sources, selected.len());
        let deadline = Utc::now() + chrono::Duration::from_std(self.inner.response_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));

        let distributions: Vec<TaskDistribution> = selected
            .iter()
            .zip(shards)
            .map(|(operator_id, assigned_sources)| TaskDistribution {
                operator_id: operator_id.clone(),
                task: state.task.clone(),
                assigned_sources,
                deadline,
            })
            .collect();

        state.operators = selected;
        state.status = TaskStatus::Distributed;
        state.updated_at = Utc::now();

        info!(
            task_id = %task_id,
            operators = state.operators.len(),
            "distributed task"
        );
        Ok(distributions)
    }

    /// Accept one operator response. The first accepted response moves the
    /// task to `Executing`; reaching quorum schedules aggregation after a
    /// short grace delay for stragglers.
    pub async fn collect_response(&self, response: OperatorResponse) -> Result<(), OracleError> {
        let task_id = response.task_id.clone();
        let accepted = {
            let mut tasks = self.inner.tasks.write().await;
            let state = tasks
                .get_mut(&task_id)
                .ok_or_else(|| OracleError::TaskNotFound(task_id.clone()))?;

            if state.status != TaskStatus::Distributed && state.status != TaskStatus::Executing {
                return Err(OracleError::InvalidState {
                    task_id: task_id.clone(),
                    state: state.status,
                    expected: "distributed or executing",
                });
            }
            if state.status == TaskStatus::Distributed {
                state.status = TaskStatus::Executing;
            }

            if !state.operators.contains(&response.operator_id) {
                return Err(OracleError::UnassignedOperator {
                    operator: response.operator_id,
                    task_id,
                });
            }
            if state
                .responses
                .iter()
                .any(|r| r.operator_id == response.operator_id)
            {
                return Err(OracleError::DuplicateResponse {
                    operator: response.operator_id,
                    task_id,
                });
            }

            info!(
                task_id = %task_id,
                operator_id = %response.operator_id,
                accepted = state.responses.len() + 1,
                assigned = state.operators.len(),
                "collected operator response"
            );
            state.responses.push(response);
            state.updated_at = Utc::now();
            state.responses.len()
        };

        if accepted >= self.inner.min_operators {
            let aggregator = self.clone();
            let grace = self.inner.grace_delay;
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                aggregator.try_aggregate(&task_id).await;
            });
        }
        Ok(())
    }

    /// Idempotent aggregation trigger. The `Executing -> Aggregating`
    /// transition is a compare-and-swap under the write lock, so concurrent
    /// invocations collapse to one aggregation run.
    pub async fn try_aggregate(&self, task_id: &str) {
        let (task, responses) = {
            let mut tasks = self.inner.tasks.write().await;
            let Some(state) = tasks.get_mut(task_id) else {
                return;
            };
            if state.status != TaskStatus::Executing
                || state.responses.len() < self.inner.min_operators
            {
                return;
            }
            state.status = TaskStatus::Aggregating;
            state.updated_at = Utc::now();
            (state.task.clone(), state.responses.clone())
        };

        let observations = verified_observations(task_id, &responses);
        let outcome =
            self.inner
                .engine
                .reach_consensus(task_id, task.threshold, &observations, Utc::now());

        let mut tasks = self.inner.tasks.write().await;
        let Some(state) = tasks.get_mut(task_id) else {
            return;
        };
        match outcome {
            Ok(mut result) => {
                // The task-level signature binds every operator response,
                // replacing the engine's observation-level digest.
                result.aggregated_sig = aggregate_response_signatures(&responses);
                info!(
                    task_id = %task_id,
                    value = result.value,
                    meets_threshold = result.meets_threshold,
                    confidence = result.confidence,
                    "task completed"
                );
                metrics::set_consensus_value(&task.point.label(), result.value);
                metrics::record_task_completed();
                state.consensus = Some(result);
                state.status = TaskStatus::Completed;
            }
            Err(e) => {
                error!(task_id = %task_id, error = %e, "aggregation failed");
                metrics::record_task_failed();
                state.failure = Some(e.kind().to_string());
                state.status = TaskStatus::Failed;
            }
        }
        state.updated_at = Utc::now();
    }

    /// Poll until the task terminates or the response timeout elapses. A
    /// timeout marks a still-running task `Failed(insufficient_responses)`.
    pub async fn wait_for_completion(&self, task_id: &str) -> Result<ConsensusResult, OracleError> {
        let deadline = Instant::now() + self.inner.response_timeout;
        let mut ticker = tokio::time::interval(POLL_INTERVAL);

        loop {
            ticker.tick().await;
            {
                let tasks = self.inner.tasks.read().await;
                let state = tasks
                    .get(task_id)
                    .ok_or_else(|| OracleError::TaskNotFound(task_id.to_string()))?;
                match state.status {
                    TaskStatus::Completed => {
                        return state.consensus.clone().ok_or_else(|| {
                            OracleError::TaskFailed {
                                task_id: task_id.to_string(),
                                reason: "completed without result".to_string(),
                            }
                        });
                    }
                    TaskStatus::Failed => {
                        return Err(OracleError::TaskFailed {
                            task_id: task_id.to_string(),
                            reason: state
                                .failure
                                .clone()
                                .unwrap_or_else(|| "unknown".to_string()),
                        });
                    }
                    _ => {}
                }
            }

            if Instant::now() >= deadline {
                let mut tasks = self.inner.tasks.write().await;
                if let Some(state) = tasks.get_mut(task_id) {
                    if !state.status.is_terminal() {
                        let got = state.responses.len();
                        warn!(
                            task_id = %task_id,
                            responses = got,
                            need = self.inner.min_operators,
                            "task timed out before quorum"
                        );
                        state.status = TaskStatus::Failed;
                        state.failure = Some("insufficient_responses".to_string());
                        state.updated_at = Utc::now();
                        metrics::record_task_failed();
                        return Err(OracleError::InsufficientResponses {
                            got,
                            need: self.inner.min_operators,
                        });
                    }
                }
                return Err(OracleError::Timeout(task_id.to_string()));
            }
        }
    }

    /// Record a terminal failure unless the task already terminated. Used
    /// when the caller knows no further responses can arrive.
    pub async fn mark_failed(&self, task_id: &str, reason: &str) {
        let mut tasks = self.inner.tasks.write().await;
        if let Some(state) = tasks.get_mut(task_id) {
            if !state.status.is_terminal() {
                state.status = TaskStatus::Failed;
                state.failure = Some(reason.to_string());
                state.updated_at = Utc::now();
                metrics::record_task_failed();
            }
        }
    }

    pub async fn get_task(&self, task_id: &str) -> Option<TaskState> {
        self.inner.tasks.read().await.get(task_id).cloned()
    }
}

/// First 8 bytes of SHA-256(task_id), big-endian. Truncating the 32-byte
/// hash is a deliberate entropy choice: 64 bits are plenty for an unbiased
/// shuffle seed.
fn selection_seed(task_id: &str) -> u64 {
    let digest = Sha256::digest(task_id.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Fisher–Yates over the available operators, seeded from the task id, then
/// keep the first `count`. Identical inputs select identical subsets.
fn select_operators(available: &[String], task_id: &str, count: usize) -> Vec<String> {
    let mut rng = StdRng::seed_from_u64(selection_seed(task_id));
    let mut shuffled = available.to_vec();
    shuffled.shuffle(&mut rng);
    shuffled.truncate(count.min(shuffled.len()));
    shuffled
}

/// Contiguous shards of size `ceil(len / operators)`, wrapping back to the
/// first source when the list is exhausted.
fn shard_sources(sources: &[String], operators: usize) -> Vec<Vec<String>> {
    let chunk = sources.len().div_ceil(operators).max(1);
    let mut idx = 0;
    (0..operators)
        .map(|_| {
            (0..chunk)
                .map(|_| {
                    if idx >= sources.len() {
                        idx = 0;
                    }
                    let source = sources[idx].clone();
                    idx += 1;
                    source
                })
                .collect()
        })
        .collect()
}

/// Flatten responses into observations, dropping any sample whose signature
/// fails verification against its operator and task.
fn verified_observations(task_id: &str, responses: &[OperatorResponse]) -> Vec<Observation> {
    let mut observations = Vec::new();
    for response in responses {
        for obs in &response.observations {
            if signing::verify(
                &obs.signature,
                &response.operator_id,
                task_id,
                obs.temperature_c,
            ) {
                observations.push(obs.clone());
            } else {
                warn!(
                    task_id = %task_id,
                    operator_id = %response.operator_id,
                    source = %obs.source,
                    "dropping observation with invalid signature"
                );
            }
        }
    }
    observations
}

/// SHA-256 over `operator_id || operator_sig || timestamp` per response.
fn aggregate_response_signatures(responses: &[OperatorResponse]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    for response in responses {
        hasher.update(response.operator_id.as_bytes());
        hasher.update(&response.signature);
        hasher.update(response.timestamp.to_rfc3339().as_bytes());
    }
    hasher.finalize().to_vec()
}
