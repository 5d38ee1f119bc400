//! Core data model
//!
//! Shared types for tasks, observations, operator responses and consensus
//! results. All timestamps are UTC; numeric fields are validated on ingress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::OracleError;

/// A geographic point with optional labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            city: None,
            country: None,
        }
    }

    pub fn validate(&self) -> Result<(), OracleError> {
        if !self.latitude.is_finite() || self.latitude < -90.0 || self.latitude > 90.0 {
            return Err(OracleError::BadRequest(format!(
                "invalid latitude: {}",
                self.latitude
            )));
        }
        if !self.longitude.is_finite() || self.longitude < -180.0 || self.longitude > 180.0 {
            return Err(OracleError::BadRequest(format!(
                "invalid longitude: {}",
                self.longitude
            )));
        }
        Ok(())
    }

    /// Display label, falling back to rounded coordinates.
    pub fn label(&self) -> String {
        self.city
            .clone()
            .unwrap_or_else(|| format!("({:.2}, {:.2})", self.latitude, self.longitude))
    }
}

/// Uniform decoded upstream response, before it is scored and signed into an
/// [`Observation`]. This is what the fetch cache stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderReading {
    pub source: String,
    pub temperature_c: f64,
    pub humidity_pct: Option<f64>,
    pub wind_mps: Option<f64>,
    pub precip_mm: Option<f64>,
    pub pressure_hpa: Option<f64>,
    pub measured_at: DateTime<Utc>,
    /// Producer-supplied confidence; defaulted to 1.0 downstream when absent.
    pub confidence: Option<f64>,
}

/// One reading from one source, scored and signed by the operator that
/// fetched it. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub source: String,
    pub measured_at: DateTime<Utc>,
    pub temperature_c: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wind_mps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precip_mm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pressure_hpa: Option<f64>,
    pub confidence: f64,
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
}

/// A weather verification task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub point: GeoPoint,
    pub threshold: f64,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
}

/// Lifecycle states of a task. Transitions are monotonic:
/// `Pending -> Distributed -> Executing -> Aggregating -> Completed | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Distributed,
    Executing,
    Aggregating,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Mutable state of a task, owned by the aggregator and mutated only under
/// its lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskState {
    pub task: Task,
    pub status: TaskStatus,
    pub operators: Vec<String>,
    pub responses: Vec<OperatorResponse>,
    pub consensus: Option<ConsensusResult>,
    /// Diagnostic reason recorded when the task enters `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskState {
    pub fn new(task: Task) -> Self {
        let now = Utc::now();
        Self {
            task,
            status: TaskStatus::Pending,
            operators: Vec::new(),
            responses: Vec::new(),
            consensus: None,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One operator's signed bundle of observations for a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorResponse {
    pub operator_id: String,
    pub task_id: String,
    pub observations: Vec<Observation>,
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

/// Output of the consensus engine for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub task_id: String,
    pub value: f64,
    pub meets_threshold: bool,
    pub confidence: f64,
    pub kept_observations: Vec<Observation>,
    #[serde(with = "hex_bytes")]
    pub aggregated_sig: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

/// Work assignment for one operator: the task plus its shard of sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDistribution {
    pub operator_id: String,
    pub task: Task,
    pub assigned_sources: Vec<String>,
    pub deadline: DateTime<Utc>,
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}
