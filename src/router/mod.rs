//! Task Router
//!
//! Decodes inbound task envelopes, validates ranges, dispatches to the
//! aggregation or claims path and shapes the JSON response. Malformed
//! envelopes and out-of-range fields are the only way a request fails the
//! RPC; claim evaluation outcomes are statuses, not errors.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::claims::{demo, ClaimRequest, ClaimsProcessor};
use crate::consensus::ConsensusEngine;
use crate::error::OracleError;
use crate::oracle::Oracle;
use crate::types::{GeoPoint, Observation, ProviderReading};

/// Thresholds are Celsius headline values; anything outside this band is a
/// caller mistake.
const THRESHOLD_MIN: f64 = -100.0;
const THRESHOLD_MAX: f64 = 100.0;

const DEMO_SERIES_DAYS: u32 = 10;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TaskEnvelope {
    WeatherCheck {
        location: GeoPoint,
        threshold: f64,
        #[serde(default)]
        policy_id: Option<String>,
    },
    InsuranceClaim {
        claim_request: ClaimRequest,
        #[serde(default)]
        demo_mode: bool,
        #[serde(default)]
        demo_scenario: Option<String>,
    },
    LiveWeatherDemo { location: GeoPoint },
}

pub struct TaskRouter {
    oracle: Arc<Oracle>,
    claims: ClaimsProcessor,
    /// Permissive engine for snapshot diagnostics; quorum does not apply to
    /// the demo path.
    demo_engine: ConsensusEngine,
}

impl TaskRouter {
    pub fn new(oracle: Arc<Oracle>) -> Self {
        Self {
            oracle,
            claims: ClaimsProcessor::new(),
            demo_engine: ConsensusEngine::new(1, 2.5),
        }
    }

    /// The synchronous RPC surface: `(task_id, payload) -> result`. Payload
    /// and result are UTF-8 JSON.
    pub async fn execute_task(&self, task_id: &str, payload: &[u8]) -> Result<Value, OracleError> {
        let envelope: TaskEnvelope = serde_json::from_slice(payload)
            .map_err(|e| OracleError::BadRequest(format!("invalid task payload: {}", e)))?;

        match envelope {
            TaskEnvelope::WeatherCheck {
                location,
                threshold,
                policy_id,
            } => {
                self.weather_check(task_id, location, threshold, policy_id)
                    .await
            }
            TaskEnvelope::InsuranceClaim {
                claim_request,
                demo_mode,
                demo_scenario,
            } => {
                self.insurance_claim(task_id, claim_request, demo_mode, demo_scenario)
                    .await
            }
            TaskEnvelope::LiveWeatherDemo { location } => {
                self.live_weather_demo(task_id, location).await
            }
        }
    }

    async fn weather_check(
        &self,
        task_id: &str,
        location: GeoPoint,
        threshold: f64,
        policy_id: Option<String>,
    ) -> Result<Value, OracleError> {
        location.validate()?;
        if !threshold.is_finite() || !(THRESHOLD_MIN..=THRESHOLD_MAX).contains(&threshold) {
            return Err(OracleError::BadRequest(format!(
                "threshold {} outside [{}, {}]",
                threshold, THRESHOLD_MIN, THRESHOLD_MAX
            )));
        }

        info!(
            task_id = %task_id,
            policy_id = %policy_id.as_deref().unwrap_or("-"),
            city = %location.label(),
            "routing weather check"
        );
        let result = self.oracle.verify(location, threshold).await?;
        ensure_finite(result.value)?;
        ensure_finite(result.confidence)?;

        let mut response = json!({
            "type": "weather_check_response",
            "task_id": task_id,
            "temperature": result.value,
            "meets_threshold": result.meets_threshold,
            "confidence": result.confidence,
            "consensus_sources": result.kept_observations.len(),
            "sources": result
                .kept_observations
                .iter()
                .map(|o| json!({
                    "name": o.source,
                    "temperature": o.temperature_c,
                    "confidence": o.confidence,
                }))
                .collect::<Vec<_>>(),
            "aggregated_signature": hex::encode(&result.aggregated_sig),
            "timestamp": result.timestamp.to_rfc3339(),
            "status": "completed",
        });
        if let Some(policy_id) = policy_id {
            response["policy_id"] = Value::String(policy_id);
        }
        Ok(response)
    }

    async fn insurance_claim(
        &self,
        task_id: &str,
        request: ClaimRequest,
        demo_mode: bool,
        demo_scenario: Option<String>,
    ) -> Result<Value, OracleError> {
        request.policy.validate()?;
        if request.policy_id.is_empty() {
            return Err(OracleError::BadRequest("missing policy id".to_string()));
        }

        info!(
            task_id = %task_id,
            policy_id = %request.policy_id,
            demo_mode,
            automated_check = request.automated_check,
            "routing insurance claim"
        );

        let series: Vec<Observation> = if demo_mode {
            let scenario = demo_scenario.as_deref().unwrap_or("normal");
            demo::generate_scenario(
                scenario,
                DEMO_SERIES_DAYS,
                request.claim_date - chrono::Duration::days(7),
            )
        } else {
            // Live path: run a verification at the policy location and use
            // the kept observations as the evidence series.
            self.oracle
                .verify(request.policy.location.clone(), 0.0)
                .await?
                .kept_observations
        };

        let decision = self
            .claims
            .process_claim(&request.policy, &series, request.claim_date);

        let mut response = serde_json::to_value(&decision)
            .map_err(|e| OracleError::BadRequest(format!("encode response: {}", e)))?;
        response["type"] = Value::String("insurance_claim_response".to_string());
        response["task_id"] = Value::String(task_id.to_string());
        response["status"] = Value::String("completed".to_string());
        Ok(response)
    }

    async fn live_weather_demo(&self, task_id: &str, location: GeoPoint) -> Result<Value, OracleError> {
        location.validate()?;
        info!(task_id = %task_id, city = %location.label(), "routing live weather demo");

        let readings = self.oracle.live_snapshot(&location).await;
        let observations: Vec<Observation> = readings.iter().map(reading_to_observation).collect();

        let now = Utc::now();
        let stats = self.demo_engine.stats(&observations, now);
        let consensus = self
            .demo_engine
            .reach_consensus(task_id, f64::NEG_INFINITY, &observations, now)
            .ok();
        let temperature = consensus.as_ref().map(|c| c.value).unwrap_or(stats.median);
        ensure_finite(temperature)?;

        Ok(json!({
            "type": "live_weather_demo_response",
            "task_id": task_id,
            "location": location,
            "current_temperature": temperature,
            "consensus_data": {
                "sources": readings
                    .iter()
                    .map(|r| json!({
                        "name": r.source,
                        "temperature": r.temperature_c,
                        "confidence": r.confidence.unwrap_or(1.0),
                    }))
                    .collect::<Vec<_>>(),
                "consensus_temperature": temperature,
                "confidence": consensus.map(|c| c.confidence).unwrap_or(stats.confidence),
                "algorithm": "MAD",
                "median": stats.median,
                "mad": stats.mad,
                "outliers": stats.outlier_count,
            },
            "timestamp": now.to_rfc3339(),
            "status": "completed",
        }))
    }
}

fn reading_to_observation(reading: &ProviderReading) -> Observation {
    Observation {
        source: reading.source.clone(),
        measured_at: reading.measured_at,
        temperature_c: reading.temperature_c,
        humidity_pct: reading.humidity_pct,
        wind_mps: reading.wind_mps,
        precip_mm: reading.precip_mm,
        pressure_hpa: reading.pressure_hpa,
        confidence: reading.confidence.unwrap_or(1.0),
        signature: Vec::new(),
    }
}

/// JSON cannot carry NaN or infinities; surface them as an explicit error
/// instead of a lossy encode.
fn ensure_finite(value: f64) -> Result<(), OracleError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(OracleError::TaskFailed {
            task_id: String::new(),
            reason: "non-finite value in result".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::sources::SourceRegistry;

    async fn test_router() -> TaskRouter {
        // Empty registry: the demo and claim-demo paths never hit the
        // network.
        let config = Config::default();
        let oracle = Oracle::with_registry(&config, Arc::new(SourceRegistry::new())).await;
        TaskRouter::new(Arc::new(oracle))
    }

    #[tokio::test]
    async fn test_unknown_discriminator_is_bad_request() {
        let router = test_router().await;
        let err = router
            .execute_task("t1", br#"{"type": "mystery_task"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, OracleError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_bad_request() {
        let router = test_router().await;
        let err = router.execute_task("t1", b"{not json").await.unwrap_err();
        assert!(matches!(err, OracleError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_out_of_range_latitude_rejected() {
        let router = test_router().await;
        let payload = br#"{
            "type": "weather_check",
            "location": {"latitude": 91.0, "longitude": 0.0},
            "threshold": 25.0
        }"#;
        let err = router.execute_task("t1", payload).await.unwrap_err();
        assert!(matches!(err, OracleError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_out_of_range_threshold_rejected() {
        let router = test_router().await;
        let payload = br#"{
            "type": "weather_check",
            "location": {"latitude": 40.7, "longitude": -74.0},
            "threshold": 250.0
        }"#;
        let err = router.execute_task("t1", payload).await.unwrap_err();
        assert!(matches!(err, OracleError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_demo_claim_end_to_end() {
        let router = test_router().await;
        let payload = br#"{
            "type": "insurance_claim",
            "claim_request": {
                "policy_id": "POL-CROP-1",
                "policy": {
                    "policy_id": "POL-CROP-1",
                    "policy_holder": "0xfarm",
                    "insurance_type": "crop",
                    "location": {"latitude": 44.8, "longitude": -0.58},
                    "coverage_amount": 100000.0,
                    "premium": 2500.0,
                    "start_date": "2024-06-01T00:00:00Z",
                    "end_date": "2024-09-30T00:00:00Z",
                    "triggers": [{
                        "trigger_id": "heat-stress",
                        "peril": "heat_wave",
                        "conditions": {
                            "temperature_max": 35.0,
                            "consecutive_days": 3,
                            "time_window": {"start_month": 6, "end_month": 8}
                        },
                        "payout_ratio": 0.5,
                        "description": "Heat stress protection"
                    }]
                },
                "claim_date": "2024-07-15T00:00:00Z",
                "automated_check": true
            },
            "demo_mode": true,
            "demo_scenario": "heat_wave"
        }"#;

        let response = router.execute_task("t1", payload).await.unwrap();
        assert_eq!(response["type"], "insurance_claim_response");
        assert_eq!(response["status"], "completed");
        assert_eq!(response["claim_status"], "partial");
        assert_eq!(response["payout_amount"], 50_000.0);
        assert_eq!(response["triggered_perils"][0]["peril"], "heat_wave");
        assert!(response["claim_id"].as_str().unwrap().starts_with("CLM-"));
        assert_eq!(response["verification_hash"].as_str().unwrap().len(), 64);
    }

    #[tokio::test]
    async fn test_claim_with_empty_triggers_rejected() {
        let router = test_router().await;
        let payload = br#"{
            "type": "insurance_claim",
            "claim_request": {
                "policy_id": "POL-1",
                "policy": {
                    "policy_id": "POL-1",
                    "policy_holder": "0xabc",
                    "insurance_type": "event",
                    "location": {"latitude": 0.0, "longitude": 0.0},
                    "coverage_amount": 1000.0,
                    "start_date": "2024-06-01T00:00:00Z",
                    "end_date": "2024-09-30T00:00:00Z",
                    "triggers": []
                },
                "claim_date": "2024-07-15T00:00:00Z"
            }
        }"#;
        let err = router.execute_task("t1", payload).await.unwrap_err();
        assert!(matches!(err, OracleError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_live_demo_falls_back_without_sources() {
        let router = test_router().await;
        let payload = br#"{
            "type": "live_weather_demo",
            "location": {"latitude": 40.7128, "longitude": -74.006, "city": "New York"}
        }"#;
        let response = router.execute_task("t1", payload).await.unwrap();
        assert_eq!(response["type"], "live_weather_demo_response");
        assert_eq!(response["consensus_data"]["algorithm"], "MAD");
        assert_eq!(response["consensus_data"]["sources"][0]["name"], "fallback");
        assert_eq!(response["consensus_data"]["sources"][0]["confidence"], 0.5);
    }
}
