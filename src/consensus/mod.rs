//! Consensus Engine
//!
//! Pure, deterministic aggregation of observations: MAD-based outlier
//! filtering followed by a reliability-weighted mean. Identical input lists
//! yield byte-identical results.

pub mod signing;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::OracleError;
use crate::types::{ConsensusResult, Observation};

/// Floor substituted when all survivors read identically, so the outlier
/// cutoff never collapses to zero width.
const MAD_FLOOR: f64 = 0.01;

/// Weights never drop below this, keeping every survivor's vote non-zero.
const MIN_WEIGHT: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct ConsensusEngine {
    pub min_sources: usize,
    mad_threshold: f64,
}

/// Diagnostic snapshot of a consensus run, used by the live demo response.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConsensusStats {
    pub median: f64,
    pub mad: f64,
    pub outlier_count: usize,
    pub filtered_count: usize,
    pub confidence: f64,
}

impl ConsensusEngine {
    pub fn new(min_sources: usize, mad_threshold: f64) -> Self {
        Self {
            min_sources,
            mad_threshold,
        }
    }

    /// Run the full recipe over `observations` and evaluate `threshold`.
    ///
    /// `now` is passed in rather than read from the clock so the function
    /// stays pure; age penalties are computed against it.
    pub fn reach_consensus(
        &self,
        task_id: &str,
        threshold: f64,
        observations: &[Observation],
        now: DateTime<Utc>,
    ) -> Result<ConsensusResult, OracleError> {
        if observations.len() < self.min_sources {
            return Err(OracleError::InsufficientQuorum {
                got: observations.len(),
                need: self.min_sources,
            });
        }

        let temps: Vec<f64> = observations.iter().map(|o| o.temperature_c).collect();
        let m = median(&temps);
        let mad = mad(&temps, m);

        let kept = self.filter_outliers(observations, m, mad);
        if kept.len() < self.min_sources {
            return Err(OracleError::InsufficientQuorum {
                got: kept.len(),
                need: self.min_sources,
            });
        }

        let (value, confidence) = self.weighted_consensus(&kept, now);
        let aggregated_sig = aggregate_signatures(&kept);

        Ok(ConsensusResult {
            task_id: task_id.to_string(),
            value,
            meets_threshold: value >= threshold,
            confidence,
            kept_observations: kept,
            aggregated_sig,
            timestamp: now,
        })
    }

    fn filter_outliers(
        &self,
        observations: &[Observation],
        median: f64,
        mad: f64,
    ) -> Vec<Observation> {
        let mad = if mad == 0.0 { MAD_FLOOR } else { mad };
        let cutoff = self.mad_threshold * mad;

        let mut kept = Vec::with_capacity(observations.len());
        for obs in observations {
            let deviation = (obs.temperature_c - median).abs();
            if deviation <= cutoff {
                kept.push(obs.clone());
            } else {
                warn!(
                    source = %obs.source,
                    temperature = obs.temperature_c,
                    median,
                    deviation,
                    cutoff,
                    "filtered outlier observation"
                );
            }
        }
        kept
    }

    fn weighted_consensus(&self, kept: &[Observation], now: DateTime<Utc>) -> (f64, f64) {
        let weights: Vec<f64> = kept.iter().map(|o| reliability_weight(o, now)).collect();

        let total_weight: f64 = weights.iter().sum();
        if total_weight == 0.0 {
            let temps: Vec<f64> = kept.iter().map(|o| o.temperature_c).collect();
            return (median(&temps), 0.5);
        }

        let value = kept
            .iter()
            .zip(&weights)
            .map(|(o, w)| o.temperature_c * w)
            .sum::<f64>()
            / total_weight;

        let variance = kept
            .iter()
            .zip(&weights)
            .map(|(o, w)| {
                let diff = o.temperature_c - value;
                w * diff * diff
            })
            .sum::<f64>()
            / total_weight;

        let stability = 1.0 - (variance.sqrt() / 10.0).min(1.0);
        let agreement = agreement_score(kept, value);
        (value, (stability + agreement) / 2.0)
    }

    /// Median/MAD/outlier diagnostics without failing on thin input.
    pub fn stats(&self, observations: &[Observation], now: DateTime<Utc>) -> ConsensusStats {
        let temps: Vec<f64> = observations.iter().map(|o| o.temperature_c).collect();
        let m = median(&temps);
        let spread = mad(&temps, m);
        let effective = if spread == 0.0 { MAD_FLOOR } else { spread };

        let outlier_count = temps
            .iter()
            .filter(|t| (**t - m).abs() > self.mad_threshold * effective)
            .count();

        let confidence = self
            .reach_consensus("stats", f64::NEG_INFINITY, observations, now)
            .map(|r| r.confidence)
            .unwrap_or(0.0);

        ConsensusStats {
            median: m,
            mad: spread,
            outlier_count,
            filtered_count: observations.len() - outlier_count,
            confidence,
        }
    }
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}

fn mad(values: &[f64], median_value: f64) -> f64 {
    let deviations: Vec<f64> = values.iter().map(|v| (v - median_value).abs()).collect();
    median(&deviations)
}

fn reliability_weight(obs: &Observation, now: DateTime<Utc>) -> f64 {
    let mut weight = 1.0;

    let age_minutes = (now - obs.measured_at).num_seconds() as f64 / 60.0;
    if age_minutes > 5.0 {
        weight *= (1.0 - age_minutes / 60.0).max(0.5);
    }

    if obs.confidence > 0.0 {
        weight *= obs.confidence;
    }

    weight *= source_reliability(&obs.source);
    weight.max(MIN_WEIGHT)
}

/// Per-source reliability table; unknown sources get a conservative default.
pub fn source_reliability(source: &str) -> f64 {
    match source {
        "OpenWeatherMap" => 0.95,
        "WeatherAPI" => 0.93,
        "TomorrowIO" => 0.92,
        "VisualCrossing" => 0.90,
        "OpenMeteo" => 0.88,
        _ => 0.80,
    }
}

fn agreement_score(observations: &[Observation], value: f64) -> f64 {
    if observations.is_empty() {
        return 0.0;
    }
    let avg_deviation = observations
        .iter()
        .map(|o| (o.temperature_c - value).abs())
        .sum::<f64>()
        / observations.len() as f64;
    (1.0 - avg_deviation / 5.0).max(0.0)
}

/// SHA-256 over `source || "%.2f" temperature || sample signature` for each
/// kept observation in input order.
fn aggregate_signatures(observations: &[Observation]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    for obs in observations {
        hasher.update(obs.source.as_bytes());
        hasher.update(format!("{:.2}", obs.temperature_c).as_bytes());
        hasher.update(&obs.signature);
    }
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn obs(source: &str, temp: f64, now: DateTime<Utc>) -> Observation {
        Observation {
            source: source.to_string(),
            measured_at: now,
            temperature_c: temp,
            humidity_pct: None,
            wind_mps: None,
            precip_mm: None,
            pressure_hpa: None,
            confidence: 1.0,
            signature: signing::sign("op1", "t1", temp),
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_median_even_and_odd() {
        assert!((median(&[1.0, 3.0, 2.0]) - 2.0).abs() < 1e-9);
        assert!((median(&[1.0, 2.0, 3.0, 4.0]) - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_single_outlier_is_filtered() {
        // {22.0, 22.5, 23.0, 37.0}: median 22.75, MAD 0.5, cutoff 1.25.
        let now = fixed_now();
        let engine = ConsensusEngine::new(3, 2.5);
        let observations = vec![
            obs("OpenMeteo", 22.0, now),
            obs("WeatherAPI", 22.5, now),
            obs("TomorrowIO", 23.0, now),
            obs("VisualCrossing", 37.0, now),
        ];
        let result = engine
            .reach_consensus("t1", 25.0, &observations, now)
            .unwrap();
        assert_eq!(result.kept_observations.len(), 3);
        assert!(result.value >= 22.0 && result.value <= 23.0);
        assert!(!result.meets_threshold);
        assert!(!result
            .kept_observations
            .iter()
            .any(|o| o.source == "VisualCrossing"));
    }

    #[test]
    fn test_insufficient_quorum_after_filtering() {
        // {22.0, 22.5, 60.0}: the far sample is outside the cutoff, leaving
        // two survivors below the min_sources floor of three.
        let now = fixed_now();
        let engine = ConsensusEngine::new(3, 2.5);
        let observations = vec![
            obs("OpenMeteo", 22.0, now),
            obs("WeatherAPI", 22.5, now),
            obs("TomorrowIO", 60.0, now),
        ];
        let err = engine
            .reach_consensus("t1", 25.0, &observations, now)
            .unwrap_err();
        assert!(matches!(
            err,
            OracleError::InsufficientQuorum { got: 2, need: 3 }
        ));
    }

    #[test]
    fn test_identical_readings_keep_everything() {
        // MAD == 0 must not drop all samples; the floor keeps the cutoff open
        // and confidence stays well-defined.
        let now = fixed_now();
        let engine = ConsensusEngine::new(3, 2.5);
        let observations = vec![
            obs("OpenMeteo", 20.0, now),
            obs("WeatherAPI", 20.0, now),
            obs("TomorrowIO", 20.0, now),
        ];
        let result = engine
            .reach_consensus("t1", 25.0, &observations, now)
            .unwrap();
        assert_eq!(result.kept_observations.len(), 3);
        assert!((result.value - 20.0).abs() < 1e-9);
        assert!(result.confidence > 0.99);
    }

    #[test]
    fn test_consensus_is_deterministic() {
        let now = fixed_now();
        let engine = ConsensusEngine::new(3, 2.5);
        let observations = vec![
            obs("OpenMeteo", 22.4, now),
            obs("WeatherAPI", 22.6, now),
            obs("TomorrowIO", 22.5, now),
        ];
        let a = engine
            .reach_consensus("t1", 25.0, &observations, now)
            .unwrap();
        let b = engine
            .reach_consensus("t1", 25.0, &observations, now)
            .unwrap();
        assert_eq!(a.value.to_bits(), b.value.to_bits());
        assert_eq!(a.confidence.to_bits(), b.confidence.to_bits());
        assert_eq!(a.aggregated_sig, b.aggregated_sig);
    }

    #[test]
    fn test_mad_robust_against_minority_of_outliers() {
        // Three honest samples around 21, three wild ones; the consensus
        // value must land within the honest spread.
        let now = fixed_now();
        let engine = ConsensusEngine::new(3, 2.5);
        let observations = vec![
            obs("OpenMeteo", 20.8, now),
            obs("WeatherAPI", 21.0, now),
            obs("TomorrowIO", 21.2, now),
            obs("a", 80.0, now),
            obs("b", -40.0, now),
            obs("c", 21.1, now),
        ];
        let result = engine
            .reach_consensus("t1", 25.0, &observations, now)
            .unwrap();
        assert!(result.value >= 20.8 && result.value <= 21.2);
        assert_eq!(result.kept_observations.len(), 4);
    }

    #[test]
    fn test_stale_samples_drag_weight_not_value_range() {
        let now = fixed_now();
        let engine = ConsensusEngine::new(3, 2.5);
        let mut stale = obs("OpenMeteo", 22.0, now);
        stale.measured_at = now - chrono::Duration::minutes(30);
        let observations = vec![
            stale,
            obs("WeatherAPI", 23.0, now),
            obs("TomorrowIO", 23.0, now),
        ];
        let result = engine
            .reach_consensus("t1", 25.0, &observations, now)
            .unwrap();
        // The stale 22.0 sample carries half weight, pulling the mean less
        // than an equal-weight average would.
        assert!(result.value > 22.66);
    }

    #[test]
    fn test_stats_counts_outliers() {
        let now = fixed_now();
        let engine = ConsensusEngine::new(3, 2.5);
        let observations = vec![
            obs("OpenMeteo", 22.0, now),
            obs("WeatherAPI", 22.5, now),
            obs("TomorrowIO", 23.0, now),
            obs("VisualCrossing", 37.0, now),
        ];
        let stats = engine.stats(&observations, now);
        assert_eq!(stats.outlier_count, 1);
        assert_eq!(stats.filtered_count, 3);
        assert!((stats.median - 22.75).abs() < 1e-9);
        assert!((stats.mad - 0.5).abs() < 1e-9);
    }
}
