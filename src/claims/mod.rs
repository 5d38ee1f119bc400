//! Claims Evaluator
//!
//! Evaluates a policy's trigger predicates against a time-indexed
//! observation series and decides whether a payout is owed. Claim problems
//! become claim statuses, never errors: a malformed envelope is the only
//! thing that fails the RPC.

pub mod demo;
pub mod types;

pub use types::*;

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::types::Observation;

/// Evidence confidence below this sends the claim to manual investigation.
const INVESTIGATE_CONFIDENCE_FLOOR: f64 = 0.7;

const CONSENSUS_METHOD: &str = "MAD (Median Absolute Deviation)";

#[derive(Debug, Clone, Default)]
pub struct ClaimsProcessor;

/// Per-day aggregate of the observation series.
#[derive(Debug, Clone)]
struct DayStats {
    temp_min: f64,
    temp_max: f64,
    wind_max: Option<f64>,
    precip_total: Option<f64>,
    humidity_sum: f64,
    humidity_count: usize,
}

impl DayStats {
    fn humidity_avg(&self) -> Option<f64> {
        (self.humidity_count > 0).then(|| self.humidity_sum / self.humidity_count as f64)
    }
}

impl ClaimsProcessor {
    pub fn new() -> Self {
        Self
    }

    pub fn process_claim(
        &self,
        policy: &InsurancePolicy,
        series: &[Observation],
        claim_date: DateTime<Utc>,
    ) -> ClaimDecision {
        let claim_id = generate_claim_id(&policy.policy_id, claim_date);
        info!(
            policy_id = %policy.policy_id,
            claim_id = %claim_id,
            insurance_type = ?policy.insurance_type,
            "processing claim"
        );

        if claim_date < policy.start_date || claim_date > policy.end_date {
            return ClaimDecision {
                claim_id,
                policy_id: policy.policy_id.clone(),
                claim_status: ClaimStatus::Rejected,
                triggered_perils: Vec::new(),
                payout_amount: 0.0,
                weather_data: build_assessment(series, claim_date),
                verification_hash: verification_hash(policy, series, &[]),
                reason: Some("claim date outside policy period".to_string()),
                timestamp: Utc::now(),
            };
        }

        let triggered = self.evaluate_triggers(policy, series, claim_date);
        let payout = calculate_payout(policy, &triggered);
        let status = determine_status(&triggered, payout);

        let decision = ClaimDecision {
            claim_id,
            policy_id: policy.policy_id.clone(),
            claim_status: status,
            verification_hash: verification_hash(policy, series, &triggered),
            triggered_perils: triggered,
            payout_amount: payout,
            weather_data: build_assessment(series, claim_date),
            reason: None,
            timestamp: Utc::now(),
        };

        info!(
            policy_id = %policy.policy_id,
            status = ?decision.claim_status,
            payout = decision.payout_amount,
            perils = decision.triggered_perils.len(),
            "claim processed"
        );
        decision
    }

    fn evaluate_triggers(
        &self,
        policy: &InsurancePolicy,
        series: &[Observation],
        claim_date: DateTime<Utc>,
    ) -> Vec<TriggeredPeril> {
        let mut triggered = Vec::new();
        for trigger in &policy.triggers {
            debug!(trigger_id = %trigger.trigger_id, peril = ?trigger.peril, "evaluating trigger");
            if let Some(evidence) = evaluate_trigger(trigger, series, claim_date) {
                info!(
                    policy_id = %policy.policy_id,
                    peril = trigger.peril.as_str(),
                    description = %trigger.description,
                    "trigger activated"
                );
                triggered.push(TriggeredPeril {
                    peril: trigger.peril,
                    trigger_id: trigger.trigger_id.clone(),
                    conditions_met: true,
                    payout_ratio: trigger.payout_ratio,
                    evidence,
                });
            }
        }
        triggered
    }
}

/// Evaluate one trigger over the series. Returns the evidence bundle when
/// the trigger fires, None otherwise.
fn evaluate_trigger(
    trigger: &InsuranceTrigger,
    series: &[Observation],
    claim_date: DateTime<Utc>,
) -> Option<WeatherEvidence> {
    let conditions = &trigger.conditions;

    if let Some(window) = &conditions.time_window {
        if !window.contains_month(claim_date.month()) {
            return None;
        }
    }

    let filtered: Vec<&Observation> = series
        .iter()
        .filter(|obs| in_hour_window(obs, conditions.time_window.as_ref()))
        .collect();
    if filtered.is_empty() {
        return None;
    }

    let days = daily_stats(&filtered);
    let longest_run = longest_qualifying_run(&days, conditions);
    let required = conditions.consecutive_days.max(1);
    if longest_run < required {
        return None;
    }

    let temps: Vec<f64> = filtered.iter().map(|o| o.temperature_c).collect();
    let confidence = filtered
        .iter()
        .map(|o| o.confidence)
        .fold(f64::INFINITY, f64::min);
    Some(WeatherEvidence {
        average_temp: temps.iter().sum::<f64>() / temps.len() as f64,
        min_temp: temps.iter().cloned().fold(f64::INFINITY, f64::min),
        max_temp: temps.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        consecutive_days: longest_run,
        confidence,
        observation_count: filtered.len(),
    })
}

fn in_hour_window(obs: &Observation, window: Option<&TimeWindow>) -> bool {
    let Some(window) = window else {
        return true;
    };
    match (window.start_hour, window.end_hour) {
        (Some(start), Some(end)) => {
            let hour = obs.measured_at.hour();
            hour >= start && hour <= end
        }
        _ => true,
    }
}

fn daily_stats(observations: &[&Observation]) -> BTreeMap<NaiveDate, DayStats> {
    let mut days: BTreeMap<NaiveDate, DayStats> = BTreeMap::new();
    for obs in observations {
        let date = obs.measured_at.date_naive();
        let entry = days.entry(date).or_insert_with(|| DayStats {
            temp_min: f64::INFINITY,
            temp_max: f64::NEG_INFINITY,
            wind_max: None,
            precip_total: None,
            humidity_sum: 0.0,
            humidity_count: 0,
        });
        entry.temp_min = entry.temp_min.min(obs.temperature_c);
        entry.temp_max = entry.temp_max.max(obs.temperature_c);
        if let Some(wind) = obs.wind_mps {
            entry.wind_max = Some(entry.wind_max.map_or(wind, |w: f64| w.max(wind)));
        }
        if let Some(precip) = obs.precip_mm {
            entry.precip_total = Some(entry.precip_total.unwrap_or(0.0) + precip);
        }
        if let Some(humidity) = obs.humidity_pct {
            entry.humidity_sum += humidity;
            entry.humidity_count += 1;
        }
    }
    days
}

/// A day qualifies when every bound the trigger sets is crossed.
fn day_qualifies(day: &DayStats, conditions: &TriggerConditions) -> bool {
    if let Some(cap) = conditions.temperature_max {
        if day.temp_max <= cap {
            return false;
        }
    }
    if let Some(floor) = conditions.temperature_min {
        if day.temp_min >= floor {
            return false;
        }
    }
    if let Some(min) = conditions.wind_speed_min {
        match day.wind_max {
            Some(wind) if wind > min => {}
            _ => return false,
        }
    }
    if let Some(max) = conditions.wind_speed_max {
        match day.wind_max {
            Some(wind) if wind < max => {}
            _ => return false,
        }
    }
    if let Some(min) = conditions.precipitation_min {
        match day.precip_total {
            Some(precip) if precip > min => {}
            _ => return false,
        }
    }
    if let Some(max) = conditions.precipitation_max {
        match day.precip_total {
            Some(precip) if precip < max => {}
            _ => return false,
        }
    }
    if let Some(min) = conditions.humidity_min {
        match day.humidity_avg() {
            Some(humidity) if humidity > min => {}
            _ => return false,
        }
    }
    if let Some(max) = conditions.humidity_max {
        match day.humidity_avg() {
            Some(humidity) if humidity < max => {}
            _ => return false,
        }
    }
    true
}

/// Longest run of calendar-consecutive qualifying days.
fn longest_qualifying_run(
    days: &BTreeMap<NaiveDate, DayStats>,
    conditions: &TriggerConditions,
) -> u32 {
    let mut longest = 0u32;
    let mut run = 0u32;
    let mut prev: Option<NaiveDate> = None;

    for (date, stats) in days {
        if day_qualifies(stats, conditions) {
            let contiguous = prev
                .and_then(|p| p.succ_opt())
                .map_or(false, |next| next == *date);
            run = if contiguous { run + 1 } else { 1 };
            longest = longest.max(run);
            prev = Some(*date);
        } else {
            run = 0;
            prev = None;
        }
    }
    longest
}

fn calculate_payout(policy: &InsurancePolicy, triggered: &[TriggeredPeril]) -> f64 {
    // Triggers are coverages, not additive line items: the dominant peril
    // pays.
    let max_ratio = triggered
        .iter()
        .map(|p| p.payout_ratio)
        .fold(0.0, f64::max);
    policy.coverage_amount * max_ratio
}

fn determine_status(triggered: &[TriggeredPeril], payout: f64) -> ClaimStatus {
    if triggered.is_empty() || payout == 0.0 {
        return ClaimStatus::Rejected;
    }
    if triggered
        .iter()
        .any(|p| p.evidence.confidence < INVESTIGATE_CONFIDENCE_FLOOR)
    {
        return ClaimStatus::Investigate;
    }
    let max_ratio = triggered
        .iter()
        .map(|p| p.payout_ratio)
        .fold(0.0, f64::max);
    if max_ratio < 1.0 {
        ClaimStatus::Partial
    } else {
        ClaimStatus::Approved
    }
}

/// `"CLM-" || hex(sha256(policy_id || "-" || claim_date_unix))[..16]`.
fn generate_claim_id(policy_id: &str, claim_date: DateTime<Utc>) -> String {
    let digest = Sha256::digest(format!("{}-{}", policy_id, claim_date.timestamp()).as_bytes());
    format!("CLM-{}", &hex::encode(digest)[..16])
}

/// Immutable evidence bundle an upstream contract can re-derive: policy id,
/// every `(temperature, source)` pair in series order, every triggered
/// `(peril, payout_ratio)` pair in trigger order.
fn verification_hash(
    policy: &InsurancePolicy,
    series: &[Observation],
    triggered: &[TriggeredPeril],
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(policy.policy_id.as_bytes());
    for obs in series {
        hasher.update(format!("{:.2}", obs.temperature_c).as_bytes());
        hasher.update(obs.source.as_bytes());
    }
    for peril in triggered {
        hasher.update(peril.peril.as_str().as_bytes());
        hasher.update(format!("{:.2}", peril.payout_ratio).as_bytes());
    }
    hex::encode(hasher.finalize())
}

fn build_assessment(series: &[Observation], claim_date: DateTime<Utc>) -> WeatherAssessment {
    let temps: Vec<f64> = series.iter().map(|o| o.temperature_c).collect();
    let (avg, min, max) = if temps.is_empty() {
        (0.0, 0.0, 0.0)
    } else {
        (
            temps.iter().sum::<f64>() / temps.len() as f64,
            temps.iter().cloned().fold(f64::INFINITY, f64::min),
            temps.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        )
    };

    let unique_sources: HashSet<&str> = series.iter().map(|o| o.source.as_str()).collect();

    WeatherAssessment {
        assessment_period: DateRange {
            start: claim_date - chrono::Duration::days(7),
            end: claim_date,
        },
        location_verified: true,
        data_sources: unique_sources.len(),
        consensus_method: CONSENSUS_METHOD.to_string(),
        weather_summary: WeatherSummary {
            average_temperature: avg,
            max_temperature: max,
            min_temperature: min,
            total_precipitation: series.iter().filter_map(|o| o.precip_mm).sum(),
            max_wind_speed: series.iter().filter_map(|o| o.wind_mps).fold(0.0, f64::max),
            extreme_events: detect_extreme_events(series),
        },
    }
}

fn detect_extreme_events(series: &[Observation]) -> Vec<ExtremeEvent> {
    let mut events = Vec::new();
    for obs in series {
        if obs.temperature_c > 35.0 {
            events.push(ExtremeEvent {
                date: obs.measured_at,
                event_type: WeatherPeril::HeatWave,
                severity: heat_severity(obs.temperature_c).to_string(),
                description: format!("High temperature: {:.1}°C", obs.temperature_c),
            });
        }
        if obs.temperature_c < -10.0 {
            events.push(ExtremeEvent {
                date: obs.measured_at,
                event_type: WeatherPeril::ColdSnap,
                severity: cold_severity(obs.temperature_c).to_string(),
                description: format!("Low temperature: {:.1}°C", obs.temperature_c),
            });
        }
    }
    events
}

fn heat_severity(temp: f64) -> &'static str {
    if temp > 45.0 {
        "extreme"
    } else if temp > 40.0 {
        "severe"
    } else {
        "moderate"
    }
}

fn cold_severity(temp: f64) -> &'static str {
    if temp < -20.0 {
        "extreme"
    } else if temp < -15.0 {
        "severe"
    } else {
        "moderate"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoPoint;
    use chrono::TimeZone;

    fn day_obs(day: u32, temp: f64, confidence: f64) -> Observation {
        Observation {
            source: "OpenMeteo".to_string(),
            measured_at: Utc.with_ymd_and_hms(2024, 7, day, 12, 0, 0).unwrap(),
            temperature_c: temp,
            humidity_pct: None,
            wind_mps: None,
            precip_mm: None,
            pressure_hpa: None,
            confidence,
            signature: vec![1, 2, 3],
        }
    }

    fn heat_policy(coverage: f64) -> InsurancePolicy {
        InsurancePolicy {
            policy_id: "POL-CROP-1".to_string(),
            policy_holder: "0xfarm".to_string(),
            insurance_type: InsuranceType::Crop,
            location: GeoPoint::new(44.8, -0.58),
            coverage_amount: coverage,
            premium: 2_500.0,
            start_date: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            end_date: Utc.with_ymd_and_hms(2024, 9, 30, 0, 0, 0).unwrap(),
            triggers: vec![InsuranceTrigger {
                trigger_id: "heat-stress".to_string(),
                peril: WeatherPeril::HeatWave,
                conditions: TriggerConditions {
                    temperature_max: Some(35.0),
                    consecutive_days: 3,
                    time_window: Some(TimeWindow {
                        start_month: 6,
                        end_month: 8,
                        start_hour: None,
                        end_hour: None,
                    }),
                    ..Default::default()
                },
                payout_ratio: 0.5,
                description: "Heat stress protection".to_string(),
            }],
        }
    }

    fn heat_wave_series() -> Vec<Observation> {
        [36.0, 37.0, 38.0, 39.0, 39.0]
            .iter()
            .enumerate()
            .map(|(i, temp)| day_obs(10 + i as u32, *temp, 0.9))
            .collect()
    }

    #[test]
    fn test_heat_wave_claim_pays_half_coverage() {
        let processor = ClaimsProcessor::new();
        let claim_date = Utc.with_ymd_and_hms(2024, 7, 15, 0, 0, 0).unwrap();
        let decision = processor.process_claim(&heat_policy(100_000.0), &heat_wave_series(), claim_date);

        assert_eq!(decision.payout_amount, 50_000.0);
        assert_eq!(decision.triggered_perils.len(), 1);
        assert_eq!(decision.triggered_perils[0].peril, WeatherPeril::HeatWave);
        assert_eq!(decision.triggered_perils[0].evidence.consecutive_days, 5);
        // Payout ratio below 1.0 lands in partial.
        assert_eq!(decision.claim_status, ClaimStatus::Partial);
    }

    #[test]
    fn test_full_ratio_trigger_approves() {
        let mut policy = heat_policy(100_000.0);
        policy.triggers[0].payout_ratio = 1.0;
        let claim_date = Utc.with_ymd_and_hms(2024, 7, 15, 0, 0, 0).unwrap();
        let decision =
            ClaimsProcessor::new().process_claim(&policy, &heat_wave_series(), claim_date);
        assert_eq!(decision.claim_status, ClaimStatus::Approved);
        assert_eq!(decision.payout_amount, 100_000.0);
    }

    #[test]
    fn test_claim_outside_policy_period_rejected() {
        let processor = ClaimsProcessor::new();
        let claim_date = Utc.with_ymd_and_hms(2024, 5, 15, 0, 0, 0).unwrap();
        let decision = processor.process_claim(&heat_policy(100_000.0), &heat_wave_series(), claim_date);

        assert_eq!(decision.claim_status, ClaimStatus::Rejected);
        assert_eq!(decision.payout_amount, 0.0);
        assert_eq!(
            decision.reason.as_deref(),
            Some("claim date outside policy period")
        );
    }

    #[test]
    fn test_low_confidence_evidence_goes_to_investigation() {
        let processor = ClaimsProcessor::new();
        let series: Vec<Observation> = [36.0, 37.0, 38.0, 39.0, 39.0]
            .iter()
            .enumerate()
            .map(|(i, temp)| day_obs(10 + i as u32, *temp, 0.5))
            .collect();
        let claim_date = Utc.with_ymd_and_hms(2024, 7, 15, 0, 0, 0).unwrap();
        let decision = processor.process_claim(&heat_policy(100_000.0), &series, claim_date);
        assert_eq!(decision.claim_status, ClaimStatus::Investigate);
    }

    #[test]
    fn test_no_trigger_rejects() {
        let processor = ClaimsProcessor::new();
        let series: Vec<Observation> =
            (10..15).map(|day| day_obs(day, 28.0, 0.9)).collect();
        let claim_date = Utc.with_ymd_and_hms(2024, 7, 15, 0, 0, 0).unwrap();
        let decision = processor.process_claim(&heat_policy(100_000.0), &series, claim_date);
        assert_eq!(decision.claim_status, ClaimStatus::Rejected);
        assert!(decision.triggered_perils.is_empty());
    }

    #[test]
    fn test_broken_run_does_not_satisfy_consecutive_days() {
        let processor = ClaimsProcessor::new();
        // Hot, hot, cool, hot, hot: longest run is 2 < 3 required.
        let temps = [37.0, 38.0, 30.0, 37.0, 38.0];
        let series: Vec<Observation> = temps
            .iter()
            .enumerate()
            .map(|(i, temp)| day_obs(10 + i as u32, *temp, 0.9))
            .collect();
        let claim_date = Utc.with_ymd_and_hms(2024, 7, 15, 0, 0, 0).unwrap();
        let decision = processor.process_claim(&heat_policy(100_000.0), &series, claim_date);
        assert_eq!(decision.claim_status, ClaimStatus::Rejected);
    }

    #[test]
    fn test_zero_consecutive_days_fires_on_single_day() {
        let mut policy = heat_policy(100_000.0);
        policy.triggers[0].conditions.consecutive_days = 0;
        let series = vec![day_obs(12, 38.0, 0.9)];
        let claim_date = Utc.with_ymd_and_hms(2024, 7, 15, 0, 0, 0).unwrap();
        let decision = ClaimsProcessor::new().process_claim(&policy, &series, claim_date);
        assert_eq!(decision.triggered_perils.len(), 1);
    }

    #[test]
    fn test_month_window_wraps_across_year_end() {
        let mut policy = heat_policy(100_000.0);
        policy.start_date = Utc.with_ymd_and_hms(2023, 11, 1, 0, 0, 0).unwrap();
        policy.end_date = Utc.with_ymd_and_hms(2024, 4, 30, 0, 0, 0).unwrap();
        policy.triggers[0].conditions.consecutive_days = 0;
        policy.triggers[0].conditions.time_window = Some(TimeWindow {
            start_month: 11,
            end_month: 2,
            start_hour: None,
            end_hour: None,
        });

        let processor = ClaimsProcessor::new();
        let series = vec![Observation {
            measured_at: Utc.with_ymd_and_hms(2024, 1, 5, 12, 0, 0).unwrap(),
            ..day_obs(1, 38.0, 0.9)
        }];

        let december = Utc.with_ymd_and_hms(2023, 12, 20, 0, 0, 0).unwrap();
        assert_eq!(
            processor
                .process_claim(&policy, &series, december)
                .triggered_perils
                .len(),
            1
        );
        let january = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        assert_eq!(
            processor
                .process_claim(&policy, &series, january)
                .triggered_perils
                .len(),
            1
        );
        let march = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        assert!(processor
            .process_claim(&policy, &series, march)
            .triggered_perils
            .is_empty());
    }

    #[test]
    fn test_hour_window_excludes_off_hours_samples() {
        let mut policy = heat_policy(100_000.0);
        policy.triggers[0].conditions.consecutive_days = 0;
        policy.triggers[0].conditions.time_window = Some(TimeWindow {
            start_month: 6,
            end_month: 8,
            start_hour: Some(8),
            end_hour: Some(20),
        });

        // The only hot sample is at 3am, outside the hour window.
        let series = vec![Observation {
            measured_at: Utc.with_ymd_and_hms(2024, 7, 12, 3, 0, 0).unwrap(),
            ..day_obs(12, 38.0, 0.9)
        }];
        let claim_date = Utc.with_ymd_and_hms(2024, 7, 15, 0, 0, 0).unwrap();
        let decision = ClaimsProcessor::new().process_claim(&policy, &series, claim_date);
        assert!(decision.triggered_perils.is_empty());
    }

    #[test]
    fn test_wind_trigger_on_daily_max() {
        let policy = InsurancePolicy {
            triggers: vec![InsuranceTrigger {
                trigger_id: "gale".to_string(),
                peril: WeatherPeril::HighWind,
                conditions: TriggerConditions {
                    wind_speed_min: Some(16.7),
                    ..Default::default()
                },
                payout_ratio: 1.0,
                description: String::new(),
            }],
            ..heat_policy(40_000.0)
        };
        let mut obs = day_obs(12, 22.0, 0.95);
        obs.wind_mps = Some(19.0);
        let claim_date = Utc.with_ymd_and_hms(2024, 7, 15, 0, 0, 0).unwrap();
        let decision = ClaimsProcessor::new().process_claim(&policy, &[obs], claim_date);
        assert_eq!(decision.claim_status, ClaimStatus::Approved);
        assert_eq!(decision.payout_amount, 40_000.0);
    }

    #[test]
    fn test_payout_scales_linearly_with_coverage() {
        let processor = ClaimsProcessor::new();
        let claim_date = Utc.with_ymd_and_hms(2024, 7, 15, 0, 0, 0).unwrap();
        let series = heat_wave_series();
        let small = processor.process_claim(&heat_policy(50_000.0), &series, claim_date);
        let large = processor.process_claim(&heat_policy(200_000.0), &series, claim_date);
        assert!((large.payout_amount - 4.0 * small.payout_amount).abs() < 1e-9);
    }

    #[test]
    fn test_verification_hash_is_deterministic() {
        let processor = ClaimsProcessor::new();
        let claim_date = Utc.with_ymd_and_hms(2024, 7, 15, 0, 0, 0).unwrap();
        let series = heat_wave_series();
        let a = processor.process_claim(&heat_policy(100_000.0), &series, claim_date);
        let b = processor.process_claim(&heat_policy(100_000.0), &series, claim_date);
        assert_eq!(a.verification_hash, b.verification_hash);
        assert_eq!(a.claim_id, b.claim_id);

        let mut altered = series.clone();
        altered[0].temperature_c = 36.5;
        let c = processor.process_claim(&heat_policy(100_000.0), &altered, claim_date);
        assert_ne!(a.verification_hash, c.verification_hash);
    }

    #[test]
    fn test_assessment_detects_extremes() {
        let decision = ClaimsProcessor::new().process_claim(
            &heat_policy(100_000.0),
            &[day_obs(12, 41.0, 0.9), day_obs(13, 46.0, 0.9)],
            Utc.with_ymd_and_hms(2024, 7, 15, 0, 0, 0).unwrap(),
        );
        let events = &decision.weather_data.weather_summary.extreme_events;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].severity, "severe");
        assert_eq!(events[1].severity, "extreme");
    }
}
