//! Insurance data model
//!
//! Policies, weather-indexed triggers and claim decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::OracleError;
use crate::types::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsuranceType {
    Crop,
    Event,
    Travel,
    Property,
    Energy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherPeril {
    HeatWave,
    ColdSnap,
    Drought,
    ExcessRain,
    Frost,
    HighWind,
    Hail,
    LowWind,
}

impl WeatherPeril {
    pub fn as_str(&self) -> &'static str {
        match self {
            WeatherPeril::HeatWave => "heat_wave",
            WeatherPeril::ColdSnap => "cold_snap",
            WeatherPeril::Drought => "drought",
            WeatherPeril::ExcessRain => "excess_rain",
            WeatherPeril::Frost => "frost",
            WeatherPeril::HighWind => "high_wind",
            WeatherPeril::Hail => "hail",
            WeatherPeril::LowWind => "low_wind",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsurancePolicy {
    pub policy_id: String,
    pub policy_holder: String,
    pub insurance_type: InsuranceType,
    pub location: GeoPoint,
    pub coverage_amount: f64,
    #[serde(default)]
    pub premium: f64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub triggers: Vec<InsuranceTrigger>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsuranceTrigger {
    pub trigger_id: String,
    pub peril: WeatherPeril,
    pub conditions: TriggerConditions,
    /// Fraction of coverage paid when this trigger fires, in [0, 1].
    pub payout_ratio: f64,
    #[serde(default)]
    pub description: String,
}

/// Optional bounds a trigger may set. `*_max` on temperature means the cap
/// that must be exceeded to fire; `*_min` the floor that must be undercut.
/// For wind, precipitation and humidity, `*_min` is the level that must be
/// reached (excess perils) and `*_max` the level the value must stay under
/// (deficit perils such as drought or low wind).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerConditions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_max: Option<f64>,
    #[serde(default)]
    pub consecutive_days: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wind_speed_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wind_speed_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precipitation_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precipitation_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window: Option<TimeWindow>,
}

impl TriggerConditions {
    pub fn has_bounds(&self) -> bool {
        self.temperature_min.is_some()
            || self.temperature_max.is_some()
            || self.humidity_min.is_some()
            || self.humidity_max.is_some()
            || self.wind_speed_min.is_some()
            || self.wind_speed_max.is_some()
            || self.precipitation_min.is_some()
            || self.precipitation_max.is_some()
    }
}

/// Month window (1..12), wrap-around supported (Nov..Feb style). The hour
/// window, when set, restricts qualifying observations within each day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_month: u32,
    pub end_month: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_hour: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_hour: Option<u32>,
}

impl TimeWindow {
    pub fn contains_month(&self, month: u32) -> bool {
        if self.start_month <= self.end_month {
            month >= self.start_month && month <= self.end_month
        } else {
            month >= self.start_month || month <= self.end_month
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Approved,
    Rejected,
    Partial,
    Pending,
    Investigate,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClaimRequest {
    pub policy_id: String,
    pub policy: InsurancePolicy,
    pub claim_date: DateTime<Utc>,
    #[serde(default)]
    pub automated_check: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TriggeredPeril {
    pub peril: WeatherPeril,
    pub trigger_id: String,
    pub conditions_met: bool,
    pub payout_ratio: f64,
    pub evidence: WeatherEvidence,
}

#[derive(Debug, Clone, Serialize)]
pub struct WeatherEvidence {
    pub average_temp: f64,
    pub min_temp: f64,
    pub max_temp: f64,
    pub consecutive_days: u32,
    /// Floor of the per-sample confidences behind this trigger.
    pub confidence: f64,
    pub observation_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClaimDecision {
    pub claim_id: String,
    pub policy_id: String,
    pub claim_status: ClaimStatus,
    pub triggered_perils: Vec<TriggeredPeril>,
    pub payout_amount: f64,
    pub weather_data: WeatherAssessment,
    pub verification_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WeatherAssessment {
    pub assessment_period: DateRange,
    pub location_verified: bool,
    pub data_sources: usize,
    pub consensus_method: String,
    pub weather_summary: WeatherSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WeatherSummary {
    pub average_temperature: f64,
    pub max_temperature: f64,
    pub min_temperature: f64,
    pub total_precipitation: f64,
    pub max_wind_speed: f64,
    pub extreme_events: Vec<ExtremeEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtremeEvent {
    pub date: DateTime<Utc>,
    pub event_type: WeatherPeril,
    pub severity: String,
    pub description: String,
}

impl InsurancePolicy {
    pub fn validate(&self) -> Result<(), OracleError> {
        if self.policy_id.is_empty() {
            return Err(OracleError::BadRequest("missing policy id".to_string()));
        }
        self.location.validate()?;
        if !(self.coverage_amount.is_finite() && self.coverage_amount > 0.0) {
            return Err(OracleError::BadRequest(format!(
                "coverage amount must be positive, got {}",
                self.coverage_amount
            )));
        }
        if !(self.premium.is_finite() && self.premium >= 0.0) {
            return Err(OracleError::BadRequest(format!(
                "premium must be non-negative, got {}",
                self.premium
            )));
        }
        if self.start_date > self.end_date {
            return Err(OracleError::BadRequest(
                "policy start date is after end date".to_string(),
            ));
        }
        if self.triggers.is_empty() {
            return Err(OracleError::BadRequest(
                "policy has no triggers".to_string(),
            ));
        }
        for trigger in &self.triggers {
            if !(0.0..=1.0).contains(&trigger.payout_ratio) {
                return Err(OracleError::BadRequest(format!(
                    "trigger {} payout ratio {} outside [0, 1]",
                    trigger.trigger_id, trigger.payout_ratio
                )));
            }
            if !trigger.conditions.has_bounds() {
                return Err(OracleError::BadRequest(format!(
                    "trigger {} sets no weather bounds",
                    trigger.trigger_id
                )));
            }
            if let Some(window) = &trigger.conditions.time_window {
                if !(1..=12).contains(&window.start_month) || !(1..=12).contains(&window.end_month)
                {
                    return Err(OracleError::BadRequest(format!(
                        "trigger {} month window outside 1..12",
                        trigger.trigger_id
                    )));
                }
                for hour in [window.start_hour, window.end_hour].into_iter().flatten() {
                    if hour > 23 {
                        return Err(OracleError::BadRequest(format!(
                            "trigger {} hour window outside 0..23",
                            trigger.trigger_id
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Predefined product trigger presets.
pub fn product_templates() -> Vec<(&'static str, InsuranceType, Vec<InsuranceTrigger>)> {
    vec![
        (
            "crop_heat_protection",
            InsuranceType::Crop,
            vec![
                InsuranceTrigger {
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
                    description: "Heat stress protection for crops".to_string(),
                },
                InsuranceTrigger {
                    trigger_id: "extreme-heat".to_string(),
                    peril: WeatherPeril::HeatWave,
                    conditions: TriggerConditions {
                        temperature_max: Some(40.0),
                        consecutive_days: 2,
                        ..Default::default()
                    },
                    payout_ratio: 1.0,
                    description: "Extreme heat protection".to_string(),
                },
            ],
        ),
        (
            "event_weather_insurance",
            InsuranceType::Event,
            vec![
                InsuranceTrigger {
                    trigger_id: "rainout".to_string(),
                    peril: WeatherPeril::ExcessRain,
                    conditions: TriggerConditions {
                        precipitation_min: Some(50.0),
                        time_window: Some(TimeWindow {
                            start_month: 1,
                            end_month: 12,
                            start_hour: Some(8),
                            end_hour: Some(20),
                        }),
                        ..Default::default()
                    },
                    payout_ratio: 1.0,
                    description: "Event cancellation due to rain".to_string(),
                },
                InsuranceTrigger {
                    trigger_id: "high-wind".to_string(),
                    peril: WeatherPeril::HighWind,
                    conditions: TriggerConditions {
                        wind_speed_min: Some(16.7),
                        ..Default::default()
                    },
                    payout_ratio: 1.0,
                    description: "Event cancellation due to high winds".to_string(),
                },
            ],
        ),
        (
            "travel_delay_insurance",
            InsuranceType::Travel,
            vec![InsuranceTrigger {
                trigger_id: "cold-delay".to_string(),
                peril: WeatherPeril::ColdSnap,
                conditions: TriggerConditions {
                    temperature_min: Some(-10.0),
                    ..Default::default()
                },
                payout_ratio: 0.2,
                description: "Flight delays due to extreme cold".to_string(),
            }],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_policy() -> InsurancePolicy {
        InsurancePolicy {
            policy_id: "POL-001".to_string(),
            policy_holder: "0xabc".to_string(),
            insurance_type: InsuranceType::Crop,
            location: GeoPoint::new(48.85, 2.35),
            coverage_amount: 100_000.0,
            premium: 1_000.0,
            start_date: "2024-06-01T00:00:00Z".parse().unwrap(),
            end_date: "2024-09-30T00:00:00Z".parse().unwrap(),
            triggers: vec![InsuranceTrigger {
                trigger_id: "tg-1".to_string(),
                peril: WeatherPeril::HeatWave,
                conditions: TriggerConditions {
                    temperature_max: Some(35.0),
                    ..Default::default()
                },
                payout_ratio: 0.5,
                description: String::new(),
            }],
        }
    }

    #[test]
    fn test_policy_validation() {
        assert!(base_policy().validate().is_ok());

        let mut p = base_policy();
        p.coverage_amount = 0.0;
        assert!(p.validate().is_err());

        let mut p = base_policy();
        p.triggers.clear();
        assert!(p.validate().is_err());

        let mut p = base_policy();
        p.triggers[0].payout_ratio = 1.5;
        assert!(p.validate().is_err());

        let mut p = base_policy();
        p.triggers[0].conditions = TriggerConditions::default();
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_time_window_wraps() {
        let window = TimeWindow {
            start_month: 11,
            end_month: 2,
            start_hour: None,
            end_hour: None,
        };
        assert!(window.contains_month(12));
        assert!(window.contains_month(1));
        assert!(!window.contains_month(3));
    }

    #[test]
    fn test_peril_serializes_snake_case() {
        let json = serde_json::to_string(&WeatherPeril::HeatWave).unwrap();
        assert_eq!(json, "\"heat_wave\"");
        assert_eq!(WeatherPeril::LowWind.as_str(), "low_wind");
    }

    #[test]
    fn test_templates_validate() {
        for (name, insurance_type, triggers) in product_templates() {
            let mut policy = base_policy();
            policy.insurance_type = insurance_type;
            policy.triggers = triggers;
            assert!(policy.validate().is_ok(), "template {} invalid", name);
        }
    }
}
