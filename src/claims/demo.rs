//! Demo weather series
//!
//! Deterministic daily observation series used by demo-mode claim requests
//! and tests. Three sources per day with a small per-source variation so the
//! consensus path has something to chew on.

use chrono::{DateTime, Duration, Utc};

use crate::types::Observation;

const DEMO_SOURCES: [&str; 3] = ["OpenMeteo", "WeatherAPI", "VisualCrossing"];

/// Generate `days` days of observations starting at `start`, following a
/// named scenario: `heat_wave`, `cold_snap` or `normal`.
pub fn generate_scenario(scenario: &str, days: u32, start: DateTime<Utc>) -> Vec<Observation> {
    let mut observations = Vec::with_capacity(days as usize * DEMO_SOURCES.len());

    for i in 0..days {
        let day = i as f64;
        let measured_at = start + Duration::days(i as i64);

        let temp = match scenario {
            // Five consecutive days above 35°C in the middle of the window.
            "heat_wave" => {
                if (2..=6).contains(&i) {
                    36.0 + (day - 2.0) * 1.5 + day.sin() * 2.0
                } else {
                    28.0 + day.sin() * 3.0
                }
            }
            "cold_snap" => {
                if (3..=5).contains(&i) {
                    -12.0 - (day - 3.0) * 2.0
                } else {
                    5.0 + day.sin() * 3.0
                }
            }
            "normal" => 20.0 + (day * 0.5).sin() * 5.0,
            _ => 22.0,
        };

        for source in DEMO_SOURCES {
            observations.push(Observation {
                source: source.to_string(),
                measured_at,
                temperature_c: temp + (day + source.len() as f64).sin() * 0.5,
                humidity_pct: Some(55.0 + day.sin() * 10.0),
                wind_mps: Some(4.0 + day.cos().abs() * 3.0),
                precip_mm: Some(0.0),
                pressure_hpa: Some(1013.0),
                confidence: 0.9 + day.sin() * 0.05,
                signature: format!("sig-{}-{}", source, i).into_bytes(),
            });
        }
    }

    observations
}
