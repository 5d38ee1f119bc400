//! Prometheus metrics
//!
//! Counters, per-phase timers and consensus gauges for the oracle. Exposed
//! as text by the server's `/metrics` endpoint.

use lazy_static::lazy_static;
use prometheus::{
    register_gauge_vec, register_histogram_vec, register_int_counter, register_int_gauge,
    GaugeVec, HistogramVec, IntCounter, IntGauge, TextEncoder,
};

lazy_static! {
    pub static ref TASKS_CREATED: IntCounter = register_int_counter!(
        "weather_oracle_tasks_created_total",
        "Total number of verification tasks created"
    )
    .expect("register tasks_created");
    pub static ref TASKS_COMPLETED: IntCounter = register_int_counter!(
        "weather_oracle_tasks_completed_total",
        "Total number of verification tasks completed"
    )
    .expect("register tasks_completed");
    pub static ref TASKS_FAILED: IntCounter = register_int_counter!(
        "weather_oracle_tasks_failed_total",
        "Total number of verification tasks failed"
    )
    .expect("register tasks_failed");
    pub static ref TASK_DURATION: HistogramVec = register_histogram_vec!(
        "weather_oracle_task_duration_seconds",
        "Duration of task phases",
        &["phase"]
    )
    .expect("register task_duration");
    pub static ref CONSENSUS_VALUE: GaugeVec = register_gauge_vec!(
        "weather_oracle_consensus_value",
        "Latest consensus value per location",
        &["city"]
    )
    .expect("register consensus_value");
    pub static ref ACTIVE_SOURCES: IntGauge = register_int_gauge!(
        "weather_oracle_active_sources",
        "Number of configured weather sources"
    )
    .expect("register active_sources");
}

pub fn record_task_created() {
    TASKS_CREATED.inc();
}

pub fn record_task_completed() {
    TASKS_COMPLETED.inc();
}

pub fn record_task_failed() {
    TASKS_FAILED.inc();
}

pub fn observe_phase(phase: &str, seconds: f64) {
    TASK_DURATION.with_label_values(&[phase]).observe(seconds);
}

pub fn set_consensus_value(city: &str, value: f64) {
    CONSENSUS_VALUE.with_label_values(&[city]).set(value);
}

pub fn set_active_sources(count: usize) {
    ACTIVE_SOURCES.set(count as i64);
}

/// Render all registered metrics in the Prometheus text format.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    encoder
        .encode_to_string(&prometheus::gather())
        .unwrap_or_default()
}
