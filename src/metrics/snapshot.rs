use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub dispatched: u64,
    pub skipped: u64,
    pub completed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub in_flight: u64,
    pub abandoned: u64,
    pub success_rate: f64,
    pub avg_latency_ms: u64,
    pub requests_per_minute: f64,
    pub elapsed_seconds: f64,
}
