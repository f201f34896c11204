//! Post-run aggregation of recorded results.
//!
//! Everything here is a pure view over the result list; nothing is fed back
//! into a running test.

use crate::config::RunConfig;
use crate::record::{Outcome, RequestResult};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

const MIN_WALL_CLOCK: Duration = Duration::from_millis(1);

/// Facts about a run that are not derivable from its results.
#[derive(Debug, Clone)]
pub struct RunMetadata {
    pub test_name: String,
    pub target_rpm: f64,
    pub interval: Duration,
    pub duration: Duration,
    pub expected_requests: u64,
    pub wall_clock: Duration,
    pub started_at: DateTime<Local>,
}

impl RunMetadata {
    pub fn new(config: &RunConfig, wall_clock: Duration, started_at: DateTime<Local>) -> Self {
        Self {
            test_name: config.test_name.clone(),
            target_rpm: config.target_rate_per_minute,
            interval: config.interval(),
            duration: config.duration,
            expected_requests: config.expected_requests(),
            wall_clock,
            started_at,
        }
    }

    /// `<YYYYmmdd_HHMMSS>_<test>_EvenRPM<rate>_<duration>s.<ext>`
    pub fn report_file_name(&self, extension: &str) -> String {
        format!(
            "{}_{}_EvenRPM{}_{}s.{}",
            self.started_at.format("%Y%m%d_%H%M%S"),
            self.test_name,
            format_rate(self.target_rpm),
            self.duration.as_secs(),
            extension
        )
    }
}

/// Fixed taxonomy of error messages, matched by substring in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    RateLimited,
    BadRequest,
    Timeout,
    Connection,
    Other,
}

impl ErrorCategory {
    pub fn of(message: &str) -> Self {
        let lower = message.to_lowercase();
        if message.contains("429") {
            ErrorCategory::RateLimited
        } else if message.contains("400") {
            ErrorCategory::BadRequest
        } else if lower.contains("timeout") || lower.contains("timed out") {
            ErrorCategory::Timeout
        } else if lower.contains("connection") {
            ErrorCategory::Connection
        } else {
            ErrorCategory::Other
        }
    }

    /// Buckets a failed result. Outcomes that pin down a bucket win over
    /// whatever digits the message happens to contain.
    pub fn of_result(outcome: Outcome, message: &str) -> Self {
        match outcome {
            Outcome::RateLimited => ErrorCategory::RateLimited,
            Outcome::Timeout => ErrorCategory::Timeout,
            Outcome::TransportError if message.to_lowercase().contains("connection") => {
                ErrorCategory::Connection
            }
            _ => Self::of(message),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::RateLimited => "rate_limited",
            ErrorCategory::BadRequest => "bad_request",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Connection => "connection",
            ErrorCategory::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorCategoryCounts(BTreeMap<ErrorCategory, u64>);

impl ErrorCategoryCounts {
    pub fn record(&mut self, outcome: Outcome, message: &str) {
        *self.0.entry(ErrorCategory::of_result(outcome, message)).or_insert(0) += 1;
    }

    pub fn get(&self, category: ErrorCategory) -> u64 {
        self.0.get(&category).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|count| *count == 0)
    }
}

impl fmt::Display for ErrorCategoryCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let parts: Vec<String> = self
            .0
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(category, count)| format!("{}:{}", category.as_str(), count))
            .collect();
        f.write_str(&parts.join(" | "))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub total: u64,
    pub success: u64,
    pub error: u64,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub achieved_rpm: f64,
    pub total_chars: u64,
    pub error_categories: ErrorCategoryCounts,
    pub outcome_counts: BTreeMap<Outcome, u64>,
}

#[derive(Debug, Clone)]
pub enum Summary {
    NoData,
    Completed(RunSummary),
}

impl Summary {
    pub fn completed(&self) -> Option<&RunSummary> {
        match self {
            Summary::NoData => None,
            Summary::Completed(summary) => Some(summary),
        }
    }
}

pub fn summarize(results: &[RequestResult], metadata: &RunMetadata) -> Summary {
    if results.is_empty() {
        return Summary::NoData;
    }

    let mut success = 0u64;
    let mut latency_total = Duration::ZERO;
    let mut total_chars = 0u64;
    let mut error_categories = ErrorCategoryCounts::default();
    let mut outcome_counts = BTreeMap::new();

    for result in results {
        *outcome_counts.entry(result.outcome).or_insert(0) += 1;
        if result.success {
            success += 1;
            latency_total += result.latency;
            total_chars += result
                .extracted_text
                .as_deref()
                .map(|text| text.chars().count() as u64)
                .unwrap_or(0);
        } else {
            error_categories.record(result.outcome, result.error_message.as_deref().unwrap_or_default());
        }
    }

    let total = results.len() as u64;
    let avg_latency_ms = if success > 0 {
        latency_total.as_nanos() as f64 / success as f64 / 1_000_000.0
    } else {
        0.0
    };
    let wall = metadata.wall_clock.max(MIN_WALL_CLOCK);

    Summary::Completed(RunSummary {
        total,
        success,
        error: total - success,
        success_rate: success as f64 / total as f64 * 100.0,
        avg_latency_ms,
        achieved_rpm: success as f64 * 60.0 / wall.as_secs_f64(),
        total_chars,
        error_categories,
        outcome_counts,
    })
}

/// One persisted line of a run report.
#[derive(Debug, Clone, Serialize)]
pub struct ReportRow {
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "Test Name")]
    pub test_name: String,
    #[serde(rename = "Target RPM")]
    pub target_rpm: f64,
    #[serde(rename = "Interval (s)")]
    pub interval_secs: f64,
    #[serde(rename = "Duration (s)")]
    pub duration_secs: u64,
    #[serde(rename = "Expected Requests")]
    pub expected_requests: u64,
    #[serde(rename = "Actual Duration (s)")]
    pub actual_duration_secs: f64,
    #[serde(rename = "Total Results")]
    pub total: u64,
    #[serde(rename = "Success")]
    pub success: u64,
    #[serde(rename = "Errors")]
    pub error: u64,
    #[serde(rename = "Success Rate (%)")]
    pub success_rate: f64,
    #[serde(rename = "Total Characters")]
    pub total_chars: u64,
    #[serde(rename = "Avg Latency (ms)")]
    pub avg_latency_ms: f64,
    #[serde(rename = "Achieved RPM")]
    pub achieved_rpm: f64,
    #[serde(rename = "Error Summary")]
    pub error_summary: String,
}

impl ReportRow {
    pub fn new(metadata: &RunMetadata, summary: &RunSummary) -> Self {
        Self {
            timestamp: metadata.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            test_name: metadata.test_name.clone(),
            target_rpm: metadata.target_rpm,
            interval_secs: round(metadata.interval.as_secs_f64(), 4),
            duration_secs: metadata.duration.as_secs(),
            expected_requests: metadata.expected_requests,
            actual_duration_secs: round(metadata.wall_clock.as_secs_f64(), 2),
            total: summary.total,
            success: summary.success,
            error: summary.error,
            success_rate: round(summary.success_rate, 2),
            total_chars: summary.total_chars,
            avg_latency_ms: round(summary.avg_latency_ms, 2),
            achieved_rpm: round(summary.achieved_rpm, 2),
            error_summary: summary.error_categories.to_string(),
        }
    }
}

fn round(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn format_rate(rpm: f64) -> String {
    if rpm.fract() == 0.0 {
        format!("{}", rpm as u64)
    } else {
        format!("{}", rpm)
    }
}
