use super::ReportWriter;
use crate::error::{Error, Result};
use crate::report::{RunMetadata, RunSummary};
use async_trait::async_trait;
use indicatif::MultiProgress;
use std::path::PathBuf;
use std::sync::Arc;

pub struct ConsoleReport {
    multi: Option<Arc<MultiProgress>>,
}

impl ConsoleReport {
    pub fn new(multi: Option<Arc<MultiProgress>>) -> Self {
        Self { multi }
    }
}

impl Default for ConsoleReport {
    fn default() -> Self {
        Self::new(None)
    }
}

pub fn render(metadata: &RunMetadata, summary: &RunSummary) -> Vec<String> {
    vec![
        format!("✅ {} completed:", metadata.test_name),
        format!(
            "   Target: {} rpm for {}s ({} expected)",
            metadata.target_rpm,
            metadata.duration.as_secs(),
            metadata.expected_requests
        ),
        format!("   Actual Duration: {:.1}s", metadata.wall_clock.as_secs_f64()),
        format!(
            "   Results: {} total, {} success, {} errors",
            summary.total, summary.success, summary.error
        ),
        format!("   Success Rate: {:.1}%", summary.success_rate),
        format!("   Average Latency: {:.0}ms", summary.avg_latency_ms),
        format!("   Achieved RPM: {:.1}", summary.achieved_rpm),
        format!("   Characters: {}", summary.total_chars),
        format!("   Errors: {}", summary.error_categories),
    ]
}

#[async_trait]
impl ReportWriter for ConsoleReport {
    async fn write(&mut self, metadata: &RunMetadata, summary: &RunSummary) -> Result<Option<PathBuf>> {
        for line in render(metadata, summary) {
            if let Some(multi) = &self.multi {
                multi.println(line).map_err(|e| Error::Internal(e.to_string()))?;
            } else {
                println!("{}", line);
            }
        }
        Ok(None)
    }
}
