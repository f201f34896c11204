use crate::config::OutputConfig;
use crate::error::Result;
use crate::report::{RunMetadata, RunSummary};
use async_trait::async_trait;
use indicatif::MultiProgress;
use std::path::PathBuf;
use std::sync::Arc;

pub mod console;
pub mod csv;
pub mod json;

pub use console::ConsoleReport;
pub use csv::CsvReport;
pub use json::JsonReport;

/// Destination for finished run summaries.
#[async_trait]
pub trait ReportWriter: Send + Sync {
    /// Persists one run. Returns the file written, if the writer uses files.
    async fn write(&mut self, metadata: &RunMetadata, summary: &RunSummary) -> Result<Option<PathBuf>>;

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

pub fn create_writer(config: &OutputConfig, multi: Option<Arc<MultiProgress>>) -> Result<Box<dyn ReportWriter>> {
    let writer: Box<dyn ReportWriter> = match config {
        OutputConfig::Console => Box::new(ConsoleReport::new(multi)),
        OutputConfig::Csv { dir } => Box::new(CsvReport::new(dir)?),
        OutputConfig::Json { dir } => Box::new(JsonReport::new(dir)?),
    };
    Ok(writer)
}
