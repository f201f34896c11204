use super::ReportWriter;
use crate::error::Result;
use crate::report::{ReportRow, RunMetadata, RunSummary};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// One CSV file per run: a header row and a single data row.
pub struct CsvReport {
    dir: PathBuf,
}

impl CsvReport {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }
}

#[async_trait]
impl ReportWriter for CsvReport {
    async fn write(&mut self, metadata: &RunMetadata, summary: &RunSummary) -> Result<Option<PathBuf>> {
        let path = self.dir.join(metadata.report_file_name("csv"));
        let mut writer = csv::Writer::from_path(&path)?;
        writer.serialize(ReportRow::new(metadata, summary))?;
        writer.flush()?;
        log::info!("Report written to {}", path.display());
        Ok(Some(path))
    }
}
