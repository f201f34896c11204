use super::ReportWriter;
use crate::error::Result;
use crate::record::Outcome;
use crate::report::{ReportRow, RunMetadata, RunSummary};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

#[derive(Serialize)]
struct JsonRecord<'a> {
    #[serde(flatten)]
    row: ReportRow,
    outcomes: &'a BTreeMap<Outcome, u64>,
}

pub struct JsonReport {
    dir: PathBuf,
}

impl JsonReport {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }
}

#[async_trait]
impl ReportWriter for JsonReport {
    async fn write(&mut self, metadata: &RunMetadata, summary: &RunSummary) -> Result<Option<PathBuf>> {
        let path = self.dir.join(metadata.report_file_name("json"));
        let file = File::create(&path)?;
        let record = JsonRecord {
            row: ReportRow::new(metadata, summary),
            outcomes: &summary.outcome_counts,
        };
        serde_json::to_writer_pretty(file, &record)?;
        log::info!("Report written to {}", path.display());
        Ok(Some(path))
    }
}
