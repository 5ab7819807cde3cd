use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};

use reelscan::{MediaKind, MediaRecord, Record};

use super::output::print_media;
use super::{add_ids, build_orchestrator, load_config, select_plugins};
use crate::OutputFormat;

/// What the user knows about the record before scanning.
pub struct ScanRequest {
    pub title: String,
    pub year: Option<u32>,
    pub original_title: Option<String>,
    pub tv: bool,
    pub ids: Vec<String>,
    pub nfo: Option<PathBuf>,
}

impl ScanRequest {
    fn record(&self) -> Result<MediaRecord> {
        let mut record = MediaRecord::new(self.title.as_str());
        if let Some(year) = self.year {
            record = record.with_year(year);
        }
        if let Some(original) = &self.original_title {
            record = record.with_original_title(original.as_str());
        }
        if self.tv {
            record = record.with_kind(MediaKind::TvShow);
        }
        add_ids(record.ids_mut(), &self.ids)?;
        Ok(record)
    }
}

pub async fn cmd_scan(
    config_path: Option<&Path>,
    request: ScanRequest,
    plugins: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(names) = plugins {
        select_plugins(&mut config, names)?;
    }
    let orchestrator = build_orchestrator(&config)?;
    let mut record = request.record()?;

    if let Some(path) = &request.nfo {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let found = orchestrator.scan_companion(&mut record, &text);
        tracing::debug!(found, nfo = %path.display(), "companion file applied");
    }

    let start = Instant::now();
    let report = orchestrator.scan_media(&mut record).await;
    tracing::info!(elapsed_ms = start.elapsed().as_millis(), "scan finished");

    print_media(&record, &report, format)
}
