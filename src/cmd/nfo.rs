use std::path::Path;

use anyhow::{Context, Result};

use reelscan::site::nfo::NfoReader;

use super::output::print_nfo;
use crate::OutputFormat;

pub fn cmd_nfo(path: &Path, format: OutputFormat) -> Result<()> {
    let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let data = NfoReader.parse(&text);
    print_nfo(&data, format)
}
