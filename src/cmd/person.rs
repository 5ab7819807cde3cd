use std::path::Path;

use anyhow::Result;

use reelscan::{PersonRecord, Record};

use super::output::print_person;
use super::{add_ids, build_orchestrator, load_config, select_plugins};
use crate::OutputFormat;

pub async fn cmd_person(
    config_path: Option<&Path>,
    name: &str,
    ids: &[String],
    plugins: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(names) = plugins {
        select_plugins(&mut config, names)?;
    }
    let orchestrator = build_orchestrator(&config)?;

    let mut person = PersonRecord::new(name);
    add_ids(person.ids_mut(), ids)?;
    let report = orchestrator.scan_person(&mut person).await;

    print_person(&person, &report, format)
}
