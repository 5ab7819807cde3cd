use std::path::Path;

use anyhow::Result;
use serde::Serialize;
use serde_json::json;

use reelscan::plugin::ChainConfig;
use reelscan::site::nfo::NfoData;
use reelscan::{Field, FieldValue, IdMap, MediaKind, MediaRecord, PersonRecord, PluginOutcome, Record, ScanReport};

use crate::OutputFormat;

/// Longest value shown in text output before truncation.
const MAX_VALUE: usize = 100;

#[derive(Serialize)]
struct ScanOutput<'a, R> {
    record: &'a R,
    report: &'a ScanReport,
}

pub fn print_media(record: &MediaRecord, report: &ScanReport, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        let out = ScanOutput { record, report };
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let kind = match record.kind {
        MediaKind::Movie => "movie",
        MediaKind::TvShow => "tv",
    };
    match record.year() {
        Some(year) => println!("🎬 {} ({year}) [{kind}]", record.label()),
        None => println!("🎬 {} [{kind}]", record.label()),
    }
    print_ids(record.ids());
    if !record.ratings().is_empty() {
        let ratings: Vec<_> = record.ratings().iter().map(|(s, r)| format!("{s}={r}")).collect();
        println!("   Ratings: {}", ratings.join(", "));
    }
    print_fields(record);
    print_report(report);
    Ok(())
}

pub fn print_person(person: &PersonRecord, report: &ScanReport, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        let out = ScanOutput { record: person, report };
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("👤 {}", person.label());
    print_ids(person.ids());
    print_fields(person);
    print_report(report);
    Ok(())
}

pub fn print_nfo(data: &NfoData, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        let ids: serde_json::Map<_, _> = data.ids.iter().map(|id| (id.source.clone(), json!(id.id))).collect();
        let fields: serde_json::Map<_, _> = data
            .fields
            .iter()
            .map(|(field, value)| (field.name().to_string(), json!(value)))
            .collect();
        println!("{}", serde_json::to_string_pretty(&json!({ "ids": ids, "fields": fields }))?);
        return Ok(());
    }

    if data.is_empty() {
        println!("❌ No ids or values found");
        return Ok(());
    }
    for id in &data.ids {
        println!("🔑 {}: {}", id.source, id.id);
    }
    for (field, value) in &data.fields {
        println!("   {:<16} {}", field.name(), truncate_text(&format_value(value), MAX_VALUE));
    }
    Ok(())
}

pub fn print_chain(config: &ChainConfig, source: &Path, format: OutputFormat) -> Result<()> {
    let fallback_only = config.fallback_only();

    if format == OutputFormat::Json {
        let plugins: Vec<_> = config
            .plugins
            .iter()
            .map(|p| {
                json!({
                    "name": p.name,
                    "external": p.is_external(),
                    "binary": p.binary,
                    "fallback_for": p.fallback_for,
                    "depends_on": p.depends_on,
                    "fallbacks": p.fallbacks,
                    "in_chain": !fallback_only.contains(p.name.as_str()),
                })
            })
            .collect();
        let out = json!({
            "config": source.display().to_string(),
            "concurrency": config.scan.concurrency,
            "plugins": plugins,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("📋 Plugin chain ({})", source.display());
    for (i, plugin) in config.plugins.iter().enumerate() {
        let kind = if plugin.is_external() { "external" } else { "built-in" };
        let mut notes = Vec::new();
        if fallback_only.contains(plugin.name.as_str()) {
            notes.push("fallback only".to_string());
        }
        if let Some(primary) = &plugin.fallback_for {
            notes.push(format!("fallback for {primary}"));
        }
        if !plugin.depends_on.is_empty() {
            notes.push(format!("depends on {}", plugin.depends_on.join(", ")));
        }
        if !plugin.fallbacks.is_empty() {
            notes.push(format!("delegates to {}", plugin.fallbacks.join(", ")));
        }
        if notes.is_empty() {
            println!("   {}. {} ({kind})", i + 1, plugin.name);
        } else {
            println!("   {}. {} ({kind}; {})", i + 1, plugin.name, notes.join("; "));
        }
    }
    Ok(())
}

fn print_ids(ids: &IdMap) {
    if ids.is_empty() {
        return;
    }
    let ids: Vec<_> = ids.iter().map(|(source, id)| format!("{source}={id}")).collect();
    println!("   Ids: {}", ids.join(", "));
}

fn print_fields<R: Record>(record: &R) {
    for (field, slot) in record.fields().iter() {
        // Title is already in the header line
        if matches!(field, Field::Title | Field::Name) {
            continue;
        }
        println!(
            "   {:<16} {:<60} ← {}",
            field.name(),
            truncate_text(&format_value(&slot.value), MAX_VALUE),
            slot.source.name()
        );
    }
}

fn print_report(report: &ScanReport) {
    println!("\nPlugins:");
    for entry in &report.plugins {
        let retriggered = if entry.retriggered { " (re-run)" } else { "" };
        match &entry.outcome {
            PluginOutcome::Contributed { id, accepted } => {
                println!("   ✅ {:<12} {id}, {accepted} fields{retriggered}", entry.plugin);
            }
            PluginOutcome::NotFound => println!("   ➖ {:<12} not found{retriggered}", entry.plugin),
            PluginOutcome::Failed { error } => println!("   ❌ {:<12} {error}{retriggered}", entry.plugin),
            PluginOutcome::Skipped => println!("   ⏭️  {:<12} skipped", entry.plugin),
            PluginOutcome::Cancelled => println!("   ⏹️  {:<12} cancelled", entry.plugin),
        }
    }
    if report.retriggers > 0 {
        println!("   ({} re-triggered)", report.retriggers);
    }
}

fn format_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Text(text) => text.clone(),
        FieldValue::Number(n) => n.to_string(),
        FieldValue::Date(date) => date.to_string(),
        FieldValue::List(items) => items.join(", "),
        FieldValue::Credits(credits) => credits
            .iter()
            .map(|c| match &c.role {
                Some(role) => format!("{} ({role})", c.name),
                None => c.name.clone(),
            })
            .collect::<Vec<_>>()
            .join(", "),
        FieldValue::Filmography(films) => films
            .iter()
            .map(|f| match f.year {
                Some(year) => format!("{} ({year})", f.title),
                None => f.title.clone(),
            })
            .collect::<Vec<_>>()
            .join(", "),
    }
}

fn truncate_text(text: &str, max_chars: usize) -> String {
    let text = text.replace('\n', " ");
    if text.chars().count() <= max_chars {
        return text;
    }
    let cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelscan::Credit;

    #[test]
    fn truncate_text_respects_char_boundaries() {
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("Amélie Poulain", 8), "Améli...");
    }

    #[test]
    fn credits_show_roles() {
        let value = FieldValue::Credits(vec![Credit::new("Al Pacino").with_role("Hanna"), Credit::new("Michael Mann")]);
        assert_eq!(format_value(&value), "Al Pacino (Hanna), Michael Mann");
    }
}
