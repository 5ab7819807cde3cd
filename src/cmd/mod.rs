pub mod nfo;
pub mod output;
pub mod person;
pub mod plugins;
pub mod scan;

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};

use reelscan::plugin::{load_chain_config, ChainConfig, ScanSession};
use reelscan::{IdMap, ScanOrchestrator, SourceClient, SourceIdentifier, SourceRegistry};

/// Chain config from `path`, or the default location.
pub fn load_config(path: Option<&Path>) -> Result<ChainConfig> {
    match path {
        Some(path) => ChainConfig::load_from(path),
        None => load_chain_config(),
    }
}

/// Keep only the named plugins (and the fallbacks they delegate to).
pub fn select_plugins(config: &mut ChainConfig, names: &str) -> Result<()> {
    let wanted: Vec<&str> = names.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
    if wanted.is_empty() {
        bail!("--plugins needs at least one plugin name");
    }

    let mut keep = HashSet::new();
    for name in &wanted {
        let Some(entry) = config.plugin(name) else {
            let configured: Vec<_> = config.plugins.iter().map(|p| p.name.as_str()).collect();
            bail!("unknown plugin '{name}' (configured: {})", configured.join(", "));
        };
        keep.insert(entry.name.clone());
        keep.extend(entry.fallbacks.iter().cloned());
    }
    config.plugins.retain(|p| keep.contains(&p.name));
    Ok(())
}

pub fn build_orchestrator(config: &ChainConfig) -> Result<ScanOrchestrator> {
    let registry = SourceRegistry::from_config(config)?;
    let client = SourceClient::with_gate(config.gate()).context("failed to create HTTP client")?;
    let session = ScanSession::new(client, config.policy());
    Ok(ScanOrchestrator::new(session, registry.build_chain(config)?))
}

/// Parse `source:id` arguments into `ids`.
pub fn add_ids(ids: &mut IdMap, args: &[String]) -> Result<()> {
    for arg in args {
        let Some((source, id)) = arg.split_once(':') else {
            bail!("invalid id '{arg}', expected source:id");
        };
        if !ids.insert(SourceIdentifier::new(source.trim(), id.trim())) {
            bail!("conflicting or empty id '{arg}'");
        }
    }
    Ok(())
}
