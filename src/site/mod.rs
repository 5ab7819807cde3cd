//! Built-in sources and the registry that turns configuration into a chain.
//!
//! # Architecture
//!
//! - [`imdb::ImdbPlugin`]: IMDb pages and suggestion search
//! - [`tmdb::TmdbPlugin`]: TheMovieDb REST API
//! - [`nfo::NfoReader`]: user values and ids from sidecar files
//! - [`SourceRegistry`]: name → plugin lookup, chain construction
//!
//! # Example
//!
//! ```rust,no_run
//! use reelscan::plugin::{ChainConfig, ScanSession};
//! use reelscan::site::SourceRegistry;
//! use reelscan::{MediaRecord, ScanOrchestrator, SourceClient};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ChainConfig::default_chain();
//! let registry = SourceRegistry::from_config(&config)?;
//! let session = ScanSession::new(SourceClient::with_gate(config.gate())?, config.policy());
//! let orchestrator = ScanOrchestrator::new(session, registry.build_chain(&config)?);
//!
//! let mut record = MediaRecord::new("Heat").with_year(1995);
//! let report = orchestrator.scan_media(&mut record).await;
//! println!("{:?} {:?}", record.plot(), report.contributors());
//! # Ok(())
//! # }
//! ```

pub mod imdb;
pub mod nfo;
pub mod tmdb;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::orchestrator::ChainEntry;
use crate::plugin::{ChainConfig, DelegatingPlugin, ExternalPlugin, SourcePlugin};

/// Sources usable in the chain without a `binary`.
pub const BUILTIN_SOURCES: &[&str] = &[imdb::NAME, tmdb::NAME];

/// Looks plugins up by name.
///
/// Registration order is kept; a later plugin with the same name replaces
/// an earlier one in place.
#[derive(Default)]
pub struct SourceRegistry {
    plugins: Vec<Arc<dyn SourcePlugin>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in source plus the external plugins `config` declares.
    ///
    /// # Errors
    ///
    /// Returns an error if an external plugin entry is invalid.
    pub fn from_config(config: &ChainConfig) -> Result<Self> {
        let mut registry = Self::new();

        let imdb_settings = config.source(imdb::NAME);
        registry.register(Arc::new(imdb::ImdbPlugin::new(imdb_settings.language)));
        let tmdb_settings = config.source(tmdb::NAME);
        registry.register(Arc::new(tmdb::TmdbPlugin::new(
            tmdb_settings.api_key,
            tmdb_settings.language,
        )));

        for plugin in config.plugins.iter().filter(|p| p.is_external()) {
            let external = ExternalPlugin::new(plugin.clone())
                .with_context(|| format!("failed to load plugin '{}'", plugin.name))?;
            registry.register(Arc::new(external));
        }
        Ok(registry)
    }

    pub fn register(&mut self, plugin: Arc<dyn SourcePlugin>) {
        match self.plugins.iter_mut().find(|p| p.name() == plugin.name()) {
            Some(slot) => *slot = plugin,
            None => self.plugins.push(plugin),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SourcePlugin>> {
        self.plugins.iter().find(|p| p.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    fn require(&self, name: &str) -> Result<Arc<dyn SourcePlugin>> {
        self.get(name)
            .with_context(|| format!("no plugin named '{name}' is registered"))
    }

    /// Chain entries in configuration order.
    ///
    /// Entries used only as another entry's `fallbacks` are folded into a
    /// [`DelegatingPlugin`] instead of running on their own.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration names an unregistered plugin.
    pub fn build_chain(&self, config: &ChainConfig) -> Result<Vec<ChainEntry>> {
        let fallback_only = config.fallback_only();
        let mut chain = Vec::new();

        for entry in &config.plugins {
            if fallback_only.contains(entry.name.as_str()) {
                continue;
            }
            let primary = self.require(&entry.name)?;
            let plugin: Arc<dyn SourcePlugin> = if entry.fallbacks.is_empty() {
                primary
            } else {
                let fallbacks = entry
                    .fallbacks
                    .iter()
                    .map(|name| self.require(name))
                    .collect::<Result<Vec<_>>>()?;
                Arc::new(DelegatingPlugin::new(primary, fallbacks))
            };

            chain.push(ChainEntry {
                plugin,
                fallback_for: entry.fallback_for.clone(),
                depends_on: entry.depends_on.clone(),
            });
        }
        Ok(chain)
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("plugins", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_registers_builtin_sources() {
        let registry = SourceRegistry::from_config(&ChainConfig::default_chain()).unwrap();
        assert_eq!(registry.names(), vec!["imdb", "themoviedb"]);
        assert_eq!(registry.len(), BUILTIN_SOURCES.len());
    }

    #[test]
    fn default_chain_runs_imdb_then_tmdb() {
        let config = ChainConfig::default_chain();
        let chain = SourceRegistry::from_config(&config)
            .unwrap()
            .build_chain(&config)
            .unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].name(), "imdb");
        assert_eq!(chain[1].name(), "themoviedb");
        assert_eq!(chain[1].depends_on, vec!["imdb"]);
        assert_eq!(chain[1].plugin.cross_references(), vec!["imdb"]);
    }

    #[test]
    fn fallbacks_are_folded_into_primary() {
        let config = ChainConfig::from_toml(
            r#"
[[plugins]]
name = "imdb"
fallbacks = ["mirror"]

[[plugins]]
name = "mirror"
binary = "/usr/bin/imdb-mirror"

[[plugins]]
name = "themoviedb"
"#,
        )
        .unwrap();
        let registry = SourceRegistry::from_config(&config).unwrap();
        assert!(registry.get("mirror").is_some());

        let chain = registry.build_chain(&config).unwrap();
        let names: Vec<_> = chain.iter().map(ChainEntry::name).collect();
        assert_eq!(names, vec!["imdb", "themoviedb"]);
    }

    #[test]
    fn external_plugin_with_bad_pattern_fails_to_load() {
        let config = ChainConfig::from_toml(
            r#"
[[plugins]]
name = "ofdb"
binary = "/usr/bin/ofdb"
id_pattern = "(unclosed"
"#,
        )
        .unwrap();
        assert!(SourceRegistry::from_config(&config).is_err());
    }

    #[test]
    fn register_replaces_same_name() {
        let mut registry = SourceRegistry::new();
        registry.register(Arc::new(imdb::ImdbPlugin::default()));
        registry.register(Arc::new(imdb::ImdbPlugin::new(Some("de".into()))));
        assert_eq!(registry.len(), 1);
    }
}
