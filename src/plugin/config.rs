//! Chain configuration loaded from `~/.config/reelscan/plugins.toml`.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::gate::{HostGate, HostLimits};
use crate::merge::{FieldRule, OverridePolicy};
use crate::model::Field;
use crate::site::BUILTIN_SOURCES;

fn default_concurrency() -> usize {
    4
}

/// Configuration for one chain entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PluginConfig {
    /// Source name; built-in sources need nothing else.
    pub name: String,
    /// Path to an external plugin binary.
    #[serde(default)]
    pub binary: Option<PathBuf>,
    /// Extra arguments passed to the binary.
    #[serde(default)]
    pub args: Vec<String>,
    /// Only run when the named plugin did not resolve.
    #[serde(default)]
    pub fallback_for: Option<String>,
    /// Re-run when one of these plugins changes the title.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Fields this plugin may overwrite whatever their current source.
    #[serde(default)]
    pub overwrite: Vec<Field>,
    /// Sources consulted when this one cannot resolve or scan a record.
    #[serde(default)]
    pub fallbacks: Vec<String>,
    /// Sources whose ids an external plugin can translate.
    #[serde(default)]
    pub cross_references: Vec<String>,
    /// Regex locating an external plugin's id in companion files.
    #[serde(default)]
    pub id_pattern: Option<String>,
    /// Take the first search hit when no title matches.
    #[serde(default)]
    pub trust_search_order: bool,
}

impl PluginConfig {
    pub fn builtin(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn is_external(&self) -> bool {
        self.binary.is_some()
    }
}

/// `[scan]` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ScanSettings {
    /// Records scanned at the same time by `scan_many`.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

/// `[sources.<name>]` table for built-in sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SourceSettings {
    #[serde(default)]
    pub api_key: Option<String>,
    /// Preferred metadata language, e.g. `en-US` or `de`.
    #[serde(default)]
    pub language: Option<String>,
}

/// The whole configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChainConfig {
    #[serde(default)]
    pub scan: ScanSettings,
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
    #[serde(default)]
    pub fields: HashMap<Field, FieldRule>,
    /// Per-host limits; the `"*"` entry replaces the defaults.
    #[serde(default)]
    pub hosts: HashMap<String, HostLimits>,
    #[serde(default)]
    pub sources: HashMap<String, SourceSettings>,
}

impl ChainConfig {
    /// Built-in chain used when no configuration file exists.
    pub fn default_chain() -> Self {
        let mut tmdb = PluginConfig::builtin("themoviedb");
        tmdb.depends_on.push("imdb".to_string());
        Self {
            plugins: vec![PluginConfig::builtin("imdb"), tmdb],
            ..Self::default()
        }
    }

    /// Parse and validate TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid TOML or an inconsistent chain.
    pub fn from_toml(text: &str) -> Result<Self> {
        let mut config: ChainConfig = toml::from_str(text).context("invalid chain configuration")?;
        if config.plugins.is_empty() {
            config.plugins = Self::default_chain().plugins;
        }
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("invalid config in {}", path.display()))
    }

    /// Check references between chain entries.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }

        let mut names = HashSet::new();
        for plugin in &self.plugins {
            if !names.insert(plugin.name.as_str()) {
                return Err(ConfigError::DuplicatePlugin(plugin.name.clone()));
            }
            if !plugin.is_external() && !BUILTIN_SOURCES.contains(&plugin.name.as_str()) {
                return Err(ConfigError::UnknownSource(plugin.name.clone()));
            }
        }

        for plugin in &self.plugins {
            let references = plugin
                .depends_on
                .iter()
                .chain(plugin.fallback_for.iter())
                .chain(plugin.fallbacks.iter());
            for target in references {
                if *target == plugin.name {
                    return Err(ConfigError::SelfReference(plugin.name.clone()));
                }
                let known = names.contains(target.as_str()) || BUILTIN_SOURCES.contains(&target.as_str());
                if !known {
                    return Err(ConfigError::UnknownReference {
                        plugin: plugin.name.clone(),
                        target: target.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Names of entries that only serve as another entry's fallback.
    pub fn fallback_only(&self) -> HashSet<&str> {
        self.plugins
            .iter()
            .flat_map(|p| p.fallbacks.iter().map(String::as_str))
            .collect()
    }

    pub fn plugin(&self, name: &str) -> Option<&PluginConfig> {
        self.plugins.iter().find(|p| p.name == name)
    }

    pub fn source(&self, name: &str) -> SourceSettings {
        self.sources.get(name).cloned().unwrap_or_default()
    }

    /// Override rules from `[fields.*]` and each plugin's `overwrite` list.
    pub fn policy(&self) -> OverridePolicy {
        let mut policy = OverridePolicy::new();
        for (field, rule) in &self.fields {
            policy = policy.with_rule(*field, rule.clone());
        }
        for plugin in &self.plugins {
            if !plugin.overwrite.is_empty() {
                policy = policy.allow_overwrite(&plugin.name, plugin.overwrite.iter().copied());
            }
        }
        policy
    }

    /// Politeness gate from `[hosts.*]`.
    pub fn gate(&self) -> HostGate {
        let defaults = self.hosts.get("*").copied().unwrap_or_default();
        self.hosts
            .iter()
            .filter(|(host, _)| host.as_str() != "*")
            .fold(HostGate::new(defaults), |gate, (host, limits)| gate.with_host(host, *limits))
    }
}

/// Load the chain from `~/.config/reelscan/plugins.toml`.
///
/// Returns the default chain if the file doesn't exist (configuration is optional).
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read, parsed or validated.
pub fn load_chain_config() -> Result<ChainConfig> {
    let path = config_path();
    if !path.exists() {
        return Ok(ChainConfig::default_chain());
    }
    ChainConfig::load_from(&path)
}

/// Return the path to the chain config file.
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("reelscan")
        .join("plugins.toml")
}
