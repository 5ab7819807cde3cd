//! [`SourcePlugin`] backed by an external binary.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::cache::CacheKey;
use crate::error::PluginError;
use crate::merge::{FieldUpdates, MergeSummary};
use crate::model::{
    Field, FieldSource, FieldValue, IdMap, MediaKind, MediaRecord, PersonRecord, Record, SourceIdentifier,
};
use crate::resolve::{self, Candidate, SearchQuery, YearFilter};

use super::config::PluginConfig;
use super::{ScanSession, SourcePlugin};

/// Time allowed for one plugin invocation.
pub const PLUGIN_TIMEOUT: Duration = Duration::from_secs(30);

/// JSON sent to the plugin on stdin.
#[derive(Serialize)]
struct PluginRequest<'a> {
    op: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    record: Option<RecordView<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    query: Option<&'a SearchQuery>,
    /// Another source's id to translate.
    #[serde(skip_serializing_if = "Option::is_none")]
    xref: Option<&'a SourceIdentifier>,
}

impl<'a> PluginRequest<'a> {
    fn new(op: &'a str) -> Self {
        Self {
            op,
            record: None,
            query: None,
            xref: None,
        }
    }

    fn with_record(op: &'a str, record: RecordView<'a>) -> Self {
        Self {
            record: Some(record),
            ..Self::new(op)
        }
    }
}

/// What a plugin sees of a record: the lookup keys, never the field store.
#[derive(Serialize)]
struct RecordView<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    original_title: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    year: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<MediaKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    ids: &'a IdMap,
}

impl<'a> RecordView<'a> {
    fn media(record: &'a MediaRecord) -> Self {
        Self {
            title: record.title(),
            original_title: record.original_title(),
            year: record.year(),
            kind: Some(record.kind),
            name: None,
            ids: record.ids(),
        }
    }

    fn person(person: &'a PersonRecord) -> Self {
        Self {
            title: None,
            original_title: None,
            year: None,
            kind: None,
            name: person.name(),
            ids: person.ids(),
        }
    }
}

fn native_id(id: Option<String>) -> Option<String> {
    id.filter(|id| !id.trim().is_empty())
}

/// JSON expected from the plugin on stdout. Every member is optional.
#[derive(Deserialize, Default, Debug)]
struct PluginResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    fields: Map<String, Value>,
    #[serde(default)]
    ratings: HashMap<String, u32>,
    /// Ids of other sources discovered on the way.
    #[serde(default)]
    ids: HashMap<String, String>,
}

/// Runs an external plugin binary as a [`SourcePlugin`].
///
/// Each operation spawns the binary once, writes one request to stdin and
/// reads one response from stdout within [`PLUGIN_TIMEOUT`].
#[derive(Debug)]
pub struct ExternalPlugin {
    config: PluginConfig,
    binary: PathBuf,
    id_pattern: Option<Regex>,
}

impl ExternalPlugin {
    /// Create a runner from a chain entry.
    ///
    /// # Errors
    ///
    /// Returns an error if no binary is configured or `id_pattern` is not a valid regex.
    pub fn new(config: PluginConfig) -> anyhow::Result<Self> {
        let binary = config
            .binary
            .clone()
            .ok_or_else(|| anyhow!("plugin '{}' has no binary", config.name))?;
        let id_pattern = config
            .id_pattern
            .as_deref()
            .map(|p| {
                Regex::new(p).with_context(|| format!("invalid id_pattern '{p}' in plugin '{}'", config.name))
            })
            .transpose()?;

        Ok(Self {
            config,
            binary,
            id_pattern,
        })
    }

    async fn call(&self, request: &PluginRequest<'_>) -> Result<PluginResponse, PluginError> {
        let name = &self.config.name;
        if !self.binary.exists() {
            return Err(PluginError::NotConfigured(format!(
                "plugin '{name}' binary at {}",
                self.binary.display()
            )));
        }

        let input = serde_json::to_vec(request)?;
        debug!(plugin = %name, op = request.op, "invoking external plugin");

        let mut child = Command::new(&self.binary)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn plugin '{name}'"))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A plugin may exit without reading its input.
            if let Err(e) = stdin.write_all(&input).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(anyhow!(e)
                        .context(format!("failed to write to plugin '{name}' stdin"))
                        .into());
                }
            }
        }

        let output = tokio::time::timeout(PLUGIN_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| anyhow!("plugin '{name}' timed out after {}s", PLUGIN_TIMEOUT.as_secs()))?
            .with_context(|| format!("plugin '{name}' failed"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("plugin '{name}' exited with {}: {}", output.status, stderr.trim()).into());
        }

        let stdout = String::from_utf8(output.stdout)
            .with_context(|| format!("plugin '{name}' output is not valid UTF-8"))?;
        if stdout.trim().is_empty() {
            return Ok(PluginResponse::default());
        }
        serde_json::from_str(&stdout).map_err(|e| {
            PluginError::parse(format!(
                "plugin '{name}' returned invalid JSON ({e}): {}",
                stdout.chars().take(200).collect::<String>()
            ))
        })
    }

    /// Ask the binary for an id directly; the answer is cached per request.
    async fn direct_resolve(
        &self,
        session: &ScanSession,
        request: PluginRequest<'_>,
    ) -> Result<Option<String>, PluginError> {
        let key = CacheKey::new(self.name(), request.op, serde_json::to_string(&request.record)?);
        session
            .cache()
            .get_or_fetch(key, || async {
                let response = self.call(&request).await?;
                Ok::<_, PluginError>(native_id(response.id))
            })
            .await
    }

    /// Turn the loosely-typed `fields` object into typed updates.
    fn updates(&self, fields: &Map<String, Value>) -> FieldUpdates {
        let mut updates = FieldUpdates::new(FieldSource::plugin(self.name()));
        for (key, value) in fields {
            let Ok(field) = key.parse::<Field>() else {
                warn!(plugin = %self.config.name, field = %key, "unknown field from plugin");
                continue;
            };
            match FieldValue::from_json(field, value) {
                Some(value) => {
                    updates.set(field, value);
                }
                None => warn!(plugin = %self.config.name, %field, "unusable value from plugin"),
            }
        }
        updates
    }

    fn absorb_ids<R: Record>(&self, record: &mut R, ids: HashMap<String, String>) {
        for (source, id) in ids {
            if !record.ids_mut().insert(SourceIdentifier::new(source.clone(), id)) {
                debug!(plugin = %self.config.name, %source, "ignoring conflicting id");
            }
        }
    }
}

#[async_trait]
impl SourcePlugin for ExternalPlugin {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn cross_references(&self) -> Vec<&str> {
        self.config.cross_references.iter().map(String::as_str).collect()
    }

    fn trusts_search_order(&self) -> bool {
        self.config.trust_search_order
    }

    async fn search(&self, _session: &ScanSession, query: &SearchQuery) -> Result<Vec<Candidate>, PluginError> {
        let request = PluginRequest {
            query: Some(query),
            ..PluginRequest::new("search")
        };
        Ok(self.call(&request).await?.candidates)
    }

    async fn lookup_by_xref(
        &self,
        _session: &ScanSession,
        source: &str,
        id: &str,
    ) -> Result<Option<String>, PluginError> {
        let other = SourceIdentifier::new(source, id);
        let request = PluginRequest {
            xref: Some(&other),
            ..PluginRequest::new("xref")
        };
        Ok(native_id(self.call(&request).await?.id))
    }

    /// The binary may answer `resolve` itself; otherwise its `xref` and
    /// `search` answers go through the shared resolver.
    async fn resolve(
        &self,
        session: &ScanSession,
        record: &MediaRecord,
    ) -> Result<Option<SourceIdentifier>, PluginError> {
        if let Some(existing) = record.ids().identifier(self.name()) {
            return Ok(Some(existing));
        }
        let request = PluginRequest::with_record("resolve", RecordView::media(record));
        if let Some(id) = self.direct_resolve(session, request).await? {
            return Ok(Some(SourceIdentifier::new(self.name(), id)));
        }
        resolve::resolve_media(self, session, record).await
    }

    async fn scan_media(&self, session: &ScanSession, record: &mut MediaRecord) -> Result<MergeSummary, PluginError> {
        if !record.ids().contains(self.name()) {
            return Ok(MergeSummary::default());
        }
        let response = self
            .call(&PluginRequest::with_record("scan_media", RecordView::media(record)))
            .await?;

        for (source, score) in &response.ratings {
            if source == self.name() {
                record.set_rating(source, *score);
            } else {
                debug!(plugin = %self.config.name, %source, "ignoring rating for another source");
            }
        }
        let updates = self.updates(&response.fields);
        self.absorb_ids(record, response.ids);
        Ok(session.apply(record, updates)?)
    }

    async fn search_person(&self, _session: &ScanSession, name: &str) -> Result<Vec<Candidate>, PluginError> {
        let query = SearchQuery::new(name, YearFilter::Any, MediaKind::Movie);
        let request = PluginRequest {
            query: Some(&query),
            ..PluginRequest::new("search_person")
        };
        Ok(self.call(&request).await?.candidates)
    }

    async fn resolve_person(
        &self,
        session: &ScanSession,
        person: &PersonRecord,
    ) -> Result<Option<SourceIdentifier>, PluginError> {
        if let Some(existing) = person.ids().identifier(self.name()) {
            return Ok(Some(existing));
        }
        let request = PluginRequest::with_record("resolve_person", RecordView::person(person));
        if let Some(id) = self.direct_resolve(session, request).await? {
            return Ok(Some(SourceIdentifier::new(self.name(), id)));
        }
        resolve::resolve_person(self, session, person).await
    }

    async fn scan_person(&self, session: &ScanSession, person: &mut PersonRecord) -> Result<MergeSummary, PluginError> {
        if !person.ids().contains(self.name()) {
            return Ok(MergeSummary::default());
        }
        let response = self
            .call(&PluginRequest::with_record("scan_person", RecordView::person(person)))
            .await?;
        let updates = self.updates(&response.fields);
        self.absorb_ids(person, response.ids);
        Ok(session.apply(person, updates)?)
    }

    fn scan_companion_file(&self, text: &str, record: &mut MediaRecord) -> bool {
        let Some(pattern) = &self.id_pattern else {
            return false;
        };
        let Some(id) = pattern
            .captures(text)
            .and_then(|caps| caps.get(1).or_else(|| caps.get(0)))
        else {
            return false;
        };
        record
            .ids_mut()
            .insert(SourceIdentifier::new(self.name(), id.as_str()))
    }
}
