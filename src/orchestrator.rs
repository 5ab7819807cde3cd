//! Runs the configured plugin chain over records.
//!
//! Per record, plugins run one after another in chain order:
//!
//! - cancellation is checked before every invocation;
//! - `fallback_for = X` entries are skipped when the record has an id for X;
//! - each plugin resolves, then scans and merges on success;
//! - plugin errors are logged and the plugin counts as not contributing;
//! - when X changes the title, entries with `depends_on = [X]` that already
//!   ran and are still unresolved run again, once per (dependent, X) edge.
//!
//! Records are independent; [`ScanOrchestrator::scan_many`] scans several
//! at once with a bounded number in flight.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::merge::MergeSummary;
use crate::model::{MediaRecord, PersonRecord, Record};
use crate::plugin::{ScanSession, SourcePlugin};
use crate::site::nfo::NfoReader;

/// One plugin in the chain, with its scheduling rules.
#[derive(Clone)]
pub struct ChainEntry {
    pub plugin: Arc<dyn SourcePlugin>,
    pub fallback_for: Option<String>,
    pub depends_on: Vec<String>,
}

impl ChainEntry {
    pub fn new(plugin: Arc<dyn SourcePlugin>) -> Self {
        Self {
            plugin,
            fallback_for: None,
            depends_on: Vec::new(),
        }
    }

    #[must_use]
    pub fn fallback_for(mut self, primary: &str) -> Self {
        self.fallback_for = Some(primary.to_string());
        self
    }

    #[must_use]
    pub fn depends_on(mut self, upstream: &str) -> Self {
        self.depends_on.push(upstream.to_string());
        self
    }

    pub fn name(&self) -> &str {
        self.plugin.name()
    }

    /// Whether `record` carries an id from this entry's plugin or its fallbacks.
    pub fn is_resolved<R: Record>(&self, record: &R) -> bool {
        self.plugin
            .id_sources()
            .iter()
            .any(|source| record.ids().contains(source))
    }
}

impl std::fmt::Debug for ChainEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainEntry")
            .field("plugin", &self.plugin.name())
            .field("fallback_for", &self.fallback_for)
            .field("depends_on", &self.depends_on)
            .finish()
    }
}

/// What one plugin invocation did to the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum PluginOutcome {
    /// Resolved and scanned; `accepted` fields were written.
    Contributed { id: String, accepted: usize },
    NotFound,
    /// Resolution or scanning failed. An id resolved before a scan failure is kept.
    Failed { error: String },
    /// Fallback not needed.
    Skipped,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginReport {
    pub plugin: String,
    pub outcome: PluginOutcome,
    /// Run again because an upstream plugin changed the title.
    pub retriggered: bool,
}

/// Per-plugin outcomes for one record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub plugins: Vec<PluginReport>,
    pub retriggers: usize,
    pub cancelled: bool,
}

impl ScanReport {
    fn push(&mut self, plugin: &str, outcome: PluginOutcome, retriggered: bool) {
        self.plugins.push(PluginReport {
            plugin: plugin.to_string(),
            outcome,
            retriggered,
        });
    }

    /// Latest outcome reported for `plugin`.
    pub fn outcome(&self, plugin: &str) -> Option<&PluginOutcome> {
        self.plugins
            .iter()
            .rev()
            .find(|r| r.plugin == plugin)
            .map(|r| &r.outcome)
    }

    /// Plugins that contributed at least once, in invocation order.
    pub fn contributors(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.plugins
            .iter()
            .filter(|r| matches!(r.outcome, PluginOutcome::Contributed { .. }))
            .map(|r| r.plugin.as_str())
            .filter(|name| seen.insert(*name))
            .collect()
    }

    pub fn failures(&self) -> usize {
        self.plugins
            .iter()
            .filter(|r| matches!(r.outcome, PluginOutcome::Failed { .. }))
            .count()
    }
}

/// Drives a chain of plugins over media and person records.
pub struct ScanOrchestrator {
    session: ScanSession,
    chain: Vec<ChainEntry>,
    nfo: NfoReader,
}

impl ScanOrchestrator {
    pub fn new(session: ScanSession, chain: Vec<ChainEntry>) -> Self {
        Self {
            session,
            chain,
            nfo: NfoReader,
        }
    }

    pub fn session(&self) -> &ScanSession {
        &self.session
    }

    pub fn chain(&self) -> &[ChainEntry] {
        &self.chain
    }

    /// Whether the source called `name` already resolved `record`.
    fn has_resolved<R: Record>(&self, name: &str, record: &R) -> bool {
        match self.chain.iter().find(|entry| entry.name() == name) {
            Some(entry) => entry.is_resolved(record),
            None => record.ids().contains(name),
        }
    }

    /// Apply a sidecar file: user fields and ids from the NFO reader, then
    /// every plugin's own id detection.
    ///
    /// Returns the number of user fields accepted plus ids found.
    pub fn scan_companion(&self, record: &mut MediaRecord, text: &str) -> usize {
        let mut found = match self.nfo.apply(text, record, self.session.policy()) {
            Ok(summary) => summary.accepted,
            Err(e) => {
                warn!(record = record.label(), error = %e, "companion file rejected");
                0
            }
        };
        for entry in &self.chain {
            if entry.plugin.scan_companion_file(text, record) {
                debug!(plugin = entry.name(), "id found in companion file");
                found += 1;
            }
        }
        found
    }

    /// Run the chain over one media record.
    pub async fn scan_media(&self, record: &mut MediaRecord) -> ScanReport {
        let mut report = ScanReport::default();
        let mut attempted: HashSet<usize> = HashSet::new();
        let mut fired: HashSet<(usize, usize)> = HashSet::new();
        let mut queue: VecDeque<(usize, bool)> = (0..self.chain.len()).map(|i| (i, false)).collect();

        while let Some((idx, retriggered)) = queue.pop_front() {
            let entry = &self.chain[idx];

            if self.session.is_cancelled() {
                info!(record = record.label(), "scan cancelled");
                report.cancelled = true;
                report.push(entry.name(), PluginOutcome::Cancelled, retriggered);
                for (rest, again) in queue.drain(..) {
                    report.push(self.chain[rest].name(), PluginOutcome::Cancelled, again);
                }
                break;
            }

            if let Some(primary) = &entry.fallback_for {
                if !retriggered && self.has_resolved(primary, record) {
                    debug!(plugin = entry.name(), %primary, "fallback not needed");
                    report.push(entry.name(), PluginOutcome::Skipped, false);
                    continue;
                }
            }

            let title_before = record.title().map(str::to_owned);
            let outcome = self.invoke_media(entry.plugin.as_ref(), record).await;
            attempted.insert(idx);
            report.push(entry.name(), outcome, retriggered);

            if record.title() == title_before.as_deref() {
                continue;
            }
            debug!(plugin = entry.name(), title = ?record.title(), "title changed");
            for (dep_idx, dependent) in self.chain.iter().enumerate().rev() {
                let eligible = dependent.depends_on.iter().any(|d| d == entry.name())
                    && attempted.contains(&dep_idx)
                    && !dependent.is_resolved(record);
                if eligible && fired.insert((dep_idx, idx)) {
                    info!(plugin = dependent.name(), upstream = entry.name(), "re-running after title change");
                    report.retriggers += 1;
                    queue.push_front((dep_idx, true));
                }
            }
        }

        report
    }

    async fn invoke_media(&self, plugin: &dyn SourcePlugin, record: &mut MediaRecord) -> PluginOutcome {
        let name = plugin.name();
        let id = match plugin.resolve(&self.session, record).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                info!(plugin = name, record = record.label(), "not found");
                return PluginOutcome::NotFound;
            }
            Err(e) => {
                warn!(plugin = name, record = record.label(), error = %e, "resolution failed");
                return PluginOutcome::Failed { error: e.to_string() };
            }
        };

        if !record.ids_mut().insert(id.clone()) {
            warn!(plugin = name, %id, "conflicting identifier, keeping existing one");
        }

        match plugin.scan_media(&self.session, record).await {
            Ok(summary) => {
                log_summary(name, &id.id, summary);
                PluginOutcome::Contributed {
                    id: id.id,
                    accepted: summary.accepted,
                }
            }
            Err(e) => {
                warn!(plugin = name, %id, error = %e, "scan failed");
                PluginOutcome::Failed { error: e.to_string() }
            }
        }
    }

    /// Run the chain over one person record. No re-trigger edges apply.
    pub async fn scan_person(&self, person: &mut PersonRecord) -> ScanReport {
        let mut report = ScanReport::default();

        for (idx, entry) in self.chain.iter().enumerate() {
            if self.session.is_cancelled() {
                report.cancelled = true;
                for rest in &self.chain[idx..] {
                    report.push(rest.name(), PluginOutcome::Cancelled, false);
                }
                break;
            }
            if let Some(primary) = &entry.fallback_for {
                if self.has_resolved(primary, person) {
                    report.push(entry.name(), PluginOutcome::Skipped, false);
                    continue;
                }
            }
            let outcome = self.invoke_person(entry.plugin.as_ref(), person).await;
            report.push(entry.name(), outcome, false);
        }

        report
    }

    async fn invoke_person(&self, plugin: &dyn SourcePlugin, person: &mut PersonRecord) -> PluginOutcome {
        let name = plugin.name();
        let id = match plugin.resolve_person(&self.session, person).await {
            Ok(Some(id)) => id,
            Ok(None) => return PluginOutcome::NotFound,
            Err(e) => {
                warn!(plugin = name, person = person.label(), error = %e, "person resolution failed");
                return PluginOutcome::Failed { error: e.to_string() };
            }
        };
        person.ids_mut().insert(id.clone());

        match plugin.scan_person(&self.session, person).await {
            Ok(summary) => {
                log_summary(name, &id.id, summary);
                PluginOutcome::Contributed {
                    id: id.id,
                    accepted: summary.accepted,
                }
            }
            Err(e) => {
                warn!(plugin = name, %id, error = %e, "person scan failed");
                PluginOutcome::Failed { error: e.to_string() }
            }
        }
    }

    /// Scan independent records, at most `concurrency` at a time.
    ///
    /// Results come back in input order.
    pub async fn scan_many(&self, records: Vec<MediaRecord>, concurrency: usize) -> Vec<(MediaRecord, ScanReport)> {
        stream::iter(records.into_iter().map(|mut record| async move {
            let report = self.scan_media(&mut record).await;
            (record, report)
        }))
        .buffered(concurrency.max(1))
        .collect()
        .await
    }
}

fn log_summary(plugin: &str, id: &str, summary: MergeSummary) {
    info!(
        plugin,
        id,
        accepted = summary.accepted,
        unchanged = summary.unchanged,
        rejected = summary.rejected,
        "scanned"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PluginError;
    use crate::http_client::SourceClient;
    use crate::merge::{FieldUpdates, OverridePolicy};
    use crate::model::{Field, FieldSource, SourceIdentifier};
    use crate::plugin::DelegatingPlugin;
    use crate::resolve::{Candidate, SearchQuery};
    use async_trait::async_trait;

    /// Resolves when the record's title is in `known`, then writes a tagline.
    struct TitleSource {
        name: &'static str,
        known: &'static [&'static str],
    }

    #[async_trait]
    impl SourcePlugin for TitleSource {
        fn name(&self) -> &str {
            self.name
        }

        async fn search(&self, _: &ScanSession, query: &SearchQuery) -> Result<Vec<Candidate>, PluginError> {
            Ok(self
                .known
                .iter()
                .filter(|t| **t == query.title)
                .map(|t| Candidate::new(format!("{}-{t}", self.name), *t))
                .collect())
        }

        async fn scan_media(&self, session: &ScanSession, record: &mut MediaRecord) -> Result<MergeSummary, PluginError> {
            let mut updates = FieldUpdates::new(FieldSource::plugin(self.name));
            updates.set(Field::Tagline, format!("{} tagline", self.name));
            Ok(session.apply(record, updates)?)
        }
    }

    struct Broken;

    #[async_trait]
    impl SourcePlugin for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn search(&self, _: &ScanSession, _: &SearchQuery) -> Result<Vec<Candidate>, PluginError> {
            Err(PluginError::parse("unexpected page layout"))
        }

        async fn scan_media(&self, _: &ScanSession, _: &mut MediaRecord) -> Result<MergeSummary, PluginError> {
            Ok(MergeSummary::default())
        }
    }

    /// Writes a plot, then cancels the run from inside its scan.
    struct Interrupting;

    #[async_trait]
    impl SourcePlugin for Interrupting {
        fn name(&self) -> &str {
            "imdb"
        }

        async fn search(&self, _: &ScanSession, query: &SearchQuery) -> Result<Vec<Candidate>, PluginError> {
            Ok(vec![Candidate::new("tt0113277", query.title.clone())])
        }

        async fn scan_media(&self, session: &ScanSession, record: &mut MediaRecord) -> Result<MergeSummary, PluginError> {
            let mut updates = FieldUpdates::new(FieldSource::plugin("imdb"));
            updates.set(Field::Plot, "A heist goes wrong.");
            let summary = session.apply(record, updates)?;
            session.cancel();
            Ok(summary)
        }
    }

    /// Accepts any title and renames the record.
    struct Retitler;

    #[async_trait]
    impl SourcePlugin for Retitler {
        fn name(&self) -> &str {
            "retitler"
        }

        async fn search(&self, _: &ScanSession, query: &SearchQuery) -> Result<Vec<Candidate>, PluginError> {
            Ok(vec![Candidate::new("r1", query.title.clone())])
        }

        async fn scan_media(&self, session: &ScanSession, record: &mut MediaRecord) -> Result<MergeSummary, PluginError> {
            let mut updates = FieldUpdates::new(FieldSource::plugin("retitler"));
            updates.set(Field::Title, "Heat");
            Ok(session.apply(record, updates)?)
        }
    }

    fn orchestrator(chain: Vec<ChainEntry>) -> ScanOrchestrator {
        let session = ScanSession::new(SourceClient::new().unwrap(), OverridePolicy::new());
        ScanOrchestrator::new(session, chain)
    }

    fn source(name: &'static str, known: &'static [&'static str]) -> Arc<dyn SourcePlugin> {
        Arc::new(TitleSource { name, known })
    }

    #[tokio::test]
    async fn failing_plugin_does_not_stop_the_chain() {
        let orch = orchestrator(vec![
            ChainEntry::new(Arc::new(Broken)),
            ChainEntry::new(source("imdb", &["Heat"])),
        ]);
        let mut record = MediaRecord::new("Heat");
        let report = orch.scan_media(&mut record).await;

        assert!(matches!(report.outcome("broken"), Some(PluginOutcome::Failed { .. })));
        assert_eq!(report.contributors(), vec!["imdb"]);
        assert_eq!(record.identifier("imdb"), Some("imdb-Heat"));
        assert_eq!(report.failures(), 1);
    }

    #[tokio::test]
    async fn fallback_is_skipped_when_primary_resolved() {
        let orch = orchestrator(vec![
            ChainEntry::new(source("imdb", &["Heat"])),
            ChainEntry::new(source("ofdb", &["Heat"])).fallback_for("imdb"),
        ]);
        let mut record = MediaRecord::new("Heat");
        let report = orch.scan_media(&mut record).await;
        assert_eq!(report.outcome("ofdb"), Some(&PluginOutcome::Skipped));
        assert_eq!(record.identifier("ofdb"), None);
    }

    #[tokio::test]
    async fn fallback_runs_when_primary_missed() {
        let orch = orchestrator(vec![
            ChainEntry::new(source("imdb", &[])),
            ChainEntry::new(source("ofdb", &["Heat"])).fallback_for("imdb"),
        ]);
        let mut record = MediaRecord::new("Heat");
        let report = orch.scan_media(&mut record).await;
        assert_eq!(report.outcome("imdb"), Some(&PluginOutcome::NotFound));
        assert!(matches!(report.outcome("ofdb"), Some(PluginOutcome::Contributed { .. })));
    }

    #[tokio::test]
    async fn cancellation_stops_before_next_plugin() {
        let orch = orchestrator(vec![
            ChainEntry::new(source("imdb", &["Heat"])),
            ChainEntry::new(source("themoviedb", &["Heat"])),
        ]);
        orch.session().cancel();
        let mut record = MediaRecord::new("Heat");
        let report = orch.scan_media(&mut record).await;

        assert!(report.cancelled);
        assert_eq!(report.plugins.len(), 2);
        assert!(report.plugins.iter().all(|r| r.outcome == PluginOutcome::Cancelled));
        assert!(record.ids().is_empty());
    }

    #[tokio::test]
    async fn cancelling_mid_run_keeps_earlier_fields() {
        let orch = orchestrator(vec![
            ChainEntry::new(Arc::new(Interrupting)),
            ChainEntry::new(source("themoviedb", &["Heat"])),
        ]);
        let mut record = MediaRecord::new("Heat");
        let report = orch.scan_media(&mut record).await;

        assert!(report.cancelled);
        assert!(matches!(report.outcome("imdb"), Some(PluginOutcome::Contributed { accepted: 1, .. })));
        assert_eq!(report.outcome("themoviedb"), Some(&PluginOutcome::Cancelled));
        assert_eq!(record.plot(), Some("A heist goes wrong."));
        assert_eq!(record.identifier("imdb"), Some("tt0113277"));
        assert_eq!(record.identifier("themoviedb"), None);
        assert_eq!(record.tagline(), None);
    }

    #[tokio::test]
    async fn fallback_member_id_counts_for_the_primary() {
        let delegate = DelegatingPlugin::new(source("imdb", &[]), vec![source("mirror", &["Heat"])]);
        let orch = orchestrator(vec![
            ChainEntry::new(Arc::new(delegate)),
            ChainEntry::new(source("ofdb", &["Heat"])).fallback_for("imdb"),
        ]);
        let mut record = MediaRecord::new("Heat");
        let report = orch.scan_media(&mut record).await;

        assert_eq!(record.identifier("mirror"), Some("mirror-Heat"));
        assert_eq!(report.outcome("ofdb"), Some(&PluginOutcome::Skipped));
        assert_eq!(record.identifier("ofdb"), None);
    }

    #[tokio::test]
    async fn delegate_resolved_by_fallback_is_not_retriggered() {
        let delegate = DelegatingPlugin::new(source("imdb", &[]), vec![source("mirror", &["Heat Workprint"])]);
        let orch = orchestrator(vec![
            ChainEntry::new(Arc::new(delegate)).depends_on("retitler"),
            ChainEntry::new(Arc::new(Retitler)),
        ]);
        let mut record = MediaRecord::new("Heat Workprint");
        let report = orch.scan_media(&mut record).await;

        assert_eq!(record.title(), Some("Heat"));
        assert_eq!(record.identifier("mirror"), Some("mirror-Heat Workprint"));
        assert_eq!(report.retriggers, 0);
        assert_eq!(report.plugins.len(), 2);
    }

    #[tokio::test]
    async fn resolved_identifier_is_stored() {
        let orch = orchestrator(vec![ChainEntry::new(source("imdb", &["Heat"]))]);
        let mut record = MediaRecord::new("Heat");
        orch.scan_media(&mut record).await;
        assert_eq!(
            record.ids().identifier("imdb"),
            Some(SourceIdentifier::new("imdb", "imdb-Heat"))
        );
        assert_eq!(record.tagline(), Some("imdb tagline"));
    }

    #[tokio::test]
    async fn scan_many_keeps_input_order() {
        let orch = orchestrator(vec![ChainEntry::new(source("imdb", &["Heat", "Ronin"]))]);
        let records = vec![MediaRecord::new("Ronin"), MediaRecord::new("Heat"), MediaRecord::new("Zardoz")];
        let results = orch.scan_many(records, 2).await;

        let titles: Vec<_> = results.iter().map(|(r, _)| r.title().unwrap_or_default()).collect();
        assert_eq!(titles, vec!["Ronin", "Heat", "Zardoz"]);
        assert_eq!(results[2].1.outcome("imdb"), Some(&PluginOutcome::NotFound));
    }

    #[test]
    fn report_serializes_with_status_tag() {
        let mut report = ScanReport::default();
        report.push("imdb", PluginOutcome::NotFound, false);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["plugins"][0]["outcome"]["status"], "not_found");
    }
}
