//! Source plugin contract.
//!
//! A plugin wraps one external movie database. The orchestrator drives it in
//! two steps per record: [`SourcePlugin::resolve`] finds the source's native
//! id, then [`SourcePlugin::scan_media`] fetches the detail page and merges
//! fields through the session's [`OverridePolicy`].
//!
//! Plugins are either built in (see [`crate::site`]) or external binaries
//! described in `~/.config/reelscan/plugins.toml`:
//!
//! ```toml
//! [[plugins]]
//! name = "ofdb"
//! binary = "/usr/local/bin/reelscan-ofdb"
//! fallback_for = "imdb"
//! ```
//!
//! # External protocol
//!
//! Input (JSON on stdin), one request per spawn:
//! ```json
//! {"op": "resolve", "record": {"title": "Heat", "year": 1995, "kind": "movie", "ids": {"imdb": "tt0113277"}}}
//! {"op": "search", "query": {"title": "Heat", "year": {"exact": 1995}, "kind": "movie"}}
//! {"op": "xref", "xref": {"source": "imdb", "id": "tt0113277"}}
//! ```
//!
//! Output (JSON on stdout):
//! ```json
//! {"id": "4711"}
//! {"candidates": [{"id": "4711", "title": "Heat", "year": 1995}]}
//! {"fields": {"plot": "...", "genres": ["Crime", "Drama"]}, "ratings": {"ofdb": 81}}
//! ```
//!
//! A `resolve` reply without an id falls back to the shared resolver, which
//! issues `xref` and `search` requests.

pub mod config;
pub mod delegate;
pub mod runner;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::cache::ResolutionCache;
use crate::error::{MergeError, PluginError};
use crate::http_client::SourceClient;
use crate::merge::{self, FieldUpdates, MergeOutcome, MergeSummary, OverridePolicy};
use crate::model::{Field, FieldSource, FieldValue, MediaRecord, PersonRecord, Record, SourceIdentifier};
use crate::resolve::{self, Candidate, SearchQuery};

pub use config::{load_chain_config, ChainConfig, PluginConfig};
pub use delegate::DelegatingPlugin;
pub use runner::ExternalPlugin;

/// Everything a plugin may touch during one run.
///
/// Cloning is cheap; clones share the client, cache, policy and token.
#[derive(Debug, Clone)]
pub struct ScanSession {
    client: SourceClient,
    cache: ResolutionCache,
    policy: Arc<OverridePolicy>,
    cancel: CancellationToken,
}

impl ScanSession {
    pub fn new(client: SourceClient, policy: OverridePolicy) -> Self {
        Self {
            client,
            cache: ResolutionCache::new(),
            policy: Arc::new(policy),
            cancel: CancellationToken::new(),
        }
    }

    /// Share an existing cache, e.g. across several sessions with different policies.
    #[must_use]
    pub fn with_cache(mut self, cache: ResolutionCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn client(&self) -> &SourceClient {
        &self.client
    }

    pub fn cache(&self) -> &ResolutionCache {
        &self.cache
    }

    pub fn policy(&self) -> &OverridePolicy {
        &self.policy
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Stop the run before the next plugin invocation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Merge one value under this session's policy.
    pub fn merge<R: Record>(
        &self,
        record: &mut R,
        field: Field,
        value: impl Into<FieldValue>,
        source: &FieldSource,
    ) -> Result<MergeOutcome, MergeError> {
        merge::merge(record, &self.policy, field, value, source)
    }

    /// Apply a batch of values collected by a plugin.
    pub fn apply<R: Record>(&self, record: &mut R, updates: FieldUpdates) -> Result<MergeSummary, MergeError> {
        updates.apply(record, &self.policy)
    }
}

/// One external movie database.
///
/// Only [`name`](Self::name), [`search`](Self::search) and
/// [`scan_media`](Self::scan_media) are required; resolution, person support
/// and companion-file detection have defaults.
#[async_trait]
pub trait SourcePlugin: Send + Sync {
    /// Source name; key in id maps, ratings and priority lists.
    fn name(&self) -> &str;

    /// Other sources whose ids this plugin can translate into its own.
    fn cross_references(&self) -> Vec<&str> {
        Vec::new()
    }

    /// Whether the first search result may be taken when nothing matches by title.
    fn trusts_search_order(&self) -> bool {
        false
    }

    /// Sources whose ids mean this plugin has already resolved a record.
    fn id_sources(&self) -> Vec<&str> {
        vec![self.name()]
    }

    /// Free-text title search.
    async fn search(&self, session: &ScanSession, query: &SearchQuery) -> Result<Vec<Candidate>, PluginError>;

    /// Translate another source's id into this source's id.
    async fn lookup_by_xref(
        &self,
        _session: &ScanSession,
        _source: &str,
        _id: &str,
    ) -> Result<Option<String>, PluginError> {
        Ok(None)
    }

    /// Disambiguation rule for one search step.
    fn pick_best(&self, query: &SearchQuery, candidates: &[Candidate]) -> Option<Candidate> {
        resolve::pick_best(query, candidates, self.trusts_search_order())
    }

    /// Find this source's id for a media record.
    async fn resolve(
        &self,
        session: &ScanSession,
        record: &MediaRecord,
    ) -> Result<Option<SourceIdentifier>, PluginError> {
        resolve::resolve_media(self, session, record).await
    }

    /// Fetch details for the record's id and merge them.
    ///
    /// Records without an id for this source are left untouched.
    async fn scan_media(&self, session: &ScanSession, record: &mut MediaRecord) -> Result<MergeSummary, PluginError>;

    /// Name search for persons. No person support by default.
    async fn search_person(&self, _session: &ScanSession, _name: &str) -> Result<Vec<Candidate>, PluginError> {
        Ok(Vec::new())
    }

    async fn resolve_person(
        &self,
        session: &ScanSession,
        person: &PersonRecord,
    ) -> Result<Option<SourceIdentifier>, PluginError> {
        resolve::resolve_person(self, session, person).await
    }

    async fn scan_person(&self, _session: &ScanSession, _person: &mut PersonRecord) -> Result<MergeSummary, PluginError> {
        Ok(MergeSummary::default())
    }

    /// Look for this source's id in a sidecar file and record it.
    fn scan_companion_file(&self, _text: &str, _record: &mut MediaRecord) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MediaKind;
    use crate::resolve::YearFilter;

    struct Fixed;

    #[async_trait]
    impl SourcePlugin for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn search(&self, _: &ScanSession, _: &SearchQuery) -> Result<Vec<Candidate>, PluginError> {
            Ok(vec![Candidate::new("1", "Heat").with_year(Some(1995))])
        }

        async fn scan_media(&self, session: &ScanSession, record: &mut MediaRecord) -> Result<MergeSummary, PluginError> {
            let mut updates = FieldUpdates::new(FieldSource::plugin(self.name()));
            updates.set(Field::Plot, "A heist goes wrong.");
            Ok(session.apply(record, updates)?)
        }
    }

    fn session() -> ScanSession {
        ScanSession::new(SourceClient::new().unwrap(), OverridePolicy::new())
    }

    #[tokio::test]
    async fn default_resolve_runs_the_ladder() {
        let session = session();
        let record = MediaRecord::new("Heat").with_year(1995);
        let id = Fixed.resolve(&session, &record).await.unwrap().unwrap();
        assert_eq!(id, SourceIdentifier::new("fixed", "1"));
    }

    #[tokio::test]
    async fn default_person_support_finds_nothing() {
        let session = session();
        let person = PersonRecord::new("Al Pacino");
        assert_eq!(Fixed.resolve_person(&session, &person).await.unwrap(), None);
        assert!(!Fixed.scan_companion_file("imdb.com/title/tt0113277", &mut MediaRecord::new("Heat")));
    }

    #[test]
    fn default_pick_best_does_not_trust_order() {
        let query = SearchQuery::new("Ronin", YearFilter::Any, MediaKind::Movie);
        let candidates = vec![Candidate::new("9", "Heat")];
        assert_eq!(Fixed.pick_best(&query, &candidates), None);
    }

    #[tokio::test]
    async fn session_clones_share_cancellation() {
        let session = session();
        let clone = session.clone();
        clone.cancel();
        assert!(session.is_cancelled());
    }

    #[tokio::test]
    async fn scan_merges_through_session_policy() {
        let session = session();
        let mut record = MediaRecord::new("Heat");
        let summary = Fixed.scan_media(&session, &mut record).await.unwrap();
        assert_eq!(summary.accepted, 1);
        assert_eq!(record.override_source(Field::Plot), Some(&FieldSource::plugin("fixed")));
    }
}
