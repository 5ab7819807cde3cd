//! End-to-end scan scenarios against in-memory source plugins.
//!
//! No test touches the network except the transport-failure scenario, which
//! connects to a closed local port.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use reelscan::merge::MergeSummary;
use reelscan::plugin::ScanSession;
use reelscan::resolve::{normalize_title, resolve_media};
use reelscan::{
    Candidate, ChainEntry, Credit, Field, FieldSource, FieldUpdates, FieldValue, MediaRecord, OverridePolicy,
    PluginError, PluginOutcome, Record, ScanOrchestrator, SearchQuery, SourceClient, SourceIdentifier,
    SourcePlugin,
};

/// A source with a fixed catalog of `(title, year, id)` entries that writes
/// a fixed set of values when scanned.
struct CatalogSource {
    name: &'static str,
    catalog: Vec<(&'static str, u32, &'static str)>,
    values: Vec<(Field, FieldValue)>,
    searches: AtomicUsize,
    resolves: AtomicUsize,
}

impl CatalogSource {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            catalog: Vec::new(),
            values: Vec::new(),
            searches: AtomicUsize::new(0),
            resolves: AtomicUsize::new(0),
        }
    }

    fn knows(mut self, title: &'static str, year: u32, id: &'static str) -> Self {
        self.catalog.push((title, year, id));
        self
    }

    fn writes(mut self, field: Field, value: impl Into<FieldValue>) -> Self {
        self.values.push((field, value.into()));
        self
    }

    fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    fn resolves(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourcePlugin for CatalogSource {
    fn name(&self) -> &str {
        self.name
    }

    async fn search(&self, _: &ScanSession, query: &SearchQuery) -> Result<Vec<Candidate>, PluginError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        let wanted = normalize_title(&query.title);
        Ok(self
            .catalog
            .iter()
            .filter(|(title, _, _)| normalize_title(title) == wanted)
            .map(|(title, year, id)| Candidate::new(*id, *title).with_year(Some(*year)))
            .collect())
    }

    async fn resolve(
        &self,
        session: &ScanSession,
        record: &MediaRecord,
    ) -> Result<Option<SourceIdentifier>, PluginError> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        resolve_media(self, session, record).await
    }

    async fn scan_media(&self, session: &ScanSession, record: &mut MediaRecord) -> Result<MergeSummary, PluginError> {
        let mut updates = FieldUpdates::new(FieldSource::plugin(self.name));
        for (field, value) in &self.values {
            updates.set(*field, value.clone());
        }
        Ok(session.apply(record, updates)?)
    }
}

/// Renames the record on every scan and then forgets its own id, so it
/// stays eligible for re-runs.
struct Renamer {
    name: &'static str,
    scans: AtomicUsize,
}

impl Renamer {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            scans: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SourcePlugin for Renamer {
    fn name(&self) -> &str {
        self.name
    }

    async fn search(&self, _: &ScanSession, query: &SearchQuery) -> Result<Vec<Candidate>, PluginError> {
        Ok(vec![Candidate::new(format!("{}-{}", self.name, query.title), query.title.clone())])
    }

    async fn scan_media(&self, session: &ScanSession, record: &mut MediaRecord) -> Result<MergeSummary, PluginError> {
        let n = self.scans.fetch_add(1, Ordering::SeqCst) + 1;
        let mut updates = FieldUpdates::new(FieldSource::plugin(self.name));
        updates.set(Field::Title, format!("{} take {n}", self.name));
        let summary = session.apply(record, updates)?;
        record.ids_mut().remove(self.name);
        Ok(summary)
    }
}

/// Fails every request with a real transport error.
struct Unreachable;

#[async_trait]
impl SourcePlugin for Unreachable {
    fn name(&self) -> &str {
        "unreachable"
    }

    async fn search(&self, session: &ScanSession, query: &SearchQuery) -> Result<Vec<Candidate>, PluginError> {
        let url = format!("http://127.0.0.1:1/search?q={}", urlencoding::encode(&query.title));
        session.client().request(&url, None).await?;
        Ok(Vec::new())
    }

    async fn scan_media(&self, _: &ScanSession, _: &mut MediaRecord) -> Result<MergeSummary, PluginError> {
        Ok(MergeSummary::default())
    }
}

fn session(policy: OverridePolicy) -> ScanSession {
    ScanSession::new(SourceClient::new().unwrap(), policy)
}

fn orchestrator(policy: OverridePolicy, chain: Vec<ChainEntry>) -> ScanOrchestrator {
    ScanOrchestrator::new(session(policy), chain)
}

// ─── Resolution ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn second_resolve_is_served_from_cache() {
    let session = session(OverridePolicy::new());
    let source = CatalogSource::new("imdb").knows("Heat", 1995, "tt0113277");
    let record = MediaRecord::new("Heat").with_year(1995);

    let first = source.resolve(&session, &record).await.unwrap();
    let second = source.resolve(&session, &record).await.unwrap();

    assert_eq!(first, Some(SourceIdentifier::new("imdb", "tt0113277")));
    assert_eq!(first, second);
    assert_eq!(source.searches(), 1);
}

#[tokio::test]
async fn unresolvable_record_walks_the_ladder_once() {
    let session = session(OverridePolicy::new());
    let source = CatalogSource::new("imdb");
    let record = MediaRecord::new("Alien: Resurrection").with_year(1997);

    assert_eq!(source.resolve(&session, &record).await.unwrap(), None);
    let steps = source.searches();
    // two titles, exact year then unfiltered; the widened year reuses the unfiltered results
    assert_eq!(steps, 4);

    assert_eq!(source.resolve(&session, &record).await.unwrap(), None);
    assert_eq!(source.searches(), steps);
}

// ─── Merge policy through the chain ──────────────────────────────────────────

#[tokio::test]
async fn user_locked_fields_survive_every_plugin() {
    let plot = "Sidecar plot.";
    let orch = orchestrator(
        OverridePolicy::new().allow_overwrite("themoviedb", [Field::Plot]),
        vec![
            ChainEntry::new(Arc::new(
                CatalogSource::new("imdb")
                    .knows("Heat", 1995, "tt0113277")
                    .writes(Field::Plot, "IMDb plot."),
            )),
            ChainEntry::new(Arc::new(
                CatalogSource::new("themoviedb")
                    .knows("Heat", 1995, "949")
                    .writes(Field::Plot, "TMDb plot."),
            )),
        ],
    );
    let mut record = MediaRecord::new("Heat").with_year(1995);
    let applied = orch.scan_companion(&mut record, &format!("<movie><plot>{plot}</plot></movie>"));
    assert_eq!(applied, 1);

    let report = orch.scan_media(&mut record).await;

    assert_eq!(report.contributors(), vec!["imdb", "themoviedb"]);
    assert_eq!(record.plot(), Some(plot));
    assert_eq!(record.override_source(Field::Plot), Some(&FieldSource::User));
}

#[tokio::test]
async fn first_plugin_keeps_fields_without_overwrite_rights() {
    let orch = orchestrator(
        OverridePolicy::new(),
        vec![
            ChainEntry::new(Arc::new(
                CatalogSource::new("imdb")
                    .knows("Heat", 1995, "tt0113277")
                    .writes(Field::Runtime, 170u32)
                    .writes(Field::Genres, vec!["Crime".to_string()]),
            )),
            ChainEntry::new(Arc::new(
                CatalogSource::new("themoviedb")
                    .knows("Heat", 1995, "949")
                    .writes(Field::Runtime, 171u32)
                    .writes(Field::Tagline, "A Los Angeles crime saga."),
            )),
        ],
    );
    let mut record = MediaRecord::new("Heat").with_year(1995);
    let report = orch.scan_media(&mut record).await;

    assert_eq!(record.runtime(), Some(170));
    assert_eq!(record.override_source(Field::Runtime), Some(&FieldSource::plugin("imdb")));
    assert_eq!(record.tagline(), Some("A Los Angeles crime saga."));
    assert_eq!(
        report.outcome("themoviedb"),
        Some(&PluginOutcome::Contributed {
            id: "949".to_string(),
            accepted: 1,
        })
    );
}

#[tokio::test]
async fn overwriting_list_replaces_it_whole() {
    let cast_a = vec![Credit::new("Al Pacino"), Credit::new("Robert De Niro")];
    let cast_c = vec![Credit::new("Val Kilmer")];
    let orch = orchestrator(
        OverridePolicy::new().allow_overwrite("p2", [Field::Cast]),
        vec![
            ChainEntry::new(Arc::new(
                CatalogSource::new("p1")
                    .knows("Heat", 1995, "1")
                    .writes(Field::Cast, cast_a),
            )),
            ChainEntry::new(Arc::new(
                CatalogSource::new("p2")
                    .knows("Heat", 1995, "2")
                    .writes(Field::Cast, cast_c.clone()),
            )),
        ],
    );
    let mut record = MediaRecord::new("Heat").with_year(1995);
    orch.scan_media(&mut record).await;

    assert_eq!(record.cast(), cast_c.as_slice());
    assert_eq!(record.override_source(Field::Cast), Some(&FieldSource::plugin("p2")));
}

// ─── Re-trigger ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn dependent_reruns_after_upstream_renames() {
    let a = Arc::new(
        CatalogSource::new("a")
            .knows("Foo", 2001, "123")
            .writes(Field::Title, "Foo Bar"),
    );
    let b = Arc::new(
        CatalogSource::new("b")
            .knows("Foo Bar", 2001, "456")
            .writes(Field::Company, "Acme"),
    );
    // b runs first and misses, then a renames the record
    let orch = orchestrator(
        OverridePolicy::new(),
        vec![
            ChainEntry::new(b.clone()).depends_on("a"),
            ChainEntry::new(a.clone()),
        ],
    );
    let mut record = MediaRecord::new("Foo").with_year(2001);
    let report = orch.scan_media(&mut record).await;

    assert_eq!(record.identifier("a"), Some("123"));
    assert_eq!(record.identifier("b"), Some("456"));
    assert_eq!(record.title(), Some("Foo Bar"));
    assert_eq!(record.override_source(Field::Title), Some(&FieldSource::plugin("a")));
    assert_eq!(record.company(), Some("Acme"));
    assert_eq!(record.override_source(Field::Company), Some(&FieldSource::plugin("b")));

    assert_eq!(report.retriggers, 1);
    assert_eq!(b.resolves(), 2);
    let rerun = report.plugins.last().unwrap();
    assert_eq!(rerun.plugin, "b");
    assert!(rerun.retriggered);
}

#[tokio::test]
async fn dependent_after_upstream_sees_new_title_directly() {
    let orch = orchestrator(
        OverridePolicy::new(),
        vec![
            ChainEntry::new(Arc::new(
                CatalogSource::new("a")
                    .knows("Foo", 2001, "123")
                    .writes(Field::Title, "Foo Bar"),
            )),
            ChainEntry::new(Arc::new(
                CatalogSource::new("b")
                    .knows("Foo Bar", 2001, "456")
                    .writes(Field::Company, "Acme"),
            ))
            .depends_on("a"),
        ],
    );
    let mut record = MediaRecord::new("Foo").with_year(2001);
    let report = orch.scan_media(&mut record).await;

    assert_eq!(record.identifier("a"), Some("123"));
    assert_eq!(record.identifier("b"), Some("456"));
    assert_eq!(record.company(), Some("Acme"));
    assert_eq!(report.retriggers, 0);
}

#[tokio::test]
async fn each_dependency_edge_fires_once_per_scan() {
    let y = Arc::new(CatalogSource::new("y"));
    let x = Arc::new(Renamer::new("x"));
    let orch = orchestrator(
        OverridePolicy::new()
            .allow_overwrite("x", [Field::Title])
            .allow_overwrite("z1", [Field::Title])
            .allow_overwrite("z2", [Field::Title]),
        vec![
            ChainEntry::new(y.clone()).depends_on("x"),
            ChainEntry::new(x.clone()).depends_on("z1").depends_on("z2"),
            ChainEntry::new(Arc::new(Renamer::new("z1"))),
            ChainEntry::new(Arc::new(Renamer::new("z2"))),
        ],
    );
    let mut record = MediaRecord::new("Foo");
    let report = orch.scan_media(&mut record).await;

    // x renamed the record three times, y was re-run only once
    assert_eq!(x.scans.load(Ordering::SeqCst), 3);
    assert_eq!(y.resolves(), 2);
    assert_eq!(report.retriggers, 3);
    assert_eq!(record.title(), Some("x take 3"));
}

// ─── Failures ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn transport_failure_leaves_record_untouched() {
    let orch = orchestrator(OverridePolicy::new(), vec![ChainEntry::new(Arc::new(Unreachable))]);
    let mut record = MediaRecord::new("Foo").with_year(2001);
    let before = record.clone();

    let report = orch.scan_media(&mut record).await;

    assert_eq!(record, before);
    assert!(record.identifier("unreachable").is_none());
    let Some(PluginOutcome::Failed { error }) = report.outcome("unreachable") else {
        panic!("expected a failure, got {:?}", report.outcome("unreachable"));
    };
    assert!(error.starts_with("transport error"), "{error}");
}

#[tokio::test]
async fn transport_failure_does_not_block_later_plugins() {
    let orch = orchestrator(
        OverridePolicy::new(),
        vec![
            ChainEntry::new(Arc::new(Unreachable)),
            ChainEntry::new(Arc::new(
                CatalogSource::new("imdb")
                    .knows("Foo", 2001, "tt0000123")
                    .writes(Field::Plot, "Plot."),
            )),
        ],
    );
    let mut record = MediaRecord::new("Foo").with_year(2001);
    let report = orch.scan_media(&mut record).await;

    assert_eq!(report.failures(), 1);
    assert_eq!(report.contributors(), vec!["imdb"]);
    assert_eq!(record.plot(), Some("Plot."));
}
