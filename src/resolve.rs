//! Identifier resolution.
//!
//! Maps a record to a source's native id, trying in order:
//!
//! 1. an id the record already carries for the source (no network);
//! 2. cross-reference lookups from ids of other sources the plugin can translate;
//! 3. a title search ladder: year filters exact → ±1 → none (outer), titles
//!    full → original → truncated (inner), stopping at the first query whose
//!    results yield a candidate.
//!
//! Search results and cross-reference answers are cached in the session's
//! [`ResolutionCache`](crate::cache::ResolutionCache).

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::CacheKey;
use crate::error::PluginError;
use crate::model::{MediaKind, MediaRecord, PersonRecord, Record, SourceIdentifier};
use crate::plugin::{ScanSession, SourcePlugin};

/// Minimum Jaro-Winkler similarity for a fuzzy title match.
pub const FUZZY_THRESHOLD: f64 = 0.85;

/// Year constraint of one search step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YearFilter {
    Exact(u32),
    /// The year ±1.
    Around(u32),
    Any,
}

impl YearFilter {
    /// Candidates without a year pass every filter.
    pub fn matches(self, year: Option<u32>) -> bool {
        match (self, year) {
            (_, None) | (YearFilter::Any, _) => true,
            (YearFilter::Exact(wanted), Some(year)) => wanted == year,
            (YearFilter::Around(wanted), Some(year)) => wanted.abs_diff(year) <= 1,
        }
    }

    /// Year to pass to sources that accept an exact year parameter.
    pub fn exact_year(self) -> Option<u32> {
        match self {
            YearFilter::Exact(year) => Some(year),
            _ => None,
        }
    }
}

/// One free-text search step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub title: String,
    pub year: YearFilter,
    pub kind: MediaKind,
}

impl SearchQuery {
    pub fn new(title: impl Into<String>, year: YearFilter, kind: MediaKind) -> Self {
        Self {
            title: title.into(),
            year,
            kind,
        }
    }

    /// Key under which the raw search results are cached.
    ///
    /// Results are filtered by year after the fact, so only the year a
    /// source is actually asked for is part of the key.
    pub fn cache_key(&self) -> String {
        let year = self
            .year
            .exact_year()
            .map(|y| y.to_string())
            .unwrap_or_default();
        format!("{:?}|{}|{}", self.kind, normalize_title(&self.title), year)
    }
}

/// One search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u32>,
}

impl Candidate {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            original_title: None,
            year: None,
        }
    }

    #[must_use]
    pub fn with_year(mut self, year: Option<u32>) -> Self {
        self.year = year;
        self
    }

    #[must_use]
    pub fn with_original_title(mut self, title: Option<String>) -> Self {
        self.original_title = title;
        self
    }

    fn titles(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.title.as_str()).chain(self.original_title.as_deref())
    }
}

/// Lowercase, drop punctuation, collapse whitespace.
pub fn normalize_title(title: &str) -> String {
    title
        .replace('&', " and ")
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Title similarity in `0.0..=1.0`.
pub fn similarity(a: &str, b: &str) -> f64 {
    strsim::jaro_winkler(&normalize_title(a), &normalize_title(b))
}

/// `"Alien: Resurrection"` → `"Alien"`; `None` when nothing would be cut.
pub fn truncate_title(title: &str) -> Option<String> {
    let cut = [":", " - ", "("]
        .iter()
        .filter_map(|sep| title.find(sep))
        .min()?;
    let short = title[..cut].trim();
    (!short.is_empty() && short != title.trim()).then(|| short.to_string())
}

/// Distinct titles to search for, most specific first.
pub fn title_variants(record: &MediaRecord) -> Vec<String> {
    let mut variants: Vec<String> = Vec::new();
    let mut push = |title: &str| {
        let title = title.trim();
        if title.is_empty() {
            return;
        }
        let norm = normalize_title(title);
        if !variants.iter().any(|v| normalize_title(v) == norm) {
            variants.push(title.to_string());
        }
    };

    if let Some(title) = record.title() {
        push(title);
    }
    if let Some(original) = record.original_title() {
        push(original);
    }
    if let Some(short) = record.title().and_then(truncate_title) {
        push(&short);
    }
    variants
}

/// Every search step for a record, in the order they are tried.
pub fn search_ladder(record: &MediaRecord) -> Vec<SearchQuery> {
    let titles = title_variants(record);
    let filters: Vec<YearFilter> = match record.year() {
        Some(year) => vec![YearFilter::Exact(year), YearFilter::Around(year), YearFilter::Any],
        None => vec![YearFilter::Any],
    };

    filters
        .into_iter()
        .flat_map(|year| {
            titles
                .iter()
                .map(move |title| SearchQuery::new(title.clone(), year, record.kind))
        })
        .collect()
}

/// Default disambiguation rule.
///
/// Among candidates passing the year filter: an exact normalized title match
/// (preferring the exact year), else the most similar title at or above
/// [`FUZZY_THRESHOLD`], else the first candidate when `trust_order` is set.
pub fn pick_best(query: &SearchQuery, candidates: &[Candidate], trust_order: bool) -> Option<Candidate> {
    let eligible: Vec<&Candidate> = candidates
        .iter()
        .filter(|c| query.year.matches(c.year))
        .collect();
    if eligible.is_empty() {
        return None;
    }

    let wanted = normalize_title(&query.title);
    let exact: Vec<&&Candidate> = eligible
        .iter()
        .filter(|c| c.titles().any(|t| normalize_title(t) == wanted))
        .collect();
    if !exact.is_empty() {
        let preferred = match query.year {
            YearFilter::Exact(year) | YearFilter::Around(year) => {
                exact.iter().find(|c| c.year == Some(year)).copied()
            }
            YearFilter::Any => None,
        };
        return Some((**preferred.unwrap_or(exact[0])).clone());
    }

    let mut best: Option<(&Candidate, f64)> = None;
    for candidate in &eligible {
        let score = candidate
            .titles()
            .map(|t| similarity(&query.title, t))
            .fold(0.0, f64::max);
        if score >= FUZZY_THRESHOLD && best.map_or(true, |(_, s)| score > s) {
            best = Some((candidate, score));
        }
    }
    if let Some((candidate, score)) = best {
        debug!(query = %query.title, candidate = %candidate.title, score, "fuzzy match");
        return Some(candidate.clone());
    }

    trust_order.then(|| eligible[0].clone())
}

async fn cached_search<P: SourcePlugin + ?Sized>(
    plugin: &P,
    session: &ScanSession,
    query: &SearchQuery,
) -> Result<Vec<Candidate>, PluginError> {
    let key = CacheKey::new(plugin.name(), "search", query.cache_key());
    session
        .cache()
        .get_or_fetch(key, || plugin.search(session, query))
        .await
}

async fn cached_xref<P: SourcePlugin + ?Sized>(
    plugin: &P,
    session: &ScanSession,
    source: &str,
    id: &str,
) -> Result<Option<String>, PluginError> {
    let key = CacheKey::new(plugin.name(), "xref", format!("{source}:{id}"));
    session
        .cache()
        .get_or_fetch(key, || plugin.lookup_by_xref(session, source, id))
        .await
}

/// Resolve `plugin`'s native id for a media record.
pub async fn resolve_media<P: SourcePlugin + ?Sized>(
    plugin: &P,
    session: &ScanSession,
    record: &MediaRecord,
) -> Result<Option<SourceIdentifier>, PluginError> {
    let source = plugin.name();
    if let Some(existing) = record.ids().identifier(source) {
        debug!(source, id = %existing.id, "already resolved");
        return Ok(Some(existing));
    }

    for xref in plugin.cross_references() {
        let Some(other_id) = record.ids().get(xref) else {
            continue;
        };
        if let Some(id) = cached_xref(plugin, session, xref, other_id).await? {
            debug!(source, via = xref, %id, "resolved by cross-reference");
            return Ok(Some(SourceIdentifier::new(source, id)));
        }
    }

    for query in search_ladder(record) {
        let candidates = cached_search(plugin, session, &query).await?;
        debug!(
            source,
            title = %query.title,
            year = ?query.year,
            results = candidates.len(),
            "search step"
        );
        if let Some(best) = plugin.pick_best(&query, &candidates) {
            debug!(source, id = %best.id, title = %best.title, "resolved by search");
            return Ok(Some(SourceIdentifier::new(source, best.id)));
        }
    }

    debug!(source, record = record.label(), "not found");
    Ok(None)
}

/// Resolve `plugin`'s native id for a person (existing id, then name search).
pub async fn resolve_person<P: SourcePlugin + ?Sized>(
    plugin: &P,
    session: &ScanSession,
    person: &PersonRecord,
) -> Result<Option<SourceIdentifier>, PluginError> {
    let source = plugin.name();
    if let Some(existing) = person.ids().identifier(source) {
        return Ok(Some(existing));
    }
    let Some(name) = person.name() else {
        return Ok(None);
    };

    let query = SearchQuery::new(name, YearFilter::Any, MediaKind::Movie);
    let key = CacheKey::new(source, "person-search", normalize_title(name));
    let candidates = session
        .cache()
        .get_or_fetch(key, || plugin.search_person(session, name))
        .await?;

    Ok(plugin
        .pick_best(&query, &candidates)
        .map(|best| SourceIdentifier::new(source, best.id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(id: &str, title: &str, year: Option<u32>) -> Candidate {
        Candidate::new(id, title).with_year(year)
    }

    #[test]
    fn year_filter_matching() {
        assert!(YearFilter::Exact(2001).matches(Some(2001)));
        assert!(!YearFilter::Exact(2001).matches(Some(2002)));
        assert!(YearFilter::Around(2001).matches(Some(2002)));
        assert!(YearFilter::Around(2001).matches(Some(2000)));
        assert!(!YearFilter::Around(2001).matches(Some(2003)));
        assert!(YearFilter::Any.matches(Some(1950)));
        assert!(YearFilter::Exact(2001).matches(None));
    }

    #[test]
    fn normalize_strips_punctuation_and_case() {
        assert_eq!(normalize_title("  Léon: The  Professional! "), "léon the professional");
        assert_eq!(normalize_title("Fast & Furious"), "fast and furious");
    }

    #[test]
    fn truncate_cuts_at_first_separator() {
        assert_eq!(truncate_title("Alien: Resurrection").as_deref(), Some("Alien"));
        assert_eq!(truncate_title("Mission - Impossible").as_deref(), Some("Mission"));
        assert_eq!(truncate_title("Heat (1995)").as_deref(), Some("Heat"));
        assert_eq!(truncate_title("Heat"), None);
        assert_eq!(truncate_title(": leading"), None);
    }

    #[test]
    fn ladder_orders_year_filters_outermost() {
        let record = MediaRecord::new("Alien: Resurrection")
            .with_original_title("Alien 4")
            .with_year(1997);
        let ladder = search_ladder(&record);

        assert_eq!(ladder.len(), 9);
        assert_eq!(ladder[0].title, "Alien: Resurrection");
        assert_eq!(ladder[0].year, YearFilter::Exact(1997));
        assert_eq!(ladder[1].title, "Alien 4");
        assert_eq!(ladder[2].title, "Alien");
        assert_eq!(ladder[3].year, YearFilter::Around(1997));
        assert_eq!(ladder[8].year, YearFilter::Any);
    }

    #[test]
    fn ladder_without_year_only_searches_unfiltered() {
        let record = MediaRecord::new("Heat");
        let ladder = search_ladder(&record);
        assert_eq!(ladder, vec![SearchQuery::new("Heat", YearFilter::Any, MediaKind::Movie)]);
    }

    #[test]
    fn duplicate_original_title_is_not_searched_twice() {
        let record = MediaRecord::new("Heat").with_original_title("HEAT");
        assert_eq!(title_variants(&record), vec!["Heat".to_string()]);
    }

    #[test]
    fn pick_best_prefers_exact_title_and_year() {
        let query = SearchQuery::new("Heat", YearFilter::Around(1995), MediaKind::Movie);
        let candidates = vec![
            cand("1", "Heat", Some(1996)),
            cand("2", "Heat", Some(1995)),
            cand("3", "Heated", Some(1995)),
        ];
        assert_eq!(pick_best(&query, &candidates, false).unwrap().id, "2");
    }

    #[test]
    fn pick_best_matches_original_title() {
        let query = SearchQuery::new("Le fabuleux destin d'Amélie Poulain", YearFilter::Any, MediaKind::Movie);
        let candidates = vec![Candidate::new("194", "Amélie")
            .with_original_title(Some("Le Fabuleux Destin d'Amélie Poulain".into()))];
        assert_eq!(pick_best(&query, &candidates, false).unwrap().id, "194");
    }

    #[test]
    fn pick_best_filters_by_year() {
        let query = SearchQuery::new("Heat", YearFilter::Exact(1995), MediaKind::Movie);
        let candidates = vec![cand("1", "Heat", Some(1986))];
        assert_eq!(pick_best(&query, &candidates, true), None);
    }

    #[test]
    fn pick_best_uses_fuzzy_match_above_threshold() {
        let query = SearchQuery::new("The Lord of the Rings Fellowship", YearFilter::Any, MediaKind::Movie);
        let candidates = vec![
            cand("a", "Zardoz", None),
            cand("b", "The Lord of the Rings: The Fellowship of the Ring", None),
        ];
        assert_eq!(pick_best(&query, &candidates, false).unwrap().id, "b");
    }

    #[test]
    fn pick_best_falls_back_to_first_only_when_order_is_trusted() {
        let query = SearchQuery::new("xyz", YearFilter::Any, MediaKind::Movie);
        let candidates = vec![cand("1", "Completely Different", None), cand("2", "Other", None)];
        assert_eq!(pick_best(&query, &candidates, false), None);
        assert_eq!(pick_best(&query, &candidates, true).unwrap().id, "1");
    }

    #[test]
    fn cache_key_ignores_non_exact_year() {
        let a = SearchQuery::new("Heat", YearFilter::Around(1995), MediaKind::Movie);
        let b = SearchQuery::new("heat!", YearFilter::Any, MediaKind::Movie);
        let c = SearchQuery::new("Heat", YearFilter::Exact(1995), MediaKind::Movie);
        assert_eq!(a.cache_key(), b.cache_key());
        assert_ne!(a.cache_key(), c.cache_key());
    }
}
