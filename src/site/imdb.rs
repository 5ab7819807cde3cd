//! IMDb source.
//!
//! Search uses the public suggestion endpoint
//! (`https://v3.sg.media-imdb.com/suggestion/<c>/<query>.json`); details come
//! from the title or name page, mostly from its `application/ld+json` block
//! with a few `data-testid` sections for what JSON-LD lacks.

use std::borrow::Cow;
use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::CacheKey;
use crate::error::PluginError;
use crate::merge::{FieldUpdates, MergeSummary};
use crate::model::{Credit, Field, FieldSource, MediaKind, MediaRecord, PersonRecord, Record, SourceIdentifier};
use crate::plugin::{ScanSession, SourcePlugin};
use crate::resolve::{Candidate, SearchQuery};

pub const NAME: &str = "imdb";

const SUGGEST_BASE: &str = "https://v3.sg.media-imdb.com/suggestion";
const SITE_BASE: &str = "https://www.imdb.com";

static TITLE_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(tt\d{7,9})\b").expect("valid regex"));
static NAME_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(nm\d{7,9})\b").expect("valid regex"));
static DURATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^PT(?:(\d+)H)?(?:(\d+)M)?").expect("valid regex"));

/// The IMDb plugin.
#[derive(Debug, Clone, Default)]
pub struct ImdbPlugin {
    language: Option<String>,
}

impl ImdbPlugin {
    pub fn new(language: Option<String>) -> Self {
        Self { language }
    }

    async fn suggestions(&self, session: &ScanSession, text: &str) -> Result<Vec<Suggestion>, PluginError> {
        let url = suggestion_url(text);
        let response: SuggestionResponse = session.client().request_json(&url).await?;
        Ok(response.d)
    }

    async fn page(&self, session: &ScanSession, path: &str) -> Result<String, PluginError> {
        let url = format!("{SITE_BASE}{path}");
        session
            .client()
            .request_localized(&url, self.language.as_deref())
            .await
    }
}

#[async_trait]
impl SourcePlugin for ImdbPlugin {
    fn name(&self) -> &str {
        NAME
    }

    /// Suggestions are ranked by popularity.
    fn trusts_search_order(&self) -> bool {
        true
    }

    async fn search(&self, session: &ScanSession, query: &SearchQuery) -> Result<Vec<Candidate>, PluginError> {
        let suggestions = self.suggestions(session, &query.title).await?;
        Ok(title_candidates(&suggestions, query.kind))
    }

    async fn scan_media(&self, session: &ScanSession, record: &mut MediaRecord) -> Result<MergeSummary, PluginError> {
        let Some(id) = record.identifier(NAME).map(str::to_owned) else {
            return Ok(MergeSummary::default());
        };

        let key = CacheKey::new(NAME, "title", id.as_str());
        let title: ImdbTitle = session
            .cache()
            .get_or_fetch(key, || async {
                let html = self.page(session, &format!("/title/{id}/")).await?;
                parse_title_page(&html)
            })
            .await?;

        if let Some(score) = title.rating {
            record.set_rating(NAME, score);
        }
        Ok(session.apply(record, title.updates())?)
    }

    async fn search_person(&self, session: &ScanSession, name: &str) -> Result<Vec<Candidate>, PluginError> {
        let suggestions = self.suggestions(session, name).await?;
        Ok(person_candidates(&suggestions))
    }

    async fn scan_person(&self, session: &ScanSession, person: &mut PersonRecord) -> Result<MergeSummary, PluginError> {
        let Some(id) = person.identifier(NAME).map(str::to_owned) else {
            return Ok(MergeSummary::default());
        };

        let key = CacheKey::new(NAME, "name", id.as_str());
        let page: ImdbPerson = session
            .cache()
            .get_or_fetch(key, || async {
                let html = self.page(session, &format!("/name/{id}/")).await?;
                parse_name_page(&html)
            })
            .await?;

        Ok(session.apply(person, page.updates())?)
    }

    fn scan_companion_file(&self, text: &str, record: &mut MediaRecord) -> bool {
        TITLE_ID
            .captures(text)
            .and_then(|caps| caps.get(1))
            .is_some_and(|id| record.ids_mut().insert(SourceIdentifier::new(NAME, id.as_str())))
    }
}

fn suggestion_url(text: &str) -> String {
    let query = text.trim().to_lowercase();
    let bucket = query
        .chars()
        .find(char::is_ascii_alphanumeric)
        .unwrap_or('x');
    format!("{SUGGEST_BASE}/{bucket}/{}.json", urlencoding::encode(&query))
}

fn kind_matches(qid: Option<&str>, kind: MediaKind) -> bool {
    match (qid, kind) {
        (None, _) => true,
        (Some(qid), MediaKind::Movie) => matches!(qid, "movie" | "tvMovie" | "video" | "short"),
        (Some(qid), MediaKind::TvShow) => matches!(qid, "tvSeries" | "tvMiniSeries"),
    }
}

/// Title suggestions of the wanted kind, in IMDb's order.
pub fn title_candidates(suggestions: &[Suggestion], kind: MediaKind) -> Vec<Candidate> {
    suggestions
        .iter()
        .filter(|s| s.id.starts_with("tt") && kind_matches(s.qid.as_deref(), kind))
        .map(|s| Candidate::new(&s.id, &s.l).with_year(s.y))
        .collect()
}

/// Person suggestions, in IMDb's order.
pub fn person_candidates(suggestions: &[Suggestion]) -> Vec<Candidate> {
    suggestions
        .iter()
        .filter(|s| s.id.starts_with("nm"))
        .map(|s| Candidate::new(&s.id, &s.l))
        .collect()
}

/// Details extracted from a title page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImdbTitle {
    pub title: Option<String>,
    pub original_title: Option<String>,
    pub year: Option<u32>,
    pub plot: Option<String>,
    pub outline: Option<String>,
    pub runtime: Option<u32>,
    pub certification: Option<String>,
    pub release_date: Option<NaiveDate>,
    pub genres: Vec<String>,
    pub countries: Vec<String>,
    pub company: Option<String>,
    pub cast: Vec<Credit>,
    pub directors: Vec<Credit>,
    pub writers: Vec<Credit>,
    /// 0-100.
    pub rating: Option<u32>,
}

impl ImdbTitle {
    pub fn updates(&self) -> FieldUpdates {
        let mut updates = FieldUpdates::new(FieldSource::plugin(NAME));
        updates
            .set_opt(Field::Title, self.title.clone())
            .set_opt(Field::OriginalTitle, self.original_title.clone())
            .set_opt(Field::Year, self.year)
            .set_opt(Field::Plot, self.plot.clone())
            .set_opt(Field::Outline, self.outline.clone())
            .set_opt(Field::Runtime, self.runtime)
            .set_opt(Field::Certification, self.certification.clone())
            .set_opt(Field::ReleaseDate, self.release_date)
            .set(Field::Genres, self.genres.clone())
            .set(Field::Countries, self.countries.clone())
            .set_opt(Field::Company, self.company.clone())
            .set(Field::Cast, self.cast.clone())
            .set(Field::Directors, self.directors.clone())
            .set(Field::Writers, self.writers.clone());
        updates
    }
}

/// Details extracted from a name page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImdbPerson {
    pub name: Option<String>,
    pub biography: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub birth_place: Option<String>,
}

impl ImdbPerson {
    pub fn updates(&self) -> FieldUpdates {
        let mut updates = FieldUpdates::new(FieldSource::plugin(NAME));
        updates
            .set_opt(Field::Name, self.name.clone())
            .set_opt(Field::Biography, self.biography.clone())
            .set_opt(Field::BirthDate, self.birth_date)
            .set_opt(Field::BirthPlace, self.birth_place.clone());
        updates
    }
}

fn selector(css: &str) -> Result<Selector, PluginError> {
    Selector::parse(css).map_err(|e| PluginError::parse(format!("bad selector {css}: {e}")))
}

/// First JSON-LD object of the page.
fn json_ld(document: &Html) -> Result<Value, PluginError> {
    let script = selector(r#"script[type="application/ld+json"]"#)?;
    let text = document
        .select(&script)
        .next()
        .map(|el| el.text().collect::<String>())
        .ok_or_else(|| PluginError::parse("page has no JSON-LD block"))?;
    Ok(serde_json::from_str(&text)?)
}

/// Trimmed text of the first element matching `css`.
fn section_text(document: &Html, css: &str) -> Result<Option<String>, PluginError> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .next()
        .map(|el| el.text().collect::<Vec<_>>().join(" "))
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|s| !s.is_empty()))
}

/// Link texts inside the first element matching `css`.
fn section_links(document: &Html, css: &str) -> Result<Vec<String>, PluginError> {
    let sel = selector(&format!("{css} a"))?;
    Ok(document
        .select(&sel)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

fn as_list(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other],
    }
}

fn text_of(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(decode_entities)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// JSON-LD text still carries HTML entities. Text with entities outside
/// the XML set is kept as is.
fn decode_entities(s: &str) -> String {
    quick_xml::escape::unescape(s).map_or_else(|_| s.to_string(), Cow::into_owned)
}

fn person_credits(value: Option<&Value>) -> Vec<Credit> {
    as_list(value)
        .into_iter()
        .filter(|v| v.get("@type").and_then(Value::as_str) == Some("Person"))
        .filter_map(|v| {
            let name = text_of(v.get("name"))?;
            let id = v
                .get("url")
                .and_then(Value::as_str)
                .and_then(|url| NAME_ID.captures(url))
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string());
            let credit = Credit::new(name);
            Some(match id {
                Some(id) => credit.with_id(id),
                None => credit,
            })
        })
        .collect()
}

/// `PT2H50M` → 170.
pub fn parse_duration(iso: &str) -> Option<u32> {
    let caps = DURATION.captures(iso.trim())?;
    let hours: u32 = caps.get(1).map_or(Ok(0), |m| m.as_str().parse()).ok()?;
    let minutes: u32 = caps.get(2).map_or(Ok(0), |m| m.as_str().parse()).ok()?;
    let total = hours.checked_mul(60)?.checked_add(minutes)?;
    (total > 0).then_some(total)
}

fn rating_of(ld: &Value) -> Option<u32> {
    let value = ld.get("aggregateRating")?.get("ratingValue")?;
    let score = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    let scaled = (score * 10.0).round().clamp(0.0, 100.0);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let percent = scaled as u32;
    Some(percent)
}

/// Extract title details from an IMDb title page.
pub fn parse_title_page(html: &str) -> Result<ImdbTitle, PluginError> {
    let document = Html::parse_document(html);
    let ld = json_ld(&document)?;

    let release_date = ld
        .get("datePublished")
        .and_then(Value::as_str)
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());
    let year = release_date
        .map(|d| chrono::Datelike::year(&d))
        .and_then(|y| u32::try_from(y).ok());

    let creators = as_list(ld.get("creator"));
    let company = creators
        .iter()
        .find(|v| v.get("@type").and_then(Value::as_str) == Some("Organization"))
        .and_then(|v| text_of(v.get("name")));
    let company = match company {
        Some(company) => Some(company),
        None => section_links(&document, r#"li[data-testid="title-details-companies"]"#)?
            .into_iter()
            .next(),
    };

    let original_title = section_text(&document, r#"[data-testid="hero-title-block__original-title"]"#)?
        .map(|s| s.trim_start_matches("Original title:").trim().to_string())
        .filter(|s| !s.is_empty());

    let outline = text_of(ld.get("description"));
    let plot = section_text(&document, r#"[data-testid="plot-xl"]"#)?.or_else(|| outline.clone());

    Ok(ImdbTitle {
        title: text_of(ld.get("name")),
        original_title,
        year,
        plot,
        outline,
        runtime: ld.get("duration").and_then(Value::as_str).and_then(parse_duration),
        certification: text_of(ld.get("contentRating")),
        release_date,
        genres: as_list(ld.get("genre"))
            .into_iter()
            .filter_map(|g| text_of(Some(g)))
            .collect(),
        countries: section_links(&document, r#"li[data-testid="title-details-origin"]"#)?,
        company,
        cast: person_credits(ld.get("actor")),
        directors: person_credits(ld.get("director")),
        writers: person_credits(ld.get("creator")),
        rating: rating_of(&ld),
    })
}

/// Extract person details from an IMDb name page.
pub fn parse_name_page(html: &str) -> Result<ImdbPerson, PluginError> {
    let document = Html::parse_document(html);
    let ld = json_ld(&document)?;

    let birth_place = section_text(&document, r#"[data-testid="birth-and-death-birthplace"]"#)?;

    Ok(ImdbPerson {
        name: text_of(ld.get("name")),
        biography: text_of(ld.get("description")),
        birth_date: ld
            .get("birthDate")
            .and_then(Value::as_str)
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()),
        birth_place,
    })
}

// ============================================================================
// Suggestion API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct SuggestionResponse {
    #[serde(default)]
    d: Vec<Suggestion>,
}

/// One entry of the suggestion endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Suggestion {
    pub id: String,
    /// Label (title or name).
    pub l: String,
    /// Year.
    #[serde(default)]
    pub y: Option<u32>,
    /// Kind, e.g. `movie`, `tvSeries`.
    #[serde(default)]
    pub qid: Option<String>,
}
