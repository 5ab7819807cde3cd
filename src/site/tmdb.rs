//! TheMovieDb source via the v3 REST API.
//!
//! Needs an API key (`[sources.themoviedb] api_key` or `TMDB_API_KEY`).
//! IMDb ids are translated with `/find`, so a record already resolved on
//! IMDb never needs a title search here.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::cache::CacheKey;
use crate::error::PluginError;
use crate::merge::{FieldUpdates, MergeSummary};
use crate::model::{
    Credit, Field, FieldSource, FilmCredit, MediaKind, MediaRecord, PersonRecord, Record, SourceIdentifier,
};
use crate::plugin::{ScanSession, SourcePlugin};
use crate::resolve::{Candidate, SearchQuery};

pub const NAME: &str = "themoviedb";

/// Environment variable consulted when no key is configured.
pub const API_KEY_ENV: &str = "TMDB_API_KEY";

const API_BASE: &str = "https://api.themoviedb.org/3";

/// Country whose certification is reported.
const CERTIFICATION_COUNTRY: &str = "US";

static PAGE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"themoviedb\.org/(movie|tv)/(\d+)").expect("valid regex"));

/// The TheMovieDb plugin.
#[derive(Debug, Clone, Default)]
pub struct TmdbPlugin {
    api_key: Option<String>,
    language: Option<String>,
}

impl TmdbPlugin {
    pub fn new(api_key: Option<String>, language: Option<String>) -> Self {
        let api_key = api_key
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|k| !k.trim().is_empty());
        Self { api_key, language }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Build an API URL; `params` are appended after the key and language.
    fn url(&self, path: &str, params: &[(&str, String)]) -> Result<String, PluginError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| PluginError::NotConfigured(format!("{NAME} API key")))?;
        let mut url = format!("{API_BASE}{path}?api_key={}", urlencoding::encode(key));
        if let Some(language) = &self.language {
            url.push_str("&language=");
            url.push_str(&urlencoding::encode(language));
        }
        for (name, value) in params {
            url.push('&');
            url.push_str(name);
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }
        Ok(url)
    }
}

#[async_trait]
impl SourcePlugin for TmdbPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn cross_references(&self) -> Vec<&str> {
        vec![super::imdb::NAME]
    }

    /// Results are ranked by relevance.
    fn trusts_search_order(&self) -> bool {
        true
    }

    async fn search(&self, session: &ScanSession, query: &SearchQuery) -> Result<Vec<Candidate>, PluginError> {
        let (path, year_param) = match query.kind {
            MediaKind::Movie => ("/search/movie", "year"),
            MediaKind::TvShow => ("/search/tv", "first_air_date_year"),
        };
        let mut params = vec![("query", query.title.clone())];
        if let Some(year) = query.year.exact_year() {
            params.push((year_param, year.to_string()));
        }
        let url = self.url(path, &params)?;
        let page: SearchPage = session.client().request_json(&url).await?;
        Ok(page.results.iter().map(SearchResult::candidate).collect())
    }

    async fn lookup_by_xref(
        &self,
        session: &ScanSession,
        source: &str,
        id: &str,
    ) -> Result<Option<String>, PluginError> {
        if source != super::imdb::NAME {
            return Ok(None);
        }
        let url = self.url(&format!("/find/{id}"), &[("external_source", "imdb_id".to_string())])?;
        let found: FindResponse = session.client().request_json(&url).await?;
        Ok(found.first_id())
    }

    async fn scan_media(&self, session: &ScanSession, record: &mut MediaRecord) -> Result<MergeSummary, PluginError> {
        let Some(id) = record.identifier(NAME).map(str::to_owned) else {
            return Ok(MergeSummary::default());
        };

        let (path, discriminator, append) = match record.kind {
            MediaKind::Movie => (format!("/movie/{id}"), "movie", "credits,release_dates"),
            MediaKind::TvShow => (format!("/tv/{id}"), "tv", "credits,external_ids"),
        };
        let url = self.url(&path, &[("append_to_response", append.to_string())])?;
        let key = CacheKey::new(NAME, discriminator, id.as_str());
        let details: TmdbDetails = session
            .cache()
            .get_or_fetch(key, || session.client().request_json(&url))
            .await?;

        if let Some(score) = details.rating() {
            record.set_rating(NAME, score);
        }
        if let Some(imdb_id) = details.imdb_id() {
            record
                .ids_mut()
                .insert(SourceIdentifier::new(super::imdb::NAME, imdb_id));
        }
        Ok(session.apply(record, details.updates())?)
    }

    async fn search_person(&self, session: &ScanSession, name: &str) -> Result<Vec<Candidate>, PluginError> {
        let url = self.url("/search/person", &[("query", name.to_string())])?;
        let page: PersonSearchPage = session.client().request_json(&url).await?;
        Ok(page
            .results
            .into_iter()
            .map(|p| Candidate::new(p.id.to_string(), p.name))
            .collect())
    }

    async fn scan_person(&self, session: &ScanSession, person: &mut PersonRecord) -> Result<MergeSummary, PluginError> {
        let Some(id) = person.identifier(NAME).map(str::to_owned) else {
            return Ok(MergeSummary::default());
        };

        let url = self.url(
            &format!("/person/{id}"),
            &[("append_to_response", "combined_credits".to_string())],
        )?;
        let key = CacheKey::new(NAME, "person", id.as_str());
        let details: TmdbPerson = session
            .cache()
            .get_or_fetch(key, || session.client().request_json(&url))
            .await?;

        if let Some(imdb_id) = details.imdb_id.as_deref().filter(|s| !s.is_empty()) {
            person
                .ids_mut()
                .insert(SourceIdentifier::new(super::imdb::NAME, imdb_id));
        }
        Ok(session.apply(person, details.updates())?)
    }

    /// Page links of the record's own kind only; a movie sidecar may link a series.
    fn scan_companion_file(&self, text: &str, record: &mut MediaRecord) -> bool {
        let wanted = match record.kind {
            MediaKind::Movie => "movie",
            MediaKind::TvShow => "tv",
        };
        let Some(id) = PAGE_URL
            .captures_iter(text)
            .find(|caps| &caps[1] == wanted)
            .map(|caps| caps[2].to_string())
        else {
            return false;
        };
        record.ids_mut().insert(SourceIdentifier::new(NAME, id))
    }
}

fn parse_date(s: Option<&str>) -> Option<NaiveDate> {
    s.and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
}

fn year_of(s: Option<&str>) -> Option<u32> {
    s.and_then(|s| s.get(..4)).and_then(|y| y.parse().ok())
}

// ============================================================================
// TMDb API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    results: Vec<SearchResult>,
}

/// Movie (`title`) or TV (`name`) search hit.
#[derive(Debug, Deserialize)]
struct SearchResult {
    id: u64,
    #[serde(alias = "name")]
    title: String,
    #[serde(default, alias = "original_name")]
    original_title: Option<String>,
    #[serde(default, alias = "first_air_date")]
    release_date: Option<String>,
}

impl SearchResult {
    fn candidate(&self) -> Candidate {
        Candidate::new(self.id.to_string(), self.title.clone())
            .with_original_title(self.original_title.clone())
            .with_year(year_of(self.release_date.as_deref()))
    }
}

#[derive(Debug, Deserialize)]
struct FindResponse {
    #[serde(default)]
    movie_results: Vec<IdOnly>,
    #[serde(default)]
    tv_results: Vec<IdOnly>,
}

impl FindResponse {
    fn first_id(&self) -> Option<String> {
        self.movie_results
            .first()
            .or_else(|| self.tv_results.first())
            .map(|r| r.id.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Named {
    name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CastMember {
    id: u64,
    name: String,
    #[serde(default)]
    character: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CrewMember {
    id: u64,
    name: String,
    #[serde(default)]
    job: Option<String>,
    #[serde(default)]
    department: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Credits {
    #[serde(default)]
    cast: Vec<CastMember>,
    #[serde(default)]
    crew: Vec<CrewMember>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ReleaseDates {
    #[serde(default)]
    results: Vec<CountryReleases>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CountryReleases {
    iso_3166_1: String,
    #[serde(default)]
    release_dates: Vec<Certification>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Certification {
    #[serde(default)]
    certification: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ExternalIds {
    #[serde(default)]
    imdb_id: Option<String>,
}

/// `/movie/{id}` or `/tv/{id}` with appended credits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TmdbDetails {
    #[serde(alias = "name")]
    title: String,
    #[serde(default, alias = "original_name")]
    original_title: Option<String>,
    #[serde(default)]
    overview: Option<String>,
    #[serde(default)]
    tagline: Option<String>,
    #[serde(default)]
    runtime: Option<u32>,
    #[serde(default)]
    episode_run_time: Vec<u32>,
    #[serde(default, alias = "first_air_date")]
    release_date: Option<String>,
    #[serde(default)]
    genres: Vec<Named>,
    #[serde(default)]
    production_countries: Vec<Named>,
    #[serde(default)]
    production_companies: Vec<Named>,
    #[serde(default)]
    networks: Vec<Named>,
    #[serde(default)]
    vote_average: Option<f64>,
    #[serde(default)]
    vote_count: u64,
    #[serde(default)]
    imdb_id: Option<String>,
    #[serde(default)]
    external_ids: Option<ExternalIds>,
    #[serde(default)]
    credits: Credits,
    #[serde(default)]
    release_dates: ReleaseDates,
}

impl TmdbDetails {
    /// 0-100, only when someone actually voted.
    fn rating(&self) -> Option<u32> {
        let average = self.vote_average.filter(|_| self.vote_count > 0)?;
        let scaled = (average * 10.0).round().clamp(0.0, 100.0);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let percent = scaled as u32;
        Some(percent)
    }

    fn imdb_id(&self) -> Option<&str> {
        self.imdb_id
            .as_deref()
            .or_else(|| self.external_ids.as_ref().and_then(|e| e.imdb_id.as_deref()))
            .filter(|id| !id.is_empty())
    }

    fn certification(&self) -> Option<String> {
        self.release_dates
            .results
            .iter()
            .find(|r| r.iso_3166_1 == CERTIFICATION_COUNTRY)?
            .release_dates
            .iter()
            .map(|r| r.certification.trim())
            .find(|c| !c.is_empty())
            .map(str::to_string)
    }

    fn crew(&self, wanted: impl Fn(&CrewMember) -> bool) -> Vec<Credit> {
        let mut credits: Vec<Credit> = Vec::new();
        for member in self.credits.crew.iter().filter(|m| wanted(m)) {
            let id = member.id.to_string();
            if credits.iter().any(|c| c.id.as_deref() == Some(id.as_str())) {
                continue;
            }
            let credit = Credit::new(member.name.clone()).with_id(id);
            credits.push(match &member.job {
                Some(job) => credit.with_role(job.clone()),
                None => credit,
            });
        }
        credits
    }

    fn updates(&self) -> FieldUpdates {
        let release_date = parse_date(self.release_date.as_deref());
        let cast: Vec<Credit> = self
            .credits
            .cast
            .iter()
            .map(|m| {
                let credit = Credit::new(m.name.clone()).with_id(m.id.to_string());
                match m.character.as_deref().filter(|c| !c.is_empty()) {
                    Some(character) => credit.with_role(character),
                    None => credit,
                }
            })
            .collect();
        let company = self
            .production_companies
            .first()
            .or_else(|| self.networks.first())
            .map(|c| c.name.clone());

        let mut updates = FieldUpdates::new(FieldSource::plugin(NAME));
        updates
            .set(Field::Title, self.title.clone())
            .set_opt(Field::OriginalTitle, self.original_title.clone())
            .set_opt(Field::Year, year_of(self.release_date.as_deref()))
            .set_opt(Field::Plot, self.overview.clone())
            .set_opt(Field::Tagline, self.tagline.clone())
            .set_opt(Field::Runtime, self.runtime.or_else(|| self.episode_run_time.first().copied()))
            .set_opt(Field::Certification, self.certification())
            .set_opt(Field::ReleaseDate, release_date)
            .set(Field::Genres, self.genres.iter().map(|g| g.name.clone()).collect::<Vec<_>>())
            .set(
                Field::Countries,
                self.production_countries.iter().map(|c| c.name.clone()).collect::<Vec<_>>(),
            )
            .set_opt(Field::Company, company)
            .set(Field::Cast, cast)
            .set(Field::Directors, self.crew(|m| m.job.as_deref() == Some("Director")))
            .set(Field::Writers, self.crew(|m| m.department.as_deref() == Some("Writing")));
        updates
    }
}

#[derive(Debug, Deserialize)]
struct PersonSearchPage {
    #[serde(default)]
    results: Vec<PersonHit>,
}

#[derive(Debug, Deserialize)]
struct PersonHit {
    id: u64,
    name: String,
}

/// Movie or TV entry of `combined_credits`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CombinedCredit {
    id: u64,
    #[serde(default, alias = "name")]
    title: Option<String>,
    #[serde(default, alias = "first_air_date")]
    release_date: Option<String>,
    #[serde(default)]
    character: Option<String>,
    #[serde(default)]
    job: Option<String>,
    #[serde(default)]
    department: Option<String>,
}

impl CombinedCredit {
    fn film_credit(&self, default_job: Option<&str>) -> Option<FilmCredit> {
        Some(FilmCredit {
            title: self.title.clone().filter(|t| !t.is_empty())?,
            year: year_of(self.release_date.as_deref()),
            job: self.job.clone().or_else(|| default_job.map(str::to_string)),
            department: self.department.clone(),
            character: self.character.clone().filter(|c| !c.is_empty()),
            id: Some(self.id.to_string()),
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CombinedCredits {
    #[serde(default)]
    cast: Vec<CombinedCredit>,
    #[serde(default)]
    crew: Vec<CombinedCredit>,
}

/// `/person/{id}` with appended combined credits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TmdbPerson {
    name: String,
    #[serde(default)]
    biography: Option<String>,
    #[serde(default)]
    birthday: Option<String>,
    #[serde(default)]
    place_of_birth: Option<String>,
    #[serde(default)]
    imdb_id: Option<String>,
    #[serde(default)]
    combined_credits: CombinedCredits,
}

impl TmdbPerson {
    /// Filmography newest first; undated entries last.
    fn filmography(&self) -> Vec<FilmCredit> {
        let mut films: Vec<FilmCredit> = self
            .combined_credits
            .cast
            .iter()
            .filter_map(|c| c.film_credit(Some("Actor")))
            .chain(self.combined_credits.crew.iter().filter_map(|c| c.film_credit(None)))
            .collect();
        films.sort_by(|a, b| b.year.cmp(&a.year));
        films
    }

    fn updates(&self) -> FieldUpdates {
        let mut updates = FieldUpdates::new(FieldSource::plugin(NAME));
        updates
            .set(Field::Name, self.name.clone())
            .set_opt(Field::Biography, self.biography.clone())
            .set_opt(Field::BirthDate, parse_date(self.birthday.as_deref()))
            .set_opt(Field::BirthPlace, self.place_of_birth.clone())
            .set(Field::Filmography, self.filmography());
        updates
    }
}
