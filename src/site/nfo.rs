//! Sidecar NFO reader.
//!
//! Reads Kodi-style XML (`<movie><title>…</title><uniqueid type="imdb">…`)
//! and plain-text NFOs that only contain a database link. Values found here
//! are user-supplied: they are written as [`FieldSource::User`] and locked
//! against later scans.

use std::borrow::Cow;
use std::sync::LazyLock;

use chrono::NaiveDate;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use regex::Regex;
use tracing::debug;

use crate::error::MergeError;
use crate::merge::{FieldUpdates, MergeSummary, OverridePolicy};
use crate::model::field::{leading_number, split_list};
use crate::model::{Credit, Field, FieldSource, FieldValue, MediaRecord, Record, SourceIdentifier};

use super::{imdb, tmdb};

static IMDB_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(tt\d{7,9})\b").expect("valid regex"));
static TMDB_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"themoviedb\.org/(?:movie|tv)/(\d+)").expect("valid regex"));

/// What one sidecar file says about a record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NfoData {
    pub ids: Vec<SourceIdentifier>,
    pub fields: Vec<(Field, FieldValue)>,
}

impl NfoData {
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty() && self.fields.is_empty()
    }

    pub fn get(&self, field: Field) -> Option<&FieldValue> {
        self.fields.iter().find(|(f, _)| *f == field).map(|(_, v)| v)
    }
}

/// Reads user values and identifiers from companion files.
#[derive(Debug, Clone, Copy, Default)]
pub struct NfoReader;

impl NfoReader {
    /// Extract ids and field values.
    pub fn parse(&self, text: &str) -> NfoData {
        let mut data = NfoData::default();
        let mut genres = Vec::new();
        let mut countries = Vec::new();
        let mut directors = Vec::new();
        let mut writers = Vec::new();

        let xml = if looks_like_xml(text) {
            read_xml(text).unwrap_or_else(|e| {
                debug!(error = %e, "unreadable XML NFO, looking for links only");
                XmlNfo::default()
            })
        } else {
            XmlNfo::default()
        };

        for Leaf { tag, kind, value } in xml.leaves {
            match tag.as_str() {
                "uniqueid" => {
                    if let Some(source) = kind.as_deref().map(normalize_source) {
                        data.ids.push(SourceIdentifier::new(source, value));
                    }
                }
                "id" | "imdbid" | "imdb" if IMDB_ID.is_match(&value) => {
                    data.ids.push(SourceIdentifier::new(imdb::NAME, value));
                }
                "tmdbid" => data.ids.push(SourceIdentifier::new(tmdb::NAME, value)),
                "genre" => genres.extend(split_list(&value)),
                "country" => countries.extend(split_list(&value)),
                "director" => directors.push(Credit::new(value)),
                "credits" | "writer" => writers.push(Credit::new(value)),
                _ => {
                    if let Some((field, parsed)) = scalar_field(&tag, &value) {
                        data.fields.push((field, parsed));
                    }
                }
            }
        }

        let cast = xml.actors;
        for (field, value) in [
            (Field::Genres, FieldValue::List(genres)),
            (Field::Countries, FieldValue::List(countries)),
            (Field::Directors, FieldValue::Credits(directors)),
            (Field::Writers, FieldValue::Credits(writers)),
            (Field::Cast, FieldValue::Credits(cast)),
        ] {
            if !value.is_empty() {
                data.fields.push((field, value));
            }
        }

        // Plain-text NFOs often hold nothing but a link.
        if !data.ids.iter().any(|id| id.source == imdb::NAME) {
            if let Some(id) = IMDB_ID.captures(text).and_then(|c| c.get(1)) {
                data.ids.push(SourceIdentifier::new(imdb::NAME, id.as_str()));
            }
        }
        if !data.ids.iter().any(|id| id.source == tmdb::NAME) {
            if let Some(id) = TMDB_URL.captures(text).and_then(|c| c.get(1)) {
                data.ids.push(SourceIdentifier::new(tmdb::NAME, id.as_str()));
            }
        }

        data
    }

    /// Parse `text` and write its values into `record` as user values.
    ///
    /// Ids already present for a source are kept.
    pub fn apply(&self, text: &str, record: &mut MediaRecord, policy: &OverridePolicy) -> Result<MergeSummary, MergeError> {
        let data = self.parse(text);
        for id in data.ids {
            if !record.ids_mut().insert(id.clone()) {
                debug!(%id, "companion id conflicts with existing one");
            }
        }
        let mut updates = FieldUpdates::new(FieldSource::User);
        for (field, value) in data.fields {
            updates.set(field, value);
        }
        updates.apply(record, policy)
    }
}

fn normalize_source(kind: &str) -> String {
    match kind.to_ascii_lowercase().as_str() {
        "tmdb" => tmdb::NAME.to_string(),
        other => other.to_string(),
    }
}

fn scalar_field(tag: &str, value: &str) -> Option<(Field, FieldValue)> {
    let field = match tag {
        "title" => Field::Title,
        "originaltitle" => Field::OriginalTitle,
        "plot" => Field::Plot,
        "outline" => Field::Outline,
        "tagline" => Field::Tagline,
        "mpaa" | "certification" => Field::Certification,
        "studio" => Field::Company,
        "year" => return leading_number(value).map(|y| (Field::Year, FieldValue::Number(y))),
        "runtime" => return leading_number(value).map(|m| (Field::Runtime, FieldValue::Number(m))),
        "premiered" | "releasedate" => {
            return NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .map(|d| (Field::ReleaseDate, FieldValue::Date(d)));
        }
        _ => return None,
    };
    Some((field, FieldValue::Text(value.to_string())))
}

/// A direct child of the root element.
struct Leaf {
    tag: String,
    /// `type` attribute of `<uniqueid>`.
    kind: Option<String>,
    value: String,
}

#[derive(Default)]
struct ActorBuilder {
    name: Option<String>,
    role: Option<String>,
}

impl ActorBuilder {
    fn build(self) -> Option<Credit> {
        let credit = Credit::new(self.name.filter(|n| !n.is_empty())?);
        Some(match self.role.filter(|r| !r.is_empty()) {
            Some(role) => credit.with_role(role),
            None => credit,
        })
    }
}

#[derive(Default)]
struct XmlNfo {
    leaves: Vec<Leaf>,
    actors: Vec<Credit>,
}

fn looks_like_xml(text: &str) -> bool {
    text.trim_start().starts_with('<')
}

/// Collect the root's leaf elements and its `<actor>` blocks.
///
/// Deeper elements (`<set><name>`, `<fileinfo>`, `<ratings>`) are skipped.
fn read_xml(text: &str) -> Result<XmlNfo, quick_xml::Error> {
    let mut reader = Reader::from_reader(text.as_bytes());
    reader.config_mut().trim_text(true);

    let mut out = XmlNfo::default();
    let mut buf = Vec::new();
    let mut path: Vec<String> = Vec::new();
    let mut value = String::new();
    let mut id_type = None;
    let mut actor: Option<ActorBuilder> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_ascii_lowercase();
                match name.as_str() {
                    "uniqueid" => {
                        id_type = e
                            .try_get_attribute("type")
                            .ok()
                            .flatten()
                            .and_then(|attr| attr.unescape_value().ok().map(Cow::into_owned));
                    }
                    "actor" if path.len() == 1 => actor = Some(ActorBuilder::default()),
                    _ => {}
                }
                path.push(name);
                value.clear();
            }
            Event::Text(e) => {
                let text = e
                    .unescape()
                    .map_or_else(|_| String::from_utf8_lossy(&e).into_owned(), Cow::into_owned);
                value.push_str(&text);
            }
            Event::CData(e) => value.push_str(&String::from_utf8_lossy(&e)),
            Event::End(_) => {
                let Some(name) = path.pop() else {
                    continue;
                };
                let text = std::mem::take(&mut value).trim().to_string();
                if name == "actor" && path.len() == 1 {
                    if let Some(credit) = actor.take().and_then(ActorBuilder::build) {
                        out.actors.push(credit);
                    }
                } else if let Some(builder) = actor.as_mut() {
                    match name.as_str() {
                        "name" if path.len() == 2 => builder.name = Some(text),
                        "role" if path.len() == 2 => builder.role = Some(text),
                        _ => {}
                    }
                } else if path.len() == 1 && !text.is_empty() {
                    let kind = if name == "uniqueid" { id_type.take() } else { None };
                    out.leaves.push(Leaf { tag: name, kind, value: text });
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}
