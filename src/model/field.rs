//! Field identifiers, their metadata, and typed field values.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;

/// Every attribute a source plugin may populate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum Field {
    Title,
    OriginalTitle,
    Year,
    Plot,
    Outline,
    Tagline,
    Runtime,
    Certification,
    ReleaseDate,
    Genres,
    Countries,
    Company,
    Cast,
    Directors,
    Writers,
    Name,
    Biography,
    BirthDate,
    BirthPlace,
    Filmography,
}

/// Shape of the value a field holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Number,
    Date,
    List,
    Credits,
    Filmography,
}

/// Which record type a field belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldScope {
    Media,
    Person,
}

/// Static metadata attached to each [`Field`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldInfo {
    /// Configuration name (snake case).
    pub name: &'static str,
    pub kind: FieldKind,
    pub scope: FieldScope,
}

const fn info(name: &'static str, kind: FieldKind, scope: FieldScope) -> FieldInfo {
    FieldInfo { name, kind, scope }
}

impl Field {
    /// Fields of a [`crate::model::MediaRecord`], in display order.
    pub const MEDIA: [Field; 15] = [
        Field::Title,
        Field::OriginalTitle,
        Field::Year,
        Field::Plot,
        Field::Outline,
        Field::Tagline,
        Field::Runtime,
        Field::Certification,
        Field::ReleaseDate,
        Field::Genres,
        Field::Countries,
        Field::Company,
        Field::Cast,
        Field::Directors,
        Field::Writers,
    ];

    /// Fields of a [`crate::model::PersonRecord`], in display order.
    pub const PERSON: [Field; 5] = [
        Field::Name,
        Field::Biography,
        Field::BirthDate,
        Field::BirthPlace,
        Field::Filmography,
    ];

    pub const fn info(self) -> FieldInfo {
        use FieldKind::{Credits, Date, List, Number, Text};
        use FieldScope::{Media, Person};

        match self {
            Field::Title => info("title", Text, Media),
            Field::OriginalTitle => info("original_title", Text, Media),
            Field::Year => info("year", Number, Media),
            Field::Plot => info("plot", Text, Media),
            Field::Outline => info("outline", Text, Media),
            Field::Tagline => info("tagline", Text, Media),
            Field::Runtime => info("runtime", Number, Media),
            Field::Certification => info("certification", Text, Media),
            Field::ReleaseDate => info("release_date", Date, Media),
            Field::Genres => info("genres", List, Media),
            Field::Countries => info("countries", List, Media),
            Field::Company => info("company", Text, Media),
            Field::Cast => info("cast", Credits, Media),
            Field::Directors => info("directors", Credits, Media),
            Field::Writers => info("writers", Credits, Media),
            Field::Name => info("name", Text, Person),
            Field::Biography => info("biography", Text, Person),
            Field::BirthDate => info("birth_date", Date, Person),
            Field::BirthPlace => info("birth_place", Text, Person),
            Field::Filmography => info("filmography", FieldKind::Filmography, Person),
        }
    }

    pub const fn name(self) -> &'static str {
        self.info().name
    }

    pub const fn kind(self) -> FieldKind {
        self.info().kind
    }

    /// List-valued fields are replaced wholesale on merge.
    pub const fn is_list(self) -> bool {
        matches!(
            self.kind(),
            FieldKind::List | FieldKind::Credits | FieldKind::Filmography
        )
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Accepts `original_title`, `originalTitle`, `original-title` and `ORIGINALTITLE`.
impl FromStr for Field {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();

        Field::MEDIA
            .iter()
            .chain(Field::PERSON.iter())
            .copied()
            .find(|field| field.name().replace('_', "") == wanted)
            .ok_or_else(|| ConfigError::UnknownField(s.to_string()))
    }
}

impl TryFrom<String> for Field {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Field> for &'static str {
    fn from(field: Field) -> Self {
        field.name()
    }
}

/// One person credited on a movie (actor, director, writer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credit {
    pub name: String,
    /// Native id of the person in the source that supplied the credit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Character for actors, job for crew.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Credit {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            role: None,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

/// One film in a person's filmography.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FilmCredit {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// A typed value for one [`Field`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Number(u32),
    Date(NaiveDate),
    List(Vec<String>),
    Credits(Vec<Credit>),
    Filmography(Vec<FilmCredit>),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Text(_) => FieldKind::Text,
            FieldValue::Number(_) => FieldKind::Number,
            FieldValue::Date(_) => FieldKind::Date,
            FieldValue::List(_) => FieldKind::List,
            FieldValue::Credits(_) => FieldKind::Credits,
            FieldValue::Filmography(_) => FieldKind::Filmography,
        }
    }

    /// Blank text, zero numbers and empty lists carry no information.
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::Number(n) => *n == 0,
            FieldValue::Date(_) => false,
            FieldValue::List(v) => v.iter().all(|s| s.trim().is_empty()),
            FieldValue::Credits(v) => v.is_empty(),
            FieldValue::Filmography(v) => v.is_empty(),
        }
    }

    /// Convert loosely-typed JSON (external plugins) into the value `field` expects.
    ///
    /// Returns `None` when the JSON cannot represent that field.
    pub fn from_json(field: Field, value: &Value) -> Option<FieldValue> {
        match field.kind() {
            FieldKind::Text => match value {
                Value::String(s) => Some(FieldValue::Text(s.clone())),
                Value::Number(n) => Some(FieldValue::Text(n.to_string())),
                _ => None,
            },
            FieldKind::Number => match value {
                Value::Number(n) => n
                    .as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .map(FieldValue::Number),
                Value::String(s) => leading_number(s).map(FieldValue::Number),
                _ => None,
            },
            FieldKind::Date => value
                .as_str()
                .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
                .map(FieldValue::Date),
            FieldKind::List => match value {
                Value::Array(items) => Some(FieldValue::List(
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect(),
                )),
                Value::String(s) => Some(FieldValue::List(split_list(s))),
                _ => None,
            },
            FieldKind::Credits => match value {
                Value::Array(items) => Some(FieldValue::Credits(
                    items
                        .iter()
                        .filter_map(|item| match item {
                            Value::String(name) => Some(Credit::new(name.clone())),
                            Value::Object(_) => serde_json::from_value(item.clone()).ok(),
                            _ => None,
                        })
                        .collect(),
                )),
                Value::String(s) => Some(FieldValue::Credits(
                    split_list(s).into_iter().map(Credit::new).collect(),
                )),
                _ => None,
            },
            FieldKind::Filmography => serde_json::from_value(value.clone())
                .ok()
                .map(FieldValue::Filmography),
        }
    }
}

/// Parse the leading digits of strings like `"136 min"`.
pub(crate) fn leading_number(s: &str) -> Option<u32> {
    let digits: String = s
        .trim()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Split `"Drama / Crime, Thriller"` style lists.
pub(crate) fn split_list(s: &str) -> Vec<String> {
    s.split(['/', ',', '|'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<u32> for FieldValue {
    fn from(n: u32) -> Self {
        FieldValue::Number(n)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(d: NaiveDate) -> Self {
        FieldValue::Date(d)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(v: Vec<String>) -> Self {
        FieldValue::List(v)
    }
}

impl From<Vec<Credit>> for FieldValue {
    fn from(v: Vec<Credit>) -> Self {
        FieldValue::Credits(v)
    }
}

impl From<Vec<FilmCredit>> for FieldValue {
    fn from(v: Vec<FilmCredit>) -> Self {
        FieldValue::Filmography(v)
    }
}
