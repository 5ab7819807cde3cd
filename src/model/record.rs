//! Media and person records with per-field source annotations.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::field::{Credit, Field, FieldScope, FieldValue, FilmCredit};
use super::ids::{IdMap, SourceIdentifier};
use crate::error::MergeError;

/// Name under which user-supplied (NFO) values appear in priority lists.
pub const USER_SOURCE: &str = "nfo";

/// Who wrote the current value of a field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    /// Seeded by the caller when the record was created (file name, credit list).
    Initial,
    /// Supplied by the user, usually through a sidecar NFO file.
    User,
    /// Written by the named source plugin.
    Plugin(String),
}

impl FieldSource {
    pub fn plugin(name: impl Into<String>) -> Self {
        FieldSource::Plugin(name.into())
    }

    /// Name used in priority lists and reports.
    pub fn name(&self) -> &str {
        match self {
            FieldSource::Initial => "initial",
            FieldSource::User => USER_SOURCE,
            FieldSource::Plugin(name) => name,
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, FieldSource::User)
    }
}

/// A field value together with the source that set it.
///
/// Value and source live in one slot so they are always replaced together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSlot {
    pub value: FieldValue,
    pub source: FieldSource,
    /// Scans may not overwrite a locked slot unless the policy says so.
    pub locked: bool,
}

/// The set of populated fields of one record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldStore {
    slots: BTreeMap<Field, FieldSlot>,
}

impl FieldStore {
    pub fn get(&self, field: Field) -> Option<&FieldValue> {
        self.slots.get(&field).map(|slot| &slot.value)
    }

    pub fn slot(&self, field: Field) -> Option<&FieldSlot> {
        self.slots.get(&field)
    }

    pub fn override_source(&self, field: Field) -> Option<&FieldSource> {
        self.slots.get(&field).map(|slot| &slot.source)
    }

    pub fn is_locked(&self, field: Field) -> bool {
        self.slots.get(&field).is_some_and(|slot| slot.locked)
    }

    pub fn is_set(&self, field: Field) -> bool {
        self.slots.contains_key(&field)
    }

    /// Store a value without consulting any policy.
    ///
    /// User-sourced values are locked.
    pub(crate) fn put(&mut self, field: Field, value: FieldValue, source: FieldSource) {
        let locked = source.is_user();
        self.slots.insert(
            field,
            FieldSlot {
                value,
                source,
                locked,
            },
        );
    }

    /// Mark an existing field as user-locked. Returns `false` if unset.
    pub fn lock(&mut self, field: Field) -> bool {
        match self.slots.get_mut(&field) {
            Some(slot) => {
                slot.locked = true;
                true
            }
            None => false,
        }
    }

    pub fn unlock(&mut self, field: Field) {
        if let Some(slot) = self.slots.get_mut(&field) {
            slot.locked = false;
        }
    }

    pub fn text(&self, field: Field) -> Option<&str> {
        match self.get(field) {
            Some(FieldValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn number(&self, field: Field) -> Option<u32> {
        match self.get(field) {
            Some(FieldValue::Number(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn date(&self, field: Field) -> Option<NaiveDate> {
        match self.get(field) {
            Some(FieldValue::Date(d)) => Some(*d),
            _ => None,
        }
    }

    pub fn list(&self, field: Field) -> &[String] {
        match self.get(field) {
            Some(FieldValue::List(v)) => v,
            _ => &[],
        }
    }

    pub fn credits(&self, field: Field) -> &[Credit] {
        match self.get(field) {
            Some(FieldValue::Credits(v)) => v,
            _ => &[],
        }
    }

    pub fn filmography(&self) -> &[FilmCredit] {
        match self.get(Field::Filmography) {
            Some(FieldValue::Filmography(v)) => v,
            _ => &[],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, &FieldSlot)> {
        self.slots.iter().map(|(field, slot)| (*field, slot))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Shared surface of media and person records used by the merge policy.
pub trait Record {
    const SCOPE: FieldScope;

    fn fields(&self) -> &FieldStore;
    fn fields_mut(&mut self) -> &mut FieldStore;
    fn ids(&self) -> &IdMap;
    fn ids_mut(&mut self) -> &mut IdMap;

    /// Title or name, used in log lines.
    fn label(&self) -> &str;

    fn override_source(&self, field: Field) -> Option<&FieldSource> {
        self.fields().override_source(field)
    }

    /// Write a field directly, bypassing the override policy.
    ///
    /// Still rejects values of the wrong kind or scope.
    fn set_field(
        &mut self,
        field: Field,
        value: impl Into<FieldValue>,
        source: FieldSource,
    ) -> Result<(), MergeError>
    where
        Self: Sized,
    {
        let value = value.into();
        check_value(Self::SCOPE, field, &value)?;
        self.fields_mut().put(field, value, source);
        Ok(())
    }
}

/// Reject values that cannot live in `field` of a `scope` record.
pub fn check_value(scope: FieldScope, field: Field, value: &FieldValue) -> Result<(), MergeError> {
    let info = field.info();
    if info.scope != scope {
        return Err(MergeError::WrongScope { field, scope });
    }
    if value.kind() != info.kind {
        return Err(MergeError::KindMismatch {
            field,
            expected: info.kind,
            actual: value.kind(),
        });
    }
    Ok(())
}

/// Movie or TV show.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    #[default]
    Movie,
    TvShow,
}

/// One scanned movie or TV show.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MediaRecord {
    /// File or folder name the record was created from.
    pub base_name: String,
    pub kind: MediaKind,
    fields: FieldStore,
    ids: IdMap,
    /// Normalized 0-100 score per source.
    ratings: BTreeMap<String, u8>,
}

impl MediaRecord {
    /// Create a record seeded with a title derived from the file name.
    pub fn new(title: impl Into<String>) -> Self {
        let title = title.into();
        let mut record = Self {
            base_name: title.clone(),
            ..Self::default()
        };
        if !title.trim().is_empty() {
            record
                .fields
                .put(Field::Title, FieldValue::Text(title), FieldSource::Initial);
        }
        record
    }

    #[must_use]
    pub fn with_year(mut self, year: u32) -> Self {
        if year > 0 {
            self.fields
                .put(Field::Year, FieldValue::Number(year), FieldSource::Initial);
        }
        self
    }

    #[must_use]
    pub fn with_original_title(mut self, title: impl Into<String>) -> Self {
        let title = title.into();
        if !title.trim().is_empty() {
            self.fields
                .put(Field::OriginalTitle, FieldValue::Text(title), FieldSource::Initial);
        }
        self
    }

    #[must_use]
    pub fn with_kind(mut self, kind: MediaKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn with_id(mut self, source: &str, id: &str) -> Self {
        self.ids.insert(SourceIdentifier::new(source, id));
        self
    }

    pub fn title(&self) -> Option<&str> {
        self.fields.text(Field::Title)
    }

    pub fn original_title(&self) -> Option<&str> {
        self.fields.text(Field::OriginalTitle)
    }

    pub fn year(&self) -> Option<u32> {
        self.fields.number(Field::Year)
    }

    pub fn plot(&self) -> Option<&str> {
        self.fields.text(Field::Plot)
    }

    pub fn outline(&self) -> Option<&str> {
        self.fields.text(Field::Outline)
    }

    pub fn tagline(&self) -> Option<&str> {
        self.fields.text(Field::Tagline)
    }

    /// Runtime in minutes.
    pub fn runtime(&self) -> Option<u32> {
        self.fields.number(Field::Runtime)
    }

    pub fn certification(&self) -> Option<&str> {
        self.fields.text(Field::Certification)
    }

    pub fn release_date(&self) -> Option<NaiveDate> {
        self.fields.date(Field::ReleaseDate)
    }

    pub fn genres(&self) -> &[String] {
        self.fields.list(Field::Genres)
    }

    pub fn countries(&self) -> &[String] {
        self.fields.list(Field::Countries)
    }

    pub fn company(&self) -> Option<&str> {
        self.fields.text(Field::Company)
    }

    pub fn cast(&self) -> &[Credit] {
        self.fields.credits(Field::Cast)
    }

    pub fn directors(&self) -> &[Credit] {
        self.fields.credits(Field::Directors)
    }

    pub fn writers(&self) -> &[Credit] {
        self.fields.credits(Field::Writers)
    }

    pub fn identifier(&self, source: &str) -> Option<&str> {
        self.ids.get(source)
    }

    pub fn rating(&self, source: &str) -> Option<u8> {
        self.ratings.get(source).copied()
    }

    pub fn ratings(&self) -> &BTreeMap<String, u8> {
        &self.ratings
    }

    /// Store a source's own rating, clamped to 0-100.
    ///
    /// Ratings are keyed by source, so no override policy applies.
    pub fn set_rating(&mut self, source: &str, score: u32) {
        let score = u8::try_from(score.min(100)).unwrap_or(100);
        self.ratings.insert(source.to_string(), score);
    }
}

impl Record for MediaRecord {
    const SCOPE: FieldScope = FieldScope::Media;

    fn fields(&self) -> &FieldStore {
        &self.fields
    }

    fn fields_mut(&mut self) -> &mut FieldStore {
        &mut self.fields
    }

    fn ids(&self) -> &IdMap {
        &self.ids
    }

    fn ids_mut(&mut self) -> &mut IdMap {
        &mut self.ids
    }

    fn label(&self) -> &str {
        self.title().unwrap_or(&self.base_name)
    }
}

/// An actor, director, writer or other crew member.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PersonRecord {
    fields: FieldStore,
    ids: IdMap,
}

impl PersonRecord {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let mut record = Self::default();
        if !name.trim().is_empty() {
            record
                .fields
                .put(Field::Name, FieldValue::Text(name), FieldSource::Initial);
        }
        record
    }

    /// Create a person from a movie credit, keeping the credit's id for `source`.
    pub fn from_credit(credit: &Credit, source: &str) -> Self {
        let mut person = Self::new(credit.name.clone());
        if let Some(id) = &credit.id {
            person.ids.insert(SourceIdentifier::new(source, id.clone()));
        }
        person
    }

    #[must_use]
    pub fn with_id(mut self, source: &str, id: &str) -> Self {
        self.ids.insert(SourceIdentifier::new(source, id));
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.fields.text(Field::Name)
    }

    pub fn biography(&self) -> Option<&str> {
        self.fields.text(Field::Biography)
    }

    pub fn birth_date(&self) -> Option<NaiveDate> {
        self.fields.date(Field::BirthDate)
    }

    pub fn birth_place(&self) -> Option<&str> {
        self.fields.text(Field::BirthPlace)
    }

    pub fn filmography(&self) -> &[FilmCredit] {
        self.fields.filmography()
    }

    pub fn identifier(&self, source: &str) -> Option<&str> {
        self.ids.get(source)
    }
}

impl Record for PersonRecord {
    const SCOPE: FieldScope = FieldScope::Person;

    fn fields(&self) -> &FieldStore {
        &self.fields
    }

    fn fields_mut(&mut self) -> &mut FieldStore {
        &mut self.fields
    }

    fn ids(&self) -> &IdMap {
        &self.ids
    }

    fn ids_mut(&mut self) -> &mut IdMap {
        &mut self.ids
    }

    fn label(&self) -> &str {
        self.name().unwrap_or("<unnamed>")
    }
}
