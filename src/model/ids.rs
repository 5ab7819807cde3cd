//! External identifiers keyed by source plugin name.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A `(plugin name, native id)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceIdentifier {
    pub source: String,
    pub id: String,
}

impl SourceIdentifier {
    pub fn new(source: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for SourceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.id)
    }
}

/// At most one native id per source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdMap(BTreeMap<String, String>);

impl IdMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, source: &str) -> Option<&str> {
        self.0.get(source).map(String::as_str)
    }

    pub fn contains(&self, source: &str) -> bool {
        self.0.contains_key(source)
    }

    pub fn identifier(&self, source: &str) -> Option<SourceIdentifier> {
        self.get(source).map(|id| SourceIdentifier::new(source, id))
    }

    /// Record an id unless the source already has a different one.
    ///
    /// Returns `false` (and leaves the map untouched) on conflict. Blank ids
    /// are ignored.
    pub fn insert(&mut self, ident: SourceIdentifier) -> bool {
        let id = ident.id.trim();
        if id.is_empty() {
            return false;
        }
        match self.0.get(&ident.source) {
            Some(existing) => existing == id,
            None => {
                self.0.insert(ident.source, id.to_string());
                true
            }
        }
    }

    /// Overwrite the id for a source, returning the previous one.
    pub fn replace(&mut self, ident: SourceIdentifier) -> Option<String> {
        self.0.insert(ident.source, ident.id)
    }

    pub fn remove(&mut self, source: &str) -> Option<String> {
        self.0.remove(source)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_keeps_first_id_per_source() {
        let mut ids = IdMap::new();
        assert!(ids.insert(SourceIdentifier::new("imdb", "tt0113277")));
        assert!(!ids.insert(SourceIdentifier::new("imdb", "tt0000001")));
        assert_eq!(ids.get("imdb"), Some("tt0113277"));
    }

    #[test]
    fn insert_same_id_again_is_accepted() {
        let mut ids = IdMap::new();
        ids.insert(SourceIdentifier::new("imdb", "tt0113277"));
        assert!(ids.insert(SourceIdentifier::new("imdb", "tt0113277")));
        assert_eq!(ids.len(), 1);
    }

    #[test]
    fn blank_ids_are_ignored() {
        let mut ids = IdMap::new();
        assert!(!ids.insert(SourceIdentifier::new("imdb", "  ")));
        assert!(ids.is_empty());
    }

    #[test]
    fn replace_overrides_existing_id() {
        let mut ids = IdMap::new();
        ids.insert(SourceIdentifier::new("themoviedb", "949"));
        let previous = ids.replace(SourceIdentifier::new("themoviedb", "950"));
        assert_eq!(previous.as_deref(), Some("949"));
        assert_eq!(ids.get("themoviedb"), Some("950"));
    }

    #[test]
    fn identifier_displays_as_source_colon_id() {
        assert_eq!(SourceIdentifier::new("imdb", "tt1").to_string(), "imdb:tt1");
    }
}
