//! A source backed by several interchangeable plugins.
//!
//! The primary answers under its own name; fallbacks are asked in order when
//! the primary cannot resolve or fails. Scanning goes to the first member
//! whose id the record carries.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::error::PluginError;
use crate::merge::MergeSummary;
use crate::model::{MediaRecord, PersonRecord, Record, SourceIdentifier};
use crate::resolve::{Candidate, SearchQuery};

use super::{ScanSession, SourcePlugin};

pub struct DelegatingPlugin {
    primary: Arc<dyn SourcePlugin>,
    fallbacks: Vec<Arc<dyn SourcePlugin>>,
}

impl DelegatingPlugin {
    pub fn new(primary: Arc<dyn SourcePlugin>, fallbacks: Vec<Arc<dyn SourcePlugin>>) -> Self {
        Self { primary, fallbacks }
    }

    fn members(&self) -> impl Iterator<Item = &Arc<dyn SourcePlugin>> {
        std::iter::once(&self.primary).chain(self.fallbacks.iter())
    }

    /// First member holding an id in `ids`.
    fn owner<R: Record>(&self, record: &R) -> Option<&Arc<dyn SourcePlugin>> {
        self.members().find(|m| record.ids().contains(m.name()))
    }
}

impl std::fmt::Debug for DelegatingPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fallbacks: Vec<&str> = self.fallbacks.iter().map(|p| p.name()).collect();
        f.debug_struct("DelegatingPlugin")
            .field("primary", &self.primary.name())
            .field("fallbacks", &fallbacks)
            .finish()
    }
}

#[async_trait]
impl SourcePlugin for DelegatingPlugin {
    fn name(&self) -> &str {
        self.primary.name()
    }

    fn cross_references(&self) -> Vec<&str> {
        self.primary.cross_references()
    }

    fn trusts_search_order(&self) -> bool {
        self.primary.trusts_search_order()
    }

    /// A fallback member stores its id under its own name.
    fn id_sources(&self) -> Vec<&str> {
        self.members().map(|m| m.name()).collect()
    }

    async fn search(&self, session: &ScanSession, query: &SearchQuery) -> Result<Vec<Candidate>, PluginError> {
        self.primary.search(session, query).await
    }

    async fn resolve(
        &self,
        session: &ScanSession,
        record: &MediaRecord,
    ) -> Result<Option<SourceIdentifier>, PluginError> {
        if let Some(owner) = self.owner(record) {
            return Ok(record.ids().identifier(owner.name()));
        }

        let mut last_error = None;
        for member in self.members() {
            match member.resolve(session, record).await {
                Ok(Some(id)) => return Ok(Some(id)),
                Ok(None) => {}
                Err(e) => {
                    warn!(plugin = member.name(), error = %e, "resolve failed, trying next");
                    last_error = Some(e);
                }
            }
        }
        last_error.map_or(Ok(None), Err)
    }

    async fn scan_media(&self, session: &ScanSession, record: &mut MediaRecord) -> Result<MergeSummary, PluginError> {
        match self.owner(record) {
            Some(owner) => owner.scan_media(session, record).await,
            None => Ok(MergeSummary::default()),
        }
    }

    async fn resolve_person(
        &self,
        session: &ScanSession,
        person: &PersonRecord,
    ) -> Result<Option<SourceIdentifier>, PluginError> {
        if let Some(owner) = self.owner(person) {
            return Ok(person.ids().identifier(owner.name()));
        }
        let mut last_error = None;
        for member in self.members() {
            match member.resolve_person(session, person).await {
                Ok(Some(id)) => return Ok(Some(id)),
                Ok(None) => {}
                Err(e) => {
                    warn!(plugin = member.name(), error = %e, "person resolve failed, trying next");
                    last_error = Some(e);
                }
            }
        }
        last_error.map_or(Ok(None), Err)
    }

    async fn scan_person(&self, session: &ScanSession, person: &mut PersonRecord) -> Result<MergeSummary, PluginError> {
        match self.owner(person) {
            Some(owner) => owner.scan_person(session, person).await,
            None => Ok(MergeSummary::default()),
        }
    }

    fn scan_companion_file(&self, text: &str, record: &mut MediaRecord) -> bool {
        let mut found = false;
        for member in self.members() {
            found |= member.scan_companion_file(text, record);
        }
        found
    }
}
