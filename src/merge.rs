//! Override-aware field merging.
//!
//! Every scraped value goes through [`merge`], which decides whether the
//! candidate source may replace what the record already holds:
//!
//! 1. Values of the wrong kind are an error ([`MergeError`]).
//! 2. Empty values never replace anything.
//! 3. Unset fields accept anything.
//! 4. User-locked fields reject every non-user source, seeded ones included.
//! 5. Fields only seeded by the caller accept anything.
//! 6. User values and same-source refreshes are accepted.
//! 7. Otherwise the [`OverridePolicy`] predicate decides.
//!
//! Accepted values replace the slot (value and source together). Lists are
//! replaced wholesale, never merged element by element.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;

use crate::error::MergeError;
use crate::model::{check_value, Field, FieldSlot, FieldSource, FieldValue, Record};

/// Why a candidate value was not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The candidate carried no information.
    Empty,
    /// The field was set by the user and is not configured overwritable.
    UserLocked,
    /// The current source outranks the candidate.
    Priority,
}

/// Result of one [`merge`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Accepted,
    /// Identical value from the identical source was already stored.
    Unchanged,
    Rejected(RejectReason),
}

impl MergeOutcome {
    pub fn is_accepted(self) -> bool {
        matches!(self, MergeOutcome::Accepted)
    }
}

/// Per-field override configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FieldRule {
    /// Source names, highest priority first. `nfo` names the user.
    #[serde(default)]
    pub priority: Vec<String>,
    /// Let ranked sources replace user-supplied values.
    #[serde(default)]
    pub user_overwritable: bool,
}

impl FieldRule {
    fn rank(&self, source: &FieldSource) -> usize {
        self.priority
            .iter()
            .position(|name| name == source.name())
            .unwrap_or(usize::MAX)
    }
}

/// The configured override rules for one run.
#[derive(Debug, Clone, Default)]
pub struct OverridePolicy {
    rules: HashMap<Field, FieldRule>,
    overwrite: HashMap<String, HashSet<Field>>,
}

impl OverridePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_rule(mut self, field: Field, rule: FieldRule) -> Self {
        self.rules.insert(field, rule);
        self
    }

    /// Allow `plugin` to overwrite previously-set values of `fields`.
    #[must_use]
    pub fn allow_overwrite(mut self, plugin: &str, fields: impl IntoIterator<Item = Field>) -> Self {
        self.overwrite
            .entry(plugin.to_string())
            .or_default()
            .extend(fields);
        self
    }

    pub fn rule(&self, field: Field) -> Option<&FieldRule> {
        self.rules.get(&field)
    }

    /// True when the slot holds a user value scans must not touch.
    pub fn is_user_locked(&self, field: Field, slot: &FieldSlot) -> bool {
        slot.locked && !self.rule(field).is_some_and(|rule| rule.user_overwritable)
    }

    /// May `candidate` replace a value written by `current`?
    pub fn allows_overwrite(&self, field: Field, current: &FieldSource, candidate: &FieldSource) -> bool {
        if self
            .overwrite
            .get(candidate.name())
            .is_some_and(|fields| fields.contains(&field))
        {
            return true;
        }
        self.rule(field)
            .is_some_and(|rule| rule.rank(candidate) < rule.rank(current))
    }

    /// Decide acceptance for a candidate value without touching the record.
    pub fn decide(
        &self,
        field: Field,
        current: Option<&FieldSlot>,
        value: &FieldValue,
        candidate: &FieldSource,
    ) -> MergeOutcome {
        if value.is_empty() {
            return MergeOutcome::Rejected(RejectReason::Empty);
        }
        let Some(slot) = current else {
            return MergeOutcome::Accepted;
        };
        if slot.source == *candidate && slot.value == *value {
            return MergeOutcome::Unchanged;
        }
        if self.is_user_locked(field, slot) && !candidate.is_user() {
            return MergeOutcome::Rejected(RejectReason::UserLocked);
        }
        if slot.source == FieldSource::Initial {
            return MergeOutcome::Accepted;
        }
        if candidate.is_user() || slot.source == *candidate {
            return MergeOutcome::Accepted;
        }
        if self.allows_overwrite(field, &slot.source, candidate) {
            MergeOutcome::Accepted
        } else {
            MergeOutcome::Rejected(RejectReason::Priority)
        }
    }
}

/// Offer `value` for `field` on behalf of `candidate`.
pub fn merge<R: Record>(
    record: &mut R,
    policy: &OverridePolicy,
    field: Field,
    value: impl Into<FieldValue>,
    candidate: &FieldSource,
) -> Result<MergeOutcome, MergeError> {
    let value = value.into();
    check_value(R::SCOPE, field, &value)?;

    let outcome = policy.decide(field, record.fields().slot(field), &value, candidate);
    if outcome.is_accepted() {
        record.fields_mut().put(field, value, candidate.clone());
    }
    Ok(outcome)
}

/// Tally of merge outcomes for one plugin invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub accepted: usize,
    pub unchanged: usize,
    pub rejected: usize,
}

impl MergeSummary {
    pub fn record(&mut self, outcome: MergeOutcome) {
        match outcome {
            MergeOutcome::Accepted => self.accepted += 1,
            MergeOutcome::Unchanged => self.unchanged += 1,
            MergeOutcome::Rejected(_) => self.rejected += 1,
        }
    }

    pub fn absorb(&mut self, other: MergeSummary) {
        self.accepted += other.accepted;
        self.unchanged += other.unchanged;
        self.rejected += other.rejected;
    }
}

/// Collects field values for one source and merges them in one pass.
///
/// Optional values that are `None` are skipped.
#[derive(Debug, Clone)]
pub struct FieldUpdates {
    source: FieldSource,
    values: Vec<(Field, FieldValue)>,
}

impl FieldUpdates {
    pub fn new(source: FieldSource) -> Self {
        Self {
            source,
            values: Vec::new(),
        }
    }

    pub fn set(&mut self, field: Field, value: impl Into<FieldValue>) -> &mut Self {
        self.values.push((field, value.into()));
        self
    }

    pub fn set_opt<V: Into<FieldValue>>(&mut self, field: Field, value: Option<V>) -> &mut Self {
        if let Some(value) = value {
            self.values.push((field, value.into()));
        }
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Merge every collected value, stopping at the first malformed one.
    pub fn apply<R: Record>(
        self,
        record: &mut R,
        policy: &OverridePolicy,
    ) -> Result<MergeSummary, MergeError> {
        let mut summary = MergeSummary::default();
        for (field, value) in self.values {
            let outcome = merge(record, policy, field, value, &self.source)?;
            if let MergeOutcome::Rejected(reason) = outcome {
                tracing::trace!(%field, source = self.source.name(), ?reason, "value rejected");
            }
            summary.record(outcome);
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Credit, MediaRecord};

    fn imdb() -> FieldSource {
        FieldSource::plugin("imdb")
    }

    fn tmdb() -> FieldSource {
        FieldSource::plugin("themoviedb")
    }

    #[test]
    fn unset_field_accepts_candidate() {
        let mut record = MediaRecord::new("Heat");
        let outcome = merge(&mut record, &OverridePolicy::new(), Field::Plot, "A heist.", &imdb()).unwrap();
        assert_eq!(outcome, MergeOutcome::Accepted);
        assert_eq!(record.plot(), Some("A heist."));
        assert_eq!(record.override_source(Field::Plot), Some(&imdb()));
    }

    #[test]
    fn initial_values_are_always_replaceable() {
        let mut record = MediaRecord::new("heat.1995");
        let outcome = merge(&mut record, &OverridePolicy::new(), Field::Title, "Heat", &imdb()).unwrap();
        assert_eq!(outcome, MergeOutcome::Accepted);
        assert_eq!(record.title(), Some("Heat"));
    }

    #[test]
    fn locked_seed_value_rejects_plugins() {
        let mut record = MediaRecord::new("Heat");
        assert!(record.fields_mut().lock(Field::Title));

        let outcome = merge(&mut record, &OverridePolicy::new(), Field::Title, "Other", &imdb()).unwrap();
        assert_eq!(outcome, MergeOutcome::Rejected(RejectReason::UserLocked));
        assert_eq!(record.title(), Some("Heat"));
        assert!(record.fields().is_locked(Field::Title));

        let outcome = merge(&mut record, &OverridePolicy::new(), Field::Title, "Mine", &FieldSource::User).unwrap();
        assert_eq!(outcome, MergeOutcome::Accepted);
        assert_eq!(record.title(), Some("Mine"));
    }

    #[test]
    fn first_plugin_wins_without_policy() {
        let policy = OverridePolicy::new();
        let mut record = MediaRecord::new("Heat");
        merge(&mut record, &policy, Field::Plot, "From IMDb.", &imdb()).unwrap();
        let outcome = merge(&mut record, &policy, Field::Plot, "From TMDb.", &tmdb()).unwrap();
        assert_eq!(outcome, MergeOutcome::Rejected(RejectReason::Priority));
        assert_eq!(record.plot(), Some("From IMDb."));
    }

    #[test]
    fn user_locked_field_rejects_every_plugin() {
        let policy = OverridePolicy::new()
            .allow_overwrite("imdb", [Field::Plot])
            .with_rule(
                Field::Plot,
                FieldRule {
                    priority: vec!["imdb".into(), "nfo".into()],
                    user_overwritable: false,
                },
            );
        let mut record = MediaRecord::new("Heat");
        merge(&mut record, &policy, Field::Plot, "Mine.", &FieldSource::User).unwrap();

        for candidate in [imdb(), tmdb()] {
            let outcome = merge(&mut record, &policy, Field::Plot, "Scraped.", &candidate).unwrap();
            assert_eq!(outcome, MergeOutcome::Rejected(RejectReason::UserLocked));
        }
        assert_eq!(record.plot(), Some("Mine."));
        assert_eq!(record.override_source(Field::Plot), Some(&FieldSource::User));
    }

    #[test]
    fn user_overwritable_field_follows_priority() {
        let policy = OverridePolicy::new().with_rule(
            Field::Plot,
            FieldRule {
                priority: vec!["imdb".into(), "nfo".into()],
                user_overwritable: true,
            },
        );
        let mut record = MediaRecord::new("Heat");
        merge(&mut record, &policy, Field::Plot, "Mine.", &FieldSource::User).unwrap();

        let outcome = merge(&mut record, &policy, Field::Plot, "TMDb.", &tmdb()).unwrap();
        assert_eq!(outcome, MergeOutcome::Rejected(RejectReason::Priority));

        let outcome = merge(&mut record, &policy, Field::Plot, "IMDb.", &imdb()).unwrap();
        assert_eq!(outcome, MergeOutcome::Accepted);
        assert!(!record.fields().is_locked(Field::Plot));
    }

    #[test]
    fn user_source_overrides_plugin_values() {
        let mut record = MediaRecord::new("Heat");
        let policy = OverridePolicy::new();
        merge(&mut record, &policy, Field::Tagline, "Scraped", &imdb()).unwrap();
        let outcome = merge(&mut record, &policy, Field::Tagline, "Mine", &FieldSource::User).unwrap();
        assert_eq!(outcome, MergeOutcome::Accepted);
        assert!(record.fields().is_locked(Field::Tagline));
    }

    #[test]
    fn priority_list_lets_higher_source_overwrite() {
        let policy = OverridePolicy::new().with_rule(
            Field::Title,
            FieldRule {
                priority: vec!["themoviedb".into(), "imdb".into()],
                user_overwritable: false,
            },
        );
        let mut record = MediaRecord::new("heat");
        merge(&mut record, &policy, Field::Title, "Heat (IMDb)", &imdb()).unwrap();
        let outcome = merge(&mut record, &policy, Field::Title, "Heat", &tmdb()).unwrap();
        assert_eq!(outcome, MergeOutcome::Accepted);

        let outcome = merge(&mut record, &policy, Field::Title, "Heat (again)", &imdb()).unwrap();
        assert_eq!(outcome, MergeOutcome::Rejected(RejectReason::Priority));
        assert_eq!(record.title(), Some("Heat"));
    }

    #[test]
    fn unranked_sources_never_outrank_each_other() {
        let policy = OverridePolicy::new().with_rule(
            Field::Title,
            FieldRule {
                priority: vec!["ofdb".into()],
                user_overwritable: false,
            },
        );
        assert!(!policy.allows_overwrite(Field::Title, &imdb(), &tmdb()));
        assert!(policy.allows_overwrite(Field::Title, &imdb(), &FieldSource::plugin("ofdb")));
    }

    #[test]
    fn same_value_from_same_source_is_unchanged() {
        let policy = OverridePolicy::new();
        let mut record = MediaRecord::new("Heat");
        merge(&mut record, &policy, Field::Runtime, 170u32, &imdb()).unwrap();
        let before = record.clone();
        let outcome = merge(&mut record, &policy, Field::Runtime, 170u32, &imdb()).unwrap();
        assert_eq!(outcome, MergeOutcome::Unchanged);
        assert_eq!(record, before);
    }

    #[test]
    fn same_source_may_refresh_its_value() {
        let policy = OverridePolicy::new();
        let mut record = MediaRecord::new("Heat");
        merge(&mut record, &policy, Field::Runtime, 170u32, &imdb()).unwrap();
        let outcome = merge(&mut record, &policy, Field::Runtime, 171u32, &imdb()).unwrap();
        assert_eq!(outcome, MergeOutcome::Accepted);
        assert_eq!(record.runtime(), Some(171));
    }

    #[test]
    fn empty_values_never_erase_data() {
        let policy = OverridePolicy::new().allow_overwrite("themoviedb", [Field::Genres]);
        let mut record = MediaRecord::new("Heat");
        merge(&mut record, &policy, Field::Genres, vec!["Crime".to_string()], &imdb()).unwrap();
        let outcome = merge(&mut record, &policy, Field::Genres, Vec::<String>::new(), &tmdb()).unwrap();
        assert_eq!(outcome, MergeOutcome::Rejected(RejectReason::Empty));
        assert_eq!(record.genres(), ["Crime".to_string()]);
    }

    #[test]
    fn lists_are_replaced_not_merged() {
        let policy = OverridePolicy::new().allow_overwrite("themoviedb", [Field::Cast]);
        let mut record = MediaRecord::new("Heat");
        let first = vec![Credit::new("A"), Credit::new("B")];
        merge(&mut record, &policy, Field::Cast, first, &imdb()).unwrap();
        merge(&mut record, &policy, Field::Cast, vec![Credit::new("C")], &tmdb()).unwrap();
        assert_eq!(record.cast(), [Credit::new("C")]);
    }

    #[test]
    fn wrong_kind_is_an_error_and_leaves_record_untouched() {
        let mut record = MediaRecord::new("Heat");
        let before = record.clone();
        let err = merge(&mut record, &OverridePolicy::new(), Field::Year, "1995", &imdb()).unwrap_err();
        assert!(matches!(err, MergeError::KindMismatch { field: Field::Year, .. }));
        assert_eq!(record, before);
    }

    #[test]
    fn field_updates_skip_none_and_tally_outcomes() {
        let policy = OverridePolicy::new();
        let mut record = MediaRecord::new("Heat");
        merge(&mut record, &policy, Field::Plot, "Existing.", &tmdb()).unwrap();

        let mut updates = FieldUpdates::new(imdb());
        updates
            .set(Field::Title, "Heat")
            .set(Field::Plot, "Other.")
            .set_opt(Field::Tagline, None::<String>)
            .set_opt(Field::Runtime, Some(170u32));
        assert_eq!(updates.len(), 3);

        let summary = updates.apply(&mut record, &policy).unwrap();
        assert_eq!(summary.accepted, 2);
        assert_eq!(summary.rejected, 1);
        assert_eq!(record.plot(), Some("Existing."));
    }
}
