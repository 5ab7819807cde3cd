//! Shared in-memory records populated by source plugins.
//!
//! - [`MediaRecord`]: one movie or TV show
//! - [`PersonRecord`]: one actor or crew member
//! - [`Field`] / [`FieldValue`]: enumerated, typed attributes
//! - [`FieldSource`]: who last wrote a field, used by [`crate::merge`]

pub mod field;
pub mod ids;
pub mod record;

pub use field::{Credit, Field, FieldInfo, FieldKind, FieldScope, FieldValue, FilmCredit};
pub use ids::{IdMap, SourceIdentifier};
pub use record::{
    check_value, FieldSlot, FieldSource, FieldStore, MediaKind, MediaRecord, PersonRecord, Record,
    USER_SOURCE,
};
