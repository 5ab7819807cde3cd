//! Error types shared by the resolver, merge policy and source plugins.
//!
//! "Not found" is never an error: resolution returns `Ok(None)` and the
//! merge policy reports rejections through [`crate::merge::MergeOutcome`].

use thiserror::Error;

use crate::model::{Field, FieldKind, FieldScope};

/// Errors raised inside a source plugin.
///
/// The orchestrator catches every variant at the plugin boundary and
/// treats the plugin as having contributed nothing.
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("merge error: {0}")]
    Merge(#[from] MergeError),

    #[error("{0} is not configured")]
    NotConfigured(String),

    #[error("request gate closed for {0}")]
    GateClosed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PluginError {
    /// Build a [`PluginError::Parse`] from anything displayable.
    pub fn parse(msg: impl std::fmt::Display) -> Self {
        Self::Parse(msg.to_string())
    }

    /// True for failures reaching the source (network, HTTP status, gate).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Status { .. } | Self::GateClosed(_)
        )
    }
}

/// Record-level errors: a value that cannot be stored in the field at all.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
    #[error("field {field} expects {expected:?}, got {actual:?}")]
    KindMismatch {
        field: Field,
        expected: FieldKind,
        actual: FieldKind,
    },

    #[error("field {field} does not belong to a {scope:?} record")]
    WrongScope { field: Field, scope: FieldScope },
}

/// Chain configuration problems detected after parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("plugin '{0}' is listed more than once")]
    DuplicatePlugin(String),

    #[error("plugin '{plugin}' refers to unknown plugin '{target}'")]
    UnknownReference { plugin: String, target: String },

    #[error("plugin '{0}' cannot depend on itself")]
    SelfReference(String),

    #[error("unknown source plugin '{0}' (no binary configured)")]
    UnknownSource(String),

    #[error("scan concurrency must be at least 1")]
    ZeroConcurrency,
}
