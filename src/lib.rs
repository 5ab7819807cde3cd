//! `reelscan` - Movie and TV metadata source plugins
//!
//! # Features
//!
//! - **Identifier resolution**: existing ids, cross-references, then a title/year search ladder
//! - **Override-aware merging**: user values win, configured priorities decide between sources
//! - **Plugin chain**: built-in IMDb and TheMovieDb sources, external plugins over JSON stdio
//! - **Politeness**: per-host request gate and a per-run resolution cache
//!
//! # Example
//!
//! ```rust,no_run
//! use reelscan::plugin::{load_chain_config, ScanSession};
//! use reelscan::site::SourceRegistry;
//! use reelscan::{MediaRecord, ScanOrchestrator, SourceClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_chain_config()?;
//!     let registry = SourceRegistry::from_config(&config)?;
//!     let session = ScanSession::new(SourceClient::with_gate(config.gate())?, config.policy());
//!     let orchestrator = ScanOrchestrator::new(session, registry.build_chain(&config)?);
//!
//!     let mut record = MediaRecord::new("Blade Runner").with_year(1982);
//!     let report = orchestrator.scan_media(&mut record).await;
//!     println!("{:?} from {:?}", record.plot(), report.contributors());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod error;
pub mod gate;
pub mod http_client;
pub mod merge;
pub mod model;
pub mod orchestrator;
pub mod plugin;
pub mod resolve;
pub mod site;

pub use cache::{CacheKey, ResolutionCache};
pub use error::{ConfigError, MergeError, PluginError};
pub use gate::{HostGate, HostLimits};
pub use http_client::{GatedResponse, SourceClient};
pub use merge::{merge, FieldRule, FieldUpdates, MergeOutcome, MergeSummary, OverridePolicy, RejectReason};
pub use model::{
    Credit, Field, FieldSource, FieldValue, FilmCredit, IdMap, MediaKind, MediaRecord, PersonRecord, Record,
    SourceIdentifier,
};
pub use orchestrator::{ChainEntry, PluginOutcome, PluginReport, ScanOrchestrator, ScanReport};
pub use plugin::{ScanSession, SourcePlugin};
pub use resolve::{Candidate, SearchQuery, YearFilter};
pub use site::SourceRegistry;

/// Version of reelscan
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
