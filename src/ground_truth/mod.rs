//! Ground Truth
//!
//! Externally observed metric values, fetched through a prioritized fallback chain:
//! - per-source timeout, range and staleness checks
//! - short TTL cache of the last accepted observation
//! - synthesized estimate when every source is exhausted

pub mod fallback;
pub mod history;
pub mod source;
pub mod sources;

pub use fallback::{FallbackChain, FetchOutcome, Provenance, SourceAttempt};
pub use history::HistoryStore;
pub use source::{FetchError, GroundTruthSource, InvalidReason, SourceReading};
pub use sources::{build_sources, FileSource, JsonApiSource, SimulatedSource};
