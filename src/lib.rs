// src/lib.rs
pub mod accumulator;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod models;
pub mod orchestrator;
pub mod reader;
pub mod retry;
pub mod search;
pub mod stats;

// Re-export common types for easier access
pub use config::{MatcherConfig, RadiusTable, SearchBackendConfig};
pub use error::SearchError;
pub use models::{
    Batch, FacilityHit, LocationPoint, MatchOutcome, MatchQuery, MatchResult, PlaceType, PointId,
};
pub use orchestrator::{MatchJob, MatchRunner};
pub use search::{EsSearchClient, GeoSearchClient, QueryOutcome};
pub use stats::RunStats;
