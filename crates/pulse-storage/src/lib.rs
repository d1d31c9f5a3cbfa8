//! Pulse Storage crate - SQLite persistence for experience sampling.
//!
//! Provides the versioned schema, repositories for moments, tags, uptime
//! intervals and scheduled beeps, the tag relation synchronizer and the
//! day-windowed aggregation engine.

pub mod blocking;
pub mod context;
pub mod db;
mod error;
pub mod moments;
pub mod projects;
pub mod schema;
pub mod stats;
pub mod sync;
pub mod tags;
pub mod uptime;

pub use blocking::run_blocking;
pub use context::StoreContext;
pub use db::Database;
pub use moments::MomentRepository;
pub use projects::{ProjectRepository, VocabularyRepository};
pub use schema::{SchemaAction, SCHEMA_VERSION};
pub use stats::StatsService;
pub use sync::{plan_sync, RelationSynchronizer, SyncPlan, SyncReport};
pub use tags::TagRepository;
pub use uptime::UptimeRepository;
