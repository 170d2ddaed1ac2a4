//! Perception ingestion service
//!
//! Pulls articles from a catalog of RSS/Atom feeds, stores them idempotently
//! in a document store, keeps a per-feed author profile and tracks every run
//! in an `ingestion_runs` record that clients poll while the run executes in
//! the background.

pub mod api;
pub mod app;
pub mod article_store;
pub mod author;
pub mod brief;
pub mod catalog;
pub mod config;
pub mod dedup;
pub mod error;
pub mod feeds;
pub mod harvester;
pub mod http_client;
pub mod metrics;
pub mod orchestrator;
pub mod registry;
pub mod schemas;
pub mod storage;

pub use app::AppState;
pub use config::Config;
pub use error::{IngestionError, Result};
