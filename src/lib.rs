//! # meilisync-pg
//!
//! Incrementally mirror PostgreSQL tables into Meilisearch indexes.
//!
//! ## Features
//!
//! - **Incremental sync**: Only rows modified since the last run, tracked by a per-index cursor
//! - **Paginated extraction**: Bounded memory regardless of table size
//! - **Sequential or concurrent dispatch**: Optional pacing and in-flight bounds
//! - **Index provisioning**: Drop/create indexes and apply attribute settings
//! - **Progress tracking**: Real-time progress updates via callbacks
//! - **Metrics**: Built-in metrics for observability
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meilisync_pg::{MeilisearchClient, PostgresClient, RunPolicy, Runner, SyncConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = SyncConfig::from_file("config.yml")?;
//!     let endpoints = config.endpoints()?;
//!
//!     let meili = MeilisearchClient::new(&endpoints.meili_host, endpoints.meili_key.clone())?;
//!     meili.health().await?;
//!     let pg = PostgresClient::connect(&endpoints.postgres_dsn).await?;
//!
//!     let report = Runner::new(Arc::new(meili), &pg)
//!         .with_config_path("config.yml")
//!         .run(&mut config, &RunPolicy::default())
//!         .await;
//!
//!     println!("Synced {} documents", report.total_documents());
//!     Ok(())
//! }
//! ```
//!
//! ## Index Definitions
//!
//! ```rust
//! use meilisync_pg::IndexConfig;
//!
//! let index = IndexConfig::builder()
//!     .source("public.products")
//!     .destination("products")
//!     .primary("id")
//!     .searchable(["name", "description"])
//!     .filterable(["category"])
//!     .sortable(["price"])
//!     .cursor_column("updated_at")
//!     .build()
//!     .unwrap();
//! assert_eq!(index.destination, "products");
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod cursor;
pub mod dispatch;
pub mod document;
pub mod error;
pub mod extract;
pub mod meilisearch;
pub mod metrics;
pub mod orchestrator;
pub mod postgres;
pub mod provision;
pub mod runner;
pub mod sink;
pub mod source;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use config::{
    Cursor, Endpoints, ExitPolicy, IndexConfig, IndexConfigBuilder, PersistPolicy, SyncConfig,
    SyncConfigBuilder,
};
pub use dispatch::{DispatchMode, DispatchSummary, Dispatcher};
pub use document::{Batch, Document};
pub use error::{Error, Result};
pub use extract::Extractor;
pub use meilisearch::MeilisearchClient;
pub use orchestrator::{IndexSync, IndexSyncResult, SyncProgress, SyncState};
pub use postgres::PostgresClient;
pub use provision::provision;
pub use runner::{IndexOutcome, RunPolicy, RunReport, Runner};
pub use sink::{IndexHandle, SearchSink};
pub use source::RowSource;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
