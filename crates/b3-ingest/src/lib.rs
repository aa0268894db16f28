//! B3 History Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Resumable loading of B3 COTAHIST historical quote files into PostgreSQL.
//!
//! # Stages
//!
//! - **Layout**: the fixed 245-byte record layout and line slicing
//! - **Extract**: line counting and batch extraction from zip sources
//! - **Normalize**: cleaning and typing of raw fields
//! - **Checkpoint**: per-file progress and completion tracking
//! - **Pipeline**: the run loop tying the stages to a [`storage::RecordStore`]
//!
//! # Example
//!
//! ```no_run
//! use b3_ingest::{Config, EtlSession, FileId, PgRecordStore, ZipDirectorySource};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let pool = config.database.connect().await?;
//!     let store = PgRecordStore::new(pool, config.etl.schema.clone())?;
//!     let source = ZipDirectorySource::new(config.etl.source_root.clone());
//!
//!     let session = EtlSession::new(source, store, config.etl)?;
//!     let report = session.run(&[FileId::parse("COTAHIST_A1986.zip")?]).await?;
//!     println!("{} rows loaded", report.rows_loaded());
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod extract;
pub mod layout;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod source;
pub mod storage;

#[cfg(test)]
mod fixtures;

pub use checkpoint::{Checkpoint, CheckpointTracker, FileState};
pub use config::{Config, DatabaseConfig, EtlConfig};
pub use error::{EtlError, Result};
pub use extract::{count_lines, extract_batch, ExtractedBatch, LineCursor};
pub use layout::{FieldKind, FieldSpec, LineLayout};
pub use models::{Amount, FieldValue, NormalizedRecord, RawRecord};
pub use normalize::{normalize, NormalizedBatch};
pub use pipeline::{EtlSession, FileOutcome, FileStatus, RunReport};
pub use source::{FileId, SourceProvider, ZipDirectorySource};
pub use storage::{PgFileLease, PgRecordStore, RecordStore};
