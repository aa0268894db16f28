//! Run loop: checkpoint, extract, normalize, load, commit
//!
//! Each file is handled by one session holding the file's lock:
//!
//! 1. count the source's lines
//! 2. read the stored checkpoint; stop if everything is already loaded
//! 3. stream batches from a single cursor on a blocking thread
//! 4. for every batch: normalize, load, then write the new checkpoint
//!
//! The checkpoint is only written after the store accepted the batch, so a
//! crash between the two reloads that batch on the next run.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use crate::checkpoint::{CheckpointTracker, FileState};
use crate::config::EtlConfig;
use crate::error::{EtlError, Result};
use crate::extract::{count_lines, ExtractedBatch, LineCursor};
use crate::layout::LineLayout;
use crate::normalize::normalize;
use crate::source::{FileId, SourceProvider};
use crate::storage::RecordStore;

/// Batches read ahead of the loader
const READ_AHEAD_BATCHES: usize = 1;

/// How a file's session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileStatus {
    /// Loaded through to the end of the source in this run
    Completed,
    /// The stored checkpoint already covered the whole source
    AlreadyComplete,
    /// Stopped; the stored checkpoint is left at the last committed batch
    Failed { kind: String, error: String },
}

/// Per-file result reported back to the caller
#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub file: String,
    pub table: String,
    #[serde(flatten)]
    pub status: FileStatus,
    pub total_lines: Option<u64>,
    /// Last committed line index when the session ended
    pub checkpoint: Option<u64>,
    pub batches: u64,
    pub rows_loaded: u64,
    pub rows_filtered: u64,
    pub elapsed_ms: u64,
}

impl FileOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self.status, FileStatus::Failed { .. })
    }
}

/// Summary of one [`EtlSession::run`]
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub files: Vec<FileOutcome>,
}

impl RunReport {
    pub fn failures(&self) -> usize {
        self.files.iter().filter(|f| f.is_failure()).count()
    }

    pub fn is_success(&self) -> bool {
        self.failures() == 0
    }

    pub fn rows_loaded(&self) -> u64 {
        self.files.iter().map(|f| f.rows_loaded).sum()
    }
}

#[derive(Debug, Default)]
struct FileProgress {
    total_lines: Option<u64>,
    checkpoint: Option<u64>,
    batches: u64,
    rows_loaded: u64,
    rows_filtered: u64,
}

/// Drives files from their stored checkpoint to the end of the source
pub struct EtlSession<S, R> {
    source: Arc<S>,
    store: Arc<R>,
    layout: &'static LineLayout,
    config: EtlConfig,
    session_id: Uuid,
}

impl<S, R> EtlSession<S, R>
where
    S: SourceProvider,
    R: RecordStore,
{
    pub fn new(source: S, store: R, config: EtlConfig) -> Result<Self> {
        Self::from_shared(Arc::new(source), Arc::new(store), config)
    }

    pub fn from_shared(source: Arc<S>, store: Arc<R>, config: EtlConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            source,
            store,
            layout: LineLayout::cotahist(),
            config,
            session_id: Uuid::new_v4(),
        })
    }

    /// Use a different record layout
    pub fn with_layout(mut self, layout: &'static LineLayout) -> Result<Self> {
        layout.validate().map_err(EtlError::InvalidConfig)?;
        self.layout = layout;
        Ok(self)
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn config(&self) -> &EtlConfig {
        &self.config
    }

    /// Process `files`, at most `max_concurrent_files` at a time.
    ///
    /// Only a schema provisioning failure aborts the run; any other error is
    /// reported in that file's outcome and the remaining files still run.
    pub async fn run(&self, files: &[FileId]) -> Result<RunReport> {
        let started_at = Utc::now();
        info!(
            session_id = %self.session_id,
            files = files.len(),
            batch_size = self.config.batch_size,
            schema = %self.config.schema,
            concurrency = self.config.max_concurrent_files,
            "Starting ETL run"
        );

        self.store.ensure_schema().await?;

        let outcomes: Vec<FileOutcome> = stream::iter(files.iter().cloned())
            .map(|file| self.process_file(file))
            .buffered(self.config.max_concurrent_files)
            .collect()
            .await;

        let report = RunReport {
            session_id: self.session_id,
            started_at,
            finished_at: Utc::now(),
            files: outcomes,
        };

        info!(
            session_id = %self.session_id,
            files = report.files.len(),
            failures = report.failures(),
            rows_loaded = report.rows_loaded(),
            "ETL run finished"
        );

        Ok(report)
    }

    /// Run one file's session to completion or failure
    pub async fn process_file(&self, file: FileId) -> FileOutcome {
        let span = info_span!("etl_file", file = %file, session_id = %self.session_id);
        let started = Instant::now();
        let mut progress = FileProgress::default();

        let status = match self.run_locked(&file, &mut progress).instrument(span.clone()).await {
            Ok(status) => status,
            Err(e) => {
                span.in_scope(|| {
                    error!(
                        kind = e.kind(),
                        checkpoint = ?progress.checkpoint,
                        error = %e,
                        "File failed"
                    )
                });
                FileStatus::Failed {
                    kind: e.kind().to_string(),
                    error: e.to_string(),
                }
            }
        };

        FileOutcome {
            file: file.to_string(),
            table: file.table_name().to_string(),
            status,
            total_lines: progress.total_lines,
            checkpoint: progress.checkpoint,
            batches: progress.batches,
            rows_loaded: progress.rows_loaded,
            rows_filtered: progress.rows_filtered,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }

    async fn run_locked(&self, file: &FileId, progress: &mut FileProgress) -> Result<FileStatus> {
        let lease = self.store.lock_file(file).await?;
        let result = self.run_file(file, progress).await;

        if let Err(e) = self.store.unlock_file(lease).await {
            warn!(error = %e, "Failed to release file lock");
        }

        result
    }

    async fn run_file(&self, file: &FileId, progress: &mut FileProgress) -> Result<FileStatus> {
        let total_lines = self.count_lines(file).await?;
        progress.total_lines = Some(total_lines);

        let stored = self.store.read_checkpoint(file).await?;
        progress.checkpoint = stored;

        let mut tracker = CheckpointTracker::new(file.as_str(), total_lines);
        if tracker.resume(stored) == FileState::FileComplete {
            let status = if stored.is_some() {
                FileStatus::AlreadyComplete
            } else {
                FileStatus::Completed
            };
            info!(total_lines, checkpoint = ?stored, "Nothing left to load");
            return Ok(status);
        }

        info!(
            total_lines,
            resume_from = tracker.checkpoint().next_line(),
            table = %file.table_name(),
            "Processing file"
        );

        let (tx, mut rx) = mpsc::channel::<Result<ExtractedBatch>>(READ_AHEAD_BATCHES);
        let producer = self.spawn_extractor(file.clone(), tracker.start_after(), tx);

        while let Some(message) = rx.recv().await {
            let ExtractedBatch {
                records,
                highest_line_read,
                more_remain,
            } = message?;

            let normalized = normalize(self.layout, records)?;
            let loaded = self
                .store
                .load_batch(file.table_name(), self.layout, &normalized.records)
                .await?;

            if highest_line_read > tracker.start_after() {
                if let Some(line) = highest_line_read {
                    self.store.write_checkpoint(file, line).await?;
                }
            }
            tracker.record_batch(highest_line_read, more_remain)?;

            progress.checkpoint = tracker.start_after();
            progress.batches += 1;
            progress.rows_loaded += loaded;
            progress.rows_filtered += normalized.filtered as u64;

            info!(
                batch = progress.batches,
                rows = loaded,
                filtered = normalized.filtered,
                checkpoint = ?highest_line_read,
                total_lines,
                "Batch committed"
            );

            if tracker.advance() == FileState::FileComplete {
                break;
            }
        }
        drop(rx);

        producer
            .await
            .map_err(|e| EtlError::Task(format!("extractor for {} stopped: {}", file, e)))?;

        if !tracker.is_complete() {
            return Err(EtlError::Task(format!(
                "extractor for {} ended before the end of the source",
                file
            )));
        }

        let covered = tracker.checkpoint().next_line();
        if covered != total_lines {
            warn!(covered, total_lines, "Source line count changed during the session");
        }

        info!(
            batches = progress.batches,
            rows_loaded = progress.rows_loaded,
            rows_filtered = progress.rows_filtered,
            "File complete"
        );
        Ok(FileStatus::Completed)
    }

    async fn count_lines(&self, file: &FileId) -> Result<u64> {
        let source = Arc::clone(&self.source);
        let file = file.clone();
        let span = Span::current();

        tokio::task::spawn_blocking(move || {
            let _enter = span.enter();
            let started = Instant::now();
            let total = source.with_reader(&file, |reader| count_lines(reader, file.as_str()))?;
            debug!(total_lines = total, elapsed_ms = started.elapsed().as_millis() as u64, "Counted lines");
            Ok(total)
        })
        .await
        .map_err(|e| EtlError::Task(format!("line count task failed: {}", e)))?
    }

    /// Read batches on a blocking thread, one cursor for the whole file.
    /// Stops quietly once the receiver is gone.
    fn spawn_extractor(
        &self,
        file: FileId,
        start_after: Option<u64>,
        tx: mpsc::Sender<Result<ExtractedBatch>>,
    ) -> tokio::task::JoinHandle<()> {
        let source = Arc::clone(&self.source);
        let layout = self.layout;
        let batch_size = self.config.batch_size;
        let span = Span::current();

        tokio::task::spawn_blocking(move || {
            let _enter = span.enter();

            let result = source.with_reader(&file, |reader| {
                let mut cursor = LineCursor::new(reader, file.as_str());
                cursor.skip_through(start_after)?;

                loop {
                    let batch = cursor.take_batch(layout, batch_size)?;
                    let more_remain = batch.more_remain;
                    if tx.blocking_send(Ok(batch)).is_err() || !more_remain {
                        return Ok(());
                    }
                }
            });

            if let Err(e) = result {
                if tx.blocking_send(Err(e)).is_err() {
                    debug!("Extraction error dropped after the loader stopped");
                }
            }
        })
    }
}
