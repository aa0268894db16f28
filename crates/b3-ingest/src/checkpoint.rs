//! Per-file progress tracking
//!
//! A file moves through
//! `NotStarted -> BatchPending -> BatchLoaded -> (BatchPending | FileComplete)`.
//! The persisted checkpoint is the highest zero-based line index whose batch
//! has been loaded; `None` means nothing has been read yet.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{EtlError, Result};

/// Durable progress marker for one source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub file: String,
    pub last_line_index: Option<u64>,
}

impl Checkpoint {
    pub fn new(file: impl Into<String>, last_line_index: Option<u64>) -> Self {
        Self {
            file: file.into(),
            last_line_index,
        }
    }

    /// Zero-based index of the first unprocessed line
    pub fn next_line(&self) -> u64 {
        next_line(self.last_line_index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    NotStarted,
    BatchPending,
    BatchLoaded,
    FileComplete,
}

/// In-session view of one file's progress.
///
/// Owns the completion decision; reading and writing the stored checkpoint
/// is left to the caller.
#[derive(Debug, Clone)]
pub struct CheckpointTracker {
    checkpoint: Checkpoint,
    total_lines: u64,
    has_more: bool,
    state: FileState,
}

impl CheckpointTracker {
    pub fn new(file: impl Into<String>, total_lines: u64) -> Self {
        Self {
            checkpoint: Checkpoint::new(file, None),
            total_lines,
            has_more: true,
            state: FileState::NotStarted,
        }
    }

    /// Apply the stored checkpoint and decide whether any work is left
    pub fn resume(&mut self, stored: Option<u64>) -> FileState {
        self.checkpoint.last_line_index = stored;
        let next = next_line(stored);

        if next >= self.total_lines {
            if next > self.total_lines {
                warn!(
                    file = %self.checkpoint.file,
                    checkpoint = ?stored,
                    total_lines = self.total_lines,
                    "Stored checkpoint is past the end of the source; treating file as complete"
                );
            }
            self.finish();
        } else {
            self.state = FileState::BatchPending;
        }

        self.state
    }

    /// Record a loaded batch. Progress may stay put but never move back.
    pub fn record_batch(&mut self, highest_line_read: Option<u64>, more_remain: bool) -> Result<()> {
        let current = self.checkpoint.last_line_index;
        if highest_line_read < current {
            return Err(EtlError::CheckpointRegression {
                file: self.checkpoint.file.clone(),
                current: current.unwrap_or_default(),
                proposed: highest_line_read.unwrap_or_default(),
            });
        }

        self.checkpoint.last_line_index = highest_line_read;
        self.has_more = more_remain;
        self.state = FileState::BatchLoaded;
        Ok(())
    }

    /// Leave `BatchLoaded` for the next batch or completion
    pub fn advance(&mut self) -> FileState {
        if self.state == FileState::BatchLoaded {
            if self.has_more {
                self.state = FileState::BatchPending;
            } else {
                self.finish();
            }
        }
        self.state
    }

    fn finish(&mut self) {
        self.has_more = false;
        self.state = FileState::FileComplete;
    }

    /// Lines at or before this index are already loaded
    pub fn start_after(&self) -> Option<u64> {
        self.checkpoint.last_line_index
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    pub fn total_lines(&self) -> u64 {
        self.total_lines
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn state(&self) -> FileState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == FileState::FileComplete
    }
}

fn next_line(last: Option<u64>) -> u64 {
    last.map_or(0, |l| l.saturating_add(1))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_file_starts_pending() {
        let mut tracker = CheckpointTracker::new("COTAHIST_A2003.zip", 4);
        assert_eq!(tracker.state(), FileState::NotStarted);
        assert_eq!(tracker.resume(None), FileState::BatchPending);
        assert_eq!(tracker.start_after(), None);
        assert_eq!(tracker.checkpoint().next_line(), 0);
    }

    #[test]
    fn test_fully_read_file_short_circuits() {
        let mut tracker = CheckpointTracker::new("f.zip", 4);
        assert_eq!(tracker.resume(Some(3)), FileState::FileComplete);
        assert!(tracker.is_complete());
        assert!(!tracker.has_more());
    }

    #[test]
    fn test_checkpoint_past_end_is_complete() {
        let mut tracker = CheckpointTracker::new("f.zip", 4);
        assert_eq!(tracker.resume(Some(10)), FileState::FileComplete);
        assert_eq!(tracker.checkpoint().last_line_index, Some(10));
    }

    #[test]
    fn test_empty_file_is_complete() {
        let mut tracker = CheckpointTracker::new("f.zip", 0);
        assert_eq!(tracker.resume(None), FileState::FileComplete);
    }

    #[test]
    fn test_batches_drive_state_machine() {
        let mut tracker = CheckpointTracker::new("f.zip", 4);
        tracker.resume(None);

        tracker.record_batch(Some(1), true).unwrap();
        assert_eq!(tracker.state(), FileState::BatchLoaded);
        assert_eq!(tracker.advance(), FileState::BatchPending);
        assert_eq!(tracker.start_after(), Some(1));

        tracker.record_batch(Some(3), false).unwrap();
        assert_eq!(tracker.advance(), FileState::FileComplete);
        assert_eq!(tracker.checkpoint(), &Checkpoint::new("f.zip", Some(3)));
    }

    #[test]
    fn test_regression_is_rejected() {
        let mut tracker = CheckpointTracker::new("f.zip", 10);
        tracker.resume(Some(5));

        let err = tracker.record_batch(Some(2), true).unwrap_err();
        assert!(matches!(
            err,
            EtlError::CheckpointRegression { current: 5, proposed: 2, .. }
        ));
        assert!(tracker.record_batch(None, false).is_err());
        assert_eq!(tracker.start_after(), Some(5));

        tracker.record_batch(Some(5), false).unwrap();
        assert_eq!(tracker.advance(), FileState::FileComplete);
    }
}
