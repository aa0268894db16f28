//! Line counting and batch extraction
//!
//! Sources are streamed as raw bytes. A line is everything up to and
//! including the next `\n`; a final line without a terminator still counts.

use std::io::{self, BufRead};

use tracing::trace;

use crate::error::{EtlError, Result};
use crate::layout::LineLayout;
use crate::models::RawRecord;

/// Count the lines of a source in one pass without buffering it.
///
/// Returns 0 for an empty source. The last zero-based line index is
/// `count - 1`.
pub fn count_lines(reader: &mut dyn BufRead, source: &str) -> Result<u64> {
    let mut count = 0u64;
    let mut last_byte = None;

    loop {
        let chunk = match reader.fill_buf() {
            Ok(chunk) => chunk,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(corrupt(source, count, e)),
        };
        if chunk.is_empty() {
            break;
        }

        count += chunk.iter().filter(|&&b| b == b'\n').count() as u64;
        last_byte = chunk.last().copied();

        let consumed = chunk.len();
        reader.consume(consumed);
    }

    if matches!(last_byte, Some(b) if b != b'\n') {
        count += 1;
    }

    Ok(count)
}

/// Result of one extraction step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedBatch {
    pub records: Vec<RawRecord>,
    /// Highest zero-based line index covered so far; `None` when nothing
    /// has been read
    pub highest_line_read: Option<u64>,
    /// The batch filled up and the source still has unread lines
    pub more_remain: bool,
}

/// Forward-only position over a source's lines
pub struct LineCursor<R> {
    reader: R,
    source: String,
    next_index: u64,
    line: Vec<u8>,
}

impl<R: BufRead> LineCursor<R> {
    pub fn new(reader: R, source: impl Into<String>) -> Self {
        Self {
            reader,
            source: source.into(),
            next_index: 0,
            line: Vec::with_capacity(256),
        }
    }

    /// Zero-based index of the next line to be read
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Read lines up to and including `last`. Stops early at end of source.
    pub fn skip_through(&mut self, last: Option<u64>) -> Result<()> {
        let Some(last) = last else {
            return Ok(());
        };

        let from = self.next_index;
        while self.next_index <= last {
            if !self.read_line()? {
                break;
            }
        }
        trace!(source = %self.source, from, to = self.next_index, "Skipped processed lines");
        Ok(())
    }

    /// Slice up to `batch_size` lines from the current position
    pub fn take_batch(&mut self, layout: &LineLayout, batch_size: usize) -> Result<ExtractedBatch> {
        let mut records = Vec::with_capacity(batch_size);

        while records.len() < batch_size {
            let index = self.next_index;
            if !self.read_line()? {
                break;
            }
            records.push(layout.slice(index, &self.line));
        }

        let more_remain = records.len() == batch_size && self.has_more()?;

        Ok(ExtractedBatch {
            records,
            highest_line_read: self.next_index.checked_sub(1),
            more_remain,
        })
    }

    fn read_line(&mut self) -> Result<bool> {
        self.line.clear();
        let read = self
            .reader
            .read_until(b'\n', &mut self.line)
            .map_err(|e| corrupt(&self.source, self.next_index, e))?;
        if read == 0 {
            return Ok(false);
        }
        self.next_index += 1;
        Ok(true)
    }

    fn has_more(&mut self) -> Result<bool> {
        loop {
            match self.reader.fill_buf() {
                Ok(buf) => return Ok(!buf.is_empty()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(corrupt(&self.source, self.next_index, e)),
            }
        }
    }
}

/// Extract one batch from a freshly opened source.
///
/// Lines with index `<= start_after` are skipped; `None` starts at line 0.
/// Each call rescans from the top, so a session that processes a whole file
/// should hold a single [`LineCursor`] instead.
pub fn extract_batch(
    reader: &mut dyn BufRead,
    source: &str,
    layout: &LineLayout,
    start_after: Option<u64>,
    batch_size: usize,
) -> Result<ExtractedBatch> {
    let mut cursor = LineCursor::new(reader, source);
    cursor.skip_through(start_after)?;
    let mut batch = cursor.take_batch(layout, batch_size)?;
    // Never report less progress than the caller already had.
    batch.highest_line_read = batch.highest_line_read.max(start_after);
    Ok(batch)
}

fn corrupt(source: &str, line: u64, error: io::Error) -> EtlError {
    EtlError::SourceCorrupt {
        file: source.to_string(),
        line,
        source: error,
    }
}
