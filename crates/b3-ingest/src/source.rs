//! Compressed source files
//!
//! Each yearly COTAHIST release is a zip archive holding a single text file.
//! Sources are only ever read front to back: deflate streams cannot seek to
//! an arbitrary line.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use b3_common::identifier::validate_identifier;
use tracing::debug;
use zip::ZipArchive;

use crate::error::{EtlError, Result};

const ARCHIVE_EXTENSION: &str = ".zip";
const READ_BUFFER_BYTES: usize = 64 * 1024;

/// Validated name of a source archive, e.g. `COTAHIST_A1986.zip`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId {
    name: String,
    table: String,
}

impl FileId {
    pub fn parse(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let invalid = |reason: &str| EtlError::InvalidFileId {
            file: name.clone(),
            reason: reason.to_string(),
        };

        if name.contains('/') || name.contains('\\') {
            return Err(invalid("must be a bare file name relative to the source root"));
        }

        if !name.to_ascii_lowercase().ends_with(ARCHIVE_EXTENSION) {
            return Err(invalid("expected a .zip archive"));
        }

        let stem = name.split('.').next().unwrap_or_default();
        let table = stem.to_lowercase();
        validate_identifier(&table).map_err(|e| invalid(&e.to_string()))?;

        Ok(Self { name, table })
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Destination table: the name lower-cased up to its first dot
    pub fn table_name(&self) -> &str {
        &self.table
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl std::str::FromStr for FileId {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Opens a source and exposes its decompressed text as a buffered reader.
///
/// The reader only lives for the duration of `f`, which lets
/// implementations hand out readers that borrow the archive.
pub trait SourceProvider: Send + Sync + 'static {
    fn with_reader<T, F>(&self, file: &FileId, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn BufRead) -> Result<T>;
}

/// Reads `<root>/<file>` zip archives from the local filesystem
#[derive(Debug, Clone)]
pub struct ZipDirectorySource {
    root: PathBuf,
}

impl ZipDirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All archives in the root directory, sorted by name
    pub fn discover(&self) -> Result<Vec<FileId>> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| EtlError::SourceUnavailable {
            file: self.root.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut files = Vec::new();
        for entry in entries.flatten() {
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match FileId::parse(name.clone()) {
                Ok(id) => files.push(id),
                Err(e) => debug!(file = %name, error = %e, "Skipping non-source file"),
            }
        }

        files.sort();
        Ok(files)
    }
}

impl SourceProvider for ZipDirectorySource {
    fn with_reader<T, F>(&self, file: &FileId, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn BufRead) -> Result<T>,
    {
        let unavailable = |reason: String| EtlError::SourceUnavailable {
            file: file.to_string(),
            reason,
        };

        let path = self.root.join(file.as_str());
        let handle = File::open(&path)
            .map_err(|e| unavailable(format!("cannot open {}: {}", path.display(), e)))?;
        let mut archive = ZipArchive::new(BufReader::new(handle))
            .map_err(|e| unavailable(format!("not a readable zip archive: {}", e)))?;

        if archive.is_empty() {
            return Err(unavailable("archive contains no entries".to_string()));
        }

        let entry = archive
            .by_index(0)
            .map_err(|e| unavailable(format!("cannot open first entry: {}", e)))?;

        debug!(
            file = %file,
            entry = %entry.name(),
            compressed_bytes = entry.compressed_size(),
            bytes = entry.size(),
            "Opened source entry"
        );

        let mut reader = BufReader::with_capacity(READ_BUFFER_BYTES, entry);
        f(&mut reader)
    }
}
