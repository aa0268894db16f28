//! Shared helpers for the integration tests
//!
//! - COTAHIST line builders and zip archive writers
//! - [`MemoryStore`], an in-process [`RecordStore`] with failure injection
//! - [`TestPostgres`], a throwaway PostgreSQL container

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use b3_ingest::{EtlError, FileId, LineLayout, NormalizedRecord, RecordStore, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use zip::write::SimpleFileOptions;

pub const RECORD_WIDTH: usize = 245;

const PETR4_LINE: &str = "012003010202PETR4       010PETROBRAS   PN           R$  000000000552000000000055700000000005420000000000550800000000055450000000005540000000000555001320000000000002034000000000000112043304000000000000009999123100000010000000000000BRPETRACNPR6127";

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,b3_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Source builders
// ============================================================================

pub fn header_line() -> String {
    format!("{:<width$}", "00COTAHIST.2003BOVESPA 20040130", width = RECORD_WIDTH)
}

pub fn trailer_line(records: u64) -> String {
    format!(
        "{:<width$}",
        format!("99COTAHIST.2003BOVESPA 20040130{:011}", records),
        width = RECORD_WIDTH
    )
}

/// A quote line for `ticker` with the given trade date and opening price
pub fn quote_line(ticker: &str, trade_date: &str, open_cents: u64) -> String {
    let mut line = PETR4_LINE.to_string();
    line.replace_range(2..10, trade_date);
    line.replace_range(12..24, &format!("{:<12}", ticker));
    line.replace_range(56..69, &format!("{:013}", open_cents));
    line
}

/// Header, `quotes` daily PETR4 quotes starting 2003-01-02, trailer
pub fn year_file(quotes: u64) -> Vec<String> {
    let mut lines = vec![header_line()];
    for day in 0..quotes {
        lines.push(quote_line("PETR4", &format!("200301{:02}", day % 28 + 1), 500 + day));
    }
    lines.push(trailer_line(quotes));
    lines
}

/// Write `lines` as the single entry of `<dir>/<name>`
pub fn write_archive(dir: &Path, name: &str, lines: &[String]) {
    let mut text = Vec::new();
    for line in lines {
        text.extend_from_slice(line.as_bytes());
        text.push(b'\n');
    }
    write_archive_bytes(dir, name, &text);
}

pub fn write_archive_bytes(dir: &Path, name: &str, bytes: &[u8]) {
    let file = File::create(dir.join(name)).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let entry = name.replace(".zip", ".TXT");
    writer
        .start_file(entry, SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated))
        .unwrap();
    writer.write_all(bytes).unwrap();
    writer.finish().unwrap();
}

pub fn file_id(name: &str) -> FileId {
    FileId::parse(name).unwrap()
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
struct State {
    schema_ready: bool,
    deny_schema: bool,
    checkpoints: Vec<(String, u64)>,
    tables: HashMap<String, Vec<NormalizedRecord>>,
    locked: HashSet<String>,
    loads: usize,
    fail_on_load: Option<usize>,
}

/// [`RecordStore`] that keeps everything in memory
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

pub struct MemoryLease {
    file: String,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make schema provisioning fail with a privilege error
    pub fn deny_schema(&self) {
        self.state.lock().unwrap().deny_schema = true;
    }

    /// Fail the `n`th call to `load_batch` (1-based, counted across files)
    pub fn fail_on_load(&self, n: usize) {
        let mut state = self.state.lock().unwrap();
        state.fail_on_load = Some(state.loads + n);
    }

    pub fn seed_checkpoint(&self, file: &str, line: u64) {
        self.state
            .lock()
            .unwrap()
            .checkpoints
            .push((file.to_string(), line));
    }

    /// Simulate another worker holding the file
    pub fn hold_lock(&self, file: &str) {
        self.state.lock().unwrap().locked.insert(file.to_string());
    }

    pub fn is_locked(&self, file: &str) -> bool {
        self.state.lock().unwrap().locked.contains(file)
    }

    /// Every checkpoint row written for `file`, oldest first
    pub fn checkpoints(&self, file: &str) -> Vec<u64> {
        self.state
            .lock()
            .unwrap()
            .checkpoints
            .iter()
            .filter(|(f, _)| f == file)
            .map(|(_, line)| *line)
            .collect()
    }

    pub fn rows(&self, table: &str) -> Vec<NormalizedRecord> {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn line_indexes(&self, table: &str) -> Vec<u64> {
        self.rows(table).iter().map(|r| r.line_index).collect()
    }

    pub fn load_calls(&self) -> usize {
        self.state.lock().unwrap().loads
    }

    pub fn schema_ready(&self) -> bool {
        self.state.lock().unwrap().schema_ready
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    type Lease = MemoryLease;

    async fn ensure_schema(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.deny_schema {
            return Err(EtlError::InsufficientPrivilege(
                "permission denied for database b3".into(),
            ));
        }
        state.schema_ready = true;
        Ok(())
    }

    async fn read_checkpoint(&self, file: &FileId) -> Result<Option<u64>> {
        Ok(self.checkpoints(file.as_str()).into_iter().max())
    }

    async fn write_checkpoint(&self, file: &FileId, last_line_index: u64) -> Result<()> {
        self.seed_checkpoint(file.as_str(), last_line_index);
        Ok(())
    }

    async fn load_batch(
        &self,
        table: &str,
        _layout: &LineLayout,
        records: &[NormalizedRecord],
    ) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        state.loads += 1;
        if state.fail_on_load == Some(state.loads) {
            return Err(EtlError::Task("injected load failure".into()));
        }
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .extend_from_slice(records);
        Ok(records.len() as u64)
    }

    async fn lock_file(&self, file: &FileId) -> Result<MemoryLease> {
        let mut state = self.state.lock().unwrap();
        if !state.locked.insert(file.to_string()) {
            return Err(EtlError::FileLocked(file.to_string()));
        }
        Ok(MemoryLease {
            file: file.to_string(),
        })
    }

    async fn unlock_file(&self, lease: MemoryLease) -> Result<()> {
        self.state.lock().unwrap().locked.remove(&lease.file);
        Ok(())
    }
}

// ============================================================================
// PostgreSQL container
// ============================================================================

/// Running PostgreSQL container plus a pool connected to it
pub struct TestPostgres {
    pub pool: PgPool,
    _container: ContainerAsync<Postgres>,
}

impl TestPostgres {
    pub async fn start() -> anyhow::Result<Self> {
        let container = Postgres::default().with_tag("16-alpine").start().await?;

        let host = container.get_host().await?;
        let port = container.get_host_port_ipv4(5432).await?;
        let conn_string = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&conn_string)
            .await?;

        Ok(Self {
            pool,
            _container: container,
        })
    }
}
