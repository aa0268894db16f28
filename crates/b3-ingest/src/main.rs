//! B3 Ingest - COTAHIST loader

use std::path::PathBuf;

use anyhow::{Context, Result};
use b3_common::logging::{init_logging, LogConfig, LogLevel};
use b3_ingest::{
    count_lines, Config, EtlSession, FileId, FileStatus, PgRecordStore, RunReport, SourceProvider,
    ZipDirectorySource,
};
use clap::Parser;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "b3-ingest")]
#[command(author, version, about = "Load B3 COTAHIST history files into PostgreSQL")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Extract, normalize and load source files, resuming from checkpoints
    Run {
        /// Archive names under the source root, e.g. COTAHIST_A1986.zip
        #[arg(required_unless_present = "all")]
        files: Vec<String>,

        /// Process every archive in the source root
        #[arg(long, conflicts_with = "files")]
        all: bool,

        /// Directory holding the archives
        #[arg(long, env = "B3_SOURCE_ROOT")]
        source_root: Option<PathBuf>,

        /// Lines per committed batch
        #[arg(short, long, env = "B3_BATCH_SIZE")]
        batch_size: Option<usize>,

        /// Target schema
        #[arg(short, long, env = "B3_SCHEMA")]
        schema: Option<String>,

        /// Files processed at the same time
        #[arg(short, long, env = "B3_MAX_CONCURRENT_FILES")]
        concurrency: Option<usize>,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the number of lines in one source archive
    Count {
        /// Archive name under the source root
        file: String,

        /// Directory holding the archives
        #[arg(long, env = "B3_SOURCE_ROOT")]
        source_root: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("b3-ingest")
        .build()
        .with_env_overrides()?;

    let _guard = init_logging(&log_config)?;

    let config = Config::load().context("Failed to load configuration")?;

    match cli.command {
        Command::Run {
            files,
            all,
            source_root,
            batch_size,
            schema,
            concurrency,
            json,
        } => {
            let mut etl = config.etl.with_overrides(batch_size, schema, concurrency)?;
            if let Some(root) = source_root {
                etl.source_root = root;
            }

            let source = ZipDirectorySource::new(etl.source_root.clone());
            let files = if all {
                source.discover()?
            } else {
                files
                    .into_iter()
                    .map(FileId::parse)
                    .collect::<b3_ingest::Result<Vec<_>>>()?
            };

            if files.is_empty() {
                anyhow::bail!("No source archives found in {}", etl.source_root.display());
            }

            let pool = config
                .database
                .connect()
                .await
                .context("Failed to connect to database")?;
            let store = PgRecordStore::new(pool, etl.schema.clone())?;

            let session = EtlSession::new(source, store, etl)?;
            let report = session.run(&files).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }

            if !report.is_success() {
                anyhow::bail!("{} of {} files failed", report.failures(), report.files.len());
            }
        },
        Command::Count { file, source_root } => {
            let root = source_root.unwrap_or(config.etl.source_root);
            let file = FileId::parse(file)?;
            let source = ZipDirectorySource::new(root);

            info!(file = %file, "Counting lines");
            let total = tokio::task::spawn_blocking(move || {
                source.with_reader(&file, |reader| count_lines(reader, file.as_str()))
            })
            .await
            .context("Line count task failed")??;

            println!("{}", total);
        },
    }

    Ok(())
}

fn print_report(report: &RunReport) {
    println!("Session {}", report.session_id);
    for outcome in &report.files {
        let status = match &outcome.status {
            FileStatus::Completed => "completed".to_string(),
            FileStatus::AlreadyComplete => "already complete".to_string(),
            FileStatus::Failed { error, .. } => format!("FAILED: {}", error),
        };
        let checkpoint = outcome
            .checkpoint
            .map_or_else(|| "-".to_string(), |c| c.to_string());
        let total = outcome
            .total_lines
            .map_or_else(|| "-".to_string(), |t| t.to_string());

        println!(
            "  {:<24} {:>9} rows  {:>4} batches  line {}/{}  {}",
            outcome.file, outcome.rows_loaded, outcome.batches, checkpoint, total, status
        );
    }
    println!(
        "{} files, {} rows loaded, {} failed",
        report.files.len(),
        report.rows_loaded(),
        report.failures()
    );
}
