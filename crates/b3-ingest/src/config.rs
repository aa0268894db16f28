//! Configuration management

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use b3_common::identifier::validate_identifier;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::error::{EtlError, Result};

// ============================================================================
// ETL Configuration Constants
// ============================================================================

/// Directory holding the `COTAHIST_*.zip` archives.
pub const DEFAULT_SOURCE_ROOT: &str = "./resources";

/// Lines read, normalized and loaded per checkpoint.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Schema holding the per-file tables and the progress table.
pub const DEFAULT_SCHEMA: &str = "b3_history";

/// Files processed at the same time.
pub const DEFAULT_MAX_CONCURRENT_FILES: usize = 1;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/b3";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Full configuration for one invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub etl: EtlConfig,
    pub database: DatabaseConfig,
}

/// Extraction settings, validated once before a run starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtlConfig {
    pub source_root: PathBuf,
    pub batch_size: usize,
    pub schema: String,
    pub max_concurrent_files: usize,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl Config {
    /// Load configuration from `.env`, the environment and defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Config {
            etl: EtlConfig {
                source_root: lookup("B3_SOURCE_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_SOURCE_ROOT)),
                batch_size: parse_var(&lookup, "B3_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
                schema: lookup("B3_SCHEMA").unwrap_or_else(|| DEFAULT_SCHEMA.to_string()),
                max_concurrent_files: parse_var(
                    &lookup,
                    "B3_MAX_CONCURRENT_FILES",
                    DEFAULT_MAX_CONCURRENT_FILES,
                )?,
            },
            database: DatabaseConfig {
                url: lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
                max_connections: parse_var(
                    &lookup,
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                )?,
                connect_timeout_secs: parse_var(
                    &lookup,
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                )?,
            },
        };

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.etl.validate()?;

        if self.database.url.is_empty() {
            return Err(EtlError::InvalidConfig("Database URL cannot be empty".into()));
        }

        if self.database.max_connections == 0 {
            return Err(EtlError::InvalidConfig(
                "Database max_connections must be greater than 0".into(),
            ));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            etl: EtlConfig::default(),
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            },
        }
    }
}

impl EtlConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(EtlError::InvalidConfig("batch size must be greater than 0".into()));
        }

        if self.max_concurrent_files == 0 {
            return Err(EtlError::InvalidConfig(
                "max concurrent files must be greater than 0".into(),
            ));
        }

        validate_identifier(&self.schema)?;
        Ok(())
    }

    /// Apply per-invocation overrides and re-validate
    pub fn with_overrides(
        mut self,
        batch_size: Option<usize>,
        schema: Option<String>,
        max_concurrent_files: Option<usize>,
    ) -> Result<Self> {
        if let Some(batch_size) = batch_size {
            self.batch_size = batch_size;
        }
        if let Some(schema) = schema {
            self.schema = schema;
        }
        if let Some(n) = max_concurrent_files {
            self.max_concurrent_files = n;
        }
        self.validate()?;
        Ok(self)
    }
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            source_root: PathBuf::from(DEFAULT_SOURCE_ROOT),
            batch_size: DEFAULT_BATCH_SIZE,
            schema: DEFAULT_SCHEMA.to_string(),
            max_concurrent_files: DEFAULT_MAX_CONCURRENT_FILES,
        }
    }
}

impl DatabaseConfig {
    pub async fn connect(&self) -> Result<PgPool> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(Duration::from_secs(self.connect_timeout_secs))
            .connect(&self.url)
            .await?;
        Ok(pool)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| EtlError::InvalidConfig(format!("{} has an invalid value: {:?}", key, raw))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.etl, EtlConfig::default());
        assert_eq!(config.etl.batch_size, 1000);
        assert_eq!(config.etl.schema, "b3_history");
        assert_eq!(config.database.max_connections, DEFAULT_DATABASE_MAX_CONNECTIONS);
    }

    #[test]
    fn test_environment_values() {
        let config = Config::from_lookup(lookup(&[
            ("B3_SOURCE_ROOT", "/data/b3"),
            ("B3_BATCH_SIZE", " 250 "),
            ("B3_SCHEMA", "staging"),
            ("B3_MAX_CONCURRENT_FILES", "4"),
            ("DATABASE_URL", "postgres://db/b3"),
        ]))
        .unwrap();

        assert_eq!(config.etl.source_root, PathBuf::from("/data/b3"));
        assert_eq!(config.etl.batch_size, 250);
        assert_eq!(config.etl.schema, "staging");
        assert_eq!(config.etl.max_concurrent_files, 4);
        assert_eq!(config.database.url, "postgres://db/b3");
    }

    #[test]
    fn test_rejects_bad_values() {
        for vars in [
            [("B3_BATCH_SIZE", "0")],
            [("B3_BATCH_SIZE", "-5")],
            [("B3_BATCH_SIZE", "many")],
            [("B3_SCHEMA", "b3;drop")],
            [("B3_MAX_CONCURRENT_FILES", "0")],
            [("DATABASE_MAX_CONNECTIONS", "0")],
        ] {
            assert!(Config::from_lookup(lookup(&vars)).is_err(), "{:?}", vars);
        }
    }

    #[test]
    fn test_overrides() {
        let etl = EtlConfig::default()
            .with_overrides(Some(2), Some("other".into()), None)
            .unwrap();
        assert_eq!(etl.batch_size, 2);
        assert_eq!(etl.schema, "other");
        assert_eq!(etl.max_concurrent_files, 1);

        assert!(EtlConfig::default().with_overrides(Some(0), None, None).is_err());
        assert!(EtlConfig::default()
            .with_overrides(None, Some("b3.history".into()), None)
            .is_err());
    }
}
