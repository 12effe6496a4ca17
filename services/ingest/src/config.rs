//! Run configuration from the environment
//!
//! Every problem is collected before returning, so one failed start lists
//! all missing keys and bad values at once.

use crate::datasets::DatasetKind;
use crate::error::IngestError;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_SAMPLE_SIZE: usize = 5000;
pub const DEFAULT_SAMPLE_SEED: u64 = 42;
pub const DEFAULT_BETOS_HEADER_ROW: usize = 3;
pub const DEFAULT_WRITE_CHUNK_SIZE: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// `None` in dry-run mode.
    pub database: Option<DatabaseSettings>,
    pub claims_path: Option<PathBuf>,
    pub betos_path: Option<PathBuf>,
    pub rbcs_path: Option<PathBuf>,
    /// Reservoir cap for the claims extract. `0` reads every row.
    pub sample_size: usize,
    pub sample_seed: u64,
    pub betos_header_row: usize,
    pub betos_sheet: Option<String>,
    pub write_chunk_size: usize,
}

impl Settings {
    pub fn from_env(datasets: &[DatasetKind], dry_run: bool) -> Result<Self, IngestError> {
        Self::from_lookup(datasets, dry_run, |key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup. Blank values count as absent.
    pub fn from_lookup<F>(datasets: &[DatasetKind], dry_run: bool, lookup: F) -> Result<Self, IngestError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut reader = Lookup {
            get: lookup,
            missing: Vec::new(),
            invalid: Vec::new(),
        };

        let database = if dry_run {
            None
        } else {
            let host = reader.required("DB_HOST");
            let port = reader.required_parsed::<u16>("DB_PORT");
            let name = reader.required("DB_NAME");
            let user = reader.required("DB_USER");
            let password = reader.required("DB_PASSWORD");
            let max_connections = reader.optional_parsed("DB_MAX_CONNECTIONS", 5u32);
            match (host, port, name, user, password) {
                (Some(host), Some(port), Some(name), Some(user), Some(password)) => {
                    Some(DatabaseSettings {
                        host,
                        port,
                        name,
                        user,
                        password,
                        max_connections: max_connections.max(1),
                    })
                }
                _ => None,
            }
        };

        let wants = |kind: DatasetKind| datasets.contains(&kind);
        let claims_path = wants(DatasetKind::Claims)
            .then(|| reader.required("CLAIMS_CSV_PATH"))
            .flatten()
            .map(PathBuf::from);
        let betos_path = (wants(DatasetKind::Betos) || wants(DatasetKind::BetosCodes))
            .then(|| reader.required("BETOS_XLSX_PATH"))
            .flatten()
            .map(PathBuf::from);
        let rbcs_path = wants(DatasetKind::Taxonomy)
            .then(|| reader.required("RBCS_CSV_PATH"))
            .flatten()
            .map(PathBuf::from);

        let sample_size = reader.optional_parsed("CLAIMS_SAMPLE_SIZE", DEFAULT_SAMPLE_SIZE);
        let sample_seed = reader.optional_parsed("SAMPLE_SEED", DEFAULT_SAMPLE_SEED);
        let betos_header_row = reader.optional_parsed("BETOS_HEADER_ROW", DEFAULT_BETOS_HEADER_ROW);
        if betos_header_row == 0 {
            reader.invalid.push("BETOS_HEADER_ROW must be at least 1".to_string());
        }
        let betos_sheet = reader.value("BETOS_SHEET");
        let write_chunk_size = reader.optional_parsed("WRITE_CHUNK_SIZE", DEFAULT_WRITE_CHUNK_SIZE);
        if write_chunk_size == 0 {
            reader.invalid.push("WRITE_CHUNK_SIZE must be at least 1".to_string());
        }

        if !reader.missing.is_empty() || !reader.invalid.is_empty() {
            return Err(IngestError::Configuration {
                missing: reader.missing,
                invalid: reader.invalid,
            });
        }

        Ok(Self {
            database,
            claims_path,
            betos_path,
            rbcs_path,
            sample_size,
            sample_seed,
            betos_header_row,
            betos_sheet,
            write_chunk_size,
        })
    }
}

struct Lookup<F> {
    get: F,
    missing: Vec<String>,
    invalid: Vec<String>,
}

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn value(&self, key: &str) -> Option<String> {
        (self.get)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&mut self, key: &str) -> Option<String> {
        let value = self.value(key);
        if value.is_none() {
            self.missing.push(key.to_string());
        }
        value
    }

    fn required_parsed<T: FromStr>(&mut self, key: &str) -> Option<T> {
        let raw = self.required(key)?;
        match raw.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                self.invalid.push(format!("{}='{}'", key, raw));
                None
            }
        }
    }

    fn optional_parsed<T: FromStr>(&mut self, key: &str, default: T) -> T {
        let Some(raw) = self.value(key) else {
            return default;
        };
        match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                self.invalid.push(format!("{}='{}'", key, raw));
                default
            }
        }
    }
}
