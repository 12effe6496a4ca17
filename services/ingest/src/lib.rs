//! CMS Medicare claims ingestion
//!
//! Loads the Part B provider/service extract, the BETOS cost workbook and
//! the RBCS taxonomy into Postgres:
//! - read delimited and spreadsheet sources into raw rows
//! - normalize raw rows into typed entities per dataset record
//! - drop in-batch duplicates by natural key
//! - insert-if-absent in chunks, so re-runs are no-ops

pub mod config;
pub mod datasets;
pub mod dedup;
pub mod entities;
pub mod error;
pub mod normalize;
pub mod pipeline;
pub mod source;
pub mod store;
pub mod writer;

pub use config::Settings;
pub use datasets::DatasetKind;
pub use error::{IngestError, StoreError};
pub use pipeline::{run_all, DatasetReport, RunSummary, TableReport};
pub use store::{EntityStore, MemoryStore, PgStore};
