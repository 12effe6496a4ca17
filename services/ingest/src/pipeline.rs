//! Pipeline orchestrator
//!
//! Per dataset: read → check columns → normalize every entity spec →
//! dedup → write in declared order (providers before claims). A dataset
//! failure is recorded and the run moves on, unless the error is
//! run-fatal.

use crate::config::Settings;
use crate::datasets::{DatasetKind, DatasetSpec, SourceFormat};
use crate::dedup::dedup_entities;
use crate::entities::{Entity, EntityKind};
use crate::error::IngestError;
use crate::normalize::{normalize_row, RowRejection};
use crate::source::{
    read_delimited_path, read_spreadsheet_path, DelimitedOptions, RawTable, ReadError, SampleSpec,
    SpreadsheetOptions,
};
use crate::store::EntityStore;
use crate::writer::{escalate, UpsertWriter};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::Instrument;
use uuid::Uuid;

/// How many rejections are logged individually per entity pass.
const REJECTION_LOG_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableReport {
    pub table: &'static str,
    pub entity: EntityKind,
    /// Entities produced by the normalizer.
    pub records: usize,
    pub rejected: usize,
    pub duplicates_dropped: usize,
    pub inserted: u64,
    pub skipped_existing: u64,
    pub failed: u64,
    /// Row count of the table after the write.
    pub table_rows: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetReport {
    pub dataset: DatasetKind,
    pub source: Option<PathBuf>,
    pub rows_in_source: usize,
    pub rows_read: usize,
    /// Rows that produced every entity the dataset declares.
    pub accepted: usize,
    pub rejected: usize,
    pub tables: Vec<TableReport>,
    pub error: Option<String>,
}

impl DatasetReport {
    fn failed(dataset: DatasetKind, source: Option<PathBuf>, err: &IngestError) -> Self {
        Self {
            dataset,
            source,
            rows_in_source: 0,
            rows_read: 0,
            accepted: 0,
            rejected: 0,
            tables: Vec::new(),
            error: Some(err.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn inserted(&self) -> u64 {
        self.tables.iter().map(|t| t.inserted).sum()
    }

    pub fn skipped_existing(&self) -> u64 {
        self.tables.iter().map(|t| t.skipped_existing).sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub backend: &'static str,
    pub datasets: Vec<DatasetReport>,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        self.datasets.iter().any(|d| !d.is_ok())
    }
}

/// Run every selected dataset in order against one store.
///
/// Returns `Err` only for run-fatal errors; other dataset failures are
/// carried in the summary.
pub async fn run_all(
    store: &mut dyn EntityStore,
    datasets: &[DatasetKind],
    settings: &Settings,
) -> Result<RunSummary, IngestError> {
    let run_id = Uuid::new_v4();
    let backend = store.backend_tag();
    let span = tracing::info_span!("ingest_run", %run_id, backend);
    let writer = UpsertWriter::new(settings.write_chunk_size);

    async move {
        let mut reports = Vec::with_capacity(datasets.len());
        for &kind in datasets {
            let span = tracing::info_span!("dataset", name = kind.name());
            match run_dataset(store, kind, settings, &writer).instrument(span).await {
                Ok(report) => reports.push(report),
                Err(e) if e.is_run_fatal() => {
                    tracing::error!(dataset = kind.name(), error = %e, "run aborted");
                    return Err(e);
                }
                Err(e) => {
                    tracing::error!(dataset = kind.name(), error = %e, "dataset failed");
                    reports.push(DatasetReport::failed(kind, source_path(kind, settings), &e));
                }
            }
        }
        Ok(RunSummary {
            run_id,
            backend,
            datasets: reports,
        })
    }
    .instrument(span)
    .await
}

pub async fn run_dataset(
    store: &mut dyn EntityStore,
    kind: DatasetKind,
    settings: &Settings,
    writer: &UpsertWriter,
) -> Result<DatasetReport, IngestError> {
    let spec = DatasetSpec::for_kind(kind);
    let (path, table) = load_source(&spec, settings)?;
    tracing::info!(
        path = %path.display(),
        rows = table.rows.len(),
        rows_in_source = table.rows_in_source,
        "source read"
    );
    ingest_table(store, &spec, &path, table, writer).await
}

fn source_path(kind: DatasetKind, settings: &Settings) -> Option<PathBuf> {
    match kind {
        DatasetKind::Claims => settings.claims_path.clone(),
        DatasetKind::Betos | DatasetKind::BetosCodes => settings.betos_path.clone(),
        DatasetKind::Taxonomy => settings.rbcs_path.clone(),
    }
}

fn source_key(kind: DatasetKind) -> &'static str {
    match kind {
        DatasetKind::Claims => "CLAIMS_CSV_PATH",
        DatasetKind::Betos | DatasetKind::BetosCodes => "BETOS_XLSX_PATH",
        DatasetKind::Taxonomy => "RBCS_CSV_PATH",
    }
}

/// Read the dataset's source file with the reader its format calls for.
pub fn load_source(spec: &DatasetSpec, settings: &Settings) -> Result<(PathBuf, RawTable), IngestError> {
    let path = source_path(spec.kind, settings).ok_or_else(|| IngestError::Configuration {
        missing: vec![source_key(spec.kind).to_string()],
        invalid: Vec::new(),
    })?;

    let read = match spec.format {
        SourceFormat::Delimited => {
            let sample = (spec.kind == DatasetKind::Claims && settings.sample_size > 0).then(|| {
                SampleSpec {
                    cap: settings.sample_size,
                    seed: settings.sample_seed,
                }
            });
            read_delimited_path(
                &path,
                &DelimitedOptions {
                    sample,
                    ..DelimitedOptions::default()
                },
            )
        }
        SourceFormat::Spreadsheet => read_spreadsheet_path(
            &path,
            &SpreadsheetOptions {
                header_row: settings.betos_header_row,
                sheet: settings.betos_sheet.clone(),
            },
        ),
    };

    match read {
        Ok(table) => Ok((path, table)),
        Err(ReadError::Missing(missing)) => Err(IngestError::SourceMissing { path: missing }),
        Err(ReadError::Format(reason)) => Err(format_error(spec.kind, &path, reason)),
    }
}

fn format_error(kind: DatasetKind, path: &Path, reason: String) -> IngestError {
    IngestError::SourceFormat {
        dataset: kind.name().to_string(),
        path: path.to_path_buf(),
        reason,
    }
}

/// Every required field needs at least one of its source headers present.
pub fn check_columns(spec: &DatasetSpec, path: &Path, table: &RawTable) -> Result<(), IngestError> {
    let missing: Vec<String> = spec
        .required_columns()
        .into_iter()
        .filter(|(_, sources)| !sources.iter().any(|s| table.has_column(s)))
        .map(|(canonical, sources)| format!("{} (one of: {})", canonical, sources.join(", ")))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(format_error(
            spec.kind,
            path,
            format!("missing required column(s): {}", missing.join("; ")),
        ))
    }
}

/// Normalize, dedup and write an already-read table.
pub async fn ingest_table(
    store: &mut dyn EntityStore,
    spec: &DatasetSpec,
    path: &Path,
    table: RawTable,
    writer: &UpsertWriter,
) -> Result<DatasetReport, IngestError> {
    check_columns(spec, path, &table)?;

    let mut accepted_mask = vec![true; table.rows.len()];
    let mut batches: Vec<(EntityKind, Vec<Entity>, usize)> = Vec::with_capacity(spec.entities.len());

    for entity_spec in &spec.entities {
        let mut records = Vec::with_capacity(table.rows.len());
        let mut rejections = Vec::new();
        for (position, row) in table.rows.iter().enumerate() {
            match normalize_row(row, entity_spec) {
                Ok(entity) => records.push(entity),
                Err(rejection) => {
                    accepted_mask[position] = false;
                    rejections.push(rejection);
                }
            }
        }
        log_rejections(entity_spec.kind, &rejections);
        batches.push((entity_spec.kind, records, rejections.len()));
    }

    let accepted = accepted_mask.iter().filter(|ok| **ok).count();
    if accepted == 0 && !table.rows.is_empty() {
        return Err(format_error(
            spec.kind,
            path,
            format!("none of {} rows could be normalized", table.rows.len()),
        ));
    }

    let mut tables = Vec::with_capacity(batches.len());
    for (kind, records, rejected) in batches {
        let target = kind.table();
        let normalized = records.len();
        let (unique, duplicates_dropped) = dedup_entities(records);
        if duplicates_dropped > 0 {
            tracing::debug!(table = target.name, duplicates_dropped, "in-batch duplicates dropped");
        }

        let stats = writer.write(store, target, &unique).await?;
        let table_rows = store
            .count(target)
            .await
            .map_err(|e| escalate(target, e))?;

        tables.push(TableReport {
            table: target.name,
            entity: kind,
            records: normalized,
            rejected,
            duplicates_dropped,
            inserted: stats.inserted,
            skipped_existing: stats.skipped_existing,
            failed: stats.failed,
            table_rows,
        });
    }

    Ok(DatasetReport {
        dataset: spec.kind,
        source: Some(path.to_path_buf()),
        rows_in_source: table.rows_in_source,
        rows_read: table.rows.len(),
        accepted,
        rejected: table.rows.len() - accepted,
        tables,
        error: None,
    })
}

fn log_rejections(kind: EntityKind, rejections: &[RowRejection]) {
    for r in rejections.iter().take(REJECTION_LOG_LIMIT) {
        tracing::warn!(entity = ?kind, row = r.row_index, reason = %r.reason, "row rejected");
    }
    if rejections.len() > REJECTION_LOG_LIMIT {
        tracing::warn!(
            entity = ?kind,
            "... and {} more rejected rows",
            rejections.len() - REJECTION_LOG_LIMIT
        );
    }
}
