//! Upsert writer: insert-if-absent in chunks
//!
//! Each chunk is one `insert_missing` call. A chunk rejected for an
//! integrity violation is replayed one row at a time so only the offending
//! rows are lost.

use crate::entities::{Entity, TableSpec};
use crate::error::{IngestError, StoreError};
use crate::store::EntityStore;
use serde::Serialize;

/// Postgres caps a statement at 65535 bind parameters.
pub const MAX_BIND_PARAMS: usize = 65_535;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteStats {
    pub inserted: u64,
    pub skipped_existing: u64,
    pub failed: u64,
}

impl WriteStats {
    fn absorb(&mut self, other: WriteStats) {
        self.inserted += other.inserted;
        self.skipped_existing += other.skipped_existing;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UpsertWriter {
    chunk_size: usize,
}

impl UpsertWriter {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    /// Rows per statement for `table`, bounded by the bind-parameter limit.
    pub fn effective_chunk(&self, table: &TableSpec) -> usize {
        let per_row = table.columns.len().max(1);
        self.chunk_size.min(MAX_BIND_PARAMS / per_row).max(1)
    }

    pub async fn write(
        &self,
        store: &mut dyn EntityStore,
        table: &TableSpec,
        batch: &[Entity],
    ) -> Result<WriteStats, IngestError> {
        let mut stats = WriteStats::default();

        for chunk in batch.chunks(self.effective_chunk(table)) {
            match store.insert_missing(table, chunk).await {
                Ok(inserted) => stats.absorb(WriteStats {
                    inserted,
                    skipped_existing: (chunk.len() as u64).saturating_sub(inserted),
                    failed: 0,
                }),
                Err(StoreError::Constraint(detail)) => {
                    tracing::warn!(
                        table = table.name,
                        rows = chunk.len(),
                        %detail,
                        "chunk rejected, retrying row by row"
                    );
                    stats.absorb(self.replay_rows(store, table, chunk).await?);
                }
                Err(e) => return Err(escalate(table, e)),
            }
        }

        tracing::info!(
            table = table.name,
            inserted = stats.inserted,
            skipped = stats.skipped_existing,
            failed = stats.failed,
            "table written"
        );
        Ok(stats)
    }

    async fn replay_rows(
        &self,
        store: &mut dyn EntityStore,
        table: &TableSpec,
        chunk: &[Entity],
    ) -> Result<WriteStats, IngestError> {
        let mut stats = WriteStats::default();
        for row in chunk {
            match store.insert_missing(table, std::slice::from_ref(row)).await {
                Ok(1) => stats.inserted += 1,
                Ok(_) => stats.skipped_existing += 1,
                Err(StoreError::Constraint(reason)) => {
                    tracing::warn!(
                        table = table.name,
                        key = row.natural_key(),
                        %reason,
                        "row skipped"
                    );
                    stats.failed += 1;
                }
                Err(e) => return Err(escalate(table, e)),
            }
        }
        Ok(stats)
    }
}

pub(crate) fn escalate(table: &TableSpec, err: StoreError) -> IngestError {
    match err {
        StoreError::Unreachable(detail) => IngestError::Connectivity(detail),
        other => IngestError::Store {
            table: table.name.to_string(),
            detail: other.to_string(),
        },
    }
}
