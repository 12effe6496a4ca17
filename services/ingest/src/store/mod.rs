//! Persistence backends for entity batches

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{PgStore, SCHEMA_SQL};

use crate::entities::{Entity, TableSpec};
use crate::error::StoreError;
use async_trait::async_trait;

/// A store holding one table per entity kind, each with a unique
/// natural-key constraint.
#[async_trait]
pub trait EntityStore: Send {
    fn backend_tag(&self) -> &'static str;

    /// Insert every row whose natural key is absent and skip the rest, as a
    /// single atomic statement. Returns how many rows were inserted.
    ///
    /// Any integrity violation other than the key conflict fails the whole
    /// call with `StoreError::Constraint` and writes nothing.
    async fn insert_missing(&mut self, table: &TableSpec, rows: &[Entity])
        -> Result<u64, StoreError>;

    async fn count(&mut self, table: &TableSpec) -> Result<u64, StoreError>;

    /// Release connections. Called once at the end of every run.
    async fn close(&mut self);
}
