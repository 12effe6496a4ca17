use crate::entities::{Entity, TableSpec};
use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};

use super::EntityStore;

/// In-process store with the same key, not-null and foreign-key rules as
/// the Postgres schema. Backs `--dry-run`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: HashMap<&'static str, BTreeMap<String, Entity>>,
    offline: bool,
    pub(crate) insert_calls: usize,
    closed: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every call fails as unreachable.
    pub fn unreachable() -> Self {
        Self {
            offline: true,
            ..Self::default()
        }
    }

    fn reachable(&self) -> bool {
        !self.offline && !self.closed
    }

    pub fn rows(&self, table: &str) -> Vec<&Entity> {
        self.tables
            .get(table)
            .map(|t| t.values().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, table: &str, key: &str) -> Option<&Entity> {
        self.tables.get(table).and_then(|t| t.get(key))
    }

    pub fn len(&self, table: &str) -> usize {
        self.tables.get(table).map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.values().all(|t| t.is_empty())
    }

    fn check_row(&self, table: &TableSpec, entity: &Entity) -> Result<(), StoreError> {
        if entity.kind().table().name != table.name {
            return Err(StoreError::Query(format!(
                "{:?} row cannot be inserted into \"{}\"",
                entity.kind(),
                table.name
            )));
        }

        for (column, value) in table.columns.iter().zip(entity.values()) {
            if !column.nullable && value.is_null() {
                return Err(StoreError::Constraint(format!(
                    "null value in column \"{}\" of relation \"{}\" violates not-null constraint",
                    column.name, table.name
                )));
            }
        }

        if let (Some(fk), Some(target)) = (table.references, entity.reference()) {
            let present = self
                .tables
                .get(fk.table)
                .map(|t| t.contains_key(target))
                .unwrap_or(false);
            if !present {
                return Err(StoreError::Constraint(format!(
                    "insert on table \"{}\" violates foreign key: {}={} not present in \"{}\"",
                    table.name, fk.column, target, fk.table
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    fn backend_tag(&self) -> &'static str {
        "memory"
    }

    async fn insert_missing(
        &mut self,
        table: &TableSpec,
        rows: &[Entity],
    ) -> Result<u64, StoreError> {
        self.insert_calls += 1;
        if !self.reachable() {
            return Err(StoreError::Unreachable("memory store offline".to_string()));
        }

        // All-or-nothing, like a single INSERT statement.
        for entity in rows {
            self.check_row(table, entity)?;
        }

        let target = self.tables.entry(table.name).or_default();
        let mut inserted = 0u64;
        for entity in rows {
            let key = entity.natural_key().to_string();
            if !target.contains_key(&key) {
                target.insert(key, entity.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn count(&mut self, table: &TableSpec) -> Result<u64, StoreError> {
        if !self.reachable() {
            return Err(StoreError::Unreachable("memory store offline".to_string()));
        }
        Ok(self.len(table.name) as u64)
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}
