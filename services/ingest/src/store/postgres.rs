use crate::config::DatabaseSettings;
use crate::entities::{Entity, SqlValue, TableSpec};
use crate::error::{IngestError, StoreError};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::time::Duration;

use super::EntityStore;

/// DDL for the five target tables. Safe to re-apply.
pub const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Open the pool and prove the server answers. Any failure here is a
    /// connectivity error: nothing has been written yet.
    pub async fn connect(db: &DatabaseSettings) -> Result<Self, IngestError> {
        let options = PgConnectOptions::new()
            .host(&db.host)
            .port(db.port)
            .database(&db.name)
            .username(&db.user)
            .password(&db.password);

        let pool = PgPoolOptions::new()
            .max_connections(db.max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| IngestError::Connectivity(e.to_string()))?;

        Ok(Self { pool })
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }
}

/// `INSERT INTO <table> (...) VALUES (...), ... ON CONFLICT (<key>) DO NOTHING`
fn build_insert<'a>(table: &TableSpec, rows: &'a [Entity]) -> QueryBuilder<'a, Postgres> {
    let mut qb: QueryBuilder<'a, Postgres> =
        QueryBuilder::new(format!("INSERT INTO {} ({}) ", table.name, table.column_list()));

    qb.push_values(rows, |mut tuple, entity| {
        for value in entity.values() {
            match value {
                SqlValue::Text(v) => {
                    tuple.push_bind(v);
                }
                SqlValue::Float(v) => {
                    tuple.push_bind(v);
                }
                SqlValue::Date(v) => {
                    tuple.push_bind(v);
                }
            }
        }
    });

    qb.push(format!(" ON CONFLICT ({}) DO NOTHING", table.key));
    qb
}

#[async_trait]
impl EntityStore for PgStore {
    fn backend_tag(&self) -> &'static str {
        "postgres"
    }

    async fn insert_missing(
        &mut self,
        table: &TableSpec,
        rows: &[Entity],
    ) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut query = build_insert(table, rows);
        let result = query.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn count(&mut self, table: &TableSpec) -> Result<u64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.name);
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }

    async fn close(&mut self) {
        self.pool.close().await;
    }
}
