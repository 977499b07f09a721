use async_trait::async_trait;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error};

use crate::config::QueryConfig;
use crate::error::{RouteScribeError, Result};
use super::{AsyncSchemaStore, ColumnInfo, ConstraintInfo, IndexInfo, TableSchema};

const COLUMNS_QUERY: &str = "SELECT column_name::text, data_type::text, is_nullable::text, column_default::text
FROM information_schema.columns
WHERE table_name = $1
ORDER BY ordinal_position";

const CONSTRAINTS_QUERY: &str = "SELECT c.conname::text, c.contype::text, a.attname::text
FROM pg_constraint c
JOIN pg_attribute a ON a.attnum = ANY(c.conkey) AND a.attrelid = c.conrelid
WHERE c.conrelid = $1::text::regclass";

const INDEXES_QUERY: &str = "SELECT indexname::text, indexdef::text
FROM pg_indexes
WHERE tablename = $1";

/// Asynchronous store over a Postgres connection
pub struct PostgresSchemaStore {
    client: Client,
    queries: QueryConfig,
}

impl PostgresSchemaStore {
    /// Connect with `url` as given and drive the connection on a background task
    pub async fn connect(url: &str, queries: Option<QueryConfig>) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(url, NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("Schema store connection error: {}", e);
            }
        });
        debug!("Connected to Postgres schema store");

        Ok(Self {
            client,
            queries: queries.unwrap_or_else(Self::default_queries),
        })
    }

    pub fn default_queries() -> QueryConfig {
        QueryConfig {
            columns: COLUMNS_QUERY.to_string(),
            constraints: CONSTRAINTS_QUERY.to_string(),
            indexes: INDEXES_QUERY.to_string(),
        }
    }
}

#[async_trait]
impl AsyncSchemaStore for PostgresSchemaStore {
    async fn fetch_schema(&self, table: &str) -> Result<TableSchema> {
        let rows = self.client.query(self.queries.columns.as_str(), &[&table]).await?;
        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            columns.push(ColumnInfo {
                name: row.try_get(0)?,
                data_type: row.try_get(1)?,
                nullable: row.try_get(2)?,
                default: row.try_get(3)?,
            });
        }
        if columns.is_empty() {
            return Err(RouteScribeError::TableNotFound(table.to_string()));
        }

        let rows = self.client.query(self.queries.constraints.as_str(), &[&table]).await?;
        let mut constraints = Vec::with_capacity(rows.len());
        for row in &rows {
            constraints.push(ConstraintInfo {
                name: row.try_get(0)?,
                kind: row.try_get(1)?,
                column: row.try_get(2)?,
            });
        }

        let rows = self.client.query(self.queries.indexes.as_str(), &[&table]).await?;
        let mut indexes = Vec::with_capacity(rows.len());
        for row in &rows {
            indexes.push(IndexInfo {
                name: row.try_get(0)?,
                definition: row.try_get(1)?,
            });
        }

        Ok(TableSchema {
            columns,
            constraints,
            indexes,
        })
    }
}
