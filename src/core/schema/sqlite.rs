use rusqlite::{params, Connection};
use tracing::debug;

use crate::config::QueryConfig;
use crate::error::{RouteScribeError, Result};
use super::{ColumnInfo, ConstraintInfo, IndexInfo, SchemaStore, TableSchema};

const COLUMNS_QUERY: &str = r#"SELECT name, type, CASE WHEN "notnull" = 0 THEN 'YES' ELSE 'NO' END, dflt_value
FROM pragma_table_info(?1)"#;

const CONSTRAINTS_QUERY: &str = r#"SELECT 'pk_' || ?1, 'p', name FROM pragma_table_info(?1) WHERE pk > 0
UNION ALL
SELECT 'fk_' || ?1 || '_' || id, 'f', "from" FROM pragma_foreign_key_list(?1)"#;

const INDEXES_QUERY: &str = "SELECT name, COALESCE(sql, '') FROM sqlite_master WHERE type = 'index' AND tbl_name = ?1";

/// Synchronous store over a SQLite database file
pub struct SqliteSchemaStore {
    conn: Connection,
    queries: QueryConfig,
}

impl SqliteSchemaStore {
    /// Open the database at `path` (`:memory:` for a private in-memory one)
    pub fn open(path: &str, queries: Option<QueryConfig>) -> Result<Self> {
        let conn = Connection::open(path)?;
        debug!("Opened SQLite schema store at {}", path);
        Ok(Self::from_connection(conn, queries))
    }

    pub fn from_connection(conn: Connection, queries: Option<QueryConfig>) -> Self {
        Self {
            conn,
            queries: queries.unwrap_or_else(Self::default_queries),
        }
    }

    pub fn default_queries() -> QueryConfig {
        QueryConfig {
            columns: COLUMNS_QUERY.to_string(),
            constraints: CONSTRAINTS_QUERY.to_string(),
            indexes: INDEXES_QUERY.to_string(),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl SchemaStore for SqliteSchemaStore {
    fn fetch_schema(&self, table: &str) -> Result<TableSchema> {
        let mut stmt = self.conn.prepare(&self.queries.columns)?;
        let columns = stmt
            .query_map(params![table], |row| {
                Ok(ColumnInfo {
                    name: row.get(0)?,
                    data_type: row.get(1)?,
                    nullable: row.get(2)?,
                    default: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        if columns.is_empty() {
            return Err(RouteScribeError::TableNotFound(table.to_string()));
        }

        let mut stmt = self.conn.prepare(&self.queries.constraints)?;
        let constraints = stmt
            .query_map(params![table], |row| {
                Ok(ConstraintInfo {
                    name: row.get(0)?,
                    kind: row.get(1)?,
                    column: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut stmt = self.conn.prepare(&self.queries.indexes)?;
        let indexes = stmt
            .query_map(params![table], |row| {
                Ok(IndexInfo {
                    name: row.get(0)?,
                    definition: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(TableSchema {
            columns,
            constraints,
            indexes,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn store_with_tables() -> SqliteSchemaStore {
        let store = SqliteSchemaStore::open(":memory:", None).unwrap();
        store
            .connection()
            .execute_batch(
                r#"
CREATE TABLE users (
    id INTEGER PRIMARY KEY,
    email TEXT NOT NULL,
    nickname TEXT DEFAULT 'anon'
);
CREATE TABLE orders (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(id),
    total REAL
);
CREATE INDEX idx_orders_user ON orders (user_id);
"#,
            )
            .unwrap();
        store
    }

    #[test]
    fn test_fetch_columns_constraints_and_indexes() {
        let store = store_with_tables();
        let schema = store.fetch_schema("orders").unwrap();

        let columns: Vec<(&str, &str, &str)> = schema
            .columns
            .iter()
            .map(|c| (c.name.as_str(), c.data_type.as_str(), c.nullable.as_str()))
            .collect();
        assert_eq!(
            columns,
            vec![("id", "INTEGER", "YES"), ("user_id", "INTEGER", "NO"), ("total", "REAL", "YES")]
        );

        assert_eq!(
            schema.constraints,
            vec![
                ConstraintInfo { name: "pk_orders".to_string(), kind: "p".to_string(), column: "id".to_string() },
                ConstraintInfo { name: "fk_orders_0".to_string(), kind: "f".to_string(), column: "user_id".to_string() },
            ]
        );

        assert_eq!(schema.indexes.len(), 1);
        assert_eq!(schema.indexes[0].name, "idx_orders_user");
        assert!(schema.indexes[0].definition.contains("CREATE INDEX idx_orders_user"));
    }

    #[test]
    fn test_defaults_are_kept_verbatim() {
        let store = store_with_tables();
        let schema = store.fetch_schema("users").unwrap();
        assert_eq!(schema.columns[2].default.as_deref(), Some("'anon'"));
        assert_eq!(schema.columns[0].default, None);
    }

    #[test]
    fn test_missing_table() {
        let store = store_with_tables();
        assert!(matches!(
            store.fetch_schema("nope"),
            Err(RouteScribeError::TableNotFound(name)) if name == "nope"
        ));
    }
}
