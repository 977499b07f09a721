//! Table schema lookup for the SQL a handler touches.
//!
//! Table names are pulled out of source text with a keyword pattern, then
//! described by a schema store. Two store flavours share the same contract:
//! [`SchemaStore`] is blocking (SQLite), [`AsyncSchemaStore`] runs on the
//! tokio runtime (Postgres). [`SchemaBackend`] holds whichever one the
//! configuration selects.

mod augment;
mod postgres;
mod sqlite;

use async_trait::async_trait;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::config::DatabaseConfig;
use crate::error::{RouteScribeError, Result};
use super::context::ContextBundle;

pub use augment::{augment, augment_async};
pub use postgres::PostgresSchemaStore;
pub use sqlite::SqliteSchemaStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    /// "YES" or "NO"
    pub nullable: String,
    pub default: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintInfo {
    pub name: String,
    /// Single-letter kind: p(rimary), f(oreign), u(nique), c(heck)
    pub kind: String,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub definition: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnInfo>,
    pub constraints: Vec<ConstraintInfo>,
    pub indexes: Vec<IndexInfo>,
}

/// Blocking schema store
pub trait SchemaStore: Send {
    fn fetch_schema(&self, table: &str) -> Result<TableSchema>;

    fn extract_table_names(&self, source: &str) -> Vec<String> {
        extract_table_names(source)
    }

    fn render(&self, table: &str, schema: &TableSchema) -> String {
        render_markdown(table, schema)
    }
}

/// Schema store driven by the async runtime
#[async_trait]
pub trait AsyncSchemaStore: Send + Sync {
    async fn fetch_schema(&self, table: &str) -> Result<TableSchema>;

    fn extract_table_names(&self, source: &str) -> Vec<String> {
        extract_table_names(source)
    }

    fn render(&self, table: &str, schema: &TableSchema) -> String {
        render_markdown(table, schema)
    }
}

/// The configured store, tagged by how it must be driven
pub enum SchemaBackend {
    Sync(Box<dyn SchemaStore>),
    Async(Box<dyn AsyncSchemaStore>),
}

impl SchemaBackend {
    pub fn is_async(&self) -> bool {
        matches!(self, SchemaBackend::Async(_))
    }

    /// Describe every table referenced by the bundle's sources
    pub async fn augment(&self, bundle: &mut ContextBundle) {
        match self {
            SchemaBackend::Sync(store) => augment(bundle, store.as_ref()),
            SchemaBackend::Async(store) => augment_async(bundle, store.as_ref()).await,
        }
    }
}

/// Open the store named by `config.backend`
pub async fn create_backend(config: &DatabaseConfig) -> Result<SchemaBackend> {
    match config.backend.to_lowercase().as_str() {
        "sqlite" => {
            let store = SqliteSchemaStore::open(&config.url, config.queries.clone())?;
            Ok(SchemaBackend::Sync(Box::new(store)))
        }
        "postgres" | "postgresql" => {
            let store = PostgresSchemaStore::connect(&config.url, config.queries.clone()).await?;
            Ok(SchemaBackend::Async(Box::new(store)))
        }
        other => Err(RouteScribeError::Config(format!(
            "Unsupported database backend: {}",
            other
        ))),
    }
}

/// Identifiers following FROM, JOIN, INTO or UPDATE, in first-seen order.
/// Import lines are dropped first; a match directly followed by `(` is a
/// function call, not a table.
pub fn extract_table_names(source: &str) -> Vec<String> {
    let (Ok(import), Ok(from_import), Ok(table)) = (
        regex::Regex::new(r"(?m)^\s*import.*\n"),
        regex::Regex::new(r"(?m)^\s*from\s+[^\n]+\s+import.*\n"),
        regex::Regex::new(r"(?i)\b(?:FROM|JOIN|INTO|UPDATE)\s+([a-zA-Z_][a-zA-Z0-9_]*)\b"),
    ) else {
        return Vec::new();
    };

    let stripped = import.replace_all(source, "");
    let stripped = from_import.replace_all(&stripped, "");

    let mut names = IndexSet::new();
    for cap in table.captures_iter(&stripped) {
        let Some(name) = cap.get(1) else {
            continue;
        };
        let followed_by_paren = stripped[name.end()..]
            .chars()
            .find(|c| !c.is_whitespace())
            == Some('(');
        if !followed_by_paren {
            names.insert(name.as_str().to_string());
        }
    }
    names.into_iter().collect()
}

/// Markdown description of one table: columns, constraints and indexes
pub fn render_markdown(table: &str, schema: &TableSchema) -> String {
    let mut out = format!("# Table: `{}`\n\n", table);

    out.push_str("## Columns\n");
    out.push_str("| Column | Type | Nullable | Default |\n");
    out.push_str("|--------|------|----------|---------|\n");
    for column in &schema.columns {
        out.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            column.name,
            column.data_type,
            column.nullable,
            column.default.as_deref().unwrap_or("")
        ));
    }

    out.push_str("\n## Constraints\n");
    out.push_str("| Constraint Name | Type | Column |\n");
    out.push_str("|----------------|------|--------|\n");
    for constraint in &schema.constraints {
        out.push_str(&format!(
            "| {} | {} | {} |\n",
            constraint.name, constraint.kind, constraint.column
        ));
    }

    out.push_str("\n## Indexes\n");
    out.push_str("| Index Name | Definition |\n");
    out.push_str("|------------|------------|\n");
    for index in &schema.indexes {
        out.push_str(&format!("| {} | {} |\n", index.name, index.definition));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_lines_are_stripped() {
        assert_eq!(
            extract_table_names("from users import User\nSELECT * FROM orders WHERE id=1"),
            vec!["orders"]
        );
        assert_eq!(
            extract_table_names("import users\n    from db import session\nq = 'select * from accounts'"),
            vec!["accounts"]
        );
    }

    #[test]
    fn test_function_call_shapes_are_excluded() {
        assert!(extract_table_names("SELECT * FROM compute_total(orders)").is_empty());
        assert!(extract_table_names("SELECT * FROM compute_total (orders)").is_empty());
        assert!(extract_table_names("SELECT * FROM (SELECT 1) AS t").is_empty());
    }

    #[test]
    fn test_all_keywords_case_insensitive_and_deduplicated() {
        let source = r#"
rows = db.execute("select * from users join orders on orders.user_id = users.id")
db.execute("INSERT INTO audit_log VALUES (1)")
db.execute("update Users set name = 'x'")
db.execute("SELECT * FROM users")
"#;
        assert_eq!(extract_table_names(source), vec!["users", "orders", "audit_log", "Users"]);
    }

    #[test]
    fn test_render_layout() {
        let schema = TableSchema {
            columns: vec![
                ColumnInfo {
                    name: "id".to_string(),
                    data_type: "integer".to_string(),
                    nullable: "NO".to_string(),
                    default: Some("nextval('users_id_seq'::regclass)".to_string()),
                },
                ColumnInfo {
                    name: "email".to_string(),
                    data_type: "text".to_string(),
                    nullable: "YES".to_string(),
                    default: None,
                },
            ],
            constraints: vec![ConstraintInfo {
                name: "users_pkey".to_string(),
                kind: "p".to_string(),
                column: "id".to_string(),
            }],
            indexes: vec![IndexInfo {
                name: "users_pkey".to_string(),
                definition: "CREATE UNIQUE INDEX users_pkey ON users (id)".to_string(),
            }],
        };

        let expected = "# Table: `users`\n\n\
## Columns\n\
| Column | Type | Nullable | Default |\n\
|--------|------|----------|---------|\n\
| id | integer | NO | nextval('users_id_seq'::regclass) |\n\
| email | text | YES |  |\n\
\n## Constraints\n\
| Constraint Name | Type | Column |\n\
|----------------|------|--------|\n\
| users_pkey | p | id |\n\
\n## Indexes\n\
| Index Name | Definition |\n\
|------------|------------|\n\
| users_pkey | CREATE UNIQUE INDEX users_pkey ON users (id) |\n";
        assert_eq!(render_markdown("users", &schema), expected);
    }

    #[tokio::test]
    async fn test_unknown_backend_is_a_config_error() {
        let config = DatabaseConfig {
            backend: "oracle".to_string(),
            url: "x".to_string(),
            queries: None,
        };
        assert!(matches!(create_backend(&config).await, Err(RouteScribeError::Config(_))));
    }
}
