use indexmap::IndexSet;
use tracing::debug;

use super::super::context::ContextBundle;
use super::{AsyncSchemaStore, SchemaStore, TableSchema};

/// Table names from the handler source and every called function's source,
/// deduplicated, minus tables the bundle already describes
fn referenced_tables(bundle: &ContextBundle, extract: impl Fn(&str) -> Vec<String>) -> Vec<String> {
    let mut tables = IndexSet::new();
    tables.extend(extract(&bundle.source_code));
    for called in bundle.function_calls.values() {
        tables.extend(extract(&called.source));
    }
    tables
        .into_iter()
        .filter(|t| !bundle.table_defs.contains_key(t))
        .collect()
}

fn record(bundle: &mut ContextBundle, table: String, markdown: String, schema: TableSchema) {
    bundle.table_markdowns.push(markdown);
    bundle.table_defs.insert(table, schema);
}

/// Describe the bundle's tables with a blocking store. Tables the store
/// cannot describe are skipped.
pub fn augment(bundle: &mut ContextBundle, store: &dyn SchemaStore) {
    for table in referenced_tables(bundle, |source| store.extract_table_names(source)) {
        match store.fetch_schema(&table) {
            Ok(schema) => {
                let markdown = store.render(&table, &schema);
                record(bundle, table, markdown, schema);
            }
            Err(e) => debug!("Skipping table {}: {}", table, e),
        }
    }
}

/// Same as [`augment`], awaiting each fetch in turn
pub async fn augment_async(bundle: &mut ContextBundle, store: &dyn AsyncSchemaStore) {
    for table in referenced_tables(bundle, |source| store.extract_table_names(source)) {
        match store.fetch_schema(&table).await {
            Ok(schema) => {
                let markdown = store.render(&table, &schema);
                record(bundle, table, markdown, schema);
            }
            Err(e) => debug!("Skipping table {}: {}", table, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use async_trait::async_trait;
    use crate::core::call_graph::SymbolId;
    use crate::core::context::CalledFunction;
    use crate::core::schema::sqlite::tests::store_with_tables;
    use crate::core::schema::{ColumnInfo, SchemaBackend};
    use crate::error::{RouteScribeError, Result};

    fn bundle() -> ContextBundle {
        let mut bundle = ContextBundle::new(
            "def handler():\n    return crud.list_orders()\n",
            "main.py",
            "/orders",
            "/orders_GET",
        );
        bundle.function_calls.insert(
            "crud.list_orders".to_string(),
            CalledFunction {
                id: SymbolId::new("crud.py", "list_orders"),
                source: "def list_orders():\n    db.execute(\"SELECT * FROM orders JOIN users ON 1=1\")\n    db.execute(\"SELECT * FROM ghosts\")\n".to_string(),
            },
        );
        bundle
    }

    #[test]
    fn test_sync_augment_skips_unknown_tables() {
        let store = store_with_tables();
        let mut bundle = bundle();
        augment(&mut bundle, &store);

        assert_eq!(bundle.table_defs.keys().collect::<Vec<_>>(), vec!["orders", "users"]);
        assert_eq!(bundle.table_markdowns.len(), 2);
        assert!(bundle.table_markdowns[0].starts_with("# Table: `orders`"));

        // A second pass adds nothing
        augment(&mut bundle, &store);
        assert_eq!(bundle.table_markdowns.len(), 2);
    }

    struct FakeStore {
        tables: HashMap<String, TableSchema>,
    }

    #[async_trait]
    impl AsyncSchemaStore for FakeStore {
        async fn fetch_schema(&self, table: &str) -> Result<TableSchema> {
            self.tables
                .get(table)
                .cloned()
                .ok_or_else(|| RouteScribeError::TableNotFound(table.to_string()))
        }
    }

    #[tokio::test]
    async fn test_async_backend_through_capability_enum() {
        let schema = TableSchema {
            columns: vec![ColumnInfo {
                name: "id".to_string(),
                data_type: "integer".to_string(),
                nullable: "NO".to_string(),
                default: None,
            }],
            ..Default::default()
        };
        let backend = SchemaBackend::Async(Box::new(FakeStore {
            tables: HashMap::from([("users".to_string(), schema.clone())]),
        }));
        assert!(backend.is_async());

        let mut bundle = bundle();
        backend.augment(&mut bundle).await;
        assert_eq!(bundle.table_defs.len(), 1);
        assert_eq!(bundle.table_defs["users"], schema);
        assert!(bundle.table_markdowns[0].contains("| id | integer | NO |  |"));
    }
}
