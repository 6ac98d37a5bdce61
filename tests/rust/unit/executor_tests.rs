use async_trait::async_trait;
use lexiquery::query_builder::{CompiledQuery, SelectQuery};
use lexiquery::server::storage::{QueryExecutor, StorageError, TempTableJob};
use serde_json::{json, Value};

/// Answers every query with the same rows.
struct FixedRows(Vec<Value>);

#[async_trait]
impl QueryExecutor for FixedRows {
    async fn fetch_all(&self, _query: &CompiledQuery) -> Result<Vec<Value>, StorageError> {
        Ok(self.0.clone())
    }

    async fn run_in_transaction(&self, _job: &TempTableJob) -> Result<Vec<Value>, StorageError> {
        Ok(self.0.clone())
    }
}

fn query() -> CompiledQuery {
    SelectQuery::from("langvar").select_raw("langvar.id").compile()
}

#[test]
fn test_fetch_optional_takes_first_row() {
    let executor = FixedRows(vec![json!({ "id": 1 }), json!({ "id": 2 })]);
    let row = tokio_test::block_on(executor.fetch_optional(&query())).unwrap();
    assert_eq!(row, Some(json!({ "id": 1 })));
}

#[test]
fn test_fetch_optional_without_rows() {
    let executor = FixedRows(Vec::new());
    let row = tokio_test::block_on(executor.fetch_optional(&query())).unwrap();
    assert_eq!(row, None);
}
