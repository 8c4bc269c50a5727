//! In-memory warehouse for tests.
//!
//! Models tables as names with row counts and understands exactly the
//! statement shapes the tasks generate: `CREATE TABLE IF NOT EXISTS`,
//! `DELETE FROM`, and `INSERT INTO <table> <select>`. The number of rows
//! an insert or copy produces is scripted per table, as are failures.
//! Every statement is recorded so tests can assert execution order.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::WarehouseError;

use super::{CopyRequest, Warehouse};

#[derive(Default)]
struct Inner {
    /// Existing tables and their current row counts.
    tables: HashMap<String, u64>,
    /// Rows a bulk copy into the keyed table yields.
    copy_rows: HashMap<String, u64>,
    /// Rows an insert-select into the keyed table yields.
    insert_rows: HashMap<String, u64>,
    /// Tables whose statements should fail, with the scripted message.
    fail_statements: HashMap<String, String>,
    /// Tables whose copies should fail, with the scripted message.
    fail_copies: HashMap<String, String>,
    /// Ordered log of every operation, for ordering assertions.
    log: Vec<String>,
}

/// Scriptable in-memory [`Warehouse`].
#[derive(Default)]
pub struct MemoryWarehouse {
    inner: Mutex<Inner>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table with zero rows (no-op if it already exists).
    pub fn create_table(&self, table: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.tables.entry(table.to_string()).or_insert(0);
    }

    /// Script the number of rows a bulk copy into `table` loads.
    pub fn set_copy_rows(&self, table: &str, rows: u64) {
        self.inner
            .lock()
            .unwrap()
            .copy_rows
            .insert(table.to_string(), rows);
    }

    /// Script the number of distinct rows an insert-select into `table`
    /// produces.
    pub fn set_insert_rows(&self, table: &str, rows: u64) {
        self.inner
            .lock()
            .unwrap()
            .insert_rows
            .insert(table.to_string(), rows);
    }

    /// Script every statement touching `table` to fail.
    pub fn fail_statements_on(&self, table: &str, message: &str) {
        self.inner
            .lock()
            .unwrap()
            .fail_statements
            .insert(table.to_string(), message.to_string());
    }

    /// Script bulk copies into `table` to fail.
    pub fn fail_copies_into(&self, table: &str, message: &str) {
        self.inner
            .lock()
            .unwrap()
            .fail_copies
            .insert(table.to_string(), message.to_string());
    }

    /// Current row count, or `None` if the table does not exist.
    pub fn rows(&self, table: &str) -> Option<u64> {
        self.inner.lock().unwrap().tables.get(table).copied()
    }

    /// Every operation executed so far, in order.
    pub fn statements(&self) -> Vec<String> {
        self.inner.lock().unwrap().log.clone()
    }

    /// Index of the first logged operation starting with `prefix`.
    pub fn first_statement_index(&self, prefix: &str) -> Option<usize> {
        self.inner
            .lock()
            .unwrap()
            .log
            .iter()
            .position(|s| s.starts_with(prefix))
    }
}

/// Extract the identifier that follows `keyword` in `sql`.
fn identifier_after<'a>(sql: &'a str, keyword: &str) -> Option<&'a str> {
    let start = sql.find(keyword)? + keyword.len();
    leading_identifier(&sql[start..])
}

/// The first identifier in `sql`, skipping leading whitespace.
fn leading_identifier(sql: &str) -> Option<&str> {
    let rest = sql.trim_start();
    let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    let identifier = &rest[..end];
    (!identifier.is_empty()).then_some(identifier)
}

impl Inner {
    fn check_scripted_failure(&self, table: &str) -> Result<(), WarehouseError> {
        if let Some(message) = self.fail_statements.get(table) {
            return Err(WarehouseError::Rejected {
                message: message.clone(),
            });
        }
        Ok(())
    }

    fn require_table(&self, table: &str) -> Result<u64, WarehouseError> {
        self.tables
            .get(table)
            .copied()
            .ok_or_else(|| WarehouseError::UndefinedTable {
                table: table.to_string(),
            })
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn execute(&self, sql: &str) -> Result<u64, WarehouseError> {
        let mut inner = self.inner.lock().unwrap();
        let statement = sql.trim();
        inner.log.push(statement.to_string());

        if statement.starts_with("CREATE TABLE") {
            // DDL may bundle several CREATE TABLE statements.
            let mut rest = statement;
            while let Some(pos) = rest.find("IF NOT EXISTS") {
                rest = &rest[pos + "IF NOT EXISTS".len()..];
                if let Some(table) = leading_identifier(rest) {
                    inner.tables.entry(table.to_string()).or_insert(0);
                }
            }
            return Ok(0);
        }

        if let Some(table) = identifier_after(statement, "DELETE FROM") {
            inner.check_scripted_failure(table)?;
            let previous = inner.require_table(table)?;
            inner.tables.insert(table.to_string(), 0);
            return Ok(previous);
        }

        if let Some(table) = identifier_after(statement, "INSERT INTO") {
            inner.check_scripted_failure(table)?;
            inner.require_table(table)?;
            let produced = inner.insert_rows.get(table).copied().unwrap_or(0);
            *inner.tables.entry(table.to_string()).or_insert(0) += produced;
            return Ok(produced);
        }

        Err(WarehouseError::Rejected {
            message: format!("unrecognized statement: {statement}"),
        })
    }

    async fn row_count(&self, table: &str) -> Result<u64, WarehouseError> {
        let mut inner = self.inner.lock().unwrap();
        inner.log.push(format!("COUNT {table}"));
        inner.check_scripted_failure(table)?;
        inner.require_table(table)
    }

    async fn copy_from_object_store(&self, request: &CopyRequest) -> Result<u64, WarehouseError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .log
            .push(format!("COPY {} FROM {}", request.table, request.source_uri));

        if let Some(message) = inner.fail_copies.get(&request.table) {
            return Err(WarehouseError::Rejected {
                message: message.clone(),
            });
        }

        inner.require_table(&request.table)?;
        let loaded = inner.copy_rows.get(&request.table).copied().unwrap_or(0);
        *inner.tables.entry(request.table.clone()).or_insert(0) += loaded;
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::JsonFormat;

    fn copy_request(table: &str) -> CopyRequest {
        CopyRequest {
            table: table.to_string(),
            source_uri: "s3://bucket/prefix/".to_string(),
            access_key_id: "key".to_string(),
            secret_access_key: "secret".to_string(),
            region: "us-west-2".to_string(),
            format: JsonFormat::Auto,
        }
    }

    #[tokio::test]
    async fn test_delete_resets_rows() {
        let wh = MemoryWarehouse::new();
        wh.create_table("users");
        wh.set_insert_rows("users", 5);
        wh.execute("INSERT INTO users SELECT DISTINCT ...").await.unwrap();
        assert_eq!(wh.rows("users"), Some(5));

        let affected = wh.execute("DELETE FROM users").await.unwrap();
        assert_eq!(affected, 5);
        assert_eq!(wh.rows("users"), Some(0));
    }

    #[tokio::test]
    async fn test_missing_table_is_undefined() {
        let wh = MemoryWarehouse::new();
        let err = wh.row_count("ghost").await.unwrap_err();
        assert!(err.is_undefined_table());
    }

    #[tokio::test]
    async fn test_ddl_creates_all_tables() {
        let wh = MemoryWarehouse::new();
        wh.execute(crate::catalog::CREATE_TABLES).await.unwrap();
        assert_eq!(wh.rows("staging_events"), Some(0));
        assert_eq!(wh.rows("songplays"), Some(0));
        assert_eq!(wh.rows("time"), Some(0));
    }

    #[tokio::test]
    async fn test_copy_appends_scripted_rows() {
        let wh = MemoryWarehouse::new();
        wh.create_table("staging_songs");
        wh.set_copy_rows("staging_songs", 14896);
        let loaded = wh.copy_from_object_store(&copy_request("staging_songs")).await.unwrap();
        assert_eq!(loaded, 14896);
        assert_eq!(wh.rows("staging_songs"), Some(14896));
    }

    #[tokio::test]
    async fn test_scripted_copy_failure() {
        let wh = MemoryWarehouse::new();
        wh.create_table("staging_events");
        wh.fail_copies_into("staging_events", "S3ServiceException: access denied");
        let err = wh.copy_from_object_store(&copy_request("staging_events")).await;
        assert!(err.is_err());
    }
}
