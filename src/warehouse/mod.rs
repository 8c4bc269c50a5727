//! Warehouse abstraction.
//!
//! Tasks talk to the warehouse through the narrow [`Warehouse`] trait:
//! execute a statement, count rows in a table, or bulk-copy from object
//! storage. The production implementation runs over a Postgres/Redshift
//! connection pool; tests use the in-memory implementation.

mod memory;
mod redshift;

pub use memory::MemoryWarehouse;
pub use redshift::RedshiftWarehouse;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::WarehouseError;

/// A reference-counted warehouse handle, shared across tasks in one run.
pub type WarehouseRef = Arc<dyn Warehouse>;

/// Narrow interface to the columnar warehouse.
///
/// Each call borrows a connection for its own duration; no task holds a
/// connection across its own suspension points.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Execute a statement, returning the number of rows affected.
    async fn execute(&self, sql: &str) -> Result<u64, WarehouseError>;

    /// Count rows in a table.
    ///
    /// Distinguishes a missing table ([`WarehouseError::UndefinedTable`])
    /// from one that exists with zero rows.
    async fn row_count(&self, table: &str) -> Result<u64, WarehouseError>;

    /// Bulk-copy external data into a staging table.
    async fn copy_from_object_store(&self, request: &CopyRequest) -> Result<u64, WarehouseError>;
}

/// JSON parsing option for a bulk copy, mirroring Redshift's
/// `FORMAT AS JSON` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonFormat {
    /// Map JSON keys to columns by name.
    Auto,
    /// Use a jsonpaths manifest at the given URI.
    Manifest(String),
}

impl JsonFormat {
    fn as_copy_option(&self) -> &str {
        match self {
            JsonFormat::Auto => "auto",
            JsonFormat::Manifest(uri) => uri,
        }
    }
}

/// A fully resolved bulk-copy operation: destination table, source URI,
/// credentials, region, and format. Immutable once a run starts.
#[derive(Debug, Clone)]
pub struct CopyRequest {
    pub table: String,
    pub source_uri: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub format: JsonFormat,
}

impl CopyRequest {
    /// Render the Redshift COPY statement. Contains credentials; never log.
    pub fn to_sql(&self) -> String {
        format!(
            "COPY {table}\n\
             FROM '{uri}'\n\
             ACCESS_KEY_ID '{access_key}'\n\
             SECRET_ACCESS_KEY '{secret_key}'\n\
             REGION '{region}'\n\
             FORMAT AS JSON '{format}'",
            table = self.table,
            uri = self.source_uri,
            access_key = self.access_key_id,
            secret_key = self.secret_access_key,
            region = self.region,
            format = self.format.as_copy_option(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CopyRequest {
        CopyRequest {
            table: "staging_events".into(),
            source_uri: "s3://udacity-dend/log_data/2025/01/".into(),
            access_key_id: "AKIA123".into(),
            secret_access_key: "topsecret".into(),
            region: "us-west-2".into(),
            format: JsonFormat::Manifest("s3://udacity-dend/log_json_path.json".into()),
        }
    }

    #[test]
    fn test_copy_sql_rendering() {
        let sql = request().to_sql();
        assert!(sql.starts_with("COPY staging_events"));
        assert!(sql.contains("FROM 's3://udacity-dend/log_data/2025/01/'"));
        assert!(sql.contains("REGION 'us-west-2'"));
        assert!(sql.contains("FORMAT AS JSON 's3://udacity-dend/log_json_path.json'"));
    }

    #[test]
    fn test_auto_format_option() {
        let mut req = request();
        req.format = JsonFormat::Auto;
        assert!(req.to_sql().ends_with("FORMAT AS JSON 'auto'"));
    }
}
