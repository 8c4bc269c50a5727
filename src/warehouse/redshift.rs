//! Postgres/Redshift warehouse implementation over an sqlx pool.

use async_trait::async_trait;
use snafu::prelude::*;
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::debug;

use crate::config::WarehouseConfig;
use crate::error::{ConnectSnafu, WarehouseError};

use super::{CopyRequest, Warehouse};

/// Undefined-table SQLSTATE code.
const UNDEFINED_TABLE: &str = "42P01";

/// Warehouse backed by a Postgres-protocol connection pool.
///
/// Redshift speaks the Postgres wire protocol, so the same implementation
/// covers both a local Postgres and a Redshift cluster.
pub struct RedshiftWarehouse {
    pool: PgPool,
}

impl RedshiftWarehouse {
    /// Connect using the configured pool sizing.
    pub async fn connect(config: &WarehouseConfig) -> Result<Self, WarehouseError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await
            .context(ConnectSnafu)?;

        Ok(Self { pool })
    }
}

/// Map an sqlx error, detecting the undefined-table SQLSTATE.
fn map_sql_error(error: sqlx::Error, table: Option<&str>) -> WarehouseError {
    if let sqlx::Error::Database(db) = &error {
        if db.code().as_deref() == Some(UNDEFINED_TABLE) {
            return WarehouseError::UndefinedTable {
                table: table.unwrap_or("<unknown>").to_string(),
            };
        }
    }
    WarehouseError::Sql { source: error }
}

#[async_trait]
impl Warehouse for RedshiftWarehouse {
    async fn execute(&self, sql: &str) -> Result<u64, WarehouseError> {
        debug!("Executing statement ({} bytes)", sql.len());
        let result = sqlx::query(sql)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sql_error(e, None))?;
        Ok(result.rows_affected())
    }

    async fn row_count(&self, table: &str) -> Result<u64, WarehouseError> {
        let sql = format!("SELECT COUNT(*) FROM {table}");
        let row = sqlx::query(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sql_error(e, Some(table)))?;
        let count: i64 = row.get(0);
        Ok(count.unsigned_abs())
    }

    async fn copy_from_object_store(&self, request: &CopyRequest) -> Result<u64, WarehouseError> {
        // COPY statement embeds credentials; log only the destination.
        debug!("Copying {} into {}", request.source_uri, request.table);
        let result = sqlx::query(&request.to_sql())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sql_error(e, Some(&request.table)))?;
        Ok(result.rows_affected())
    }
}
