//! Table creation task.

use async_trait::async_trait;
use snafu::prelude::*;
use tracing::info;

use crate::catalog;
use crate::error::{CreateTablesSnafu, TaskError, TransformSnafu};

use super::{RunContext, Task, TaskOutcome};

/// Creates every table the pipeline touches. Idempotent: the DDL uses
/// `CREATE TABLE IF NOT EXISTS` throughout.
#[derive(Debug, Default)]
pub struct CreateTablesTask;

#[async_trait]
impl Task for CreateTablesTask {
    async fn run(&self, ctx: &RunContext) -> Result<TaskOutcome, TaskError> {
        info!("Creating tables if absent");
        ctx.warehouse
            .execute(catalog::CREATE_TABLES)
            .await
            .context(CreateTablesSnafu)
            .context(TransformSnafu)?;
        Ok(TaskOutcome::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::test_support::context;
    use crate::warehouse::MemoryWarehouse;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_creates_all_tables() {
        let warehouse = Arc::new(MemoryWarehouse::new());
        let ctx = context(warehouse.clone());

        CreateTablesTask.run(&ctx).await.unwrap();

        for table in ["staging_events", "staging_songs", "songplays", "users", "time"] {
            assert_eq!(warehouse.rows(table), Some(0), "missing {table}");
        }
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let warehouse = Arc::new(MemoryWarehouse::new());
        let ctx = context(warehouse.clone());

        CreateTablesTask.run(&ctx).await.unwrap();
        CreateTablesTask.run(&ctx).await.unwrap();
        assert_eq!(warehouse.rows("songplays"), Some(0));
    }
}
