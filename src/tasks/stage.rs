//! Staging task: bulk-copy one external dataset into its landing table.

use async_trait::async_trait;
use snafu::prelude::*;
use tracing::{debug, info};

use crate::error::{
    ClearStagingSnafu, CopyRejectedSnafu, MissingSourceSnafu, SourceCheckSnafu, TaskError,
    TransferSnafu,
};
use crate::storage::SourceLocation;
use crate::warehouse::{CopyRequest, JsonFormat};

use super::{RunContext, Task, TaskOutcome};

/// Copies one named external dataset into one named staging table,
/// replacing its previous contents.
///
/// REPLACE semantics are implicit and unconditional for staging: the
/// landing table is cleared, then the resolved source is bulk-copied in.
/// A failure between clear and copy leaves the table empty, never
/// duplicated. Readers during the window may see a partial table; only
/// this pipeline reads these tables within a run.
pub struct StagingTask {
    table: String,
    source: SourceLocation,
    format: JsonFormat,
    /// Whether to verify the resolved source prefix before copying.
    verify_source: bool,
}

impl StagingTask {
    pub fn new(table: impl Into<String>, source: SourceLocation, format: JsonFormat) -> Self {
        Self {
            table: table.into(),
            source,
            format,
            verify_source: true,
        }
    }

    pub fn with_verify_source(mut self, verify: bool) -> Self {
        self.verify_source = verify;
        self
    }

    /// Check that the resolved prefix holds at least one object.
    async fn check_source(&self, ctx: &RunContext, uri: &str) -> Result<(), TaskError> {
        let Some(storage) = &ctx.storage else {
            return Ok(());
        };

        let key = self.source.resolve_key(ctx.logical_date);
        let exists = storage
            .prefix_exists(&self.source.bucket, &key)
            .await
            .context(SourceCheckSnafu { uri })
            .context(TransferSnafu)?;

        if !exists {
            return MissingSourceSnafu { uri }.fail().context(TransferSnafu);
        }
        Ok(())
    }
}

#[async_trait]
impl Task for StagingTask {
    async fn run(&self, ctx: &RunContext) -> Result<TaskOutcome, TaskError> {
        let uri = self.source.resolve_uri(ctx.logical_date);

        if self.verify_source {
            self.check_source(ctx, &uri).await?;
        } else {
            debug!("Skipping source check for {}", uri);
        }

        info!("Clearing staging table {}", self.table);
        ctx.warehouse
            .execute(&format!("DELETE FROM {}", self.table))
            .await
            .context(ClearStagingSnafu { table: self.table.as_str() })
            .context(TransferSnafu)?;

        info!("Copying {} into {}", uri, self.table);
        let request = CopyRequest {
            table: self.table.clone(),
            source_uri: uri,
            access_key_id: ctx.aws.access_key_id.clone(),
            secret_access_key: ctx.aws.secret_access_key.clone(),
            region: ctx.aws.region.clone(),
            format: self.format.clone(),
        };

        let loaded = ctx
            .warehouse
            .copy_from_object_store(&request)
            .await
            .context(CopyRejectedSnafu { table: self.table.as_str() })
            .context(TransferSnafu)?;

        info!("Staged {} rows into {}", loaded, self.table);
        Ok(TaskOutcome::rows(loaded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransferError;
    use crate::storage::ObjectStorage;
    use crate::tasks::test_support::context;
    use crate::warehouse::MemoryWarehouse;
    use std::sync::Arc;

    struct StubStorage {
        exists: bool,
    }

    #[async_trait]
    impl ObjectStorage for StubStorage {
        async fn prefix_exists(
            &self,
            _bucket: &str,
            _prefix: &str,
        ) -> Result<bool, crate::error::StorageError> {
            Ok(self.exists)
        }
    }

    fn events_task() -> StagingTask {
        StagingTask::new(
            "staging_events",
            SourceLocation::new("udacity-dend", "log_data/%Y/%m/"),
            JsonFormat::Manifest("s3://udacity-dend/log_json_path.json".to_string()),
        )
    }

    #[tokio::test]
    async fn test_stage_clears_then_copies() {
        let warehouse = Arc::new(MemoryWarehouse::new());
        warehouse.create_table("staging_events");
        warehouse.set_copy_rows("staging_events", 500);
        let ctx = context(warehouse.clone());

        let outcome = events_task().run(&ctx).await.unwrap();
        assert_eq!(outcome.rows, 500);
        assert_eq!(warehouse.rows("staging_events"), Some(500));

        let delete = warehouse.first_statement_index("DELETE FROM staging_events");
        let copy = warehouse.first_statement_index("COPY staging_events");
        assert!(delete.unwrap() < copy.unwrap());
    }

    #[tokio::test]
    async fn test_stage_replaces_previous_contents() {
        let warehouse = Arc::new(MemoryWarehouse::new());
        warehouse.create_table("staging_events");
        warehouse.set_copy_rows("staging_events", 100);
        let ctx = context(warehouse.clone());

        events_task().run(&ctx).await.unwrap();
        events_task().run(&ctx).await.unwrap();

        // Replace, never append: two runs leave one copy's worth of rows.
        assert_eq!(warehouse.rows("staging_events"), Some(100));
    }

    #[tokio::test]
    async fn test_copy_uses_resolved_key() {
        let warehouse = Arc::new(MemoryWarehouse::new());
        warehouse.create_table("staging_events");
        let ctx = context(warehouse.clone());

        events_task().run(&ctx).await.unwrap();
        let statements = warehouse.statements();
        assert!(
            statements
                .iter()
                .any(|s| s.contains("s3://udacity-dend/log_data/2025/01/"))
        );
    }

    #[tokio::test]
    async fn test_missing_source_fails_with_transfer_error() {
        let warehouse = Arc::new(MemoryWarehouse::new());
        warehouse.create_table("staging_events");
        let ctx = context(warehouse.clone()).with_storage(Arc::new(StubStorage { exists: false }));

        let err = events_task().run(&ctx).await.unwrap_err();
        assert!(matches!(
            err,
            TaskError::Transfer {
                source: TransferError::MissingSource { .. }
            }
        ));
        // Nothing was cleared or copied.
        assert!(warehouse.statements().is_empty());
    }

    #[tokio::test]
    async fn test_existing_source_passes_check() {
        let warehouse = Arc::new(MemoryWarehouse::new());
        warehouse.create_table("staging_events");
        warehouse.set_copy_rows("staging_events", 7);
        let ctx = context(warehouse.clone()).with_storage(Arc::new(StubStorage { exists: true }));

        let outcome = events_task().run(&ctx).await.unwrap();
        assert_eq!(outcome.rows, 7);
    }

    #[tokio::test]
    async fn test_rejected_copy_fails_with_transfer_error() {
        let warehouse = Arc::new(MemoryWarehouse::new());
        warehouse.create_table("staging_events");
        warehouse.fail_copies_into("staging_events", "S3ServiceException: region mismatch");
        let ctx = context(warehouse.clone());

        let err = events_task().run(&ctx).await.unwrap_err();
        assert!(matches!(
            err,
            TaskError::Transfer {
                source: TransferError::CopyRejected { .. }
            }
        ));
    }
}
