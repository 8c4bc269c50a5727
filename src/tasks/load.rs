//! Fact and dimension load task.
//!
//! One polymorphic task covers both the fact and the dimension loads: the
//! only differences are the target table and the catalog query, so the
//! clear-then-insert control flow lives here exactly once.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use tracing::info;

use crate::catalog::Dataset;
use crate::emit;
use crate::error::{ClearTableSnafu, InsertSnafu, TaskError, TransformSnafu};
use crate::metrics::events::RowsLoaded;

use super::{RunContext, Task, TaskOutcome};

/// Whether a target table is cleared before insertion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    /// Delete all rows, then insert. Failure between the two leaves the
    /// table empty, never duplicated (at-most-once, not exactly-once).
    #[default]
    Replace,
    /// Insert without clearing. Re-running duplicates rows; unused by the
    /// reference topology.
    Append,
}

/// Recomputes one table of the star schema from its catalog query.
pub struct LoadTask {
    dataset: Dataset,
    mode: LoadMode,
}

impl LoadTask {
    pub fn new(dataset: Dataset, mode: LoadMode) -> Self {
        Self { dataset, mode }
    }
}

#[async_trait]
impl Task for LoadTask {
    async fn run(&self, ctx: &RunContext) -> Result<TaskOutcome, TaskError> {
        let table = self.dataset.table();

        if self.mode == LoadMode::Replace {
            info!("Clearing {} before load", table);
            ctx.warehouse
                .execute(&format!("DELETE FROM {table}"))
                .await
                .context(ClearTableSnafu { table })
                .context(TransformSnafu)?;
        }

        // Deduplication comes from the catalog's SELECT DISTINCT, not from
        // constraints on the target table.
        let sql = format!("INSERT INTO {table} {}", self.dataset.select());
        let rows = ctx
            .warehouse
            .execute(&sql)
            .await
            .context(InsertSnafu { table })
            .context(TransformSnafu)?;

        // Zero rows is a valid result; an empty join is not an error.
        info!("Loaded {} rows into {}", rows, table);
        emit!(RowsLoaded { table, rows });
        Ok(TaskOutcome::rows(rows))
    }
}
