//! Task adapters: the units of work scheduled by the pipeline graph.
//!
//! Every task implements the same narrow contract: given the run context
//! (logical date, warehouse handle, credentials), do its work and report
//! the number of rows affected. Tasks never retry themselves; retry policy
//! belongs to the graph executor.

mod ddl;
mod load;
mod quality;
mod stage;

pub use ddl::CreateTablesTask;
pub use load::{LoadMode, LoadTask};
pub use quality::QualityGateTask;
pub use stage::StagingTask;

use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;

use crate::config::AwsConfig;
use crate::error::TaskError;
use crate::storage::ObjectStorageRef;
use crate::warehouse::WarehouseRef;

/// A reference-counted task, as stored in graph nodes.
pub type TaskRef = Arc<dyn Task>;

/// Everything a task may touch during one run. Immutable once the run
/// starts; shared by every task in the graph.
pub struct RunContext {
    /// The run's partition date, substituted into source key templates.
    pub logical_date: NaiveDate,
    pub warehouse: WarehouseRef,
    pub aws: AwsConfig,
    /// Object storage for pre-flight source checks; `None` skips them.
    pub storage: Option<ObjectStorageRef>,
}

impl RunContext {
    pub fn new(logical_date: NaiveDate, warehouse: WarehouseRef, aws: AwsConfig) -> Self {
        Self {
            logical_date,
            warehouse,
            aws,
            storage: None,
        }
    }

    pub fn with_storage(mut self, storage: ObjectStorageRef) -> Self {
        self.storage = Some(storage);
        self
    }
}

/// Result of a successful task execution.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskOutcome {
    /// Rows affected by the task (0 for DDL and the quality gate).
    pub rows: u64,
}

impl TaskOutcome {
    pub fn rows(rows: u64) -> Self {
        Self { rows }
    }
}

/// The shared task-execution contract.
#[async_trait]
pub trait Task: Send + Sync {
    /// Execute the task once. Exactly one attempt; the executor owns retries.
    async fn run(&self, ctx: &RunContext) -> Result<TaskOutcome, TaskError>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::warehouse::MemoryWarehouse;

    pub fn aws_config() -> AwsConfig {
        AwsConfig {
            access_key_id: "AKIA123".to_string(),
            secret_access_key: "secret".to_string(),
            region: "us-west-2".to_string(),
        }
    }

    pub fn context(warehouse: Arc<MemoryWarehouse>) -> RunContext {
        RunContext::new(
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            warehouse,
            aws_config(),
        )
    }
}
