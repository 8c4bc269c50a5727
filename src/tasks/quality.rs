//! Data quality gate.

use async_trait::async_trait;
use snafu::prelude::*;
use tracing::info;

use crate::emit;
use crate::error::{CountQuerySnafu, QualityError, QualitySnafu, TaskError};
use crate::metrics::events::{CheckStatus, QualityCheck};

use super::{RunContext, Task, TaskOutcome};

/// Validates output tables against a minimal-row-count invariant.
///
/// Checks run in the configured order and short-circuit on the first
/// violation. A table that does not exist fails distinctly from one that
/// exists but is empty. Read-only; no side effects.
pub struct QualityGateTask {
    tables: Vec<String>,
}

impl QualityGateTask {
    pub fn new(tables: Vec<String>) -> Self {
        Self { tables }
    }
}

#[async_trait]
impl Task for QualityGateTask {
    async fn run(&self, ctx: &RunContext) -> Result<TaskOutcome, TaskError> {
        for table in &self.tables {
            let count = match ctx.warehouse.row_count(table).await {
                Ok(count) => count,
                Err(source) if source.is_undefined_table() => {
                    emit!(QualityCheck {
                        table: table.clone(),
                        status: CheckStatus::Missing,
                    });
                    return Err(QualityError::Missing {
                        table: table.clone(),
                    })
                    .context(QualitySnafu);
                }
                Err(source) => {
                    return Err(source)
                        .context(CountQuerySnafu { table: table.as_str() })
                        .context(QualitySnafu);
                }
            };

            if count == 0 {
                emit!(QualityCheck {
                    table: table.clone(),
                    status: CheckStatus::Empty,
                });
                return Err(QualityError::Empty {
                    table: table.clone(),
                })
                .context(QualitySnafu);
            }

            info!("Quality check passed for {} ({} rows)", table, count);
            emit!(QualityCheck {
                table: table.clone(),
                status: CheckStatus::Passed,
            });
        }

        Ok(TaskOutcome::default())
    }
}
