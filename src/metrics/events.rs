//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in the pipeline.
//! Events implement the `InternalEvent` trait which emits the corresponding
//! Prometheus metric.

use metrics::counter;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Terminal status of a task node.
#[derive(Debug, Clone, Copy)]
pub enum TaskStatus {
    Succeeded,
    Failed,
    UpstreamFailed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::UpstreamFailed => "upstream_failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

/// Event emitted when a task node reaches a terminal state.
pub struct TaskFinished {
    pub node: String,
    pub status: TaskStatus,
}

impl InternalEvent for TaskFinished {
    fn emit(self) {
        trace!(node = %self.node, status = self.status.as_str(), "Task finished");
        counter!(
            "flurry_tasks_total",
            "node" => self.node,
            "status" => self.status.as_str()
        )
        .increment(1);
    }
}

/// Event emitted when rows are loaded into a warehouse table.
pub struct RowsLoaded {
    pub table: &'static str,
    pub rows: u64,
}

impl InternalEvent for RowsLoaded {
    fn emit(self) {
        trace!(table = self.table, rows = self.rows, "Rows loaded");
        counter!("flurry_rows_loaded_total", "table" => self.table).increment(self.rows);
    }
}

/// Outcome of one quality check.
#[derive(Debug, Clone, Copy)]
pub enum CheckStatus {
    Passed,
    Empty,
    Missing,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Passed => "passed",
            CheckStatus::Empty => "empty",
            CheckStatus::Missing => "missing",
        }
    }
}

/// Event emitted per table by the quality gate.
pub struct QualityCheck {
    pub table: String,
    pub status: CheckStatus,
}

impl InternalEvent for QualityCheck {
    fn emit(self) {
        trace!(table = %self.table, status = self.status.as_str(), "Quality check");
        counter!(
            "flurry_quality_checks_total",
            "table" => self.table,
            "status" => self.status.as_str()
        )
        .increment(1);
    }
}

/// Event emitted once per run with its terminal status.
pub struct RunFinished {
    pub success: bool,
}

impl InternalEvent for RunFinished {
    fn emit(self) {
        let status = if self.success { "succeeded" } else { "failed" };
        trace!(status, "Run finished");
        counter!("flurry_runs_total", "status" => status).increment(1);
    }
}
