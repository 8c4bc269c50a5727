//! flurry: a star-schema ETL orchestrator.
//!
//! This library stages raw event and song logs from S3 into a columnar
//! warehouse, recomputes a star schema (one fact table, four dimensions),
//! and gates the run on data-quality checks. The core is an explicit task
//! graph with a shared task-execution contract; tasks issue SQL through a
//! narrow warehouse interface.
//!
//! # Example
//!
//! ```ignore
//! use flurry::{Config, run_pipeline};
//! use chrono::Utc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), flurry::error::PipelineError> {
//!     let config = Config::from_file("config.yaml")?;
//!     let report = run_pipeline(config, Utc::now().date_naive()).await?;
//!     println!("Run succeeded: {}", report.is_success());
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod graph;
pub mod metrics;
pub mod pipeline;
pub mod storage;
pub mod tasks;
pub mod warehouse;

// Re-export main types
pub use config::Config;
pub use graph::{NodeState, RunReport};
pub use pipeline::{build_graph, run_pipeline, run_with_warehouse};
