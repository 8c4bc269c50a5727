//! Error types for flurry using snafu.
//!
//! This module defines structured error types with context selectors for
//! all error conditions in the codebase.

use snafu::prelude::*;

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Warehouse connection URL is empty.
    #[snafu(display("Warehouse URL cannot be empty"))]
    EmptyWarehouseUrl,

    /// A source is missing its bucket name.
    #[snafu(display("Source '{source_name}' has an empty bucket"))]
    EmptyBucket { source_name: String },

    /// A source is missing its key template.
    #[snafu(display("Source '{source_name}' has an empty key template"))]
    EmptyKey { source_name: String },

    /// A source key template contains an invalid strftime code.
    #[snafu(display("Source '{source_name}' has an invalid key template '{template}'"))]
    BadKeyTemplate {
        source_name: String,
        template: String,
    },

    /// The quality gate was configured without any tables.
    #[snafu(display("Quality gate must check at least one table"))]
    EmptyQualityTables,

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file"))]
    ReadFile { source: std::io::Error },
}

// ============ Warehouse Errors ============

/// Errors raised by the warehouse connection layer.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum WarehouseError {
    /// Failed to establish the connection pool.
    #[snafu(display("Failed to connect to warehouse"))]
    Connect { source: sqlx::Error },

    /// The referenced table does not exist (Postgres 42P01).
    #[snafu(display("Table '{table}' does not exist"))]
    UndefinedTable { table: String },

    /// A SQL statement was rejected by the warehouse.
    #[snafu(display("SQL execution failed"))]
    Sql { source: sqlx::Error },

    /// The warehouse rejected an operation with a message.
    ///
    /// Used by the in-memory warehouse to script failures.
    #[snafu(display("{message}"))]
    Rejected { message: String },
}

impl WarehouseError {
    /// Check if this error means the referenced table is missing.
    pub fn is_undefined_table(&self) -> bool {
        matches!(self, WarehouseError::UndefinedTable { .. })
    }
}

// ============ Storage Errors ============

/// Errors that can occur while talking to object storage.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// S3 client configuration error.
    #[snafu(display("S3 configuration error"))]
    S3Config { source: object_store::Error },

    /// Listing the source prefix failed.
    #[snafu(display("Failed to list '{prefix}'"))]
    List {
        prefix: String,
        source: object_store::Error,
    },
}

// ============ Task Errors ============

/// Staging failures: the source data never made it into the warehouse.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TransferError {
    /// The resolved source prefix contains no objects.
    #[snafu(display("Source '{uri}' does not exist or is empty"))]
    MissingSource { uri: String },

    /// The pre-flight source check itself failed.
    #[snafu(display("Source check failed for '{uri}'"))]
    SourceCheck { uri: String, source: StorageError },

    /// Clearing the staging table failed.
    #[snafu(display("Failed to clear staging table '{table}'"))]
    ClearStaging {
        table: String,
        source: WarehouseError,
    },

    /// The warehouse rejected the bulk copy.
    #[snafu(display("Copy into '{table}' was rejected"))]
    CopyRejected {
        table: String,
        source: WarehouseError,
    },
}

/// Load failures: a catalog query failed to execute during fact or
/// dimension loading. An empty query result is not an error.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TransformError {
    /// Clearing the target table failed (REPLACE mode).
    #[snafu(display("Failed to clear table '{table}'"))]
    ClearTable {
        table: String,
        source: WarehouseError,
    },

    /// The insert-select statement failed.
    #[snafu(display("Failed to load table '{table}'"))]
    Insert {
        table: String,
        source: WarehouseError,
    },

    /// DDL execution failed.
    #[snafu(display("Failed to create tables"))]
    CreateTables { source: WarehouseError },
}

/// Post-load invariant violations raised by the quality gate.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum QualityError {
    /// The table does not exist in the warehouse.
    #[snafu(display("Quality check failed for '{table}': table is missing"))]
    Missing { table: String },

    /// The table exists but contains no rows.
    #[snafu(display("Quality check failed for '{table}': table is empty"))]
    Empty { table: String },

    /// The row-count query itself failed.
    #[snafu(display("Quality check could not count '{table}'"))]
    CountQuery {
        table: String,
        source: WarehouseError,
    },
}

/// Unified task error, one variant per failure taxonomy.
///
/// `DependencyError` (an upstream did not succeed) is synthesized by the
/// graph executor and never raised by task code, so it has no variant here.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TaskError {
    /// Staging/copy failure.
    #[snafu(display("Transfer failed"))]
    Transfer { source: TransferError },

    /// SQL execution failure during load.
    #[snafu(display("Transform failed"))]
    Transform { source: TransformError },

    /// Post-load invariant violation.
    #[snafu(display("Quality gate failed"))]
    Quality { source: QualityError },
}

// ============ Graph Errors ============

/// Errors detected while constructing the pipeline graph.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum GraphError {
    /// Two nodes share the same identifier.
    #[snafu(display("Duplicate node '{name}'"))]
    DuplicateNode { name: String },

    /// An edge references a node that was never added.
    #[snafu(display("Unknown node '{name}' in edge"))]
    UnknownNode { name: String },

    /// A node depends on itself.
    #[snafu(display("Self-edge on node '{name}'"))]
    SelfEdge { name: String },

    /// The graph contains a cycle.
    #[snafu(display("Graph contains a cycle through: {nodes}"))]
    Cycle { nodes: String },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },
}

// ============ Pipeline Error (top-level) ============

/// Top-level pipeline errors that aggregate all error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Configuration error.
    #[snafu(display("Configuration error"))]
    Config { source: ConfigError },

    /// Warehouse connection error.
    #[snafu(display("Warehouse error"))]
    Warehouse { source: WarehouseError },

    /// The fixed topology failed to build. Indicates a bug, not bad input.
    #[snafu(display("Graph construction failed"))]
    Graph { source: GraphError },

    /// The run finished with at least one failed node.
    #[snafu(display("Run failed at node '{node}': {message}"))]
    RunFailed { node: String, message: String },

    /// Address parsing error.
    #[snafu(display("Failed to parse address"))]
    AddressParse { source: std::net::AddrParseError },

    /// Metrics error.
    #[snafu(display("Metrics error"))]
    Metrics { source: MetricsError },
}
