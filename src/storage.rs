//! Object storage collaborator.
//!
//! Two concerns live here: resolving a source key template against the
//! run's logical date, and the optional pre-flight check that the resolved
//! prefix actually contains objects before a COPY is issued.

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::StreamExt;
use object_store::ObjectStore;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use snafu::prelude::*;
use std::sync::Arc;
use tracing::debug;

use crate::config::AwsConfig;
use crate::error::{ListSnafu, S3ConfigSnafu, StorageError};

/// A reference-counted object storage handle.
pub type ObjectStorageRef = Arc<dyn ObjectStorage>;

/// Read-only view of the object store: enough to verify a source exists.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Check whether at least one object exists under `prefix` in `bucket`.
    async fn prefix_exists(&self, bucket: &str, prefix: &str) -> Result<bool, StorageError>;
}

/// Source location in object storage: a bucket plus a key template.
///
/// The template supports chrono strftime codes (`%Y`, `%m`, `%d`) which are
/// substituted with the run's logical date. A template without codes
/// resolves to itself, matching unpartitioned sources.
#[derive(Debug, Clone)]
pub struct SourceLocation {
    pub bucket: String,
    pub key_template: String,
}

impl SourceLocation {
    pub fn new(bucket: impl Into<String>, key_template: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key_template: key_template.into(),
        }
    }

    /// Resolve the key template against a logical date.
    pub fn resolve_key(&self, logical_date: NaiveDate) -> String {
        logical_date.format(&self.key_template).to_string()
    }

    /// Fully resolved `s3://bucket/key` URI for this run.
    pub fn resolve_uri(&self, logical_date: NaiveDate) -> String {
        format!("s3://{}/{}", self.bucket, self.resolve_key(logical_date))
    }
}

/// S3-backed [`ObjectStorage`] built from the pipeline's AWS credentials.
pub struct S3Storage {
    credentials: AwsConfig,
}

impl S3Storage {
    pub fn new(credentials: AwsConfig) -> Self {
        Self { credentials }
    }

    fn client(&self, bucket: &str) -> Result<object_store::aws::AmazonS3, StorageError> {
        AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .with_region(&self.credentials.region)
            .with_access_key_id(&self.credentials.access_key_id)
            .with_secret_access_key(&self.credentials.secret_access_key)
            .build()
            .context(S3ConfigSnafu)
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn prefix_exists(&self, bucket: &str, prefix: &str) -> Result<bool, StorageError> {
        let store = self.client(bucket)?;
        let path = Path::from(prefix);

        debug!("Listing s3://{}/{}", bucket, prefix);
        let mut listing = store.list(Some(&path));
        match listing.next().await {
            Some(Ok(_)) => Ok(true),
            Some(Err(object_store::Error::NotFound { .. })) | None => Ok(false),
            Some(Err(source)) => Err(source).context(ListSnafu {
                prefix: format!("s3://{bucket}/{prefix}"),
            }),
        }
    }
}
