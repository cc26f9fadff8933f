//! S3 bucket and artifact management

use anyhow::{Context as _, Result};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLifecycleConfiguration, BucketLocationConstraint, CreateBucketConfiguration,
    ExpirationStatus, LifecycleExpiration, LifecycleRule, LifecycleRuleFilter,
};
use aws_sdk_s3::Client;
use std::path::Path;
use tracing::{debug, info, warn};

use super::context::AwsContext;
use super::error::classify_anyhow_error;

/// S3 client for cluster artifacts.
#[derive(Clone)]
pub struct S3Client {
    client: Client,
    region: String,
}

impl S3Client {
    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.s3_client(),
            region: ctx.region().to_string(),
        }
    }

    /// Create the artifact bucket. An existing bucket owned by this account
    /// is fine.
    pub async fn create_bucket(&self, bucket: &str) -> Result<()> {
        info!(bucket = %bucket, region = %self.region, "creating S3 bucket");

        let mut req = self.client.create_bucket().bucket(bucket);
        // us-east-1 rejects an explicit location constraint.
        if self.region != "us-east-1" {
            req = req.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }
        match req.send().await {
            Ok(_) => Ok(()),
            Err(e) => {
                let err = anyhow::Error::from(aws_sdk_s3::Error::from(e));
                if classify_anyhow_error(&err).is_already_exists() {
                    info!(bucket = %bucket, "bucket already exists and is owned by us");
                    Ok(())
                } else {
                    Err(err.context("Failed to create bucket"))
                }
            }
        }
    }

    /// Expire objects after `days`.
    pub async fn put_lifecycle_expiration(&self, bucket: &str, days: i64) -> Result<()> {
        info!(bucket = %bucket, days, "applying lifecycle expiration");
        let rule = LifecycleRule::builder()
            .id("kite-artifact-expiration")
            .status(ExpirationStatus::Enabled)
            .filter(LifecycleRuleFilter::builder().prefix("").build())
            .expiration(LifecycleExpiration::builder().days(days as i32).build())
            .build()
            .context("Failed to build lifecycle rule")?;
        self.client
            .put_bucket_lifecycle_configuration()
            .bucket(bucket)
            .lifecycle_configuration(
                BucketLifecycleConfiguration::builder()
                    .rules(rule)
                    .build()
                    .context("Failed to build lifecycle configuration")?,
            )
            .send()
            .await
            .map_err(aws_sdk_s3::Error::from)
            .context("Failed to put lifecycle configuration")?;
        Ok(())
    }

    /// Upload a local file.
    pub async fn upload_file(&self, bucket: &str, key: &str, path: &Path) -> Result<()> {
        debug!(bucket = %bucket, key = %key, path = %path.display(), "uploading file");
        let body = ByteStream::from_path(path)
            .await
            .with_context(|| format!("Failed to read {:?}", path))?;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(aws_sdk_s3::Error::from)
            .context("Failed to upload file")?;
        Ok(())
    }

    /// Delete every object under `prefix`.
    pub async fn delete_objects(&self, bucket: &str, prefix: &str) -> Result<()> {
        info!(bucket = %bucket, prefix = %prefix, "deleting objects");
        let mut continuation_token = None;
        loop {
            let mut request = self.client.list_objects_v2().bucket(bucket).prefix(prefix);
            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }
            let response = request
                .send()
                .await
                .map_err(aws_sdk_s3::Error::from)
                .context("Failed to list objects")?;
            for object in response.contents() {
                if let Some(key) = object.key() {
                    debug!(key = %key, "deleting object");
                    self.client
                        .delete_object()
                        .bucket(bucket)
                        .key(key)
                        .send()
                        .await
                        .map_err(aws_sdk_s3::Error::from)
                        .context("Failed to delete object")?;
                }
            }
            if response.is_truncated() == Some(true) {
                continuation_token = response.next_continuation_token().map(|s| s.to_string());
            } else {
                break;
            }
        }
        Ok(())
    }

    /// Empty and delete the bucket. A missing bucket is a success on this
    /// path.
    pub async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        info!(bucket = %bucket, "deleting bucket and contents");
        if let Err(e) = self.delete_objects(bucket, "").await {
            if classify_anyhow_error(&e).is_not_found() {
                return Ok(());
            }
            return Err(e);
        }
        match self.client.delete_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(()),
            Err(e) => {
                let err = anyhow::Error::from(aws_sdk_s3::Error::from(e));
                if classify_anyhow_error(&err).is_not_found() {
                    warn!(bucket = %bucket, "bucket already gone");
                    Ok(())
                } else {
                    Err(err.context("Failed to delete bucket"))
                }
            }
        }
    }
}
