// S3 bucket preflight

use crate::clients::StoreError;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::Client;
use tracing::{debug, instrument};

/// Fail unless `bucket` exists and the caller can reach it.
///
/// Export tasks only report a missing bucket after they have been queued,
/// which can be hours into a run.
#[instrument(skip(client))]
pub async fn verify_bucket(client: &Client, bucket: &str) -> Result<(), StoreError> {
    match client.head_bucket().bucket(bucket).send().await {
        Ok(_) => {
            debug!("Bucket {} is reachable", bucket);
            Ok(())
        }
        Err(e) => {
            if e.as_service_error().map(|s| s.is_not_found()).unwrap_or(false) {
                Err(StoreError::NotFound {
                    kind: "bucket",
                    id: bucket.to_string(),
                })
            } else {
                Err(StoreError::service("HeadBucket", DisplayErrorContext(&e).to_string()))
            }
        }
    }
}
