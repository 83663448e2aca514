//! AWS-backed adapters for the client seams.
//!
//! One SDK configuration is loaded per region. Credentials come from the
//! default provider chain; an endpoint override can point every client at
//! a local stack.

use crate::backup::RegionClients;
use crate::config::BackupConfig;
use aws_config::{BehaviorVersion, SdkConfig};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

mod kms;
mod rds;
mod s3;
mod ses;

pub use kms::KmsKeyResolver;
pub use rds::RdsClient;
pub use s3::verify_bucket;
pub use ses::SesNotifier;

/// Load the shared SDK configuration for `region`.
pub async fn sdk_config(region: &str, endpoint_url: Option<&str>) -> SdkConfig {
    let mut builder = aws_config::defaults(BehaviorVersion::latest())
        .region(aws_config::Region::new(region.to_string()));

    if let Some(endpoint) = endpoint_url {
        builder = builder.endpoint_url(endpoint);
    }

    builder.load().await
}

/// Every AWS adapter the replicator needs
pub struct AwsAdapters {
    /// RDS clients in the source region
    pub source: RegionClients,
    /// RDS clients in the target region
    pub target: RegionClients,
    /// Per-region KMS key lookup
    pub keys: Arc<KmsKeyResolver>,
    /// SES e-mail notifier in the source region
    pub notifier: Arc<SesNotifier>,
    source_config: SdkConfig,
    target_config: SdkConfig,
}

impl AwsAdapters {
    /// Build source and target clients from configuration.
    pub async fn connect(config: &BackupConfig) -> crate::Result<Self> {
        let endpoint = config.endpoint_url.as_deref();
        let source_config = sdk_config(&config.source_region, endpoint).await;
        let target_config = sdk_config(&config.target_region, endpoint).await;
        info!(
            "Loaded AWS configuration for {} and {}",
            config.source_region, config.target_region
        );

        let source_rds = Arc::new(RdsClient::new(&source_config, &config.source_region));
        let target_rds = Arc::new(RdsClient::new(&target_config, &config.target_region));

        let mut kms_clients = HashMap::new();
        kms_clients.insert(
            config.source_region.clone(),
            aws_sdk_kms::Client::new(&source_config),
        );
        kms_clients.insert(
            config.target_region.clone(),
            aws_sdk_kms::Client::new(&target_config),
        );
        let keys = Arc::new(KmsKeyResolver::new(
            aws_sdk_sts::Client::new(&source_config),
            kms_clients,
        ));

        let notifier = Arc::new(SesNotifier::new(
            aws_sdk_sesv2::Client::new(&source_config),
            config.sender(),
            &config.admin_email,
        )?);

        Ok(Self {
            source: RegionClients::new(source_rds.clone(), source_rds, &config.source_bucket),
            target: RegionClients::new(target_rds.clone(), target_rds, &config.target_bucket),
            keys,
            notifier,
            source_config,
            target_config,
        })
    }

    /// Make sure both export buckets are reachable before the first run.
    pub async fn verify_buckets(&self) -> Result<(), crate::clients::StoreError> {
        verify_bucket(&aws_sdk_s3::Client::new(&self.source_config), &self.source.bucket).await?;
        verify_bucket(&aws_sdk_s3::Client::new(&self.target_config), &self.target.bucket).await?;
        Ok(())
    }
}
