// KMS key resolver: STS caller identity plus per-region KMS clients

use crate::keys::{canonical_key_arn, KeyError, KeyResolver};
use async_trait::async_trait;
use aws_sdk_kms::error::DisplayErrorContext;
use std::collections::HashMap;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

/// Resolves key ids against the caller's account and checks key state in KMS
pub struct KmsKeyResolver {
    sts: aws_sdk_sts::Client,
    kms: HashMap<String, aws_sdk_kms::Client>,
    account: OnceCell<String>,
}

impl KmsKeyResolver {
    /// `kms` maps each region to a client configured for it.
    pub fn new(sts: aws_sdk_sts::Client, kms: HashMap<String, aws_sdk_kms::Client>) -> Self {
        Self {
            sts,
            kms,
            account: OnceCell::new(),
        }
    }

    async fn account(&self) -> Result<&str, KeyError> {
        let account = self
            .account
            .get_or_try_init(|| async {
                let identity = self
                    .sts
                    .get_caller_identity()
                    .send()
                    .await
                    .map_err(|e| KeyError::Identity(DisplayErrorContext(&e).to_string()))?;
                identity
                    .account()
                    .map(str::to_string)
                    .ok_or_else(|| KeyError::Identity("caller identity has no account".to_string()))
            })
            .await?;
        Ok(account.as_str())
    }

    fn client_for(&self, key_arn: &str) -> Result<&aws_sdk_kms::Client, KeyError> {
        let region = key_arn.split(':').nth(3).unwrap_or_default();
        self.kms.get(region).ok_or_else(|| KeyError::Describe {
            key: key_arn.to_string(),
            message: format!("no KMS client configured for region '{}'", region),
        })
    }
}

#[async_trait]
impl KeyResolver for KmsKeyResolver {
    async fn resolve_key(&self, region: &str, key_id: &str) -> Result<String, KeyError> {
        if key_id.starts_with("arn:aws:kms") {
            return Ok(key_id.to_string());
        }
        let account = self.account().await?;
        let arn = canonical_key_arn(region, account, key_id);
        debug!("Resolved key {} to {}", key_id, arn);
        Ok(arn)
    }

    #[instrument(skip(self))]
    async fn verify_key_usable(&self, key_arn: &str) -> Result<(), KeyError> {
        let output = self
            .client_for(key_arn)?
            .describe_key()
            .key_id(key_arn)
            .send()
            .await
            .map_err(|e| KeyError::Describe {
                key: key_arn.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        match output.key_metadata() {
            Some(metadata) if metadata.enabled() => Ok(()),
            Some(_) => Err(KeyError::Disabled(key_arn.to_string())),
            None => Err(KeyError::Describe {
                key: key_arn.to_string(),
                message: "no key metadata returned".to_string(),
            }),
        }
    }
}
