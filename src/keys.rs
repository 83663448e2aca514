//! Encryption key resolution.
//!
//! A logical key id from configuration becomes a region-specific key ARN.
//! Multi-region keys (`mrk-…`) share their id across regions, so the same
//! configured value resolves to the matching replica in each region.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use thiserror::Error;

/// Errors from key resolution and verification
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KeyError {
    /// The caller identity could not be determined
    #[error("unable to get caller identity: {0}")]
    Identity(String),

    /// The key could not be described
    #[error("failed to describe KMS key {key}: {message}")]
    Describe {
        /// Key that was looked up
        key: String,
        /// Service error text
        message: String,
    },

    /// The key exists but is administratively disabled
    #[error("KMS key {0} is disabled")]
    Disabled(String),
}

/// Resolves logical key identifiers to usable key references
#[async_trait]
pub trait KeyResolver: Send + Sync {
    /// Resolve `key_id` to a canonical key ARN in `region`.
    async fn resolve_key(&self, region: &str, key_id: &str) -> Result<String, KeyError>;

    /// Fail unless the key can currently be used for encryption.
    async fn verify_key_usable(&self, key_arn: &str) -> Result<(), KeyError>;
}

/// Canonical key ARN for `key_id` in `region` owned by `account`.
///
/// Fully-qualified ARNs are returned unchanged; multi-region short ids and
/// bare key ids are combined with account and region.
pub fn canonical_key_arn(region: &str, account: &str, key_id: &str) -> String {
    if key_id.starts_with("arn:aws:kms") {
        return key_id.to_string();
    }
    format!("arn:aws:kms:{}:{}:key/{}", region, account, key_id)
}

/// Key resolver with a fixed account and a configurable set of disabled keys
#[derive(Debug)]
pub struct StaticKeyResolver {
    account: String,
    disabled: Mutex<HashSet<String>>,
}

impl StaticKeyResolver {
    /// Resolve keys for `account`.
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            disabled: Mutex::new(HashSet::new()),
        }
    }

    /// Report `key_arn` as disabled.
    pub fn disable(&self, key_arn: &str) {
        self.disabled.lock().insert(key_arn.to_string());
    }
}

#[async_trait]
impl KeyResolver for StaticKeyResolver {
    async fn resolve_key(&self, region: &str, key_id: &str) -> Result<String, KeyError> {
        Ok(canonical_key_arn(region, &self.account, key_id))
    }

    async fn verify_key_usable(&self, key_arn: &str) -> Result<(), KeyError> {
        if self.disabled.lock().contains(key_arn) {
            return Err(KeyError::Disabled(key_arn.to_string()));
        }
        Ok(())
    }
}
