//! Credential stores used to authenticate against quote sources
//!
//! A source's `credential_ref` is an opaque key; the store decides how it
//! maps to a secret.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_credential(&self, reference: &str) -> Result<String>;
}

/// Resolves references from environment variables.
///
/// `binance_key` resolves to `PRICEFEED_CRED_BINANCE_KEY`.
#[derive(Debug, Clone)]
pub struct EnvCredentialStore {
    prefix: String,
}

impl EnvCredentialStore {
    pub fn new() -> Self {
        Self::with_prefix("PRICEFEED_CRED_")
    }

    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    pub fn variable_name(&self, reference: &str) -> String {
        let key: String = reference
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("{}{}", self.prefix, key)
    }
}

impl Default for EnvCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for EnvCredentialStore {
    async fn get_credential(&self, reference: &str) -> Result<String> {
        let var = self.variable_name(reference);
        let value = std::env::var(&var)
            .with_context(|| format!("credential {} not set ({})", reference, var))?;
        if value.trim().is_empty() {
            anyhow::bail!("credential {} is empty ({})", reference, var);
        }
        Ok(value)
    }
}

/// In-memory store, for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    secrets: RwLock<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, reference: &str, secret: &str) {
        if let Ok(mut secrets) = self.secrets.write() {
            secrets.insert(reference.to_string(), secret.to_string());
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get_credential(&self, reference: &str) -> Result<String> {
        let secrets = self
            .secrets
            .read()
            .map_err(|_| anyhow::anyhow!("credential store poisoned"))?;
        secrets
            .get(reference)
            .cloned()
            .with_context(|| format!("unknown credential {}", reference))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_variable_name() {
        let store = EnvCredentialStore::new();
        assert_eq!(store.variable_name("binance_key"), "PRICEFEED_CRED_BINANCE_KEY");
        assert_eq!(store.variable_name("bybit.api-key"), "PRICEFEED_CRED_BYBIT_API_KEY");
    }

    #[tokio::test]
    async fn test_env_store_resolves() {
        let store = EnvCredentialStore::with_prefix("PRICEFEED_TEST_SECRETS_");
        std::env::set_var("PRICEFEED_TEST_SECRETS_HUOBI", "s3cret");
        assert_eq!(store.get_credential("huobi").await.unwrap(), "s3cret");
        assert!(store.get_credential("missing_ref").await.is_err());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryCredentialStore::new();
        store.insert("binance", "abc");
        assert_eq!(tokio_test::block_on(store.get_credential("binance")).unwrap(), "abc");

        let err = tokio_test::block_on(store.get_credential("coinbase")).unwrap_err();
        assert!(err.to_string().contains("coinbase"));
    }
}
