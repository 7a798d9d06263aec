//! Credential resolution
//!
//! API keys are bearer tokens. Only the SHA-256 hash of a key is ever
//! stored or compared; the raw key exists in memory for the duration of one
//! request.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tollgate_shared::{AccountId, StoreResult};

/// Resolved credential for one request
#[derive(Debug, Clone)]
pub struct Credential {
    pub account_id: AccountId,
    /// Stable identity for per-credential rate limiting
    pub key_id: String,
}

/// Maps a hashed API key to an account
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, key_hash: &str) -> StoreResult<Option<Credential>>;
}

/// Hex-encoded SHA-256 of a raw API key
pub fn hash_api_key(raw_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Extract the bearer token from an Authorization header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// In-memory resolver (for development and tests, without the account
/// provisioning service)
#[derive(Default)]
pub struct MemoryCredentialResolver {
    by_hash: RwLock<HashMap<String, Credential>>,
}

impl MemoryCredentialResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a raw key for an account; returns the key id used for rate
    /// limiting
    pub async fn register_key(&self, raw_key: &str, account_id: AccountId) -> String {
        let hash = hash_api_key(raw_key);
        // First 12 hex chars are enough to identify the key internally
        let key_id = hash[..12].to_string();
        self.by_hash.write().await.insert(
            hash,
            Credential {
                account_id,
                key_id: key_id.clone(),
            },
        );
        key_id
    }
}

#[async_trait]
impl CredentialResolver for MemoryCredentialResolver {
    async fn resolve(&self, key_hash: &str) -> StoreResult<Option<Credential>> {
        Ok(self.by_hash.read().await.get(key_hash).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer tg_live_abc123"),
        );
        assert_eq!(bearer_token(&headers), Some("tg_live_abc123"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Basic dXNlcjpwYXNz"),
        );
        assert_eq!(bearer_token(&headers), None);
    }

    #[tokio::test]
    async fn test_resolver_matches_on_hash_only() {
        let resolver = MemoryCredentialResolver::new();
        let account_id = AccountId::new();
        resolver.register_key("tg_live_abc123", account_id).await;

        let hit = resolver
            .resolve(&hash_api_key("tg_live_abc123"))
            .await
            .unwrap();
        assert_eq!(hit.unwrap().account_id, account_id);

        // Raw key is not a valid lookup key
        assert!(resolver.resolve("tg_live_abc123").await.unwrap().is_none());
    }
}
