//! Revocation cache.
//!
//! Maps (certificate serial, certificate fingerprint) to a cached trust
//! outcome with a one-hour TTL. Keying by fingerprint as well as serial
//! means a renewed certificate never matches the old entry, so a stale
//! "valid" verdict cannot outlive the certificate it was computed for.
//!
//! The check-then-write sequence around a miss is deliberately not atomic:
//! two concurrent first lookups for the same certificate may both issue a
//! live status request. The request is idempotent and both writers converge
//! on the same value, so no locking is taken.

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use sqlx::Row;

use crate::error::AgentResult;
use crate::store::AgentStore;

pub const CACHE_TTL_SECS: i64 = 3600;

#[derive(Clone)]
pub struct RevocationCache {
    store: AgentStore,
}

/// Cache key for one concrete certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertKey {
    pub serial: String,
    pub fingerprint: String,
}

impl CertKey {
    pub fn new(serial: &[u8], cert_der: &[u8]) -> Self {
        Self {
            serial: hex::encode(serial),
            fingerprint: hex::encode(Sha256::digest(cert_der)),
        }
    }
}

impl RevocationCache {
    pub fn new(store: AgentStore) -> Self {
        Self { store }
    }

    /// Cached verdict, or `None` on miss or expiry.
    pub async fn get(&self, key: &CertKey) -> AgentResult<Option<bool>> {
        let row = sqlx::query(
            "SELECT valid, expires_at FROM revocation_cache WHERE serial = ? AND fingerprint = ?",
        )
        .bind(&key.serial)
        .bind(&key.fingerprint)
        .fetch_optional(self.store.pool())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let expires_at = DateTime::parse_from_rfc3339(&row.get::<String, _>("expires_at"))
            .map_err(|e| crate::error::AgentError::Generic(e.into()))?
            .with_timezone(&Utc);

        if Utc::now() >= expires_at {
            return Ok(None);
        }

        Ok(Some(row.get::<i64, _>("valid") != 0))
    }

    /// Store a verdict, overwriting any previous entry for the key.
    pub async fn put(&self, key: &CertKey, valid: bool) -> AgentResult<()> {
        self.put_with_ttl(key, valid, Duration::seconds(CACHE_TTL_SECS))
            .await
    }

    pub(crate) async fn put_with_ttl(
        &self,
        key: &CertKey,
        valid: bool,
        ttl: Duration,
    ) -> AgentResult<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO revocation_cache (serial, fingerprint, valid, expires_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&key.serial)
        .bind(&key.fingerprint)
        .bind(valid as i64)
        .bind((Utc::now() + ttl).to_rfc3339())
        .execute(self.store.pool())
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn cache() -> RevocationCache {
        let store = AgentStore::open("sqlite::memory:").await.unwrap();
        RevocationCache::new(store)
    }

    fn key() -> CertKey {
        CertKey::new(&[0x01, 0x4f, 0xd2], b"fake-cert-der")
    }

    #[tokio::test]
    async fn miss_on_unseen_serial() {
        let cache = cache().await;
        assert_eq!(cache.get(&key()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn fresh_entry_is_consulted() {
        let cache = cache().await;
        cache.put(&key(), true).await.unwrap();
        assert_eq!(cache.get(&key()).await.unwrap(), Some(true));
    }

    #[tokio::test]
    async fn entry_near_end_of_ttl_still_hits() {
        let cache = cache().await;
        // One minute of TTL left, as if inserted 59 minutes ago.
        cache
            .put_with_ttl(&key(), true, Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(cache.get(&key()).await.unwrap(), Some(true));
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss() {
        let cache = cache().await;
        cache
            .put_with_ttl(&key(), true, Duration::seconds(-1))
            .await
            .unwrap();
        assert_eq!(cache.get(&key()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn overwrite_replaces_verdict() {
        let cache = cache().await;
        cache.put(&key(), true).await.unwrap();
        cache.put(&key(), false).await.unwrap();
        assert_eq!(cache.get(&key()).await.unwrap(), Some(false));
    }

    #[tokio::test]
    async fn renewed_certificate_misses_old_entry() {
        let cache = cache().await;
        cache.put(&key(), true).await.unwrap();

        // Same serial, different certificate content.
        let renewed = CertKey::new(&[0x01, 0x4f, 0xd2], b"renewed-cert-der");
        assert_eq!(cache.get(&renewed).await.unwrap(), None);
    }
}
