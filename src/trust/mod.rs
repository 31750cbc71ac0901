// Certificate-trust gateway module
pub mod cache;
pub mod certs;
pub mod gateway;
pub mod ocsp;
pub mod sftp;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::AgentResult;
use cache::{CertKey, RevocationCache};
use certs::RsaKeyMaterial;
use ocsp::StatusFetcher;

pub use gateway::TrustGateway;

/// Connection-time authorization decision for the file-transfer gateway.
///
/// Holds the console certificate material this agent was enrolled with and
/// decides accept/reject for each offered key before any subsystem access.
pub struct Authorizer {
    console_key: RsaKeyMaterial,
    console_cert_der: Vec<u8>,
    ca_cert_der: Vec<u8>,
    cache_key: CertKey,
    cache: RevocationCache,
    fetcher: Arc<dyn StatusFetcher>,
}

impl Authorizer {
    pub fn new(
        console_cert_der: Vec<u8>,
        ca_cert_der: Vec<u8>,
        cache: RevocationCache,
        fetcher: Arc<dyn StatusFetcher>,
    ) -> AgentResult<Self> {
        let console_key = certs::rsa_key_of_certificate(&console_cert_der)?;
        let cache_key = certs::cert_cache_key(&console_cert_der)?;
        Ok(Self {
            console_key,
            console_cert_der,
            ca_cert_der,
            cache_key,
            cache,
            fetcher,
        })
    }

    /// Both gates must pass: key equality first, revocation second. A key
    /// mismatch rejects without touching the cache or the responder.
    pub async fn is_authorized(&self, offered_modulus: &[u8], offered_exponent: &[u8]) -> bool {
        if offered_modulus != self.console_key.modulus.as_slice()
            || offered_exponent != self.console_key.exponent.as_slice()
        {
            warn!("offered public key does not match the console certificate");
            return false;
        }

        match self.cache.get(&self.cache_key).await {
            Ok(Some(valid)) => {
                debug!("revocation cache hit: valid={}", valid);
                return valid;
            }
            Ok(None) => {}
            Err(e) => {
                // Treat a broken cache as a miss; the live check decides.
                warn!("revocation cache read failed: {}", e);
            }
        }

        let status = self
            .fetcher
            .fetch(&self.console_cert_der, &self.ca_cert_der)
            .await;
        let valid = status.is_trusted();

        if let Err(e) = self.cache.put(&self.cache_key, valid).await {
            warn!("revocation cache write failed: {}", e);
        }

        valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::AgentStore;
    use crate::trust::ocsp::OcspStatus;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFetcher {
        status: OcspStatus,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StatusFetcher for CountingFetcher {
        async fn fetch(&self, _cert: &[u8], _issuer: &[u8]) -> OcspStatus {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.status
        }
    }

    // Self-signed test certificate with an RSA key, generated once with
    // openssl; only the parseable structure matters here.
    const TEST_CERT_PEM: &str = include_str!("testdata/console-cert.pem");

    async fn authorizer(status: OcspStatus) -> (Authorizer, Arc<CountingFetcher>) {
        let store = AgentStore::open("sqlite::memory:").await.unwrap();
        let cache = RevocationCache::new(store);
        let fetcher = Arc::new(CountingFetcher {
            status,
            calls: AtomicUsize::new(0),
        });

        let (_, pem) = x509_parser::pem::parse_x509_pem(TEST_CERT_PEM.as_bytes()).unwrap();
        let cert_der = pem.contents.clone();

        let auth = Authorizer::new(cert_der.clone(), cert_der, cache, fetcher.clone()).unwrap();
        (auth, fetcher)
    }

    #[tokio::test]
    async fn key_mismatch_rejects_without_revocation_check() {
        let (auth, fetcher) = authorizer(OcspStatus::Good).await;

        assert!(!auth.is_authorized(&[0xde, 0xad], &[0x01, 0x00, 0x01]).await);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn good_status_authorizes_matching_key() {
        let (auth, fetcher) = authorizer(OcspStatus::Good).await;
        let key = auth.console_key.clone();

        assert!(auth.is_authorized(&key.modulus, &key.exponent).await);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_lookup_uses_cache() {
        let (auth, fetcher) = authorizer(OcspStatus::Good).await;
        let key = auth.console_key.clone();

        assert!(auth.is_authorized(&key.modulus, &key.exponent).await);
        assert!(auth.is_authorized(&key.modulus, &key.exponent).await);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_entry_triggers_exactly_one_recheck() {
        let (auth, fetcher) = authorizer(OcspStatus::Good).await;
        let key = auth.console_key.clone();

        // Simulate an entry written an hour ago by expiring it in place.
        auth.cache
            .put_with_ttl(&auth.cache_key, true, chrono::Duration::seconds(-60))
            .await
            .unwrap();

        assert!(auth.is_authorized(&key.modulus, &key.exponent).await);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        // The recheck refreshed the entry; no further live checks.
        assert!(auth.is_authorized(&key.modulus, &key.exponent).await);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_good_statuses_fail_closed() {
        for status in [
            OcspStatus::Revoked,
            OcspStatus::Unknown,
            OcspStatus::RequestFailed,
        ] {
            let (auth, _) = authorizer(status).await;
            let key = auth.console_key.clone();
            assert!(
                !auth.is_authorized(&key.modulus, &key.exponent).await,
                "{:?} must not authorize",
                status
            );
        }
    }
}
