//! Lifecycle policy
//!
//! A share moves `active → expired`, `active → exhausted`, or
//! `active → deleted`; all three are terminal for downloads. Status
//! classification is pure; the download claim delegates to the
//! authoritative tier's atomic check-and-increment so quota holds across
//! engine instances that share nothing but the store.

mod sweep;

pub use sweep::{MaintenanceSweeper, SweepReport};

use crate::error::{Error, Result};
use crate::share::{FileId, ShareRecord, ShareStatus};
use crate::storage::{ClaimDenial, ClaimOutcome, TierResolver};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

/// Pure status classification, used by metadata queries
pub fn validate(record: &ShareRecord, now: DateTime<Utc>) -> ShareStatus {
    record.status(now)
}

/// Evaluates expiry/quota state and performs download claims
pub struct LifecycleEngine {
    resolver: Arc<TierResolver>,
}

impl LifecycleEngine {
    /// Create an engine over a tier resolver
    pub fn new(resolver: Arc<TierResolver>) -> Self {
        LifecycleEngine { resolver }
    }

    /// Atomically claim one download
    ///
    /// Token verification happens against an authoritative copy; the
    /// increment itself runs inside the primary backend, so N concurrent
    /// claims against one remaining download admit exactly one caller.
    ///
    /// An expired record is lazily evicted here on first access.
    pub async fn claim_download(&self, file_id: FileId, token: &str) -> Result<ShareRecord> {
        let resolved = self
            .resolver
            .resolve(file_id)
            .await?
            .ok_or(Error::NotFound)?;

        if !resolved.record.token_matches(token) {
            return Err(Error::TokenMismatch);
        }

        if !resolved.authoritative {
            // Quota and expiry decisions need the durable tier's opinion
            return Err(Error::ServiceUnavailable(
                "Authoritative tier unreachable for download claim".to_string(),
            ));
        }

        match self.resolver.claim(file_id, Utc::now()).await? {
            ClaimOutcome::Claimed(record) => Ok(record),
            ClaimOutcome::Denied(ClaimDenial::NotFound) => Err(Error::NotFound),
            ClaimOutcome::Denied(ClaimDenial::Exhausted) => Err(Error::QuotaExceeded),
            ClaimOutcome::Denied(ClaimDenial::Expired) => {
                self.evict_expired(file_id).await;
                Err(Error::Expired)
            }
        }
    }

    /// Lazy eviction of an expired record on first access
    async fn evict_expired(&self, file_id: FileId) {
        info!(%file_id, "Evicting expired share on access");
        // Eviction is a courtesy; the expiry guard already denies reads
        if let Err(e) = self.resolver.delete(file_id).await {
            tracing::warn!(%file_id, error = %e, "Lazy eviction failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{CipherPayload, SealedPart};
    use crate::share::{generate_access_token, generate_file_id};
    use crate::storage::{MemoryBackend, ShareBackend, SledBackend};
    use std::time::Duration as StdDuration;

    fn test_record(max_downloads: u32) -> ShareRecord {
        ShareRecord::new(
            generate_file_id(),
            generate_access_token(),
            "data.bin".to_string(),
            8,
            "application/octet-stream".to_string(),
            CipherPayload::Inline(SealedPart {
                nonce: [0u8; 12],
                data: vec![3; 8],
            }),
            "hash".to_string(),
            7,
            max_downloads,
        )
    }

    fn engine() -> (LifecycleEngine, Arc<TierResolver>) {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let primary: Arc<dyn ShareBackend> = Arc::new(SledBackend::new(&db).unwrap());
        let cache: Arc<dyn ShareBackend> =
            Arc::new(MemoryBackend::new(StdDuration::from_secs(60)));
        let resolver = Arc::new(
            TierResolver::new(vec![primary, cache], StdDuration::from_millis(500)).unwrap(),
        );
        (LifecycleEngine::new(resolver.clone()), resolver)
    }

    #[test]
    fn test_validate_is_pure_classification() {
        let mut record = test_record(1);
        let now = Utc::now();

        assert_eq!(validate(&record, now), ShareStatus::Active);

        record.download_count = 1;
        assert_eq!(validate(&record, now), ShareStatus::Exhausted);

        record.expires_at = now - chrono::Duration::seconds(1);
        assert_eq!(validate(&record, now), ShareStatus::Expired);

        // No state was mutated by classification
        assert_eq!(record.download_count, 1);
    }

    #[tokio::test]
    async fn test_claim_success_increments() {
        let (engine, resolver) = engine();
        let record = test_record(2);
        assert!(resolver.commit(&record).await.unwrap());

        let claimed = engine
            .claim_download(record.file_id, &record.access_token)
            .await
            .unwrap();
        assert_eq!(claimed.download_count, 1);
    }

    #[tokio::test]
    async fn test_claim_unknown_share() {
        let (engine, _) = engine();
        assert!(matches!(
            engine.claim_download(generate_file_id(), "token").await,
            Err(Error::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_claim_wrong_token() {
        let (engine, resolver) = engine();
        let record = test_record(2);
        assert!(resolver.commit(&record).await.unwrap());

        assert!(matches!(
            engine.claim_download(record.file_id, "wrong-token").await,
            Err(Error::TokenMismatch)
        ));

        // A refused token never consumes quota
        let claimed = engine
            .claim_download(record.file_id, &record.access_token)
            .await
            .unwrap();
        assert_eq!(claimed.download_count, 1);
    }

    #[tokio::test]
    async fn test_claim_past_quota_denied() {
        let (engine, resolver) = engine();
        let record = test_record(1);
        assert!(resolver.commit(&record).await.unwrap());

        engine
            .claim_download(record.file_id, &record.access_token)
            .await
            .unwrap();

        assert!(matches!(
            engine
                .claim_download(record.file_id, &record.access_token)
                .await,
            Err(Error::QuotaExceeded)
        ));
    }

    #[tokio::test]
    async fn test_expired_share_denied_and_evicted() {
        let (engine, resolver) = engine();
        let mut record = test_record(5);
        record.expires_at = Utc::now() - chrono::Duration::seconds(1);
        assert!(resolver.commit(&record).await.unwrap());

        assert!(matches!(
            engine
                .claim_download(record.file_id, &record.access_token)
                .await,
            Err(Error::Expired)
        ));

        // Lazily evicted on first access
        for _ in 0..100 {
            if resolver.resolve(record.file_id).await.unwrap().is_none() {
                return;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        panic!("expired record was not evicted");
    }
}
