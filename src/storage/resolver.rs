//! Storage tier resolution
//!
//! Backends form an ordered list, most durable first. The first tier is
//! authoritative: commits succeed or fail with it alone, and whenever it is
//! reachable its opinion overrides any faster copy. Later tiers only
//! shortcut reads and may lag behind; propagation to them is best-effort
//! with a bounded per-tier timeout, and their failures are absorbed here,
//! never surfaced to the caller.

use crate::error::Result;
use crate::share::{FileId, ShareRecord};
use crate::storage::{ClaimOutcome, ShareBackend};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A record resolved across tiers
#[derive(Debug, Clone)]
pub struct Resolved {
    /// The resolved record
    pub record: ShareRecord,
    /// Whether the authoritative tier confirmed this copy
    ///
    /// False only when the primary was unreachable and a cached copy stood
    /// in; such a copy must not be trusted for quota or expiry decisions.
    pub authoritative: bool,
}

/// Resolves reads and writes across an ordered list of storage tiers
pub struct TierResolver {
    /// Tiers ordered by decreasing durability; index 0 is authoritative
    tiers: Vec<Arc<dyn ShareBackend>>,
    /// Per-secondary-tier timeout for propagation, backfill, and purge
    propagation_timeout: Duration,
}

impl TierResolver {
    /// Create a resolver over an ordered tier list
    pub fn new(tiers: Vec<Arc<dyn ShareBackend>>, propagation_timeout: Duration) -> Result<Self> {
        if tiers.is_empty() {
            return Err(crate::error::Error::InvalidConfig(
                "At least one storage tier is required".to_string(),
            ));
        }
        Ok(TierResolver {
            tiers,
            propagation_timeout,
        })
    }

    /// The authoritative tier
    pub fn primary(&self) -> &Arc<dyn ShareBackend> {
        &self.tiers[0]
    }

    /// Commit a record under a fresh file id
    ///
    /// Synchronous against the primary; the commit fails if the primary
    /// write fails. Creation is atomic there, so of any number of racing
    /// commits under one file id exactly one returns `true` and the rest
    /// see `false` with the first record intact. Secondaries are populated
    /// in the background and may lag behind subsequent reads.
    pub async fn commit(&self, record: &ShareRecord) -> Result<bool> {
        if !self.primary().write_new(record).await? {
            return Ok(false);
        }
        info!(file_id = %record.file_id, tier = self.primary().name(), "Record committed");

        self.propagate(record.clone());
        Ok(true)
    }

    /// Resolve a record across tiers
    ///
    /// Probes faster tiers first and falls through to the primary. A hit
    /// from a non-primary tier is provisional and is re-validated against
    /// the primary: the most durable backend with an opinion wins, so a
    /// stale cached copy of a deleted record resolves to `None`.
    pub async fn resolve(&self, file_id: FileId) -> Result<Option<Resolved>> {
        let mut primary_error = None;

        for (idx, tier) in self.tiers.iter().enumerate().rev() {
            match tier.read(file_id).await {
                Ok(Some(record)) => {
                    debug!(%file_id, tier = tier.name(), "Tier hit");
                    if idx == 0 {
                        self.backfill(&record);
                        return Ok(Some(Resolved {
                            record,
                            authoritative: true,
                        }));
                    }
                    return self.revalidate(file_id, record).await;
                }
                Ok(None) => continue,
                Err(e) if idx == 0 => primary_error = Some(e),
                Err(e) => {
                    warn!(%file_id, tier = tier.name(), error = %e, "Secondary tier read failed");
                }
            }
        }

        match primary_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    /// Atomic download claim against the authoritative tier
    ///
    /// On success the incremented record is pushed to faster tiers so their
    /// copies do not serve stale counters for a full TTL.
    pub async fn claim(&self, file_id: FileId, now: DateTime<Utc>) -> Result<ClaimOutcome> {
        let outcome = self.primary().claim(file_id, now).await?;

        if let ClaimOutcome::Claimed(record) = &outcome {
            self.propagate(record.clone());
        }

        Ok(outcome)
    }

    /// Delete a record everywhere
    ///
    /// The primary decides whether the record existed; secondary purges are
    /// best-effort.
    pub async fn delete(&self, file_id: FileId) -> Result<bool> {
        let existed = self.primary().delete(file_id).await?;
        self.purge_secondaries(file_id);
        Ok(existed)
    }

    /// Confirm a provisional hit against the primary
    async fn revalidate(&self, file_id: FileId, cached: ShareRecord) -> Result<Option<Resolved>> {
        match self.primary().read(file_id).await {
            Ok(Some(record)) => Ok(Some(Resolved {
                record,
                authoritative: true,
            })),
            Ok(None) => {
                // The durable tier says the record is gone; the cached copy
                // is stale and must not be served.
                debug!(%file_id, "Purging stale cached copy of deleted record");
                self.purge_secondaries(file_id);
                Ok(None)
            }
            Err(e) => {
                warn!(%file_id, error = %e, "Primary unreachable, serving provisional copy");
                Ok(Some(Resolved {
                    record: cached,
                    authoritative: false,
                }))
            }
        }
    }

    /// Push a record copy to every secondary tier, fire-and-forget
    fn propagate(&self, record: ShareRecord) {
        for tier in self.tiers.iter().skip(1) {
            let tier = Arc::clone(tier);
            let record = record.clone();
            let deadline = self.propagation_timeout;

            tokio::spawn(async move {
                match tokio::time::timeout(deadline, tier.write(&record)).await {
                    Ok(Ok(())) => {
                        debug!(file_id = %record.file_id, tier = tier.name(), "Propagated record");
                    }
                    Ok(Err(e)) => {
                        warn!(
                            file_id = %record.file_id,
                            tier = tier.name(),
                            error = %e,
                            "Secondary propagation failed"
                        );
                    }
                    Err(_) => {
                        warn!(
                            file_id = %record.file_id,
                            tier = tier.name(),
                            "Secondary propagation timed out"
                        );
                    }
                }
            });
        }
    }

    /// Refresh faster tiers after an authoritative hit
    fn backfill(&self, record: &ShareRecord) {
        if self.tiers.len() > 1 {
            // Each tier caps the copy at its own TTL on write
            self.propagate(record.clone());
        }
    }

    /// Remove copies from every secondary tier, fire-and-forget
    fn purge_secondaries(&self, file_id: FileId) {
        for tier in self.tiers.iter().skip(1) {
            let tier = Arc::clone(tier);
            let deadline = self.propagation_timeout;

            tokio::spawn(async move {
                match tokio::time::timeout(deadline, tier.delete(file_id)).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => {
                        warn!(%file_id, tier = tier.name(), error = %e, "Secondary purge failed");
                    }
                    Err(_) => {
                        warn!(%file_id, tier = tier.name(), "Secondary purge timed out");
                    }
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{CipherPayload, SealedPart};
    use crate::error::Error;
    use crate::share::{generate_access_token, generate_file_id};
    use crate::storage::{ClaimDenial, MemoryBackend, SledBackend};
    use async_trait::async_trait;

    fn test_record(max_downloads: u32) -> ShareRecord {
        ShareRecord::new(
            generate_file_id(),
            generate_access_token(),
            "archive.zip".to_string(),
            6,
            "application/zip".to_string(),
            CipherPayload::Inline(SealedPart {
                nonce: [0u8; 12],
                data: vec![1; 6],
            }),
            "hash".to_string(),
            7,
            max_downloads,
        )
    }

    fn sled_tier() -> Arc<SledBackend> {
        let db = sled::Config::new().temporary(true).open().unwrap();
        Arc::new(SledBackend::new(&db).unwrap())
    }

    fn memory_tier() -> Arc<MemoryBackend> {
        Arc::new(MemoryBackend::new(Duration::from_secs(60)))
    }

    fn resolver(
        primary: Arc<dyn ShareBackend>,
        cache: Arc<dyn ShareBackend>,
    ) -> TierResolver {
        TierResolver::new(vec![primary, cache], Duration::from_millis(500)).unwrap()
    }

    /// Tier that fails every operation, standing in for an unreachable store
    struct UnreachableBackend;

    #[async_trait]
    impl ShareBackend for UnreachableBackend {
        fn name(&self) -> &str {
            "unreachable"
        }

        async fn write(&self, _record: &ShareRecord) -> Result<()> {
            Err(Error::ServiceUnavailable("connection refused".to_string()))
        }

        async fn write_new(&self, _record: &ShareRecord) -> Result<bool> {
            Err(Error::ServiceUnavailable("connection refused".to_string()))
        }

        async fn read(&self, _file_id: FileId) -> Result<Option<ShareRecord>> {
            Err(Error::ServiceUnavailable("connection refused".to_string()))
        }

        async fn delete(&self, _file_id: FileId) -> Result<bool> {
            Err(Error::ServiceUnavailable("connection refused".to_string()))
        }

        async fn claim(&self, _file_id: FileId, _now: DateTime<Utc>) -> Result<ClaimOutcome> {
            Err(Error::ServiceUnavailable("connection refused".to_string()))
        }
    }

    async fn wait_until<F: Fn() -> bool>(cond: F) {
        for _ in 0..100 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_empty_tier_list_rejected() {
        assert!(TierResolver::new(Vec::new(), Duration::from_millis(100)).is_err());
    }

    #[tokio::test]
    async fn test_commit_populates_secondary_eventually() {
        let cache = memory_tier();
        let resolver = resolver(sled_tier(), cache.clone());

        let record = test_record(3);
        assert!(resolver.commit(&record).await.unwrap());

        let cache_probe = cache.clone();
        wait_until(move || !cache_probe.is_empty()).await;

        let resolved = resolver.resolve(record.file_id).await.unwrap().unwrap();
        assert!(resolved.authoritative);
        assert_eq!(resolved.record, record);
    }

    #[tokio::test]
    async fn test_commit_refuses_existing_file_id() {
        let resolver = resolver(sled_tier(), memory_tier());

        let record = test_record(3);
        assert!(resolver.commit(&record).await.unwrap());

        let mut second = test_record(3);
        second.file_id = record.file_id;
        assert!(!resolver.commit(&second).await.unwrap());

        let resolved = resolver.resolve(record.file_id).await.unwrap().unwrap();
        assert_eq!(resolved.record, record);
    }

    #[tokio::test]
    async fn test_commit_fails_when_primary_down() {
        let resolver = resolver(Arc::new(UnreachableBackend), memory_tier());
        let record = test_record(3);

        assert!(matches!(
            resolver.commit(&record).await,
            Err(Error::ServiceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_secondary_failure_absorbed_on_commit() {
        let primary = sled_tier();
        let resolver = resolver(primary.clone(), Arc::new(UnreachableBackend));

        let record = test_record(3);
        assert!(resolver.commit(&record).await.unwrap());
        assert!(primary.read(record.file_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stale_cache_copy_loses_to_primary_deletion() {
        let cache = memory_tier();
        let resolver = resolver(sled_tier(), cache.clone());

        // Cache holds a copy the durable tier never saw (simulates a record
        // deleted from the primary while the cached copy lingers)
        let record = test_record(3);
        cache.write(&record).await.unwrap();

        assert!(resolver.resolve(record.file_id).await.unwrap().is_none());

        // The stale copy gets purged as a side effect
        let cache_probe = cache.clone();
        wait_until(move || cache_probe.is_empty()).await;
    }

    #[tokio::test]
    async fn test_provisional_hit_when_primary_unreachable() {
        let cache = memory_tier();
        let record = test_record(3);
        cache.write(&record).await.unwrap();

        let resolver = resolver(Arc::new(UnreachableBackend), cache);

        let resolved = resolver.resolve(record.file_id).await.unwrap().unwrap();
        assert!(!resolved.authoritative);
        assert_eq!(resolved.record.file_id, record.file_id);
    }

    #[tokio::test]
    async fn test_total_miss_with_primary_down_is_unavailable() {
        let resolver = resolver(Arc::new(UnreachableBackend), memory_tier());
        assert!(matches!(
            resolver.resolve(generate_file_id()).await,
            Err(Error::ServiceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_backfill_after_primary_hit() {
        let primary = sled_tier();
        let cache = memory_tier();
        let resolver = resolver(primary.clone(), cache.clone());

        // Record exists only in the durable tier (as after a restart)
        let record = test_record(3);
        primary.write(&record).await.unwrap();

        let resolved = resolver.resolve(record.file_id).await.unwrap().unwrap();
        assert!(resolved.authoritative);

        let cache_probe = cache.clone();
        wait_until(move || !cache_probe.is_empty()).await;
    }

    #[tokio::test]
    async fn test_claim_refreshes_secondary_counter() {
        let cache = memory_tier();
        let resolver = resolver(sled_tier(), cache.clone());

        let record = test_record(5);
        let id = record.file_id;
        assert!(resolver.commit(&record).await.unwrap());

        match resolver.claim(id, Utc::now()).await.unwrap() {
            ClaimOutcome::Claimed(r) => assert_eq!(r.download_count, 1),
            ClaimOutcome::Denied(d) => panic!("unexpected denial {:?}", d),
        }

        let cache_probe = cache.clone();
        wait_until(move || {
            futures::executor::block_on(cache_probe.read(id))
                .ok()
                .flatten()
                .map(|r| r.download_count == 1)
                .unwrap_or(false)
        })
        .await;
    }

    #[tokio::test]
    async fn test_delete_reports_primary_opinion() {
        let resolver = resolver(sled_tier(), memory_tier());
        let record = test_record(3);

        assert!(resolver.commit(&record).await.unwrap());
        assert!(resolver.delete(record.file_id).await.unwrap());
        assert!(!resolver.delete(record.file_id).await.unwrap());
        assert!(resolver.resolve(record.file_id).await.unwrap().is_none());
    }
}
