//! Durable sled-backed tier
//!
//! The authoritative tier. Records live in one sled tree keyed by file id;
//! the download claim uses sled's compare-and-swap so concurrent claims
//! from any number of engine instances sharing the tree serialize at the
//! storage layer.

use crate::error::Result;
use crate::share::{FileId, ShareRecord};
use crate::storage::{check_claimable, ClaimDenial, ClaimOutcome, ShareBackend};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

const TREE_NAME: &str = "shares";

/// Durable share store on sled
pub struct SledBackend {
    tree: sled::Tree,
}

impl SledBackend {
    /// Open the share tree inside an existing sled database
    pub fn new(db: &sled::Db) -> Result<Self> {
        let tree = db.open_tree(TREE_NAME)?;
        Ok(SledBackend { tree })
    }

    fn key(file_id: FileId) -> [u8; 16] {
        *file_id.as_bytes()
    }
}

#[async_trait]
impl ShareBackend for SledBackend {
    fn name(&self) -> &str {
        "sled"
    }

    async fn write(&self, record: &ShareRecord) -> Result<()> {
        let bytes = record.to_bytes()?;
        self.tree.insert(Self::key(record.file_id), bytes)?;
        self.tree.flush_async().await?;
        debug!(file_id = %record.file_id, "Committed record to durable tier");
        Ok(())
    }

    /// Create via compare-and-swap against an absent key
    ///
    /// A racing creator loses the swap and gets `false`; the first committed
    /// record stays untouched.
    async fn write_new(&self, record: &ShareRecord) -> Result<bool> {
        let bytes = record.to_bytes()?;
        match self
            .tree
            .compare_and_swap(Self::key(record.file_id), None::<&[u8]>, Some(bytes))?
        {
            Ok(()) => {
                self.tree.flush_async().await?;
                debug!(file_id = %record.file_id, "Created record on durable tier");
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    async fn read(&self, file_id: FileId) -> Result<Option<ShareRecord>> {
        match self.tree.get(Self::key(file_id))? {
            Some(bytes) => Ok(Some(ShareRecord::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, file_id: FileId) -> Result<bool> {
        let existed = self.tree.remove(Self::key(file_id))?.is_some();
        if existed {
            self.tree.flush_async().await?;
        }
        Ok(existed)
    }

    /// Compare-and-swap loop over the serialized record
    ///
    /// A lost race re-reads and re-checks the guards, so the counter can
    /// never pass `max_downloads` no matter how many claimants contend.
    async fn claim(&self, file_id: FileId, now: DateTime<Utc>) -> Result<ClaimOutcome> {
        let key = Self::key(file_id);

        loop {
            let current_bytes = match self.tree.get(key)? {
                Some(bytes) => bytes,
                None => return Ok(ClaimOutcome::Denied(ClaimDenial::NotFound)),
            };

            let record = ShareRecord::from_bytes(&current_bytes)?;
            if let Some(denial) = check_claimable(&record, now) {
                return Ok(ClaimOutcome::Denied(denial));
            }

            let mut updated = record;
            updated.download_count += 1;
            let updated_bytes = updated.to_bytes()?;

            match self.tree.compare_and_swap(
                key,
                Some(&current_bytes),
                Some(updated_bytes),
            )? {
                Ok(()) => {
                    self.tree.flush_async().await?;
                    debug!(
                        %file_id,
                        download_count = updated.download_count,
                        "Claimed download"
                    );
                    return Ok(ClaimOutcome::Claimed(updated));
                }
                Err(_) => {
                    // Another claimant won the swap; retry against the new state
                    continue;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{CipherPayload, SealedPart};
    use crate::share::{generate_access_token, generate_file_id};
    use std::sync::Arc;

    fn temp_backend() -> SledBackend {
        let db = sled::Config::new().temporary(true).open().unwrap();
        SledBackend::new(&db).unwrap()
    }

    fn test_record(max_downloads: u32) -> ShareRecord {
        ShareRecord::new(
            generate_file_id(),
            generate_access_token(),
            "notes.txt".to_string(),
            5,
            "text/plain".to_string(),
            CipherPayload::Inline(SealedPart {
                nonce: [0u8; 12],
                data: vec![9, 9, 9],
            }),
            "hash".to_string(),
            7,
            max_downloads,
        )
    }

    #[tokio::test]
    async fn test_write_read_delete() {
        let backend = temp_backend();
        let record = test_record(3);
        let id = record.file_id;

        backend.write(&record).await.unwrap();
        let loaded = backend.read(id).await.unwrap().unwrap();
        assert_eq!(loaded, record);

        assert!(backend.delete(id).await.unwrap());
        assert!(backend.read(id).await.unwrap().is_none());
        assert!(!backend.delete(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_write_new_refuses_overwrite() {
        let backend = temp_backend();
        let record = test_record(3);
        let id = record.file_id;

        assert!(backend.write_new(&record).await.unwrap());

        let mut second = record.clone();
        second.file_name = "usurper.txt".to_string();
        assert!(!backend.write_new(&second).await.unwrap());

        let stored = backend.read(id).await.unwrap().unwrap();
        assert_eq!(stored.file_name, "notes.txt");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_creates_single_winner() {
        let backend = Arc::new(temp_backend());
        let id = generate_file_id();

        let mut handles = Vec::new();
        for i in 0..16u32 {
            let backend = Arc::clone(&backend);
            handles.push(tokio::spawn(async move {
                let mut record = test_record(3);
                record.file_id = id;
                record.file_name = format!("contender-{i}.txt");
                backend.write_new(&record).await
            }));
        }

        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn test_claim_increments_until_exhausted() {
        let backend = temp_backend();
        let record = test_record(2);
        let id = record.file_id;
        backend.write(&record).await.unwrap();

        let now = Utc::now();
        for expected in 1..=2u32 {
            match backend.claim(id, now).await.unwrap() {
                ClaimOutcome::Claimed(r) => assert_eq!(r.download_count, expected),
                ClaimOutcome::Denied(d) => panic!("unexpected denial {:?}", d),
            }
        }

        assert!(matches!(
            backend.claim(id, now).await.unwrap(),
            ClaimOutcome::Denied(ClaimDenial::Exhausted)
        ));
    }

    #[tokio::test]
    async fn test_claim_missing_record() {
        let backend = temp_backend();
        assert!(matches!(
            backend.claim(generate_file_id(), Utc::now()).await.unwrap(),
            ClaimOutcome::Denied(ClaimDenial::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_claim_expired_record() {
        let backend = temp_backend();
        let mut record = test_record(5);
        record.expires_at = Utc::now() - chrono::Duration::seconds(1);
        let id = record.file_id;
        backend.write(&record).await.unwrap();

        assert!(matches!(
            backend.claim(id, Utc::now()).await.unwrap(),
            ClaimOutcome::Denied(ClaimDenial::Expired)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_claims_single_winner() {
        let backend = Arc::new(temp_backend());
        let record = test_record(1);
        let id = record.file_id;
        backend.write(&record).await.unwrap();

        let now = Utc::now();
        let mut handles = Vec::new();
        for _ in 0..16 {
            let backend = Arc::clone(&backend);
            handles.push(tokio::spawn(async move { backend.claim(id, now).await }));
        }

        let mut wins = 0;
        let mut exhausted = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                ClaimOutcome::Claimed(r) => {
                    assert_eq!(r.download_count, 1);
                    wins += 1;
                }
                ClaimOutcome::Denied(ClaimDenial::Exhausted) => exhausted += 1,
                ClaimOutcome::Denied(d) => panic!("unexpected denial {:?}", d),
            }
        }

        assert_eq!(wins, 1);
        assert_eq!(exhausted, 15);

        let stored = backend.read(id).await.unwrap().unwrap();
        assert_eq!(stored.download_count, 1);
    }
}
