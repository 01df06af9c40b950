//! Share resolution boundary
//!
//! The operations the transport layer calls: publish (whole or chunked),
//! metadata query, payload fetch, delete. This is the only place that
//! translates engine internals into caller-facing outcomes; everything
//! underneath is injected at construction and torn down with the service.

use crate::config::Config;
use crate::crypto::{content_hash, CipherEngine, DerivedKey};
use crate::error::{Error, Result};
use crate::lifecycle::{validate, LifecycleEngine, MaintenanceSweeper};
use crate::share::{FileId, ShareRecord, ShareStatus, ShareSummary};
use crate::storage::{MemoryBackend, ShareBackend, SledBackend, TierResolver};
use crate::upload::{PartOutcome, SessionTable};
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Minimum accepted access token length
///
/// Tokens are opaque high-entropy strings; anything shorter than this is a
/// caller bug, not a guessable-but-valid secret.
const MIN_TOKEN_LEN: usize = 16;

/// Caller-supplied share parameters, fixed at commit
#[derive(Debug, Clone)]
pub struct PublishRequest {
    /// Original file name
    pub file_name: String,
    /// Declared MIME type
    pub mime_type: String,
    /// Requested retention window in days
    pub retention_days: u32,
    /// Requested download quota
    pub max_downloads: u32,
    /// Access token the recipients will present
    pub access_token: String,
}

/// Outcome of feeding one part of a chunked publish
#[derive(Debug)]
pub enum PublishOutcome {
    /// More parts outstanding
    Pending {
        /// Distinct part indices received so far
        received: u32,
        /// Total parts expected
        total: u32,
    },
    /// Final part arrived; the share is committed
    Committed(ShareSummary),
}

/// A fetched payload with its share summary
#[derive(Debug)]
pub struct Download {
    /// Decrypted file content
    pub bytes: Vec<u8>,
    /// Summary reflecting the claimed download
    pub summary: ShareSummary,
}

/// The share lifecycle and storage-resolution engine
pub struct ShareService {
    config: Config,
    codec: CipherEngine,
    sessions: Arc<SessionTable>,
    resolver: Arc<TierResolver>,
    lifecycle: LifecycleEngine,
    tiers: Vec<Arc<dyn ShareBackend>>,
    maintenance: parking_lot::Mutex<Option<(JoinHandle<()>, Arc<Notify>)>>,
}

impl ShareService {
    /// Create a service with the default tier pair: durable sled primary,
    /// TTL-bounded in-memory cache
    pub fn new(config: Config, master_key: &DerivedKey) -> Result<Self> {
        config.validate()?;
        config.ensure_directories()?;

        let db = sled::open(config.data_dir.join("shares.db"))?;
        let primary: Arc<dyn ShareBackend> = Arc::new(SledBackend::new(&db)?);
        let cache: Arc<dyn ShareBackend> = Arc::new(MemoryBackend::new(Duration::from_secs(
            config.storage.cache_ttl_secs,
        )));

        Self::with_tiers(config, master_key, vec![primary, cache])
    }

    /// Create a service over an explicit ordered tier list
    ///
    /// Tiers go most durable first; the first is authoritative. Stores are
    /// injected here and live exactly as long as the service.
    pub fn with_tiers(
        config: Config,
        master_key: &DerivedKey,
        tiers: Vec<Arc<dyn ShareBackend>>,
    ) -> Result<Self> {
        config.validate()?;

        let codec = CipherEngine::from_derived(master_key, config.chunk.clone())?;
        let sessions = Arc::new(SessionTable::new(Duration::from_secs(
            config.upload.session_timeout_secs,
        )));
        let resolver = Arc::new(TierResolver::new(
            tiers.clone(),
            Duration::from_millis(config.storage.propagation_timeout_ms),
        )?);
        let lifecycle = LifecycleEngine::new(resolver.clone());

        Ok(ShareService {
            config,
            codec,
            sessions,
            resolver,
            lifecycle,
            tiers,
            maintenance: parking_lot::Mutex::new(None),
        })
    }

    /// Start the maintenance sweep task
    ///
    /// Idempotent; the task runs until `shutdown` is called.
    pub fn start_maintenance(&self) {
        let mut guard = self.maintenance.lock();
        if guard.is_some() {
            return;
        }

        let sweeper = MaintenanceSweeper::new(
            self.sessions.clone(),
            self.tiers.clone(),
            Duration::from_secs(self.config.upload.sweep_interval_secs),
            Duration::from_secs(self.config.upload.sweep_jitter_secs),
        );
        let shutdown = sweeper.shutdown_handle();
        let handle = tokio::spawn(sweeper.run());

        *guard = Some((handle, shutdown));
    }

    /// Stop the maintenance task and wait for it to finish
    pub async fn shutdown(&self) {
        let taken = self.maintenance.lock().take();
        if let Some((handle, shutdown)) = taken {
            shutdown.notify_one();
            let _ = handle.await;
        }
    }

    /// Publish a file delivered in one piece
    pub async fn publish_whole(
        &self,
        file_id: FileId,
        bytes: &[u8],
        request: PublishRequest,
    ) -> Result<ShareSummary> {
        self.validate_request(&request)?;
        self.commit_payload(file_id, bytes, &request).await
    }

    /// Feed one part of a chunked publish
    ///
    /// Commits the share when the final missing part arrives.
    pub async fn publish_chunk(
        &self,
        file_id: FileId,
        part_index: u32,
        total_parts: u32,
        data: Bytes,
        request: PublishRequest,
    ) -> Result<PublishOutcome> {
        self.validate_request(&request)?;

        match self.sessions.add_part(file_id, part_index, total_parts, data)? {
            PartOutcome::Pending { received, total } => {
                Ok(PublishOutcome::Pending { received, total })
            }
            PartOutcome::Complete(payload) => {
                let summary = self.commit_payload(file_id, &payload, &request).await?;
                Ok(PublishOutcome::Committed(summary))
            }
        }
    }

    /// Query share metadata
    ///
    /// Never consumes quota. Served from the resolver, so a stale cache
    /// copy of a deleted record reports `NotFound`.
    pub async fn get_metadata(&self, file_id: FileId, token: &str) -> Result<ShareSummary> {
        let resolved = self
            .resolver
            .resolve(file_id)
            .await?
            .ok_or(Error::NotFound)?;

        if !resolved.record.token_matches(token) {
            return Err(Error::TokenMismatch);
        }

        let now = Utc::now();
        let status = validate(&resolved.record, now);
        Ok(resolved.record.summary_with_status(status, now))
    }

    /// Fetch and decrypt the payload, claiming one download first
    ///
    /// The claim is atomic against the authoritative tier, so concurrent
    /// fetches can never exceed the quota between them.
    pub async fn fetch_payload(&self, file_id: FileId, token: &str) -> Result<Download> {
        let record = self.lifecycle.claim_download(file_id, token).await?;

        let bytes = self.codec.decrypt(&record.payload)?;
        if content_hash(&bytes) != record.content_hash {
            return Err(Error::CorruptCiphertext(
                "Plaintext hash mismatch after decryption".to_string(),
            ));
        }

        debug!(%file_id, size = bytes.len(), "Payload fetched");
        Ok(Download {
            summary: record.summary(Utc::now()),
            bytes,
        })
    }

    /// Delete a share everywhere
    pub async fn delete_share(&self, file_id: FileId) -> Result<ShareSummary> {
        let resolved = self
            .resolver
            .resolve(file_id)
            .await?
            .ok_or(Error::NotFound)?;

        if !self.resolver.delete(file_id).await? {
            return Err(Error::NotFound);
        }

        info!(%file_id, "Share deleted");
        Ok(resolved
            .record
            .summary_with_status(ShareStatus::Deleted, Utc::now()))
    }

    /// Encrypt, build the record, and commit it across tiers
    async fn commit_payload(
        &self,
        file_id: FileId,
        plaintext: &[u8],
        request: &PublishRequest,
    ) -> Result<ShareSummary> {
        // Fast rejection before the encryption work; the authoritative
        // write-once check is the atomic create in the commit below
        if self.resolver.primary().read(file_id).await?.is_some() {
            return Err(Error::InvalidParameters(format!(
                "Share {} already exists",
                file_id
            )));
        }

        let hash = content_hash(plaintext);
        let payload = self.codec.encrypt(plaintext)?;

        let record = ShareRecord::new(
            file_id,
            request.access_token.clone(),
            request.file_name.clone(),
            plaintext.len() as u64,
            request.mime_type.clone(),
            payload,
            hash,
            request.retention_days,
            request.max_downloads,
        );

        if !self.resolver.commit(&record).await? {
            // Lost a race against another publish under the same id
            return Err(Error::InvalidParameters(format!(
                "Share {} already exists",
                file_id
            )));
        }
        info!(
            %file_id,
            size = record.file_size,
            parts = record.payload.part_count(),
            expires_at = %record.expires_at,
            "Share committed"
        );

        Ok(record.summary(Utc::now()))
    }

    /// Reject out-of-bounds parameters before any I/O
    fn validate_request(&self, request: &PublishRequest) -> Result<()> {
        let limits = &self.config.limits;

        if request.retention_days < limits.min_retention_days
            || request.retention_days > limits.max_retention_days
        {
            return Err(Error::InvalidParameters(format!(
                "Retention must be {}-{} days, got {}",
                limits.min_retention_days, limits.max_retention_days, request.retention_days
            )));
        }

        if request.max_downloads < limits.min_downloads
            || request.max_downloads > limits.max_downloads
        {
            return Err(Error::InvalidParameters(format!(
                "Download quota must be {}-{}, got {}",
                limits.min_downloads, limits.max_downloads, request.max_downloads
            )));
        }

        if request.access_token.len() < MIN_TOKEN_LEN {
            return Err(Error::InvalidParameters(
                "Access token too short".to_string(),
            ));
        }

        if request.file_name.is_empty() {
            return Err(Error::InvalidParameters(
                "File name must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
