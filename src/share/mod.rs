//! Share record model
//!
//! A share record is the committed unit of the engine: encrypted payload
//! plus quota and expiry metadata. Everything except `download_count` is
//! write-once at commit time.

use crate::crypto::CipherPayload;
use crate::error::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque share identifier
pub type FileId = Uuid;

/// Generate a fresh share identifier
pub fn generate_file_id() -> FileId {
    Uuid::new_v4()
}

/// Generate a high-entropy access token (UUID-formatted, 128-bit random)
///
/// Tokens are independent of file ids and file content; neither is derivable
/// from the other.
pub fn generate_access_token() -> String {
    Uuid::new_v4().to_string()
}

/// Derived lifecycle state of a share
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareStatus {
    /// Downloadable
    Active,
    /// Past its expiry time, permanently unreadable
    Expired,
    /// Download quota fully used
    Exhausted,
    /// Explicitly removed
    Deleted,
}

/// One published share: encrypted payload plus quota/expiry metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShareRecord {
    /// Unique share identifier, assigned at publish time
    pub file_id: FileId,

    /// High-entropy secret required for every read
    pub access_token: String,

    /// Original file name
    pub file_name: String,

    /// Original file size in bytes
    pub file_size: u64,

    /// Declared MIME type
    pub mime_type: String,

    /// Encrypted payload
    pub payload: CipherPayload,

    /// BLAKE3 hash of the plaintext, verified after decryption
    pub content_hash: String,

    /// Commit timestamp
    pub uploaded_at: DateTime<Utc>,

    /// Expiry timestamp, set once at commit
    pub expires_at: DateTime<Utc>,

    /// Maximum number of downloads
    pub max_downloads: u32,

    /// Downloads claimed so far (monotonic, never exceeds `max_downloads`)
    pub download_count: u32,
}

impl ShareRecord {
    /// Create a record at commit time
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        file_id: FileId,
        access_token: String,
        file_name: String,
        file_size: u64,
        mime_type: String,
        payload: CipherPayload,
        content_hash: String,
        retention_days: u32,
        max_downloads: u32,
    ) -> Self {
        let now = Utc::now();
        ShareRecord {
            file_id,
            access_token,
            file_name,
            file_size,
            mime_type,
            payload,
            content_hash,
            uploaded_at: now,
            expires_at: now + Duration::days(retention_days as i64),
            max_downloads,
            download_count: 0,
        }
    }

    /// Derive the lifecycle status at a given instant
    ///
    /// Expiry wins over exhaustion: a record past `expires_at` is expired
    /// regardless of remaining quota.
    pub fn status(&self, now: DateTime<Utc>) -> ShareStatus {
        if now > self.expires_at {
            ShareStatus::Expired
        } else if self.download_count >= self.max_downloads {
            ShareStatus::Exhausted
        } else {
            ShareStatus::Active
        }
    }

    /// Constant-time access token comparison
    ///
    /// Compares fixed-length BLAKE3 digests; `blake3::Hash` equality is
    /// constant-time, and hashing first also hides the token length.
    pub fn token_matches(&self, token: &str) -> bool {
        blake3::hash(self.access_token.as_bytes()) == blake3::hash(token.as_bytes())
    }

    /// Build the caller-facing summary
    pub fn summary(&self, now: DateTime<Utc>) -> ShareSummary {
        self.summary_with_status(self.status(now), now)
    }

    /// Build a summary with an explicit status (used when reporting deletion)
    pub fn summary_with_status(&self, status: ShareStatus, now: DateTime<Utc>) -> ShareSummary {
        let remaining = (self.expires_at - now).num_seconds().max(0);

        ShareSummary {
            file_id: self.file_id,
            file_name: self.file_name.clone(),
            file_size: self.file_size,
            mime_type: self.mime_type.clone(),
            uploaded_at: self.uploaded_at,
            expires_at: self.expires_at,
            download_count: self.download_count,
            max_downloads: self.max_downloads,
            status,
            time_until_expiry_secs: remaining,
        }
    }

    /// Serialize for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from storage
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Record summary returned across the boundary
///
/// Never carries ciphertext or the access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareSummary {
    /// Share identifier
    pub file_id: FileId,
    /// Original file name
    pub file_name: String,
    /// Original file size in bytes
    pub file_size: u64,
    /// Declared MIME type
    pub mime_type: String,
    /// Commit timestamp
    pub uploaded_at: DateTime<Utc>,
    /// Expiry timestamp
    pub expires_at: DateTime<Utc>,
    /// Downloads claimed so far
    pub download_count: u32,
    /// Maximum number of downloads
    pub max_downloads: u32,
    /// Lifecycle status at summary time
    pub status: ShareStatus,
    /// Seconds until expiry (0 once expired)
    pub time_until_expiry_secs: i64,
}
