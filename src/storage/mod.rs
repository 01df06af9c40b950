//! Storage tiers
//!
//! Every tier implements the same small backend interface; the resolver
//! iterates an ordered list of them generically, so adding or removing a
//! tier is a configuration change rather than new branching logic.

mod durable;
mod memory;
mod resolver;

pub use durable::SledBackend;
pub use memory::MemoryBackend;
pub use resolver::{Resolved, TierResolver};

use crate::error::Result;
use crate::share::{FileId, ShareRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Outcome of an atomic download claim against a backend
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// Claim succeeded; the returned record carries the incremented counter
    Claimed(ShareRecord),
    /// Claim refused with a terminal reason
    Denied(ClaimDenial),
}

/// Why a claim was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimDenial {
    /// No record under that file id
    NotFound,
    /// Record past its expiry time
    Expired,
    /// Download quota already fully used
    Exhausted,
}

/// One storage tier
///
/// Tiers differ in durability and latency, not in interface. The claim
/// operation must be atomic within the backend itself: engine instances
/// share no memory, so an in-process lock around read-then-write is not
/// enough for the authoritative tier.
#[async_trait]
pub trait ShareBackend: Send + Sync {
    /// Tier name for logs
    fn name(&self) -> &str;

    /// Persist a record, overwriting any previous copy
    async fn write(&self, record: &ShareRecord) -> Result<()>;

    /// Persist a record only if no copy exists under its file id
    ///
    /// Returns whether the record was created. Must be atomic within the
    /// backend: two racing creators under one file id see exactly one
    /// `true`, so a committed record can never be silently overwritten.
    async fn write_new(&self, record: &ShareRecord) -> Result<bool>;

    /// Fetch a record by file id
    async fn read(&self, file_id: FileId) -> Result<Option<ShareRecord>>;

    /// Remove a record; returns whether one existed
    async fn delete(&self, file_id: FileId) -> Result<bool>;

    /// Atomically check expiry/quota and increment the download counter
    async fn claim(&self, file_id: FileId, now: DateTime<Utc>) -> Result<ClaimOutcome>;

    /// Drop entries this tier no longer needs; returns how many were evicted
    ///
    /// Durable tiers keep the default: expired records there are evicted
    /// lazily on access, not by sweep.
    fn sweep(&self, _now: DateTime<Utc>) -> usize {
        0
    }
}

/// Shared claim guard: classify a record before incrementing
///
/// Both backends apply the same rules inside their atomic section.
pub(crate) fn check_claimable(record: &ShareRecord, now: DateTime<Utc>) -> Option<ClaimDenial> {
    if now > record.expires_at {
        Some(ClaimDenial::Expired)
    } else if record.download_count >= record.max_downloads {
        Some(ClaimDenial::Exhausted)
    } else {
        None
    }
}
