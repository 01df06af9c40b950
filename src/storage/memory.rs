//! Ephemeral in-memory tier
//!
//! A TTL-bounded cache of share records used to shortcut reads. Copies here
//! are never authoritative: every entry expires at the earlier of the
//! record's own expiry and the tier TTL, and stale entries are evicted
//! lazily on access or by the maintenance sweep.

use crate::error::Result;
use crate::share::{FileId, ShareRecord};
use crate::storage::{check_claimable, ClaimDenial, ClaimOutcome, ShareBackend};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

struct CacheEntry {
    record: ShareRecord,
    /// When this copy stops being served, regardless of the record's state
    cached_until: DateTime<Utc>,
}

/// In-memory share cache with a fixed TTL
pub struct MemoryBackend {
    entries: DashMap<FileId, CacheEntry>,
    ttl: Duration,
}

impl MemoryBackend {
    /// Create a cache tier with the given TTL
    pub fn new(ttl: std::time::Duration) -> Self {
        MemoryBackend {
            entries: DashMap::new(),
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::seconds(300)),
        }
    }

    /// Number of live entries (stale ones may still be counted until swept)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ShareBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn write(&self, record: &ShareRecord) -> Result<()> {
        // A cached copy never outlives the tier TTL or the record itself
        let cached_until = (Utc::now() + self.ttl).min(record.expires_at);
        self.entries.insert(
            record.file_id,
            CacheEntry {
                record: record.clone(),
                cached_until,
            },
        );
        Ok(())
    }

    /// Create under the entry lock; a stale leftover copy does not block
    async fn write_new(&self, record: &ShareRecord) -> Result<bool> {
        let now = Utc::now();
        let cached_until = (now + self.ttl).min(record.expires_at);

        match self.entries.entry(record.file_id) {
            Entry::Occupied(mut occupied) => {
                if now > occupied.get().cached_until {
                    occupied.insert(CacheEntry {
                        record: record.clone(),
                        cached_until,
                    });
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry {
                    record: record.clone(),
                    cached_until,
                });
                Ok(true)
            }
        }
    }

    async fn read(&self, file_id: FileId) -> Result<Option<ShareRecord>> {
        let stale = match self.entries.get(&file_id) {
            Some(entry) => {
                if Utc::now() <= entry.cached_until {
                    return Ok(Some(entry.record.clone()));
                }
                true
            }
            None => false,
        };

        if stale {
            self.entries.remove(&file_id);
        }
        Ok(None)
    }

    async fn delete(&self, file_id: FileId) -> Result<bool> {
        Ok(self.entries.remove(&file_id).is_some())
    }

    /// In-process atomic claim under the entry lock
    ///
    /// Valid for a cache tier because its copies are provisional anyway;
    /// authoritative quota decisions always go through the durable tier.
    async fn claim(&self, file_id: FileId, now: DateTime<Utc>) -> Result<ClaimOutcome> {
        let mut entry = match self.entries.get_mut(&file_id) {
            Some(entry) => entry,
            None => return Ok(ClaimOutcome::Denied(ClaimDenial::NotFound)),
        };

        if now > entry.cached_until {
            drop(entry);
            self.entries.remove(&file_id);
            return Ok(ClaimOutcome::Denied(ClaimDenial::NotFound));
        }

        if let Some(denial) = check_claimable(&entry.record, now) {
            return Ok(ClaimOutcome::Denied(denial));
        }

        entry.record.download_count += 1;
        Ok(ClaimOutcome::Claimed(entry.record.clone()))
    }

    /// Evict entries whose cache lease or record expiry has passed
    fn sweep(&self, now: DateTime<Utc>) -> usize {
        // Count inside the closure; len() deltas race with concurrent writes
        let mut evicted = 0;
        self.entries.retain(|_, entry| {
            let keep = now <= entry.cached_until && now <= entry.record.expires_at;
            if !keep {
                evicted += 1;
            }
            keep
        });
        if evicted > 0 {
            debug!(evicted, "Evicted stale cache entries");
        }
        evicted
    }
}
