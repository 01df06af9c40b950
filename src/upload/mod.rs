//! Chunked upload assembly
//!
//! Files may arrive as an ordered sequence of parts spread over several
//! calls. Each in-progress upload holds one session keyed by file id; the
//! session collects parts by index and assembles them, in index order, the
//! moment every index has arrived. Arrival order never affects the output.
//!
//! Sessions that miss their deadline are discarded by the maintenance sweep.
//! A discarded session leaves a tombstone so a late part fails with
//! `SessionExpired` instead of silently opening a fresh session.

use crate::error::{Error, Result};
use crate::share::FileId;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// How long a tombstone for a discarded session is remembered
const TOMBSTONE_RETENTION_HOURS: i64 = 24;

/// Result of feeding one part into a session
#[derive(Debug)]
pub enum PartOutcome {
    /// Session still waiting for more parts
    Pending {
        /// Distinct part indices received so far
        received: u32,
        /// Total parts expected
        total: u32,
    },
    /// All parts arrived; payload assembled in index order
    Complete(Vec<u8>),
}

/// One in-progress chunked upload
struct UploadSession {
    /// Expected number of parts
    total_parts: u32,
    /// Received parts keyed by index; BTreeMap keeps assembly ordered
    parts: BTreeMap<u32, Bytes>,
    /// Instant after which the sweep discards this session
    deadline: DateTime<Utc>,
}

impl UploadSession {
    fn new(total_parts: u32, timeout: Duration) -> Self {
        UploadSession {
            total_parts,
            parts: BTreeMap::new(),
            deadline: Utc::now() + timeout,
        }
    }

    fn is_complete(&self) -> bool {
        self.parts.len() as u32 == self.total_parts
    }

    /// Concatenate parts in index order
    fn assemble(&mut self) -> Vec<u8> {
        let total: usize = self.parts.values().map(|p| p.len()).sum();
        let mut out = Vec::with_capacity(total);
        for part in self.parts.values() {
            out.extend_from_slice(part);
        }
        out
    }
}

/// Session table for all in-progress chunked uploads
///
/// Injected into the engine at construction; never ambient global state.
/// Mutual exclusion is scoped per session: two parts for the same upload
/// serialize on that session's lock, parts for different uploads don't
/// contend at all.
pub struct SessionTable {
    sessions: DashMap<FileId, Arc<Mutex<UploadSession>>>,
    /// File ids of sessions discarded by the sweep
    tombstones: DashMap<FileId, DateTime<Utc>>,
    timeout: Duration,
}

impl SessionTable {
    /// Create a session table with the given per-session timeout
    pub fn new(timeout: std::time::Duration) -> Self {
        SessionTable {
            sessions: DashMap::new(),
            tombstones: DashMap::new(),
            timeout: Duration::from_std(timeout).unwrap_or_else(|_| Duration::hours(1)),
        }
    }

    /// Feed one part into its session
    ///
    /// Opens the session on first contact. Returns `Complete` with the
    /// assembled payload exactly once, when the last missing index arrives;
    /// the session is gone afterwards.
    pub fn add_part(
        &self,
        file_id: FileId,
        part_index: u32,
        total_parts: u32,
        data: Bytes,
    ) -> Result<PartOutcome> {
        if total_parts == 0 {
            return Err(Error::InvalidParameters(
                "Total parts must be at least 1".to_string(),
            ));
        }
        if part_index >= total_parts {
            return Err(Error::InvalidParameters(format!(
                "Part index {} out of range for {} parts",
                part_index, total_parts
            )));
        }

        if self.tombstones.contains_key(&file_id) {
            return Err(Error::SessionExpired);
        }

        // Clone the Arc out of the map entry before locking so the shard
        // guard is not held across the session lock.
        let session = self
            .sessions
            .entry(file_id)
            .or_insert_with(|| Arc::new(Mutex::new(UploadSession::new(total_parts, self.timeout))))
            .clone();

        let mut guard = session.lock();

        // Re-check under the session lock: the sweep may have discarded the
        // session between the check above and the entry insert. Drop any
        // session this call just opened so the upload cannot restart.
        if self.tombstones.contains_key(&file_id) {
            drop(guard);
            self.sessions
                .remove_if(&file_id, |_, current| Arc::ptr_eq(current, &session));
            return Err(Error::SessionExpired);
        }

        if guard.total_parts != total_parts {
            return Err(Error::InvalidParameters(format!(
                "Session expects {} parts, part declared {}",
                guard.total_parts, total_parts
            )));
        }

        if Utc::now() > guard.deadline {
            drop(guard);
            self.discard(file_id);
            return Err(Error::SessionExpired);
        }

        guard.parts.insert(part_index, data);
        debug!(
            %file_id,
            part_index,
            received = guard.parts.len(),
            total = guard.total_parts,
            "Received upload part"
        );

        if guard.is_complete() {
            let payload = guard.assemble();
            // Remove while still holding the session lock so a racing
            // retransmission cannot observe a completed session.
            self.sessions.remove(&file_id);
            return Ok(PartOutcome::Complete(payload));
        }

        Ok(PartOutcome::Pending {
            received: guard.parts.len() as u32,
            total: guard.total_parts,
        })
    }

    /// Discard a session and leave a tombstone
    ///
    /// The tombstone goes in before the session comes out, so a part racing
    /// this call either finds the session still present or finds the
    /// tombstone; there is no window where it finds neither and opens a
    /// fresh session.
    fn discard(&self, file_id: FileId) {
        self.tombstones.insert(file_id, Utc::now());
        self.sessions.remove(&file_id);
    }

    /// Drop timed-out sessions and stale tombstones
    ///
    /// Called by the maintenance sweep; returns the number of sessions
    /// discarded.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<FileId> = self
            .sessions
            .iter()
            .filter(|entry| now > entry.value().lock().deadline)
            .map(|entry| *entry.key())
            .collect();

        for file_id in &expired {
            debug!(%file_id, "Discarding timed-out upload session");
            self.discard(*file_id);
        }

        let tombstone_cutoff = now - Duration::hours(TOMBSTONE_RETENTION_HOURS);
        self.tombstones
            .retain(|_, discarded_at| *discarded_at > tombstone_cutoff);

        expired.len()
    }

    /// Number of in-progress sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are in progress
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
