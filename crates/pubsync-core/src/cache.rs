//! Per-peer diff notification cache
//!
//! For each remote peer source the repository keeps one
//! [`DiffNotificationCache`] mapping publication name to the metadata last
//! notified to that peer. When a batch of changes is rendered for the
//! peer, the cache decides per publication whether nothing needs sending,
//! a diff range suffices, or the full document must go — while a shared
//! byte budget bounds the whole batch.
//!
//! The policy is greedy first-fit: publications are offered in
//! caller-determined order; one that does not fit is skipped without
//! penalty (its cache state is unchanged) and can be retried in a later
//! batch with a fresh budget.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::publication::{Publication, PublicationMetaData};
use crate::types::{PeerSource, PublicationName};

/// Outcome of one budgeted notification decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyDecision {
    /// Send nothing for this publication in this batch
    ///
    /// Either the peer is already caught up (or ahead, after a
    /// disconnect/reconnect race) or the remaining budget cannot fit the
    /// serialization. Neither case mutates the cache.
    Skip,
    /// Send the inclusive version range `from..=to`
    ///
    /// `from == 0` means the full document.
    SendRange {
        /// First version of the range
        from: u64,
        /// Last version of the range
        to: u64,
    },
}

impl NotifyDecision {
    /// Whether this decision sends anything
    pub fn sends(&self) -> bool {
        matches!(self, NotifyDecision::SendRange { .. })
    }
}

/// One row of the cache: what the peer was last told about a publication
#[derive(Debug, Clone)]
pub struct CachedPeerEntry {
    /// Metadata describing the last notified version/base version
    pub meta: PublicationMetaData,
    /// Unix timestamp of the last notification
    pub notified_at: i64,
}

/// Last-notified-version cache for one remote peer source
///
/// Entries are created on first notification and updated on every
/// subsequent one; they are never deleted automatically. Lifetime is
/// bounded by the owning repository. An advisory expiry hint is tracked
/// per peer source; enforcing it is left to the embedder via
/// [`DiffNotificationCache::expire_before`].
#[derive(Debug)]
pub struct DiffNotificationCache {
    peer: PeerSource,
    entries: HashMap<PublicationName, CachedPeerEntry>,
    /// Latest publication expiry observed for this peer source (advisory)
    expiry_hint: Option<i64>,
}

impl DiffNotificationCache {
    /// Create an empty cache for one peer source
    pub fn new(peer: PeerSource) -> Self {
        Self {
            peer,
            entries: HashMap::new(),
            expiry_hint: None,
        }
    }

    /// The peer source this cache is scoped to
    pub fn peer(&self) -> &PeerSource {
        &self.peer
    }

    /// Number of publications this peer has been notified about
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the peer has never been notified of anything
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Last-notified metadata for a publication, if any
    pub fn entry(&self, name: &PublicationName) -> Option<&CachedPeerEntry> {
        self.entries.get(name)
    }

    /// Advisory expiry hint for this peer source
    pub fn expiry_hint(&self) -> Option<i64> {
        self.expiry_hint
    }

    /// Decide what to send the peer for `publication`, charging `budget`
    ///
    /// `budget` is owned by the caller of the batch and threaded through
    /// successive calls; it only ever decreases, and only when the
    /// decision is a send.
    pub fn decide(&mut self, publication: &Publication, budget: &mut u64) -> NotifyDecision {
        let name = publication.name();
        let current = publication.current_version();

        if let Some(hint) = publication.expires_at() {
            self.expiry_hint = Some(self.expiry_hint.map_or(hint, |h| h.max(hint)));
        }

        match self.entries.get_mut(name) {
            None => {
                // First notification to this peer: full document
                let size = publication.size_of_full();
                if size > *budget {
                    trace!(
                        peer = %self.peer, %name, size, budget = *budget,
                        "Full document does not fit remaining budget, skipping"
                    );
                    return NotifyDecision::Skip;
                }
                *budget -= size;
                let mut meta = publication.metadata();
                meta.base_version = 0;
                meta.version = current;
                self.entries.insert(
                    name.clone(),
                    CachedPeerEntry {
                        meta,
                        notified_at: chrono::Utc::now().timestamp(),
                    },
                );
                NotifyDecision::SendRange {
                    from: 0,
                    to: current,
                }
            }
            Some(entry) => {
                let next = entry.meta.version + 1;
                if next > current {
                    // Expected after disconnect/reconnect races, not an error
                    debug!(
                        peer = %self.peer, %name,
                        notified = entry.meta.version, current,
                        "Peer already current, skipping stale notification"
                    );
                    return NotifyDecision::Skip;
                }
                let size = publication.size_of_diff(next, current);
                if size > *budget {
                    trace!(
                        peer = %self.peer, %name, size, budget = *budget,
                        "Diff does not fit remaining budget, skipping"
                    );
                    return NotifyDecision::Skip;
                }
                *budget -= size;
                entry.meta.version = current;
                entry.meta.expires_at = publication.expires_at();
                entry.notified_at = chrono::Utc::now().timestamp();
                NotifyDecision::SendRange {
                    from: next,
                    to: current,
                }
            }
        }
    }

    /// Drop entries whose last-notified metadata expired before `cutoff`
    ///
    /// Extension point; the core never calls this itself. Returns the
    /// number of entries dropped.
    pub fn expire_before(&mut self, cutoff: i64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| !matches!(entry.meta.expires_at, Some(at) if at < cutoff));
        before - self.entries.len()
    }
}
