//! Incoming peer subscriptions
//!
//! An incoming subscription records a remote peer's interest in this
//! side's publications. It has no lifecycle state machine — it exists as
//! long as the peer's subscribe request is active — but carries the
//! richest behavior: rendering batched change notifications through the
//! name filter, the authorization oracle, and the peer's bandwidth-bounded
//! diff cache.

use std::sync::Arc;

use tracing::{debug, trace};

use super::{FilterDescriptor, SubscriptionFilter};
use crate::authorization::AuthorizationOracle;
use crate::cache::{DiffNotificationCache, NotifyDecision};
use crate::error::PubSyncResult;
use crate::publication::Publication;
use crate::transport::{NotifyBatch, NotifyBody, NotifyEntry, NotifyTransport};
use crate::types::{Location, PeerSource};

/// A remote peer's registered interest in this side's publications
pub struct IncomingPeerSubscription {
    peer: PeerSource,
    filter: SubscriptionFilter,
    /// Unix timestamp of registration
    created_at: i64,
}

impl IncomingPeerSubscription {
    pub(crate) fn new(peer: PeerSource, filter: SubscriptionFilter) -> Self {
        Self {
            peer,
            filter,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    /// The peer source that registered this subscription
    pub fn peer(&self) -> &PeerSource {
        &self.peer
    }

    /// Location notifications are addressed to: the subscription creator's
    pub fn creator(&self) -> &Location {
        &self.peer.location
    }

    /// The compiled filter
    pub fn filter(&self) -> &SubscriptionFilter {
        &self.filter
    }

    /// Filter descriptor, for diagnostics
    pub fn source(&self) -> FilterDescriptor {
        self.filter.descriptor()
    }

    /// Unix timestamp of registration
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Whether a publication is eligible for this subscription
    ///
    /// Eligibility is the name-pattern match AND the oracle's consent for
    /// the publisher against this subscription's creator. The subscriber
    /// side of the oracle call is always the subscription creator, not
    /// whoever triggered the current batch.
    fn eligible(&self, publication: &Publication, oracle: &dyn AuthorizationOracle) -> bool {
        if !self.filter.matches(publication.name()) {
            return false;
        }
        let authorized = oracle.authorized(
            publication.creator(),
            publication.relationships(),
            self.creator(),
            self.filter.relationships(),
        );
        if !authorized {
            trace!(
                peer = %self.peer, name = %publication.name(),
                "Publisher/subscriber pair not authorized, dropping"
            );
        }
        authorized
    }

    /// Render an "updated" batch into one outgoing notification
    ///
    /// Survivors of the filter and oracle are offered to the peer's diff
    /// cache in caller order under the shared `budget`. Returns the number
    /// of entries sent; when no publication survives, nothing is handed to
    /// the transport at all.
    pub(crate) fn notify_updated(
        &self,
        publications: &[Arc<Publication>],
        now: i64,
        oracle: &dyn AuthorizationOracle,
        cache: &mut DiffNotificationCache,
        budget: &mut u64,
        transport: &dyn NotifyTransport,
    ) -> PubSyncResult<usize> {
        let mut entries = Vec::new();
        for publication in publications {
            if publication.is_expired(now) {
                debug!(
                    name = %publication.name(),
                    "Publication expired, not offered to subscribers"
                );
                continue;
            }
            if !self.eligible(publication, oracle) {
                continue;
            }
            match cache.decide(publication, budget) {
                NotifyDecision::Skip => continue,
                NotifyDecision::SendRange { from, to } => {
                    let mut meta = publication.metadata();
                    meta.base_version = from;
                    meta.version = to;
                    entries.push(NotifyEntry {
                        meta,
                        body: NotifyBody::Update {
                            publication: publication.clone(),
                            from,
                            to,
                        },
                    });
                }
            }
        }

        if entries.is_empty() {
            // The common case: no traffic at all
            return Ok(0);
        }

        let sent = entries.len();
        debug!(peer = %self.peer, entries = sent, "Dispatching change notification");
        transport.send_notify(self.creator(), NotifyBatch { entries })?;
        Ok(sent)
    }

    /// Render a "gone" batch into one outgoing notification
    ///
    /// Survivors are collected as metadata with version and base version
    /// forced to zero — the wire signal that the publication no longer
    /// exists. No budget applies; gone entries carry no content.
    pub(crate) fn notify_gone(
        &self,
        publications: &[Arc<Publication>],
        oracle: &dyn AuthorizationOracle,
        transport: &dyn NotifyTransport,
    ) -> PubSyncResult<usize> {
        let entries: Vec<NotifyEntry> = publications
            .iter()
            .filter(|publication| self.eligible(publication, oracle))
            .map(|publication| NotifyEntry {
                meta: publication.metadata().as_gone(),
                body: NotifyBody::Gone,
            })
            .collect();

        if entries.is_empty() {
            return Ok(0);
        }

        let sent = entries.len();
        debug!(peer = %self.peer, entries = sent, "Dispatching gone notification");
        transport.send_notify(self.creator(), NotifyBatch { entries })?;
        Ok(sent)
    }
}

impl std::fmt::Debug for IncomingPeerSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingPeerSubscription")
            .field("peer", &self.peer)
            .field("pattern", &self.filter.pattern_str())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::authorization::RelationshipOracle;
    use crate::publication::DiffContent;
    use crate::types::{PeerId, PublicationName};

    struct SmallContent;

    impl DiffContent for SmallContent {
        fn size_of_full(&self) -> u64 {
            100
        }
        fn size_of_diff(&self, from: u64, to: u64) -> u64 {
            (to + 1 - from) * 10
        }
        fn full_payload(&self) -> Vec<u8> {
            vec![0; 100]
        }
        fn diff_payload(&self, from: u64, to: u64) -> Vec<u8> {
            vec![0; ((to + 1 - from) * 10) as usize]
        }
    }

    /// Transport stub recording every dispatched batch
    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(Location, NotifyBatch)>>,
    }

    impl NotifyTransport for RecordingTransport {
        fn send_notify(&self, destination: &Location, batch: NotifyBatch) -> PubSyncResult<()> {
            self.sent.lock().push((destination.clone(), batch));
            Ok(())
        }
    }

    fn peer() -> PeerSource {
        PeerSource::new(PeerId::new("bob"), Location::new("bob/laptop"))
    }

    fn subscription(pattern: &str) -> IncomingPeerSubscription {
        IncomingPeerSubscription::new(
            peer(),
            SubscriptionFilter::new(pattern, ["friends"].into_iter().collect()).unwrap(),
        )
    }

    fn publication(name: &str, version: u64) -> Arc<Publication> {
        let publication = Publication::new(
            PublicationName::from(name),
            Location::new("alice/desktop"),
            ["friends"].into_iter().collect(),
            Arc::new(SmallContent),
        );
        publication.advance_to(version).unwrap();
        Arc::new(publication)
    }

    #[test]
    fn test_filter_composability() {
        // Pattern "^/foo/.*" over {/foo/a, /bar/b} yields only /foo/a
        let subscription = subscription("^/foo/.*");
        let transport = RecordingTransport::default();
        let mut cache = DiffNotificationCache::new(peer());
        let mut budget = 10_000u64;

        let sent = subscription
            .notify_updated(
                &[publication("/foo/a", 1), publication("/bar/b", 1)],
                0,
                &RelationshipOracle,
                &mut cache,
                &mut budget,
                &transport,
            )
            .unwrap();

        assert_eq!(sent, 1);
        let sent_batches = transport.sent.lock();
        assert_eq!(sent_batches.len(), 1);
        let (destination, batch) = &sent_batches[0];
        assert_eq!(destination.as_str(), "bob/laptop");
        assert_eq!(batch.entries.len(), 1);
        assert_eq!(batch.entries[0].meta.name.as_str(), "/foo/a");
    }

    #[test]
    fn test_empty_survivor_set_produces_no_traffic() {
        let subscription = subscription("^/foo/.*");
        let transport = RecordingTransport::default();
        let mut cache = DiffNotificationCache::new(peer());
        let mut budget = 10_000u64;

        let sent = subscription
            .notify_updated(
                &[publication("/bar/b", 1)],
                0,
                &RelationshipOracle,
                &mut cache,
                &mut budget,
                &transport,
            )
            .unwrap();

        assert_eq!(sent, 0);
        assert!(transport.sent.lock().is_empty());
        assert_eq!(budget, 10_000);
    }

    #[test]
    fn test_unauthorized_publisher_dropped() {
        let subscription = subscription(".*");
        let transport = RecordingTransport::default();
        let mut cache = DiffNotificationCache::new(peer());
        let mut budget = 10_000u64;

        // Publisher declares only "family"; subscriber declared "friends"
        let publication = Arc::new(Publication::new(
            PublicationName::from("/docs/private"),
            Location::new("alice/desktop"),
            ["family"].into_iter().collect(),
            Arc::new(SmallContent),
        ));

        let sent = subscription
            .notify_updated(
                &[publication],
                0,
                &RelationshipOracle,
                &mut cache,
                &mut budget,
                &transport,
            )
            .unwrap();

        assert_eq!(sent, 0);
        assert!(transport.sent.lock().is_empty());
    }

    #[test]
    fn test_expired_publication_not_offered() {
        let subscription = subscription(".*");
        let transport = RecordingTransport::default();
        let mut cache = DiffNotificationCache::new(peer());
        let mut budget = 10_000u64;

        let expired = {
            let publication = Publication::new(
                PublicationName::from("/docs/old"),
                Location::new("alice/desktop"),
                ["friends"].into_iter().collect(),
                Arc::new(SmallContent),
            )
            .with_expiry(1_000);
            Arc::new(publication)
        };

        let sent = subscription
            .notify_updated(
                &[expired],
                2_000,
                &RelationshipOracle,
                &mut cache,
                &mut budget,
                &transport,
            )
            .unwrap();

        assert_eq!(sent, 0);
        assert!(transport.sent.lock().is_empty());
    }

    #[test]
    fn test_update_entries_carry_decided_range() {
        let subscription = subscription(".*");
        let transport = RecordingTransport::default();
        let mut cache = DiffNotificationCache::new(peer());
        let mut budget = 10_000u64;

        let publication = publication("/docs/readme", 5);
        subscription
            .notify_updated(
                &[publication.clone()],
                0,
                &RelationshipOracle,
                &mut cache,
                &mut budget,
                &transport,
            )
            .unwrap();

        // First notification: full document, range 0..=5
        {
            let sent_batches = transport.sent.lock();
            let entry = &sent_batches[0].1.entries[0];
            assert_eq!(entry.meta.base_version, 0);
            assert_eq!(entry.meta.version, 5);
            match &entry.body {
                NotifyBody::Update { from, to, .. } => {
                    assert_eq!((*from, *to), (0, 5));
                }
                NotifyBody::Gone => panic!("expected update body"),
            }
        }

        // Advance and notify again: diff range 6..=8
        publication.advance_to(8).unwrap();
        subscription
            .notify_updated(
                &[publication],
                0,
                &RelationshipOracle,
                &mut cache,
                &mut budget,
                &transport,
            )
            .unwrap();

        let sent_batches = transport.sent.lock();
        let entry = &sent_batches[1].1.entries[0];
        assert_eq!(entry.meta.base_version, 6);
        assert_eq!(entry.meta.version, 8);
    }

    #[test]
    fn test_caught_up_peer_gets_no_second_batch() {
        let subscription = subscription(".*");
        let transport = RecordingTransport::default();
        let mut cache = DiffNotificationCache::new(peer());
        let mut budget = 10_000u64;

        let publication = publication("/docs/readme", 5);
        subscription
            .notify_updated(
                &[publication.clone()],
                0,
                &RelationshipOracle,
                &mut cache,
                &mut budget,
                &transport,
            )
            .unwrap();
        let sent = subscription
            .notify_updated(
                &[publication],
                0,
                &RelationshipOracle,
                &mut cache,
                &mut budget,
                &transport,
            )
            .unwrap();

        assert_eq!(sent, 0);
        assert_eq!(transport.sent.lock().len(), 1);
    }

    #[test]
    fn test_gone_batch_zeroes_versions() {
        let subscription = subscription("^/foo/.*");
        let transport = RecordingTransport::default();

        let sent = subscription
            .notify_gone(
                &[publication("/foo/a", 7), publication("/bar/b", 3)],
                &RelationshipOracle,
                &transport,
            )
            .unwrap();

        assert_eq!(sent, 1);
        let sent_batches = transport.sent.lock();
        let entry = &sent_batches[0].1.entries[0];
        assert_eq!(entry.meta.name.as_str(), "/foo/a");
        assert_eq!(entry.meta.version, 0);
        assert_eq!(entry.meta.base_version, 0);
        assert!(matches!(entry.body, NotifyBody::Gone));
    }

    #[test]
    fn test_budget_shared_across_batch_in_order() {
        let subscription = subscription(".*");
        let transport = RecordingTransport::default();
        let mut cache = DiffNotificationCache::new(peer());

        // Budget fits the first full document (100) but not the second
        let mut budget = 150u64;
        let sent = subscription
            .notify_updated(
                &[publication("/docs/a", 1), publication("/docs/b", 1)],
                0,
                &RelationshipOracle,
                &mut cache,
                &mut budget,
                &transport,
            )
            .unwrap();

        assert_eq!(sent, 1);
        assert_eq!(budget, 50);
        // The skipped publication has no cache entry and can retry later
        assert!(cache.entry(&PublicationName::from("/docs/b")).is_none());
    }
}
