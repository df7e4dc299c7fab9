//! Publication repository - the primary entry point for PubSync
//!
//! The repository owns the tables of active operations, subscriptions, and
//! per-peer notification caches, and is the only component that invokes
//! the monitor and authorization collaborators. Application code asks it
//! to fetch, publish, or remove publications and to register
//! subscriptions; inbound network events enter through the
//! `on_publication_changed` / `on_publication_removed` /
//! `on_incoming_subscribe_request` entry points.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │  Repository                                                    │
//! │  ├── operations: HashMap<RequestId, Arc<RequestOperation>>     │
//! │  │   └── pending fetch/publish/remove, removed on completion   │
//! │  ├── local/outgoing subscriptions: by SubscriptionId           │
//! │  ├── incoming subscriptions: by PeerSource                     │
//! │  ├── peer_caches: HashMap<PeerSource, DiffNotificationCache>   │
//! │  │   └── last-notified version per (peer, publication)         │
//! │  └── event_tx: broadcast::Sender<RepoEvent>                    │
//! │      └── diagnostics tap, distinct from per-operation delegates│
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Operations and subscriptions hold only weak back-references to the
//! repository; the repository owns them through its tables until they
//! complete and report back.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::authorization::AuthorizationOracle;
use crate::cache::DiffNotificationCache;
use crate::error::{PubSyncError, PubSyncResult};
use crate::monitor::{Monitor, ReplyHandler};
use crate::operation::{OperationDelegate, OperationTarget, RequestOperation};
use crate::protocol::{PublicationDescriptor, RequestMessage};
use crate::publication::{Publication, PublicationRecord};
use crate::subscription::{
    FilterDescriptor, IncomingPeerSubscription, LocalSubscription, LocalSubscriptionDelegate,
    OutgoingPeerSubscription, OutgoingSubscriptionDelegate, SubscriptionFilter,
};
use crate::transport::NotifyTransport;
use crate::types::{
    Location, PeerSource, PublicationName, RelationshipSet, RequestId, SubscriptionId,
};

/// Default capacity for the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default shared byte budget for one notification batch to one peer
const DEFAULT_NOTIFY_BUDGET_BYTES: u64 = 64 * 1024;

/// Tunables for a repository
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// The local location publications and subscriptions belong to
    pub local_location: Location,
    /// Shared byte budget for one notification batch to one peer source
    pub notify_budget_bytes: u64,
}

impl RepositoryConfig {
    /// Config with defaults for the given local location
    pub fn new(local_location: Location) -> Self {
        Self {
            local_location,
            notify_budget_bytes: DEFAULT_NOTIFY_BUDGET_BYTES,
        }
    }

    /// Override the per-batch notification byte budget
    pub fn with_notify_budget(mut self, bytes: u64) -> Self {
        self.notify_budget_bytes = bytes;
        self
    }
}

/// Events emitted by the repository
///
/// A diagnostics tap for embedders; authoritative completion always goes
/// through the delegate of the operation or subscription it belongs to.
#[derive(Debug, Clone)]
pub enum RepoEvent {
    /// A fetch/publish/remove operation completed
    OperationCompleted {
        /// Correlation id of the operation
        id: RequestId,
        /// Whether the remote party reported success
        succeeded: bool,
    },
    /// A fetched document became available
    PublicationAvailable {
        /// The fetched snapshot
        record: PublicationRecord,
    },
    /// A publication change was fanned out to subscribers
    PublicationChanged {
        /// Name of the changed publication
        name: PublicationName,
        /// Version after the change
        version: u64,
    },
    /// A publication removal was fanned out to subscribers
    PublicationRemoved {
        /// Name of the removed publication
        name: PublicationName,
    },
    /// An outgoing or local subscription was confirmed
    SubscriptionEstablished {
        /// The subscription
        id: SubscriptionId,
    },
    /// An outgoing or local subscription reached its terminal state
    SubscriptionShutdown {
        /// The subscription
        id: SubscriptionId,
    },
    /// A remote peer registered interest
    PeerSubscribed {
        /// The subscribing peer source
        peer: PeerSource,
    },
    /// A remote peer withdrew its interest
    PeerUnsubscribed {
        /// The peer source that unsubscribed
        peer: PeerSource,
    },
}

struct RepositoryInner {
    operations: HashMap<RequestId, Arc<RequestOperation>>,
    local_subscriptions: HashMap<SubscriptionId, Arc<LocalSubscription>>,
    outgoing_subscriptions: HashMap<SubscriptionId, Arc<OutgoingPeerSubscription>>,
    incoming_subscriptions: HashMap<PeerSource, Arc<IncomingPeerSubscription>>,
    peer_caches: HashMap<PeerSource, DiffNotificationCache>,
    shutdown: bool,
}

/// Publication synchronization repository
///
/// # Example
///
/// ```ignore
/// use pubsync_core::{Repository, RepositoryConfig, PublicationDescriptor};
///
/// let repository = Repository::new(
///     RepositoryConfig::new(Location::new("alice/desktop")),
///     monitor,
///     oracle,
///     transport,
/// );
///
/// let fetch = repository.fetch(
///     Arc::downgrade(&delegate) as _,
///     PublicationDescriptor::named("/docs/readme"),
///     Duration::from_secs(10),
/// )?;
/// ```
pub struct Repository {
    config: RepositoryConfig,
    monitor: Arc<dyn Monitor>,
    oracle: Arc<dyn AuthorizationOracle>,
    transport: Arc<dyn NotifyTransport>,
    event_tx: broadcast::Sender<RepoEvent>,
    /// Handed to owned operations/subscriptions as their back-reference
    self_weak: Weak<Repository>,
    inner: Mutex<RepositoryInner>,
}

impl Repository {
    /// Create a repository wired to its collaborators
    pub fn new(
        config: RepositoryConfig,
        monitor: Arc<dyn Monitor>,
        oracle: Arc<dyn AuthorizationOracle>,
        transport: Arc<dyn NotifyTransport>,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        info!(location = %config.local_location, "Initializing repository");
        Arc::new_cyclic(|self_weak| Self {
            config,
            monitor,
            oracle,
            transport,
            event_tx,
            self_weak: self_weak.clone(),
            inner: Mutex::new(RepositoryInner {
                operations: HashMap::new(),
                local_subscriptions: HashMap::new(),
                outgoing_subscriptions: HashMap::new(),
                incoming_subscriptions: HashMap::new(),
                peer_caches: HashMap::new(),
                shutdown: false,
            }),
        })
    }

    /// The local location this repository serves
    pub fn local_location(&self) -> &Location {
        &self.config.local_location
    }

    /// Subscribe to repository events
    ///
    /// Multiple subscribers can exist; events are broadcast to all.
    pub fn events(&self) -> broadcast::Receiver<RepoEvent> {
        self.event_tx.subscribe()
    }

    // ------------------------------------------------------------------
    // Request operations
    // ------------------------------------------------------------------

    /// Fetch a publication document from the network
    pub fn fetch(
        &self,
        delegate: Weak<dyn OperationDelegate>,
        descriptor: PublicationDescriptor,
        timeout: Duration,
    ) -> PubSyncResult<Arc<RequestOperation>> {
        let id = RequestId::new();
        let request = RequestMessage::Fetch {
            request_id: id,
            descriptor: descriptor.clone(),
        };
        self.start_operation(id, OperationTarget::Fetch { descriptor }, delegate, request, timeout)
    }

    /// Publish a locally owned publication
    ///
    /// The offered range starts at the publication's base version; on
    /// success the operation advances the base version past the range the
    /// remote party confirmed.
    pub fn publish(
        &self,
        delegate: Weak<dyn OperationDelegate>,
        publication: Arc<Publication>,
        timeout: Duration,
    ) -> PubSyncResult<Arc<RequestOperation>> {
        let id = RequestId::new();
        let request = RequestMessage::Publish {
            request_id: id,
            meta: publication.metadata(),
            from_version: publication.base_version(),
        };
        self.start_operation(
            id,
            OperationTarget::Publish { publication },
            delegate,
            request,
            timeout,
        )
    }

    /// Remove a publication
    pub fn remove(
        &self,
        delegate: Weak<dyn OperationDelegate>,
        publication: Arc<Publication>,
        timeout: Duration,
    ) -> PubSyncResult<Arc<RequestOperation>> {
        let id = RequestId::new();
        let request = RequestMessage::Remove {
            request_id: id,
            meta: publication.metadata(),
        };
        self.start_operation(
            id,
            OperationTarget::Remove { publication },
            delegate,
            request,
            timeout,
        )
    }

    fn start_operation(
        &self,
        id: RequestId,
        target: OperationTarget,
        delegate: Weak<dyn OperationDelegate>,
        request: RequestMessage,
        timeout: Duration,
    ) -> PubSyncResult<Arc<RequestOperation>> {
        let operation = {
            let mut inner = self.inner.lock();
            if inner.shutdown {
                return Err(PubSyncError::Shutdown);
            }
            let operation = Arc::new(RequestOperation::new(
                id,
                target,
                delegate,
                self.monitor.clone(),
                self.self_weak.clone(),
            ));
            inner.operations.insert(id, operation.clone());
            operation
        };

        debug!(%id, kind = ?operation.kind(), "Starting operation");
        let handler = Arc::downgrade(&operation) as Weak<dyn ReplyHandler>;
        let token = self.monitor.start_request(request, timeout, handler);
        operation.set_monitor_token(token);
        Ok(operation)
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    /// Register an in-process interest in publications matching `pattern`
    pub fn subscribe_local(
        &self,
        delegate: Weak<dyn LocalSubscriptionDelegate>,
        pattern: &str,
        relationships: RelationshipSet,
    ) -> PubSyncResult<Arc<LocalSubscription>> {
        let filter = SubscriptionFilter::new(pattern, relationships)?;
        let id = SubscriptionId::new();
        let subscription = {
            let mut inner = self.inner.lock();
            if inner.shutdown {
                return Err(PubSyncError::Shutdown);
            }
            let subscription = Arc::new(LocalSubscription::new(
                id,
                self.config.local_location.clone(),
                filter,
                delegate,
                self.self_weak.clone(),
            ));
            inner.local_subscriptions.insert(id, subscription.clone());
            subscription
        };

        // Local interest needs no round-trip
        subscription.establish();
        debug!(%id, pattern, "Local subscription established");
        let _ = self.event_tx.send(RepoEvent::SubscriptionEstablished { id });
        Ok(subscription)
    }

    /// Register interest in a remote peer's publications
    pub fn subscribe_peer(
        &self,
        delegate: Weak<dyn OutgoingSubscriptionDelegate>,
        peer: Location,
        pattern: &str,
        relationships: RelationshipSet,
        timeout: Duration,
    ) -> PubSyncResult<Arc<OutgoingPeerSubscription>> {
        let filter = SubscriptionFilter::new(pattern, relationships)?;
        let id = SubscriptionId::new();
        let subscription = {
            let mut inner = self.inner.lock();
            if inner.shutdown {
                return Err(PubSyncError::Shutdown);
            }
            let subscription = OutgoingPeerSubscription::new(
                id,
                peer,
                filter,
                timeout,
                delegate,
                self.monitor.clone(),
                self.self_weak.clone(),
            );
            inner
                .outgoing_subscriptions
                .insert(id, subscription.clone());
            subscription
        };

        subscription.start();
        Ok(subscription)
    }

    // ------------------------------------------------------------------
    // Inbound network events
    // ------------------------------------------------------------------

    /// A remote peer registered interest in this side's publications
    ///
    /// Re-registration from the same peer source replaces the previous
    /// filter; the peer's notification cache is kept so re-subscribing
    /// does not resend full documents.
    pub fn on_incoming_subscribe_request(
        &self,
        peer: PeerSource,
        descriptor: FilterDescriptor,
    ) -> PubSyncResult<()> {
        let filter = SubscriptionFilter::from_descriptor(&descriptor)?;
        {
            let mut inner = self.inner.lock();
            if inner.shutdown {
                return Err(PubSyncError::Shutdown);
            }
            inner.incoming_subscriptions.insert(
                peer.clone(),
                Arc::new(IncomingPeerSubscription::new(peer.clone(), filter)),
            );
            inner
                .peer_caches
                .entry(peer.clone())
                .or_insert_with(|| DiffNotificationCache::new(peer.clone()));
        }
        info!(%peer, pattern = %descriptor.pattern, "Incoming peer subscription registered");
        let _ = self.event_tx.send(RepoEvent::PeerSubscribed { peer });
        Ok(())
    }

    /// A remote peer withdrew its interest
    ///
    /// The peer's notification cache stays in place; its entries are
    /// bounded by the repository's lifetime and remain valid if the peer
    /// re-subscribes.
    pub fn on_incoming_unsubscribe_request(&self, peer: &PeerSource) -> bool {
        let removed = {
            let mut inner = self.inner.lock();
            inner.incoming_subscriptions.remove(peer)
        };
        match removed {
            Some(_) => {
                info!(%peer, "Incoming peer subscription withdrawn");
                let _ = self.event_tx.send(RepoEvent::PeerUnsubscribed { peer: peer.clone() });
                true
            }
            None => {
                debug!(%peer, "Unsubscribe for unknown peer source ignored");
                false
            }
        }
    }

    /// A publication changed; fan the change out to matching subscribers
    pub fn on_publication_changed(&self, publication: &Arc<Publication>) {
        self.on_publications_changed(std::slice::from_ref(publication));
    }

    /// A batch of publications changed, in caller-determined order
    ///
    /// Local subscriptions receive metadata through their delegates; each
    /// incoming peer subscription renders one notification batch against
    /// its peer's diff cache under a fresh byte budget. A publication that
    /// does not fit a peer's remaining budget is skipped for that peer
    /// without aborting the rest of the batch.
    pub fn on_publications_changed(&self, publications: &[Arc<Publication>]) {
        let now = chrono::Utc::now().timestamp();

        let locals = self.snapshot_locals();
        for publication in publications {
            if publication.is_expired(now) {
                debug!(name = %publication.name(), "Expired publication not fanned out");
                continue;
            }
            let meta = publication.metadata();
            for subscription in &locals {
                if self.eligible_local(subscription, publication) {
                    subscription.notify_changed(&meta);
                }
            }
        }

        self.fan_out_incoming(publications, now);

        for publication in publications {
            let _ = self.event_tx.send(RepoEvent::PublicationChanged {
                name: publication.name().clone(),
                version: publication.current_version(),
            });
        }
    }

    /// A publication was removed; notify matching subscribers it is gone
    pub fn on_publication_removed(&self, publication: &Arc<Publication>) {
        self.on_publications_removed(std::slice::from_ref(publication));
    }

    /// A batch of publications was removed, in caller-determined order
    pub fn on_publications_removed(&self, publications: &[Arc<Publication>]) {
        let locals = self.snapshot_locals();
        for publication in publications {
            let meta = publication.metadata().as_gone();
            for subscription in &locals {
                if self.eligible_local(subscription, publication) {
                    subscription.notify_removed(&meta);
                }
            }
        }

        let incoming = {
            let inner = self.inner.lock();
            inner
                .incoming_subscriptions
                .values()
                .cloned()
                .collect::<Vec<_>>()
        };
        for subscription in incoming {
            if let Err(error) =
                subscription.notify_gone(publications, self.oracle.as_ref(), self.transport.as_ref())
            {
                warn!(peer = %subscription.peer(), %error, "Gone notification failed");
            }
        }

        for publication in publications {
            let _ = self.event_tx.send(RepoEvent::PublicationRemoved {
                name: publication.name().clone(),
            });
        }
    }

    fn snapshot_locals(&self) -> Vec<Arc<LocalSubscription>> {
        let inner = self.inner.lock();
        inner.local_subscriptions.values().cloned().collect()
    }

    fn eligible_local(&self, subscription: &LocalSubscription, publication: &Publication) -> bool {
        subscription.filter().matches(publication.name())
            && self.oracle.authorized(
                publication.creator(),
                publication.relationships(),
                subscription.subscriber(),
                subscription.filter().relationships(),
            )
    }

    fn fan_out_incoming(&self, publications: &[Arc<Publication>], now: i64) {
        let mut inner = self.inner.lock();
        let subscriptions: Vec<Arc<IncomingPeerSubscription>> =
            inner.incoming_subscriptions.values().cloned().collect();
        for subscription in subscriptions {
            let cache = inner
                .peer_caches
                .entry(subscription.peer().clone())
                .or_insert_with(|| DiffNotificationCache::new(subscription.peer().clone()));
            let mut budget = self.config.notify_budget_bytes;
            if let Err(error) = subscription.notify_updated(
                publications,
                now,
                self.oracle.as_ref(),
                cache,
                &mut budget,
                self.transport.as_ref(),
            ) {
                warn!(peer = %subscription.peer(), %error, "Change notification failed");
            }
        }
    }

    // ------------------------------------------------------------------
    // Completion callbacks from owned objects
    // ------------------------------------------------------------------

    /// An operation completed and can leave the pending table
    pub(crate) fn operation_finished(&self, id: RequestId) {
        let operation = {
            let mut inner = self.inner.lock();
            inner.operations.remove(&id)
        };
        if let Some(operation) = operation {
            let _ = self.event_tx.send(RepoEvent::OperationCompleted {
                id,
                succeeded: operation.was_successful(),
            });
        }
    }

    /// A successful fetch made a document available
    pub(crate) fn publication_fetched(&self, record: PublicationRecord) {
        debug!(
            name = %record.meta.name, version = record.meta.version,
            "Fetched publication available"
        );
        let _ = self
            .event_tx
            .send(RepoEvent::PublicationAvailable { record });
    }

    /// An outgoing subscription was confirmed by its remote peer
    pub(crate) fn subscription_established(&self, id: SubscriptionId) {
        let _ = self.event_tx.send(RepoEvent::SubscriptionEstablished { id });
    }

    /// A subscription reached its terminal state and can leave its table
    pub(crate) fn subscription_finished(&self, id: SubscriptionId) {
        let (local, outgoing) = {
            let mut inner = self.inner.lock();
            (
                inner.local_subscriptions.remove(&id),
                inner.outgoing_subscriptions.remove(&id),
            )
        };
        if local.is_some() || outgoing.is_some() {
            let _ = self.event_tx.send(RepoEvent::SubscriptionShutdown { id });
        }
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Number of operations awaiting completion
    pub fn pending_operation_count(&self) -> usize {
        self.inner.lock().operations.len()
    }

    /// Number of registered local subscriptions
    pub fn local_subscription_count(&self) -> usize {
        self.inner.lock().local_subscriptions.len()
    }

    /// Number of registered outgoing subscriptions
    pub fn outgoing_subscription_count(&self) -> usize {
        self.inner.lock().outgoing_subscriptions.len()
    }

    /// Peer sources with an active incoming subscription
    pub fn incoming_peers(&self) -> Vec<PeerSource> {
        let inner = self.inner.lock();
        inner.incoming_subscriptions.keys().cloned().collect()
    }

    /// Filter descriptors of all incoming subscriptions, for diagnostics
    pub fn incoming_sources(&self) -> Vec<(PeerSource, FilterDescriptor)> {
        let inner = self.inner.lock();
        inner
            .incoming_subscriptions
            .values()
            .map(|s| (s.peer().clone(), s.source()))
            .collect()
    }

    /// Gracefully shut down, cancelling everything outstanding
    ///
    /// Pending operations complete with a cancellation failure through
    /// their delegates; established outgoing subscriptions begin their
    /// unsubscribe round-trips. Further API calls return
    /// [`PubSyncError::Shutdown`].
    pub fn shutdown(&self) {
        info!(location = %self.config.local_location, "Shutting down repository");
        let (operations, locals, outgoings) = {
            let mut inner = self.inner.lock();
            inner.shutdown = true;
            inner.incoming_subscriptions.clear();
            (
                inner.operations.drain().map(|(_, v)| v).collect::<Vec<_>>(),
                inner
                    .local_subscriptions
                    .drain()
                    .map(|(_, v)| v)
                    .collect::<Vec<_>>(),
                inner
                    .outgoing_subscriptions
                    .drain()
                    .map(|(_, v)| v)
                    .collect::<Vec<_>>(),
            )
        };

        for operation in operations {
            operation.cancel();
        }
        for subscription in locals {
            subscription.cancel();
        }
        for subscription in outgoings {
            subscription.cancel();
        }
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("location", &self.config.local_location)
            .field("pending_operations", &self.pending_operation_count())
            .finish()
    }
}
