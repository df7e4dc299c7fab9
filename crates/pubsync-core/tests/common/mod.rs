//! Shared test doubles for the integration tests
//!
//! Provides in-memory stand-ins for the external collaborators: a monitor
//! that records requests and lets tests inject replies/timeouts, a
//! transport that records dispatched batches, and fixed-size document
//! content.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use pubsync_core::{
    DiffContent, Location, Monitor, MonitorToken, NotifyBatch, NotifyTransport, OperationDelegate,
    OperationOutcome, Publication, PublicationMetaData, PubSyncResult, RelationshipSet,
    ReplyHandler, ReplyMessage, RequestMessage, RequestOperation,
};

/// One request the stub monitor saw
pub struct StartedRequest {
    pub request: RequestMessage,
    pub timeout: Duration,
    pub token: MonitorToken,
    pub handler: Weak<dyn ReplyHandler>,
}

/// Monitor stub: records requests, lets the test inject replies/timeouts
#[derive(Default)]
pub struct StubMonitor {
    started: Mutex<Vec<StartedRequest>>,
    cancelled: Mutex<Vec<MonitorToken>>,
    next_token: AtomicU64,
}

impl StubMonitor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of requests started so far
    pub fn request_count(&self) -> usize {
        self.started.lock().len()
    }

    /// Clone of the request at `index`
    pub fn request(&self, index: usize) -> RequestMessage {
        self.started.lock()[index].request.clone()
    }

    /// Clone of the most recent request
    pub fn last_request(&self) -> RequestMessage {
        self.started.lock().last().expect("no request started").request.clone()
    }

    /// Tokens that were cancelled
    pub fn cancelled(&self) -> Vec<MonitorToken> {
        self.cancelled.lock().clone()
    }

    /// Deliver a reply for the request at `index`
    ///
    /// Returns whether the handler claimed the reply; `false` also covers
    /// a handler that is already gone.
    pub fn deliver_reply(&self, index: usize, reply: &ReplyMessage) -> bool {
        let (token, handler) = {
            let started = self.started.lock();
            let entry = &started[index];
            (entry.token, entry.handler.clone())
        };
        match handler.upgrade() {
            Some(handler) => handler.on_reply(token, reply),
            None => false,
        }
    }

    /// Deliver a timeout for the request at `index`
    pub fn deliver_timeout(&self, index: usize) {
        let (token, handler) = {
            let started = self.started.lock();
            let entry = &started[index];
            (entry.token, entry.handler.clone())
        };
        if let Some(handler) = handler.upgrade() {
            handler.on_timeout(token);
        }
    }
}

impl Monitor for StubMonitor {
    fn start_request(
        &self,
        request: RequestMessage,
        timeout: Duration,
        handler: Weak<dyn ReplyHandler>,
    ) -> MonitorToken {
        let token = MonitorToken(self.next_token.fetch_add(1, Ordering::SeqCst));
        self.started.lock().push(StartedRequest {
            request,
            timeout,
            token,
            handler,
        });
        token
    }

    fn cancel(&self, token: MonitorToken) {
        self.cancelled.lock().push(token);
    }
}

/// Transport stub recording every dispatched batch
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(Location, NotifyBatch)>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn sent(&self) -> Vec<(Location, NotifyBatch)> {
        self.sent.lock().clone()
    }
}

impl NotifyTransport for RecordingTransport {
    fn send_notify(&self, destination: &Location, batch: NotifyBatch) -> PubSyncResult<()> {
        self.sent.lock().push((destination.clone(), batch));
        Ok(())
    }
}

/// Operation delegate recording every completion it receives
#[derive(Default)]
pub struct CompletionRecorder {
    outcomes: Mutex<Vec<OperationOutcome>>,
}

impl CompletionRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn completion_count(&self) -> usize {
        self.outcomes.lock().len()
    }

    pub fn last_outcome(&self) -> OperationOutcome {
        self.outcomes.lock().last().expect("no completion").clone()
    }
}

impl OperationDelegate for CompletionRecorder {
    fn on_complete(&self, _operation: &RequestOperation, outcome: &OperationOutcome) {
        self.outcomes.lock().push(outcome.clone());
    }
}

/// Local subscription delegate recording delivered metadata
#[derive(Default)]
pub struct LocalListener {
    changed: Mutex<Vec<PublicationMetaData>>,
    removed: Mutex<Vec<PublicationMetaData>>,
}

impl LocalListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn changed(&self) -> Vec<PublicationMetaData> {
        self.changed.lock().clone()
    }

    pub fn removed(&self) -> Vec<PublicationMetaData> {
        self.removed.lock().clone()
    }
}

impl pubsync_core::LocalSubscriptionDelegate for LocalListener {
    fn on_publication_changed(&self, meta: &PublicationMetaData) {
        self.changed.lock().push(meta.clone());
    }
    fn on_publication_removed(&self, meta: &PublicationMetaData) {
        self.removed.lock().push(meta.clone());
    }
}

/// Outgoing subscription delegate recording lifecycle callbacks
#[derive(Default)]
pub struct OutgoingListener {
    pub established: Mutex<usize>,
    pub shutdown: Mutex<usize>,
    pub failed: Mutex<Vec<String>>,
}

impl OutgoingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl pubsync_core::OutgoingSubscriptionDelegate for OutgoingListener {
    fn on_established(&self, _subscription: &pubsync_core::OutgoingPeerSubscription) {
        *self.established.lock() += 1;
    }
    fn on_shutdown(&self, _subscription: &pubsync_core::OutgoingPeerSubscription) {
        *self.shutdown.lock() += 1;
    }
    fn on_failed(
        &self,
        _subscription: &pubsync_core::OutgoingPeerSubscription,
        _code: Option<u16>,
        reason: &str,
    ) {
        self.failed.lock().push(reason.to_string());
    }
}

/// Document content with fixed full and per-version diff sizes
pub struct FixedContent {
    pub full: u64,
    pub per_version: u64,
}

impl DiffContent for FixedContent {
    fn size_of_full(&self) -> u64 {
        self.full
    }
    fn size_of_diff(&self, from: u64, to: u64) -> u64 {
        (to + 1 - from) * self.per_version
    }
    fn full_payload(&self) -> Vec<u8> {
        vec![0xAB; self.full as usize]
    }
    fn diff_payload(&self, from: u64, to: u64) -> Vec<u8> {
        vec![0xCD; ((to + 1 - from) * self.per_version) as usize]
    }
}

/// Publication owned by `creator` with fixed-size content
pub fn make_publication(
    name: &str,
    creator: &str,
    relationships: RelationshipSet,
    version: u64,
    full: u64,
    per_version: u64,
) -> Arc<Publication> {
    let publication = Publication::new(
        name.into(),
        Location::new(creator),
        relationships,
        Arc::new(FixedContent { full, per_version }),
    );
    publication.advance_to(version).expect("monotonic version");
    Arc::new(publication)
}

/// Relationship set from a tag list
pub fn relationships(tags: &[&str]) -> RelationshipSet {
    tags.iter().copied().collect()
}
