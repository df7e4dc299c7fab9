//! Outgoing peer subscriptions
//!
//! An outgoing subscription is this side's registered interest in a remote
//! peer's publications. Registration and graceful shutdown are correlated
//! request/reply round-trips through the monitor, with the same
//! reply/timeout/cancel discipline as the request operations. While the
//! shutdown round-trip is outstanding the subscription holds a reference
//! to itself so it stays alive until the remote side acknowledges.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::{FilterDescriptor, SubscriptionFilter, SubscriptionState};
use crate::monitor::{Monitor, MonitorToken, ReplyHandler};
use crate::protocol::{ReplyMessage, RequestMessage};
use crate::repository::Repository;
use crate::types::{Location, RequestId, SubscriptionId};

/// Receives lifecycle notifications for an outgoing subscription
pub trait OutgoingSubscriptionDelegate: Send + Sync {
    /// The remote peer confirmed the subscription
    fn on_established(&self, subscription: &OutgoingPeerSubscription);

    /// The subscription reached its terminal state after a cancel
    fn on_shutdown(&self, subscription: &OutgoingPeerSubscription);

    /// The subscribe request failed; the subscription is terminal
    fn on_failed(&self, subscription: &OutgoingPeerSubscription, code: Option<u16>, reason: &str);
}

struct OutgoingInner {
    state: SubscriptionState,
    delegate: Option<Weak<dyn OutgoingSubscriptionDelegate>>,
    token: Option<MonitorToken>,
    /// Held while the unsubscribe round-trip is outstanding so the object
    /// survives until the remote side acknowledges
    keep_alive: Option<Arc<OutgoingPeerSubscription>>,
}

/// This side's registered interest in a remote peer's publications
pub struct OutgoingPeerSubscription {
    id: SubscriptionId,
    peer: Location,
    filter: SubscriptionFilter,
    timeout: Duration,
    monitor: Arc<dyn Monitor>,
    repository: Weak<Repository>,
    /// Upgraded when the object must outlive its external handles
    self_weak: Weak<OutgoingPeerSubscription>,
    inner: Mutex<OutgoingInner>,
}

impl OutgoingPeerSubscription {
    pub(crate) fn new(
        id: SubscriptionId,
        peer: Location,
        filter: SubscriptionFilter,
        timeout: Duration,
        delegate: Weak<dyn OutgoingSubscriptionDelegate>,
        monitor: Arc<dyn Monitor>,
        repository: Weak<Repository>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_weak| Self {
            id,
            peer,
            filter,
            timeout,
            monitor,
            repository,
            self_weak: self_weak.clone(),
            inner: Mutex::new(OutgoingInner {
                state: SubscriptionState::Pending,
                delegate: Some(delegate),
                token: None,
                keep_alive: None,
            }),
        })
    }

    /// Dispatch the subscribe request to the remote peer
    pub(crate) fn start(&self) {
        let request = RequestMessage::Subscribe {
            request_id: RequestId::new(),
            peer: self.peer.clone(),
            filter: self.filter.descriptor(),
        };
        let handler: Weak<dyn ReplyHandler> = self.self_weak.clone();
        let token = self.monitor.start_request(request, self.timeout, handler);
        self.store_token(token);
    }

    fn store_token(&self, token: MonitorToken) {
        let stale = {
            let mut inner = self.inner.lock();
            if inner.state == SubscriptionState::Shutdown {
                true
            } else {
                inner.token = Some(token);
                false
            }
        };
        if stale {
            self.monitor.cancel(token);
        }
    }

    /// Identifier of this subscription
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The remote peer this subscription targets
    pub fn peer(&self) -> &Location {
        &self.peer
    }

    /// The compiled filter
    pub fn filter(&self) -> &SubscriptionFilter {
        &self.filter
    }

    /// Filter descriptor, for diagnostics
    pub fn source(&self) -> FilterDescriptor {
        self.filter.descriptor()
    }

    /// Current lifecycle state
    pub fn state(&self) -> SubscriptionState {
        self.inner.lock().state
    }

    /// Cancel the subscription
    ///
    /// Idempotent. While pending, the outstanding subscribe request is
    /// released and the subscription shuts down immediately. Once
    /// established, a graceful unsubscribe round-trip runs first; the
    /// subscription keeps itself alive until the acknowledgement (or its
    /// timeout) arrives.
    pub fn cancel(&self) {
        enum Action {
            DropPending(Option<MonitorToken>),
            SendUnsubscribe,
            Nothing,
        }

        let action = {
            let mut inner = self.inner.lock();
            match inner.state {
                SubscriptionState::Pending => {
                    inner.state = SubscriptionState::Shutdown;
                    Action::DropPending(inner.token.take())
                }
                SubscriptionState::Established => {
                    inner.state = SubscriptionState::ShuttingDown;
                    inner.keep_alive = self.self_weak.upgrade();
                    Action::SendUnsubscribe
                }
                SubscriptionState::ShuttingDown | SubscriptionState::Shutdown => Action::Nothing,
            }
        };

        match action {
            Action::DropPending(token) => {
                if let Some(token) = token {
                    self.monitor.cancel(token);
                }
                debug!(id = %self.id, peer = %self.peer, "Pending subscription cancelled");
                self.settle_shutdown();
            }
            Action::SendUnsubscribe => {
                debug!(id = %self.id, peer = %self.peer, "Requesting graceful unsubscribe");
                let request = RequestMessage::Unsubscribe {
                    request_id: RequestId::new(),
                    peer: self.peer.clone(),
                    subscription: self.id,
                };
                let handler: Weak<dyn ReplyHandler> = self.self_weak.clone();
                let token = self.monitor.start_request(request, self.timeout, handler);
                self.store_token(token);
            }
            Action::Nothing => {}
        }
    }

    /// Remote confirmed the subscription; `Pending` becomes `Established`
    fn establish(&self) {
        let delegate = {
            let mut inner = self.inner.lock();
            if inner.state != SubscriptionState::Pending {
                return;
            }
            inner.state = SubscriptionState::Established;
            inner.token = None;
            inner.delegate.clone()
        };
        info!(id = %self.id, peer = %self.peer, "Peer subscription established");
        if let Some(delegate) = delegate.and_then(|d| d.upgrade()) {
            delegate.on_established(self);
        }
        if let Some(repository) = self.repository.upgrade() {
            repository.subscription_established(self.id);
        }
    }

    /// The subscribe request failed; the subscription is terminal
    fn fail(&self, code: Option<u16>, reason: &str) {
        let (delegate, keep_alive) = {
            let mut inner = self.inner.lock();
            inner.state = SubscriptionState::Shutdown;
            inner.token = None;
            (inner.delegate.take(), inner.keep_alive.take())
        };
        debug!(id = %self.id, peer = %self.peer, reason, "Peer subscription failed");
        if let Some(delegate) = delegate.and_then(|d| d.upgrade()) {
            delegate.on_failed(self, code, reason);
        }
        if let Some(repository) = self.repository.upgrade() {
            repository.subscription_finished(self.id);
        }
        drop(keep_alive);
    }

    /// Terminal transition after a cancel, releasing the self-reference
    fn settle_shutdown(&self) {
        let (delegate, keep_alive) = {
            let mut inner = self.inner.lock();
            inner.state = SubscriptionState::Shutdown;
            inner.token = None;
            (inner.delegate.take(), inner.keep_alive.take())
        };
        if let Some(delegate) = delegate.and_then(|d| d.upgrade()) {
            delegate.on_shutdown(self);
        }
        if let Some(repository) = self.repository.upgrade() {
            repository.subscription_finished(self.id);
        }
        // Callers reach this method through a strong reference, so
        // releasing the self-reference here cannot free the object
        // mid-call.
        drop(keep_alive);
    }
}

impl ReplyHandler for OutgoingPeerSubscription {
    fn on_reply(&self, token: MonitorToken, reply: &ReplyMessage) -> bool {
        let state = {
            let inner = self.inner.lock();
            if inner.token != Some(token) {
                return false;
            }
            inner.state
        };

        match (state, reply) {
            (SubscriptionState::Pending, ReplyMessage::SubscribeOk { .. }) => {
                self.establish();
                true
            }
            (SubscriptionState::Pending, ReplyMessage::Error { code, reason, .. }) => {
                self.fail(Some(*code), reason);
                true
            }
            (SubscriptionState::ShuttingDown, ReplyMessage::UnsubscribeOk { .. }) => {
                self.settle_shutdown();
                true
            }
            (SubscriptionState::ShuttingDown, ReplyMessage::Error { .. }) => {
                // Remote would not process the unsubscribe; the interest
                // is gone either way.
                self.settle_shutdown();
                true
            }
            _ => false,
        }
    }

    fn on_timeout(&self, token: MonitorToken) {
        let state = {
            let inner = self.inner.lock();
            if inner.token != Some(token) {
                return;
            }
            inner.state
        };

        match state {
            SubscriptionState::Pending => self.fail(None, "no reply within timeout"),
            SubscriptionState::ShuttingDown => {
                // Acknowledgement lost; stop holding ourselves alive
                self.settle_shutdown();
            }
            _ => {}
        }
    }
}

impl Drop for OutgoingPeerSubscription {
    fn drop(&mut self) {
        if let Some(token) = self.inner.get_mut().token.take() {
            self.monitor.cancel(token);
        }
    }
}

impl fmt::Debug for OutgoingPeerSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutgoingPeerSubscription")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state())
            .finish()
    }
}
