//! In-process subscriptions

use std::sync::Weak;

use parking_lot::Mutex;
use tracing::debug;

use super::{FilterDescriptor, SubscriptionFilter, SubscriptionState};
use crate::publication::PublicationMetaData;
use crate::repository::Repository;
use crate::types::{Location, SubscriptionId};

/// Receives change notifications for a local subscription
///
/// Held behind a weak reference; a delegate released before shutdown is
/// silently skipped.
pub trait LocalSubscriptionDelegate: Send + Sync {
    /// A matching, authorized publication changed
    fn on_publication_changed(&self, meta: &PublicationMetaData);

    /// A matching, authorized publication was removed
    fn on_publication_removed(&self, meta: &PublicationMetaData);
}

struct LocalInner {
    state: SubscriptionState,
    delegate: Option<Weak<dyn LocalSubscriptionDelegate>>,
}

/// An in-process interest registration, not involving the network
///
/// Local interest needs no confirmation round-trip: the repository
/// establishes the subscription at registration time, and `cancel()`
/// moves it straight to `Shutdown`.
pub struct LocalSubscription {
    id: SubscriptionId,
    subscriber: Location,
    filter: SubscriptionFilter,
    repository: Weak<Repository>,
    inner: Mutex<LocalInner>,
}

impl LocalSubscription {
    pub(crate) fn new(
        id: SubscriptionId,
        subscriber: Location,
        filter: SubscriptionFilter,
        delegate: Weak<dyn LocalSubscriptionDelegate>,
        repository: Weak<Repository>,
    ) -> Self {
        Self {
            id,
            subscriber,
            filter,
            repository,
            inner: Mutex::new(LocalInner {
                state: SubscriptionState::Pending,
                delegate: Some(delegate),
            }),
        }
    }

    /// Identifier of this subscription
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The local location this subscription was registered for
    pub fn subscriber(&self) -> &Location {
        &self.subscriber
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

    /// Confirm local interest; `Pending` becomes `Established`
    pub(crate) fn establish(&self) {
        let mut inner = self.inner.lock();
        if inner.state == SubscriptionState::Pending {
            inner.state = SubscriptionState::Established;
        }
    }

    /// Cancel the subscription
    ///
    /// Idempotent; local subscriptions shut down unconditionally, without
    /// a round-trip.
    pub fn cancel(&self) {
        let delegate = {
            let mut inner = self.inner.lock();
            if inner.state == SubscriptionState::Shutdown {
                return;
            }
            inner.state = SubscriptionState::Shutdown;
            inner.delegate.take()
        };
        debug!(id = %self.id, "Local subscription shut down");
        // Delegate is dropped without a callback: local cancellation is
        // caller-initiated, so the caller already knows.
        drop(delegate);
        if let Some(repository) = self.repository.upgrade() {
            repository.subscription_finished(self.id);
        }
    }

    /// Deliver a change notification if the subscription is established
    pub(crate) fn notify_changed(&self, meta: &PublicationMetaData) {
        let delegate = {
            let inner = self.inner.lock();
            if !inner.state.is_active() {
                return;
            }
            inner.delegate.clone()
        };
        if let Some(delegate) = delegate.and_then(|d| d.upgrade()) {
            delegate.on_publication_changed(meta);
        }
    }

    /// Deliver a removal notification if the subscription is established
    pub(crate) fn notify_removed(&self, meta: &PublicationMetaData) {
        let delegate = {
            let inner = self.inner.lock();
            if !inner.state.is_active() {
                return;
            }
            inner.delegate.clone()
        };
        if let Some(delegate) = delegate.and_then(|d| d.upgrade()) {
            delegate.on_publication_removed(meta);
        }
    }
}

impl Drop for LocalSubscription {
    fn drop(&mut self) {
        // A dropped handle behaves as if cancel() was called; the
        // repository entry is already gone by the time the last strong
        // reference drops, so only the state needs settling.
        self.inner.get_mut().state = SubscriptionState::Shutdown;
    }
}
