//! Request operations: Fetch, Publish, Remove
//!
//! Each operation is a short-lived state machine owning one outstanding
//! correlated network request. Whichever trigger fires first — reply,
//! timeout, explicit cancel, or drop — drives the operation through a
//! single shared completion path that guarantees the delegate's completion
//! callback fires at most once, with the monitor released before the
//! callback (a late reply can never revive a completed operation).
//!
//! Operations are owned by their [`Repository`](crate::Repository) through
//! a pending table keyed by request id and hold only a weak back-reference
//! to it; the monitor holds a weak reference to the operation.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::monitor::{Monitor, MonitorToken, ReplyHandler};
use crate::protocol::{PublicationDescriptor, ReplyMessage, RequestKind};
use crate::publication::{Publication, PublicationRecord};
use crate::repository::Repository;
use crate::types::RequestId;

/// Why an operation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// A fetch succeeded at the protocol level but carried no document
    NotFound,
    /// No reply arrived within the caller-specified duration
    Timeout,
    /// The operation was cancelled locally before a reply arrived
    Cancelled,
    /// The remote party reported failure with this code
    Remote(u16),
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::NotFound => write!(f, "not found"),
            ErrorCode::Timeout => write!(f, "timeout"),
            ErrorCode::Cancelled => write!(f, "cancelled"),
            ErrorCode::Remote(code) => write!(f, "remote error {}", code),
        }
    }
}

/// Final result of a completed operation
#[derive(Debug, Clone)]
pub struct OperationOutcome {
    /// Whether the remote party reported success
    pub succeeded: bool,
    /// Failure code, when not successful
    pub code: Option<ErrorCode>,
    /// Failure reason, when not successful
    pub reason: Option<String>,
}

impl OperationOutcome {
    /// A successful outcome
    pub fn success() -> Self {
        Self {
            succeeded: true,
            code: None,
            reason: None,
        }
    }

    /// A failed outcome with code and reason
    pub fn failure(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            code: Some(code),
            reason: Some(reason.into()),
        }
    }
}

/// Receives the single completion notification of an operation
///
/// Held behind a weak reference: a delegate released before completion is
/// silently skipped, never treated as an error.
pub trait OperationDelegate: Send + Sync {
    /// The operation completed; `outcome` records success or failure
    fn on_complete(&self, operation: &RequestOperation, outcome: &OperationOutcome);
}

/// What an operation acts on
pub enum OperationTarget {
    /// Fetch a publication document by descriptor
    Fetch {
        /// Which publication to fetch
        descriptor: PublicationDescriptor,
    },
    /// Publish a version range of a locally owned publication
    Publish {
        /// The publication being published
        publication: Arc<Publication>,
    },
    /// Remove a publication
    Remove {
        /// The publication being removed
        publication: Arc<Publication>,
    },
}

impl OperationTarget {
    /// The request method this target maps to
    pub fn kind(&self) -> RequestKind {
        match self {
            OperationTarget::Fetch { .. } => RequestKind::Fetch,
            OperationTarget::Publish { .. } => RequestKind::Publish,
            OperationTarget::Remove { .. } => RequestKind::Remove,
        }
    }
}

impl fmt::Debug for OperationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationTarget::Fetch { descriptor } => {
                f.debug_struct("Fetch").field("name", &descriptor.name).finish()
            }
            OperationTarget::Publish { publication } => f
                .debug_struct("Publish")
                .field("name", publication.name())
                .finish(),
            OperationTarget::Remove { publication } => f
                .debug_struct("Remove")
                .field("name", publication.name())
                .finish(),
        }
    }
}

struct OperationInner {
    /// Completion callback target; cleared when completion is delivered
    delegate: Option<Weak<dyn OperationDelegate>>,
    /// Outstanding monitor registration, if any
    token: Option<MonitorToken>,
    /// Set exactly once by the shared completion path
    outcome: Option<OperationOutcome>,
    /// Fetched document, recorded before a successful fetch completes
    fetched: Option<PublicationRecord>,
}

/// One outstanding fetch/publish/remove request
///
/// Created by the repository, which keeps the strong handle in its pending
/// table until completion. Dropping the last handle without an explicit
/// [`cancel`](RequestOperation::cancel) behaves as if `cancel` was called.
pub struct RequestOperation {
    id: RequestId,
    target: OperationTarget,
    monitor: Arc<dyn Monitor>,
    repository: Weak<Repository>,
    inner: Mutex<OperationInner>,
}

impl RequestOperation {
    pub(crate) fn new(
        id: RequestId,
        target: OperationTarget,
        delegate: Weak<dyn OperationDelegate>,
        monitor: Arc<dyn Monitor>,
        repository: Weak<Repository>,
    ) -> Self {
        Self {
            id,
            target,
            monitor,
            repository,
            inner: Mutex::new(OperationInner {
                delegate: Some(delegate),
                token: None,
                outcome: None,
                fetched: None,
            }),
        }
    }

    /// Record the monitor registration for the dispatched request
    ///
    /// If a trigger already completed the operation, the registration is
    /// released immediately instead.
    pub(crate) fn set_monitor_token(&self, token: MonitorToken) {
        let stale = {
            let mut inner = self.inner.lock();
            if inner.outcome.is_some() {
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

    /// Correlation id of this operation
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// The request method this operation is waiting on
    pub fn kind(&self) -> RequestKind {
        self.target.kind()
    }

    /// What this operation acts on
    pub fn target(&self) -> &OperationTarget {
        &self.target
    }

    /// Whether completion has been delivered
    pub fn is_complete(&self) -> bool {
        self.inner.lock().outcome.is_some()
    }

    /// The recorded result; `None` until the operation completes
    pub fn outcome(&self) -> Option<OperationOutcome> {
        self.inner.lock().outcome.clone()
    }

    /// Whether the remote party reported success; valid once complete
    pub fn was_successful(&self) -> bool {
        self.inner
            .lock()
            .outcome
            .as_ref()
            .map(|o| o.succeeded)
            .unwrap_or(false)
    }

    /// The document a successful fetch carried, if any
    pub fn fetched_publication(&self) -> Option<PublicationRecord> {
        self.inner.lock().fetched.clone()
    }

    /// Cancel the operation
    ///
    /// Idempotent. On first call the monitor is released, the delegate is
    /// notified exactly once (skipped silently if already gone), and the
    /// repository drops the pending entry. Later calls are no-ops.
    pub fn cancel(&self) {
        self.complete(OperationOutcome::failure(
            ErrorCode::Cancelled,
            "operation cancelled",
        ));
    }

    /// Shared completion path; first caller wins
    fn complete(&self, outcome: OperationOutcome) {
        let (token, delegate) = {
            let mut inner = self.inner.lock();
            if inner.outcome.is_some() {
                return;
            }
            inner.outcome = Some(outcome.clone());
            (inner.token.take(), inner.delegate.take())
        };

        // Tear down the monitor before anyone learns of completion so a
        // late reply cannot revive the operation.
        if let Some(token) = token {
            self.monitor.cancel(token);
        }

        debug!(
            id = %self.id, kind = ?self.kind(), succeeded = outcome.succeeded,
            "Operation complete"
        );

        if let Some(delegate) = delegate.and_then(|d| d.upgrade()) {
            delegate.on_complete(self, &outcome);
        }

        if let Some(repository) = self.repository.upgrade() {
            repository.operation_finished(self.id);
        }
    }

    fn handle_success_reply(&self, reply: &ReplyMessage) -> bool {
        match (&self.target, reply) {
            (OperationTarget::Fetch { descriptor }, ReplyMessage::FetchOk { publication, .. }) => {
                match publication {
                    None => {
                        // Protocol-level success without a document
                        self.complete(OperationOutcome::failure(
                            ErrorCode::NotFound,
                            format!("publication {} not found", descriptor.name),
                        ));
                    }
                    Some(record) => {
                        self.inner.lock().fetched = Some(record.clone());
                        if let Some(repository) = self.repository.upgrade() {
                            repository.publication_fetched(record.clone());
                        }
                        self.complete(OperationOutcome::success());
                    }
                }
                true
            }
            (
                OperationTarget::Publish { publication },
                ReplyMessage::PublishOk {
                    confirmed_version, ..
                },
            ) => {
                // Anchor the next diff one past the confirmed range
                publication.set_base_version(confirmed_version + 1);
                self.complete(OperationOutcome::success());
                true
            }
            (OperationTarget::Remove { .. }, ReplyMessage::RemoveOk { .. }) => {
                self.complete(OperationOutcome::success());
                true
            }
            _ => false,
        }
    }
}

impl ReplyHandler for RequestOperation {
    fn on_reply(&self, token: MonitorToken, reply: &ReplyMessage) -> bool {
        {
            let inner = self.inner.lock();
            if inner.outcome.is_some() || inner.token != Some(token) {
                return false;
            }
        }

        if let ReplyMessage::Error { code, reason, .. } = reply {
            self.complete(OperationOutcome::failure(
                ErrorCode::Remote(*code),
                reason.clone(),
            ));
            return true;
        }

        if !reply.answers(self.kind()) {
            // Not our response type; leave it for another waiting party
            return false;
        }

        self.handle_success_reply(reply)
    }

    fn on_timeout(&self, token: MonitorToken) {
        {
            let inner = self.inner.lock();
            if inner.outcome.is_some() || inner.token != Some(token) {
                // Stale timeout from a replaced monitor registration
                return;
            }
        }
        self.complete(OperationOutcome::failure(
            ErrorCode::Timeout,
            "no reply within timeout",
        ));
    }
}

impl Drop for RequestOperation {
    fn drop(&mut self) {
        // A dropped handle behaves as if cancel() was called, so the
        // monitor registration is never leaked.
        self.complete(OperationOutcome::failure(
            ErrorCode::Cancelled,
            "operation dropped",
        ));
    }
}

impl fmt::Debug for RequestOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOperation")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("complete", &self.is_complete())
            .finish()
    }
}
