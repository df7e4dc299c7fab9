//! Subscription bookkeeping for the three subscriber kinds
//!
//! - [`LocalSubscription`]: an in-process interest registration
//! - [`OutgoingPeerSubscription`]: this side's registered interest in a
//!   remote peer's publications, with a correlated subscribe round-trip
//! - [`IncomingPeerSubscription`]: a remote peer's registered interest in
//!   this side's publications; renders batched change notifications
//!
//! All three share the [`SubscriptionFilter`] contract: a publication
//! change is eligible for a subscription iff the name matches the filter's
//! precompiled regex AND the authorization oracle approves the
//! publisher/subscriber pair.

mod filter;
mod incoming;
mod local;
mod outgoing;

use std::fmt;

pub use filter::{FilterDescriptor, SubscriptionFilter};
pub use incoming::IncomingPeerSubscription;
pub use local::{LocalSubscription, LocalSubscriptionDelegate};
pub use outgoing::{OutgoingPeerSubscription, OutgoingSubscriptionDelegate};

/// Lifecycle of a local or outgoing subscription
///
/// ```text
/// Pending ──▶ Established ──▶ ShuttingDown ──▶ Shutdown
///    │                                            ▲
///    └────────────────────────────────────────────┘
/// ```
///
/// `ShuttingDown` only occurs for outgoing subscriptions, while the
/// unsubscribe round-trip is outstanding. `Shutdown` is terminal; further
/// `cancel()` calls are no-ops. Incoming subscriptions have no state
/// machine — they exist exactly as long as the remote peer's subscribe
/// request is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Interest registered, not yet confirmed
    Pending,
    /// Interest confirmed; notifications flow
    Established,
    /// Cancellation round-trip outstanding
    ShuttingDown,
    /// Terminal
    Shutdown,
}

impl SubscriptionState {
    /// Whether the subscription has reached its terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubscriptionState::Shutdown)
    }

    /// Whether notifications should be delivered in this state
    pub fn is_active(&self) -> bool {
        matches!(self, SubscriptionState::Established)
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionState::Pending => write!(f, "pending"),
            SubscriptionState::Established => write!(f, "established"),
            SubscriptionState::ShuttingDown => write!(f, "shutting-down"),
            SubscriptionState::Shutdown => write!(f, "shutdown"),
        }
    }
}
