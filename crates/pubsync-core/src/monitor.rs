//! Request/reply correlation collaborator
//!
//! The monitor is the external primitive that sends one request, watches
//! for its correlated reply, and applies a timeout. For each started
//! request it delivers exactly one of: a reply callback, a timeout
//! callback, or nothing when cancelled first.
//!
//! Handlers are registered as `Weak` references. Once the owning operation
//! completes and is dropped, a late callback upgrades to nothing and is
//! silently discarded; the monitor never observes a dangling owner.

use std::sync::Weak;
use std::time::Duration;

use crate::protocol::{ReplyMessage, RequestMessage};

/// Identifies one outstanding monitored request
///
/// Tokens are minted by the monitor and never reused while the request is
/// outstanding. Callbacks carry the token so a handler can distinguish its
/// own pending request from a stale one it has already replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MonitorToken(pub u64);

/// Callback half of the monitor contract
///
/// Implemented by request operations and outgoing subscriptions; invoked
/// asynchronously on the owning repository's processing context.
pub trait ReplyHandler: Send + Sync {
    /// A correlated reply arrived for `token`
    ///
    /// Returns `true` when the handler claimed the reply. A handler must
    /// return `false` for replies that do not answer its pending method so
    /// another waiting party may still claim them.
    fn on_reply(&self, token: MonitorToken, reply: &ReplyMessage) -> bool;

    /// No reply arrived for `token` within the request's timeout
    fn on_timeout(&self, token: MonitorToken);
}

/// Dispatches requests and correlates replies
///
/// For every `start_request` the implementation delivers exactly one of
/// {reply, timeout, cancelled-before-either} to the registered handler.
/// Sends are fire-and-forget from the core's perspective: `start_request`
/// never blocks on network progress.
pub trait Monitor: Send + Sync {
    /// Dispatch `request` and register interest in its correlated reply
    fn start_request(
        &self,
        request: RequestMessage,
        timeout: Duration,
        handler: Weak<dyn ReplyHandler>,
    ) -> MonitorToken;

    /// Stop watching for the reply to a previously started request
    ///
    /// After cancellation no further callback is delivered for the token.
    /// Cancelling an unknown or already-settled token is a no-op.
    fn cancel(&self, token: MonitorToken);
}
