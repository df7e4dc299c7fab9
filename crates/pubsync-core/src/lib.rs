//! PubSync Core Library
//!
//! Publication synchronization for a peer-to-peer communication stack:
//! participants publish named, versioned documents; other participants —
//! local application code or remote peers — subscribe to changes matching
//! a name pattern and a relationship policy, and receive only the
//! incremental diff needed to catch up to the latest version.
//!
//! ## Overview
//!
//! The [`Repository`] is the entry point. It owns three kinds of state:
//!
//! - **Request operations** ([`RequestOperation`]): fetch, publish, and
//!   remove round-trips correlated with their network replies by the
//!   external monitor, completing exactly once per operation.
//! - **Subscriptions**: local in-process interests, outgoing interests in
//!   remote peers, and incoming interests registered by remote peers.
//! - **Diff notification caches** ([`DiffNotificationCache`]): one per
//!   remote peer source, tracking the last version notified so changes go
//!   out as diffs under a per-batch byte budget.
//!
//! The wire codec, transport, document diffing, and identity are external
//! collaborators behind the [`Monitor`], [`NotifyTransport`],
//! [`DiffContent`], and [`AuthorizationOracle`] traits.
//!
//! ## Quick Start
//!
//! ```ignore
//! use pubsync_core::{PublicationDescriptor, Repository, RepositoryConfig};
//!
//! let repository = Repository::new(
//!     RepositoryConfig::new(Location::new("alice/desktop")),
//!     monitor,    // request/reply correlation
//!     oracle,     // mutual authorization
//!     transport,  // outbound notification encoding
//! );
//!
//! // Ask the network for a document
//! let fetch = repository.fetch(
//!     Arc::downgrade(&delegate) as _,
//!     PublicationDescriptor::named("/docs/readme"),
//!     Duration::from_secs(10),
//! )?;
//!
//! // Watch local publications from in-process code
//! let subscription = repository.subscribe_local(
//!     Arc::downgrade(&listener) as _,
//!     "^/presence/.*",
//!     relationships,
//! )?;
//! ```

pub mod authorization;
pub mod cache;
pub mod error;
pub mod monitor;
pub mod operation;
pub mod protocol;
pub mod publication;
pub mod repository;
pub mod subscription;
pub mod transport;
pub mod types;

// Re-exports
pub use authorization::{AuthorizationOracle, RelationshipOracle};
pub use cache::{CachedPeerEntry, DiffNotificationCache, NotifyDecision};
pub use error::{PubSyncError, PubSyncResult};
pub use monitor::{Monitor, MonitorToken, ReplyHandler};
pub use operation::{
    ErrorCode, OperationDelegate, OperationOutcome, OperationTarget, RequestOperation,
};
pub use protocol::{
    ProtocolMessage, PublicationDescriptor, ReplyMessage, RequestKind, RequestMessage,
    WireEnvelope,
};
pub use publication::{DiffContent, Publication, PublicationMetaData, PublicationRecord};
pub use repository::{RepoEvent, Repository, RepositoryConfig};
pub use subscription::{
    FilterDescriptor, IncomingPeerSubscription, LocalSubscription, LocalSubscriptionDelegate,
    OutgoingPeerSubscription, OutgoingSubscriptionDelegate, SubscriptionFilter, SubscriptionState,
};
pub use transport::{NotifyBatch, NotifyBody, NotifyEntry, NotifyTransport};
pub use types::*;
