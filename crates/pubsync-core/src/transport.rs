//! Outbound notification transport collaborator
//!
//! The core hands the transport one ordered batch of notification entries
//! per destination. Wire serialization — including splitting an oversized
//! batch into a chain of linked documents — is the transport's job; the
//! core only guarantees the batch arrives as a single logical ordered list
//! so that chaining is possible.

use std::sync::Arc;

use crate::error::PubSyncResult;
use crate::publication::{Publication, PublicationMetaData};
use crate::types::Location;

/// Body of one notification entry
#[derive(Clone)]
pub enum NotifyBody {
    /// The publication changed; encode the version range `from..=to`
    ///
    /// The publication handle is carried so the transport can ask the
    /// document model for the actual payload at encode time. `from == 0`
    /// means the full document.
    Update {
        /// The changed publication
        publication: Arc<Publication>,
        /// First version of the range
        from: u64,
        /// Last version of the range
        to: u64,
    },
    /// The publication no longer exists
    Gone,
}

impl std::fmt::Debug for NotifyBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyBody::Update { from, to, .. } => f
                .debug_struct("Update")
                .field("from", from)
                .field("to", to)
                .finish(),
            NotifyBody::Gone => write!(f, "Gone"),
        }
    }
}

/// One entry of a notification batch
#[derive(Debug, Clone)]
pub struct NotifyEntry {
    /// Metadata of the publication this entry describes
    ///
    /// For `Gone` entries, version and base version are zero.
    pub meta: PublicationMetaData,
    /// What to encode for this entry
    pub body: NotifyBody,
}

/// An ordered batch of notification entries for one destination
#[derive(Debug, Clone, Default)]
pub struct NotifyBatch {
    /// Entries in caller-determined order
    pub entries: Vec<NotifyEntry>,
}

impl NotifyBatch {
    /// Number of entries in the batch
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the batch carries no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Accepts outbound notification batches
///
/// Sends are fire-and-forget; a transport failure is surfaced to the
/// caller of the batch but never retried by the core.
pub trait NotifyTransport: Send + Sync {
    /// Encode and deliver `batch` to `destination`
    fn send_notify(&self, destination: &Location, batch: NotifyBatch) -> PubSyncResult<()>;
}
