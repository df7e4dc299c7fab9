//! Request/reply protocol messages for publication synchronization
//!
//! Messages here are semantic: they carry the fields the engine correlates
//! and acts on. Field-level wire framing, chunking of oversized payloads,
//! and delivery are the transport layer's job.
//!
//! ## Message Flow
//!
//! ```text
//! Application                     Remote party
//!   |                               |
//!   |--- Fetch {name} ------------->|
//!   |<-- FetchOk {record} ----------|
//!   |                               |
//!   |--- Publish {meta, from} ----->|
//!   |<-- PublishOk {confirmed} -----|
//!   |                               |
//!   |--- Subscribe {filter} ------->|
//!   |<-- SubscribeOk ---------------|
//!   |                               |
//!   |    (any request)              |
//!   |<-- Error {code, reason} ------|
//! ```
//!
//! Replies are correlated to requests by [`RequestId`]; a reply whose
//! variant does not answer the pending request's method is left unclaimed
//! so another waiter may still take it.

use serde::{Deserialize, Serialize};

use crate::publication::{PublicationMetaData, PublicationRecord};
use crate::subscription::FilterDescriptor;
use crate::types::{Location, PublicationName, RequestId, SubscriptionId};

/// The request method a pending operation is waiting on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Fetch a publication document
    Fetch,
    /// Publish a document range
    Publish,
    /// Remove a publication
    Remove,
    /// Register interest with a remote peer
    Subscribe,
    /// Withdraw interest from a remote peer
    Unsubscribe,
}

/// Identifies a publication to fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationDescriptor {
    /// Name of the publication
    pub name: PublicationName,
    /// Creator location, when known (narrows the lookup)
    pub creator: Option<Location>,
}

impl PublicationDescriptor {
    /// Descriptor for a publication by name only
    pub fn named(name: impl Into<PublicationName>) -> Self {
        Self {
            name: name.into(),
            creator: None,
        }
    }

    /// Narrow the descriptor to a specific creator location
    pub fn from_creator(mut self, creator: Location) -> Self {
        self.creator = Some(creator);
        self
    }
}

impl From<PublicationName> for PublicationDescriptor {
    fn from(name: PublicationName) -> Self {
        Self::named(name)
    }
}

/// Outbound requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RequestMessage {
    /// Ask a remote party for a publication document
    Fetch {
        /// Correlation id
        request_id: RequestId,
        /// Which publication to fetch
        descriptor: PublicationDescriptor,
    },

    /// Offer a published version range
    ///
    /// The payload travels out of band through the transport; the request
    /// names the range so the remote party can confirm what it applied.
    Publish {
        /// Correlation id
        request_id: RequestId,
        /// Metadata of the publication being published
        meta: PublicationMetaData,
        /// First version of the offered range
        from_version: u64,
    },

    /// Withdraw a publication
    Remove {
        /// Correlation id
        request_id: RequestId,
        /// Metadata of the publication being removed
        meta: PublicationMetaData,
    },

    /// Register interest in a remote peer's publications
    Subscribe {
        /// Correlation id
        request_id: RequestId,
        /// The peer whose publications are of interest
        peer: Location,
        /// Name pattern and relationship filter
        filter: FilterDescriptor,
    },

    /// Withdraw a previously registered interest
    Unsubscribe {
        /// Correlation id
        request_id: RequestId,
        /// The peer the interest was registered with
        peer: Location,
        /// The subscription being withdrawn
        subscription: SubscriptionId,
    },
}

impl RequestMessage {
    /// Correlation id of this request
    pub fn request_id(&self) -> RequestId {
        match self {
            RequestMessage::Fetch { request_id, .. } => *request_id,
            RequestMessage::Publish { request_id, .. } => *request_id,
            RequestMessage::Remove { request_id, .. } => *request_id,
            RequestMessage::Subscribe { request_id, .. } => *request_id,
            RequestMessage::Unsubscribe { request_id, .. } => *request_id,
        }
    }

    /// The method this request carries
    pub fn kind(&self) -> RequestKind {
        match self {
            RequestMessage::Fetch { .. } => RequestKind::Fetch,
            RequestMessage::Publish { .. } => RequestKind::Publish,
            RequestMessage::Remove { .. } => RequestKind::Remove,
            RequestMessage::Subscribe { .. } => RequestKind::Subscribe,
            RequestMessage::Unsubscribe { .. } => RequestKind::Unsubscribe,
        }
    }

    /// Encode message to bytes using postcard
    pub fn encode(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Decode message from bytes using postcard
    pub fn decode(data: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(data)
    }
}

/// Inbound replies, correlated by request id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReplyMessage {
    /// Successful fetch
    ///
    /// `publication` is `None` when the request succeeded at the protocol
    /// level but the remote party holds no such document.
    FetchOk {
        /// Correlation id
        request_id: RequestId,
        /// The fetched document, when present
        publication: Option<PublicationRecord>,
    },

    /// Successful publish; the remote party confirms the range it applied
    PublishOk {
        /// Correlation id
        request_id: RequestId,
        /// Highest version the remote party confirmed as published
        confirmed_version: u64,
    },

    /// Successful remove
    RemoveOk {
        /// Correlation id
        request_id: RequestId,
    },

    /// Subscription registered
    SubscribeOk {
        /// Correlation id
        request_id: RequestId,
    },

    /// Subscription withdrawn
    UnsubscribeOk {
        /// Correlation id
        request_id: RequestId,
    },

    /// Remote-reported failure, surfaced verbatim to the waiting operation
    Error {
        /// Correlation id
        request_id: RequestId,
        /// Remote error code
        code: u16,
        /// Remote error reason
        reason: String,
    },
}

impl ReplyMessage {
    /// Correlation id of this reply
    pub fn request_id(&self) -> RequestId {
        match self {
            ReplyMessage::FetchOk { request_id, .. } => *request_id,
            ReplyMessage::PublishOk { request_id, .. } => *request_id,
            ReplyMessage::RemoveOk { request_id } => *request_id,
            ReplyMessage::SubscribeOk { request_id } => *request_id,
            ReplyMessage::UnsubscribeOk { request_id } => *request_id,
            ReplyMessage::Error { request_id, .. } => *request_id,
        }
    }

    /// Whether this reply answers a request of the given method
    ///
    /// An `Error` reply answers any method (the correlation id already
    /// scoped it); success replies answer only their own method.
    pub fn answers(&self, kind: RequestKind) -> bool {
        match self {
            ReplyMessage::FetchOk { .. } => kind == RequestKind::Fetch,
            ReplyMessage::PublishOk { .. } => kind == RequestKind::Publish,
            ReplyMessage::RemoveOk { .. } => kind == RequestKind::Remove,
            ReplyMessage::SubscribeOk { .. } => kind == RequestKind::Subscribe,
            ReplyMessage::UnsubscribeOk { .. } => kind == RequestKind::Unsubscribe,
            ReplyMessage::Error { .. } => true,
        }
    }

    /// Whether this reply carries a remote-reported failure
    pub fn is_error(&self) -> bool {
        matches!(self, ReplyMessage::Error { .. })
    }

    /// Encode message to bytes using postcard
    pub fn encode(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Decode message from bytes using postcard
    pub fn decode(data: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(data)
    }
}

/// Either direction of the protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProtocolMessage {
    /// A request travelling outward
    Request(RequestMessage),
    /// A reply travelling inward
    Reply(ReplyMessage),
}

/// Wrapper for versioned messages (future-proofing)
///
/// Allows protocol evolution while maintaining backward compatibility.
/// New versions can be added as variants without breaking existing nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireEnvelope {
    /// Protocol version 1
    V1(ProtocolMessage),
}

impl WireEnvelope {
    /// Wrap a message at the current protocol version
    pub fn new(msg: ProtocolMessage) -> Self {
        WireEnvelope::V1(msg)
    }

    /// Encode envelope to bytes using postcard
    pub fn encode(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Decode envelope from bytes using postcard
    pub fn decode(data: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(data)
    }

    /// Unwrap the inner message
    pub fn into_inner(self) -> ProtocolMessage {
        match self {
            WireEnvelope::V1(msg) => msg,
        }
    }

    /// Get the protocol version
    pub fn version(&self) -> u8 {
        match self {
            WireEnvelope::V1(_) => 1,
        }
    }
}
