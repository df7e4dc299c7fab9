//! Publication document model
//!
//! A [`Publication`] is a named, owned, versioned document. The content and
//! diff computation live behind the [`DiffContent`] trait: the core only
//! needs byte sizes to budget notifications and payloads to hand to the
//! transport. Version numbers are monotonically increasing integers.
//!
//! [`PublicationMetaData`] is the lightweight projection used wherever full
//! content is not required — subscription matching, change notifications,
//! and "gone" signals (version and base version forced to zero).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{PubSyncError, PubSyncResult};
use crate::types::{Location, PublicationName, RelationshipSet};

/// Document content collaborator
///
/// Implemented by the document model outside the core. Reports
/// serialization sizes for notification budgeting and produces the payload
/// bytes for full or incremental transfers. A diff covers the inclusive
/// version range `from..=to`.
pub trait DiffContent: Send + Sync {
    /// Byte size of a full serialization of the current document
    fn size_of_full(&self) -> u64;

    /// Byte size of an incremental serialization covering `from..=to`
    fn size_of_diff(&self, from: u64, to: u64) -> u64;

    /// Full serialization of the current document
    fn full_payload(&self) -> Vec<u8>;

    /// Incremental serialization covering `from..=to`
    fn diff_payload(&self, from: u64, to: u64) -> Vec<u8>;
}

/// A named, owned, versioned document
///
/// Mutated only by its owner, except for `base_version`, which a Publish
/// operation advances once the remote party confirms a published range.
/// The version counters are atomics so a shared `Arc<Publication>` can be
/// read during notification fan-out while the owner commits new versions.
pub struct Publication {
    name: PublicationName,
    creator: Location,
    relationships: RelationshipSet,
    /// Unix timestamp after which the publication is no longer offered
    expires_at: Option<i64>,
    current_version: AtomicU64,
    /// Lowest version a diff can be computed from
    base_version: AtomicU64,
    content: Arc<dyn DiffContent>,
}

impl Publication {
    /// Create a publication at version 0 with no expiry
    pub fn new(
        name: PublicationName,
        creator: Location,
        relationships: RelationshipSet,
        content: Arc<dyn DiffContent>,
    ) -> Self {
        Self {
            name,
            creator,
            relationships,
            expires_at: None,
            current_version: AtomicU64::new(0),
            base_version: AtomicU64::new(0),
            content,
        }
    }

    /// Set an expiry time (unix timestamp, seconds)
    pub fn with_expiry(mut self, expires_at: i64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Set the starting version (used when materializing a fetched document)
    pub fn with_version(self, version: u64) -> Self {
        self.current_version.store(version, Ordering::Release);
        self
    }

    /// The publication's name
    pub fn name(&self) -> &PublicationName {
        &self.name
    }

    /// Location of the owning creator
    pub fn creator(&self) -> &Location {
        &self.creator
    }

    /// Relationship tags controlling who may reach this publication
    pub fn relationships(&self) -> &RelationshipSet {
        &self.relationships
    }

    /// Expiry time, if any (unix timestamp, seconds)
    pub fn expires_at(&self) -> Option<i64> {
        self.expires_at
    }

    /// Whether the publication has expired at `now`
    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }

    /// Current document version
    pub fn current_version(&self) -> u64 {
        self.current_version.load(Ordering::Acquire)
    }

    /// Lowest version a diff can be computed from
    pub fn base_version(&self) -> u64 {
        self.base_version.load(Ordering::Acquire)
    }

    /// Advance the base version
    ///
    /// Called by a Publish operation once the remote party confirms the
    /// published range; anchors the next diff computation.
    pub fn set_base_version(&self, version: u64) {
        self.base_version.store(version, Ordering::Release);
    }

    /// Commit a new document version, returning the new version number
    pub fn commit(&self) -> u64 {
        self.current_version.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Move the current version forward to `version`
    ///
    /// Versions are monotonic; moving backwards is rejected.
    pub fn advance_to(&self, version: u64) -> PubSyncResult<()> {
        let prev = self.current_version.fetch_max(version, Ordering::AcqRel);
        if prev > version {
            return Err(PubSyncError::InvalidOperation(format!(
                "version {} would regress publication {} at version {}",
                version, self.name, prev
            )));
        }
        Ok(())
    }

    /// Byte size of a full serialization
    pub fn size_of_full(&self) -> u64 {
        self.content.size_of_full()
    }

    /// Byte size of a diff covering `from..=to`
    pub fn size_of_diff(&self, from: u64, to: u64) -> u64 {
        self.content.size_of_diff(from, to)
    }

    /// Full serialization of the current document
    pub fn full_payload(&self) -> Vec<u8> {
        self.content.full_payload()
    }

    /// Incremental serialization covering `from..=to`
    pub fn diff_payload(&self, from: u64, to: u64) -> Vec<u8> {
        self.content.diff_payload(from, to)
    }

    /// Snapshot the lightweight metadata projection
    pub fn metadata(&self) -> PublicationMetaData {
        PublicationMetaData {
            name: self.name.clone(),
            version: self.current_version(),
            base_version: self.base_version(),
            expires_at: self.expires_at,
            relationships: self.relationships.clone(),
        }
    }

    /// Snapshot a full serializable record (metadata + full payload)
    pub fn to_record(&self) -> PublicationRecord {
        PublicationRecord {
            meta: self.metadata(),
            payload: self.content.full_payload(),
        }
    }
}

impl fmt::Debug for Publication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publication")
            .field("name", &self.name)
            .field("creator", &self.creator)
            .field("version", &self.current_version())
            .field("base_version", &self.base_version())
            .finish()
    }
}

/// Lightweight projection of a publication
///
/// Cheaper to construct and pass around than a full [`Publication`]; used
/// for subscription matching, notification payload headers, and cache rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationMetaData {
    /// The publication's name
    pub name: PublicationName,
    /// Current document version
    pub version: u64,
    /// Lowest version a diff can be computed from
    pub base_version: u64,
    /// Expiry time, if any (unix timestamp, seconds)
    pub expires_at: Option<i64>,
    /// Relationship tags controlling who may reach this publication
    pub relationships: RelationshipSet,
}

impl PublicationMetaData {
    /// Copy with version and base version forced to zero
    ///
    /// The wire signal for "this publication no longer exists".
    pub fn as_gone(&self) -> Self {
        Self {
            version: 0,
            base_version: 0,
            ..self.clone()
        }
    }
}

/// Serializable snapshot of a publication: metadata plus full payload
///
/// Carried inside fetch replies; materializing it back into a live
/// [`Publication`] is the document model's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicationRecord {
    /// Metadata projection at snapshot time
    pub meta: PublicationMetaData,
    /// Full serialization of the document
    pub payload: Vec<u8>,
}
