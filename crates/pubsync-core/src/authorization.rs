//! Mutual-authorization collaborator
//!
//! Before any notification crosses a trust boundary, the repository asks
//! the account-level oracle whether the publisher and the subscriber are
//! mutually authorized given their declared relationship sets. The rule
//! set itself lives outside this core; the trait keeps it pluggable.

use crate::types::{Location, RelationshipSet};

/// Decides whether two parties may publish/subscribe to each other
///
/// Pure and synchronous; no side effects visible to the core. Argument
/// order is publisher first, then subscriber.
pub trait AuthorizationOracle: Send + Sync {
    /// Whether `publisher` may notify `subscriber` and `subscriber` may
    /// observe `publisher`, given both declared relationship sets
    fn authorized(
        &self,
        publisher: &Location,
        publisher_relationships: &RelationshipSet,
        subscriber: &Location,
        subscriber_relationships: &RelationshipSet,
    ) -> bool;
}

/// Default oracle: mutual relationship intersection
///
/// Authorizes a pair when the two declared sets share at least one tag, or
/// when publisher and subscriber are the same location (a party always
/// reaches its own publications).
#[derive(Debug, Clone, Copy, Default)]
pub struct RelationshipOracle;

impl AuthorizationOracle for RelationshipOracle {
    fn authorized(
        &self,
        publisher: &Location,
        publisher_relationships: &RelationshipSet,
        subscriber: &Location,
        subscriber_relationships: &RelationshipSet,
    ) -> bool {
        if publisher == subscriber {
            return true;
        }
        publisher_relationships.intersects(subscriber_relationships)
    }
}
