//! Name-pattern and relationship filter shared by all subscriber kinds

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::PubSyncResult;
use crate::types::{PublicationName, RelationshipSet};

/// Serializable form of a subscription filter
///
/// Travels in subscribe requests and is exposed for diagnostics; the
/// compiled form lives in [`SubscriptionFilter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterDescriptor {
    /// Regex the publication name must match
    pub pattern: String,
    /// Relationship tags the subscriber declares
    pub relationships: RelationshipSet,
}

/// Compiled subscription filter: precompiled name regex + relationships
///
/// The pattern is compiled once per subscription, not per publication in a
/// batch. Eligibility of a publication additionally requires the
/// authorization oracle's consent; that check belongs to the repository.
#[derive(Debug, Clone)]
pub struct SubscriptionFilter {
    pattern: Regex,
    relationships: RelationshipSet,
}

impl SubscriptionFilter {
    /// Compile a filter from a pattern and relationship tags
    pub fn new(pattern: &str, relationships: RelationshipSet) -> PubSyncResult<Self> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            relationships,
        })
    }

    /// Compile a filter from its serializable descriptor
    pub fn from_descriptor(descriptor: &FilterDescriptor) -> PubSyncResult<Self> {
        Self::new(&descriptor.pattern, descriptor.relationships.clone())
    }

    /// Whether `name` matches the name pattern
    pub fn matches(&self, name: &PublicationName) -> bool {
        self.pattern.is_match(name.as_str())
    }

    /// The relationship tags the subscriber declared
    pub fn relationships(&self) -> &RelationshipSet {
        &self.relationships
    }

    /// The source pattern string
    pub fn pattern_str(&self) -> &str {
        self.pattern.as_str()
    }

    /// Serializable descriptor of this filter
    pub fn descriptor(&self) -> FilterDescriptor {
        FilterDescriptor {
            pattern: self.pattern.as_str().to_string(),
            relationships: self.relationships.clone(),
        }
    }
}

impl fmt::Display for SubscriptionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pattern.as_str())
    }
}
