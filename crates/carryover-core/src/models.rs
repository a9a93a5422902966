//! Core data models shared by the engine, the applier, and store backends.
//!
//! A [`StoredEntity`] carries a durable identifier; an [`IncomingRecord`]
//! is the same conceptual content freshly produced by a content source,
//! without one. Both are partitioned by `group_key`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The ordered text pair compared during reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Content {
    /// Text used for matching (e.g. a question).
    pub primary: String,
    /// Companion text carried along (e.g. an answer). Never used for matching.
    pub secondary: String,
}

impl Content {
    pub fn new(primary: impl Into<String>, secondary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            secondary: secondary.into(),
        }
    }
}

/// An entity read from the [`EntityStore`](crate::store::EntityStore).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntity {
    /// Stable identifier, assigned once at creation.
    pub id: String,
    /// Partition key; matching never crosses groups.
    pub group_key: String,
    pub content: Content,
    /// Every payload field that is not id, group, or content.
    /// Preserved verbatim on update.
    pub metadata: Map<String, Value>,
    /// Last-modified time in Unix milliseconds, as recorded by the store.
    pub updated_at: i64,
}

/// A record produced by a content source. Has no identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingRecord {
    pub group_key: String,
    pub content: Content,
    /// Ordering key extracted from the source. Only used to order input.
    pub sequence_hint: i64,
    /// Source fields beyond the content pair (e.g. `type`, `options`).
    #[serde(default)]
    pub extra: Map<String, Value>,
}

/// An incoming record rejected at the boundary because a required text
/// field was missing or blank. Reported to the operator, never matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MalformedRecord {
    /// Source label the record was found under.
    pub label: String,
    /// Zero-based position within that label's list in the source.
    pub position: usize,
    pub reason: String,
}
