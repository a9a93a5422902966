//! Entity store abstraction.
//!
//! The [`EntityStore`] trait is the only way the core touches storage. A
//! store is a key/value surface keyed by `(collection, id)` holding one JSON
//! payload per record plus a last-modified timestamp; the store decodes
//! payloads into [`StoredEntity`] values through its
//! [`RecordLayout`](crate::layout::RecordLayout).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`list_by_group`](EntityStore::list_by_group) | All entities of one group, in a stable order |
//! | [`get`](EntityStore::get) | One entity by id |
//! | [`upsert`](EntityStore::upsert) | Insert or replace an entity |
//! | [`delete`](EntityStore::delete) | Remove an entity |
//! | [`apply_batch`](EntityStore::apply_batch) | Apply one group's mutations as a unit |

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::{SyncError, WriteOp};
use crate::models::StoredEntity;

/// A single write produced by the applier.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Update {
        collection: String,
        entity: StoredEntity,
    },
    Insert {
        collection: String,
        entity: StoredEntity,
    },
    Delete {
        collection: String,
        id: String,
    },
}

impl Mutation {
    pub fn op(&self) -> WriteOp {
        match self {
            Mutation::Update { .. } => WriteOp::Update,
            Mutation::Insert { .. } => WriteOp::Insert,
            Mutation::Delete { .. } => WriteOp::Delete,
        }
    }

    pub fn collection(&self) -> &str {
        match self {
            Mutation::Update { collection, .. }
            | Mutation::Insert { collection, .. }
            | Mutation::Delete { collection, .. } => collection,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Mutation::Update { entity, .. } | Mutation::Insert { entity, .. } => &entity.id,
            Mutation::Delete { id, .. } => id,
        }
    }

    /// Wrap a backend failure for this mutation.
    pub fn write_error(&self, source: anyhow::Error) -> SyncError {
        SyncError::StoreWrite {
            op: self.op(),
            collection: self.collection().to_string(),
            id: self.id().to_string(),
            source,
        }
    }
}

/// Abstract storage backend for entities.
///
/// Stores provide their own concurrency control; the core never locks.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// All entities of `group_key` in `collection`, in a stable order
    /// (insertion order for the bundled backends).
    async fn list_by_group(&self, collection: &str, group_key: &str) -> Result<Vec<StoredEntity>>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<StoredEntity>>;

    /// Insert or replace the entity keyed by `entity.id`.
    async fn upsert(&self, collection: &str, entity: &StoredEntity) -> Result<()>;

    async fn delete(&self, collection: &str, id: &str) -> Result<()>;

    /// Apply one group's mutations in order, stopping at the first failure.
    ///
    /// The default runs them one by one. Transactional backends override
    /// this so that a failure leaves the group untouched.
    async fn apply_batch(
        &self,
        _group_key: &str,
        mutations: &[Mutation],
    ) -> std::result::Result<(), SyncError> {
        for mutation in mutations {
            let result = match mutation {
                Mutation::Update { collection, entity } | Mutation::Insert { collection, entity } => {
                    self.upsert(collection, entity).await
                }
                Mutation::Delete { collection, id } => self.delete(collection, id).await,
            };
            result.map_err(|e| mutation.write_error(e))?;
        }
        Ok(())
    }
}
