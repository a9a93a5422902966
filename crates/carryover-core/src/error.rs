//! Error taxonomy for the sync applier and store boundary.
//!
//! The reconciliation engine itself is infallible. Malformed incoming
//! records are not errors either: they are collected as
//! [`MalformedRecord`](crate::models::MalformedRecord)s and reported.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Kind of store write, for error context and summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOp {
    Update,
    Insert,
    Delete,
}

impl fmt::Display for WriteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WriteOp::Update => "update",
            WriteOp::Insert => "insert",
            WriteOp::Delete => "delete",
        })
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    /// The group cannot be applied without guessing: either it is unknown,
    /// or new entities need a template and none exists.
    #[error("group '{group}' not found: {reason}")]
    GroupNotFound { group: String, reason: String },

    #[error("failed to read '{collection}' for group '{group}'")]
    StoreRead {
        collection: String,
        group: String,
        #[source]
        source: anyhow::Error,
    },

    /// The store rejected a write. Nothing after it in the group was applied
    /// by the applier; the whole run is safe to retry.
    #[error("store rejected {op} of '{id}' in '{collection}'")]
    StoreWrite {
        op: WriteOp,
        collection: String,
        id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to commit writes for group '{group}'")]
    StoreCommit {
        group: String,
        #[source]
        source: anyhow::Error,
    },
}

pub type Result<T> = std::result::Result<T, SyncError>;
