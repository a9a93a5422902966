//! # Carryover Core
//!
//! Shared, I/O-free logic for Carryover: data models, text normalization,
//! similarity scoring, the three-phase reconciliation engine, metadata
//! templates, the sync applier, and the entity store abstraction.
//!
//! This crate contains no tokio, sqlx, or filesystem dependencies. Storage
//! is reached only through the [`store::EntityStore`] trait.
//!
//! ## Data Flow
//!
//! ```text
//! incoming records ──┐
//!                    ├──▶ reconcile() ──▶ ReconciliationPlan ──▶ apply() ──▶ EntityStore
//! stored entities ───┘
//! ```

pub mod apply;
pub mod error;
pub mod layout;
pub mod models;
pub mod normalize;
pub mod reconcile;
pub mod report;
pub mod similarity;
pub mod store;
pub mod template;

pub use error::SyncError;
pub use models::{Content, IncomingRecord, MalformedRecord, StoredEntity};
pub use reconcile::{reconcile, MatchPhase, MatchPolicy, MatchResult, ReconciliationPlan};
