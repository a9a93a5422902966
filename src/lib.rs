//! # Carryover
//!
//! Identifier-preserving re-import of regenerated content into a local
//! entity store.
//!
//! When a content set (for example a deck of flashcards) is regenerated
//! from scratch, the new records carry no identifiers. Carryover matches
//! them back to the stored entities they replace, so edited entities keep
//! their ids and everything keyed on those ids (progress, links, reviews)
//! survives the re-import.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────┐
//! │   Source    │──▶│  Reconcile   │──▶│    Apply     │──▶│  SQLite   │
//! │  (JSON)     │   │ exact/score/ │   │ update/insert│   │ records  │
//! └─────────────┘   │   forced     │   │   /delete    │   └──────────┘
//!                   └──────────────┘   └──────────────┘
//! ```
//!
//! The matching engine, applier, and store trait live in `carryover-core`;
//! this crate supplies configuration, the SQLite store, the content source,
//! and the `carryover` CLI.
//!
//! ## Quick Start
//!
//! ```bash
//! carryover init                # create database
//! carryover plan                # dry run: what would change
//! carryover sync                # back up, then apply
//! carryover stats               # per-group counts
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`source`] | JSON content source |
//! | [`sqlite_store`] | SQLite entity store |
//! | [`sync`] | Plan and sync orchestration |
//! | [`backup`] | Pre-write database backup |
//! | [`progress`] | Progress reporting on stderr |
//! | [`stats`] | Database statistics |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod backup;
pub mod config;
pub mod db;
pub mod migrate;
pub mod progress;
pub mod source;
pub mod sqlite_store;
pub mod stats;
pub mod sync;
