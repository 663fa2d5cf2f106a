//! RefTree Core - Denormalized Referral Tree Engine
//!
//! This crate maintains a bounded-depth, multiply-denormalized referral tree
//! inside a keyed document store: each node document carries its own payload
//! plus materialized copies of its descendants, split per ancestor distance
//! ("level"), up to a configured maximum depth.
//!
//! # Architecture
//!
//! - **No multi-document transactions**: every insert, payload update, and
//!   delete issues one owning write plus a bounded batch of concurrent
//!   fan-out writes to ancestor documents, with a defined (eventually
//!   consistent) contract between a node and its ancestors' cached copies
//! - **Abstract store**: all persistence goes through the [`db::ReferralStore`]
//!   trait; the store's connection lifecycle and provisioning are the
//!   backend's concern
//! - **No in-memory tree**: every operation re-derives the ancestor set it
//!   needs from the stored documents
//!
//! # Modules
//!
//! - [`models`] - node documents, levels, per-level containers
//! - [`db`] - store abstraction and the in-memory backend
//! - [`services`] - the referral engine and its error taxonomy

pub mod db;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use models::*;
pub use services::*;
