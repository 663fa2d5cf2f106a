//! Store Layer
//!
//! This module holds the keyed document store abstraction underneath the
//! referral service:
//!
//! - [`ReferralStore`] - async trait the service drives; every mutation is
//!   an atomic single-document operation
//! - [`MemoryStore`] - HashMap-backed implementation for tests and embedding
//! - [`StoreError`] - store-side error taxonomy
//!
//! Connection lifecycle, provisioning, and transport for remote backends
//! are the backend's own concern; nothing in this crate manages them.

mod error;
mod memory_store;
mod referral_store;

pub use error::{StoreError, StoreResult};
pub use memory_store::MemoryStore;
pub use referral_store::{Projection, ReferralStore, StoreOptions, WriteOutcome};
