//! Data Models
//!
//! Core data structures for the referral tree:
//!
//! - `ReferralNode` - one document per referral identity
//! - `Ancestors` / `Children` - per-level containers for the ancestor chain
//!   and the denormalized descendant records
//! - `Level` - ancestor distance (1 = direct parent)

mod levels;
mod node;

pub use levels::{Ancestors, ChildEntry, Children, Level};
pub use node::{ReferralNode, ValidationError};
