//! Business Services
//!
//! This module contains the engine driving the referral tree:
//!
//! - `ReferralService` - the four tree operations and the fan-out protocol
//! - `ReferralServiceError` - operation error taxonomy
//!
//! The service coordinates between the store layer and callers; all tree
//! state lives in the store.

pub mod error;
pub mod referral_service;

#[cfg(test)]
mod referral_service_test;

pub use error::{FanoutFailure, ReferralServiceError};
pub use referral_service::{
    FanoutStatus, FanoutWrite, ReferralConfig, ReferralService, RemoveReport, UpdateReport,
};
