//! Core type definitions for Tandem premium entitlement.
//!
//! This crate defines the values shared between the purchase provider, the
//! remote account services, and the entitlement core:
//! - Opaque identifiers (accounts, partners, products, purchase tokens)
//! - Provider purchase snapshots and the provider result-code taxonomy
//! - The resolved entitlement record and where it came from
//!
//! Nothing here performs I/O; the types are plain data and serialize with
//! serde so they can cross process and network boundaries unchanged.

mod entitlement;
mod ids;
mod purchase;

pub use entitlement::{Entitlement, EntitlementSource, PartnerLink, PlanType};
pub use ids::{AccountId, PartnerId, ProductId, PurchaseToken};
pub use purchase::{Purchase, PurchaseState, ResultCode};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("unknown plan type: {0}")]
    UnknownPlan(String),
}
