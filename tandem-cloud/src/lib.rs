//! Remote services consumed by the Tandem entitlement core.
//!
//! Three collaborators live behind async traits so the core can be tested
//! without a network:
//! - [`AccountStore`]: the account document, the durable source of truth
//! - [`ValidationFunction`]: verifies a purchase token server-side
//! - [`PartnerSyncFunction`]: reconciles entitlement with a linked partner
//!
//! Production implementations talk HTTP via reqwest ([`HttpAccountStore`],
//! [`FunctionsClient`]); [`mock`] holds in-memory doubles.

mod account;
mod config;
mod error;
mod functions;
mod http;
pub mod mock;

pub use account::{AccountDocument, AccountStore, AccountUpdate, HttpAccountStore};
pub use config::CloudConfig;
pub use error::{CloudError, CloudResult};
pub use functions::{
    FunctionsClient, PartnerSyncFunction, PartnerSyncRequest, PartnerSyncResponse,
    SYNC_PARTNER_FN, VALIDATE_PURCHASE_FN, ValidatePurchaseRequest, ValidatePurchaseResponse,
    ValidationFunction,
};
