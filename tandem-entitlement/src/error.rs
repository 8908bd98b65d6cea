//! Error types for the entitlement core.

use tandem_types::{ProductId, ResultCode};
use thiserror::Error;

/// Result type for entitlement operations.
pub type EntitlementResult<T> = Result<T, EntitlementError>;

/// Errors surfaced by session setup and configuration. Validation itself
/// never fails; see [`crate::EntitlementValidator`].
#[derive(Debug, Error)]
pub enum EntitlementError {
    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Reading a configuration file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No authenticated account.
    #[error("no signed-in account")]
    NotSignedIn,

    /// A partner link names a different account than the signed-in one.
    #[error("partner link belongs to account {link_account}, signed in as {current}")]
    AccountMismatch {
        link_account: String,
        current: String,
    },

    /// A user-facing purchase error.
    #[error(transparent)]
    Purchase(#[from] PurchaseError),

    /// The session has been shut down.
    #[error("session is shut down")]
    SessionClosed,
}

/// How an error should be treated: retried quietly, shown, or ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Provider, store, or function unreachable. Retryable, soft banner at most.
    Connectivity,
    /// Malformed product, developer error. Not retried, shown as a
    /// configuration problem.
    ProviderRejection,
    /// The user cancelled. Not an error.
    UserInitiated,
    /// Validation failed before a verdict. Resolved by fail-preserve.
    Ambiguous,
    /// The store or the function said no.
    AuthoritativeRejection,
}

/// User-facing purchase errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PurchaseError {
    /// The purchase provider connection is not ready.
    #[error("purchase service not connected")]
    NotConnected,

    /// The provider has no purchasable listing (or offer) for the product.
    #[error("product unavailable: {0}")]
    ProductUnavailable(ProductId),

    /// The provider service is temporarily down.
    #[error("purchase service unavailable")]
    ServiceUnavailable,

    /// Billing is not supported on this device or account.
    #[error("billing unavailable on this device")]
    BillingUnavailable,

    /// The store listing or app is misconfigured.
    #[error("purchase misconfigured ({0:?})")]
    Misconfiguration(ResultCode),

    /// A transient provider error.
    #[error("transient purchase error ({0:?})")]
    Transient(ResultCode),
}

impl PurchaseError {
    /// Maps a provider result code to a user-facing error. Returns `None` for
    /// codes that are not errors (`Ok`, `UserCancelled`, `ItemAlreadyOwned`).
    pub fn from_result_code(code: ResultCode) -> Option<Self> {
        match code {
            ResultCode::Ok | ResultCode::UserCancelled | ResultCode::ItemAlreadyOwned => None,
            ResultCode::ServiceUnavailable => Some(Self::ServiceUnavailable),
            ResultCode::BillingUnavailable => Some(Self::BillingUnavailable),
            ResultCode::DeveloperError | ResultCode::ItemUnavailable | ResultCode::ItemNotOwned => {
                Some(Self::Misconfiguration(code))
            }
            ResultCode::GenericError | ResultCode::ServiceDisconnected => {
                Some(Self::Transient(code))
            }
        }
    }

    /// Returns the taxonomy class of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NotConnected | Self::ServiceUnavailable | Self::Transient(_) => {
                ErrorClass::Connectivity
            }
            Self::ProductUnavailable(_) | Self::BillingUnavailable | Self::Misconfiguration(_) => {
                ErrorClass::ProviderRejection
            }
        }
    }

    /// Returns true if trying again later may succeed.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Connectivity
    }

    /// Message to show the user.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NotConnected | Self::ServiceUnavailable => {
                "The store is not reachable right now. Please try again in a moment."
            }
            Self::Transient(_) => "Something went wrong with the purchase. Please try again.",
            Self::BillingUnavailable => "Purchases are not available on this device or account.",
            Self::ProductUnavailable(_) | Self::Misconfiguration(_) => {
                "This subscription cannot be purchased right now. Please contact support."
            }
        }
    }
}
