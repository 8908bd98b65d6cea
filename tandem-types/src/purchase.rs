//! Purchase snapshots and provider result codes.

use crate::ids::{ProductId, PurchaseToken};
use serde::{Deserialize, Serialize};

/// The provider-reported state of a purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseState {
    /// Payment completed.
    Purchased,
    /// Payment is still being processed (e.g. cash or deferred methods).
    Pending,
    /// The provider did not report a usable state.
    Unspecified,
}

/// An immutable purchase snapshot delivered by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Purchase {
    /// The product that was bought.
    pub product_id: ProductId,
    /// The transaction token.
    pub purchase_token: PurchaseToken,
    /// Provider-side state.
    pub state: PurchaseState,
    /// Whether the purchase has already been acknowledged to the provider.
    pub acknowledged: bool,
}

impl Purchase {
    /// Creates an unacknowledged purchase in the `Purchased` state.
    pub fn purchased(product_id: impl Into<ProductId>, token: impl Into<PurchaseToken>) -> Self {
        Self {
            product_id: product_id.into(),
            purchase_token: token.into(),
            state: PurchaseState::Purchased,
            acknowledged: false,
        }
    }

    /// Creates a purchase in the `Pending` state.
    pub fn pending(product_id: impl Into<ProductId>, token: impl Into<PurchaseToken>) -> Self {
        Self {
            state: PurchaseState::Pending,
            ..Self::purchased(product_id, token)
        }
    }

    /// Returns a copy marked as acknowledged.
    #[must_use]
    pub fn into_acknowledged(self) -> Self {
        Self {
            acknowledged: true,
            ..self
        }
    }

    /// Returns true if payment completed.
    #[must_use]
    pub fn is_purchased(&self) -> bool {
        self.state == PurchaseState::Purchased
    }
}

/// Result codes reported by the purchase provider, for connections,
/// purchase updates, flow launches and acknowledgments alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultCode {
    Ok,
    UserCancelled,
    ServiceUnavailable,
    BillingUnavailable,
    ItemUnavailable,
    DeveloperError,
    GenericError,
    ItemAlreadyOwned,
    ItemNotOwned,
    ServiceDisconnected,
}

impl ResultCode {
    /// Returns true for `Ok`.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Returns true if the condition can clear up on its own (network,
    /// service restarts) and the operation is worth retrying later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ServiceUnavailable | Self::ServiceDisconnected | Self::GenericError
        )
    }

    /// Returns true if connecting can never succeed on this device without
    /// user intervention. The supervisor stops auto-reconnecting on these.
    #[must_use]
    pub fn is_terminal_for_connection(&self) -> bool {
        matches!(self, Self::BillingUnavailable | Self::DeveloperError)
    }
}
