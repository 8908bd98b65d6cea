//! User-initiated purchase flow.

use crate::config::ProductCatalog;
use crate::error::PurchaseError;
use crate::identity::AccountIdentity;
use crate::provider::FlowParams;
use crate::supervisor::ConnectionSupervisor;
use std::sync::Arc;
use tandem_types::{PlanType, ProductId, ResultCode};
use tracing::{debug, info, warn};

/// What happened when the purchase UI was requested.
///
/// `Launched` only means the UI was shown. The purchase result arrives
/// later as a provider event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    Launched { product_id: ProductId },
    /// The user already owns the product.
    AlreadyOwned,
    /// The user dismissed the UI.
    Cancelled,
}

/// Launches the provider's purchase UI for a plan.
pub struct PurchaseFlowController {
    supervisor: Arc<ConnectionSupervisor>,
    catalog: ProductCatalog,
    identity: Arc<dyn AccountIdentity>,
}

impl PurchaseFlowController {
    pub fn new(
        supervisor: Arc<ConnectionSupervisor>,
        catalog: ProductCatalog,
        identity: Arc<dyn AccountIdentity>,
    ) -> Self {
        Self {
            supervisor,
            catalog,
            identity,
        }
    }

    /// Requests the purchase UI for `plan`.
    ///
    /// Fails fast with [`PurchaseError::NotConnected`] unless the provider
    /// connection is ready, and with [`PurchaseError::ProductUnavailable`]
    /// when the listing or its offer is missing.
    pub async fn purchase(&self, plan: PlanType) -> Result<FlowOutcome, PurchaseError> {
        if !self.supervisor.is_connected() {
            debug!(%plan, "Purchase requested while disconnected");
            return Err(PurchaseError::NotConnected);
        }

        let product_id = self.catalog.product_for(plan).clone();
        let details = match self.supervisor.query_product(&product_id).await {
            Ok(Some(details)) => details,
            Ok(None) => {
                warn!(product = %product_id, "Product not listed by provider");
                return Err(PurchaseError::ProductUnavailable(product_id));
            }
            Err(code) => {
                warn!(product = %product_id, ?code, "Product query failed");
                return Err(map_code(code, product_id));
            }
        };

        let Some(offer_token) = details.offer_token.filter(|t| !t.is_empty()) else {
            warn!(product = %product_id, "Product has no offer token");
            return Err(PurchaseError::ProductUnavailable(product_id));
        };

        let params = FlowParams {
            product_id: product_id.clone(),
            offer_token,
            obfuscated_account_id: self.identity.current_account(),
        };
        match self.supervisor.launch_purchase_flow(&params).await {
            ResultCode::Ok => {
                info!(product = %product_id, "Purchase flow launched");
                Ok(FlowOutcome::Launched { product_id })
            }
            ResultCode::UserCancelled => Ok(FlowOutcome::Cancelled),
            ResultCode::ItemAlreadyOwned => Ok(FlowOutcome::AlreadyOwned),
            code => {
                warn!(product = %product_id, ?code, "Purchase flow launch failed");
                Err(map_code(code, product_id))
            }
        }
    }
}

fn map_code(code: ResultCode, product_id: ProductId) -> PurchaseError {
    PurchaseError::from_result_code(code).unwrap_or(PurchaseError::ProductUnavailable(product_id))
}
