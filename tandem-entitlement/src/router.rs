//! Dispatch of provider purchase updates.

use crate::ack::AcknowledgmentManager;
use crate::config::ProductCatalog;
use crate::error::{ErrorClass, PurchaseError};
use crate::notify::{Notification, NotificationSink};
use crate::validator::{ClaimRejection, EntitlementValidator};
use parking_lot::Mutex;
use std::sync::Arc;
use tandem_types::{PlanType, Purchase, PurchaseState, ResultCode};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

/// Counts of what an `Ok` update was turned into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Purchases handed to the validator.
    pub validating: usize,
    /// Pending purchases reported to the user.
    pub pending: usize,
    /// Duplicate deliveries of claimed or validated tokens.
    pub skipped: usize,
    /// Purchases in an unspecified state.
    pub ignored: usize,
}

/// What [`PurchaseEventRouter::handle_update`] did with an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The user cancelled; nothing happens.
    Cancelled,
    /// Already owned; entitlement granted without validation.
    AlreadyOwned,
    /// A provider error, reported to the user.
    Failed(PurchaseError),
    Dispatched(DispatchSummary),
}

impl RouteOutcome {
    pub fn error_class(&self) -> Option<ErrorClass> {
        match self {
            Self::Cancelled => Some(ErrorClass::UserInitiated),
            Self::Failed(e) => Some(e.class()),
            Self::AlreadyOwned | Self::Dispatched(_) => None,
        }
    }
}

/// Classifies purchase updates and starts at most one validation per token.
pub struct PurchaseEventRouter {
    validator: Arc<EntitlementValidator>,
    acks: Arc<AcknowledgmentManager>,
    sink: Arc<dyn NotificationSink>,
    catalog: ProductCatalog,
    tasks: Mutex<JoinSet<()>>,
}

impl PurchaseEventRouter {
    pub fn new(
        validator: Arc<EntitlementValidator>,
        acks: Arc<AcknowledgmentManager>,
        sink: Arc<dyn NotificationSink>,
        catalog: ProductCatalog,
    ) -> Self {
        Self {
            validator,
            acks,
            sink,
            catalog,
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Routes one provider update. Validations run in the background; see
    /// [`drain`](Self::drain).
    ///
    /// Must be called within a tokio runtime.
    pub fn handle_update(&self, code: ResultCode, purchases: Vec<Purchase>) -> RouteOutcome {
        match code {
            ResultCode::UserCancelled => {
                debug!("Purchase cancelled by user");
                RouteOutcome::Cancelled
            }
            ResultCode::ItemAlreadyOwned => {
                let plan = purchases
                    .iter()
                    .find_map(|p| self.catalog.plan_for(&p.product_id));
                self.already_owned(plan);
                RouteOutcome::AlreadyOwned
            }
            ResultCode::Ok => RouteOutcome::Dispatched(self.dispatch(purchases)),
            code => {
                let err =
                    PurchaseError::from_result_code(code).unwrap_or(PurchaseError::Transient(code));
                match err.class() {
                    ErrorClass::ProviderRejection => error!(?code, "Purchase rejected by provider"),
                    _ => warn!(?code, "Purchase failed"),
                }
                self.sink.notify(Notification::PurchaseFailed(err.clone()));
                RouteOutcome::Failed(err)
            }
        }
    }

    /// Grants the entitlement for a product the user already owns.
    pub fn already_owned(&self, plan: Option<PlanType>) {
        self.validator.force_subscribed(plan);
    }

    fn dispatch(&self, purchases: Vec<Purchase>) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        let mut tasks = self.tasks.lock();
        while tasks.try_join_next().is_some() {}

        for purchase in purchases {
            match purchase.state {
                PurchaseState::Purchased => match self.validator.claim(&purchase.purchase_token) {
                    Ok(claim) => {
                        self.validator.record_observed(&purchase);
                        debug!(token = %purchase.purchase_token, "Dispatching validation");
                        let validator = Arc::clone(&self.validator);
                        tasks.spawn(async move {
                            validator.validate_claimed(&purchase, claim).await;
                        });
                        summary.validating += 1;
                    }
                    Err(ClaimRejection::InFlight) => {
                        debug!(token = %purchase.purchase_token, "Validation in flight, redelivery dropped");
                        summary.skipped += 1;
                    }
                    Err(ClaimRejection::Validated { confirmed }) => {
                        // A confirmed purchase still unacknowledged had its
                        // acknowledgment fail earlier.
                        if confirmed
                            && !purchase.acknowledged
                            && !self.acks.is_acknowledged(&purchase.purchase_token)
                        {
                            let acks = Arc::clone(&self.acks);
                            tasks.spawn(async move {
                                acks.acknowledge(&purchase).await;
                            });
                        }
                        summary.skipped += 1;
                    }
                },
                PurchaseState::Pending => {
                    debug!(token = %purchase.purchase_token, "Purchase pending");
                    self.sink.notify(Notification::PurchasePending);
                    summary.pending += 1;
                }
                PurchaseState::Unspecified => {
                    debug!(token = %purchase.purchase_token, "Purchase in unspecified state ignored");
                    summary.ignored += 1;
                }
            }
        }
        summary
    }

    /// Background validations not yet finished.
    pub fn in_flight(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Waits for every background validation, including ones started while
    /// draining.
    pub async fn drain(&self) {
        loop {
            let mut tasks = std::mem::take(&mut *self.tasks.lock());
            if tasks.is_empty() {
                return;
            }
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result
                    && e.is_panic()
                {
                    error!(error = %e, "Validation task panicked");
                }
            }
        }
    }

    /// Cancels background validations.
    pub fn abort_all(&self) {
        self.tasks.lock().abort_all();
    }
}
