//! Acknowledgment of validated purchases.

use crate::supervisor::ConnectionSupervisor;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tandem_types::{Purchase, PurchaseToken, ResultCode};
use tracing::{debug, error, info, warn};

/// Result of [`AcknowledgmentManager::acknowledge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Nothing to do.
    AlreadyAcknowledged,
    /// Another call is acknowledging the same token.
    InProgress,
    Acknowledged,
    /// Left unacknowledged; the next launch check retries.
    Failed(ResultCode),
}

#[derive(Default)]
struct AckLedger {
    done: HashSet<PurchaseToken>,
    in_progress: HashSet<PurchaseToken>,
}

/// Acknowledges each validated purchase to the provider once.
pub struct AcknowledgmentManager {
    supervisor: Arc<ConnectionSupervisor>,
    ledger: Arc<Mutex<AckLedger>>,
}

impl AcknowledgmentManager {
    pub fn new(supervisor: Arc<ConnectionSupervisor>) -> Self {
        Self {
            supervisor,
            ledger: Arc::new(Mutex::new(AckLedger::default())),
        }
    }

    /// Acknowledges `purchase` unless it (or its token) already is.
    ///
    /// A failure never affects the entitlement.
    pub async fn acknowledge(&self, purchase: &Purchase) -> AckOutcome {
        let token = &purchase.purchase_token;
        if purchase.acknowledged {
            return AckOutcome::AlreadyAcknowledged;
        }

        let _pending = {
            let mut ledger = self.ledger.lock();
            if ledger.done.contains(token) {
                return AckOutcome::AlreadyAcknowledged;
            }
            if !ledger.in_progress.insert(token.clone()) {
                debug!(token = %token, "Acknowledgment already in progress");
                return AckOutcome::InProgress;
            }
            InProgressGuard {
                token: token.clone(),
                ledger: Arc::clone(&self.ledger),
            }
        };

        let code = self.supervisor.acknowledge(token).await;
        if code.is_ok() {
            self.ledger.lock().done.insert(token.clone());
            info!(token = %token, "Purchase acknowledged");
            AckOutcome::Acknowledged
        } else {
            if code.is_retryable() {
                warn!(token = %token, ?code, "Acknowledgment failed, will retry on next launch");
            } else {
                error!(token = %token, ?code, "Acknowledgment rejected by provider");
            }
            AckOutcome::Failed(code)
        }
    }

    /// Whether this manager has acknowledged `token`.
    pub fn is_acknowledged(&self, token: &PurchaseToken) -> bool {
        self.ledger.lock().done.contains(token)
    }
}

// Clears the in-progress mark even if the acknowledging future is dropped.
struct InProgressGuard {
    token: PurchaseToken,
    ledger: Arc<Mutex<AckLedger>>,
}

impl Drop for InProgressGuard {
    fn drop(&mut self) {
        self.ledger.lock().in_progress.remove(&self.token);
    }
}
