//! User-visible notifications.

use crate::error::PurchaseError;
use parking_lot::Mutex;
use tracing::info;

/// An event worth telling the user about. Presentation is up to the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// The provider reported a pending purchase (e.g. awaiting payment).
    PurchasePending,
    /// A purchase was confirmed by the store or the validation function.
    PurchaseConfirmed,
    /// The validation function rejected a purchase.
    PurchaseRejected,
    /// The purchase could not be made.
    PurchaseFailed(PurchaseError),
    /// Premium is now inherited from the partner.
    SubscriptionInherited { partner_name: Option<String> },
    /// The partner's subscription no longer covers this account.
    InheritanceLost,
}

/// Fire-and-forget presentation of notifications.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Sink that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, notification: Notification) {
        info!(?notification, "User notification");
    }
}

/// Sink that keeps every notification, for tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    seen: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.seen.lock().clone()
    }

    /// Number of recorded notifications matching `pred`.
    pub fn count(&self, pred: impl Fn(&Notification) -> bool) -> usize {
        self.seen.lock().iter().filter(|n| pred(n)).count()
    }

    pub fn clear(&self) {
        self.seen.lock().clear();
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, notification: Notification) {
        self.seen.lock().push(notification);
    }
}
