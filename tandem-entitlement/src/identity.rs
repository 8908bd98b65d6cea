//! The signed-in account.

use parking_lot::RwLock;
use tandem_types::AccountId;

/// Source of the authenticated account id.
pub trait AccountIdentity: Send + Sync {
    /// The signed-in account, or `None` when signed out.
    fn current_account(&self) -> Option<AccountId>;
}

/// Identity held in memory and switched by sign-in/sign-out.
#[derive(Debug, Default)]
pub struct SessionIdentity {
    account: RwLock<Option<AccountId>>,
}

impl SessionIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(account: impl Into<AccountId>) -> Self {
        Self {
            account: RwLock::new(Some(account.into())),
        }
    }

    pub fn sign_in(&self, account: impl Into<AccountId>) {
        *self.account.write() = Some(account.into());
    }

    pub fn sign_out(&self) {
        *self.account.write() = None;
    }
}

impl AccountIdentity for SessionIdentity {
    fn current_account(&self) -> Option<AccountId> {
        self.account.read().clone()
    }
}
