//! Resolution of the authoritative entitlement value.
//!
//! The chain, each step only tried when the previous one was not decisive:
//!
//! 1. No signed-in account: the purchase cannot be attributed.
//! 2. Account store read: a missing document revokes, `isSubscribed=true`
//!    confirms.
//! 3. Validation function: `isValid` decides for the token. A rejection
//!    does not revoke while another observed purchase has no verdict yet.
//! 4. The function call failed: the observed purchase is preserved, and by
//!    default the grant is merge-written to the store.
//!
//! Nothing here returns an error. Store and function failures are mapped to
//! the step's policy and logged.

use crate::ack::AcknowledgmentManager;
use crate::config::{ProductCatalog, ValidatorPolicy};
use crate::error::ErrorClass;
use crate::identity::AccountIdentity;
use crate::notify::{Notification, NotificationSink};
use crate::state::EntitlementState;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tandem_cloud::{AccountStore, AccountUpdate, ValidatePurchaseRequest, ValidationFunction};
use tandem_types::{
    AccountId, Entitlement, EntitlementSource, PlanType, ProductId, Purchase, PurchaseToken,
};
use tracing::{debug, error, info, warn};

/// Which step settled a validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The account document says subscribed.
    Server,
    /// The validation function accepted the purchase.
    CloudFunction,
    /// The validation function rejected the purchase.
    Rejected,
    /// The account document no longer exists.
    AccountRemoved,
    /// The function failed; the grant was kept and written to the store.
    Fallback,
    /// The function failed; the last local value was kept.
    Preserved,
}

impl Resolution {
    /// Whether the outcome is final for the purchase token.
    pub fn is_decisive(&self) -> bool {
        !matches!(self, Self::Fallback | Self::Preserved)
    }

    /// Error class of a negative or degraded outcome.
    pub fn error_class(&self) -> Option<ErrorClass> {
        match self {
            Self::Server | Self::CloudFunction => None,
            Self::Rejected | Self::AccountRemoved => Some(ErrorClass::AuthoritativeRejection),
            Self::Fallback | Self::Preserved => Some(ErrorClass::Ambiguous),
        }
    }
}

/// Result of validating one purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Completed {
        entitlement: Entitlement,
        resolution: Resolution,
    },
    /// No signed-in account to attribute the purchase to.
    Unattributed,
    /// The token is being validated by another task.
    AlreadyInFlight,
    /// The token already received a decisive verdict.
    AlreadyValidated,
}

impl Validation {
    /// The resulting premium decision. Anything but a completed positive
    /// validation is false.
    pub fn is_subscribed(&self) -> bool {
        matches!(self, Self::Completed { entitlement, .. } if entitlement.is_subscribed)
    }
}

/// Why a token could not be claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimRejection {
    InFlight,
    /// Already settled; `confirmed` tells whether the verdict was positive.
    Validated { confirmed: bool },
}

#[derive(Default)]
struct TokenLedger {
    in_flight: HashSet<PurchaseToken>,
    validated: HashMap<PurchaseToken, bool>,
    /// Granted on fallback or preserve, still waiting for a verdict.
    provisional: HashSet<PurchaseToken>,
}

impl TokenLedger {
    /// Whether a purchase other than `token` is being validated or holds a
    /// provisional grant.
    fn others_unsettled(&self, token: &PurchaseToken) -> bool {
        self.in_flight
            .iter()
            .chain(&self.provisional)
            .any(|t| t != token)
    }
}

/// Exclusive right to validate one purchase token. Released on drop; the
/// token only counts as validated if the claim was settled.
pub struct TokenClaim {
    token: PurchaseToken,
    ledger: Arc<Mutex<TokenLedger>>,
    verdict: Option<bool>,
    provisional: bool,
}

impl TokenClaim {
    pub fn token(&self) -> &PurchaseToken {
        &self.token
    }

    fn settle(&mut self, confirmed: bool) {
        self.verdict = Some(confirmed);
    }

    fn grant_provisionally(&mut self) {
        self.provisional = true;
    }
}

impl Drop for TokenClaim {
    fn drop(&mut self) {
        let mut ledger = self.ledger.lock();
        ledger.in_flight.remove(&self.token);
        if let Some(confirmed) = self.verdict {
            ledger.provisional.remove(&self.token);
            ledger.validated.insert(self.token.clone(), confirmed);
        } else if self.provisional {
            ledger.provisional.insert(self.token.clone());
        }
    }
}

enum Verdict {
    Decided(Resolution),
    Ambiguous(String),
}

/// Sole writer of the entitlement state.
pub struct EntitlementValidator {
    store: Arc<dyn AccountStore>,
    function: Arc<dyn ValidationFunction>,
    identity: Arc<dyn AccountIdentity>,
    acks: Arc<AcknowledgmentManager>,
    sink: Arc<dyn NotificationSink>,
    catalog: ProductCatalog,
    policy: ValidatorPolicy,
    state: Arc<EntitlementState>,
    tokens: Arc<Mutex<TokenLedger>>,
}

impl EntitlementValidator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn AccountStore>,
        function: Arc<dyn ValidationFunction>,
        identity: Arc<dyn AccountIdentity>,
        acks: Arc<AcknowledgmentManager>,
        sink: Arc<dyn NotificationSink>,
        catalog: ProductCatalog,
        policy: ValidatorPolicy,
        state: Arc<EntitlementState>,
    ) -> Self {
        Self {
            store,
            function,
            identity,
            acks,
            sink,
            catalog,
            policy,
            state,
            tokens: Arc::new(Mutex::new(TokenLedger::default())),
        }
    }

    pub fn state(&self) -> &Arc<EntitlementState> {
        &self.state
    }

    /// Claims `token` for validation.
    pub fn claim(&self, token: &PurchaseToken) -> Result<TokenClaim, ClaimRejection> {
        let mut ledger = self.tokens.lock();
        if let Some(&confirmed) = ledger.validated.get(token) {
            return Err(ClaimRejection::Validated { confirmed });
        }
        if !ledger.in_flight.insert(token.clone()) {
            return Err(ClaimRejection::InFlight);
        }
        Ok(TokenClaim {
            token: token.clone(),
            ledger: Arc::clone(&self.tokens),
            verdict: None,
            provisional: false,
        })
    }

    /// Whether any observed purchase is still awaiting a verdict: being
    /// validated now, or granted on fallback or preserve.
    pub fn has_unsettled_purchases(&self) -> bool {
        let ledger = self.tokens.lock();
        !ledger.in_flight.is_empty() || !ledger.provisional.is_empty()
    }

    /// The settled verdict for `token`, if any.
    pub fn verdict_for(&self, token: &PurchaseToken) -> Option<bool> {
        self.tokens.lock().validated.get(token).copied()
    }

    /// Claims and validates `purchase`.
    pub async fn validate(&self, purchase: &Purchase) -> Validation {
        match self.claim(&purchase.purchase_token) {
            Ok(claim) => self.validate_claimed(purchase, claim).await,
            Err(ClaimRejection::InFlight) => Validation::AlreadyInFlight,
            Err(ClaimRejection::Validated { .. }) => Validation::AlreadyValidated,
        }
    }

    /// Validates a purchase whose token the caller has claimed.
    pub async fn validate_claimed(&self, purchase: &Purchase, mut claim: TokenClaim) -> Validation {
        let token = &purchase.purchase_token;
        let Some(account) = self.identity.current_account() else {
            warn!(token = %token, "No signed-in account, purchase cannot be attributed");
            return Validation::Unattributed;
        };

        let mut plan = self.plan_for(&purchase.product_id, &account);
        let verdict = match self.store.get_account(&account).await {
            Ok(None) => Verdict::Decided(Resolution::AccountRemoved),
            Ok(Some(doc)) if doc.is_subscribed => {
                plan = plan.or(doc.plan_type());
                Verdict::Decided(Resolution::Server)
            }
            Ok(Some(_)) => self.call_function(purchase).await,
            Err(e) => {
                warn!(token = %token, error = %e, "Account store read failed, asking validation function");
                self.call_function(purchase).await
            }
        };

        let resolution = match verdict {
            Verdict::Decided(resolution) => resolution,
            Verdict::Ambiguous(reason) => self.fail_preserve(&account, plan, token, &reason).await,
        };

        let entitlement = match resolution {
            Resolution::Server => {
                Entitlement::new(account, true, EntitlementSource::Server, plan)
            }
            Resolution::CloudFunction => {
                Entitlement::new(account, true, EntitlementSource::CloudFunction, plan)
            }
            Resolution::Rejected => match self.state.current() {
                // Another purchase still stands; one rejected token does not
                // revoke it.
                Some(current)
                    if current.account_id == account
                        && current.is_subscribed
                        && self.tokens.lock().others_unsettled(token) =>
                {
                    info!(token = %token, "Purchase rejected, keeping grant of an unsettled purchase");
                    current
                }
                _ => Entitlement::new(account, false, EntitlementSource::CloudFunction, plan),
            },
            Resolution::AccountRemoved => {
                Entitlement::new(account, false, EntitlementSource::Server, None)
            }
            Resolution::Fallback => {
                Entitlement::new(account, true, EntitlementSource::Fallback, plan)
            }
            Resolution::Preserved => match self.state.current() {
                Some(current) if current.account_id == account && current.is_subscribed => current,
                _ => Entitlement::new(account, true, EntitlementSource::Device, plan),
            },
        };
        self.state.set(entitlement.clone());

        match resolution {
            Resolution::Server | Resolution::CloudFunction => {
                claim.settle(true);
                info!(token = %token, ?resolution, "Purchase confirmed");
                if !purchase.acknowledged {
                    self.sink.notify(Notification::PurchaseConfirmed);
                }
                self.acks.acknowledge(purchase).await;
            }
            Resolution::Rejected => {
                claim.settle(false);
                info!(token = %token, "Purchase rejected by validation function");
                self.sink.notify(Notification::PurchaseRejected);
            }
            Resolution::AccountRemoved => {
                claim.settle(false);
                info!(token = %token, "Account document missing, entitlement revoked");
            }
            Resolution::Fallback | Resolution::Preserved => claim.grant_provisionally(),
        }

        Validation::Completed {
            entitlement,
            resolution,
        }
    }

    async fn call_function(&self, purchase: &Purchase) -> Verdict {
        let request = ValidatePurchaseRequest {
            purchase_token: purchase.purchase_token.clone(),
            product_id: purchase.product_id.clone(),
        };
        match self.function.validate_purchase(&request).await {
            Ok(response) if response.is_valid => Verdict::Decided(Resolution::CloudFunction),
            Ok(_) => Verdict::Decided(Resolution::Rejected),
            Err(e) => Verdict::Ambiguous(e.to_string()),
        }
    }

    // Runs at most once per validation; no retry here.
    async fn fail_preserve(
        &self,
        account: &AccountId,
        plan: Option<PlanType>,
        token: &PurchaseToken,
        reason: &str,
    ) -> Resolution {
        if !self.policy.fallback_on_ambiguous {
            warn!(token = %token, reason, "Validation ambiguous, keeping last known entitlement");
            return Resolution::Preserved;
        }

        warn!(token = %token, reason, "Validation ambiguous, granting and writing fallback");
        if let Err(e) = self
            .store
            .merge_fields(account, &AccountUpdate::subscribed(plan))
            .await
        {
            error!(token = %token, error = %e, "Fallback write failed, grant is local only");
        }
        Resolution::Fallback
    }

    /// Optimistic write on observing a purchase. Returns false when nobody
    /// is signed in.
    pub fn record_observed(&self, purchase: &Purchase) -> bool {
        let Some(account) = self.identity.current_account() else {
            return false;
        };
        let plan = self.plan_for(&purchase.product_id, &account);
        debug!(token = %purchase.purchase_token, "Purchase observed, granting optimistically");
        self.state.set(Entitlement::new(
            account,
            true,
            EntitlementSource::Device,
            plan,
        ));
        true
    }

    /// Grants without validation, for purchases the provider reports as
    /// already owned.
    pub fn force_subscribed(&self, plan: Option<PlanType>) -> Option<Entitlement> {
        let account = self.identity.current_account()?;
        let plan = plan.or_else(|| self.current_plan(&account));
        let entitlement = Entitlement::new(account, true, EntitlementSource::Device, plan);
        self.state.set(entitlement.clone());
        info!(?plan, "Product already owned, entitlement granted");
        Some(entitlement)
    }

    /// Re-derives the entitlement from the account store alone.
    ///
    /// A missing document revokes. A negative document does not override an
    /// inherited or fallback grant, nor a purchase still being validated. A
    /// read failure keeps the current value.
    pub async fn refresh(&self) -> Option<Entitlement> {
        let account = self.identity.current_account()?;
        let current = self
            .state
            .current()
            .filter(|current| current.account_id == account);

        let entitlement = match self.store.get_account(&account).await {
            Ok(None) => Entitlement::new(account, false, EntitlementSource::Server, None),
            Ok(Some(doc)) if doc.is_subscribed => Entitlement::new(
                account,
                true,
                EntitlementSource::Server,
                doc.plan_type(),
            ),
            Ok(Some(_)) => {
                let keep = current.as_ref().is_some_and(|c| {
                    c.is_subscribed
                        && matches!(
                            c.source,
                            EntitlementSource::Inherited | EntitlementSource::Fallback
                        )
                });
                if keep || self.has_unsettled_purchases() {
                    debug!("Store says unsubscribed, keeping local grant");
                    return current;
                }
                Entitlement::new(account, false, EntitlementSource::Server, None)
            }
            Err(e) => {
                warn!(error = %e, "Entitlement refresh failed, keeping last value");
                return current;
            }
        };
        self.state.set(entitlement.clone());
        Some(entitlement)
    }

    /// Applies a partner inheritance transition.
    ///
    /// Gaining inheritance grants unless the account is already subscribed
    /// on its own. Losing it revokes only an inherited grant, and never
    /// while a purchase is being validated. Returns true if the entitlement
    /// changed.
    pub fn apply_partner_sync(&self, inherited: bool) -> bool {
        let Some(account) = self.identity.current_account() else {
            return false;
        };
        let current = self
            .state
            .current()
            .filter(|current| current.account_id == account);

        if inherited {
            if current.as_ref().is_some_and(|c| {
                c.is_subscribed && c.source != EntitlementSource::Inherited
            }) {
                debug!("Already subscribed, inheritance recorded only");
                return false;
            }
            let plan = current.and_then(|c| c.plan_type);
            return self.state.set(Entitlement::new(
                account,
                true,
                EntitlementSource::Inherited,
                plan,
            ));
        }

        match current {
            Some(c) if c.is_subscribed && c.source == EntitlementSource::Inherited => {
                if self.has_unsettled_purchases() {
                    debug!("Inheritance lost during validation, keeping grant");
                    return false;
                }
                self.state.set(Entitlement::new(
                    account,
                    false,
                    EntitlementSource::Inherited,
                    None,
                ))
            }
            _ => false,
        }
    }

    fn plan_for(&self, product: &ProductId, account: &AccountId) -> Option<PlanType> {
        self.catalog
            .plan_for(product)
            .or_else(|| self.current_plan(account))
    }

    fn current_plan(&self, account: &AccountId) -> Option<PlanType> {
        self.state
            .current()
            .filter(|c| &c.account_id == account)
            .and_then(|c| c.plan_type)
    }
}
