//! The resolved entitlement record.

use crate::Error;
use crate::ids::{AccountId, PartnerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The subscription plan a purchase belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    /// Monthly subscription.
    Monthly,
    /// Annual subscription.
    Annual,
}

impl PlanType {
    /// All plans, in display order.
    pub const ALL: [PlanType; 2] = [PlanType::Monthly, PlanType::Annual];

    /// The value stored in the account document's `subscriptionType` field.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Annual => "annual",
        }
    }
}

impl fmt::Display for PlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monthly" => Ok(Self::Monthly),
            "annual" | "yearly" => Ok(Self::Annual),
            other => Err(Error::UnknownPlan(other.to_string())),
        }
    }
}

/// Where the current entitlement value came from, ordered loosely from least
/// to most authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntitlementSource {
    /// Optimistic write on observing a purchase on this device.
    Device,
    /// The remote account document.
    Server,
    /// The remote validation function's verdict.
    CloudFunction,
    /// Inherited from the linked partner.
    Inherited,
    /// Granted after an ambiguous validation failure.
    Fallback,
}

/// The resolved premium-access decision for one account.
///
/// Re-derived as a whole on every validation pass, never patched field by
/// field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entitlement {
    /// The account this decision applies to.
    pub account_id: AccountId,
    /// Whether premium features are unlocked.
    pub is_subscribed: bool,
    /// Which step of the resolution chain produced the value.
    pub source: EntitlementSource,
    /// The plan, when known.
    pub plan_type: Option<PlanType>,
    /// When the value was derived.
    pub last_validated_at: DateTime<Utc>,
}

impl Entitlement {
    /// Creates an entitlement stamped with the current time.
    #[must_use]
    pub fn new(
        account_id: AccountId,
        is_subscribed: bool,
        source: EntitlementSource,
        plan_type: Option<PlanType>,
    ) -> Self {
        Self {
            account_id,
            is_subscribed,
            source,
            plan_type,
            last_validated_at: Utc::now(),
        }
    }

    /// Returns true if `other` carries the same decision, ignoring the
    /// timestamp.
    #[must_use]
    pub fn same_decision(&self, other: &Self) -> bool {
        self.account_id == other.account_id
            && self.is_subscribed == other.is_subscribed
            && self.source == other.source
            && self.plan_type == other.plan_type
    }
}

/// A link between an account and its partner. Owned by account management;
/// read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerLink {
    pub account_id: AccountId,
    pub partner_id: PartnerId,
}

impl PartnerLink {
    pub fn new(account_id: impl Into<AccountId>, partner_id: impl Into<PartnerId>) -> Self {
        Self {
            account_id: account_id.into(),
            partner_id: partner_id.into(),
        }
    }
}
