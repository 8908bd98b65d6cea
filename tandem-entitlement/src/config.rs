//! Configuration for the entitlement core.

use crate::error::{EntitlementError, EntitlementResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tandem_types::{PlanType, ProductId};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EntitlementConfig {
    /// Backoff between provider reconnect attempts.
    pub reconnect: BackoffConfig,
    /// Partner-sync polling.
    pub partner_sync: PartnerSyncConfig,
    /// Store listing ids per plan.
    pub catalog: ProductCatalog,
    /// Validation error policy.
    pub validator: ValidatorPolicy,
}

impl EntitlementConfig {
    /// Parses a JSON configuration. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> EntitlementResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> EntitlementResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Rejects values that would make a loop spin or a backoff shrink.
    pub fn validate(&self) -> EntitlementResult<()> {
        self.reconnect.validate("reconnect")?;
        self.partner_sync.cooldown.validate("partner_sync.cooldown")?;
        if self.partner_sync.interval_ms == 0 {
            return Err(EntitlementError::Config(
                "partner_sync.interval_ms must be non-zero".into(),
            ));
        }
        if self.catalog.monthly == self.catalog.annual {
            return Err(EntitlementError::Config(
                "catalog plans must use distinct product ids".into(),
            ));
        }
        Ok(())
    }
}

/// Capped exponential backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first retry (ms).
    pub initial_delay_ms: u64,
    /// Upper bound on any delay (ms).
    pub max_delay_ms: u64,
    /// Growth factor between consecutive attempts.
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Creates a backoff from millisecond bounds with multiplier 2.
    pub fn new(initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            initial_delay_ms,
            max_delay_ms,
            multiplier: 2.0,
        }
    }

    /// Delay before attempt `attempt` (1-based; 0 is treated as 1).
    ///
    /// Non-decreasing in `attempt` and never above `max_delay_ms`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.initial_delay_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        let capped = millis.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// Upper bound of every delay.
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    fn validate(&self, name: &str) -> EntitlementResult<()> {
        if self.initial_delay_ms == 0 {
            return Err(EntitlementError::Config(format!(
                "{name}.initial_delay_ms must be non-zero"
            )));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(EntitlementError::Config(format!(
                "{name}.max_delay_ms must be >= initial_delay_ms"
            )));
        }
        if !(self.multiplier >= 1.0) {
            return Err(EntitlementError::Config(format!(
                "{name}.multiplier must be >= 1.0"
            )));
        }
        Ok(())
    }
}

/// Partner-sync polling configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartnerSyncConfig {
    /// Delay between successful reconciliations (ms).
    pub interval_ms: u64,
    /// Delay after failed reconciliations, growing with consecutive failures.
    pub cooldown: BackoffConfig,
}

impl Default for PartnerSyncConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            cooldown: BackoffConfig::new(5_000, 60_000),
        }
    }
}

impl PartnerSyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Store listing id of each plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductCatalog {
    pub monthly: ProductId,
    pub annual: ProductId,
}

impl Default for ProductCatalog {
    fn default() -> Self {
        Self {
            monthly: ProductId::new("premium_monthly"),
            annual: ProductId::new("premium_annual"),
        }
    }
}

impl ProductCatalog {
    /// Returns the product sold for a plan.
    pub fn product_for(&self, plan: PlanType) -> &ProductId {
        match plan {
            PlanType::Monthly => &self.monthly,
            PlanType::Annual => &self.annual,
        }
    }

    /// Returns the plan a product belongs to, if it is one of ours.
    pub fn plan_for(&self, product: &ProductId) -> Option<PlanType> {
        PlanType::ALL
            .into_iter()
            .find(|plan| self.product_for(*plan) == product)
    }
}

/// How the validator resolves an ambiguous validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorPolicy {
    /// When the validation function fails without a verdict, grant the
    /// purchase and merge-write `isSubscribed=true` to the account store.
    /// When false, the last local value is kept and nothing is written.
    pub fallback_on_ambiguous: bool,
}

impl Default for ValidatorPolicy {
    fn default() -> Self {
        Self {
            fallback_on_ambiguous: true,
        }
    }
}
