//! Operator commands against the Tandem account store and functions.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tandem_cloud::{
    AccountDocument, AccountStore, AccountUpdate, CloudConfig, FunctionsClient,
    HttpAccountStore, PartnerSyncFunction, PartnerSyncRequest, PartnerSyncResponse,
    ValidatePurchaseRequest, ValidationFunction,
};
use tandem_types::{AccountId, PartnerId, PlanType, ProductId, PurchaseToken};
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "tandem")]
#[command(about = "Inspect and repair Tandem premium entitlements")]
pub struct Args {
    /// JSON file with endpoint settings; flags override it
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Base URL of the account store API
    #[arg(long)]
    pub store_url: Option<String>,

    /// Base URL of the callable functions
    #[arg(long)]
    pub functions_url: Option<String>,

    /// Bearer token sent with every request
    #[arg(long)]
    pub id_token: Option<String>,

    /// Request timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Print an account document
    Account {
        /// Account id
        id: String,
    },
    /// Call the purchase validation function
    Validate {
        #[arg(long)]
        token: String,
        #[arg(long)]
        product: String,
    },
    /// Call the partner-sync function
    PartnerSync {
        #[arg(long)]
        partner: String,
    },
    /// Merge-write `isSubscribed=true` for an account
    Grant {
        /// Account id
        id: String,
        /// monthly or annual
        #[arg(long)]
        plan: Option<String>,
    },
}

impl Args {
    /// Endpoint settings from the config file (if any) and flags.
    pub fn cloud_config(&self) -> Result<CloudConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("parsing {}", path.display()))?
            }
            None => CloudConfig::default(),
        };
        if let Some(url) = &self.store_url {
            config.store_base_url = url.clone();
        }
        if let Some(url) = &self.functions_url {
            config.functions_base_url = url.clone();
        }
        if let Some(token) = &self.id_token {
            config.id_token = Some(token.clone());
        }
        if let Some(timeout) = self.timeout_ms {
            config.timeout_ms = timeout;
        }
        config.validate().context("invalid endpoint configuration")?;
        Ok(config)
    }
}

/// Output of `account`.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccountReport {
    pub account_id: AccountId,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<AccountDocument>,
}

/// Output of `validate`.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValidateReport {
    pub purchase_token: PurchaseToken,
    pub product_id: ProductId,
    pub is_valid: bool,
}

/// Output of `grant`.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GrantReport {
    pub account_id: AccountId,
    pub update: AccountUpdate,
}

pub async fn account(store: &dyn AccountStore, id: &str) -> Result<AccountReport> {
    let account_id = AccountId::parse(id)?;
    let document = store
        .get_account(&account_id)
        .await
        .with_context(|| format!("reading account {account_id}"))?;
    Ok(AccountReport {
        account_id,
        exists: document.is_some(),
        document,
    })
}

pub async fn validate(
    function: &dyn ValidationFunction,
    token: &str,
    product: &str,
) -> Result<ValidateReport> {
    let request = ValidatePurchaseRequest {
        purchase_token: PurchaseToken::parse(token)?,
        product_id: ProductId::parse(product)?,
    };
    let response = function
        .validate_purchase(&request)
        .await
        .context("calling validation function")?;
    Ok(ValidateReport {
        purchase_token: request.purchase_token,
        product_id: request.product_id,
        is_valid: response.is_valid,
    })
}

pub async fn partner_sync(
    function: &dyn PartnerSyncFunction,
    partner: &str,
) -> Result<PartnerSyncResponse> {
    let request = PartnerSyncRequest {
        partner_id: PartnerId::parse(partner)?,
    };
    function
        .sync_partner(&request)
        .await
        .context("calling partner-sync function")
}

/// Writes only the subscription fields, leaving the rest of the document
/// untouched.
pub async fn grant(store: &dyn AccountStore, id: &str, plan: Option<&str>) -> Result<GrantReport> {
    let account_id = AccountId::parse(id)?;
    let plan = plan.map(str::parse::<PlanType>).transpose()?;
    let update = AccountUpdate::subscribed(plan);
    store
        .merge_fields(&account_id, &update)
        .await
        .with_context(|| format!("granting premium to {account_id}"))?;
    info!(account = %account_id, ?plan, "Premium granted");
    Ok(GrantReport { account_id, update })
}

/// Runs a command and renders its report as pretty JSON.
pub async fn run(args: &Args) -> Result<String> {
    let config = args.cloud_config()?;
    debug!(store = %config.store_base_url, functions = %config.functions_base_url, "Endpoints");

    let json = match &args.command {
        Command::Account { id } => {
            let store = HttpAccountStore::new(config)?;
            serde_json::to_string_pretty(&account(&store, id).await?)?
        }
        Command::Validate { token, product } => {
            let functions = FunctionsClient::new(config)?;
            serde_json::to_string_pretty(&validate(&functions, token, product).await?)?
        }
        Command::PartnerSync { partner } => {
            let functions = FunctionsClient::new(config)?;
            serde_json::to_string_pretty(&partner_sync(&functions, partner).await?)?
        }
        Command::Grant { id, plan } => {
            let store = HttpAccountStore::new(config)?;
            serde_json::to_string_pretty(&grant(&store, id, plan.as_deref()).await?)?
        }
    };
    Ok(json)
}
