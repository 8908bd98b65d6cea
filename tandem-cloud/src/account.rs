//! Remote account store.
//!
//! The account document is shared by this client, the server-side functions
//! and the partner's client. Writes are therefore always partial merges of
//! the named fields; a whole-document overwrite would clobber concurrent
//! partner-side writes.

use crate::config::CloudConfig;
use crate::error::{CloudError, CloudResult};
use crate::http::{HttpBase, error_for_status, send_error};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tandem_types::{AccountId, PartnerId, PlanType};
use tracing::debug;

/// The entitlement-relevant fields of an account document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccountDocument {
    /// The authoritative subscribed flag.
    pub is_subscribed: bool,
    /// `"monthly"` / `"annual"` when subscribed.
    pub subscription_type: Option<String>,
    /// The linked partner, if any.
    pub partner_id: Option<PartnerId>,
}

impl AccountDocument {
    /// Parses `subscription_type` into a plan, ignoring unknown values.
    pub fn plan_type(&self) -> Option<PlanType> {
        self.subscription_type.as_deref().and_then(|s| s.parse().ok())
    }
}

/// A partial update. Only the fields that are `Some` are written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_subscribed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_type: Option<String>,
}

impl AccountUpdate {
    /// An update that marks the account subscribed on the given plan.
    pub fn subscribed(plan: Option<PlanType>) -> Self {
        Self {
            is_subscribed: Some(true),
            subscription_type: plan.map(|p| p.as_str().to_string()),
        }
    }

    /// Returns the names of the fields this update touches, in wire form.
    pub fn field_mask(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.is_subscribed.is_some() {
            fields.push("isSubscribed");
        }
        if self.subscription_type.is_some() {
            fields.push("subscriptionType");
        }
        fields
    }

    /// Returns true if the update would write nothing.
    pub fn is_empty(&self) -> bool {
        self.field_mask().is_empty()
    }

    /// Applies this update onto a document with merge semantics.
    pub fn apply_to(&self, doc: &mut AccountDocument) {
        if let Some(subscribed) = self.is_subscribed {
            doc.is_subscribed = subscribed;
        }
        if let Some(plan) = &self.subscription_type {
            doc.subscription_type = Some(plan.clone());
        }
    }
}

/// Point reads and partial updates of account documents.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Reads an account document. `Ok(None)` means the document does not
    /// exist (the account was removed).
    async fn get_account(&self, account: &AccountId) -> CloudResult<Option<AccountDocument>>;

    /// Merges the given fields into an existing document.
    async fn merge_fields(&self, account: &AccountId, update: &AccountUpdate) -> CloudResult<()>;
}

/// Account store backed by the REST document API.
pub struct HttpAccountStore {
    http: HttpBase,
}

impl HttpAccountStore {
    /// Creates a store client.
    pub fn new(config: CloudConfig) -> CloudResult<Self> {
        Ok(Self {
            http: HttpBase::new(config)?,
        })
    }

    /// Replaces the bearer token used for subsequent requests.
    pub async fn set_id_token(&self, token: Option<String>) {
        self.http.set_id_token(token).await;
    }

    fn document_url(&self, account: &AccountId) -> String {
        self.http.config.store_url(&format!("accounts/{account}"))
    }
}

#[async_trait]
impl AccountStore for HttpAccountStore {
    async fn get_account(&self, account: &AccountId) -> CloudResult<Option<AccountDocument>> {
        let request = self.http.client.get(self.document_url(account));
        let response = self
            .http
            .authorize(request)
            .await
            .send()
            .await
            .map_err(send_error)?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!(%account, "account document not found");
                Ok(None)
            }
            s if s.is_success() => Ok(Some(response.json().await?)),
            _ => Err(error_for_status(response).await),
        }
    }

    async fn merge_fields(&self, account: &AccountId, update: &AccountUpdate) -> CloudResult<()> {
        if update.is_empty() {
            return Ok(());
        }

        let mask = update.field_mask().join(",");
        let request = self
            .http
            .client
            .patch(self.document_url(account))
            .query(&[("updateMask", mask.as_str())])
            .json(update);
        let response = self
            .http
            .authorize(request)
            .await
            .send()
            .await
            .map_err(send_error)?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(CloudError::NotFound(format!("account {account}"))),
            s if s.is_success() => {
                debug!(%account, fields = %mask, "merged account fields");
                Ok(())
            }
            _ => Err(error_for_status(response).await),
        }
    }
}
