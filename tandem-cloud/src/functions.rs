//! Callable remote functions: purchase validation and partner sync.
//!
//! Both are stateless RPC endpoints using the callable envelope: the request
//! body is `{"data": <request>}` and a successful response body is
//! `{"result": <response>}`. Failures come back as
//! `{"error": {"status": "...", "message": "..."}}`.

use crate::config::CloudConfig;
use crate::error::{CloudError, CloudResult};
use crate::http::{HttpBase, error_for_status, send_error};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tandem_types::{PartnerId, ProductId, PurchaseToken};
use tracing::debug;

/// Name of the purchase validation function.
pub const VALIDATE_PURCHASE_FN: &str = "validatePurchase";
/// Name of the partner subscription sync function.
pub const SYNC_PARTNER_FN: &str = "syncPartnerSubscription";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatePurchaseRequest {
    pub purchase_token: PurchaseToken,
    pub product_id: ProductId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatePurchaseResponse {
    pub is_valid: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerSyncRequest {
    pub partner_id: PartnerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerSyncResponse {
    pub success: bool,
    #[serde(default)]
    pub subscription_inherited: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_partner_name: Option<String>,
}

/// Server-side verification of a purchase token.
#[async_trait]
pub trait ValidationFunction: Send + Sync {
    /// Returns the verdict, or an error if no verdict was obtained.
    async fn validate_purchase(
        &self,
        request: &ValidatePurchaseRequest,
    ) -> CloudResult<ValidatePurchaseResponse>;
}

/// Server-side reconciliation of entitlement with a linked partner.
#[async_trait]
pub trait PartnerSyncFunction: Send + Sync {
    async fn sync_partner(&self, request: &PartnerSyncRequest) -> CloudResult<PartnerSyncResponse>;
}

#[derive(Serialize)]
struct CallEnvelope<'a, T> {
    data: &'a T,
}

#[derive(Deserialize)]
struct ResultEnvelope<T> {
    result: T,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: FunctionError,
}

#[derive(Deserialize)]
struct FunctionError {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
}

/// HTTP client for the callable functions.
pub struct FunctionsClient {
    http: HttpBase,
}

impl FunctionsClient {
    /// Creates a functions client.
    pub fn new(config: CloudConfig) -> CloudResult<Self> {
        Ok(Self {
            http: HttpBase::new(config)?,
        })
    }

    /// Replaces the bearer token used for subsequent calls.
    pub async fn set_id_token(&self, token: Option<String>) {
        self.http.set_id_token(token).await;
    }

    async fn call<Req, Resp>(&self, name: &str, request: &Req) -> CloudResult<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        debug!(function = name, "calling remote function");
        let builder = self
            .http
            .client
            .post(self.http.config.function_url(name))
            .json(&CallEnvelope { data: request });
        let response = self
            .http
            .authorize(builder)
            .await
            .send()
            .await
            .map_err(send_error)?;

        let status = response.status();
        if status.is_success() {
            let envelope: ResultEnvelope<Resp> = response.json().await?;
            return Ok(envelope.result);
        }

        if status != StatusCode::TOO_MANY_REQUESTS
            && (status.is_client_error() || status.is_server_error())
        {
            let bytes = response.bytes().await.map_err(send_error)?;
            if let Ok(ErrorEnvelope { error }) = serde_json::from_slice::<ErrorEnvelope>(&bytes) {
                return Err(CloudError::Function {
                    function: name.to_string(),
                    status: error.status,
                    message: error.message,
                });
            }
            return Err(CloudError::Status {
                status: status.as_u16(),
                message: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        Err(error_for_status(response).await)
    }
}

#[async_trait]
impl ValidationFunction for FunctionsClient {
    async fn validate_purchase(
        &self,
        request: &ValidatePurchaseRequest,
    ) -> CloudResult<ValidatePurchaseResponse> {
        self.call(VALIDATE_PURCHASE_FN, request).await
    }
}

#[async_trait]
impl PartnerSyncFunction for FunctionsClient {
    async fn sync_partner(&self, request: &PartnerSyncRequest) -> CloudResult<PartnerSyncResponse> {
        self.call(SYNC_PARTNER_FN, request).await
    }
}
