//! Shared HTTP plumbing for the store and function clients.

use crate::config::CloudConfig;
use crate::error::{CloudError, CloudResult};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A configured reqwest client plus the current bearer token.
#[derive(Clone)]
pub(crate) struct HttpBase {
    pub(crate) config: CloudConfig,
    pub(crate) client: Client,
    id_token: Arc<RwLock<Option<String>>>,
}

impl HttpBase {
    pub(crate) fn new(config: CloudConfig) -> CloudResult<Self> {
        config.validate()?;
        let client = Client::builder().timeout(config.timeout()).build()?;
        let id_token = Arc::new(RwLock::new(config.id_token.clone()));
        Ok(Self {
            config,
            client,
            id_token,
        })
    }

    pub(crate) async fn set_id_token(&self, token: Option<String>) {
        *self.id_token.write().await = token;
    }

    pub(crate) async fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.id_token.read().await.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

/// Converts a non-success response into a `CloudError`.
pub(crate) async fn error_for_status(response: Response) -> CloudError {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);
        return CloudError::RateLimited { retry_after_secs };
    }

    let body = response.text().await.unwrap_or_default();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CloudError::AuthFailed(body),
        _ => CloudError::Status {
            status: status.as_u16(),
            message: body,
        },
    }
}

/// Maps reqwest send failures, keeping timeouts distinguishable.
pub(crate) fn send_error(err: reqwest::Error) -> CloudError {
    if err.is_timeout() {
        CloudError::Timeout
    } else {
        CloudError::Http(err)
    }
}
