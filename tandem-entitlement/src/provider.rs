//! Interface of the device-local purchase provider.
//!
//! The provider is callback-based on every platform. Here connection setup,
//! flow launch and acknowledgment are plain async calls, and the unsolicited
//! callbacks (disconnects, purchase updates) arrive as [`ProviderEvent`]s on a
//! channel that the session pumps.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tandem_types::{AccountId, ProductId, Purchase, PurchaseToken, ResultCode};

/// Product metadata as listed by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDetails {
    pub product_id: ProductId,
    pub title: String,
    pub formatted_price: Option<String>,
    /// Token of the offer to purchase. A subscription cannot be bought
    /// without one.
    pub offer_token: Option<String>,
}

/// Parameters for launching the native purchase UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowParams {
    pub product_id: ProductId,
    pub offer_token: String,
    /// Attributes the purchase to the signed-in account.
    pub obfuscated_account_id: Option<AccountId>,
}

/// Unsolicited callbacks from the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// The connection became ready.
    Connected,
    /// The provider dropped the connection.
    Disconnected,
    /// Result of a purchase flow, or a purchase made outside the app.
    PurchasesUpdated {
        code: ResultCode,
        purchases: Vec<Purchase>,
    },
}

/// The purchase provider connection.
///
/// Only the connection supervisor holds this handle.
#[async_trait]
pub trait PurchaseProvider: Send + Sync {
    /// Starts connecting and resolves with the setup result.
    async fn start_connection(&self) -> ResultCode;

    /// Releases the connection.
    async fn end_connection(&self);

    /// Looks up the listing of a product. `Ok(None)` means the provider does
    /// not know the product.
    async fn query_product(&self, product: &ProductId) -> Result<Option<ProductDetails>, ResultCode>;

    /// Shows the native purchase UI. `Ok` only means the UI was shown.
    async fn launch_purchase_flow(&self, params: &FlowParams) -> ResultCode;

    /// Acknowledges a purchase. Idempotent on the provider side.
    async fn acknowledge(&self, token: &PurchaseToken) -> ResultCode;

    /// Lists purchases the user already owns.
    async fn query_purchases(&self) -> Result<Vec<Purchase>, ResultCode>;
}

/// A scriptable in-memory provider.
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    const EVENT_BUFFER: usize = 64;

    /// Provider double. Calls are recorded, results are scripted, and
    /// callbacks are injected with [`MockProvider::emit`].
    pub struct MockProvider {
        events: mpsc::Sender<ProviderEvent>,
        connect_results: Mutex<VecDeque<ResultCode>>,
        connect_delay: Mutex<Option<Duration>>,
        connect_calls: AtomicUsize,
        connecting: AtomicUsize,
        max_connecting: AtomicUsize,
        end_calls: AtomicUsize,
        products: Mutex<HashMap<ProductId, ProductDetails>>,
        query_error: Mutex<Option<ResultCode>>,
        launch_result: Mutex<ResultCode>,
        launches: Mutex<Vec<FlowParams>>,
        ack_results: Mutex<VecDeque<ResultCode>>,
        acks: Mutex<Vec<PurchaseToken>>,
        owned: Mutex<Vec<Purchase>>,
    }

    impl MockProvider {
        /// Creates a provider and the receiving end of its callbacks.
        pub fn new() -> (Arc<Self>, mpsc::Receiver<ProviderEvent>) {
            let (tx, rx) = mpsc::channel(EVENT_BUFFER);
            let provider = Self {
                events: tx,
                connect_results: Mutex::new(VecDeque::new()),
                connect_delay: Mutex::new(None),
                connect_calls: AtomicUsize::new(0),
                connecting: AtomicUsize::new(0),
                max_connecting: AtomicUsize::new(0),
                end_calls: AtomicUsize::new(0),
                products: Mutex::new(HashMap::new()),
                query_error: Mutex::new(None),
                launch_result: Mutex::new(ResultCode::Ok),
                launches: Mutex::new(Vec::new()),
                ack_results: Mutex::new(VecDeque::new()),
                acks: Mutex::new(Vec::new()),
                owned: Mutex::new(Vec::new()),
            };
            (Arc::new(provider), rx)
        }

        /// Delivers a callback. Dropped if the receiver is gone or full.
        pub fn emit(&self, event: ProviderEvent) {
            let _ = self.events.try_send(event);
        }

        /// Delivers a purchase update.
        pub fn deliver(&self, code: ResultCode, purchases: Vec<Purchase>) {
            self.emit(ProviderEvent::PurchasesUpdated { code, purchases });
        }

        /// Scripts the results of upcoming connection attempts. Unscripted
        /// attempts succeed.
        pub fn script_connect(&self, results: impl IntoIterator<Item = ResultCode>) {
            self.connect_results.lock().extend(results);
        }

        /// Keeps every connection attempt pending for `delay`.
        pub fn set_connect_delay(&self, delay: Duration) {
            *self.connect_delay.lock() = Some(delay);
        }

        pub fn connect_calls(&self) -> usize {
            self.connect_calls.load(Ordering::SeqCst)
        }

        /// Highest number of connection attempts seen in flight at once.
        pub fn max_concurrent_connects(&self) -> usize {
            self.max_connecting.load(Ordering::SeqCst)
        }

        pub fn end_calls(&self) -> usize {
            self.end_calls.load(Ordering::SeqCst)
        }

        /// Lists a product with an offer.
        pub fn add_product(&self, product: impl Into<ProductId>) {
            let product_id = product.into();
            let details = ProductDetails {
                title: format!("Tandem {product_id}"),
                formatted_price: Some("$4.99".into()),
                offer_token: Some(format!("offer-{product_id}")),
                product_id: product_id.clone(),
            };
            self.products.lock().insert(product_id, details);
        }

        /// Lists a product with explicit details.
        pub fn add_product_details(&self, details: ProductDetails) {
            self.products
                .lock()
                .insert(details.product_id.clone(), details);
        }

        /// Makes product queries fail with `code`.
        pub fn fail_queries(&self, code: Option<ResultCode>) {
            *self.query_error.lock() = code;
        }

        pub fn set_launch_result(&self, code: ResultCode) {
            *self.launch_result.lock() = code;
        }

        pub fn launches(&self) -> Vec<FlowParams> {
            self.launches.lock().clone()
        }

        /// Scripts the results of upcoming acknowledgments. Unscripted calls
        /// succeed.
        pub fn script_acks(&self, results: impl IntoIterator<Item = ResultCode>) {
            self.ack_results.lock().extend(results);
        }

        /// Every acknowledge call, successful or not.
        pub fn acks(&self) -> Vec<PurchaseToken> {
            self.acks.lock().clone()
        }

        /// Sets the purchases reported as already owned.
        pub fn set_owned(&self, purchases: Vec<Purchase>) {
            *self.owned.lock() = purchases;
        }
    }

    #[async_trait]
    impl PurchaseProvider for MockProvider {
        async fn start_connection(&self) -> ResultCode {
            self.connect_calls.fetch_add(1, Ordering::SeqCst);
            let now = self.connecting.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_connecting.fetch_max(now, Ordering::SeqCst);

            let delay = *self.connect_delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            self.connecting.fetch_sub(1, Ordering::SeqCst);
            self.connect_results
                .lock()
                .pop_front()
                .unwrap_or(ResultCode::Ok)
        }

        async fn end_connection(&self) {
            self.end_calls.fetch_add(1, Ordering::SeqCst);
        }

        async fn query_product(
            &self,
            product: &ProductId,
        ) -> Result<Option<ProductDetails>, ResultCode> {
            if let Some(code) = *self.query_error.lock() {
                return Err(code);
            }
            Ok(self.products.lock().get(product).cloned())
        }

        async fn launch_purchase_flow(&self, params: &FlowParams) -> ResultCode {
            self.launches.lock().push(params.clone());
            *self.launch_result.lock()
        }

        async fn acknowledge(&self, token: &PurchaseToken) -> ResultCode {
            self.acks.lock().push(token.clone());
            self.ack_results.lock().pop_front().unwrap_or(ResultCode::Ok)
        }

        async fn query_purchases(&self) -> Result<Vec<Purchase>, ResultCode> {
            Ok(self.owned.lock().clone())
        }
    }
}
