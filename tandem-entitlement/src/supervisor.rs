//! Lifecycle of the purchase provider connection.

use crate::config::BackoffConfig;
use crate::provider::{FlowParams, ProductDetails, PurchaseProvider};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tandem_types::{ProductId, Purchase, PurchaseToken, ResultCode};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// State of the provider connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Setup failed. Manual [`ConnectionSupervisor::connect`] is still allowed.
    Error,
}

/// Inputs to the connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionSignal {
    /// A connection attempt is starting.
    Connecting,
    /// The provider reported the connection ready.
    Connected,
    /// The provider dropped the connection.
    Disconnected,
    /// Connection setup finished with an error.
    Failed(ResultCode),
    /// The connection was released locally.
    Released,
}

/// Owns the provider handle and the connection state.
///
/// [`on_state_changed`](Self::on_state_changed) is the only writer of the
/// state. Reconnects after a drop are delayed with capped exponential
/// backoff; the delay resets after the next successful connect.
pub struct ConnectionSupervisor {
    provider: Arc<dyn PurchaseProvider>,
    backoff: BackoffConfig,
    state: watch::Sender<ConnectionState>,
    last_error: Mutex<Option<ResultCode>>,
    attempts: AtomicU32,
    last_delay: Mutex<Option<Duration>>,
    reconnect: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl ConnectionSupervisor {
    pub fn new(provider: Arc<dyn PurchaseProvider>, backoff: BackoffConfig) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            provider,
            backoff,
            state,
            last_error: Mutex::new(None),
            attempts: AtomicU32::new(0),
            last_delay: Mutex::new(None),
            reconnect: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// A receiver woken on every state change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Result code of the last failed setup, cleared on connect.
    pub fn last_error(&self) -> Option<ResultCode> {
        *self.last_error.lock()
    }

    /// Reconnects scheduled since the last successful connect.
    pub fn consecutive_failures(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Delay of the most recently scheduled reconnect.
    pub fn last_reconnect_delay(&self) -> Option<Duration> {
        *self.last_delay.lock()
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Applies a signal to the state machine. Returns true if the state
    /// changed.
    pub fn on_state_changed(self: &Arc<Self>, signal: ConnectionSignal) -> bool {
        if self.closed.load(Ordering::SeqCst) && signal != ConnectionSignal::Released {
            debug!(?signal, "Supervisor closed, signal ignored");
            return false;
        }

        let mut schedule = false;
        let changed = self.state.send_if_modified(|state| {
            let next = match (signal, *state) {
                (
                    ConnectionSignal::Connecting,
                    ConnectionState::Disconnected | ConnectionState::Error,
                ) => ConnectionState::Connecting,
                (ConnectionSignal::Connected, ConnectionState::Connected) => return false,
                (ConnectionSignal::Connected, _) => ConnectionState::Connected,
                (ConnectionSignal::Disconnected, ConnectionState::Connected) => {
                    schedule = true;
                    ConnectionState::Disconnected
                }
                (ConnectionSignal::Failed(code), ConnectionState::Connecting) => {
                    schedule = !code.is_terminal_for_connection();
                    ConnectionState::Error
                }
                (ConnectionSignal::Released, s) if s != ConnectionState::Disconnected => {
                    ConnectionState::Disconnected
                }
                _ => return false,
            };
            *state = next;
            true
        });

        if !changed {
            debug!(?signal, state = ?self.state(), "Connection signal ignored");
            return false;
        }

        match signal {
            ConnectionSignal::Connected => {
                self.attempts.store(0, Ordering::SeqCst);
                *self.last_error.lock() = None;
                if let Some(timer) = self.reconnect.lock().take() {
                    timer.abort();
                }
                info!("Purchase provider connected");
            }
            ConnectionSignal::Failed(code) => {
                *self.last_error.lock() = Some(code);
                if schedule {
                    warn!(?code, "Purchase provider setup failed");
                } else {
                    warn!(?code, "Purchase provider unavailable, not retrying");
                }
            }
            ConnectionSignal::Disconnected => info!("Purchase provider disconnected"),
            _ => {}
        }

        if schedule {
            self.schedule_reconnect();
        }
        true
    }

    /// Connects unless already connecting or connected. Never runs two setup
    /// attempts at once.
    pub async fn connect(self: &Arc<Self>) -> ConnectionState {
        if !self.on_state_changed(ConnectionSignal::Connecting) {
            return self.state();
        }

        debug!("Starting purchase provider connection");
        let code = self.provider.start_connection().await;
        if code.is_ok() {
            self.on_state_changed(ConnectionSignal::Connected);
        } else {
            self.on_state_changed(ConnectionSignal::Failed(code));
        }
        self.state()
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let mut slot = self.reconnect.lock();
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("Reconnect already scheduled");
            return;
        }

        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        let delay = self.backoff.delay_for_attempt(attempt);
        *self.last_delay.lock() = Some(delay);
        warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnect scheduled"
        );

        let weak = Arc::downgrade(self);
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(this) = weak.upgrade() else {
                return;
            };
            this.reconnect.lock().take();
            this.connect().await;
        }));
    }

    /// Cancels any pending reconnect and refuses further connects.
    pub fn stop_reconnecting(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(timer) = self.reconnect.lock().take() {
            timer.abort();
            debug!("Reconnect timer cancelled");
        }
    }

    /// Stops reconnecting and releases the provider connection.
    pub async fn release(self: &Arc<Self>) {
        self.stop_reconnecting();
        self.provider.end_connection().await;
        self.on_state_changed(ConnectionSignal::Released);
        info!("Purchase provider connection released");
    }

    // Provider access. Everything else reaches the provider through here.

    pub async fn query_product(
        &self,
        product: &ProductId,
    ) -> Result<Option<ProductDetails>, ResultCode> {
        if !self.is_connected() {
            return Err(ResultCode::ServiceDisconnected);
        }
        self.provider.query_product(product).await
    }

    pub async fn launch_purchase_flow(&self, params: &FlowParams) -> ResultCode {
        if !self.is_connected() {
            return ResultCode::ServiceDisconnected;
        }
        self.provider.launch_purchase_flow(params).await
    }

    pub async fn acknowledge(&self, token: &PurchaseToken) -> ResultCode {
        if !self.is_connected() {
            return ResultCode::ServiceDisconnected;
        }
        self.provider.acknowledge(token).await
    }

    pub async fn query_purchases(&self) -> Result<Vec<Purchase>, ResultCode> {
        if !self.is_connected() {
            return Err(ResultCode::ServiceDisconnected);
        }
        self.provider.query_purchases().await
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        if let Some(timer) = self.reconnect.get_mut().take() {
            timer.abort();
        }
    }
}
