//! Per-account wiring of the entitlement components.

use crate::ack::AcknowledgmentManager;
use crate::config::EntitlementConfig;
use crate::error::{EntitlementError, EntitlementResult, PurchaseError};
use crate::flow::{FlowOutcome, PurchaseFlowController};
use crate::identity::AccountIdentity;
use crate::notify::NotificationSink;
use crate::partner::{PartnerSyncCoordinator, SyncResult};
use crate::provider::{ProviderEvent, PurchaseProvider};
use crate::router::{DispatchSummary, PurchaseEventRouter, RouteOutcome};
use crate::state::EntitlementState;
use crate::supervisor::{ConnectionSignal, ConnectionState, ConnectionSupervisor};
use crate::validator::EntitlementValidator;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tandem_cloud::{AccountStore, PartnerSyncFunction, ValidationFunction};
use tandem_types::{Entitlement, PartnerLink, PlanType, Purchase, ResultCode};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Collaborators of a session.
pub struct SessionDeps {
    pub provider: Arc<dyn PurchaseProvider>,
    pub store: Arc<dyn AccountStore>,
    pub validation: Arc<dyn ValidationFunction>,
    pub partner_sync: Arc<dyn PartnerSyncFunction>,
    pub identity: Arc<dyn AccountIdentity>,
    pub sink: Arc<dyn NotificationSink>,
    pub config: EntitlementConfig,
}

/// One account session: connection, purchase routing, validation and
/// partner sync.
///
/// Call [`shutdown`](Self::shutdown) on logout. Dropping the session
/// without it still cancels the background work and requests the provider
/// connection be released.
pub struct EntitlementSession {
    supervisor: Arc<ConnectionSupervisor>,
    flow: PurchaseFlowController,
    router: Arc<PurchaseEventRouter>,
    validator: Arc<EntitlementValidator>,
    partner: PartnerSyncCoordinator,
    identity: Arc<dyn AccountIdentity>,
    state: Arc<EntitlementState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl EntitlementSession {
    /// Wires the components without starting anything.
    pub fn new(deps: SessionDeps) -> EntitlementResult<Self> {
        deps.config.validate()?;
        let SessionDeps {
            provider,
            store,
            validation,
            partner_sync,
            identity,
            sink,
            config,
        } = deps;

        let supervisor = ConnectionSupervisor::new(provider, config.reconnect.clone());
        let state = Arc::new(EntitlementState::new());
        let acks = Arc::new(AcknowledgmentManager::new(Arc::clone(&supervisor)));
        let validator = Arc::new(EntitlementValidator::new(
            store,
            validation,
            Arc::clone(&identity),
            Arc::clone(&acks),
            Arc::clone(&sink),
            config.catalog.clone(),
            config.validator.clone(),
            Arc::clone(&state),
        ));
        let router = Arc::new(PurchaseEventRouter::new(
            Arc::clone(&validator),
            acks,
            Arc::clone(&sink),
            config.catalog.clone(),
        ));
        let flow = PurchaseFlowController::new(
            Arc::clone(&supervisor),
            config.catalog.clone(),
            Arc::clone(&identity),
        );
        let partner = PartnerSyncCoordinator::new(
            partner_sync,
            Arc::clone(&validator),
            sink,
            config.partner_sync.clone(),
        );

        Ok(Self {
            supervisor,
            flow,
            router,
            validator,
            partner,
            identity,
            state,
            tasks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Wires the components, starts pumping `events`, and connects.
    ///
    /// Every time the connection becomes ready, purchases the user already
    /// owns are restored.
    pub async fn start(
        deps: SessionDeps,
        events: mpsc::Receiver<ProviderEvent>,
    ) -> EntitlementResult<Self> {
        let session = Self::new(deps)?;
        session.spawn_event_pump(events);
        session.spawn_restore_on_connect();
        let state = session.supervisor.connect().await;
        info!(?state, "Entitlement session started");
        Ok(session)
    }

    fn spawn_event_pump(&self, mut events: mpsc::Receiver<ProviderEvent>) {
        let supervisor = Arc::clone(&self.supervisor);
        let router = Arc::clone(&self.router);
        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    ProviderEvent::Connected => {
                        supervisor.on_state_changed(ConnectionSignal::Connected);
                    }
                    ProviderEvent::Disconnected => {
                        supervisor.on_state_changed(ConnectionSignal::Disconnected);
                    }
                    ProviderEvent::PurchasesUpdated { code, purchases } => {
                        let outcome = router.handle_update(code, purchases);
                        debug!(?code, ?outcome, "Purchase update routed");
                    }
                }
            }
            debug!("Provider event stream closed");
        });
        self.tasks.lock().push(pump);
    }

    fn spawn_restore_on_connect(&self) {
        let mut connection = self.supervisor.subscribe();
        let supervisor = Arc::clone(&self.supervisor);
        let router = Arc::clone(&self.router);
        let validator = Arc::clone(&self.validator);
        let watcher = tokio::spawn(async move {
            while connection.changed().await.is_ok() {
                let connected = *connection.borrow_and_update() == ConnectionState::Connected;
                if connected && let Err(e) = restore(&supervisor, &router, &validator).await {
                    warn!(error = %e, "Restoring purchases failed");
                }
            }
        });
        self.tasks.lock().push(watcher);
    }

    pub fn entitlement(&self) -> Option<Entitlement> {
        self.state.current()
    }

    /// Observable entitlement state.
    pub fn state(&self) -> &Arc<EntitlementState> {
        &self.state
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    pub fn supervisor(&self) -> &Arc<ConnectionSupervisor> {
        &self.supervisor
    }

    pub fn router(&self) -> &Arc<PurchaseEventRouter> {
        &self.router
    }

    pub fn validator(&self) -> &Arc<EntitlementValidator> {
        &self.validator
    }

    pub fn partner(&self) -> &PartnerSyncCoordinator {
        &self.partner
    }

    /// Retries the provider connection, e.g. after a terminal setup error.
    pub async fn connect(&self) -> ConnectionState {
        self.supervisor.connect().await
    }

    /// Launches the purchase UI for `plan`. A product the user already owns
    /// is granted right away.
    pub async fn purchase(&self, plan: PlanType) -> Result<FlowOutcome, PurchaseError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PurchaseError::NotConnected);
        }
        let outcome = self.flow.purchase(plan).await?;
        if outcome == FlowOutcome::AlreadyOwned {
            self.router.already_owned(Some(plan));
        }
        Ok(outcome)
    }

    /// Re-runs the existing-purchase check.
    pub async fn restore_purchases(&self) -> Result<RouteOutcome, PurchaseError> {
        restore(&self.supervisor, &self.router, &self.validator).await
    }

    /// Starts syncing with the link's partner. The link must belong to the
    /// signed-in account.
    pub async fn link_partner(&self, link: PartnerLink) -> EntitlementResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EntitlementError::SessionClosed);
        }
        let current = self
            .identity
            .current_account()
            .ok_or(EntitlementError::NotSignedIn)?;
        if current != link.account_id {
            return Err(EntitlementError::AccountMismatch {
                link_account: link.account_id.to_string(),
                current: current.to_string(),
            });
        }
        self.partner.start_sync(link.partner_id).await;
        Ok(())
    }

    /// Stops partner sync and drops any inherited grant.
    pub async fn unlink_partner(&self) {
        self.partner.stop_sync().await;
        self.partner.clear_inheritance();
    }

    /// One partner reconciliation on demand.
    pub async fn sync_partner_now(&self, link: &PartnerLink) -> SyncResult {
        self.partner.sync_once(&link.partner_id).await
    }

    /// Tears the session down: reconnect timer, partner loop, event pump,
    /// in-flight validations, then the provider connection. Idempotent.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.supervisor.stop_reconnecting();
        self.partner.stop_sync().await;
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.router.drain().await;
        self.supervisor.release().await;
        info!("Entitlement session shut down");
    }
}

impl Drop for EntitlementSession {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.supervisor.stop_reconnecting();
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
        self.router.abort_all();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let supervisor = Arc::clone(&self.supervisor);
            runtime.spawn(async move { supervisor.release().await });
        } else {
            warn!("Session dropped outside a runtime, provider connection not released");
        }
    }
}

async fn restore(
    supervisor: &Arc<ConnectionSupervisor>,
    router: &PurchaseEventRouter,
    validator: &EntitlementValidator,
) -> Result<RouteOutcome, PurchaseError> {
    let owned: Vec<Purchase> = supervisor
        .query_purchases()
        .await
        .map_err(|code| {
            PurchaseError::from_result_code(code).unwrap_or(PurchaseError::Transient(code))
        })?
        .into_iter()
        .filter(Purchase::is_purchased)
        .collect();

    if owned.is_empty() {
        debug!("No owned purchases, refreshing from account store");
        validator.refresh().await;
        return Ok(RouteOutcome::Dispatched(DispatchSummary::default()));
    }
    info!(count = owned.len(), "Restoring owned purchases");
    Ok(router.handle_update(ResultCode::Ok, owned))
}
