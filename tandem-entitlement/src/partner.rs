//! Periodic reconciliation with a linked partner account.

use crate::config::PartnerSyncConfig;
use crate::notify::{Notification, NotificationSink};
use crate::validator::EntitlementValidator;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tandem_cloud::{CloudError, PartnerSyncFunction, PartnerSyncRequest};
use tandem_types::PartnerId;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Outcome of one reconciliation. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncResult {
    Success {
        inherited: bool,
        from_partner_name: Option<String>,
    },
    Failure {
        reason: String,
    },
}

impl SyncResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

struct Reconciler {
    function: Arc<dyn PartnerSyncFunction>,
    validator: Arc<EntitlementValidator>,
    sink: Arc<dyn NotificationSink>,
    config: PartnerSyncConfig,
    inherited: AtomicBool,
}

impl Reconciler {
    async fn reconcile(&self, partner_id: &PartnerId) -> SyncResult {
        self.try_reconcile(partner_id)
            .await
            .unwrap_or_else(|e| SyncResult::Failure {
                reason: e.to_string(),
            })
    }

    /// Like [`reconcile`](Self::reconcile), but keeps the call error so the
    /// loop can honor rate limits.
    async fn try_reconcile(&self, partner_id: &PartnerId) -> Result<SyncResult, CloudError> {
        let request = PartnerSyncRequest {
            partner_id: partner_id.clone(),
        };
        let response = self.function.sync_partner(&request).await?;
        if !response.success {
            return Ok(SyncResult::Failure {
                reason: "partner sync reported no success".into(),
            });
        }
        self.observe(response.subscription_inherited, response.from_partner_name.clone());
        Ok(SyncResult::Success {
            inherited: response.subscription_inherited,
            from_partner_name: response.from_partner_name,
        })
    }

    /// Cooldown after the `failures`-th consecutive failure. A server
    /// `Retry-After` longer than the backoff wins.
    fn cooldown(&self, failures: u32, error: Option<&CloudError>) -> Duration {
        let backoff = self.config.cooldown.delay_for_attempt(failures);
        error
            .and_then(CloudError::retry_after)
            .map_or(backoff, |wait| wait.max(backoff))
    }

    /// Notifies once per transition, never per tick.
    fn observe(&self, inherited: bool, partner_name: Option<String>) {
        let was = self.inherited.swap(inherited, Ordering::SeqCst);
        match (was, inherited) {
            (false, true) => {
                info!(partner_name = ?partner_name, "Subscription inherited from partner");
                self.validator.apply_partner_sync(true);
                self.sink
                    .notify(Notification::SubscriptionInherited { partner_name });
            }
            (true, false) => {
                info!("Partner inheritance lost");
                self.validator.apply_partner_sync(false);
                self.sink.notify(Notification::InheritanceLost);
            }
            _ => debug!(inherited, "Partner inheritance unchanged"),
        }
    }

    async fn run(self: Arc<Self>, partner_id: PartnerId, mut shutdown: watch::Receiver<bool>) {
        let mut failures: u32 = 0;
        loop {
            let result = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                result = self.try_reconcile(&partner_id) => result,
            };

            let delay = match result {
                Ok(SyncResult::Success { .. }) => {
                    failures = 0;
                    self.config.interval()
                }
                Ok(SyncResult::Failure { reason }) => {
                    failures = failures.saturating_add(1);
                    let delay = self.cooldown(failures, None);
                    warn!(
                        partner = %partner_id,
                        failures,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "Partner sync unsuccessful, cooling down"
                    );
                    delay
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = self.cooldown(failures, Some(&e));
                    let delay_ms = delay.as_millis() as u64;
                    if e.is_rate_limited() {
                        info!(partner = %partner_id, delay_ms, "Partner sync rate limited");
                    } else if e.is_transient() {
                        warn!(partner = %partner_id, failures, delay_ms, error = %e, "Partner sync failed, cooling down");
                    } else {
                        error!(partner = %partner_id, failures, delay_ms, error = %e, "Partner sync rejected, cooling down");
                    }
                    delay
                }
            };

            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        debug!(partner = %partner_id, "Partner sync loop stopped");
    }
}

struct RunningLoop {
    partner_id: PartnerId,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RunningLoop {
    async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await
            && e.is_panic()
        {
            error!(partner = %self.partner_id, "Partner sync loop panicked");
        }
    }
}

/// Drives the partner-sync loop. At most one loop runs at a time.
pub struct PartnerSyncCoordinator {
    inner: Arc<Reconciler>,
    running: Mutex<Option<RunningLoop>>,
}

impl PartnerSyncCoordinator {
    pub fn new(
        function: Arc<dyn PartnerSyncFunction>,
        validator: Arc<EntitlementValidator>,
        sink: Arc<dyn NotificationSink>,
        config: PartnerSyncConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Reconciler {
                function,
                validator,
                sink,
                config,
                inherited: AtomicBool::new(false),
            }),
            running: Mutex::new(None),
        }
    }

    /// Starts reconciling with `partner_id`: once now, then every interval.
    ///
    /// A no-op if that partner's loop is already running. A loop for another
    /// partner is stopped, and awaited, first.
    pub async fn start_sync(&self, partner_id: PartnerId) {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref()
            && current.partner_id == partner_id
            && !current.handle.is_finished()
        {
            debug!(partner = %partner_id, "Partner sync already running");
            return;
        }
        if let Some(previous) = running.take() {
            info!(from = %previous.partner_id, to = %partner_id, "Switching partner sync");
            previous.stop().await;
        }

        let (shutdown, rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(inner.run(partner_id.clone(), rx));
        info!(partner = %partner_id, "Partner sync started");
        *running = Some(RunningLoop {
            partner_id,
            shutdown,
            handle,
        });
    }

    /// Stops the loop and waits for it to exit. Idempotent.
    pub async fn stop_sync(&self) {
        if let Some(running) = self.running.lock().await.take() {
            let partner_id = running.partner_id.clone();
            running.stop().await;
            info!(partner = %partner_id, "Partner sync stopped");
        }
    }

    /// Runs one reconciliation outside the loop.
    pub async fn sync_once(&self, partner_id: &PartnerId) -> SyncResult {
        self.inner.reconcile(partner_id).await
    }

    /// Forgets inheritance after the partner link is removed.
    pub fn clear_inheritance(&self) {
        self.inner.observe(false, None);
    }

    pub fn is_inherited(&self) -> bool {
        self.inner.inherited.load(Ordering::SeqCst)
    }

    /// Partner of the running loop.
    pub async fn current_partner(&self) -> Option<PartnerId> {
        self.running
            .lock()
            .await
            .as_ref()
            .filter(|r| !r.handle.is_finished())
            .map(|r| r.partner_id.clone())
    }
}

impl Drop for PartnerSyncCoordinator {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.handle.abort();
        }
    }
}
