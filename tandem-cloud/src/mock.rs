//! In-memory doubles of the remote services, for tests and offline runs.

use crate::account::{AccountDocument, AccountStore, AccountUpdate};
use crate::error::{CloudError, CloudResult};
use crate::functions::{
    PartnerSyncFunction, PartnerSyncRequest, PartnerSyncResponse, ValidatePurchaseRequest,
    ValidatePurchaseResponse, ValidationFunction,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tandem_types::AccountId;

/// Account store kept in a map, with merge semantics identical to the
/// remote API and switchable failure injection.
#[derive(Default)]
pub struct MemoryAccountStore {
    docs: Mutex<HashMap<AccountId, AccountDocument>>,
    reads: AtomicUsize,
    writes: Mutex<Vec<(AccountId, AccountUpdate)>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds or replaces a document.
    pub fn insert(&self, account: impl Into<AccountId>, doc: AccountDocument) {
        self.docs.lock().insert(account.into(), doc);
    }

    /// Removes a document, simulating account deletion.
    pub fn remove(&self, account: &AccountId) {
        self.docs.lock().remove(account);
    }

    pub fn document(&self, account: &AccountId) -> Option<AccountDocument> {
        self.docs.lock().get(account).cloned()
    }

    /// Makes subsequent reads fail with a network error.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent writes fail with a network error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Every merge attempted, including failed ones.
    pub fn writes(&self) -> Vec<(AccountId, AccountUpdate)> {
        self.writes.lock().clone()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn get_account(&self, account: &AccountId) -> CloudResult<Option<AccountDocument>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CloudError::Network("store unreachable".into()));
        }
        Ok(self.docs.lock().get(account).cloned())
    }

    async fn merge_fields(&self, account: &AccountId, update: &AccountUpdate) -> CloudResult<()> {
        self.writes.lock().push((account.clone(), update.clone()));
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CloudError::Network("store unreachable".into()));
        }
        let mut docs = self.docs.lock();
        let doc = docs
            .get_mut(account)
            .ok_or_else(|| CloudError::NotFound(format!("account {account}")))?;
        update.apply_to(doc);
        Ok(())
    }
}

/// A scripted verdict from the validation function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Invalid,
    /// The call fails before a verdict is returned.
    Fail(String),
}

/// Validation function that replays scripted verdicts. Once the script is
/// exhausted the last verdict repeats.
pub struct ScriptedValidationFunction {
    script: Mutex<VecDeque<Verdict>>,
    last: Mutex<Verdict>,
    delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<ValidatePurchaseRequest>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedValidationFunction {
    pub fn new(verdicts: impl IntoIterator<Item = Verdict>) -> Self {
        Self {
            script: Mutex::new(verdicts.into_iter().collect()),
            last: Mutex::new(Verdict::Fail("no verdict scripted".into())),
            delay: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    /// Always answers with the same verdict.
    pub fn always(verdict: Verdict) -> Self {
        Self::new([verdict])
    }

    /// Delays every answer, keeping calls in flight for a while.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock() = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<ValidatePurchaseRequest> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Highest number of calls observed in flight at the same time.
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn next_verdict(&self) -> Verdict {
        let mut last = self.last.lock();
        if let Some(v) = self.script.lock().pop_front() {
            *last = v;
        }
        last.clone()
    }
}

#[async_trait]
impl ValidationFunction for ScriptedValidationFunction {
    async fn validate_purchase(
        &self,
        request: &ValidatePurchaseRequest,
    ) -> CloudResult<ValidatePurchaseResponse> {
        self.calls.lock().push(request.clone());
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let verdict = self.next_verdict();
        self.active.fetch_sub(1, Ordering::SeqCst);
        match verdict {
            Verdict::Valid => Ok(ValidatePurchaseResponse { is_valid: true }),
            Verdict::Invalid => Ok(ValidatePurchaseResponse { is_valid: false }),
            Verdict::Fail(msg) => Err(CloudError::Network(msg)),
        }
    }
}

/// A scripted partner-sync reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartnerReply {
    Inherited(Option<String>),
    NotInherited,
    /// The function answered with `success: false`.
    Unsuccessful,
    /// The call itself failed.
    Fail(String),
    /// The function answered 429 with a `Retry-After` in seconds.
    RateLimited(u64),
}

/// Partner-sync function that replays scripted replies. Once the script is
/// exhausted the last reply repeats.
pub struct ScriptedPartnerSync {
    script: Mutex<VecDeque<PartnerReply>>,
    last: Mutex<PartnerReply>,
    calls: Mutex<Vec<PartnerSyncRequest>>,
}

impl ScriptedPartnerSync {
    pub fn new(replies: impl IntoIterator<Item = PartnerReply>) -> Self {
        Self {
            script: Mutex::new(replies.into_iter().collect()),
            last: Mutex::new(PartnerReply::NotInherited),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Appends replies to the script.
    pub fn push(&self, replies: impl IntoIterator<Item = PartnerReply>) {
        self.script.lock().extend(replies);
    }

    pub fn calls(&self) -> Vec<PartnerSyncRequest> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl PartnerSyncFunction for ScriptedPartnerSync {
    async fn sync_partner(&self, request: &PartnerSyncRequest) -> CloudResult<PartnerSyncResponse> {
        self.calls.lock().push(request.clone());
        let reply = {
            let mut last = self.last.lock();
            if let Some(r) = self.script.lock().pop_front() {
                *last = r;
            }
            last.clone()
        };
        match reply {
            PartnerReply::Inherited(name) => Ok(PartnerSyncResponse {
                success: true,
                subscription_inherited: true,
                from_partner_name: name,
            }),
            PartnerReply::NotInherited => Ok(PartnerSyncResponse {
                success: true,
                subscription_inherited: false,
                from_partner_name: None,
            }),
            PartnerReply::Unsuccessful => Ok(PartnerSyncResponse {
                success: false,
                subscription_inherited: false,
                from_partner_name: None,
            }),
            PartnerReply::Fail(msg) => Err(CloudError::Network(msg)),
            PartnerReply::RateLimited(retry_after_secs) => {
                Err(CloudError::RateLimited { retry_after_secs })
            }
        }
    }
}
