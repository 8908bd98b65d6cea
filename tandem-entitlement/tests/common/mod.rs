#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use tandem_cloud::AccountDocument;
use tandem_entitlement::mock::{
    MemoryAccountStore, MockProvider, PartnerReply, RecordingSink, ScriptedPartnerSync,
    ScriptedValidationFunction, Verdict,
};
use tandem_entitlement::{
    AcknowledgmentManager, ConnectionSupervisor, EntitlementConfig, EntitlementSession,
    EntitlementState, EntitlementValidator, ProviderEvent, SessionDeps, SessionIdentity,
};
use tandem_types::{AccountId, Purchase};
use tokio::sync::mpsc;

pub const ACCOUNT: &str = "uid-1";
pub const MONTHLY: &str = "premium_monthly";
pub const ANNUAL: &str = "premium_annual";

pub fn account() -> AccountId {
    AccountId::new(ACCOUNT)
}

pub fn purchased(token: &str) -> Purchase {
    Purchase::purchased(MONTHLY, token)
}

pub fn unsubscribed_doc() -> AccountDocument {
    AccountDocument {
        is_subscribed: false,
        subscription_type: None,
        partner_id: None,
    }
}

pub fn subscribed_doc(plan: &str) -> AccountDocument {
    AccountDocument {
        is_subscribed: true,
        subscription_type: Some(plan.into()),
        partner_id: None,
    }
}

/// Lets spawned tasks run. Under a paused clock this only advances time
/// once every task is idle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Every collaborator as a double, with a signed-in account whose document
/// says unsubscribed, both products listed, and a validation function that
/// accepts everything.
pub struct Harness {
    pub provider: Arc<MockProvider>,
    pub store: Arc<MemoryAccountStore>,
    pub validation: Arc<ScriptedValidationFunction>,
    pub partner_sync: Arc<ScriptedPartnerSync>,
    pub identity: Arc<SessionIdentity>,
    pub sink: Arc<RecordingSink>,
    pub config: EntitlementConfig,
    events: Option<mpsc::Receiver<ProviderEvent>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_validation(ScriptedValidationFunction::always(Verdict::Valid))
    }

    pub fn with_validation(validation: ScriptedValidationFunction) -> Self {
        let (provider, events) = MockProvider::new();
        provider.add_product(MONTHLY);
        provider.add_product(ANNUAL);

        let store = MemoryAccountStore::new();
        store.insert(ACCOUNT, unsubscribed_doc());

        Self {
            provider,
            store: Arc::new(store),
            validation: Arc::new(validation),
            partner_sync: Arc::new(ScriptedPartnerSync::new(Vec::<PartnerReply>::new())),
            identity: Arc::new(SessionIdentity::signed_in(ACCOUNT)),
            sink: Arc::new(RecordingSink::new()),
            config: EntitlementConfig::default(),
            events: Some(events),
        }
    }

    pub fn deps(&self) -> SessionDeps {
        SessionDeps {
            provider: self.provider.clone(),
            store: self.store.clone(),
            validation: self.validation.clone(),
            partner_sync: self.partner_sync.clone(),
            identity: self.identity.clone(),
            sink: self.sink.clone(),
            config: self.config.clone(),
        }
    }

    /// Starts a session and waits for the initial restore to finish.
    pub async fn start(&mut self) -> EntitlementSession {
        let events = self.events.take().expect("session already started");
        let session = EntitlementSession::start(self.deps(), events)
            .await
            .expect("session start");
        settle().await;
        session.router().drain().await;
        session
    }

    /// A connected supervisor and a validator wired to this harness.
    pub async fn parts(&self) -> Parts {
        let supervisor =
            ConnectionSupervisor::new(self.provider.clone(), self.config.reconnect.clone());
        supervisor.connect().await;
        let acks = Arc::new(AcknowledgmentManager::new(supervisor.clone()));
        let state = Arc::new(EntitlementState::new());
        let validator = Arc::new(EntitlementValidator::new(
            self.store.clone(),
            self.validation.clone(),
            self.identity.clone(),
            acks.clone(),
            self.sink.clone(),
            self.config.catalog.clone(),
            self.config.validator.clone(),
            state.clone(),
        ));
        Parts {
            supervisor,
            acks,
            state,
            validator,
        }
    }
}

pub struct Parts {
    pub supervisor: Arc<ConnectionSupervisor>,
    pub acks: Arc<AcknowledgmentManager>,
    pub state: Arc<EntitlementState>,
    pub validator: Arc<EntitlementValidator>,
}
