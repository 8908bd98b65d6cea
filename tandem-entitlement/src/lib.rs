//! Premium entitlement core for Tandem.
//!
//! Keeps one fact consistent across three independently failing systems:
//! the device's purchase provider, the remote account document, and the
//! linked partner account.
//!
//! # Architecture
//!
//! ## Components
//!
//! - **ConnectionSupervisor**: owns the provider connection, reconnects with
//!   capped backoff
//! - **PurchaseFlowController**: launches the purchase UI for a plan
//! - **PurchaseEventRouter**: classifies provider updates, one validation
//!   per purchase token
//! - **EntitlementValidator**: resolves the entitlement through the store,
//!   the validation function, and the fallback write
//! - **PartnerSyncCoordinator**: polls the partner-sync function and reacts
//!   to inheritance transitions
//! - **AcknowledgmentManager**: acknowledges validated purchases once
//!
//! [`EntitlementSession`] wires them per signed-in account.
//!
//! ## Data flow
//!
//! 1. The supervisor connects; on every connect owned purchases are restored
//! 2. Provider updates reach the router, which writes an optimistic grant
//! 3. The validator re-derives the entitlement and acknowledges
//! 4. Partner sync proposes inheritance changes through the validator
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tandem_entitlement::mock::{
//!     MemoryAccountStore, MockProvider, PartnerReply, ScriptedPartnerSync,
//!     ScriptedValidationFunction, Verdict,
//! };
//! use tandem_entitlement::{
//!     EntitlementConfig, EntitlementSession, SessionDeps, SessionIdentity, TracingSink,
//! };
//! use tandem_types::PlanType;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let (provider, events) = MockProvider::new();
//! let deps = SessionDeps {
//!     provider,
//!     store: Arc::new(MemoryAccountStore::new()),
//!     validation: Arc::new(ScriptedValidationFunction::always(Verdict::Valid)),
//!     partner_sync: Arc::new(ScriptedPartnerSync::new([PartnerReply::NotInherited])),
//!     identity: Arc::new(SessionIdentity::signed_in("uid-1")),
//!     sink: Arc::new(TracingSink),
//!     config: EntitlementConfig::default(),
//! };
//! let session = EntitlementSession::start(deps, events).await?;
//! session.purchase(PlanType::Monthly).await?;
//! session.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod ack;
mod config;
mod error;
mod flow;
mod identity;
mod notify;
mod partner;
pub mod provider;
mod router;
mod session;
mod state;
mod supervisor;
mod validator;

pub use ack::{AckOutcome, AcknowledgmentManager};
pub use config::{
    BackoffConfig, EntitlementConfig, PartnerSyncConfig, ProductCatalog, ValidatorPolicy,
};
pub use error::{EntitlementError, EntitlementResult, ErrorClass, PurchaseError};
pub use flow::{FlowOutcome, PurchaseFlowController};
pub use identity::{AccountIdentity, SessionIdentity};
pub use notify::{Notification, NotificationSink, RecordingSink, TracingSink};
pub use partner::{PartnerSyncCoordinator, SyncResult};
pub use provider::{FlowParams, ProductDetails, ProviderEvent, PurchaseProvider};
pub use router::{DispatchSummary, PurchaseEventRouter, RouteOutcome};
pub use session::{EntitlementSession, SessionDeps};
pub use state::{EntitlementListener, EntitlementState};
pub use supervisor::{ConnectionSignal, ConnectionState, ConnectionSupervisor};
pub use validator::{ClaimRejection, EntitlementValidator, Resolution, TokenClaim, Validation};

/// Doubles for every collaborator, for tests and offline runs.
pub mod mock {
    pub use crate::notify::RecordingSink;
    pub use crate::provider::mock::MockProvider;
    pub use tandem_cloud::mock::{
        MemoryAccountStore, PartnerReply, ScriptedPartnerSync, ScriptedValidationFunction,
        Verdict,
    };
}
