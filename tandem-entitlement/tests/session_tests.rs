mod common;

use common::{ACCOUNT, Harness, purchased, settle, subscribed_doc};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tandem_entitlement::mock::PartnerReply;
use tandem_entitlement::{
    ConnectionState, EntitlementError, EntitlementSession, FlowOutcome, Notification,
    ProviderEvent, PurchaseError,
};
use tandem_types::{Entitlement, EntitlementSource, PartnerLink, PlanType, ResultCode};

#[tokio::test(start_paused = true)]
async fn start_connects_and_refreshes_from_store() {
    let mut h = Harness::new();
    h.store.insert(ACCOUNT, subscribed_doc("annual"));
    let session = h.start().await;

    assert_eq!(session.connection_state(), ConnectionState::Connected);
    let now = session.entitlement().unwrap();
    assert!(now.is_subscribed);
    assert_eq!(now.source, EntitlementSource::Server);
    assert_eq!(now.plan_type, Some(PlanType::Annual));
    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn start_restores_owned_purchases() {
    let mut h = Harness::new();
    h.provider.set_owned(vec![purchased("tok1")]);
    let session = h.start().await;

    assert_eq!(h.validation.call_count(), 1);
    assert_eq!(h.provider.acks().len(), 1);
    assert_eq!(
        session.entitlement().unwrap().source,
        EntitlementSource::CloudFunction
    );
    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn purchase_then_update_event_validates() {
    let mut h = Harness::new();
    let session = h.start().await;

    let outcome = session.purchase(PlanType::Monthly).await.unwrap();
    assert!(matches!(outcome, FlowOutcome::Launched { .. }));

    h.provider.deliver(ResultCode::Ok, vec![purchased("tok1")]);
    settle().await;
    session.router().drain().await;

    let now = session.entitlement().unwrap();
    assert!(now.is_subscribed);
    assert_eq!(now.source, EntitlementSource::CloudFunction);
    assert_eq!(h.sink.notifications(), vec![Notification::PurchaseConfirmed]);
    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn already_owned_launch_grants() {
    let mut h = Harness::new();
    h.provider.set_launch_result(ResultCode::ItemAlreadyOwned);
    let session = h.start().await;

    let outcome = session.purchase(PlanType::Annual).await.unwrap();
    assert_eq!(outcome, FlowOutcome::AlreadyOwned);
    let now = session.entitlement().unwrap();
    assert!(now.is_subscribed);
    assert_eq!(now.plan_type, Some(PlanType::Annual));
    assert_eq!(h.validation.call_count(), 0);
    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn cancelled_update_changes_nothing() {
    let mut h = Harness::new();
    let session = h.start().await;
    let before = session.entitlement();

    h.provider.deliver(ResultCode::UserCancelled, vec![]);
    settle().await;

    assert_eq!(session.entitlement(), before);
    assert!(h.sink.notifications().is_empty());
    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn provider_disconnect_reconnects_and_restores() {
    let mut h = Harness::new();
    let session = h.start().await;
    let reads = h.store.read_count();

    h.provider.emit(ProviderEvent::Disconnected);
    settle().await;
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(session.connection_state(), ConnectionState::Connected);
    assert_eq!(h.provider.connect_calls(), 2);
    assert_eq!(h.store.read_count(), reads + 1);
    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn listeners_see_changes() {
    let mut h = Harness::new();
    let session = h.start().await;
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    session
        .state()
        .add_listener(Arc::new(move |e: &Entitlement| {
            assert!(e.is_subscribed);
            counter.fetch_add(1, Ordering::SeqCst);
        }));

    h.provider.deliver(ResultCode::Ok, vec![purchased("tok1")]);
    settle().await;
    session.router().drain().await;

    // Device grant, then the validation function's verdict.
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn link_partner_requires_matching_account() {
    let mut h = Harness::new();
    let session = h.start().await;

    let err = session
        .link_partner(PartnerLink::new("someone-else", "p1"))
        .await
        .unwrap_err();
    assert!(matches!(err, EntitlementError::AccountMismatch { .. }));

    h.identity.sign_out();
    let err = session
        .link_partner(PartnerLink::new(ACCOUNT, "p1"))
        .await
        .unwrap_err();
    assert!(matches!(err, EntitlementError::NotSignedIn));
    assert_eq!(h.partner_sync.call_count(), 0);
    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn linked_partner_inheritance_flows_into_entitlement() {
    let mut h = Harness::new();
    h.partner_sync
        .push([PartnerReply::Inherited(Some("Alex".into()))]);
    let session = h.start().await;

    session
        .link_partner(PartnerLink::new(ACCOUNT, "p1"))
        .await
        .unwrap();
    settle().await;
    assert_eq!(
        session.entitlement().unwrap().source,
        EntitlementSource::Inherited
    );

    session.unlink_partner().await;
    assert!(!session.state().is_subscribed());
    assert_eq!(
        h.sink.notifications(),
        vec![
            Notification::SubscriptionInherited {
                partner_name: Some("Alex".into())
            },
            Notification::InheritanceLost,
        ]
    );
    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_everything_and_releases() {
    let mut h = Harness::new();
    let session = h.start().await;
    session
        .link_partner(PartnerLink::new(ACCOUNT, "p1"))
        .await
        .unwrap();
    settle().await;

    session.shutdown().await;
    session.shutdown().await;
    assert_eq!(h.provider.end_calls(), 1);
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    assert_eq!(session.partner().current_partner().await, None);

    let polls = h.partner_sync.call_count();
    h.provider.emit(ProviderEvent::Disconnected);
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.provider.connect_calls(), 1);
    assert_eq!(h.partner_sync.call_count(), polls);

    assert_eq!(
        session.purchase(PlanType::Monthly).await,
        Err(PurchaseError::NotConnected)
    );
    assert!(matches!(
        session.link_partner(PartnerLink::new(ACCOUNT, "p1")).await,
        Err(EntitlementError::SessionClosed)
    ));
}

#[tokio::test(start_paused = true)]
async fn shutdown_waits_for_validations() {
    let mut h = Harness::with_validation(
        tandem_entitlement::mock::ScriptedValidationFunction::always(
            tandem_entitlement::mock::Verdict::Valid,
        )
        .with_delay(Duration::from_secs(3)),
    );
    let session = h.start().await;
    h.provider.deliver(ResultCode::Ok, vec![purchased("tok1")]);
    settle().await;
    assert_eq!(session.router().in_flight(), 1);

    session.shutdown().await;
    assert_eq!(
        session.entitlement().unwrap().source,
        EntitlementSource::CloudFunction
    );
    assert_eq!(h.provider.end_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn dropping_session_releases_connection() {
    let mut h = Harness::new();
    let session = h.start().await;
    h.provider.emit(ProviderEvent::Disconnected);
    settle().await;

    drop(session);
    settle().await;
    assert_eq!(h.provider.end_calls(), 1);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.provider.connect_calls(), 1);
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let mut h = Harness::new();
    h.config.partner_sync.interval_ms = 0;
    let (_provider, events) = tandem_entitlement::mock::MockProvider::new();

    let result = EntitlementSession::start(h.deps(), events).await;
    assert!(matches!(result, Err(EntitlementError::Config(_))));
}
