mod common;

use common::{Harness, purchased};
use tandem_entitlement::{AckOutcome, AcknowledgmentManager, ConnectionSupervisor};
use tandem_types::ResultCode;

#[tokio::test]
async fn acknowledged_purchase_is_skipped() {
    let h = Harness::new();
    let parts = h.parts().await;

    let outcome = parts
        .acks
        .acknowledge(&purchased("tok1").into_acknowledged())
        .await;
    assert_eq!(outcome, AckOutcome::AlreadyAcknowledged);
    assert!(h.provider.acks().is_empty());
}

#[tokio::test]
async fn acknowledging_twice_calls_provider_once() {
    let h = Harness::new();
    let parts = h.parts().await;
    let purchase = purchased("tok1");

    assert_eq!(parts.acks.acknowledge(&purchase).await, AckOutcome::Acknowledged);
    assert_eq!(
        parts.acks.acknowledge(&purchase).await,
        AckOutcome::AlreadyAcknowledged
    );
    assert_eq!(h.provider.acks().len(), 1);
    assert!(parts.acks.is_acknowledged(&purchase.purchase_token));
}

#[tokio::test]
async fn failure_leaves_purchase_for_retry() {
    let h = Harness::new();
    let parts = h.parts().await;
    h.provider.script_acks([ResultCode::ServiceUnavailable]);
    let purchase = purchased("tok1");

    assert_eq!(
        parts.acks.acknowledge(&purchase).await,
        AckOutcome::Failed(ResultCode::ServiceUnavailable)
    );
    assert!(!parts.acks.is_acknowledged(&purchase.purchase_token));

    assert_eq!(parts.acks.acknowledge(&purchase).await, AckOutcome::Acknowledged);
    assert_eq!(h.provider.acks().len(), 2);
}

#[tokio::test]
async fn disconnected_provider_fails_without_call() {
    let h = Harness::new();
    let supervisor = ConnectionSupervisor::new(h.provider.clone(), h.config.reconnect.clone());
    let acks = AcknowledgmentManager::new(supervisor);

    assert_eq!(
        acks.acknowledge(&purchased("tok1")).await,
        AckOutcome::Failed(ResultCode::ServiceDisconnected)
    );
    assert!(h.provider.acks().is_empty());
}

#[tokio::test]
async fn provider_rejection_is_not_marked_acknowledged() {
    let h = Harness::new();
    let parts = h.parts().await;
    h.provider.script_acks([ResultCode::ItemNotOwned]);
    let purchase = purchased("tok1");

    assert!(!ResultCode::ItemNotOwned.is_retryable());
    assert_eq!(
        parts.acks.acknowledge(&purchase).await,
        AckOutcome::Failed(ResultCode::ItemNotOwned)
    );
    assert!(!parts.acks.is_acknowledged(&purchase.purchase_token));
}
