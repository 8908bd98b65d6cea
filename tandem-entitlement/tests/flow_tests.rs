mod common;

use common::{ACCOUNT, ANNUAL, Harness, MONTHLY};
use pretty_assertions::assert_eq;
use tandem_entitlement::{
    ConnectionSupervisor, ErrorClass, FlowOutcome, ProductDetails, PurchaseError,
    PurchaseFlowController,
};
use tandem_types::{AccountId, PlanType, ProductId, ResultCode};

async fn controller(h: &Harness, connect: bool) -> PurchaseFlowController {
    let supervisor = ConnectionSupervisor::new(h.provider.clone(), h.config.reconnect.clone());
    if connect {
        supervisor.connect().await;
    }
    PurchaseFlowController::new(supervisor, h.config.catalog.clone(), h.identity.clone())
}

#[tokio::test]
async fn fails_fast_when_not_connected() {
    let h = Harness::new();
    let flow = controller(&h, false).await;

    assert_eq!(
        flow.purchase(PlanType::Monthly).await,
        Err(PurchaseError::NotConnected)
    );
    assert!(h.provider.launches().is_empty());
}

#[tokio::test]
async fn launches_with_offer_and_account() {
    let h = Harness::new();
    let flow = controller(&h, true).await;

    let outcome = flow.purchase(PlanType::Annual).await.unwrap();
    assert_eq!(
        outcome,
        FlowOutcome::Launched {
            product_id: ProductId::new(ANNUAL)
        }
    );

    let launches = h.provider.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].offer_token, format!("offer-{ANNUAL}"));
    assert_eq!(
        launches[0].obfuscated_account_id,
        Some(AccountId::new(ACCOUNT))
    );
}

#[tokio::test]
async fn unknown_product_is_unavailable() {
    let h = Harness::new();
    let mut config = h.config.clone();
    config.catalog.monthly = ProductId::new("legacy_monthly");
    let supervisor = ConnectionSupervisor::new(h.provider.clone(), config.reconnect.clone());
    supervisor.connect().await;
    let flow = PurchaseFlowController::new(supervisor, config.catalog, h.identity.clone());

    let err = flow.purchase(PlanType::Monthly).await.unwrap_err();
    assert_eq!(
        err,
        PurchaseError::ProductUnavailable(ProductId::new("legacy_monthly"))
    );
    assert_eq!(err.class(), ErrorClass::ProviderRejection);
}

#[tokio::test]
async fn missing_offer_token_is_unavailable() {
    let h = Harness::new();
    h.provider.add_product_details(ProductDetails {
        product_id: ProductId::new(MONTHLY),
        title: "Monthly".into(),
        formatted_price: None,
        offer_token: None,
    });
    let flow = controller(&h, true).await;

    assert_eq!(
        flow.purchase(PlanType::Monthly).await,
        Err(PurchaseError::ProductUnavailable(ProductId::new(MONTHLY)))
    );
    assert!(h.provider.launches().is_empty());
}

#[tokio::test]
async fn query_failure_maps_result_code() {
    let h = Harness::new();
    let flow = controller(&h, true).await;
    h.provider.fail_queries(Some(ResultCode::ServiceUnavailable));

    let err = flow.purchase(PlanType::Monthly).await.unwrap_err();
    assert_eq!(err, PurchaseError::ServiceUnavailable);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn launch_results_map_to_outcomes() {
    let h = Harness::new();
    let flow = controller(&h, true).await;

    h.provider.set_launch_result(ResultCode::UserCancelled);
    assert_eq!(
        flow.purchase(PlanType::Monthly).await,
        Ok(FlowOutcome::Cancelled)
    );

    h.provider.set_launch_result(ResultCode::ItemAlreadyOwned);
    assert_eq!(
        flow.purchase(PlanType::Monthly).await,
        Ok(FlowOutcome::AlreadyOwned)
    );

    h.provider.set_launch_result(ResultCode::BillingUnavailable);
    assert_eq!(
        flow.purchase(PlanType::Monthly).await,
        Err(PurchaseError::BillingUnavailable)
    );

    h.provider.set_launch_result(ResultCode::DeveloperError);
    assert_eq!(
        flow.purchase(PlanType::Monthly).await,
        Err(PurchaseError::Misconfiguration(ResultCode::DeveloperError))
    );
}
