use pretty_assertions::assert_eq;
use serde_json::json;
use tandem_cloud::{AccountStore, AccountUpdate, CloudConfig, CloudError, HttpAccountStore};
use tandem_types::{AccountId, PlanType};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn store_for(server: &MockServer) -> HttpAccountStore {
    HttpAccountStore::new(CloudConfig {
        store_base_url: format!("{}/v1", server.uri()),
        functions_base_url: server.uri(),
        ..Default::default()
    })
    .unwrap()
}

// ── Config ──────────────────────────────────────────────────────

#[test]
fn rejects_non_http_base_url() {
    let result = HttpAccountStore::new(CloudConfig {
        store_base_url: "ftp://example.com".into(),
        ..Default::default()
    });
    assert!(matches!(result, Err(CloudError::Config(_))));
}

#[test]
fn rejects_zero_timeout() {
    let config = CloudConfig {
        timeout_ms: 0,
        ..Default::default()
    };
    assert!(config.validate().is_err());
}

// ── Reads ───────────────────────────────────────────────────────

#[tokio::test]
async fn get_account_parses_document() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/accounts/uid-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "isSubscribed": true,
            "subscriptionType": "annual",
            "partnerId": "uid-2",
            "displayName": "ignored"
        })))
        .mount(&server)
        .await;

    let doc = store_for(&server)
        .get_account(&AccountId::new("uid-1"))
        .await
        .unwrap()
        .unwrap();
    assert!(doc.is_subscribed);
    assert_eq!(doc.plan_type(), Some(PlanType::Annual));
    assert_eq!(doc.partner_id.unwrap().as_str(), "uid-2");
}

#[tokio::test]
async fn get_account_missing_fields_default() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/accounts/uid-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let doc = store_for(&server)
        .get_account(&AccountId::new("uid-1"))
        .await
        .unwrap()
        .unwrap();
    assert!(!doc.is_subscribed);
    assert_eq!(doc.subscription_type, None);
}

#[tokio::test]
async fn get_account_not_found_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/accounts/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let doc = store_for(&server)
        .get_account(&AccountId::new("gone"))
        .await
        .unwrap();
    assert!(doc.is_none());
}

#[tokio::test]
async fn get_account_server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("down"))
        .mount(&server)
        .await;

    let err = store_for(&server)
        .get_account(&AccountId::new("uid-1"))
        .await
        .unwrap_err();
    assert!(err.is_transient());
    assert!(err.to_string().contains("503"));
}

#[tokio::test]
async fn get_account_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
        .mount(&server)
        .await;

    let err = store_for(&server)
        .get_account(&AccountId::new("uid-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::AuthFailed(_)));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn rate_limit_reads_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
        .mount(&server)
        .await;

    let err = store_for(&server)
        .get_account(&AccountId::new("uid-1"))
        .await
        .unwrap_err();
    assert!(err.is_rate_limited());
    assert_eq!(err.retry_after(), Some(std::time::Duration::from_secs(7)));
}

#[tokio::test]
async fn bearer_token_is_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("authorization", "Bearer id-token-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"isSubscribed": false})))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    store.set_id_token(Some("id-token-1".into())).await;
    store.get_account(&AccountId::new("uid-1")).await.unwrap();
}

// ── Partial writes ──────────────────────────────────────────────

#[tokio::test]
async fn merge_fields_sends_only_present_fields() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/v1/accounts/uid-1"))
        .and(query_param("updateMask", "isSubscribed,subscriptionType"))
        .and(body_json(json!({"isSubscribed": true, "subscriptionType": "monthly"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    store_for(&server)
        .merge_fields(
            &AccountId::new("uid-1"),
            &AccountUpdate::subscribed(Some(PlanType::Monthly)),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn merge_fields_without_plan_omits_subscription_type() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(query_param("updateMask", "isSubscribed"))
        .and(body_json(json!({"isSubscribed": true})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    store_for(&server)
        .merge_fields(&AccountId::new("uid-1"), &AccountUpdate::subscribed(None))
        .await
        .unwrap();
}

#[tokio::test]
async fn empty_update_is_not_sent() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    store_for(&server)
        .merge_fields(&AccountId::new("uid-1"), &AccountUpdate::default())
        .await
        .unwrap();
}

#[tokio::test]
async fn merge_into_missing_document_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = store_for(&server)
        .merge_fields(&AccountId::new("gone"), &AccountUpdate::subscribed(None))
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::NotFound(_)));
}
