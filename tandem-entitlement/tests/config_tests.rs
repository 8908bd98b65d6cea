use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::io::Write;
use std::time::Duration;
use tandem_entitlement::{BackoffConfig, EntitlementConfig, EntitlementError};
use tandem_types::{PlanType, ProductId};

#[test]
fn defaults_are_valid() {
    let config = EntitlementConfig::default();
    config.validate().unwrap();
    assert_eq!(config.reconnect.initial_delay_ms, 1_000);
    assert_eq!(config.reconnect.max_delay_ms, 60_000);
    assert_eq!(config.partner_sync.interval(), Duration::from_secs(30));
    assert_eq!(config.partner_sync.cooldown.initial_delay_ms, 5_000);
    assert!(config.validator.fallback_on_ambiguous);
}

#[test]
fn partial_json_keeps_defaults() {
    let config = EntitlementConfig::from_json_str(
        r#"{
            "reconnect": {"max_delay_ms": 30000},
            "catalog": {"annual": "premium_yearly_v2"},
            "validator": {"fallback_on_ambiguous": false}
        }"#,
    )
    .unwrap();

    assert_eq!(config.reconnect.initial_delay_ms, 1_000);
    assert_eq!(config.reconnect.max_delay_ms, 30_000);
    assert_eq!(config.catalog.monthly, ProductId::new("premium_monthly"));
    assert_eq!(
        config.catalog.plan_for(&ProductId::new("premium_yearly_v2")),
        Some(PlanType::Annual)
    );
    assert!(!config.validator.fallback_on_ambiguous);
}

#[test]
fn load_reads_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{"partner_sync": {{"interval_ms": 10000}}}}"#).unwrap();

    let config = EntitlementConfig::load(file.path()).unwrap();
    assert_eq!(config.partner_sync.interval(), Duration::from_secs(10));
}

#[test]
fn load_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = EntitlementConfig::load(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, EntitlementError::Io(_)));
}

#[test]
fn malformed_json_is_serialization_error() {
    let err = EntitlementConfig::from_json_str("{not json").unwrap_err();
    assert!(matches!(err, EntitlementError::Serialization(_)));
}

#[test]
fn rejects_invalid_values() {
    let cases = [
        r#"{"reconnect": {"initial_delay_ms": 0}}"#,
        r#"{"reconnect": {"initial_delay_ms": 5000, "max_delay_ms": 1000}}"#,
        r#"{"reconnect": {"multiplier": 0.5}}"#,
        r#"{"partner_sync": {"interval_ms": 0}}"#,
        r#"{"partner_sync": {"cooldown": {"max_delay_ms": 1}}}"#,
        r#"{"catalog": {"monthly": "same", "annual": "same"}}"#,
    ];
    for json in cases {
        let err = EntitlementConfig::from_json_str(json).unwrap_err();
        assert!(matches!(err, EntitlementError::Config(_)), "{json}: {err}");
    }
}

proptest! {
    #[test]
    fn backoff_is_monotonic_and_bounded(
        initial in 1u64..10_000,
        extra in 0u64..100_000,
        multiplier in 1.0f64..4.0,
        attempt in 0u32..200,
    ) {
        let backoff = BackoffConfig {
            initial_delay_ms: initial,
            max_delay_ms: initial + extra,
            multiplier,
        };
        let here = backoff.delay_for_attempt(attempt);
        let next = backoff.delay_for_attempt(attempt + 1);
        prop_assert!(here <= next);
        prop_assert!(next <= backoff.max_delay());
        prop_assert!(here >= Duration::from_millis(initial));
    }
}
