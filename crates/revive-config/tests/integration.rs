use revive_config::{ConfigError, RecoveryConfig, load_from_json};

#[test]
fn partial_documents_keep_remaining_defaults() -> anyhow::Result<()> {
    let config = load_from_json(
        r#"{
            "probe_ttl_ms": 2500,
            "bulk_concurrency": 2
        }"#,
    )?;
    assert_eq!(config.probe_ttl_ms, 2_500);
    assert_eq!(config.bulk_concurrency, 2);
    assert_eq!(
        config.volume_poll_interval_ms,
        RecoveryConfig::default().volume_poll_interval_ms
    );
    Ok(())
}

#[test]
fn invalid_documents_fail_validation_after_parsing() {
    let err = load_from_json(r#"{"bulk_concurrency": 0}"#).expect_err("zero workers");
    assert!(matches!(
        err,
        ConfigError::InvalidField {
            field: "bulk_concurrency",
            reason: "must be between 1 and 64",
            ..
        }
    ));
}

#[test]
fn config_serializes_back_to_the_same_document() -> anyhow::Result<()> {
    let config = RecoveryConfig {
        volume_poll_interval_ms: 500,
        ..RecoveryConfig::default()
    };
    let json = serde_json::to_string(&config)?;
    assert_eq!(load_from_json(&json)?, config);
    Ok(())
}
