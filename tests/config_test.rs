use std::time::Duration;

use outreach_engine::config::*;

// --- Defaults ---

#[test]
fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config(dir.path()).unwrap();
    assert_eq!(config, OutreachConfig::default());
    assert_eq!(config.project.state_path, "outreach-state.json");
    assert_eq!(config.project.lead_prefix, "LEAD");
    assert_eq!(config.dispatch.pacing(), Duration::from_millis(1200));
    assert_eq!(config.dispatch.result_log_capacity, 100);
    assert_eq!(config.gateway.timeout(), Duration::from_secs(30));
    assert!(!config.campaigns.requires_approval);
}

#[test]
fn partial_sections_keep_other_defaults() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join(CONFIG_FILE_NAME),
        r#"
[dispatch]
pacing_ms = 500

[campaigns]
requires_approval = true
"#,
    )
    .unwrap();

    let config = load_config(dir.path()).unwrap();
    assert_eq!(config.dispatch.pacing_ms, 500);
    assert_eq!(config.dispatch.gate_check_retries, 2);
    assert!(config.campaigns.requires_approval);
    assert_eq!(config.project, ProjectConfig::default());
}

#[test]
fn gateway_and_preview_sections_parse() {
    let toml_str = r#"
[gateway]
email_command = ["./send-email", "--json"]
timeout_seconds = 5

[preview]
test_email = "qa@example.com"
test_phone = "+15550000000"
"#;
    let config: OutreachConfig = toml::from_str(toml_str).unwrap();
    assert_eq!(config.gateway.email_command, vec!["./send-email", "--json"]);
    assert!(config.gateway.sms_command.is_empty());
    assert_eq!(config.gateway.timeout(), Duration::from_secs(5));
    assert_eq!(config.preview.test_phone.as_deref(), Some("+15550000000"));
    assert!(validate(&config).is_ok());
}

// --- Validation ---

#[test]
fn validation_collects_every_problem() {
    let mut config = OutreachConfig::default();
    config.dispatch.pacing_ms = 0;
    config.dispatch.result_log_capacity = 0;
    config.gateway.timeout_seconds = 0;
    config.preview.test_phone = Some("555-0000".to_string());

    let errors = validate(&config).unwrap_err();
    assert_eq!(errors.len(), 4, "{:?}", errors);
    assert!(errors.iter().any(|e| e.contains("pacing_ms")));
    assert!(errors.iter().any(|e| e.contains("result_log_capacity")));
    assert!(errors.iter().any(|e| e.contains("timeout_seconds")));
    assert!(errors.iter().any(|e| e.contains("test_phone")));
}

#[test]
fn pacing_cannot_be_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(&path, "[dispatch]\npacing_ms = 0\n").unwrap();

    let err = load_config_from(&path).unwrap_err();
    assert!(err.contains("dispatch.pacing_ms must be >= 1"), "{}", err);
}

#[test]
fn prefixes_must_be_valid_and_distinct() {
    let mut config = OutreachConfig::default();
    config.project.campaign_prefix = "LEAD".to_string();
    let errors = validate(&config).unwrap_err();
    assert!(errors.iter().any(|e| e.contains("distinct")));

    let mut config = OutreachConfig::default();
    config.project.pool_prefix = "PO OL".to_string();
    let errors = validate(&config).unwrap_err();
    assert!(errors.iter().any(|e| e.contains("project.pool_prefix")));
}

#[test]
fn invalid_file_reports_validation_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("custom.toml");
    std::fs::write(&path, "[dispatch]\nresult_log_capacity = 0\n").unwrap();

    let err = load_config_from(&path).unwrap_err();
    assert!(err.contains("Config validation failed"), "{}", err);
    assert!(err.contains("result_log_capacity"), "{}", err);
}

#[test]
fn malformed_toml_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(&path, "[dispatch\n").unwrap();

    let err = load_config_from(&path).unwrap_err();
    assert!(err.starts_with("Failed to parse"), "{}", err);
}
