//! Integration tests for configuration loading and metrics export
//!
//! Loads settings from files and wires them into a facade that reports to
//! a Prometheus sink.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use prometheus::Registry;
use relaygate_core::{FanoutEventSink, RecordingEventSink, ResilienceFacade};
use relaygate_domain::{AdapterError, LogFormat};
use relaygate_infra::{config, PrometheusEventSink};
use tempfile::NamedTempFile;

fn write_config(contents: &str, extension: &str) -> std::path::PathBuf {
    let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
    temp_file.write_all(contents.as_bytes()).expect("Failed to write to temp file");
    let path = temp_file.path().with_extension(extension);
    std::fs::copy(temp_file.path(), &path).expect("Failed to copy file");
    path
}

#[test]
fn test_load_config_from_toml_file() {
    let path = write_config(
        r#"
[resilience]
default_retry_attempts = 2
default_retry_wait_ms = 5
default_retry_deadline_ms = 10000
bulkhead_utilization_scale = 1.0
monitor_force_open_threshold = 3

[logging]
level = "warn"
format = "json"
"#,
        "toml",
    );

    let config = config::load_from_file(Some(path.clone())).expect("toml config");
    config.validate().expect("loaded config is valid");

    assert_eq!(config.resilience.default_retry_attempts, 2);
    assert_eq!(config.resilience.default_retry_wait, Duration::from_millis(5));
    assert_eq!(config.resilience.default_retry_deadline, Duration::from_secs(10));
    assert_eq!(config.resilience.bulkhead_utilization_scale, 1.0);
    assert_eq!(config.resilience.live_unit_warning_threshold, 1_000);
    assert_eq!(config.logging.format, LogFormat::Json);

    std::fs::remove_file(path).ok();
}

#[test]
fn test_loaded_settings_drive_the_facade() {
    let path = write_config(
        r#"{ "resilience": { "default_retry_attempts": 2, "default_retry_wait_ms": 1 } }"#,
        "json",
    );
    let config = config::load_from_file(Some(path.clone())).expect("json config");

    let registry = Registry::new();
    let prometheus = PrometheusEventSink::new(&registry).expect("register series");
    let recording = RecordingEventSink::new();
    let sink = FanoutEventSink::new(vec![Arc::new(prometheus.clone()), Arc::new(recording.clone())]);
    let facade = ResilienceFacade::new(&config.resilience, Arc::new(sink)).expect("facade");

    let mut calls = 0;
    let result: Result<(), _> = facade.execute("legacy", "ledger", || {
        calls += 1;
        Err(AdapterError::runtime("flaky"))
    });

    assert!(result.is_err());
    assert_eq!(calls, 2);
    assert_eq!(recording.count("retries_exhausted"), 1);

    let exposition = prometheus.render().expect("render");
    assert!(exposition.contains("relaygate_retries_exhausted_total"));
    assert!(exposition.contains("adapter_type=\"legacy\""));
    assert!(exposition.contains("relaygate_units_created_total"));

    std::fs::remove_file(path).ok();
}

#[test]
fn test_invalid_toml_is_reported() {
    let path = write_config("[resilience\ndefault_retry_attempts = ", "toml");

    let err = config::load_from_file(Some(path.clone())).unwrap_err();
    assert!(err.to_string().contains("Invalid TOML format"));

    std::fs::remove_file(path).ok();
}
