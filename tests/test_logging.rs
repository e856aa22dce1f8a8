//! Tests for logging configuration and the optional log file
//!
//! The global subscriber can only be installed once per process, so the
//! file test and the double-initialization check share one test.

use valve_node::error::NodeError;
use valve_node::observability::logging::{parse_level, LogFormat, LogSettings};
use valve_node::observability::init_logging;
use tracing::Level;

#[test]
fn test_log_format_parse_is_case_insensitive() {
    assert!(matches!(LogFormat::parse("JSON"), LogFormat::Json));
    assert!(matches!(LogFormat::parse("Pretty"), LogFormat::Pretty));
    assert!(matches!(LogFormat::parse("compact"), LogFormat::Compact));
}

#[test]
fn test_log_format_parse_invalid_defaults_to_json() {
    assert!(matches!(LogFormat::parse("xml"), LogFormat::Json));
    assert!(matches!(LogFormat::parse(""), LogFormat::Json));
}

#[test]
fn test_log_level_parse_invalid_defaults_to_info() {
    assert_eq!(parse_level("warn"), Level::WARN);
    assert_eq!(parse_level("nonsense"), Level::INFO);
}

#[test]
fn test_settings_from_lookup() {
    let settings = LogSettings::from_lookup(|key| match key {
        "LOG_LEVEL" => Some("debug".to_string()),
        "LOG_FORMAT" => Some("compact".to_string()),
        "LOG_SPANS" => Some("true".to_string()),
        _ => None,
    });

    assert_eq!(settings.level, Level::DEBUG);
    assert_eq!(settings.format, LogFormat::Compact);
    assert!(settings.include_spans);
}

#[test]
fn test_log_file_receives_events_and_init_runs_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("logs").join("valve_node.log");
    let settings = LogSettings {
        level: Level::INFO,
        format: LogFormat::Compact,
        include_spans: false,
    };

    let guard = init_logging(settings, Some(&path)).unwrap();
    assert!(guard.is_some());

    tracing::info!(device_id = "dev1", "Connected to MQTT broker");
    drop(guard);

    let contents: String = std::fs::read_dir(dir.path().join("logs"))
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .starts_with("valve_node.log")
        })
        .map(|entry| std::fs::read_to_string(entry.path()).unwrap())
        .collect();
    assert!(contents.contains("Connected to MQTT broker"));
    assert!(contents.contains("dev1"));
    assert!(!contents.contains("\u{1b}["), "file output must not carry ANSI codes");

    let second = init_logging(LogSettings::default(), None);
    assert!(matches!(second, Err(NodeError::Logging { .. })));
}
