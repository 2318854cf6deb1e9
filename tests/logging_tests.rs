use meterlink::config::LoggingConfig;
use meterlink::logging::{LogContext, get_logger_with_context, init_logging, parse_log_level};
use tracing::Level;

#[test]
fn parses_levels_case_insensitively() {
    assert_eq!(parse_log_level("trace").unwrap(), Level::TRACE);
    assert_eq!(parse_log_level("Warn").unwrap(), Level::WARN);
    assert!(parse_log_level("verbose").is_err());
}

#[test]
fn file_logging_initializes_once() {
    let dir = tempfile::tempdir().unwrap();
    let config = LoggingConfig {
        level: "DEBUG".to_string(),
        file: dir.path().join("meterlink.log").to_string_lossy().to_string(),
        console_output: false,
        ..LoggingConfig::default()
    };
    init_logging(&config).unwrap();
    // Second call is a no-op
    init_logging(&config).unwrap();

    let logger = get_logger_with_context(
        LogContext::new("acquisition")
            .with_meter_id("FLU5")
            .with_field("source", "memory".to_string()),
    );
    logger.info("logging works");
    assert_eq!(logger.context().meter_id.as_deref(), Some("FLU5"));
}
