use super::*;

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
            read_timeout_ms: 5000,
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: 4096,
            timezone: "Europe/Brussels".to_string(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            control_capacity: 16,
            control_policy: ControlPolicy::DropOldest,
            export_capacity: 256,
            sink_queue_capacity: 256,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::Log
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            name: "load".to_string(),
            enabled: true,
            surplus_kw: 1.5,
            deficit_kw: 0.0,
            window_seconds: 60,
            min_dwell_seconds: 300,
            staleness_timeout_seconds: 30,
            initial_state: RelayState::Off,
            relay: RelayConfig::default(),
        }
    }
}

impl Default for LogSinkConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for CsvSinkConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: "/data/meterlink/csv".to_string(),
            prefix: "meterlink".to_string(),
            write_every: 1,
            max_lines: 8640,
            max_age_seconds: 86_400,
        }
    }
}

impl Default for InfluxSinkConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "http://localhost:8086".to_string(),
            org: String::new(),
            bucket: "meterlink".to_string(),
            token: String::new(),
            timeout_ms: 5000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            console_level: None,
            file_level: None,
            file: "/tmp/meterlink.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            telegram: TelegramConfig::default(),
            pipeline: PipelineConfig::default(),
            loads: Vec::new(),
            export: ExportConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
