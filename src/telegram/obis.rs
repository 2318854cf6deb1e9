//! Known OBIS identifiers of the Belgian (Fluvius) P1 profile

/// Value kind a known identifier must carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Timestamp,
    Energy,
    Tariff,
    Power,
    Voltage,
    Current,
    Switch,
    Gas,
}

impl FieldKind {
    /// Canonical unit of quantity kinds
    pub fn unit(self) -> Option<&'static str> {
        match self {
            FieldKind::Energy => Some("kWh"),
            FieldKind::Power => Some("kW"),
            FieldKind::Voltage => Some("V"),
            FieldKind::Current => Some("A"),
            FieldKind::Gas => Some("m3"),
            _ => None,
        }
    }
}

/// One row of the known-identifier table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObisField {
    pub code: &'static str,
    pub name: &'static str,
    pub kind: FieldKind,
    /// Digits before the decimal point when encoded
    pub int_digits: usize,
    /// Digits after the decimal point when encoded
    pub decimals: usize,
}

const fn field(
    code: &'static str,
    name: &'static str,
    kind: FieldKind,
    int_digits: usize,
    decimals: usize,
) -> ObisField {
    ObisField {
        code,
        name,
        kind,
        int_digits,
        decimals,
    }
}

pub const VERSION: &str = "0-0:96.1.4";
pub const EQUIPMENT_ID: &str = "0-0:96.1.1";
pub const TIMESTAMP: &str = "0-0:1.0.0";
pub const CONSUMPTION_DAY: &str = "1-0:1.8.1";
pub const CONSUMPTION_NIGHT: &str = "1-0:1.8.2";
pub const INJECTION_DAY: &str = "1-0:2.8.1";
pub const INJECTION_NIGHT: &str = "1-0:2.8.2";
pub const ACTUAL_TARIFF: &str = "0-0:96.14.0";
pub const CONSUMPTION: &str = "1-0:1.7.0";
pub const INJECTION: &str = "1-0:2.7.0";
pub const L1_CONSUMPTION: &str = "1-0:21.7.0";
pub const L2_CONSUMPTION: &str = "1-0:41.7.0";
pub const L3_CONSUMPTION: &str = "1-0:61.7.0";
pub const L1_INJECTION: &str = "1-0:22.7.0";
pub const L2_INJECTION: &str = "1-0:42.7.0";
pub const L3_INJECTION: &str = "1-0:62.7.0";
pub const L1_VOLTAGE: &str = "1-0:32.7.0";
pub const L2_VOLTAGE: &str = "1-0:52.7.0";
pub const L3_VOLTAGE: &str = "1-0:72.7.0";
pub const L1_CURRENT: &str = "1-0:31.7.0";
pub const L2_CURRENT: &str = "1-0:51.7.0";
pub const L3_CURRENT: &str = "1-0:71.7.0";
pub const BREAKER_STATE: &str = "0-0:96.3.10";
pub const LIMITER_THRESHOLD: &str = "0-0:17.0.0";
pub const FUSE_THRESHOLD: &str = "1-0:31.4.0";
pub const MESSAGE: &str = "0-0:96.13.0";
pub const GAS_DEVICE_TYPE: &str = "0-1:24.1.0";
pub const GAS_EQUIPMENT_ID: &str = "0-1:96.1.1";
pub const GAS_VALVE_STATE: &str = "0-1:24.4.0";
pub const GAS_READING: &str = "0-1:24.2.3";

/// Table in telegram order
pub const KNOWN_FIELDS: &[ObisField] = &[
    field(VERSION, "version", FieldKind::Text, 5, 0),
    field(EQUIPMENT_ID, "equipment_id", FieldKind::Text, 0, 0),
    field(TIMESTAMP, "timestamp", FieldKind::Timestamp, 0, 0),
    field(CONSUMPTION_DAY, "total_consumption_day", FieldKind::Energy, 6, 3),
    field(CONSUMPTION_NIGHT, "total_consumption_night", FieldKind::Energy, 6, 3),
    field(INJECTION_DAY, "total_injection_day", FieldKind::Energy, 6, 3),
    field(INJECTION_NIGHT, "total_injection_night", FieldKind::Energy, 6, 3),
    field(ACTUAL_TARIFF, "actual_tariff", FieldKind::Tariff, 4, 0),
    field(CONSUMPTION, "actual_total_consumption", FieldKind::Power, 2, 3),
    field(INJECTION, "actual_total_injection", FieldKind::Power, 2, 3),
    field(L1_CONSUMPTION, "actual_l1_consumption", FieldKind::Power, 2, 3),
    field(L2_CONSUMPTION, "actual_l2_consumption", FieldKind::Power, 2, 3),
    field(L3_CONSUMPTION, "actual_l3_consumption", FieldKind::Power, 2, 3),
    field(L1_INJECTION, "actual_l1_injection", FieldKind::Power, 2, 3),
    field(L2_INJECTION, "actual_l2_injection", FieldKind::Power, 2, 3),
    field(L3_INJECTION, "actual_l3_injection", FieldKind::Power, 2, 3),
    field(L1_VOLTAGE, "l1_voltage", FieldKind::Voltage, 3, 1),
    field(L2_VOLTAGE, "l2_voltage", FieldKind::Voltage, 3, 1),
    field(L3_VOLTAGE, "l3_voltage", FieldKind::Voltage, 3, 1),
    field(L1_CURRENT, "l1_current", FieldKind::Current, 3, 2),
    field(L2_CURRENT, "l2_current", FieldKind::Current, 3, 2),
    field(L3_CURRENT, "l3_current", FieldKind::Current, 3, 2),
    field(BREAKER_STATE, "breaker_state", FieldKind::Switch, 1, 0),
    field(LIMITER_THRESHOLD, "limiter_threshold", FieldKind::Power, 3, 1),
    field(FUSE_THRESHOLD, "fuse_threshold", FieldKind::Current, 3, 0),
    field(MESSAGE, "message", FieldKind::Text, 0, 0),
    field(GAS_DEVICE_TYPE, "gas_device_type", FieldKind::Text, 3, 0),
    field(GAS_EQUIPMENT_ID, "gas_equipment_id", FieldKind::Text, 0, 0),
    field(GAS_VALVE_STATE, "gas_valve_state", FieldKind::Switch, 1, 0),
    field(GAS_READING, "total_gas_consumption", FieldKind::Gas, 5, 3),
];

/// Look up a known identifier
pub fn lookup(code: &str) -> Option<&'static ObisField> {
    KNOWN_FIELDS.iter().find(|f| f.code == code)
}

/// Map a raw unit onto its canonical unit and the factor to apply
pub fn canonical_unit(unit: &str) -> Option<(&'static str, f64)> {
    match unit {
        "kW" => Some(("kW", 1.0)),
        "W" => Some(("kW", 0.001)),
        "kWh" => Some(("kWh", 1.0)),
        "Wh" => Some(("kWh", 0.001)),
        "V" => Some(("V", 1.0)),
        "kV" => Some(("V", 1000.0)),
        "A" => Some(("A", 1.0)),
        "mA" => Some(("A", 0.001)),
        "m3" => Some(("m3", 1.0)),
        "dm3" => Some(("m3", 0.001)),
        _ => None,
    }
}

/// Whether `code` can stand as an identifier
///
/// Only the known table is interpreted; any other token before the first
/// value group (short forms like `C.1.0`, lettered groups) is kept opaque.
pub fn is_identifier(code: &str) -> bool {
    !code.is_empty()
        && !code.starts_with(['/', '!'])
        && !code.contains(['(', ')'])
        && !code.chars().any(char::is_whitespace)
}
