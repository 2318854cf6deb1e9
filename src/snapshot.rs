//! Measurement model
//!
//! One [`Snapshot`] per decoded telegram. Known OBIS codes land in typed
//! fields with canonical units (kW, kWh, V, A, m3); everything else is kept
//! verbatim in [`Snapshot::unknown`]. Snapshots are immutable once built and
//! are shared across the pipeline as `Arc<Snapshot>`.

use crate::error::{MeterlinkError, Result};
use crate::telegram::decode::{DecodedTelegram, FieldRecord, FieldValue, MeterTimestamp};
use crate::telegram::encode::encode_quantity;
use crate::telegram::obis::{self, FieldKind, ObisField};
use chrono::{DateTime, Utc};
use tracing::warn;

/// Active billing rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tariff {
    Day,
    Night,
}

impl Tariff {
    pub fn code(self) -> u8 {
        match self {
            Tariff::Day => 1,
            Tariff::Night => 2,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Tariff::Day),
            2 => Some(Tariff::Night),
            _ => None,
        }
    }
}

/// Breaker or valve position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchPosition {
    Disconnected,
    Connected,
    ReadyForReconnection,
}

impl SwitchPosition {
    pub fn code(self) -> u8 {
        match self {
            SwitchPosition::Disconnected => 0,
            SwitchPosition::Connected => 1,
            SwitchPosition::ReadyForReconnection => 2,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(SwitchPosition::Disconnected),
            1 => Some(SwitchPosition::Connected),
            2 => Some(SwitchPosition::ReadyForReconnection),
            _ => None,
        }
    }
}

/// Cumulative energy registers in kWh
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnergyCounters {
    pub consumption_day: Option<f64>,
    pub consumption_night: Option<f64>,
    pub injection_day: Option<f64>,
    pub injection_night: Option<f64>,
}

/// Instantaneous values of one phase
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PhaseReading {
    pub consumption_kw: Option<f64>,
    pub injection_kw: Option<f64>,
    pub voltage_v: Option<f64>,
    pub current_a: Option<f64>,
}

/// Gas meter sub-record (M-Bus channel 1)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GasReading {
    pub device_type: Option<String>,
    pub equipment_id: Option<String>,
    pub valve: Option<SwitchPosition>,
    pub timestamp: Option<MeterTimestamp>,
    pub volume_m3: Option<f64>,
}

/// Structured result of one telegram
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Identification header without the leading `/`
    pub meter_id: String,
    pub received_at: DateTime<Utc>,
    pub timestamp: Option<MeterTimestamp>,
    pub version: Option<String>,
    pub equipment_id: Option<String>,
    pub energy: EnergyCounters,
    pub tariff: Option<Tariff>,
    pub consumption_kw: f64,
    pub injection_kw: f64,
    pub phases: [PhaseReading; 3],
    pub breaker: Option<SwitchPosition>,
    pub limiter_kw: Option<f64>,
    pub fuse_threshold_a: Option<f64>,
    pub message: Option<String>,
    pub gas: Option<GasReading>,
    /// consumption - injection, positive when drawing from the grid
    pub net_power_kw: f64,
    /// Unrecognized records and known codes carrying an unexpected value
    pub unknown: Vec<FieldRecord>,
}

/// Names of the numeric measurements, in export column order
pub const MEASUREMENT_NAMES: &[&str] = &[
    "total_consumption_day",
    "total_consumption_night",
    "total_injection_day",
    "total_injection_night",
    "actual_tariff",
    "actual_total_consumption",
    "actual_total_injection",
    "actual_l1_consumption",
    "actual_l2_consumption",
    "actual_l3_consumption",
    "actual_l1_injection",
    "actual_l2_injection",
    "actual_l3_injection",
    "l1_voltage",
    "l2_voltage",
    "l3_voltage",
    "l1_current",
    "l2_current",
    "l3_current",
    "net_power",
    "total_gas_consumption",
];

impl Snapshot {
    /// Map decoded records onto the model
    ///
    /// Fails only when the total consumption or injection power is missing or
    /// not a power quantity.
    pub fn build(telegram: DecodedTelegram, received_at: DateTime<Utc>) -> Result<Self> {
        let mut builder = SnapshotBuilder::default();
        let mut unknown = Vec::new();

        for record in telegram.records {
            match obis::lookup(&record.code) {
                Some(field) => {
                    if !builder.apply(field, &record) {
                        warn!(
                            "{} ({}) carries an unexpected value: {}",
                            field.name, field.code, record.line
                        );
                        unknown.push(record);
                    }
                }
                None => unknown.push(record),
            }
        }

        let consumption_kw = builder.consumption_kw.ok_or_else(|| {
            MeterlinkError::model(obis::CONSUMPTION, "missing total consumption power")
        })?;
        let injection_kw = builder.injection_kw.ok_or_else(|| {
            MeterlinkError::model(obis::INJECTION, "missing total injection power")
        })?;

        Ok(Snapshot {
            meter_id: telegram.header,
            received_at,
            timestamp: builder.timestamp,
            version: builder.version,
            equipment_id: builder.equipment_id,
            energy: builder.energy,
            tariff: builder.tariff,
            consumption_kw,
            injection_kw,
            phases: builder.phases,
            breaker: builder.breaker,
            limiter_kw: builder.limiter_kw,
            fuse_threshold_a: builder.fuse_threshold_a,
            message: builder.message,
            gas: builder.gas,
            net_power_kw: consumption_kw - injection_kw,
            unknown,
        })
    }

    /// Power flowing into the grid (negative net power)
    pub fn surplus_kw(&self) -> f64 {
        -self.net_power_kw
    }

    /// Telegram instant, falling back to the receive time
    pub fn measured_at(&self) -> DateTime<Utc> {
        self.timestamp.map_or(self.received_at, |ts| ts.utc)
    }

    /// Seconds between the meter clock and the local receive time
    pub fn clock_drift_seconds(&self) -> Option<i64> {
        self.timestamp
            .map(|ts| (self.received_at - ts.utc).num_seconds())
    }

    /// Numeric measurements in [`MEASUREMENT_NAMES`] order
    pub fn measurements(&self) -> Vec<(&'static str, Option<f64>)> {
        let [l1, l2, l3] = self.phases;
        let values = [
            self.energy.consumption_day,
            self.energy.consumption_night,
            self.energy.injection_day,
            self.energy.injection_night,
            self.tariff.map(|t| f64::from(t.code())),
            Some(self.consumption_kw),
            Some(self.injection_kw),
            l1.consumption_kw,
            l2.consumption_kw,
            l3.consumption_kw,
            l1.injection_kw,
            l2.injection_kw,
            l3.injection_kw,
            l1.voltage_v,
            l2.voltage_v,
            l3.voltage_v,
            l1.current_a,
            l2.current_a,
            l3.current_a,
            Some(self.net_power_kw),
            self.gas.as_ref().and_then(|g| g.volume_m3),
        ];
        MEASUREMENT_NAMES.iter().copied().zip(values).collect()
    }

    /// Render the known fields back to telegram lines at their declared precision
    pub fn encode_known_fields(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for field in obis::KNOWN_FIELDS {
            if let Some(line) = self.encode_field(field) {
                lines.push(line);
            }
        }
        lines
    }

    fn encode_field(&self, field: &ObisField) -> Option<String> {
        let token = |text: &str| format!("{}({})", field.code, text);
        let gas = self.gas.as_ref();
        match field.code {
            obis::VERSION => self.version.as_deref().map(token),
            obis::EQUIPMENT_ID => self.equipment_id.as_deref().map(token),
            obis::TIMESTAMP => self.timestamp.map(|ts| token(&ts.raw())),
            obis::ACTUAL_TARIFF => self.tariff.map(|t| {
                token(&format!("{:0width$}", t.code(), width = field.int_digits))
            }),
            obis::BREAKER_STATE => self.breaker.map(|p| token(&p.code().to_string())),
            obis::MESSAGE => self.message.as_deref().map(token),
            obis::GAS_DEVICE_TYPE => gas.and_then(|g| g.device_type.as_deref()).map(token),
            obis::GAS_EQUIPMENT_ID => gas.and_then(|g| g.equipment_id.as_deref()).map(token),
            obis::GAS_VALVE_STATE => gas
                .and_then(|g| g.valve)
                .map(|p| token(&p.code().to_string())),
            obis::GAS_READING => {
                let g = gas?;
                let ts = g.timestamp?;
                let volume = g.volume_m3?;
                let quantity = encode_quantity(field, volume, "m3");
                Some(format!(
                    "{}({}){}",
                    field.code,
                    ts.raw(),
                    &quantity[field.code.len()..]
                ))
            }
            _ => {
                let unit = field.kind.unit()?;
                self.quantity_of(field.code)
                    .map(|value| encode_quantity(field, value, unit))
            }
        }
    }

    fn quantity_of(&self, code: &str) -> Option<f64> {
        let [l1, l2, l3] = self.phases;
        match code {
            obis::CONSUMPTION_DAY => self.energy.consumption_day,
            obis::CONSUMPTION_NIGHT => self.energy.consumption_night,
            obis::INJECTION_DAY => self.energy.injection_day,
            obis::INJECTION_NIGHT => self.energy.injection_night,
            obis::CONSUMPTION => Some(self.consumption_kw),
            obis::INJECTION => Some(self.injection_kw),
            obis::L1_CONSUMPTION => l1.consumption_kw,
            obis::L2_CONSUMPTION => l2.consumption_kw,
            obis::L3_CONSUMPTION => l3.consumption_kw,
            obis::L1_INJECTION => l1.injection_kw,
            obis::L2_INJECTION => l2.injection_kw,
            obis::L3_INJECTION => l3.injection_kw,
            obis::L1_VOLTAGE => l1.voltage_v,
            obis::L2_VOLTAGE => l2.voltage_v,
            obis::L3_VOLTAGE => l3.voltage_v,
            obis::L1_CURRENT => l1.current_a,
            obis::L2_CURRENT => l2.current_a,
            obis::L3_CURRENT => l3.current_a,
            obis::LIMITER_THRESHOLD => self.limiter_kw,
            obis::FUSE_THRESHOLD => self.fuse_threshold_a,
            _ => None,
        }
    }
}

/// Canonical value of a quantity of the expected kind
fn quantity_value(value: &FieldValue, kind: FieldKind) -> Option<f64> {
    let quantity = value.as_quantity()?;
    let (unit, factor) = obis::canonical_unit(&quantity.unit)?;
    (Some(unit) == kind.unit()).then(|| quantity.value.to_f64() * factor)
}

fn small_code(value: &FieldValue) -> Option<u8> {
    value.as_token()?.parse().ok()
}

/// Accumulates known fields while scanning a telegram
#[derive(Debug, Default)]
struct SnapshotBuilder {
    timestamp: Option<MeterTimestamp>,
    version: Option<String>,
    equipment_id: Option<String>,
    energy: EnergyCounters,
    tariff: Option<Tariff>,
    consumption_kw: Option<f64>,
    injection_kw: Option<f64>,
    phases: [PhaseReading; 3],
    breaker: Option<SwitchPosition>,
    limiter_kw: Option<f64>,
    fuse_threshold_a: Option<f64>,
    message: Option<String>,
    gas: Option<GasReading>,
}

impl SnapshotBuilder {
    /// Store the record; false when the value has the wrong kind
    fn apply(&mut self, field: &ObisField, record: &FieldRecord) -> bool {
        let value = &record.value;
        match field.kind {
            FieldKind::Text => {
                let Some(text) = value.as_token().map(str::to_string) else {
                    return false;
                };
                match field.code {
                    obis::VERSION => self.version = Some(text),
                    obis::EQUIPMENT_ID => self.equipment_id = Some(text),
                    obis::MESSAGE => self.message = Some(text),
                    obis::GAS_DEVICE_TYPE => self.gas_mut().device_type = Some(text),
                    obis::GAS_EQUIPMENT_ID => self.gas_mut().equipment_id = Some(text),
                    _ => return false,
                }
                true
            }
            FieldKind::Timestamp => match value.as_timestamp() {
                Some(ts) => {
                    self.timestamp = Some(*ts);
                    true
                }
                None => false,
            },
            FieldKind::Tariff => match small_code(value).and_then(Tariff::from_code) {
                Some(tariff) => {
                    self.tariff = Some(tariff);
                    true
                }
                None => false,
            },
            FieldKind::Switch => {
                let Some(position) = small_code(value).and_then(SwitchPosition::from_code) else {
                    return false;
                };
                match field.code {
                    obis::BREAKER_STATE => self.breaker = Some(position),
                    obis::GAS_VALVE_STATE => self.gas_mut().valve = Some(position),
                    _ => return false,
                }
                true
            }
            FieldKind::Gas => {
                let FieldValue::Composite(groups) = value else {
                    return false;
                };
                let (Some(ts), Some(volume)) = (
                    groups.iter().find_map(FieldValue::as_timestamp),
                    groups
                        .iter()
                        .find_map(|g| quantity_value(g, FieldKind::Gas)),
                ) else {
                    return false;
                };
                let gas = self.gas_mut();
                gas.timestamp = Some(*ts);
                gas.volume_m3 = Some(volume);
                true
            }
            FieldKind::Energy | FieldKind::Power | FieldKind::Voltage | FieldKind::Current => {
                let Some(v) = quantity_value(value, field.kind) else {
                    return false;
                };
                match self.quantity_slot(field.code) {
                    Some(slot) => {
                        *slot = Some(v);
                        true
                    }
                    None => false,
                }
            }
        }
    }

    fn quantity_slot(&mut self, code: &str) -> Option<&mut Option<f64>> {
        let [l1, l2, l3] = &mut self.phases;
        Some(match code {
            obis::CONSUMPTION_DAY => &mut self.energy.consumption_day,
            obis::CONSUMPTION_NIGHT => &mut self.energy.consumption_night,
            obis::INJECTION_DAY => &mut self.energy.injection_day,
            obis::INJECTION_NIGHT => &mut self.energy.injection_night,
            obis::CONSUMPTION => &mut self.consumption_kw,
            obis::INJECTION => &mut self.injection_kw,
            obis::L1_CONSUMPTION => &mut l1.consumption_kw,
            obis::L2_CONSUMPTION => &mut l2.consumption_kw,
            obis::L3_CONSUMPTION => &mut l3.consumption_kw,
            obis::L1_INJECTION => &mut l1.injection_kw,
            obis::L2_INJECTION => &mut l2.injection_kw,
            obis::L3_INJECTION => &mut l3.injection_kw,
            obis::L1_VOLTAGE => &mut l1.voltage_v,
            obis::L2_VOLTAGE => &mut l2.voltage_v,
            obis::L3_VOLTAGE => &mut l3.voltage_v,
            obis::L1_CURRENT => &mut l1.current_a,
            obis::L2_CURRENT => &mut l2.current_a,
            obis::L3_CURRENT => &mut l3.current_a,
            obis::LIMITER_THRESHOLD => &mut self.limiter_kw,
            obis::FUSE_THRESHOLD => &mut self.fuse_threshold_a,
            _ => return None,
        })
    }

    fn gas_mut(&mut self) -> &mut GasReading {
        self.gas.get_or_insert_with(GasReading::default)
    }
}
