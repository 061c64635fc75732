//! The data bus the bridge publishes on.
//!
//! [`BusService`] is the narrow contract the publisher needs: declare a
//! path, set and read values, render a value for display. [`AttributeStore`]
//! is the in-process implementation, shared with the Modbus gateway.

use crate::phase::Phase;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

pub const SERVICE_PREFIX: &str = "com.victronenergy.pvinverter";

// Management and identity paths
pub const MGMT_PROCESS_NAME: &str = "/Mgmt/ProcessName";
pub const MGMT_PROCESS_VERSION: &str = "/Mgmt/ProcessVersion";
pub const MGMT_CONNECTION: &str = "/Mgmt/Connection";
pub const DEVICE_INSTANCE: &str = "/DeviceInstance";
pub const PRODUCT_ID: &str = "/ProductId";
pub const PRODUCT_NAME: &str = "/ProductName";
pub const CUSTOM_NAME: &str = "/CustomName";
pub const LATENCY: &str = "/Latency";
pub const FIRMWARE_VERSION: &str = "/FirmwareVersion";
pub const HARDWARE_VERSION: &str = "/HardwareVersion";
pub const CONNECTED: &str = "/Connected";
pub const ROLE: &str = "/Role";
pub const POSITION: &str = "/Position";
pub const SERIAL: &str = "/Serial";
pub const UPDATE_INDEX: &str = "/UpdateIndex";
pub const STATUS_CODE: &str = "/StatusCode";

// Telemetry paths
pub const ERROR_CODE: &str = "/ErrorCode";
pub const AC_ENERGY_FORWARD: &str = "/Ac/Energy/Forward";
pub const AC_POWER: &str = "/Ac/Power";

/// Bus name for a device instance, e.g. `com.victronenergy.pvinverter.http_40`.
pub fn service_name(device_instance: u32) -> String {
    format!("{SERVICE_PREFIX}.http_{device_instance:02}")
}

/// A value held by a bus attribute.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum BusValue {
    /// No value published yet.
    #[default]
    Invalid,
    Int(i64),
    Float(f64),
    Text(String),
}

impl BusValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            BusValue::Int(value) => Some(*value as f64),
            BusValue::Float(value) => Some(*value),
            BusValue::Invalid | BusValue::Text(_) => None,
        }
    }
}

impl fmt::Display for BusValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusValue::Invalid => f.write_str("--"),
            BusValue::Int(value) => write!(f, "{value}"),
            BusValue::Float(value) => write!(f, "{value}"),
            BusValue::Text(value) => f.write_str(value),
        }
    }
}

impl From<f64> for BusValue {
    fn from(value: f64) -> Self {
        BusValue::Float(value)
    }
}

impl From<i64> for BusValue {
    fn from(value: i64) -> Self {
        BusValue::Int(value)
    }
}

impl From<bool> for BusValue {
    fn from(value: bool) -> Self {
        BusValue::Int(i64::from(value))
    }
}

impl From<&str> for BusValue {
    fn from(value: &str) -> Self {
        BusValue::Text(value.to_string())
    }
}

impl From<String> for BusValue {
    fn from(value: String) -> Self {
        BusValue::Text(value)
    }
}

/// Display unit of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    None,
    KiloWattHour,
    Amp,
    Watt,
    Volt,
}

impl Unit {
    pub fn format(self, value: &BusValue) -> String {
        let Some(number) = value.as_f64() else {
            return value.to_string();
        };
        match self {
            Unit::None => value.to_string(),
            Unit::KiloWattHour => format!("{number:.2}KWh"),
            Unit::Amp => format!("{number:.1}A"),
            Unit::Watt => format!("{number:.1}W"),
            Unit::Volt => format!("{number:.1}V"),
        }
    }
}

/// One row of the telemetry attribute table.
#[derive(Debug, Clone, Copy)]
pub struct AttributeSpec {
    pub path: &'static str,
    pub unit: Unit,
}

const fn attribute(path: &'static str, unit: Unit) -> AttributeSpec {
    AttributeSpec { path, unit }
}

/// Telemetry attributes. All start out invalid and accept external writes.
pub const TELEMETRY_ATTRIBUTES: [AttributeSpec; 15] = [
    attribute(ERROR_CODE, Unit::None),
    attribute(AC_ENERGY_FORWARD, Unit::KiloWattHour),
    attribute(AC_POWER, Unit::Watt),
    attribute(Phase::L1.current_path(), Unit::Amp),
    attribute(Phase::L1.power_path(), Unit::Watt),
    attribute(Phase::L1.voltage_path(), Unit::Volt),
    attribute(Phase::L1.energy_forward_path(), Unit::KiloWattHour),
    attribute(Phase::L2.current_path(), Unit::Amp),
    attribute(Phase::L2.power_path(), Unit::Watt),
    attribute(Phase::L2.voltage_path(), Unit::Volt),
    attribute(Phase::L2.energy_forward_path(), Unit::KiloWattHour),
    attribute(Phase::L3.current_path(), Unit::Amp),
    attribute(Phase::L3.power_path(), Unit::Watt),
    attribute(Phase::L3.voltage_path(), Unit::Volt),
    attribute(Phase::L3.energy_forward_path(), Unit::KiloWattHour),
];

/// A value pushed onto the bus by another process.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalWrite {
    pub path: String,
    pub value: BusValue,
}

/// Contract between the publisher and whatever bus it publishes on.
pub trait BusService {
    fn service_name(&self) -> &str;

    /// Declares a path. Declaring it again resets value, unit and flags.
    fn add_path(&mut self, path: &str, initial: BusValue, unit: Unit, writeable: bool);

    /// Sets the value of a declared path; unknown paths are ignored.
    fn set_value(&mut self, path: &str, value: BusValue);

    fn value(&self, path: &str) -> Option<BusValue>;

    /// Value rendered with the path's unit.
    fn display(&self, path: &str) -> Option<String>;

    fn is_writeable(&self, path: &str) -> bool;
}

#[derive(Debug, Clone)]
struct Attribute {
    value: BusValue,
    unit: Unit,
    writeable: bool,
}

/// In-memory attribute tree. Clones share the same tree.
#[derive(Debug, Clone)]
pub struct AttributeStore {
    service_name: Arc<str>,
    attributes: Arc<Mutex<BTreeMap<String, Attribute>>>,
}

impl AttributeStore {
    pub fn register(service_name: impl Into<String>) -> Self {
        let service_name: String = service_name.into();
        Self {
            service_name: service_name.into(),
            attributes: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    pub fn paths(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Attribute>> {
        self.attributes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BusService for AttributeStore {
    fn service_name(&self) -> &str {
        &self.service_name
    }

    fn add_path(&mut self, path: &str, initial: BusValue, unit: Unit, writeable: bool) {
        self.lock().insert(
            path.to_string(),
            Attribute {
                value: initial,
                unit,
                writeable,
            },
        );
    }

    fn set_value(&mut self, path: &str, value: BusValue) {
        match self.lock().get_mut(path) {
            Some(attribute) => attribute.value = value,
            None => warn!(path, "set on undeclared bus path ignored"),
        }
    }

    fn value(&self, path: &str) -> Option<BusValue> {
        self.lock().get(path).map(|attribute| attribute.value.clone())
    }

    fn display(&self, path: &str) -> Option<String> {
        self.lock()
            .get(path)
            .map(|attribute| attribute.unit.format(&attribute.value))
    }

    fn is_writeable(&self, path: &str) -> bool {
        self.lock()
            .get(path)
            .is_some_and(|attribute| attribute.writeable)
    }
}
