use crate::bus::{self, BusService, BusValue, ExternalWrite, Unit, TELEMETRY_ATTRIBUTES};
use crate::config::BridgeConfig;
use crate::normalizer::CanonicalReading;
use crate::phase::Phase;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

pub const PRODUCT_NAME: &str = "Growatt ShineX";
pub const CONNECTION: &str = "Growatt ShineX HTTP JSON connection";
/// Product id reserved for third-party PV inverters.
pub const PRODUCT_ID: i64 = 0xA142;
const STATUS_RUNNING: i64 = 7;

/// The only state that survives between cycles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishedState {
    pub update_index: u8,
    pub last_update: Option<DateTime<Utc>>,
}

/// Writes readings onto the bus and reports liveness.
pub struct Publisher<B: BusService> {
    bus: B,
    state: PublishedState,
}

impl<B: BusService> Publisher<B> {
    /// Declares the identity and telemetry attributes of the service.
    pub fn new(mut bus: B, config: &BridgeConfig, serial: &str) -> Self {
        debug!(
            service = bus.service_name(),
            device_instance = config.device_instance,
            "registering bus service"
        );

        let identity: [(&str, BusValue); 16] = [
            (bus::MGMT_PROCESS_NAME, env!("CARGO_PKG_NAME").into()),
            (bus::MGMT_PROCESS_VERSION, env!("CARGO_PKG_VERSION").into()),
            (bus::MGMT_CONNECTION, CONNECTION.into()),
            (bus::DEVICE_INSTANCE, i64::from(config.device_instance).into()),
            (bus::PRODUCT_ID, PRODUCT_ID.into()),
            (bus::PRODUCT_NAME, PRODUCT_NAME.into()),
            (bus::CUSTOM_NAME, config.custom_name.as_str().into()),
            (bus::LATENCY, BusValue::Invalid),
            (bus::FIRMWARE_VERSION, env!("CARGO_PKG_VERSION").into()),
            (bus::HARDWARE_VERSION, 0i64.into()),
            (bus::CONNECTED, true.into()),
            (bus::ROLE, "pvinverter".into()),
            (bus::POSITION, i64::from(config.position).into()),
            (bus::SERIAL, serial.into()),
            (bus::UPDATE_INDEX, 0i64.into()),
            (bus::STATUS_CODE, STATUS_RUNNING.into()),
        ];
        for (path, value) in identity {
            bus.add_path(path, value, Unit::None, false);
        }

        for attribute in TELEMETRY_ATTRIBUTES {
            bus.add_path(attribute.path, BusValue::Invalid, attribute.unit, true);
        }

        Self {
            bus,
            state: PublishedState::default(),
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn state(&self) -> &PublishedState {
        &self.state
    }

    /// Publishes every value the reading carries and returns the new update index.
    pub fn publish(&mut self, reading: &CanonicalReading) -> u8 {
        self.bus.set_value(bus::CONNECTED, reading.connected.into());
        self.set_optional(bus::AC_POWER, reading.total_power);
        self.set_optional(bus::AC_ENERGY_FORWARD, reading.total_energy_forward);

        for phase in Phase::ALL {
            let values = reading.phase(phase);
            self.set_optional(phase.current_path(), values.current);
            self.set_optional(phase.power_path(), values.power);
            self.set_optional(phase.voltage_path(), values.voltage);
            self.set_optional(phase.energy_forward_path(), values.energy_forward);
        }

        self.state.update_index = self.state.update_index.wrapping_add(1);
        self.bus
            .set_value(bus::UPDATE_INDEX, i64::from(self.state.update_index).into());
        self.state.last_update = Some(Utc::now());

        debug!(
            power = ?self.bus.value(bus::AC_POWER),
            energy_forward = ?self.bus.value(bus::AC_ENERGY_FORWARD),
            update_index = self.state.update_index,
            "published reading"
        );
        self.state.update_index
    }

    /// Logs the last update time and the last published totals.
    pub fn sign_of_life(&self) {
        let last_update = self
            .state
            .last_update
            .map_or_else(|| "never".to_string(), |at| at.to_rfc3339());
        info!(
            last_update = %last_update,
            power = %self.display(bus::AC_POWER),
            energy_forward = %self.display(bus::AC_ENERGY_FORWARD),
            update_index = self.state.update_index,
            "sign of life"
        );
    }

    /// Another bus client changed a value. Telemetry attributes accept
    /// anything; identity attributes are read-only.
    pub fn accept_external_write(&mut self, write: ExternalWrite) -> bool {
        if !self.bus.is_writeable(&write.path) {
            warn!(path = %write.path, value = %write.value, "rejected write to read-only bus path");
            return false;
        }
        debug!(path = %write.path, value = %write.value, "someone else updated bus path");
        self.bus.set_value(&write.path, write.value);
        true
    }

    fn set_optional(&mut self, path: &str, value: Option<f64>) {
        if let Some(value) = value {
            self.bus.set_value(path, value.into());
        }
    }

    fn display(&self, path: &str) -> String {
        self.bus.display(path).unwrap_or_default()
    }
}
