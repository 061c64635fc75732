//! Growatt ShineX PV inverter bridge
//!
//! Polls the `/status` endpoint of a ShineX WiFi stick, normalizes the
//! sample into a three-phase AC reading and publishes it as a PV inverter
//! service on the energy-system bus. The bus attribute tree is also served
//! over Modbus TCP.

pub mod bridge;
pub mod bus;
pub mod config;
pub mod modbus_gateway;
pub mod normalizer;
pub mod phase;
pub mod publisher;
pub mod sample;
pub mod shinex_client;

#[cfg(test)]
mod test_support;

// Re-export commonly used types for easier access
pub use bridge::{Bridge, CycleError, CycleOutcome};
pub use bus::{AttributeStore, BusService, BusValue, ExternalWrite};
pub use config::{BridgeConfig, ConfigError, DeviceAccess, PhaseWiring};
pub use modbus_gateway::BusGateway;
pub use normalizer::{CanonicalReading, NormalizeError, Normalizer};
pub use publisher::Publisher;
pub use sample::RawSample;
pub use shinex_client::{FetchError, ShineXClient};
