use serde_derive::Deserialize;
use serde_json::{Map, Value};

// Top level fields of the ShineX `/status` document
pub const MAC: &str = "Mac";
pub const INVERTER_STATUS: &str = "InverterStatus";
pub const PV1_INPUT_POWER: &str = "PV1InputPower";
pub const PV2_INPUT_POWER: &str = "PV2InputPower";
pub const OUTPUT_POWER: &str = "OutputPower";
pub const TOTAL_GENERATE_ENERGY: &str = "TotalGenerateEnergy";

/// `InverterStatus` of the sample handed downstream after a failed fetch.
pub const UNKNOWN_STATUS: &str = "unknown";

/// Serial used when the device never reported its MAC address.
pub const UNKNOWN_SERIAL: &str = "000000000000";

/// Vendor field mapping as decoded from one `/status` response.
///
/// Nothing guarantees that a field is present, so every accessor is
/// fallible. Values are accepted as JSON numbers or numeric strings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct RawSample(Map<String, Value>);

impl RawSample {
    /// Sample handed downstream when the fetch failed.
    pub fn unknown() -> Self {
        let mut fields = Map::new();
        fields.insert(INVERTER_STATUS.to_string(), Value::from(UNKNOWN_STATUS));
        Self(fields)
    }

    /// True only for the failed-fetch sample built by [`RawSample::unknown`].
    pub fn is_unknown(&self) -> bool {
        self.text(INVERTER_STATUS) == Some(UNKNOWN_STATUS)
    }

    pub fn inverter_status(&self) -> Option<f64> {
        self.number(INVERTER_STATUS)
    }

    pub fn number(&self, field: &str) -> Option<f64> {
        match self.0.get(field)? {
            Value::Number(number) => number.as_f64(),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    /// Device serial: the MAC address with its separators stripped.
    pub fn serial_number(&self) -> String {
        match self.text(MAC) {
            Some(mac) if !mac.trim().is_empty() => mac.trim().replace([':', '-'], ""),
            _ => UNKNOWN_SERIAL.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for RawSample {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}
