use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed telemetry payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
    #[error("telemetry payload has an empty serial number")]
    InvalidSerialNumber,
}

/// One decoded telemetry event. Immutable; created here and discarded
/// after the dispatch cycle that consumed it.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub serial_number: String,
    pub paired: bool,
    /// Tank water temperature, °C
    pub water_temperature: f64,
    /// Ambient temperature, °C
    pub environment_temperature: f64,
    /// ppm
    pub co2: f64,
    pub light_level: f64,
    /// Relative humidity, %
    pub humidity: f64,
    pub water_level: f64,
    pub ph: f64,
    /// µS/cm
    pub electrical_conductivity: f64,
    /// Assigned at ingestion; the rule engine's clock for cooldown math.
    pub received_at: DateTime<Utc>,
}

/// Wire shape as emitted by the control-unit firmware. The `E_`/`T_`
/// prefixes distinguish environment sensors from tank sensors.
#[derive(Debug, Deserialize)]
struct WireReading {
    #[serde(rename = "serialNumber")]
    serial_number: String,
    paired: bool,
    #[serde(rename = "E_humidity")]
    humidity: f64,
    #[serde(rename = "E_temperature")]
    environment_temperature: f64,
    #[serde(rename = "E_co2")]
    co2: f64,
    #[serde(rename = "E_lightLVL")]
    light_level: f64,
    #[serde(rename = "T_temperature")]
    water_temperature: f64,
    #[serde(rename = "T_Waterlvl")]
    water_level: f64,
    #[serde(rename = "T_PH")]
    ph: f64,
    #[serde(rename = "T_EC")]
    electrical_conductivity: f64,
}

/// Parse a raw transport payload into a [`Reading`].
///
/// Pure: no range sanity checks happen here (NaN and physically
/// impossible values pass through; the rule engine treats them as
/// "condition false"). Unknown extra fields are ignored.
pub fn decode(raw: &[u8], received_at: DateTime<Utc>) -> Result<Reading, DecodeError> {
    let wire: WireReading = serde_json::from_slice(raw)?;

    if wire.serial_number.trim().is_empty() {
        return Err(DecodeError::InvalidSerialNumber);
    }

    Ok(Reading {
        serial_number: wire.serial_number,
        paired: wire.paired,
        water_temperature: wire.water_temperature,
        environment_temperature: wire.environment_temperature,
        co2: wire.co2,
        light_level: wire.light_level,
        humidity: wire.humidity,
        water_level: wire.water_level,
        ph: wire.ph,
        electrical_conductivity: wire.electrical_conductivity,
        received_at,
    })
}
