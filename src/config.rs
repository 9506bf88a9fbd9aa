use std::{str::FromStr, time::Duration};

use anyhow::{Context, Result};

use crate::rules::Thresholds;

// ---------------------------------------------------------------------------
// MqttProtocol
// ---------------------------------------------------------------------------

/// Transport scheme for the broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MqttProtocol {
    Mqtt,
    Mqtts,
}

impl FromStr for MqttProtocol {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mqtt" => Ok(Self::Mqtt),
            "mqtts" => Ok(Self::Mqtts),
            other => Err(anyhow::anyhow!("unknown MQTT protocol: {other:?}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_protocol: MqttProtocol,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    /// Inbound topic carrying JSON telemetry payloads.
    pub telemetry_topic: String,
    pub server_host: String,
    pub server_port: u16,
    /// Relative humidity (%) above which the fan runs.
    pub humidity_threshold: f64,
    /// Ambient temperature (°C) above which the fan runs.
    pub environment_temperature_threshold: f64,
    /// Tank water level below which the refill valve opens.
    pub water_level_threshold: f64,
    /// Electrical conductivity (µS/cm) above which the dilution pump runs.
    pub ec_threshold: f64,
    pub ph_low_threshold: f64,
    pub ph_high_threshold: f64,
    pub pump_a_cooldown_secs: u64,
    pub pump_b_cooldown_secs: u64,
    /// TTL for the serial-number → farm lookup cache.
    pub farm_cache_ttl_secs: u64,
    /// Devices idle longer than this lose their timer state.
    pub device_idle_evict_secs: u64,
    /// How often the eviction sweep runs.
    pub eviction_sweep_secs: u64,
    /// Upper bound on one persistence write.
    pub sink_timeout_secs: u64,
    /// Also append every reading to `reading_history`.
    pub persist_history: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            database_url: required("DATABASE_URL")?,
            mqtt_host: required("MQTT_HOST")?,
            mqtt_port: optional("MQTT_PORT", "8883")
                .parse()
                .context("MQTT_PORT must be a valid port number")?,
            mqtt_protocol: optional("MQTT_PROTOCOL", "mqtts")
                .parse()
                .context("MQTT_PROTOCOL must be 'mqtt' or 'mqtts'")?,
            mqtt_username: std::env::var("MQTT_USERNAME").ok(),
            mqtt_password: std::env::var("MQTT_PASSWORD").ok(),
            telemetry_topic: optional("TELEMETRY_TOPIC", "device-telemetry"),
            server_host: optional("SERVER_HOST", "0.0.0.0"),
            server_port: optional("SERVER_PORT", "8080")
                .parse()
                .context("SERVER_PORT must be a valid port number")?,
            humidity_threshold: parse_f64("HUMIDITY_THRESHOLD", "60")?,
            environment_temperature_threshold: parse_f64("ENV_TEMPERATURE_THRESHOLD", "27")?,
            water_level_threshold: parse_f64("WATER_LEVEL_THRESHOLD", "5")?,
            ec_threshold: parse_f64("EC_THRESHOLD", "2000")?,
            ph_low_threshold: parse_f64("PH_LOW_THRESHOLD", "5.0")?,
            ph_high_threshold: parse_f64("PH_HIGH_THRESHOLD", "6.0")?,
            pump_a_cooldown_secs: parse_u64("PUMP_A_COOLDOWN_SECS", "300")?,
            pump_b_cooldown_secs: parse_u64("PUMP_B_COOLDOWN_SECS", "300")?,
            farm_cache_ttl_secs: parse_u64("FARM_CACHE_TTL_SECS", "30")?,
            device_idle_evict_secs: parse_u64("DEVICE_IDLE_EVICT_SECS", "21600")?,
            eviction_sweep_secs: parse_u64("EVICTION_SWEEP_SECS", "600")?,
            sink_timeout_secs: parse_u64("SINK_TIMEOUT_SECS", "3")?,
            persist_history: optional("PERSIST_HISTORY", "false")
                .parse()
                .context("PERSIST_HISTORY must be 'true' or 'false'")?,
        };

        validate_eviction_horizon(
            config.device_idle_evict_secs,
            config.pump_a_cooldown_secs,
            config.pump_b_cooldown_secs,
        )?;

        Ok(config)
    }

    /// The rule engine's threshold table, assembled from the individual
    /// environment knobs.
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            humidity_max: self.humidity_threshold,
            environment_temperature_max: self.environment_temperature_threshold,
            water_level_min: self.water_level_threshold,
            electrical_conductivity_max: self.ec_threshold,
            ph_low: self.ph_low_threshold,
            ph_high: self.ph_high_threshold,
            pump_a_cooldown: chrono::Duration::seconds(self.pump_a_cooldown_secs as i64),
            pump_b_cooldown: chrono::Duration::seconds(self.pump_b_cooldown_secs as i64),
        }
    }

    pub fn farm_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.farm_cache_ttl_secs)
    }

    pub fn sink_timeout(&self) -> Duration {
        Duration::from_secs(self.sink_timeout_secs)
    }
}

/// An evicted device comes back with a fresh, untriggered timer state,
/// so the idle horizon must outlast every pump cooldown or an eviction
/// sweep could erase a live cooldown and let a pump double-dose.
fn validate_eviction_horizon(evict_secs: u64, pump_a_secs: u64, pump_b_secs: u64) -> Result<()> {
    let longest_cooldown = pump_a_secs.max(pump_b_secs);
    if evict_secs <= longest_cooldown {
        anyhow::bail!(
            "DEVICE_IDLE_EVICT_SECS ({evict_secs}) must exceed the longest pump cooldown \
             ({longest_cooldown})"
        );
    }
    Ok(())
}

fn parse_f64(key: &str, default: &str) -> Result<f64> {
    optional(key, default)
        .parse()
        .with_context(|| format!("{key} must be a number"))
}

fn parse_u64(key: &str, default: &str) -> Result<u64> {
    optional(key, default)
        .parse()
        .with_context(|| format!("{key} must be a positive integer"))
}

fn required(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("missing required env var: {key}"))
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}
