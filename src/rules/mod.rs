use chrono::{DateTime, Duration, Utc};

use crate::{codec::Reading, timer_store::DeviceTimerState};

/// Everything the control loop can switch on a farm's control unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Actuator {
    Fan,
    Valve,
    /// Dosing pump for raising pH (fires on acidic water).
    PumpA,
    /// Dosing pump for lowering pH (fires on alkaline water).
    PumpB,
    /// Nutrient dilution pump (fires on high conductivity).
    PumpC,
    AirPump,
    Light,
}

impl Actuator {
    /// Topic segment the firmware subscribes to for this actuator.
    pub fn topic_segment(self) -> &'static str {
        match self {
            Actuator::Fan => "e_fan",
            Actuator::Valve => "t_valve",
            Actuator::PumpA => "pump1",
            Actuator::PumpB => "pump2",
            Actuator::PumpC => "pump3",
            Actuator::AirPump => "t_air",
            Actuator::Light => "e_light",
        }
    }
}

/// One desired-state instruction for one actuator on one farm.
/// Produced and consumed within a single dispatch cycle, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActuatorCommand {
    pub serial_number: String,
    pub actuator: Actuator,
    pub on: bool,
}

impl ActuatorCommand {
    /// Per-actuator, per-device delivery topic.
    pub fn topic(&self) -> String {
        format!("{}/{}", self.actuator.topic_segment(), self.serial_number)
    }

    /// Wire payload understood by the firmware.
    pub fn payload(&self) -> &'static str {
        if self.on {
            "1"
        } else {
            "0"
        }
    }
}

/// Threshold table driving the fixed control policies. Values are
/// tunable through the environment; defaults are the canonical ones.
#[derive(Debug, Clone)]
pub struct Thresholds {
    /// Relative humidity (%) above which the fan runs.
    pub humidity_max: f64,
    /// Ambient temperature (°C) above which the fan runs.
    pub environment_temperature_max: f64,
    /// Tank water level below which the refill valve opens.
    pub water_level_min: f64,
    /// Electrical conductivity (µS/cm) above which the dilution pump runs.
    pub electrical_conductivity_max: f64,
    /// pH below which pump A doses.
    pub ph_low: f64,
    /// pH above which pump B doses.
    pub ph_high: f64,
    pub pump_a_cooldown: Duration,
    pub pump_b_cooldown: Duration,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            humidity_max: 60.0,
            environment_temperature_max: 27.0,
            water_level_min: 5.0,
            electrical_conductivity_max: 2000.0,
            ph_low: 5.0,
            ph_high: 6.0,
            pump_a_cooldown: Duration::minutes(5),
            pump_b_cooldown: Duration::minutes(5),
        }
    }
}

/// A rate-limited pump is either ready to fire or cooling down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpPhase {
    Ready,
    Cooldown,
}

fn pump_phase(
    last_trigger: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    cooldown: Duration,
) -> PumpPhase {
    match last_trigger {
        None => PumpPhase::Ready,
        Some(t) if now - t >= cooldown => PumpPhase::Ready,
        Some(_) => PumpPhase::Cooldown,
    }
}

/// Pure decision function: maps one reading plus the device's prior
/// cooldown state to the full desired actuator state.
#[derive(Debug, Clone, Default)]
pub struct RuleEngine {
    thresholds: Thresholds,
}

impl RuleEngine {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    /// Evaluate every policy against `reading`.
    ///
    /// Always emits one command per actuator — the full desired-state
    /// vector, not a delta — so a dropped or duplicated message
    /// self-heals on the next reading. Deterministic: the only clock is
    /// the passed-in `now`, which callers take from
    /// `reading.received_at` so that cooldown math follows event time
    /// even if the transport reorders.
    ///
    /// Never panics. NaN sensor values fail every comparison and so read
    /// as "condition false".
    pub fn evaluate(
        &self,
        reading: &Reading,
        prior: &DeviceTimerState,
        now: DateTime<Utc>,
    ) -> (Vec<ActuatorCommand>, DeviceTimerState) {
        let t = &self.thresholds;
        let mut next = prior.clone();

        let fan_on = reading.humidity > t.humidity_max
            || reading.environment_temperature > t.environment_temperature_max;
        let valve_on = reading.water_level < t.water_level_min;
        let pump_c_on = reading.electrical_conductivity > t.electrical_conductivity_max;

        // pH dosing: pumps A and B are mutually exclusive, each behind its
        // own independent cooldown. When a pump is cooling down an explicit
        // OFF still goes out so a stale ON never lingers on the hardware.
        let (pump_a_on, pump_b_on) = if reading.ph < t.ph_low {
            match pump_phase(prior.last_pump_a_trigger, now, t.pump_a_cooldown) {
                PumpPhase::Ready => {
                    next.last_pump_a_trigger = Some(now);
                    (true, false)
                }
                PumpPhase::Cooldown => (false, false),
            }
        } else if reading.ph > t.ph_high {
            match pump_phase(prior.last_pump_b_trigger, now, t.pump_b_cooldown) {
                PumpPhase::Ready => {
                    next.last_pump_b_trigger = Some(now);
                    (false, true)
                }
                PumpPhase::Cooldown => (false, false),
            }
        } else {
            (false, false)
        };

        let command = |actuator, on| ActuatorCommand {
            serial_number: reading.serial_number.clone(),
            actuator,
            on,
        };

        let commands = vec![
            command(Actuator::Fan, fan_on),
            command(Actuator::Valve, valve_on),
            command(Actuator::PumpC, pump_c_on),
            command(Actuator::PumpA, pump_a_on),
            command(Actuator::PumpB, pump_b_on),
            // Circulation and aeration run whenever the farm is in
            // automatic mode; re-sent every cycle for convergence.
            command(Actuator::AirPump, true),
            command(Actuator::Light, true),
        ];

        (commands, next)
    }
}
