//! Tuning constants and runtime configuration for the SMPS regulator.
//!
//! The constants encode calibrated hardware behaviour of the rover's buck stage
//! and its sensing chain. `SmpsConfig::default()` reproduces them exactly; a JSON
//! override may replace any subset of fields.

use serde::{Deserialize, Deserializer, Serialize};

/* --------------------------- Control Loop Timing -------------------------- */
/// Control loop sample period (s). Both stages integrate and differentiate with it.
pub const SAMPLE_PERIOD_S: f32 = 0.0008;

/* --------------------------- Voltage Stage -------------------------- */
pub const VOLTAGE_KP: f32 = 0.05024;
pub const VOLTAGE_KI: f32 = 15.78;
pub const VOLTAGE_KD: f32 = 0.0;
/// Current demand bounds produced by the voltage stage (A).
pub const VOLTAGE_OUT_MIN: f32 = 0.0;
pub const VOLTAGE_OUT_MAX: f32 = 4.0;

/* --------------------------- Current Stage -------------------------- */
pub const CURRENT_KP: f32 = 0.02512;
pub const CURRENT_KI: f32 = 39.4;
pub const CURRENT_KD: f32 = 0.0;
/// Duty demand bounds produced by the current stage.
pub const CURRENT_OUT_MIN: f32 = 0.0;
pub const CURRENT_OUT_MAX: f32 = 1.0;

/* --------------------------- Safety Envelope -------------------------- */
/// Hard ceiling on the current demand handed from the voltage to the current stage (A).
pub const CURRENT_LIMIT_A: f32 = 3.0;
/// Duty band handed to the modulator; keeps the PWM off its 0% and 100% edges.
pub const DUTY_MIN: f32 = 0.01;
pub const DUTY_MAX: f32 = 0.99;

/* --------------------------- Sensing Chain -------------------------- */
/// External ADC reference over 10-bit resolution (V per code).
pub const ADC_SCALE: f32 = 4.096 / 1023.0;
/// Current-sense output is reported in mA.
pub const CURRENT_SCALE: f32 = 1.0 / 1000.0;

/// Gains and output bounds of one incremental PID stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidConfig {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    pub out_min: f32,
    pub out_max: f32,
}

impl PidConfig {
    /// Outer loop: voltage error (V) to current demand (A).
    pub const VOLTAGE: PidConfig = PidConfig {
        kp: VOLTAGE_KP,
        ki: VOLTAGE_KI,
        kd: VOLTAGE_KD,
        out_min: VOLTAGE_OUT_MIN,
        out_max: VOLTAGE_OUT_MAX,
    };

    /// Inner loop: current error (A) to duty demand.
    pub const CURRENT: PidConfig = PidConfig {
        kp: CURRENT_KP,
        ki: CURRENT_KI,
        kd: CURRENT_KD,
        out_min: CURRENT_OUT_MIN,
        out_max: CURRENT_OUT_MAX,
    };
}

/// Partial `PidConfig` as it may appear in a JSON override.
#[derive(Debug, Deserialize)]
struct PidOverride {
    kp: Option<f32>,
    ki: Option<f32>,
    kd: Option<f32>,
    out_min: Option<f32>,
    out_max: Option<f32>,
}

impl PidOverride {
    fn over(
        self,
        base: PidConfig,
    ) -> PidConfig {
        PidConfig {
            kp: self.kp.unwrap_or(base.kp),
            ki: self.ki.unwrap_or(base.ki),
            kd: self.kd.unwrap_or(base.kd),
            out_min: self.out_min.unwrap_or(base.out_min),
            out_max: self.out_max.unwrap_or(base.out_max),
        }
    }
}

fn voltage_stage<'de, D: Deserializer<'de>>(d: D) -> Result<PidConfig, D::Error> {
    PidOverride::deserialize(d).map(|o| o.over(PidConfig::VOLTAGE))
}

fn current_stage<'de, D: Deserializer<'de>>(d: D) -> Result<PidConfig, D::Error> {
    PidOverride::deserialize(d).map(|o| o.over(PidConfig::CURRENT))
}

/// Reasons a configuration is refused before the loop is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Sample period is zero, negative or not finite.
    SamplePeriod,
    /// Voltage stage has `out_min > out_max` or non-finite gains.
    VoltageStage,
    /// Current stage has `out_min > out_max` or non-finite gains.
    CurrentStage,
    /// Current limit is negative or not finite.
    CurrentLimit,
    /// Duty band is inverted or touches 0 or 1.
    DutyBand,
    /// Parsing the JSON override failed.
    Parse,
}

/// Complete parameter set of the cascaded regulator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmpsConfig {
    /// Sample period Ts (s).
    pub ts: f32,
    #[serde(deserialize_with = "voltage_stage")]
    pub voltage: PidConfig,
    #[serde(deserialize_with = "current_stage")]
    pub current: PidConfig,
    pub current_limit: f32,
    pub duty_min: f32,
    pub duty_max: f32,
    pub adc_scale: f32,
    pub current_scale: f32,
}

impl Default for SmpsConfig {
    fn default() -> Self {
        Self {
            ts: SAMPLE_PERIOD_S,
            voltage: PidConfig::VOLTAGE,
            current: PidConfig::CURRENT,
            current_limit: CURRENT_LIMIT_A,
            duty_min: DUTY_MIN,
            duty_max: DUTY_MAX,
            adc_scale: ADC_SCALE,
            current_scale: CURRENT_SCALE,
        }
    }
}

impl SmpsConfig {
    /// Parse a JSON override; missing fields keep their defaults.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: SmpsConfig = serde_json::from_slice(bytes).map_err(|error| {
            tracing::error!(?error, "invalid SMPS configuration");
            ConfigError::Parse
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Use a different sample period for both stages.
    ///
    /// A target that cannot finish a cycle within 0.8 ms runs slower; the
    /// integral and derivative terms pick the new period up automatically.
    pub fn with_sample_period(
        mut self,
        ts: f32,
    ) -> Self {
        self.ts = ts;
        self
    }

    /// Check the invariants the control loop relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.ts.is_finite() || self.ts <= 0.0 {
            return Err(ConfigError::SamplePeriod);
        }
        if !stage_ok(&self.voltage) {
            return Err(ConfigError::VoltageStage);
        }
        if !stage_ok(&self.current) {
            return Err(ConfigError::CurrentStage);
        }
        if !self.current_limit.is_finite() || self.current_limit < 0.0 {
            return Err(ConfigError::CurrentLimit);
        }
        if !(self.duty_min > 0.0 && self.duty_min <= self.duty_max && self.duty_max < 1.0) {
            return Err(ConfigError::DutyBand);
        }
        Ok(())
    }
}

fn stage_ok(stage: &PidConfig) -> bool {
    stage.kp.is_finite()
        && stage.ki.is_finite()
        && stage.kd.is_finite()
        && stage.out_min.is_finite()
        && stage.out_max.is_finite()
        && stage.out_min <= stage.out_max
}
