//! Module Exports
//!
//! This file wires the cascaded regulator together.
//!
//! - `sampler`: plant readings (output voltage, inductor current).
//! - `i2c`: INA219 current-sense chip on the shared I2C bus.
//! - `pwm`: inverted-polarity duty-cycle modulation.
//! - `peripherals`: one-time, all-or-nothing bring-up.

/// Module for the INA219 current-sense chip.
pub mod i2c;
pub mod peripherals;
pub mod pwm;
pub mod sampler;

use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Duration, Ticker};
use serde::{Deserialize, Serialize};

use crate::utils::{
    config::{ConfigError, SmpsConfig},
    math::{limiter::clamp, pid::PidController},
};
pub use peripherals::{init_peripherals, InitError, Peripherals};
pub use pwm::{Actuator, DutyCycleModulator};
pub use sampler::{Measurement, Sampler, Sensor, VoltageAdc};

/// Channel used to receive setpoint commands (`SmpsCommand` messages).
pub static SMPS_CHANNEL: embassy_sync::channel::Channel<CriticalSectionRawMutex, SmpsCommand, 16> =
    embassy_sync::channel::Channel::new();

/// Setpoint command variants.
///
/// Serialized as JSON with tag `"sc"`, e.g. `{"sc":"v","v":3.3}`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(tag = "sc", rename_all = "snake_case")]
pub enum SmpsCommand {
    /// Regulate to `v` volts.
    V { v: f32 },
    /// Move the reference by `dv` volts.
    Trim { dv: f32 },
}

impl SmpsCommand {
    pub fn from_json(frame: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(frame)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetpointError {
    /// NaN or infinite reference voltages are never stored.
    NotFinite,
}

/// Reference voltage shared between a single writer and the control loop.
///
/// Lock-free: the loop reads a snapshot at the start of each cycle, so a new
/// value takes effect at most one cycle late.
pub struct Setpoint {
    bits: AtomicU32,
}

impl Setpoint {
    pub const fn new(vref: f32) -> Self {
        Setpoint {
            bits: AtomicU32::new(vref.to_bits()),
        }
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn set(
        &self,
        vref: f32,
    ) -> Result<(), SetpointError> {
        if !vref.is_finite() {
            return Err(SetpointError::NotFinite);
        }
        self.bits.store(vref.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    /// Apply a command, returning the new reference.
    pub fn apply(
        &self,
        cmd: SmpsCommand,
    ) -> Result<f32, SetpointError> {
        let vref = match cmd {
            SmpsCommand::V { v } => v,
            SmpsCommand::Trim { dv } => self.get() + dv,
        };
        self.set(vref)?;
        Ok(vref)
    }
}

/// Drain `SMPS_CHANNEL` into `setpoint` forever.
pub async fn setpoint_ch(setpoint: &Setpoint) -> ! {
    loop {
        let cmd = SMPS_CHANNEL.receiver().receive().await;
        match setpoint.apply(cmd) {
            Ok(vref) => tracing::info!(vref, "setpoint updated"),
            Err(e) => tracing::warn!(?cmd, ?e, "setpoint command rejected"),
        }
    }
}

/// Everything one control cycle computed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleReport {
    pub measurement: Measurement,
    pub voltage_error: f32,
    /// Current demand after the current-limit clamp (A).
    pub current_demand: f32,
    pub current_error: f32,
    /// Duty handed to the actuator, inside the safety band.
    pub duty: f32,
    /// Whether the actuator accepted the duty.
    pub applied: bool,
}

/// Cascaded voltage/current regulator.
///
/// Owns both PID stages, the sampler and the actuator; nothing here is shared
/// with other tasks except the setpoint passed into `step`/`run`.
pub struct SmpsController<S, A> {
    sampler: Sampler<S>,
    voltage: PidController,
    current: PidController,
    actuator: A,
    config: SmpsConfig,
    cycles: u32,
    actuator_faults: u32,
}

impl<S, A> SmpsController<S, A>
where
    S: Sensor,
    A: Actuator,
{
    /// Build the loop from already initialized capabilities.
    pub fn new(
        sensor: S,
        actuator: A,
        config: SmpsConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(SmpsController {
            sampler: Sampler::new(sensor),
            voltage: PidController::new(config.voltage, config.ts),
            current: PidController::new(config.current, config.ts),
            actuator,
            config,
            cycles: 0,
            actuator_faults: 0,
        })
    }

    /// Execute one control cycle against reference `vref`.
    ///
    /// Never fails: out-of-range values are clamped and a rejected PWM write
    /// is logged and counted.
    pub fn step(
        &mut self,
        vref: f32,
    ) -> CycleReport {
        let measurement = self.sampler.sample();

        let voltage_error = vref - measurement.output_voltage;
        let current_demand = self.voltage.step(voltage_error);
        let current_demand = clamp(current_demand, self.config.current_limit, 0.0);

        let current_error = current_demand - measurement.inductor_current;
        let duty = self.current.step(current_error);
        let duty = clamp(duty, self.config.duty_max, self.config.duty_min);

        let applied = match self.actuator.set_duty_cycle(duty) {
            Ok(()) => true,
            Err(error) => {
                self.actuator_faults = self.actuator_faults.saturating_add(1);
                tracing::error!(?error, duty, "PWM write failed");
                false
            }
        };
        self.cycles = self.cycles.wrapping_add(1);

        CycleReport {
            measurement,
            voltage_error,
            current_demand,
            current_error,
            duty,
            applied,
        }
    }

    /// Run the loop at the configured sample period, forever.
    pub async fn run(
        &mut self,
        setpoint: &Setpoint,
    ) -> ! {
        let period = Duration::from_micros((self.config.ts * 1_000_000.0 + 0.5) as u64);
        let mut ticker = Ticker::every(period);
        tracing::info!(ts = self.config.ts, vref = setpoint.get(), "SMPS control loop started");

        loop {
            let report = self.step(setpoint.get());
            tracing::trace!(?report, "cycle");
            ticker.next().await;
        }
    }

    /// Zero both stages' history and forget the last measurement.
    pub fn reset(&mut self) {
        self.voltage.reset();
        self.current.reset();
        self.sampler.forget();
        tracing::info!("SMPS controller reset");
    }

    pub fn voltage_stage(&self) -> &PidController {
        &self.voltage
    }

    pub fn current_stage(&self) -> &PidController {
        &self.current
    }

    pub fn sampler(&self) -> &Sampler<S> {
        &self.sampler
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub fn config(&self) -> &SmpsConfig {
        &self.config
    }

    /// Cycles executed since construction (wraps).
    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    pub fn actuator_faults(&self) -> u32 {
        self.actuator_faults
    }
}
