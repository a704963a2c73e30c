//! Plant sampling for the SMPS control loop.
//!
//! `Sensor` is the capability the loop consumes. `PlantSensor` implements it on
//! top of the converter's ADC channel and the INA219 current-sense chip, and
//! `Sampler` turns a fallible `Sensor` into one infallible `Measurement` per cycle.

use crate::utils::controllers::i2c::{DeviceError, Ina219};
use embedded_hal::i2c::I2c;

/// Immutable snapshot of the plant taken once per cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Measurement {
    /// Converter output voltage (V).
    pub output_voltage: f32,
    /// Inductor current (A).
    pub inductor_current: f32,
}

/// Source of plant readings in physical units.
pub trait Sensor {
    type Error: core::fmt::Debug;

    /// Output voltage in volts.
    fn read_voltage(&mut self) -> Result<f32, Self::Error>;
    /// Inductor current in amps.
    fn read_current(&mut self) -> Result<f32, Self::Error>;
}

/// Single-channel ADC wired to the output voltage divider.
pub trait VoltageAdc {
    type Error: core::fmt::Debug;

    /// Select the external reference the conversion scale is calibrated against.
    fn use_external_reference(&mut self) -> Result<(), Self::Error>;
    /// One blocking conversion, returned as a raw code.
    fn read_code(&mut self) -> Result<u16, Self::Error>;
}

/// Convert a raw ADC code to volts.
#[inline]
pub fn code_to_volts(
    code: u16,
    adc_scale: f32,
) -> f32 {
    code as f32 * adc_scale
}

/// Convert a current-sense reading in mA to amps.
#[inline]
pub fn milliamps_to_amps(
    milliamps: f32,
    current_scale: f32,
) -> f32 {
    milliamps * current_scale
}

/// Errors from either half of the sensing chain.
#[derive(Debug)]
pub enum SenseError<AE: core::fmt::Debug, IE: core::fmt::Debug> {
    Adc(AE),
    CurrentSense(DeviceError<IE>),
}

/// Output voltage from an ADC channel plus inductor current from an INA219.
pub struct PlantSensor<'a, ADC, I2C: 'static> {
    adc: ADC,
    ina: Ina219<'a, I2C>,
    adc_scale: f32,
    current_scale: f32,
}

impl<'a, ADC, I2C, E> PlantSensor<'a, ADC, I2C>
where
    ADC: VoltageAdc,
    I2C: I2c<Error = E> + 'static,
    E: core::fmt::Debug,
{
    /// Wrap already configured devices with the given conversion scales.
    pub fn new(
        adc: ADC,
        ina: Ina219<'a, I2C>,
        adc_scale: f32,
        current_scale: f32,
    ) -> Self {
        Self {
            adc,
            ina,
            adc_scale,
            current_scale,
        }
    }
}

impl<'a, ADC, I2C, E> Sensor for PlantSensor<'a, ADC, I2C>
where
    ADC: VoltageAdc,
    I2C: I2c<Error = E> + 'static,
    E: core::fmt::Debug,
{
    type Error = SenseError<ADC::Error, E>;

    fn read_voltage(&mut self) -> Result<f32, Self::Error> {
        let code = self.adc.read_code().map_err(SenseError::Adc)?;
        Ok(code_to_volts(code, self.adc_scale))
    }

    fn read_current(&mut self) -> Result<f32, Self::Error> {
        let ma = self.ina.current_ma().map_err(SenseError::CurrentSense)?;
        Ok(milliamps_to_amps(ma, self.current_scale))
    }
}

/// Produces one `Measurement` per cycle, never failing.
///
/// A failed or non-finite read falls back to the last good value of that
/// quantity and counts the sample as stale.
pub struct Sampler<S> {
    sensor: S,
    last: Measurement,
    stale_cycles: u32,
    stale_total: u32,
}

impl<S: Sensor> Sampler<S> {
    pub fn new(sensor: S) -> Self {
        Self {
            sensor,
            last: Measurement::default(),
            stale_cycles: 0,
            stale_total: 0,
        }
    }

    /// Read both channels once.
    pub fn sample(&mut self) -> Measurement {
        let mut stale = false;

        let output_voltage = match self.sensor.read_voltage() {
            Ok(v) if v.is_finite() => v,
            Ok(v) => {
                tracing::warn!(v, "non-finite output voltage, reusing last sample");
                stale = true;
                self.last.output_voltage
            }
            Err(error) => {
                tracing::warn!(?error, "voltage read failed, reusing last sample");
                stale = true;
                self.last.output_voltage
            }
        };

        let inductor_current = match self.sensor.read_current() {
            Ok(i) if i.is_finite() => i,
            Ok(i) => {
                tracing::warn!(i, "non-finite inductor current, reusing last sample");
                stale = true;
                self.last.inductor_current
            }
            Err(error) => {
                tracing::warn!(?error, "current read failed, reusing last sample");
                stale = true;
                self.last.inductor_current
            }
        };

        if stale {
            self.stale_cycles = self.stale_cycles.saturating_add(1);
            self.stale_total = self.stale_total.saturating_add(1);
        } else {
            self.stale_cycles = 0;
        }

        self.last = Measurement {
            output_voltage,
            inductor_current,
        };
        self.last
    }

    /// Consecutive cycles that reused at least one old value.
    pub fn stale_cycles(&self) -> u32 {
        self.stale_cycles
    }

    /// Stale cycles since construction.
    pub fn stale_total(&self) -> u32 {
        self.stale_total
    }

    pub fn last(&self) -> Measurement {
        self.last
    }

    pub fn sensor_mut(&mut self) -> &mut S {
        &mut self.sensor
    }

    pub fn forget(&mut self) {
        self.last = Measurement::default();
        self.stale_cycles = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::config::{ADC_SCALE, CURRENT_SCALE};

    /// Replays fixed readings; `None` simulates a bus failure.
    struct Scripted {
        volts: [Option<f32>; 4],
        amps: [Option<f32>; 4],
        n: usize,
        m: usize,
    }

    impl Sensor for Scripted {
        type Error = ();

        fn read_voltage(&mut self) -> Result<f32, ()> {
            let r = self.volts[self.n].ok_or(());
            self.n += 1;
            r
        }

        fn read_current(&mut self) -> Result<f32, ()> {
            let r = self.amps[self.m].ok_or(());
            self.m += 1;
            r
        }
    }

    #[test]
    fn test_conversions() {
        assert_eq!(code_to_volts(0, ADC_SCALE), 0.0);
        assert_eq!(code_to_volts(1023, ADC_SCALE), 1023.0 * (4.096 / 1023.0));
        let amps = milliamps_to_amps(1500.0, CURRENT_SCALE);
        assert!(amps > 1.4999 && amps < 1.5001);
    }

    #[test]
    fn test_failed_read_reuses_last_value() {
        let mut s = Sampler::new(Scripted {
            volts: [Some(3.0), None, Some(f32::NAN), Some(3.2)],
            amps: [Some(0.5), Some(0.6), None, Some(0.7)],
            n: 0,
            m: 0,
        });

        let m = s.sample();
        assert_eq!(m.output_voltage, 3.0);
        assert_eq!(s.stale_cycles(), 0);

        let m = s.sample();
        assert_eq!(m.output_voltage, 3.0);
        assert_eq!(m.inductor_current, 0.6);
        assert_eq!(s.stale_cycles(), 1);

        let m = s.sample();
        assert_eq!(m.output_voltage, 3.0);
        assert_eq!(m.inductor_current, 0.6);
        assert_eq!(s.stale_cycles(), 2);

        let m = s.sample();
        assert_eq!(
            m,
            Measurement {
                output_voltage: 3.2,
                inductor_current: 0.7
            }
        );
        assert_eq!(s.stale_cycles(), 0);
        assert_eq!(s.stale_total(), 2);
    }

    #[test]
    fn test_failure_before_first_read_yields_zero() {
        let mut s = Sampler::new(Scripted {
            volts: [None; 4],
            amps: [None; 4],
            n: 0,
            m: 0,
        });
        assert_eq!(s.sample(), Measurement::default());
        assert_eq!(s.stale_cycles(), 1);
    }
}
