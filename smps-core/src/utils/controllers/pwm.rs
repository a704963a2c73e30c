//! Duty-cycle modulation for the converter's switching transistor.
//!
//! The gate driver inverts the timer output, so a duty fraction `d` maps to the
//! compare value `full_scale − d·full_scale`. On an 8-bit timer (`full_scale`
//! = 255) a duty of 1% becomes 252.

use embedded_hal::pwm::SetDutyCycle;

/// Sink for the duty fraction produced by the loop.
pub trait Actuator {
    type Error: core::fmt::Debug;

    /// Apply `duty` in `[0, 1]` to the switching stage.
    fn set_duty_cycle(
        &mut self,
        duty: f32,
    ) -> Result<(), Self::Error>;
}

/// Compare value for `duty` on a timer whose maximum is `full_scale`.
///
/// Inverted polarity; the product is truncated toward zero. `duty` outside
/// `[0, 1]` is limited to the timer range and NaN switches the stage off.
pub fn compare_value(
    duty: f32,
    full_scale: u16,
) -> u16 {
    if duty.is_nan() {
        return full_scale;
    }
    let fs = full_scale as f32;
    let compare = fs - duty * fs;
    // `as` saturates at both ends of u16
    (compare as u16).min(full_scale)
}

/// Drives an `embedded_hal` PWM channel with inverted polarity.
pub struct DutyCycleModulator<P> {
    pwm: P,
    full_scale: u16,
    last_compare: Option<u16>,
}

impl<P: SetDutyCycle> DutyCycleModulator<P> {
    /// Take ownership of a configured PWM channel; queries its resolution once.
    pub fn new(pwm: P) -> Self {
        let full_scale = pwm.max_duty_cycle();
        Self {
            pwm,
            full_scale,
            last_compare: None,
        }
    }

    /// Write a compare value directly.
    pub fn set_compare(
        &mut self,
        compare: u16,
    ) -> Result<(), P::Error> {
        let compare = compare.min(self.full_scale);
        self.pwm.set_duty_cycle(compare)?;
        self.last_compare = Some(compare);
        Ok(())
    }

    pub fn full_scale(&self) -> u16 {
        self.full_scale
    }

    /// Compare value of the last successful write.
    pub fn last_compare(&self) -> Option<u16> {
        self.last_compare
    }

    pub fn release(self) -> P {
        self.pwm
    }
}

impl<P: SetDutyCycle> Actuator for DutyCycleModulator<P> {
    type Error = P::Error;

    fn set_duty_cycle(
        &mut self,
        duty: f32,
    ) -> Result<(), Self::Error> {
        self.set_compare(compare_value(duty, self.full_scale))
    }
}
