//! One-time bring-up of the converter's peripherals.
//!
//! Runs strictly before the first control cycle. Every step must succeed: a
//! loop running against an unreferenced ADC or an unconfigured current sensor
//! would compute duty cycles from garbage, so any failure aborts startup.

use core::cell::RefCell;

use embedded_hal::{i2c::I2c, pwm::SetDutyCycle};

use crate::utils::{
    config::{ConfigError, SmpsConfig},
    controllers::{
        i2c::{DeviceError, Ina219, INA219_ADDRESS},
        pwm::{Actuator, DutyCycleModulator},
        sampler::{PlantSensor, VoltageAdc},
        SmpsController,
    },
};

/// Startup failures. All of them are fatal.
#[derive(Debug)]
pub enum InitError<AE: core::fmt::Debug, IE: core::fmt::Debug, PE: core::fmt::Debug> {
    Config(ConfigError),
    AdcReference(AE),
    Pwm(PE),
    CurrentSense(DeviceError<IE>),
}

/// Configured sensing chain and PWM output, ready to hand to the loop.
pub struct Peripherals<'a, ADC, I2C: 'static, P> {
    pub sensor: PlantSensor<'a, ADC, I2C>,
    pub modulator: DutyCycleModulator<P>,
}

/// Select the ADC reference, park the PWM at minimum duty and bring up the INA219.
pub fn init_peripherals<'a, ADC, I2C, E, P>(
    mut adc: ADC,
    i2c_bus: &'a RefCell<I2C>,
    pwm: P,
    config: &SmpsConfig,
) -> Result<Peripherals<'a, ADC, I2C, P>, InitError<ADC::Error, E, P::Error>>
where
    ADC: VoltageAdc,
    I2C: I2c<Error = E> + 'static,
    E: core::fmt::Debug,
    P: SetDutyCycle,
{
    config.validate().map_err(InitError::Config)?;

    adc.use_external_reference()
        .map_err(InitError::AdcReference)?;
    tracing::info!("ADC switched to external reference");

    let mut modulator = DutyCycleModulator::new(pwm);
    modulator
        .set_duty_cycle(config.duty_min)
        .map_err(InitError::Pwm)?;
    tracing::info!(
        full_scale = modulator.full_scale(),
        "PWM parked at minimum duty"
    );

    let mut ina = Ina219::new(i2c_bus, INA219_ADDRESS);
    ina.init().map_err(InitError::CurrentSense)?;

    Ok(Peripherals {
        sensor: PlantSensor::new(adc, ina, config.adc_scale, config.current_scale),
        modulator,
    })
}

impl<'a, ADC, I2C, E, P> SmpsController<PlantSensor<'a, ADC, I2C>, DutyCycleModulator<P>>
where
    ADC: VoltageAdc,
    I2C: I2c<Error = E> + 'static,
    E: core::fmt::Debug,
    P: SetDutyCycle,
{
    /// Initialize the peripherals and build the loop on top of them.
    pub fn setup(
        adc: ADC,
        i2c_bus: &'a RefCell<I2C>,
        pwm: P,
        config: SmpsConfig,
    ) -> Result<Self, InitError<ADC::Error, E, P::Error>> {
        let Peripherals { sensor, modulator } = init_peripherals(adc, i2c_bus, pwm, &config)?;
        SmpsController::new(sensor, modulator, config).map_err(InitError::Config)
    }
}
