//! INA219 current-sense chip on the shared I2C bus.
//!
//! The chip measures the drop across the converter's 0.1 Ω shunt. The `ina219`
//! driver is calibrated once in `init`; after that the chip converts
//! continuously and each cycle picks up the newest conversion.

use core::cell::RefCell;

use embedded_hal::i2c::I2c;
use embedded_hal_bus::i2c::RefCellDevice;
use ina219::{
    address::Address,
    calibration::{IntCalibration, MicroAmpere},
    errors::MeasurementError,
    SyncIna219,
};

/// Default I2C address (A0 = A1 = GND).
pub const INA219_ADDRESS: u8 = 0x40;

/// Shunt resistor on the converter's inductor path (µΩ).
pub const SHUNT_MICRO_OHMS: u32 = 100_000;
/// Current register resolution (µA per LSB), 0.1 mA.
pub const CURRENT_LSB_UA: i64 = 100;

/// Errors that can occur when talking to the current-sense chip.
#[derive(Debug)]
pub enum DeviceError<E: core::fmt::Debug> {
    /// Driver bring-up failed (bus error or chip not in its reset state).
    Init,
    Measurement(MeasurementError<E>),
    InvalidAddress(u8),
    InvalidCalibration,
    NotInitialized,
}

/// INA219 driver over a `RefCell`-shared bus.
pub struct Ina219<'a, I2C: 'static> {
    i2c: &'a RefCell<I2C>,
    address: u8,
    device: Option<SyncIna219<RefCellDevice<'a, I2C>, IntCalibration>>,
    last_ma: f32,
}

impl<'a, I2C, E> Ina219<'a, I2C>
where
    I2C: I2c<Error = E> + 'static,
    E: core::fmt::Debug,
{
    /// Attach to the chip at `address` on the shared bus. Nothing is written yet.
    pub fn new(
        i2c_bus: &'a RefCell<I2C>,
        address: u8,
    ) -> Self {
        Ina219 {
            i2c: i2c_bus,
            address,
            device: None,
            last_ma: 0.0,
        }
    }

    /// Reset and calibrate the chip for the 0.1 Ω shunt.
    pub fn init(&mut self) -> Result<(), DeviceError<E>> {
        let address =
            Address::from_byte(self.address).map_err(|_| DeviceError::InvalidAddress(self.address))?;
        let calibration = IntCalibration::new(MicroAmpere(CURRENT_LSB_UA), SHUNT_MICRO_OHMS)
            .ok_or(DeviceError::InvalidCalibration)?;

        let device = SyncIna219::new_calibrated(RefCellDevice::new(self.i2c), address, calibration)
            .map_err(|error| {
                tracing::error!(?error, "INA219 bring-up failed");
                DeviceError::Init
            })?;

        self.device = Some(device);
        tracing::info!(address = self.address, "INA219 configured");
        Ok(())
    }

    /// Newest inductor current in mA.
    ///
    /// Between conversions the previous result is still the newest one and is
    /// returned again.
    pub fn current_ma(&mut self) -> Result<f32, DeviceError<E>> {
        let ina = self.device.as_mut().ok_or(DeviceError::NotInitialized)?;
        if let Some(measurement) = ina.next_measurement().map_err(DeviceError::Measurement)? {
            self.last_ma = measurement.current.0 as f32 / 1000.0;
        }
        Ok(self.last_ma)
    }

    pub fn address(&self) -> u8 {
        self.address
    }
}
