//! Averaged model of the rover's buck stage and the peripherals that observe it.
//!
//! The PWM write is the clock: every compare value handed to `SimPwm` holds for
//! one sample period, during which the LC filter is integrated in small steps.

use core::cell::RefCell;
use std::convert::Infallible;

use embedded_hal::i2c::{self, ErrorKind, NoAcknowledgeSource, Operation};
use embedded_hal::pwm::{ErrorType as PwmErrorType, SetDutyCycle};
use smps_core::utils::controllers::i2c::INA219_ADDRESS;
use smps_core::utils::controllers::VoltageAdc;

const SUBSTEPS: u32 = 400;

/// Second-order buck converter with a resistive load.
#[derive(Debug, Clone, Copy)]
pub struct BuckPlant {
    pub vin: f32,
    pub inductance: f32,
    pub capacitance: f32,
    pub load_ohms: f32,
    /// Inductor winding resistance (Ω).
    pub winding_ohms: f32,
    pub vout: f32,
    pub il: f32,
    /// Duty seen by the switch after the driver's inversion.
    pub duty: f32,
}

impl BuckPlant {
    pub fn new(
        vin: f32,
        load_ohms: f32,
    ) -> Self {
        BuckPlant {
            vin,
            inductance: 1.0e-3,
            capacitance: 4.7e-3,
            load_ohms,
            winding_ohms: 0.5,
            vout: 0.0,
            il: 0.0,
            duty: 0.0,
        }
    }

    /// Hold `duty` for `period` seconds.
    pub fn advance(
        &mut self,
        duty: f32,
        period: f32,
    ) {
        self.duty = duty;
        let dt = period / SUBSTEPS as f32;
        for _ in 0..SUBSTEPS {
            let di = (duty * self.vin - self.vout - self.il * self.winding_ohms) / self.inductance;
            // freewheeling diode: no reverse inductor current
            self.il = (self.il + di * dt).max(0.0);
            let dv = (self.il - self.vout / self.load_ohms) / self.capacitance;
            self.vout += dv * dt;
        }
    }
}

/// 10-bit ADC on the output divider, 4.096 V external reference.
pub struct SimAdc {
    plant: &'static RefCell<BuckPlant>,
    external: bool,
}

impl SimAdc {
    pub fn new(plant: &'static RefCell<BuckPlant>) -> Self {
        SimAdc {
            plant,
            external: false,
        }
    }
}

impl VoltageAdc for SimAdc {
    type Error = &'static str;

    fn use_external_reference(&mut self) -> Result<(), Self::Error> {
        self.external = true;
        Ok(())
    }

    fn read_code(&mut self) -> Result<u16, Self::Error> {
        if !self.external {
            return Err("ADC reference not selected");
        }
        let code = self.plant.borrow().vout / (4.096 / 1023.0);
        Ok(code.round().clamp(0.0, 1023.0) as u16)
    }
}

/// Register-level INA219 answering on the simulated I2C bus.
///
/// Converts continuously: the bus register always reports a finished
/// conversion of the plant's present state.
pub struct SimIna219 {
    plant: &'static RefCell<BuckPlant>,
    pointer: u8,
    config: u16,
    calibration: u16,
}

impl SimIna219 {
    const CONFIG_DEFAULT: u16 = 0x399F;

    pub fn new(plant: &'static RefCell<BuckPlant>) -> Self {
        SimIna219 {
            plant,
            pointer: 0,
            config: Self::CONFIG_DEFAULT,
            calibration: 0,
        }
    }

    fn current_lsb(&self) -> i32 {
        // 0.1 mA per LSB at calibration 4096
        let ma = self.plant.borrow().il * 1000.0;
        (ma * 10.0 * self.calibration as f32 / 4096.0) as i32
    }

    fn bus_lsb(&self) -> u16 {
        (self.plant.borrow().vout / 0.004).clamp(0.0, 8000.0) as u16
    }

    fn register(
        &self,
        reg: u8,
    ) -> u16 {
        match reg {
            0x00 => self.config,
            // 10 µV per LSB across 0.1 Ω
            0x01 => ((self.plant.borrow().il * 1.0e4).clamp(-32000.0, 32000.0) as i16) as u16,
            // conversion ready, no overflow
            0x02 => (self.bus_lsb() << 3) | 0b10,
            0x03 => (self.current_lsb().unsigned_abs() * self.bus_lsb() as u32 / 5000) as u16,
            0x04 => self.current_lsb().clamp(i16::MIN as i32, i16::MAX as i32) as i16 as u16,
            0x05 => self.calibration,
            _ => 0,
        }
    }

    fn store(
        &mut self,
        reg: u8,
        value: u16,
    ) -> Result<(), ErrorKind> {
        match reg {
            0x00 if value & 0x8000 != 0 => {
                self.config = Self::CONFIG_DEFAULT;
                self.calibration = 0;
            }
            0x00 => self.config = value,
            0x05 => self.calibration = value,
            _ => return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data)),
        }
        Ok(())
    }
}

impl i2c::ErrorType for SimIna219 {
    type Error = ErrorKind;
}

impl i2c::I2c for SimIna219 {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        if address != INA219_ADDRESS {
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        }
        for op in operations {
            match op {
                Operation::Write(bytes) => match **bytes {
                    [reg] => self.pointer = reg,
                    [reg, hi, lo] => {
                        self.pointer = reg;
                        self.store(reg, u16::from_be_bytes([hi, lo]))?;
                    }
                    _ => return Err(ErrorKind::Other),
                },
                Operation::Read(buf) => {
                    let value = self.register(self.pointer).to_be_bytes();
                    for (dst, src) in buf.iter_mut().zip(value) {
                        *dst = src;
                    }
                }
            }
        }
        Ok(())
    }
}

/// 8-bit PWM timer; each write advances the plant by one sample period.
pub struct SimPwm {
    plant: &'static RefCell<BuckPlant>,
    period: f32,
}

impl SimPwm {
    pub fn new(
        plant: &'static RefCell<BuckPlant>,
        period: f32,
    ) -> Self {
        SimPwm { plant, period }
    }
}

impl PwmErrorType for SimPwm {
    type Error = Infallible;
}

impl SetDutyCycle for SimPwm {
    fn max_duty_cycle(&self) -> u16 {
        255
    }

    fn set_duty_cycle(
        &mut self,
        duty: u16,
    ) -> Result<(), Self::Error> {
        // gate driver inverts the timer output
        let duty = 1.0 - duty as f32 / 255.0;
        self.plant.borrow_mut().advance(duty, self.period);
        Ok(())
    }
}
