//! Register-level stand-ins for the bus devices.
#![allow(dead_code)]

use embedded_hal::i2c::{self, ErrorKind, NoAcknowledgeSource, Operation};
use smps_core::utils::controllers::i2c::INA219_ADDRESS;

const CONFIG: u8 = 0x00;
const SHUNT: u8 = 0x01;
const BUS: u8 = 0x02;
const POWER: u8 = 0x03;
const CURRENT: u8 = 0x04;
const CALIBRATION: u8 = 0x05;

/// Power-on value of the configuration register.
pub const CONFIG_DEFAULT: u16 = 0x399F;

/// INA219 behind a 0.1 Ω shunt.
///
/// Registers follow the datasheet: a configuration write with bit 15 set
/// resets the chip, the current and power registers read zero until a
/// calibration is written, and the conversion-ready bit in the bus register
/// stays set until the power register is read.
pub struct FakeIna219 {
    pointer: u8,
    registers: [u16; 6],
    current_ma: f32,
    bus_volts: f32,
    ready: bool,
    /// Every transaction fails with `ErrorKind::Other` while set.
    pub fail: bool,
    /// Number of bus transactions addressed to the chip.
    pub transactions: usize,
}

impl FakeIna219 {
    pub fn new() -> Self {
        FakeIna219 {
            pointer: 0,
            registers: [CONFIG_DEFAULT, 0, 0, 0, 0, 0],
            current_ma: 0.0,
            bus_volts: 0.0,
            ready: true,
            fail: false,
            transactions: 0,
        }
    }

    /// Finish a conversion of `current_ma` through the shunt.
    pub fn convert(
        &mut self,
        current_ma: f32,
        bus_volts: f32,
    ) {
        self.current_ma = current_ma;
        self.bus_volts = bus_volts;
        self.ready = true;
    }

    /// Drop the pending conversion, as reading the power register does.
    pub fn consume(&mut self) {
        self.ready = false;
    }

    pub fn config(&self) -> u16 {
        self.registers[CONFIG as usize]
    }

    pub fn calibration(&self) -> u16 {
        self.registers[CALIBRATION as usize]
    }

    fn current_lsb(&self) -> i16 {
        // 0.1 mA per LSB with calibration 4096
        let scaled = self.current_ma * 10.0 * self.calibration() as f32 / 4096.0;
        scaled as i16
    }

    fn bus_register(&self) -> u16 {
        let mv4 = (self.bus_volts / 0.004) as u16 & 0x1FFF;
        (mv4 << 3) | if self.ready { 0b10 } else { 0 }
    }

    fn register(
        &mut self,
        reg: u8,
    ) -> u16 {
        match reg {
            // 10 µV per LSB across 0.1 Ω
            SHUNT => ((self.current_ma * 10.0) as i16) as u16,
            BUS => self.bus_register(),
            POWER => {
                self.ready = false;
                let bus = (self.bus_register() >> 3) as i32;
                ((self.current_lsb() as i32).unsigned_abs() * bus as u32 / 5000) as u16
            }
            CURRENT => self.current_lsb() as u16,
            r => self.registers.get(r as usize).copied().unwrap_or(0),
        }
    }

    fn write_register(
        &mut self,
        reg: u8,
        value: u16,
    ) -> Result<(), ErrorKind> {
        match reg {
            CONFIG if value & 0x8000 != 0 => {
                self.registers = [CONFIG_DEFAULT, 0, 0, 0, 0, 0];
            }
            CONFIG | CALIBRATION => self.registers[reg as usize] = value,
            _ => return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data)),
        }
        Ok(())
    }
}

impl i2c::ErrorType for FakeIna219 {
    type Error = ErrorKind;
}

impl i2c::I2c for FakeIna219 {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        if address != INA219_ADDRESS {
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        }
        self.transactions += 1;
        if self.fail {
            return Err(ErrorKind::Other);
        }
        for op in operations {
            match op {
                Operation::Write(bytes) => match **bytes {
                    [reg] => self.pointer = reg,
                    [reg, hi, lo] => {
                        self.pointer = reg;
                        self.write_register(reg, u16::from_be_bytes([hi, lo]))?;
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
