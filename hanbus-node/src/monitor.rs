//! Driver for the INA226-style power monitor
//!
//! The monitor measures the voltage across a current shunt and the bus voltage, and computes
//! current and power from a calibration constant derived from the shunt ratings (see
//! [`Calibration`](crate::config::Calibration)).

use crate::i2c::{I2cError, RegisterBus};

/// Register pointers
pub mod registers {
    /// Configuration
    pub const CONFIG: u8 = 0x00;
    /// Shunt voltage
    pub const SHUNT_VOLTAGE: u8 = 0x01;
    /// Bus voltage
    pub const BUS_VOLTAGE: u8 = 0x02;
    /// Power
    pub const POWER: u8 = 0x03;
    /// Current
    pub const CURRENT: u8 = 0x04;
    /// Calibration
    pub const CALIBRATION: u8 = 0x05;
}

/// Configuration register value written at init: 16 sample averaging, 1.1 ms conversion times,
/// continuous shunt and bus conversion
pub const CONFIG_VALUE: u16 = 0x0927;

/// Bus address of the monitor, in 8-bit write form
pub const DEFAULT_ADDRESS: u8 = 0x80;

/// A power monitor on a register bus
#[derive(Debug)]
pub struct PowerMonitor<B> {
    bus: B,
    address: u8,
}

impl<B: RegisterBus> PowerMonitor<B> {
    /// Create a driver for the monitor at `address`
    pub fn new(bus: B, address: u8) -> Self {
        Self { bus, address }
    }

    /// Borrow the driver with a type-erased bus
    pub fn by_ref(&mut self) -> PowerMonitor<&mut dyn RegisterBus> {
        PowerMonitor {
            bus: &mut self.bus,
            address: self.address,
        }
    }

    /// Configure continuous conversion and load the calibration constant
    pub fn init(&mut self, calibration: u16) -> Result<(), I2cError> {
        self.bus
            .write_register(self.address, registers::CONFIG, CONFIG_VALUE)?;
        self.write_calibration(calibration)
    }

    /// Replace the calibration constant
    pub fn write_calibration(&mut self, calibration: u16) -> Result<(), I2cError> {
        self.bus
            .write_register(self.address, registers::CALIBRATION, calibration)
    }

    /// Raw bus voltage, 1.25 mV per bit
    pub fn read_bus_voltage(&mut self) -> Result<u16, I2cError> {
        self.bus.read_register(self.address, registers::BUS_VOLTAGE)
    }

    /// Raw current, in units of the calibration's current LSB
    pub fn read_current(&mut self) -> Result<u16, I2cError> {
        self.bus.read_register(self.address, registers::CURRENT)
    }

    /// Raw power, in units of the calibration's power LSB
    pub fn read_power(&mut self) -> Result<u16, I2cError> {
        self.bus.read_register(self.address, registers::POWER)
    }
}
