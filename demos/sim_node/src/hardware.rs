//! Host stand-ins for the node's peripherals
use std::path::PathBuf;

use hanbus_node::{
    commands::OUTPUT_CHANNELS,
    config::Eeprom,
    i2c::{I2cError, RegisterBus},
    monitor::{registers, DEFAULT_ADDRESS},
    Board,
};

const EEPROM_SIZE: usize = 256;

/// A persistent store kept in a file, written through on every change
#[derive(Debug)]
pub struct FileEeprom {
    path: PathBuf,
    data: [u8; EEPROM_SIZE],
}

impl FileEeprom {
    /// Open the store, starting erased if the file does not exist yet
    pub fn open(path: PathBuf) -> Self {
        let mut data = [0xFF; EEPROM_SIZE];
        match std::fs::read(&path) {
            Ok(contents) => {
                let n = contents.len().min(EEPROM_SIZE);
                data[..n].copy_from_slice(&contents[..n]);
            }
            Err(e) => log::info!("Starting with an erased store ({}: {e})", path.display()),
        }
        Self { path, data }
    }
}

impl Eeprom for FileEeprom {
    fn read(&mut self, offset: u8) -> u8 {
        self.data[offset as usize]
    }

    fn write(&mut self, offset: u8, value: u8) {
        self.data[offset as usize] = value;
        if let Err(e) = std::fs::write(&self.path, self.data) {
            log::error!("Error storing to {}: {:?}", self.path.display(), e);
        }
    }
}

/// A register level model of the power monitor, measuring fixed inputs
#[derive(Debug)]
pub struct ModelMonitor {
    bus_voltage: u16,
    shunt_voltage: u16,
    config: u16,
    calibration: u16,
}

impl ModelMonitor {
    pub fn new(bus_voltage: u16, shunt_voltage: u16) -> Self {
        Self {
            bus_voltage,
            shunt_voltage,
            config: 0,
            calibration: 0,
        }
    }

    fn current(&self) -> u16 {
        (self.shunt_voltage as u32 * self.calibration as u32 / 2048) as u16
    }

    fn power(&self) -> u16 {
        (self.current() as u32 * self.bus_voltage as u32 / 20000) as u16
    }
}

impl RegisterBus for ModelMonitor {
    fn read_register(&mut self, device: u8, register: u8) -> Result<u16, I2cError> {
        if device != DEFAULT_ADDRESS {
            return Err(I2cError::Nack);
        }
        Ok(match register {
            registers::CONFIG => self.config,
            registers::SHUNT_VOLTAGE => self.shunt_voltage,
            registers::BUS_VOLTAGE => self.bus_voltage,
            registers::POWER => self.power(),
            registers::CURRENT => self.current(),
            registers::CALIBRATION => self.calibration,
            _ => return Err(I2cError::Nack),
        })
    }

    fn write_register(&mut self, device: u8, register: u8, value: u16) -> Result<(), I2cError> {
        if device != DEFAULT_ADDRESS {
            return Err(I2cError::Nack);
        }
        match register {
            registers::CONFIG => self.config = value,
            registers::CALIBRATION => self.calibration = value,
            _ => return Err(I2cError::Nack),
        }
        log::debug!("Monitor register {register} <- 0x{value:04X}");
        Ok(())
    }
}

/// Board signals, logged instead of driving pins
#[derive(Debug)]
pub struct DemoBoard {
    outputs: [bool; OUTPUT_CHANNELS as usize],
    program_mode: bool,
}

impl DemoBoard {
    pub fn new(program_mode: bool) -> Self {
        Self {
            outputs: [false; OUTPUT_CHANNELS as usize],
            program_mode,
        }
    }
}

impl Board for DemoBoard {
    fn set_line_driver(&mut self, _enabled: bool) {}

    fn transmitter_drained(&mut self) -> bool {
        true
    }

    fn address_program_mode(&mut self) -> bool {
        self.program_mode
    }

    fn set_output(&mut self, channel: u8, on: bool) {
        log::info!("Output {channel} {}", if on { "on" } else { "off" });
        self.outputs[channel as usize] = on;
    }

    fn output(&mut self, channel: u8) -> bool {
        self.outputs[channel as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_monitor_computes_current() {
        let mut monitor = ModelMonitor::new(9600, 10000);
        monitor
            .write_register(DEFAULT_ADDRESS, registers::CALIBRATION, 3355)
            .unwrap();
        let current = monitor
            .read_register(DEFAULT_ADDRESS, registers::CURRENT)
            .unwrap();
        assert_eq!(current, 16381);
        assert_eq!(
            monitor.read_register(0x82, registers::CURRENT),
            Err(I2cError::Nack)
        );
    }

    #[test]
    fn test_file_eeprom_persists() {
        let path = std::env::temp_dir().join(format!("hanbus_eeprom_{}", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let mut eeprom = FileEeprom::open(path.clone());
        assert_eq!(eeprom.read(0x10), 0xFF);
        eeprom.write(0x10, 7);

        let mut reopened = FileEeprom::open(path.clone());
        assert_eq!(reopened.read(0x10), 7);
        std::fs::remove_file(path).unwrap();
    }
}
