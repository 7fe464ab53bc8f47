//! A byte level model of an INA226 power monitor on a simulated register bus
use std::sync::{Arc, Mutex};

use hanbus_node::{
    i2c::{I2cEngine, I2cSignals},
    monitor::{registers, DEFAULT_ADDRESS},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BusState {
    /// No transaction, or the target was not addressed
    Idle,
    /// A start condition was seen; the next byte is the device address
    Address,
    /// The next written byte is the register pointer
    Pointer,
    WriteHigh,
    WriteLow,
    /// Register bytes are being clocked out
    Reading,
}

/// Physical inputs and register contents of the simulated monitor
#[derive(Debug)]
pub struct MonitorState {
    /// Whether the device answers its address
    pub present: bool,
    /// Bus voltage register, 1.25 mV per bit
    pub bus_voltage: u16,
    /// Shunt voltage register, 2.5 uV per bit
    pub shunt_voltage: u16,
    pub config: u16,
    pub calibration: u16,
    /// Every completed register write, in order
    pub writes: Vec<(u8, u16)>,
    state: BusState,
    pointer: u8,
    high: u8,
    read_index: u8,
    rx_byte: u8,
    nack: bool,
    /// An operation was started and its completion not yet reported
    pending: bool,
}

impl Default for MonitorState {
    fn default() -> Self {
        Self {
            present: true,
            bus_voltage: 0,
            shunt_voltage: 0,
            // Power-on defaults
            config: 0x4127,
            calibration: 0,
            writes: Vec::new(),
            state: BusState::Idle,
            pointer: 0,
            high: 0,
            read_index: 0,
            rx_byte: 0,
            nack: false,
            pending: false,
        }
    }
}

impl MonitorState {
    /// Current register, as the device computes it from the shunt voltage
    pub fn current(&self) -> u16 {
        (self.shunt_voltage as u32 * self.calibration as u32 / 2048) as u16
    }

    /// Power register, as the device computes it from current and bus voltage
    pub fn power(&self) -> u16 {
        (self.current() as u32 * self.bus_voltage as u32 / 20000) as u16
    }

    fn register(&self, pointer: u8) -> u16 {
        match pointer {
            registers::CONFIG => self.config,
            registers::SHUNT_VOLTAGE => self.shunt_voltage,
            registers::BUS_VOLTAGE => self.bus_voltage,
            registers::POWER => self.power(),
            registers::CURRENT => self.current(),
            registers::CALIBRATION => self.calibration,
            _ => 0,
        }
    }

    fn store(&mut self, pointer: u8, value: u16) {
        match pointer {
            registers::CONFIG => self.config = value,
            registers::CALIBRATION => self.calibration = value,
            // Measurement registers are read only
            _ => (),
        }
        self.writes.push((pointer, value));
    }

    fn begin_op(&mut self) {
        assert!(!self.pending, "bus operation started before the last one completed");
        self.pending = true;
    }
}

/// A handle to the simulated monitor, implementing the peripheral signals
///
/// Clones share the same device.
#[derive(Clone, Debug, Default)]
pub struct SimMonitor(Arc<Mutex<MonitorState>>);

impl SimMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, MonitorState> {
        self.0.lock().unwrap()
    }

    /// Report completion of the outstanding operation to the engine, as the bus interrupt would
    pub fn pump(&mut self, engine: &I2cEngine) {
        let pending = std::mem::replace(&mut self.state().pending, false);
        if pending {
            engine.on_event(self);
        }
    }
}

impl I2cSignals for SimMonitor {
    fn start(&mut self) {
        let mut s = self.state();
        s.begin_op();
        s.state = BusState::Address;
    }

    fn restart(&mut self) {
        self.start();
    }

    fn stop(&mut self) {
        let mut s = self.state();
        s.begin_op();
        s.state = BusState::Idle;
    }

    fn write_byte(&mut self, byte: u8) {
        let mut s = self.state();
        s.begin_op();
        s.nack = false;
        match s.state {
            BusState::Address => {
                if !s.present || byte & !1 != DEFAULT_ADDRESS {
                    s.nack = true;
                    s.state = BusState::Idle;
                } else if byte & 1 != 0 {
                    s.read_index = 0;
                    s.state = BusState::Reading;
                } else {
                    s.state = BusState::Pointer;
                }
            }
            BusState::Pointer => {
                s.pointer = byte;
                s.state = BusState::WriteHigh;
            }
            BusState::WriteHigh => {
                s.high = byte;
                s.state = BusState::WriteLow;
            }
            BusState::WriteLow => {
                let value = u16::from_be_bytes([s.high, byte]);
                let pointer = s.pointer;
                s.store(pointer, value);
                s.state = BusState::Idle;
            }
            BusState::Idle | BusState::Reading => s.nack = true,
        }
    }

    fn enable_receive(&mut self) {
        let mut s = self.state();
        s.begin_op();
        let value = s.register(s.pointer).to_be_bytes();
        s.rx_byte = value.get(s.read_index as usize).copied().unwrap_or(0xFF);
    }

    fn read_byte(&mut self) -> u8 {
        self.state().rx_byte
    }

    fn acknowledge(&mut self, ack: bool) {
        let mut s = self.state();
        s.begin_op();
        if ack {
            s.read_index += 1;
        } else {
            s.state = BusState::Idle;
        }
    }

    fn nack_received(&mut self) -> bool {
        self.state().nack
    }
}
