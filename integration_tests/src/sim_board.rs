use std::sync::{Arc, Mutex};

use hanbus_node::{config::Eeprom, Board};

/// Observable state of the simulated board signals
#[derive(Debug, Default)]
pub struct BoardState {
    pub outputs: [bool; 2],
    pub line_driver: bool,
    /// Number of times the line driver was switched on
    pub driver_enables: usize,
    /// The address-program jumper is fitted
    pub program_mode: bool,
}

/// Simulated board signals. Clones share the same state.
#[derive(Clone, Debug, Default)]
pub struct SimBoard(Arc<Mutex<BoardState>>);

impl SimBoard {
    pub fn state(&self) -> std::sync::MutexGuard<'_, BoardState> {
        self.0.lock().unwrap()
    }
}

impl Board for SimBoard {
    fn set_line_driver(&mut self, enabled: bool) {
        let mut s = self.state();
        if enabled && !s.line_driver {
            s.driver_enables += 1;
        }
        s.line_driver = enabled;
    }

    fn transmitter_drained(&mut self) -> bool {
        true
    }

    fn address_program_mode(&mut self) -> bool {
        self.state().program_mode
    }

    fn set_output(&mut self, channel: u8, on: bool) {
        self.state().outputs[channel as usize] = on;
    }

    fn output(&mut self, channel: u8) -> bool {
        self.state().outputs[channel as usize]
    }
}

/// An in-memory persistent store. Clones share the same memory.
#[derive(Clone, Debug)]
pub struct MemEeprom(Arc<Mutex<[u8; 256]>>);

impl Default for MemEeprom {
    fn default() -> Self {
        Self::new()
    }
}

impl MemEeprom {
    /// A fully erased store
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new([0xFF; 256])))
    }

    /// An erased store with a node address programmed
    pub fn with_address(address: u8) -> Self {
        let mem = Self::new();
        mem.set(hanbus_common::constants::store::ADDRESS_OFFSET, address);
        mem
    }

    pub fn get(&self, offset: u8) -> u8 {
        self.0.lock().unwrap()[offset as usize]
    }

    pub fn set(&self, offset: u8, value: u8) {
        self.0.lock().unwrap()[offset as usize] = value;
    }

    pub fn snapshot(&self) -> [u8; 256] {
        *self.0.lock().unwrap()
    }
}

impl Eeprom for MemEeprom {
    fn read(&mut self, offset: u8) -> u8 {
        self.get(offset)
    }

    fn write(&mut self, offset: u8, value: u8) {
        self.set(offset, value);
    }
}
