//! Interrupt driven register access on the power monitor bus
//!
//! The monitor uses two-phase register addressing: a write transaction sends the register pointer
//! followed by a 16-bit value, and a read transaction sends the register pointer, then restarts in
//! read mode and clocks in 16 bits, high byte first.
//!
//! [`I2cEngine`] is a phase machine. The application's bus interrupt calls
//! [`I2cEngine::on_event`] each time the peripheral finishes an operation, and the engine issues
//! the next one. [`BlockingI2c`] wraps the engine in a blocking API for the session, spinning on
//! the busy flag while calling an idle hook (typically to feed the watchdog).

use core::cell::RefCell;

use critical_section::Mutex;
use defmt_or_log::warn;

/// Raw primitives of a register bus peripheral
///
/// Every method except [`I2cSignals::read_byte`] and [`I2cSignals::nack_received`] starts a bus
/// operation, whose completion must be reported by calling [`I2cEngine::on_event`].
pub trait I2cSignals {
    /// Generate a start condition
    fn start(&mut self);
    /// Generate a repeated start condition
    fn restart(&mut self);
    /// Generate a stop condition
    fn stop(&mut self);
    /// Clock out one byte
    fn write_byte(&mut self, byte: u8);
    /// Clock in one byte
    fn enable_receive(&mut self);
    /// Read the most recently received byte
    fn read_byte(&mut self) -> u8;
    /// Send an acknowledge (`true`) or not-acknowledge (`false`) for the received byte
    fn acknowledge(&mut self, ack: bool);
    /// Returns true if the target did not acknowledge the last written byte
    fn nack_received(&mut self) -> bool;
}

/// Errors from a register transaction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum I2cError {
    /// A transaction is already in progress
    Busy,
    /// The target did not acknowledge a byte
    Nack,
}

/// Direction of a register transaction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Read a 16-bit register
    Read,
    /// Write a 16-bit register
    Write,
}

/// The step a transaction performs on the next bus event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum I2cPhase {
    /// Start condition completed, send the device address
    SendAddress,
    /// Send the register pointer
    SendRegister,
    /// Restart for a read, or send the high byte for a write
    Branch,
    /// Send the low byte of a write
    WriteLow,
    /// Restart completed, send the device address in read mode
    ReadAddress,
    /// Start receiving the high byte
    ReadStart,
    /// Capture the high byte and acknowledge it
    ReadHigh,
    /// Start receiving the low byte
    ReadHighAck,
    /// Capture the low byte and end the read with a not-acknowledge
    ReadLow,
    /// Generate the stop condition
    Stop,
    /// Stop condition completed, release the bus
    Done,
}

#[derive(Clone, Copy, Debug)]
struct Transaction {
    device: u8,
    register: u8,
    direction: Direction,
    value: u16,
    phase: I2cPhase,
    busy: bool,
    error: bool,
}

impl Transaction {
    const fn idle() -> Self {
        Self {
            device: 0,
            register: 0,
            direction: Direction::Read,
            value: 0,
            phase: I2cPhase::SendAddress,
            busy: false,
            error: false,
        }
    }

    // After a byte was written, a missing acknowledge aborts the transaction
    fn check_nack(&mut self, signals: &mut (impl I2cSignals + ?Sized)) -> bool {
        if signals.nack_received() {
            self.error = true;
            self.phase = I2cPhase::Done;
            signals.stop();
            true
        } else {
            false
        }
    }

    fn advance(&mut self, signals: &mut (impl I2cSignals + ?Sized)) {
        use I2cPhase::*;
        let read = self.direction == Direction::Read;
        match self.phase {
            SendAddress => {
                signals.write_byte(self.device & !1);
                self.phase = SendRegister;
            }
            SendRegister => {
                if !self.check_nack(signals) {
                    signals.write_byte(self.register);
                    self.phase = Branch;
                }
            }
            Branch => {
                if !self.check_nack(signals) {
                    if read {
                        signals.restart();
                        self.phase = ReadAddress;
                    } else {
                        signals.write_byte((self.value >> 8) as u8);
                        self.phase = WriteLow;
                    }
                }
            }
            WriteLow if !read => {
                if !self.check_nack(signals) {
                    signals.write_byte(self.value as u8);
                    self.phase = Stop;
                }
            }
            ReadAddress if read => {
                signals.write_byte(self.device | 1);
                self.phase = ReadStart;
            }
            ReadStart if read => {
                if !self.check_nack(signals) {
                    signals.enable_receive();
                    self.phase = ReadHigh;
                }
            }
            ReadHigh if read => {
                self.value = (signals.read_byte() as u16) << 8;
                signals.acknowledge(true);
                self.phase = ReadHighAck;
            }
            ReadHighAck if read => {
                signals.enable_receive();
                self.phase = ReadLow;
            }
            ReadLow if read => {
                self.value |= signals.read_byte() as u16;
                signals.acknowledge(false);
                self.phase = Stop;
            }
            Stop => {
                if read || !self.check_nack(signals) {
                    signals.stop();
                    self.phase = Done;
                }
            }
            Done => {
                self.busy = false;
                self.phase = SendAddress;
            }
            phase => {
                warn!("I2C phase {:?} invalid for {:?}", phase, self.direction);
                self.phase = SendAddress;
            }
        }
    }
}

/// The shared state of one register bus
///
/// Only one transaction runs at a time. The session configures a transaction with
/// [`I2cEngine::begin`] and the bus interrupt advances it.
#[derive(Debug)]
pub struct I2cEngine {
    state: Mutex<RefCell<Transaction>>,
}

impl Default for I2cEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl I2cEngine {
    /// Create an idle engine
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(Transaction::idle())),
        }
    }

    /// Start a transaction
    ///
    /// `device` is the 8-bit (write form) device address. For writes, `value` is the value to be
    /// written; it is ignored for reads.
    pub fn begin(
        &self,
        signals: &mut (impl I2cSignals + ?Sized),
        device: u8,
        register: u8,
        direction: Direction,
        value: u16,
    ) -> Result<(), I2cError> {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            if state.busy {
                return Err(I2cError::Busy);
            }
            *state = Transaction {
                device,
                register,
                direction,
                value,
                phase: I2cPhase::SendAddress,
                busy: true,
                error: false,
            };
            signals.start();
            Ok(())
        })
    }

    /// Advance the active transaction; call from the bus interrupt
    ///
    /// Events arriving while no transaction is active are ignored.
    pub fn on_event(&self, signals: &mut (impl I2cSignals + ?Sized)) {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            if state.busy {
                state.advance(signals);
            }
        })
    }

    /// Returns true while a transaction is in progress
    pub fn is_busy(&self) -> bool {
        critical_section::with(|cs| self.state.borrow_ref(cs).busy)
    }

    /// The phase the next event will perform
    pub fn phase(&self) -> I2cPhase {
        critical_section::with(|cs| self.state.borrow_ref(cs).phase)
    }

    /// The result of the last completed transaction
    ///
    /// For reads this is the register value. Returns [`I2cError::Busy`] if the transaction has not
    /// completed yet.
    pub fn result(&self) -> Result<u16, I2cError> {
        critical_section::with(|cs| {
            let state = self.state.borrow_ref(cs);
            if state.busy {
                Err(I2cError::Busy)
            } else if state.error {
                Err(I2cError::Nack)
            } else {
                Ok(state.value)
            }
        })
    }
}

/// Synchronous access to 16-bit device registers
pub trait RegisterBus {
    /// Read a register
    fn read_register(&mut self, device: u8, register: u8) -> Result<u16, I2cError>;
    /// Write a register
    fn write_register(&mut self, device: u8, register: u8, value: u16) -> Result<(), I2cError>;
}

impl<T: RegisterBus + ?Sized> RegisterBus for &mut T {
    fn read_register(&mut self, device: u8, register: u8) -> Result<u16, I2cError> {
        (**self).read_register(device, register)
    }

    fn write_register(&mut self, device: u8, register: u8, value: u16) -> Result<(), I2cError> {
        (**self).write_register(device, register, value)
    }
}

/// A [`RegisterBus`] which runs transactions on an [`I2cEngine`] and waits for them to finish
///
/// `idle` is called repeatedly while waiting.
pub struct BlockingI2c<'a, S, F> {
    engine: &'a I2cEngine,
    signals: S,
    idle: F,
}

impl<S, F> core::fmt::Debug for BlockingI2c<'_, S, F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BlockingI2c")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl<'a, S: I2cSignals, F: FnMut()> BlockingI2c<'a, S, F> {
    /// Create a blocking bus
    pub fn new(engine: &'a I2cEngine, signals: S, idle: F) -> Self {
        Self {
            engine,
            signals,
            idle,
        }
    }

    fn run(
        &mut self,
        device: u8,
        register: u8,
        direction: Direction,
        value: u16,
    ) -> Result<u16, I2cError> {
        self.engine
            .begin(&mut self.signals, device, register, direction, value)?;
        while self.engine.is_busy() {
            (self.idle)();
        }
        self.engine.result()
    }
}

impl<S: I2cSignals, F: FnMut()> RegisterBus for BlockingI2c<'_, S, F> {
    fn read_register(&mut self, device: u8, register: u8) -> Result<u16, I2cError> {
        self.run(device, register, Direction::Read, 0)
    }

    fn write_register(&mut self, device: u8, register: u8, value: u16) -> Result<(), I2cError> {
        self.run(device, register, Direction::Write, value).map(|_| ())
    }
}
