//! A library to implement a hanbus battery monitor node in Rust
//!
//! Hanbus-node implements the node side of a small request/response protocol spoken over a shared
//! multi-drop serial line. A controller addresses one node at a time, or all of them at once, and
//! each node answers only requests addressed to it. Nodes report bus voltage, current and power
//! measured by an INA226-style power monitor, drive two digital outputs, and can raise unsolicited
//! notifications which are spread out in time with a randomized holdoff.
//!
//! It is intended to be run on small microcontrollers, and so it is no_std compatible and performs
//! no heap allocation. It is also possible to use it on std environments, for example to simulate
//! a line full of nodes.
//!
//! # Getting Started
//!
//! ## Shared objects
//!
//! The [NodeMbox] and the [I2cEngine](i2c::I2cEngine) are shared between interrupt handlers and
//! the [`Node`], and are typically statics:
//!
//! ```ignore
//! static NODE_MBOX: NodeMbox = NodeMbox::new();
//! static I2C_ENGINE: I2cEngine = I2cEngine::new();
//! ```
//!
//! ## Interrupt handlers
//!
//! The application connects its peripherals to the shared objects:
//!
//! ```ignore
//! fn uart_rx_isr() {
//!     NODE_MBOX.store_byte(uart.read());
//! }
//!
//! fn uart_tx_isr() {
//!     match NODE_MBOX.next_transmit_byte() {
//!         Some(b) => uart.write(b),
//!         None => uart.disable_tx_interrupt(),
//!     }
//! }
//!
//! fn timer_isr() {
//!     // Every 1.024 ms
//!     NODE_MBOX.tick();
//! }
//!
//! fn i2c_isr() {
//!     I2C_ENGINE.on_event(&mut I2cPeripheral);
//! }
//! ```
//!
//! A callback registered with [`NodeMbox::set_transmit_notify_callback`] is called when a
//! response is ready, and should enable the transmit interrupt.
//!
//! ## Node Creation
//!
//! The node takes ownership of the board signals, the register bus and the persistent store. The
//! address and calibration are loaded from the store.
//!
//! ```ignore
//! let bus = BlockingI2c::new(&I2C_ENGINE, I2cPeripheral, || watchdog.feed());
//! let mut node = Node::new(
//!     NodeConfig::DEFAULT,
//!     Callbacks::new(),
//!     &NODE_MBOX,
//!     board,
//!     bus,
//!     eeprom,
//! );
//! ```
//!
//! ## Calling process
//!
//! The [`Node::process`] method must be called repeatedly from the foreground loop. Each call
//! advances the protocol session by at most one step.
//!
//! ```ignore
//! loop {
//!     node.process();
//!     led.set(NODE_MBOX.activity_led());
//! }
//! ```
#![cfg_attr(all(not(test), not(feature = "std")), no_std)]
#![warn(missing_docs, missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod atomic_cell;
pub mod commands;
pub mod config;
pub mod i2c;
pub mod irq;
pub mod monitor;
mod node;
mod node_mbox;

// Re-export types used by applications
pub use critical_section;
pub use hanbus_common as common;

pub use atomic_cell::AtomicCell;
pub use node::{Board, Callbacks, EnterBootloaderFn, Node, NodeConfig, SessionState};
pub use node_mbox::NodeMbox;
