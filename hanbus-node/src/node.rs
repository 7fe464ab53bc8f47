//! Implements the core Node object
//!

use defmt_or_log::{debug, error, info, warn};
use hanbus_common::{
    constants::{
        identity::{FIRMWARE_VERSION, MODULE_ID},
        timing::{ACTIVITY_TICKS, BOOT_FLASH_TICKS},
        MAX_FRAME_SIZE, PACKET_CONTROL_SIZE,
    },
    Command, CrcParams, CrcWidth, Destination, Header, IrqReason, MessageClass, NodeAddress, Packet,
    PacketError,
};

use crate::{
    commands::{self, HandlerContext, Params},
    config::{self, Calibration, DeviceConfig, Eeprom},
    i2c::RegisterBus,
    monitor::{self, PowerMonitor},
    node_mbox::NodeMbox,
};

/// Board level signals the node drives or samples, implemented by the application
pub trait Board {
    /// Enable or disable the line driver. It is enabled only while the node transmits.
    fn set_line_driver(&mut self, enabled: bool);
    /// Returns true once the last byte has physically left the UART
    fn transmitter_drained(&mut self) -> bool;
    /// Returns true while the address-program jumper is fitted
    fn address_program_mode(&mut self) -> bool;
    /// Drive a digital output
    fn set_output(&mut self, channel: u8, on: bool);
    /// Read back a digital output
    fn output(&mut self, channel: u8) -> bool;
    /// Feed the watchdog during long computations
    fn feed_watchdog(&mut self) {}
}

/// Static configuration of a node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeConfig {
    /// Polynomials for frame CRCs
    pub crc: CrcParams,
    /// Address used when none is stored
    pub default_address: NodeAddress,
    /// Register bus address of the power monitor
    pub monitor_address: u8,
    /// Reported module identifier
    pub module_id: u16,
    /// Reported firmware version
    pub firmware_version: u16,
}

impl NodeConfig {
    /// The configuration of a stock battery monitor node
    pub const DEFAULT: Self = Self {
        crc: CrcParams::DEFAULT,
        default_address: NodeAddress::DEFAULT,
        monitor_address: monitor::DEFAULT_ADDRESS,
        module_id: MODULE_ID,
        firmware_version: FIRMWARE_VERSION,
    };
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Callback type for entering the bootloader
pub type EnterBootloaderFn<'a> = dyn FnMut() + 'a;

/// Collection of callbacks events which Node object can call.
///
/// All are optional.
#[allow(missing_debug_implementations)]
#[derive(Default)]
pub struct Callbacks<'a> {
    /// Restart into the bootloader
    ///
    /// Called after an enter-bootloader command has been acknowledged and the boot signature has
    /// been written. The application should reset the MCU.
    pub enter_bootloader: Option<&'a mut EnterBootloaderFn<'a>>,
}

impl Callbacks<'_> {
    /// Create a new Callbacks struct with no callbacks set
    pub const fn new() -> Self {
        Self {
            enter_bootloader: None,
        }
    }
}

/// The states of the protocol session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionState {
    /// Waiting for a received frame or a due notification
    Start,
    /// A frame was taken from the mailbox and is being validated
    PacketReady,
    /// A valid request is being interpreted
    Decode,
    /// The response header is being chosen
    Respond,
    /// The response is being handed to the transmitter
    TransmitStart,
    /// Waiting for the transmitter to produce the last byte
    WaitTx,
    /// Waiting for the last byte to leave the UART
    WaitDrain,
    /// Releasing the received frame
    Finish,
}

/// The main object representing a node
///
/// # Operation
///
/// The node is run by polling the [`Node::process`] method in your application. Each call performs
/// at most one state transition, so it never blocks for long, except while reading the power
/// monitor. It is recommended to register a callback using
/// [`NodeMbox::set_process_notify_callback`], and use this callback to trigger an immediate call to
/// process, e.g. by waking a task or signaling the processing thread.
#[allow(missing_debug_implementations)]
pub struct Node<'a, B, R, E> {
    mbox: &'a NodeMbox,
    board: B,
    monitor: PowerMonitor<R>,
    eeprom: E,
    config: NodeConfig,
    callbacks: Callbacks<'a>,
    address: NodeAddress,
    device: DeviceConfig,
    calibration: Calibration,
    state: SessionState,
    packet: Packet,
    received_len: usize,
    width: CrcWidth,
    success: bool,
    frame_taken: bool,
    crc_errors: u8,
    bootloader_requested: bool,
}

impl<'a, B: Board, R: RegisterBus, E: Eeprom> Node<'a, B, R, E> {
    /// Create a new [`Node`]
    ///
    /// The node address and shunt configuration are loaded from `eeprom` (an invalid configuration
    /// record is rewritten with the defaults), the power monitor is initialized, and an at-boot
    /// notification is raised.
    ///
    /// # Arguments
    ///
    /// * `config` - Static node configuration
    /// * `callbacks` - Application callbacks
    /// * `mbox` - The mailbox shared with the serial and timer interrupts
    /// * `board` - Board signals
    /// * `bus` - Register bus connected to the power monitor
    /// * `eeprom` - Persistent store
    pub fn new(
        config: NodeConfig,
        callbacks: Callbacks<'a>,
        mbox: &'a NodeMbox,
        board: B,
        bus: R,
        mut eeprom: E,
    ) -> Self {
        let address = config::load_address(&mut eeprom, config.default_address);
        let device = DeviceConfig::load(&mut eeprom);
        let calibration = Calibration::from_rating(device.shunt);
        let mut monitor = PowerMonitor::new(bus, config.monitor_address);
        if let Err(e) = monitor.init(calibration.cal) {
            warn!("Power monitor init failed: {:?}", e);
        }
        info!("Booting node with address {}", address.raw());

        mbox.raise_irq(IrqReason::AtBoot, address);
        mbox.start_activity(BOOT_FLASH_TICKS);

        Self {
            mbox,
            board,
            monitor,
            eeprom,
            config,
            callbacks,
            address,
            device,
            calibration,
            state: SessionState::Start,
            packet: Packet::empty(),
            received_len: 0,
            width: CrcWidth::Crc8,
            success: false,
            frame_taken: false,
            crc_errors: 0,
            bootloader_requested: false,
        }
    }

    /// Get the current node address
    pub fn address(&self) -> NodeAddress {
        self.address
    }

    /// Get the current session state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Get the number of received frames which failed their CRC check
    pub fn crc_error_count(&self) -> u8 {
        self.crc_errors
    }

    /// Get the active device configuration
    pub fn device_config(&self) -> &DeviceConfig {
        &self.device
    }

    /// Get the active power monitor calibration
    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Access the board
    pub fn board(&mut self) -> &mut B {
        &mut self.board
    }

    /// Run one step of the protocol session
    ///
    /// This should be called repeatedly by the application. It is sufficient to call it from a
    /// loop or a timer, but the [`NodeMbox`] notification callbacks can be used to call it only
    /// when there is work to do.
    ///
    /// # Returns
    ///
    /// True if the session moved to a different state, i.e. if calling again right away is
    /// useful.
    pub fn process(&mut self) -> bool {
        let next = match self.state {
            SessionState::Start => self.start(),
            SessionState::PacketReady => self.validate(),
            SessionState::Decode => self.decode(),
            SessionState::Respond => {
                self.packet
                    .set_header(Header::response(self.width, self.success));
                SessionState::TransmitStart
            }
            SessionState::TransmitStart => self.transmit_start(),
            SessionState::WaitTx => {
                if self.mbox.transmit_busy() {
                    SessionState::WaitTx
                } else {
                    SessionState::WaitDrain
                }
            }
            SessionState::WaitDrain => {
                if self.board.transmitter_drained() {
                    self.board.set_line_driver(false);
                    self.mbox.start_activity(ACTIVITY_TICKS);
                    SessionState::Finish
                } else {
                    SessionState::WaitDrain
                }
            }
            SessionState::Finish => self.finish(),
        };
        let changed = next != self.state;
        self.state = next;
        changed
    }

    fn start(&mut self) -> SessionState {
        if let Some((packet, received_len)) = self.mbox.take_frame() {
            self.packet = packet;
            self.received_len = received_len;
            self.frame_taken = true;
            return SessionState::PacketReady;
        }

        if self.board.address_program_mode() {
            return SessionState::Start;
        }
        if let Some(reason) = self.mbox.irq_due() {
            // Notifications carry the reason in the command field and have no parameters
            let packet = Packet::new(Header::Notify16, self.address.raw(), reason.into(), &[]);
            if let Some(packet) = packet {
                debug!("Sending notification {:?}", reason);
                self.packet = packet;
                self.width = CrcWidth::Crc16;
                self.frame_taken = false;
                self.mbox.reseed_irq();
                return SessionState::TransmitStart;
            }
        }
        SessionState::Start
    }

    fn validate(&mut self) -> SessionState {
        let bytes = self.packet.as_bytes();
        match Packet::parse(
            bytes,
            self.received_len,
            &self.config.crc,
            &[MessageClass::Request],
        ) {
            Ok((header, packet)) => {
                self.packet = packet;
                self.width = header.crc_width();
                SessionState::Decode
            }
            Err(PacketError::CrcMismatch { received, computed }) => {
                debug!(
                    "CRC mismatch: received 0x{:04X}, computed 0x{:04X}",
                    received, computed
                );
                self.crc_errors = self.crc_errors.saturating_add(1);
                SessionState::Finish
            }
            Err(e) => {
                debug!("Dropping frame: {:?}", e);
                SessionState::Finish
            }
        }
    }

    fn decode(&mut self) -> SessionState {
        let command = self.packet.command();

        if self.board.address_program_mode() {
            return self.program_address(command);
        }

        match Destination::from(self.packet.address()) {
            Destination::Broadcast => {
                if command == u8::from(Command::Enumerate) {
                    self.mbox.raise_irq(IrqReason::Enumerate, self.address);
                }
                // Broadcasts are never answered
                SessionState::Finish
            }
            Destination::Unicast(address) if address == self.address => {
                self.success = self.dispatch(command);
                SessionState::Respond
            }
            Destination::Unicast(_) => SessionState::Finish,
        }
    }

    fn program_address(&mut self, command: u8) -> SessionState {
        if command != u8::from(Command::ProgramAddress) {
            return SessionState::Finish;
        }
        match NodeAddress::new(self.packet.address()) {
            Ok(address) => {
                info!("Address programmed to {}", address.raw());
                self.address = address;
                config::store_address(&mut self.eeprom, address);
                self.success = true;
                SessionState::Respond
            }
            Err(_) => {
                warn!("Refusing to program the broadcast address");
                SessionState::Finish
            }
        }
    }

    fn dispatch(&mut self, command: u8) -> bool {
        let width = self.width;
        let len = self.packet.params_len(width);
        let capacity = MAX_FRAME_SIZE - PACKET_CONTROL_SIZE - width.size();
        let mut ctx = HandlerContext {
            mbox: self.mbox,
            board: &mut self.board,
            monitor: self.monitor.by_ref(),
            eeprom: &mut self.eeprom,
            config: &self.config,
            device: &mut self.device,
            calibration: &mut self.calibration,
            crc_errors: &mut self.crc_errors,
            bootloader_requested: &mut self.bootloader_requested,
        };
        let mut params = Params::new(&mut self.packet.params_capacity_mut()[..capacity], len);
        let result = commands::dispatch(&mut ctx, command, &mut params);
        let new_len = params.len();
        self.packet.set_params_len(width, new_len);
        result.is_ok()
    }

    fn transmit_start(&mut self) -> SessionState {
        if self.mbox.transmit_busy() {
            return SessionState::TransmitStart;
        }
        self.board.set_line_driver(true);
        let board = &mut self.board;
        self.packet
            .seal(self.width, &self.config.crc, || board.feed_watchdog());
        self.mbox.arm_transmit(&self.packet);
        SessionState::WaitTx
    }

    fn finish(&mut self) -> SessionState {
        if self.frame_taken {
            self.frame_taken = false;
            self.mbox.release_frame();
        }
        if self.bootloader_requested {
            self.bootloader_requested = false;
            if config::request_bootloader(&mut self.eeprom) {
                if let Some(cb) = &mut self.callbacks.enter_bootloader {
                    (*cb)();
                }
            } else {
                error!("Failed to write the boot signature");
            }
        }
        SessionState::Start
    }
}
