//! Command handlers
//!
//! Each command code maps to a handler in [`COMMAND_TABLE`]. A handler receives the request
//! parameters in a [`Params`] view and rewrites them in place to form the response parameters. The
//! response length defaults to the request length, but a handler may change it.

use defmt_or_log::{debug, info};
use hanbus_common::{
    constants::values::BOOTLOADER_KEY,
    messages::{exponents, OutputOp, Reading, ShuntOp, VOLTS_PER_BIT_UV},
    Command,
};

use crate::{
    config::{Calibration, DeviceConfig, Eeprom, ShuntRating},
    i2c::{I2cError, RegisterBus},
    monitor::PowerMonitor,
    node::{Board, NodeConfig},
    node_mbox::NodeMbox,
};

/// Number of digital outputs
pub const OUTPUT_CHANNELS: u8 = 2;

/// Reasons a command is answered with a negative acknowledgment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandError {
    /// The command code is not supported
    Unsupported,
    /// The request has the wrong number of parameters
    BadLength,
    /// A parameter is out of range
    BadValue,
    /// The power monitor could not be accessed
    Device(I2cError),
}

impl From<I2cError> for CommandError {
    fn from(value: I2cError) -> Self {
        CommandError::Device(value)
    }
}

/// A mutable view of a packet's parameter bytes
#[derive(Debug)]
pub struct Params<'b> {
    buf: &'b mut [u8],
    len: usize,
}

impl<'b> Params<'b> {
    /// Create a view of the first `len` bytes of `buf`
    ///
    /// The whole of `buf` is available should a handler lengthen the parameters.
    pub fn new(buf: &'b mut [u8], len: usize) -> Self {
        let len = len.min(buf.len());
        Self { buf, len }
    }

    /// Current parameter length
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if there are no parameters
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Change the parameter length
    pub fn set_len(&mut self, len: usize) -> Result<(), CommandError> {
        if len > self.buf.len() {
            return Err(CommandError::BadLength);
        }
        self.len = len;
        Ok(())
    }

    /// Require an exact parameter length
    pub fn expect_len(&self, len: usize) -> Result<(), CommandError> {
        if self.len == len {
            Ok(())
        } else {
            Err(CommandError::BadLength)
        }
    }

    /// The parameter bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// The parameter bytes, mutably
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf[..self.len]
    }
}

/// Everything a handler may touch
#[allow(missing_debug_implementations)]
pub struct HandlerContext<'c> {
    pub(crate) mbox: &'c NodeMbox,
    pub(crate) board: &'c mut dyn Board,
    pub(crate) monitor: PowerMonitor<&'c mut dyn RegisterBus>,
    pub(crate) eeprom: &'c mut dyn Eeprom,
    pub(crate) config: &'c NodeConfig,
    pub(crate) device: &'c mut DeviceConfig,
    pub(crate) calibration: &'c mut Calibration,
    pub(crate) crc_errors: &'c mut u8,
    pub(crate) bootloader_requested: &'c mut bool,
}

/// Signature of a command handler
pub type Handler = fn(&mut HandlerContext, &mut Params) -> Result<(), CommandError>;

/// The commands a node answers when addressed directly
pub const COMMAND_TABLE: &[(Command, Handler)] = &[
    (Command::Noop, noop),
    (Command::GetNodeId, get_node_id),
    (Command::GetCommStatus, get_comm_status),
    (Command::PollIrq, poll_irq),
    (Command::EnterBootloader, enter_bootloader),
    (Command::Output, output),
    (Command::GetVolts, get_volts),
    (Command::GetCurrent, get_current),
    (Command::GetPower, get_power),
    (Command::ShuntConfig, shunt_config),
    (Command::ProgramAddress, program_address),
];

/// Find the handler for a raw command byte
pub fn lookup(command: u8) -> Option<Handler> {
    let command = Command::try_from(command).ok()?;
    COMMAND_TABLE
        .iter()
        .find(|(c, _)| *c == command)
        .map(|(_, h)| *h)
}

/// Run the handler for `command`
pub fn dispatch(
    ctx: &mut HandlerContext,
    command: u8,
    params: &mut Params,
) -> Result<(), CommandError> {
    let handler = lookup(command).ok_or(CommandError::Unsupported)?;
    let result = handler(ctx, params);
    if let Err(e) = result {
        debug!("Command 0x{:02X} failed: {:?}", command, e);
    }
    result
}

fn noop(_ctx: &mut HandlerContext, _params: &mut Params) -> Result<(), CommandError> {
    Ok(())
}

fn get_node_id(ctx: &mut HandlerContext, params: &mut Params) -> Result<(), CommandError> {
    params.expect_len(4)?;
    let p = params.as_mut_slice();
    p[0..2].copy_from_slice(&ctx.config.module_id.to_le_bytes());
    p[2..4].copy_from_slice(&ctx.config.firmware_version.to_le_bytes());
    Ok(())
}

fn get_comm_status(ctx: &mut HandlerContext, params: &mut Params) -> Result<(), CommandError> {
    params.expect_len(3)?;
    let p = params.as_mut_slice();
    p[1] = *ctx.crc_errors;
    p[2] = ctx.mbox.timeout_count();
    if p[0] != 0 {
        *ctx.crc_errors = 0;
        ctx.mbox.clear_timeout_count();
    }
    Ok(())
}

fn poll_irq(ctx: &mut HandlerContext, params: &mut Params) -> Result<(), CommandError> {
    if params.len() > 1 {
        return Err(CommandError::BadLength);
    }
    params.set_len(1)?;
    params.as_mut_slice()[0] = ctx.mbox.acknowledge_irq().into();
    Ok(())
}

fn enter_bootloader(ctx: &mut HandlerContext, params: &mut Params) -> Result<(), CommandError> {
    params.expect_len(BOOTLOADER_KEY.len())?;
    if params.as_slice() != BOOTLOADER_KEY {
        return Err(CommandError::BadValue);
    }
    *ctx.bootloader_requested = true;
    Ok(())
}

fn output(ctx: &mut HandlerContext, params: &mut Params) -> Result<(), CommandError> {
    params.expect_len(3)?;
    let p = params.as_mut_slice();
    let channel = p[0];
    if channel >= OUTPUT_CHANNELS || p[2] != 0 {
        return Err(CommandError::BadValue);
    }
    // Only a read reports the state; set and clear echo the zero result byte
    match OutputOp::try_from(p[1]).map_err(|_| CommandError::BadValue)? {
        OutputOp::Clear => ctx.board.set_output(channel, false),
        OutputOp::Set => ctx.board.set_output(channel, true),
        OutputOp::Read => p[2] = ctx.board.output(channel) as u8,
    }
    Ok(())
}

fn telemetry(
    params: &mut Params,
    read: impl FnOnce() -> Result<Reading, I2cError>,
) -> Result<(), CommandError> {
    params.expect_len(Reading::ENCODED_SIZE)?;
    if params.as_slice()[0] != 0 {
        return Err(CommandError::BadValue);
    }
    let reading = read()?;
    reading.encode(params.as_mut_slice());
    Ok(())
}

fn get_volts(ctx: &mut HandlerContext, params: &mut Params) -> Result<(), CommandError> {
    telemetry(params, || {
        Ok(Reading {
            exponent: exponents::VOLTS,
            raw: ctx.monitor.read_bus_voltage()?,
            scale: VOLTS_PER_BIT_UV,
        })
    })
}

fn get_current(ctx: &mut HandlerContext, params: &mut Params) -> Result<(), CommandError> {
    let scale = ctx.calibration.current_lsb;
    telemetry(params, || {
        Ok(Reading {
            exponent: exponents::CURRENT,
            raw: ctx.monitor.read_current()?,
            scale,
        })
    })
}

fn get_power(ctx: &mut HandlerContext, params: &mut Params) -> Result<(), CommandError> {
    let scale = ctx.calibration.power_lsb;
    telemetry(params, || {
        Ok(Reading {
            exponent: exponents::POWER,
            raw: ctx.monitor.read_power()?,
            scale,
        })
    })
}

fn shunt_config(ctx: &mut HandlerContext, params: &mut Params) -> Result<(), CommandError> {
    params.expect_len(4)?;
    let p = params.as_mut_slice();
    match ShuntOp::try_from(p[0]).map_err(|_| CommandError::BadValue)? {
        ShuntOp::Read => {
            let shunt = ctx.device.shunt;
            p[1] = shunt.millivolts();
            p[2..4].copy_from_slice(&shunt.amps().to_le_bytes());
        }
        ShuntOp::Write => {
            let amps = u16::from_le_bytes([p[2], p[3]]);
            let shunt = ShuntRating::new(p[1], amps).ok_or(CommandError::BadValue)?;
            let calibration = Calibration::from_rating(shunt);
            // The device must accept the new calibration before anything is committed
            ctx.monitor.write_calibration(calibration.cal)?;
            ctx.device.shunt = shunt;
            *ctx.calibration = calibration;
            ctx.device.store(&mut ctx.eeprom);
            info!(
                "Shunt set to {} mV / {} A, cal {}",
                shunt.millivolts(),
                shunt.amps(),
                calibration.cal
            );
        }
        ShuntOp::ReadCalibration => {
            // The last two bytes are echoed as received
            p[0..2].copy_from_slice(&ctx.calibration.cal.to_le_bytes());
        }
    }
    Ok(())
}

// Address programming is handled by the session while the board is in address-program mode
fn program_address(_ctx: &mut HandlerContext, _params: &mut Params) -> Result<(), CommandError> {
    Err(CommandError::Unsupported)
}
