//! Command and notification codes
//!

use int_enum::IntEnum;

/// Commands understood by a node
///
/// The raw value is carried in the command byte of a request, and echoed back in its response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntEnum)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Command {
    /// Does nothing, always acknowledged
    Noop = 0x00,
    /// Read the module identifier and firmware version
    GetNodeId = 0x01,
    /// Read (and optionally clear) the CRC error and frame timeout counters
    GetCommStatus = 0x02,
    /// Read and clear the pending notification reason
    PollIrq = 0x03,
    /// Request a restart into the bootloader
    EnterBootloader = 0x08,
    /// Set, clear or read a digital output
    Output = 0x20,
    /// Read the bus voltage
    GetVolts = 0x30,
    /// Read the current
    GetCurrent = 0x31,
    /// Read the power
    GetPower = 0x32,
    /// Read or write the shunt configuration, or read the calibration constant
    ShuntConfig = 0x33,
    /// Assign the node address; only honored in address-program mode
    ProgramAddress = 0x70,
    /// Broadcast request asking every node to announce itself
    Enumerate = 0x80,
}

/// Reasons a node raises an unsolicited notification
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, IntEnum)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum IrqReason {
    /// Nothing pending
    #[default]
    None = 0,
    /// The node has just powered up
    AtBoot = 1,
    /// The node is answering an enumeration broadcast
    Enumerate = 2,
}

/// Sub-commands of [`Command::Output`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntEnum)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum OutputOp {
    /// Turn the output off
    Clear = 0,
    /// Turn the output on
    Set = 1,
    /// Report the output state
    Read = 2,
}

/// Sub-commands of [`Command::ShuntConfig`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntEnum)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ShuntOp {
    /// Report the shunt ratings
    Read = 0,
    /// Replace the shunt ratings
    Write = 1,
    /// Report the derived calibration constant
    ReadCalibration = 2,
}

/// Decimal exponents reported alongside telemetry readings
pub mod exponents {
    /// Bus voltage scale is in microvolts
    pub const VOLTS: i8 = -6;
    /// Current scale is in units of 10^-7 A
    pub const CURRENT: i8 = -7;
    /// Power scale exponent
    pub const POWER: i8 = -3;
}

/// Bus voltage resolution of the power monitor, in microvolts per bit
pub const VOLTS_PER_BIT_UV: u32 = 1250;

/// A telemetry reading as reported by the get-volts, get-current and get-power commands
///
/// The physical value is `raw * scale * 10^exponent`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Reading {
    /// Decimal exponent of the scale
    pub exponent: i8,
    /// Raw register value
    pub raw: u16,
    /// Value of one raw count, in units of 10^exponent
    pub scale: u32,
}

impl Reading {
    /// Size of an encoded reading, including the leading selector byte
    pub const ENCODED_SIZE: usize = 8;

    /// Write the reading into a parameter buffer: `[0, exponent, raw LE, scale LE]`
    pub fn encode(&self, params: &mut [u8]) {
        params[0] = 0;
        params[1] = self.exponent as u8;
        params[2..4].copy_from_slice(&self.raw.to_le_bytes());
        params[4..8].copy_from_slice(&self.scale.to_le_bytes());
    }

    /// Read a reading from a response parameter buffer
    pub fn decode(params: &[u8]) -> Option<Self> {
        if params.len() != Self::ENCODED_SIZE {
            return None;
        }
        Some(Self {
            exponent: params[1] as i8,
            raw: u16::from_le_bytes([params[2], params[3]]),
            scale: u32::from_le_bytes([params[4], params[5], params[6], params[7]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_codes() {
        assert_eq!(Command::try_from(0x33).ok(), Some(Command::ShuntConfig));
        assert!(Command::try_from(0x34).is_err());
        assert_eq!(u8::from(Command::Enumerate), 0x80);
        assert_eq!(u8::from(IrqReason::AtBoot), 1);
    }

    #[test]
    fn test_reading_layout() {
        let reading = Reading {
            exponent: exponents::VOLTS,
            raw: 0x2580,
            scale: VOLTS_PER_BIT_UV,
        };
        let mut params = [0xEEu8; 8];
        reading.encode(&mut params);
        assert_eq!(params, [0, 0xFA, 0x80, 0x25, 0xE2, 0x04, 0, 0]);
        assert_eq!(Reading::decode(&params), Some(reading));
    }
}
