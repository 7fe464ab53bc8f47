//! Constants defining the wire protocol and persisted layout
//!
//!

/// Reserved byte values used to delimit and escape frames on the serial line
pub mod markers {
    /// Start of frame
    pub const STX: u8 = 0x02;
    /// End of frame
    pub const ETX: u8 = 0x03;
    /// Substitute (escape) marker
    ///
    /// Any frame byte with a value less than or equal to this one is preceded by `SUBST` on the
    /// wire, and the byte following a `SUBST` is always taken literally.
    pub const SUBST: u8 = 0x1A;
}

/// Raw values of the header byte
pub mod headers {
    /// Request protected by an 8-bit CRC
    pub const REQUEST8: u8 = 0x41;
    /// Positive acknowledgment, 8-bit CRC
    pub const ACK8: u8 = 0x42;
    /// Negative acknowledgment, 8-bit CRC
    pub const NAK8: u8 = 0x43;
    /// Request protected by a 16-bit CRC
    pub const REQUEST16: u8 = 0x51;
    /// Positive acknowledgment, 16-bit CRC
    pub const ACK16: u8 = 0x52;
    /// Negative acknowledgment, 16-bit CRC
    pub const NAK16: u8 = 0x53;
    /// Unsolicited notification from a node, always 16-bit CRC
    pub const NOTIFY16: u8 = 0x5E;
}

/// Size of the header, address and command fields preceding the parameters
pub const PACKET_CONTROL_SIZE: usize = 3;

/// Maximum encoded length of a packet (before escaping), including header and CRC
pub const MAX_FRAME_SIZE: usize = 16;

/// Largest parameter region that fits in a frame
///
/// This is the 8-bit CRC case; 16-bit CRC frames have one byte less available.
pub const MAX_PARAMS_SIZE: usize = MAX_FRAME_SIZE - PACKET_CONTROL_SIZE - 1;

/// Destination address which addresses every node on the line
pub const BROADCAST_ADDRESS: u8 = 0xFF;

/// Address used by a node whose address store is erased
pub const DEFAULT_NODE_ADDRESS: u8 = 0x1F;

/// Identity reported by the get-node-id command
pub mod identity {
    /// Module identifier of the battery monitor node
    pub const MODULE_ID: u16 = 0x1007;
    /// Firmware version
    pub const FIRMWARE_VERSION: u16 = 0x0000;
}

/// Tick counts used by the node. One tick is nominally 1.024 ms.
pub mod timing {
    /// Ticks allowed between a start marker and the end marker of a frame
    pub const FRAME_TIMEOUT_TICKS: u8 = 0xFF;
    /// The notification holdoff timer counts down once every this many ticks
    pub const HOLDOFF_PRESCALE: u8 = 32;
    /// Activity indicator duration after each transmitted response
    pub const ACTIVITY_TICKS: u8 = 0xFF;
    /// Activity indicator duration at power-up
    pub const BOOT_FLASH_TICKS: u8 = 0x3F;
}

/// Offsets and values in the byte-addressable persistent store
pub mod store {
    /// Offset of the 16 byte configuration record
    pub const CONFIG_OFFSET: u8 = 0x00;
    /// Size of the configuration record
    pub const CONFIG_SIZE: usize = 16;
    /// Marks a valid configuration record
    pub const CONFIG_SIGNATURE: u16 = 0x55AA;
    /// Offset of the node address byte
    pub const ADDRESS_OFFSET: u8 = 0x10;
    /// Offset of the bootloader request byte
    pub const BOOT_SIGNATURE_OFFSET: u8 = 0x11;
    /// Value written at [BOOT_SIGNATURE_OFFSET] to request the bootloader on next reset
    pub const BOOT_SIGNATURE: u8 = 0x55;
    /// Value of an erased store byte
    pub const ERASED: u8 = 0xFF;
}

/// Special values carried in command parameters
pub mod values {
    /// Parameters required by the enter-bootloader command
    pub const BOOTLOADER_KEY: [u8; 2] = [0x55, 0xAA];
}
