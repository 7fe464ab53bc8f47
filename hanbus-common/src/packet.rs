//! Packet layout and validation
//!
//! A packet is laid out as `[header][address][command][params...][crc]`, where the CRC is one byte
//! for 8-bit header variants and two bytes, low byte first, for 16-bit variants.

use int_enum::IntEnum;
use snafu::Snafu;

use crate::constants::{headers, MAX_FRAME_SIZE, PACKET_CONTROL_SIZE};
use crate::crc::{Crc16, Crc8, CrcParams, CrcWidth};

/// The kind of message a header byte announces
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MessageClass {
    /// Controller to node request
    Request,
    /// Positive acknowledgment from a node
    Ack,
    /// Negative acknowledgment from a node
    Nak,
    /// Unsolicited notification from a node
    Notify,
}

/// The header (control) byte variants
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntEnum)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Header {
    /// Request, 8-bit CRC
    Request8 = headers::REQUEST8,
    /// Positive acknowledgment, 8-bit CRC
    Ack8 = headers::ACK8,
    /// Negative acknowledgment, 8-bit CRC
    Nak8 = headers::NAK8,
    /// Request, 16-bit CRC
    Request16 = headers::REQUEST16,
    /// Positive acknowledgment, 16-bit CRC
    Ack16 = headers::ACK16,
    /// Negative acknowledgment, 16-bit CRC
    Nak16 = headers::NAK16,
    /// Unsolicited notification, 16-bit CRC
    Notify16 = headers::NOTIFY16,
}

impl Header {
    /// The CRC width used by frames with this header
    pub const fn crc_width(&self) -> CrcWidth {
        match self {
            Header::Request8 | Header::Ack8 | Header::Nak8 => CrcWidth::Crc8,
            _ => CrcWidth::Crc16,
        }
    }

    /// The message class of this header
    pub const fn class(&self) -> MessageClass {
        match self {
            Header::Request8 | Header::Request16 => MessageClass::Request,
            Header::Ack8 | Header::Ack16 => MessageClass::Ack,
            Header::Nak8 | Header::Nak16 => MessageClass::Nak,
            Header::Notify16 => MessageClass::Notify,
        }
    }

    /// The request header for a CRC width
    pub const fn request(width: CrcWidth) -> Self {
        match width {
            CrcWidth::Crc8 => Header::Request8,
            CrcWidth::Crc16 => Header::Request16,
        }
    }

    /// The acknowledgment header matching a CRC width and command outcome
    pub const fn response(width: CrcWidth, success: bool) -> Self {
        match (width, success) {
            (CrcWidth::Crc8, true) => Header::Ack8,
            (CrcWidth::Crc8, false) => Header::Nak8,
            (CrcWidth::Crc16, true) => Header::Ack16,
            (CrcWidth::Crc16, false) => Header::Nak16,
        }
    }
}

/// Reasons a received frame is not a usable packet
#[derive(Clone, Copy, Debug, PartialEq, Eq, Snafu)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PacketError {
    /// The header byte is not a known variant
    #[snafu(display("Unrecognized header byte 0x{value:02X}"))]
    BadHeader {
        /// The received header byte
        value: u8,
    },
    /// The frame is shorter than the fixed overhead for its header
    #[snafu(display("Frame of {len} bytes is too short"))]
    TooShort {
        /// Received length
        len: usize,
    },
    /// The frame exceeded the packet capacity
    #[snafu(display("Frame of {len} bytes exceeds capacity"))]
    TooLong {
        /// Received length
        len: usize,
    },
    /// The trailing CRC does not match the frame contents
    #[snafu(display("CRC mismatch: received 0x{received:04X}, computed 0x{computed:04X}"))]
    CrcMismatch {
        /// CRC carried by the frame
        received: u16,
        /// CRC computed over the frame
        computed: u16,
    },
}

/// A fixed-capacity packet buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Packet {
    buf: [u8; MAX_FRAME_SIZE],
    len: usize,
}

impl Default for Packet {
    fn default() -> Self {
        Self::empty()
    }
}

impl Packet {
    /// A zero-length packet
    pub const fn empty() -> Self {
        Self {
            buf: [0; MAX_FRAME_SIZE],
            len: 0,
        }
    }

    /// Build an unsealed packet with room for its CRC
    ///
    /// The CRC bytes are zero until [`Packet::seal`] is called. Returns `None` if the parameters do
    /// not fit.
    pub fn new(header: Header, address: u8, command: u8, params: &[u8]) -> Option<Self> {
        let len = PACKET_CONTROL_SIZE + params.len() + header.crc_width().size();
        if len > MAX_FRAME_SIZE {
            return None;
        }
        let mut pkt = Self::empty();
        pkt.buf[0] = header.into();
        pkt.buf[1] = address;
        pkt.buf[2] = command;
        pkt.buf[PACKET_CONTROL_SIZE..PACKET_CONTROL_SIZE + params.len()].copy_from_slice(params);
        pkt.len = len;
        Some(pkt)
    }

    /// Copy raw frame bytes into a packet without any validation
    ///
    /// Bytes beyond the capacity are dropped.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let len = bytes.len().min(MAX_FRAME_SIZE);
        let mut pkt = Self::empty();
        pkt.buf[..len].copy_from_slice(&bytes[..len]);
        pkt.len = len;
        pkt
    }

    /// Validate a received frame and return the packet with its header
    ///
    /// `received_len` is the number of bytes received on the wire, which may be larger than
    /// `bytes.len()` when the frame overflowed the receive buffer. `accept` limits which header
    /// classes are acceptable; other headers are reported as [`PacketError::BadHeader`].
    pub fn parse(
        bytes: &[u8],
        received_len: usize,
        params: &CrcParams,
        accept: &[MessageClass],
    ) -> Result<(Header, Self), PacketError> {
        let value = bytes.first().copied().ok_or(PacketError::TooShort { len: 0 })?;
        let header = Header::try_from(value).map_err(|value| PacketError::BadHeader { value })?;
        if !accept.contains(&header.class()) {
            return BadHeaderSnafu { value }.fail();
        }
        if received_len > MAX_FRAME_SIZE || bytes.len() > MAX_FRAME_SIZE {
            return TooLongSnafu { len: received_len }.fail();
        }
        let width = header.crc_width();
        if bytes.len() < PACKET_CONTROL_SIZE + width.size() {
            return TooShortSnafu { len: bytes.len() }.fail();
        }

        let pkt = Self::from_bytes(bytes);
        let received = pkt.trailing_crc(width);
        let computed = pkt.compute_crc(width, params, || {});
        if received != computed {
            return CrcMismatchSnafu { received, computed }.fail();
        }
        Ok((header, pkt))
    }

    fn trailing_crc(&self, width: CrcWidth) -> u16 {
        match width {
            CrcWidth::Crc8 => self.buf[self.len - 1] as u16,
            CrcWidth::Crc16 => u16::from_le_bytes([self.buf[self.len - 2], self.buf[self.len - 1]]),
        }
    }

    /// Compute the CRC over everything but the trailing CRC bytes
    pub fn compute_crc(&self, width: CrcWidth, params: &CrcParams, per_byte: impl FnMut()) -> u16 {
        let body = &self.buf[..self.len.saturating_sub(width.size())];
        match width {
            CrcWidth::Crc8 => Crc8::new(params.poly8).update_with(body, per_byte) as u16,
            CrcWidth::Crc16 => Crc16::new(params.poly16, 0).update_with(body, per_byte),
        }
    }

    /// Write the CRC into the trailing byte(s) for the given width
    pub fn seal(&mut self, width: CrcWidth, params: &CrcParams, per_byte: impl FnMut()) {
        if self.len < width.size() {
            return;
        }
        let crc = self.compute_crc(width, params, per_byte);
        match width {
            CrcWidth::Crc8 => self.buf[self.len - 1] = crc as u8,
            CrcWidth::Crc16 => {
                let [lo, hi] = crc.to_le_bytes();
                self.buf[self.len - 2] = lo;
                self.buf[self.len - 1] = hi;
            }
        }
    }

    /// The raw header byte
    pub fn header_byte(&self) -> u8 {
        self.buf[0]
    }

    /// Replace the header byte
    pub fn set_header(&mut self, header: Header) {
        self.buf[0] = header.into();
    }

    /// The destination (requests) or source (responses) address
    pub fn address(&self) -> u8 {
        self.buf[1]
    }

    /// Replace the address byte
    pub fn set_address(&mut self, address: u8) {
        self.buf[1] = address;
    }

    /// The raw command byte
    pub fn command(&self) -> u8 {
        self.buf[2]
    }

    /// Length of the parameter region, given the CRC width of the packet
    pub fn params_len(&self, width: CrcWidth) -> usize {
        self.len
            .saturating_sub(PACKET_CONTROL_SIZE + width.size())
    }

    /// The parameter bytes
    pub fn params(&self, width: CrcWidth) -> &[u8] {
        let n = self.params_len(width);
        &self.buf[PACKET_CONTROL_SIZE..PACKET_CONTROL_SIZE + n]
    }

    /// The whole parameter capacity following the command byte, regardless of the current length
    pub fn params_capacity_mut(&mut self) -> &mut [u8] {
        &mut self.buf[PACKET_CONTROL_SIZE..]
    }

    /// Change the parameter length, keeping room for the CRC
    ///
    /// Returns false, leaving the packet unchanged, if the parameters would not fit.
    pub fn set_params_len(&mut self, width: CrcWidth, params_len: usize) -> bool {
        let len = PACKET_CONTROL_SIZE + params_len + width.size();
        if len > MAX_FRAME_SIZE {
            return false;
        }
        self.len = len;
        true
    }

    /// Total packet length, including header and CRC
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true for a zero length packet
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The packet bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::BROADCAST_ADDRESS;

    const REQUESTS: &[MessageClass] = &[MessageClass::Request];

    fn sealed(header: Header, address: u8, command: u8, params: &[u8]) -> Packet {
        let mut pkt = Packet::new(header, address, command, params).unwrap();
        pkt.seal(header.crc_width(), &CrcParams::DEFAULT, || {});
        pkt
    }

    #[test]
    fn test_crc8_frame_accepted_iff_crc_matches() {
        let pkt = sealed(Header::Request8, 0x1F, 0x01, &[0, 0, 0, 0]);
        let bytes = pkt.as_bytes();
        assert_eq!(bytes.len(), 8);
        assert_eq!(
            bytes[7],
            Crc8::checksum(CrcParams::DEFAULT.poly8, &bytes[..7])
        );
        let (header, parsed) =
            Packet::parse(bytes, bytes.len(), &CrcParams::DEFAULT, REQUESTS).unwrap();
        assert_eq!(header, Header::Request8);
        assert_eq!(parsed.params(CrcWidth::Crc8), &[0, 0, 0, 0]);

        for bad in 0..=255u8 {
            if bad == bytes[7] {
                continue;
            }
            let mut corrupt = pkt;
            corrupt.buf[7] = bad;
            assert!(matches!(
                Packet::parse(corrupt.as_bytes(), 8, &CrcParams::DEFAULT, REQUESTS),
                Err(PacketError::CrcMismatch { .. })
            ));
        }
    }

    #[test]
    fn test_crc16_frame_low_byte_first() {
        let pkt = sealed(Header::Request16, 0x05, 0x30, &[0; 8]);
        let bytes = pkt.as_bytes();
        assert_eq!(bytes.len(), 13);
        let crc = Crc16::checksum(CrcParams::DEFAULT.poly16, 0, &bytes[..11]);
        assert_eq!(bytes[11], crc as u8);
        assert_eq!(bytes[12], (crc >> 8) as u8);
        assert!(Packet::parse(bytes, 13, &CrcParams::DEFAULT, REQUESTS).is_ok());

        // Swapping the CRC bytes must be rejected (unless they happen to be equal)
        if bytes[11] != bytes[12] {
            let mut swapped = pkt;
            swapped.buf.swap(11, 12);
            assert!(matches!(
                Packet::parse(swapped.as_bytes(), 13, &CrcParams::DEFAULT, REQUESTS),
                Err(PacketError::CrcMismatch { .. })
            ));
        }
    }

    #[test]
    fn test_header_classes() {
        let ack = sealed(Header::Ack16, 0x05, 0x00, &[]);
        assert!(matches!(
            Packet::parse(ack.as_bytes(), ack.len(), &CrcParams::DEFAULT, REQUESTS),
            Err(PacketError::BadHeader { value: headers::ACK16 })
        ));
        assert!(matches!(
            Packet::parse(&[0x99, 0x01, 0x00, 0x00], 4, &CrcParams::DEFAULT, REQUESTS),
            Err(PacketError::BadHeader { value: 0x99 })
        ));
        assert_eq!(Header::response(CrcWidth::Crc8, false), Header::Nak8);
        assert_eq!(Header::response(CrcWidth::Crc16, true), Header::Ack16);
        assert_eq!(Header::Notify16.crc_width(), CrcWidth::Crc16);
    }

    #[test]
    fn test_header_bytes() {
        for header in [
            Header::Request8,
            Header::Ack8,
            Header::Nak8,
            Header::Request16,
            Header::Ack16,
            Header::Nak16,
            Header::Notify16,
        ] {
            assert_eq!(Header::try_from(u8::from(header)), Ok(header));
        }
        assert_eq!(u8::from(Header::Notify16), headers::NOTIFY16);
        assert_eq!(Header::try_from(0x44), Err(0x44));
    }

    #[test]
    fn test_length_limits() {
        // Header, address, command, and a single byte: no room for a 16-bit CRC
        assert!(matches!(
            Packet::parse(
                &[headers::REQUEST16, BROADCAST_ADDRESS, 0x00, 0x00],
                4,
                &CrcParams::DEFAULT,
                REQUESTS
            ),
            Err(PacketError::TooShort { len: 4 })
        ));
        let full = [headers::REQUEST8; MAX_FRAME_SIZE];
        assert!(matches!(
            Packet::parse(&full, MAX_FRAME_SIZE + 1, &CrcParams::DEFAULT, REQUESTS),
            Err(PacketError::TooLong { .. })
        ));
        assert!(Packet::new(Header::Request16, 1, 0, &[0; 12]).is_none());
        assert!(Packet::new(Header::Request8, 1, 0, &[0; 12]).is_some());
    }

    #[test]
    fn test_params_len_never_negative() {
        let pkt = Packet::from_bytes(&[headers::REQUEST16, 1]);
        assert_eq!(pkt.params_len(CrcWidth::Crc16), 0);
        assert!(pkt.params(CrcWidth::Crc16).is_empty());
    }
}
