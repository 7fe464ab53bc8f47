//! Bit-serial CRC engines protecting frames on the line
//!
//! Two widths are used. Frames with an 8-bit header variant carry a single trailing byte computed
//! by [`Crc8`], frames with a 16-bit header variant carry two trailing bytes, low byte first,
//! computed by [`Crc16`] seeded at zero.
//!
//! The generator polynomials are a property of the installation rather than of this code: both
//! ends of the line must agree on them, so they are passed around as [`CrcParams`].
//!
//! Every engine method accepting a `per_byte` hook calls it once before each byte is folded in.
//! Firmware uses this to feed a watchdog during long computations. The hook cannot influence the
//! result.

/// Generator polynomials for both CRC widths
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CrcParams {
    /// Polynomial for the 8-bit CRC, in reversed (LSB-first) form
    pub poly8: u8,
    /// Polynomial for the 16-bit CRC, in normal (MSB-first) form
    pub poly16: u16,
}

impl CrcParams {
    /// The polynomials used by stock hanbus nodes
    pub const DEFAULT: Self = Self {
        poly8: 0x8C,
        poly16: 0x1021,
    };
}

impl Default for CrcParams {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Which CRC protects a frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CrcWidth {
    /// One trailing CRC byte
    Crc8,
    /// Two trailing CRC bytes, low byte first
    Crc16,
}

impl CrcWidth {
    /// Number of bytes the CRC occupies at the end of a frame
    pub const fn size(&self) -> usize {
        match self {
            CrcWidth::Crc8 => 1,
            CrcWidth::Crc16 => 2,
        }
    }
}

/// A running 8-bit CRC register
///
/// Bits are processed least significant first.
#[derive(Clone, Copy, Debug)]
pub struct Crc8 {
    poly: u8,
    reg: u8,
}

impl Crc8 {
    /// Create an engine with a zeroed register
    pub const fn new(poly: u8) -> Self {
        Self::with_seed(poly, 0)
    }

    /// Create an engine with a preloaded register
    pub const fn with_seed(poly: u8, seed: u8) -> Self {
        Self { poly, reg: seed }
    }

    /// Fold a single byte into the register and return the new register value
    pub fn push_byte(&mut self, byte: u8) -> u8 {
        let mut bits = byte;
        for _ in 0..8 {
            let feedback = (bits ^ self.reg) & 1;
            self.reg >>= 1;
            if feedback != 0 {
                self.reg ^= self.poly;
            }
            bits >>= 1;
        }
        self.reg
    }

    /// Fold a buffer into the register, calling `per_byte` before each byte
    pub fn update_with(&mut self, data: &[u8], mut per_byte: impl FnMut()) -> u8 {
        for &b in data {
            per_byte();
            self.push_byte(b);
        }
        self.reg
    }

    /// Fold a buffer into the register
    pub fn update(&mut self, data: &[u8]) -> u8 {
        self.update_with(data, || {})
    }

    /// Current register value
    pub fn value(&self) -> u8 {
        self.reg
    }

    /// Compute the CRC of a buffer from a zero seed
    pub fn checksum(poly: u8, data: &[u8]) -> u8 {
        Self::new(poly).update(data)
    }
}

/// A running 16-bit CRC register
///
/// Each byte is XORed into the high half of the register, then bits are shifted out most
/// significant first.
#[derive(Clone, Copy, Debug)]
pub struct Crc16 {
    poly: u16,
    reg: u16,
}

impl Crc16 {
    /// Create an engine starting from `seed`
    ///
    /// Passing the result of an earlier computation as the seed chains the two computations, as
    /// if the buffers had been concatenated.
    pub const fn new(poly: u16, seed: u16) -> Self {
        Self { poly, reg: seed }
    }

    /// Fold a single byte into the register and return the new register value
    pub fn push_byte(&mut self, byte: u8) -> u16 {
        self.reg ^= (byte as u16) << 8;
        for _ in 0..8 {
            let carry = self.reg & 0x8000 != 0;
            self.reg <<= 1;
            if carry {
                self.reg ^= self.poly;
            }
        }
        self.reg
    }

    /// Fold a buffer into the register, calling `per_byte` before each byte
    pub fn update_with(&mut self, data: &[u8], mut per_byte: impl FnMut()) -> u16 {
        for &b in data {
            per_byte();
            self.push_byte(b);
        }
        self.reg
    }

    /// Fold a buffer into the register
    pub fn update(&mut self, data: &[u8]) -> u16 {
        self.update_with(data, || {})
    }

    /// Current register value
    pub fn value(&self) -> u16 {
        self.reg
    }

    /// Compute the CRC of a buffer from `seed`
    pub fn checksum(poly: u16, seed: u16, data: &[u8]) -> u16 {
        Self::new(poly, seed).update(data)
    }
}
