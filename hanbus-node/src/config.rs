//! Persistent node configuration
//!
//! Three items live in the byte-addressable [`Eeprom`]:
//!
//! - A 16 byte configuration record at [`CONFIG_OFFSET`] holding the shunt ratings. It starts with
//!   a signature; a record with a bad signature or out of range values is replaced by the defaults.
//! - The node address at [`ADDRESS_OFFSET`]. An erased byte selects the default address.
//! - The bootloader request byte at [`BOOT_SIGNATURE_OFFSET`], read by the bootloader after reset.
//!
//! Record layout:
//!
//! | Offset | Size | Content |
//! |---|---|---|
//! | 0 | 2 | signature, little endian |
//! | 2 | 1 | shunt full scale voltage, mV |
//! | 3 | 1 | reserved |
//! | 4 | 2 | shunt full scale current, A, little endian |
//! | 6 | 10 | zero |

use defmt_or_log::{info, warn};
use hanbus_common::{
    constants::store::{
        ADDRESS_OFFSET, BOOT_SIGNATURE, BOOT_SIGNATURE_OFFSET, CONFIG_OFFSET, CONFIG_SIGNATURE,
        CONFIG_SIZE, ERASED,
    },
    NodeAddress,
};

/// Number of times a bootloader request is written before giving up
const BOOT_SIGNATURE_ATTEMPTS: usize = 3;

/// A byte addressable non-volatile store, implemented by the application
pub trait Eeprom {
    /// Read the byte at `offset`
    fn read(&mut self, offset: u8) -> u8;
    /// Write the byte at `offset`
    fn write(&mut self, offset: u8, value: u8);
}

impl<T: Eeprom + ?Sized> Eeprom for &mut T {
    fn read(&mut self, offset: u8) -> u8 {
        (**self).read(offset)
    }

    fn write(&mut self, offset: u8, value: u8) {
        (**self).write(offset, value)
    }
}

/// Full scale ratings of the current shunt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ShuntRating {
    millivolts: u8,
    amps: u16,
}

impl ShuntRating {
    /// Smallest accepted full scale voltage
    pub const MIN_MILLIVOLTS: u8 = 1;
    /// Largest accepted full scale voltage
    pub const MAX_MILLIVOLTS: u8 = 80;
    /// Smallest accepted full scale current
    pub const MIN_AMPS: u16 = 1;
    /// Largest accepted full scale current
    pub const MAX_AMPS: u16 = 200;

    /// Rating used when no valid record is stored
    pub const DEFAULT: Self = Self {
        millivolts: 50,
        amps: 200,
    };

    /// Create a rating, returning `None` if either value is out of range
    pub fn new(millivolts: u8, amps: u16) -> Option<Self> {
        let mv_ok = (Self::MIN_MILLIVOLTS..=Self::MAX_MILLIVOLTS).contains(&millivolts);
        let amps_ok = (Self::MIN_AMPS..=Self::MAX_AMPS).contains(&amps);
        if mv_ok && amps_ok {
            Some(Self { millivolts, amps })
        } else {
            None
        }
    }

    /// Shunt voltage at full scale current, in mV
    pub fn millivolts(&self) -> u8 {
        self.millivolts
    }

    /// Full scale current, in A
    pub fn amps(&self) -> u16 {
        self.amps
    }
}

impl Default for ShuntRating {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Values derived from a [`ShuntRating`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Calibration {
    /// Value for the monitor's calibration register
    pub cal: u16,
    /// Value of one current register count, in units of 10^-7 A
    pub current_lsb: u32,
    /// Value of one power register count, in units of 10^-7 W
    pub power_lsb: u32,
}

impl Calibration {
    /// Derive the monitor calibration for a shunt
    ///
    /// The current LSB is chosen so that full scale current uses the 15 bit range of the current
    /// register. The calibration constant then follows from `0.00512 / (current_lsb * R_shunt)`.
    pub fn from_rating(rating: ShuntRating) -> Self {
        let amps = rating.amps as u64;
        // Full scale current, 10^-7 A
        let a107 = 10_000_000 * amps;
        // Shunt resistance, 10^-7 ohm
        let rs107 = rating.millivolts as u64 * 10_000 / amps;
        let current_lsb = (a107 >> 15) as u32;
        let power_lsb = 25 * current_lsb;
        let divisor = (current_lsb as u64 * rs107) / 1000;
        let cal = 512_000_000u64
            .checked_div(divisor)
            .unwrap_or(u64::MAX)
            .min(u16::MAX as u64) as u16;
        Self {
            cal,
            current_lsb,
            power_lsb,
        }
    }
}

/// Reasons a stored configuration record was rejected
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RecordError {
    /// The record does not start with the signature
    BadSignature(u16),
    /// The record holds out of range ratings
    OutOfRange,
}

/// The persisted device configuration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceConfig {
    /// Shunt ratings
    pub shunt: ShuntRating,
}

impl DeviceConfig {
    /// Serialize into the record layout
    pub fn to_record(&self) -> [u8; CONFIG_SIZE] {
        let mut record = [0; CONFIG_SIZE];
        record[0..2].copy_from_slice(&CONFIG_SIGNATURE.to_le_bytes());
        record[2] = self.shunt.millivolts;
        record[4..6].copy_from_slice(&self.shunt.amps.to_le_bytes());
        record
    }

    /// Parse a record
    pub fn from_record(record: &[u8; CONFIG_SIZE]) -> Result<Self, RecordError> {
        let signature = u16::from_le_bytes([record[0], record[1]]);
        if signature != CONFIG_SIGNATURE {
            return Err(RecordError::BadSignature(signature));
        }
        let amps = u16::from_le_bytes([record[4], record[5]]);
        let shunt = ShuntRating::new(record[2], amps).ok_or(RecordError::OutOfRange)?;
        Ok(Self { shunt })
    }

    /// Read the stored configuration
    pub fn read(eeprom: &mut impl Eeprom) -> Result<Self, RecordError> {
        let mut record = [0; CONFIG_SIZE];
        for (i, b) in record.iter_mut().enumerate() {
            *b = eeprom.read(CONFIG_OFFSET + i as u8);
        }
        Self::from_record(&record)
    }

    /// Read the stored configuration, replacing an invalid record with the defaults
    pub fn load(eeprom: &mut impl Eeprom) -> Self {
        match Self::read(eeprom) {
            Ok(config) => config,
            Err(e) => {
                warn!("Stored configuration invalid ({:?}), restoring defaults", e);
                let config = Self::default();
                config.store(eeprom);
                config
            }
        }
    }

    /// Write the configuration to the store
    pub fn store(&self, eeprom: &mut impl Eeprom) {
        for (i, b) in self.to_record().iter().enumerate() {
            eeprom.write(CONFIG_OFFSET + i as u8, *b);
        }
    }
}

/// Read the stored node address, or `default` if none is stored
pub fn load_address(eeprom: &mut impl Eeprom, default: NodeAddress) -> NodeAddress {
    let raw = eeprom.read(ADDRESS_OFFSET);
    if raw == ERASED {
        return default;
    }
    // Only the erased value is outside the unicast range
    NodeAddress::new(raw).unwrap_or(default)
}

/// Persist a node address
pub fn store_address(eeprom: &mut impl Eeprom, address: NodeAddress) {
    eeprom.write(ADDRESS_OFFSET, address.raw());
}

/// Ask the bootloader to stay resident after the next reset
///
/// The write is verified, and retried a few times. Returns false if it never read back correctly.
pub fn request_bootloader(eeprom: &mut impl Eeprom) -> bool {
    for _ in 0..BOOT_SIGNATURE_ATTEMPTS {
        eeprom.write(BOOT_SIGNATURE_OFFSET, BOOT_SIGNATURE);
        if eeprom.read(BOOT_SIGNATURE_OFFSET) == BOOT_SIGNATURE {
            info!("Bootloader requested");
            return true;
        }
    }
    false
}
