//! Types for representing node addresses
//!

use crate::constants::{BROADCAST_ADDRESS, DEFAULT_NODE_ADDRESS};

/// The destination of a request. Unicast addresses are 0-254, with the special value of 255
/// addressing every node on the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Destination {
    /// All nodes (255)
    Broadcast,
    /// A single node
    Unicast(NodeAddress),
}

/// A newtype on u8 to enforce a valid unicast node address (0-254)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeAddress(u8);

impl NodeAddress {
    /// The address of a node with nothing stored
    pub const DEFAULT: NodeAddress = NodeAddress(DEFAULT_NODE_ADDRESS);

    /// Try to create a new NodeAddress
    ///
    /// It will fail if value is the broadcast address
    pub const fn new(value: u8) -> Result<Self, InvalidAddressError> {
        if value == BROADCAST_ADDRESS {
            Err(InvalidAddressError)
        } else {
            Ok(NodeAddress(value))
        }
    }

    /// Get the raw address as a u8
    pub const fn raw(&self) -> u8 {
        self.0
    }

    /// The low five bits of the address, used to seed the notification holdoff
    pub const fn holdoff_seed(&self) -> u8 {
        self.0 & 0x1F
    }
}

impl core::fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<NodeAddress> for u8 {
    fn from(value: NodeAddress) -> Self {
        value.raw()
    }
}

impl TryFrom<u8> for NodeAddress {
    type Error = InvalidAddressError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl Destination {
    /// Get the raw destination byte
    pub const fn raw(&self) -> u8 {
        match self {
            Destination::Broadcast => BROADCAST_ADDRESS,
            Destination::Unicast(addr) => addr.0,
        }
    }

    /// Return true if this destination includes the node at `address`
    pub fn includes(&self, address: NodeAddress) -> bool {
        match self {
            Destination::Broadcast => true,
            Destination::Unicast(a) => *a == address,
        }
    }
}

impl From<u8> for Destination {
    fn from(value: u8) -> Self {
        match NodeAddress::new(value) {
            Ok(addr) => Destination::Unicast(addr),
            Err(_) => Destination::Broadcast,
        }
    }
}

impl From<NodeAddress> for Destination {
    fn from(value: NodeAddress) -> Self {
        Destination::Unicast(value)
    }
}

impl From<Destination> for u8 {
    fn from(value: Destination) -> Self {
        value.raw()
    }
}

/// Error for converting the broadcast address to a NodeAddress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidAddressError;

impl core::fmt::Display for InvalidAddressError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Broadcast address is not a node address")
    }
}
impl core::error::Error for InvalidAddressError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_from_raw() {
        assert_eq!(Destination::from(0xFF), Destination::Broadcast);
        let five = NodeAddress::new(5).unwrap();
        assert_eq!(Destination::from(5), Destination::Unicast(five));
        assert!(Destination::Broadcast.includes(five));
        assert!(!Destination::from(6).includes(five));
        assert!(NodeAddress::new(0xFF).is_err());
        assert_eq!(NodeAddress::new(0xE5).unwrap().holdoff_seed(), 0x05);
    }
}
