//! Common functionality shared among other hanbus crates.
//!
//! This holds everything both ends of the line must agree on: the byte-stuffed framing, the packet
//! layout, the CRC engines, and the command codes. Most users will have no reason to depend on this
//! crate directly, as it is re-exported by both `hanbus-node` and `hanbus-client`.
#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs, missing_copy_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod address;
pub mod constants;
pub mod crc;
pub mod frame;
pub mod messages;
pub mod packet;
pub mod traits;

pub use address::{Destination, NodeAddress};
pub use crc::{CrcParams, CrcWidth};
pub use messages::{Command, IrqReason};
pub use packet::{Header, MessageClass, Packet, PacketError};
