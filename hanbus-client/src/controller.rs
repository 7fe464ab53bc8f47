use std::{collections::VecDeque, time::Duration};

use hanbus_common::{
    constants::{values::BOOTLOADER_KEY, MAX_FRAME_SIZE, MAX_PARAMS_SIZE},
    frame::{encode_frame, max_encoded_len, DecodeEvent, FrameDecoder},
    messages::{OutputOp, Reading, ShuntOp},
    traits::{AsyncByteReceiver, AsyncByteSender},
    Command, CrcParams, CrcWidth, Destination, Header, IrqReason, MessageClass, NodeAddress, Packet,
    PacketError,
};
use snafu::Snafu;
use tokio::time::Instant;

const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(150);

const WIRE_CAPACITY: usize = max_encoded_len(MAX_FRAME_SIZE);

/// Error returned by [`Controller`] methods
#[derive(Clone, Debug, PartialEq, Snafu)]
pub enum ClientError {
    /// Timeout while awaiting an expected response
    NoResponse,
    /// The node answered with a negative acknowledgment
    #[snafu(display("Node {address} refused command 0x{command:02X}"))]
    Nak {
        /// Address of the refusing node
        address: u8,
        /// The refused command
        command: u8,
    },
    /// Received a response whose parameters could not be interpreted
    #[snafu(display("Malformed response to command 0x{command:02X}"))]
    Malformed {
        /// The command the response belongs to
        command: u8,
    },
    /// The addressed node answered a different command than was requested
    #[snafu(display("Expected response to command 0x{expected:02X}, got 0x{received:02X}"))]
    UnexpectedResponse {
        /// The requested command
        expected: u8,
        /// The command echoed in the response
        received: u8,
    },
    /// The request parameters do not fit in a packet
    #[snafu(display("{len} parameter bytes do not fit in a packet"))]
    ParamsTooLong {
        /// Requested parameter length
        len: usize,
    },
    /// Failed to write to the line
    #[snafu(display("Failed to send on the line: {message}"))]
    Link {
        /// A string describing the error reason
        message: String,
    },
}

type Result<T> = std::result::Result<T, ClientError>;

/// A positive response from a node
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    /// The response header
    pub header: Header,
    /// The responding node
    pub address: u8,
    /// The echoed command code
    pub command: u8,
    /// Response parameters
    pub params: heapless::Vec<u8, MAX_PARAMS_SIZE>,
}

/// An unsolicited notification raised by a node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Notification {
    /// The node which raised it
    pub address: u8,
    /// Why it was raised
    pub reason: IrqReason,
}

/// The identity reported by a node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeIdentity {
    /// Module type identifier
    pub module_id: u16,
    /// Firmware version
    pub firmware_version: u16,
}

/// Link error counters reported by a node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommStatus {
    /// Frames received with a bad CRC
    pub crc_errors: u8,
    /// Frames abandoned for taking too long
    pub timeouts: u8,
}

/// The shunt resistor rating a node uses to scale current and power
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShuntSetting {
    /// Full scale shunt voltage, in mV
    pub millivolts: u8,
    /// Full scale current, in A
    pub amps: u16,
}

/// Convert a telemetry reading to its physical value
pub fn scaled_value(reading: &Reading) -> f64 {
    reading.raw as f64 * reading.scale as f64 * 10f64.powi(reading.exponent as i32)
}

/// A controller on a hanbus line
///
/// Only one request is in flight at a time. Notifications which arrive while waiting for a
/// response are kept and returned by [`Controller::wait_notification`].
#[derive(Debug)]
pub struct Controller<S, R> {
    sender: S,
    receiver: R,
    crc: CrcParams,
    width: CrcWidth,
    timeout: Duration,
    decoder: FrameDecoder<MAX_FRAME_SIZE>,
    notifications: VecDeque<Notification>,
}

impl<S: AsyncByteSender, R: AsyncByteReceiver> Controller<S, R> {
    /// Create a controller sending 8-bit CRC requests with the default polynomials
    pub fn new(sender: S, receiver: R) -> Self {
        Self {
            sender,
            receiver,
            crc: CrcParams::DEFAULT,
            width: CrcWidth::Crc8,
            timeout: DEFAULT_RESPONSE_TIMEOUT,
            decoder: FrameDecoder::new(),
            notifications: VecDeque::new(),
        }
    }

    /// Set the timeout for waiting on node responses
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Get the current timeout for waiting on node responses
    pub fn get_timeout(&self) -> Duration {
        self.timeout
    }

    /// Choose the CRC width of subsequent requests
    ///
    /// Nodes answer with the same width they were asked with.
    pub fn set_crc_width(&mut self, width: CrcWidth) {
        self.width = width;
    }

    /// Set the CRC polynomials. They must match those of the nodes.
    pub fn set_crc_params(&mut self, crc: CrcParams) {
        self.crc = crc;
    }

    /// Send a request and wait for the addressed node to acknowledge it
    pub async fn request(
        &mut self,
        address: NodeAddress,
        command: u8,
        params: &[u8],
    ) -> Result<Response> {
        self.send(address.raw(), command, params).await?;
        self.wait_for_response(address.raw(), command).await
    }

    /// Send a request to every node. Broadcasts are never answered.
    pub async fn broadcast(&mut self, command: u8, params: &[u8]) -> Result<()> {
        self.send(Destination::Broadcast.raw(), command, params)
            .await
    }

    /// Send a no-op; the node echoes `data`
    pub async fn noop(&mut self, address: NodeAddress, data: &[u8]) -> Result<Vec<u8>> {
        let resp = self.request(address, Command::Noop.into(), data).await?;
        Ok(resp.params.to_vec())
    }

    /// Read the module identifier and firmware version
    pub async fn node_identity(&mut self, address: NodeAddress) -> Result<NodeIdentity> {
        let command = Command::GetNodeId.into();
        let resp = self.request(address, command, &[0; 4]).await?;
        let p = expect_len(&resp, 4)?;
        Ok(NodeIdentity {
            module_id: u16::from_le_bytes([p[0], p[1]]),
            firmware_version: u16::from_le_bytes([p[2], p[3]]),
        })
    }

    /// Read the link error counters, optionally clearing them afterwards
    pub async fn comm_status(&mut self, address: NodeAddress, clear: bool) -> Result<CommStatus> {
        let command = Command::GetCommStatus.into();
        let resp = self.request(address, command, &[clear as u8, 0, 0]).await?;
        let p = expect_len(&resp, 3)?;
        Ok(CommStatus {
            crc_errors: p[1],
            timeouts: p[2],
        })
    }

    /// Read and clear the reason of a node's pending notification
    ///
    /// Acknowledging stops the node from repeating the notification.
    pub async fn poll_irq(&mut self, address: NodeAddress) -> Result<IrqReason> {
        let command = Command::PollIrq.into();
        let resp = self.request(address, command, &[]).await?;
        let p = expect_len(&resp, 1)?;
        IrqReason::try_from(p[0]).map_err(|_| MalformedSnafu { command }.build())
    }

    /// Drive a digital output
    pub async fn set_output(&mut self, address: NodeAddress, channel: u8, on: bool) -> Result<()> {
        let op = if on { OutputOp::Set } else { OutputOp::Clear };
        self.output(address, channel, op).await?;
        Ok(())
    }

    /// Read back a digital output
    pub async fn read_output(&mut self, address: NodeAddress, channel: u8) -> Result<bool> {
        self.output(address, channel, OutputOp::Read).await
    }

    // Only the read sub-command reports the output state in the result byte
    async fn output(&mut self, address: NodeAddress, channel: u8, op: OutputOp) -> Result<bool> {
        let command = Command::Output.into();
        let resp = self
            .request(address, command, &[channel, op.into(), 0])
            .await?;
        let p = expect_len(&resp, 3)?;
        Ok(p[2] != 0)
    }

    /// Read the bus voltage
    pub async fn read_volts(&mut self, address: NodeAddress) -> Result<Reading> {
        self.telemetry(address, Command::GetVolts).await
    }

    /// Read the current through the shunt
    pub async fn read_current(&mut self, address: NodeAddress) -> Result<Reading> {
        self.telemetry(address, Command::GetCurrent).await
    }

    /// Read the power
    pub async fn read_power(&mut self, address: NodeAddress) -> Result<Reading> {
        self.telemetry(address, Command::GetPower).await
    }

    async fn telemetry(&mut self, address: NodeAddress, command: Command) -> Result<Reading> {
        let command = command.into();
        let resp = self
            .request(address, command, &[0; Reading::ENCODED_SIZE])
            .await?;
        Reading::decode(&resp.params).ok_or(MalformedSnafu { command }.build())
    }

    /// Read the shunt rating
    pub async fn read_shunt(&mut self, address: NodeAddress) -> Result<ShuntSetting> {
        let command = Command::ShuntConfig.into();
        let resp = self
            .request(address, command, &[ShuntOp::Read.into(), 0, 0, 0])
            .await?;
        let p = expect_len(&resp, 4)?;
        Ok(ShuntSetting {
            millivolts: p[1],
            amps: u16::from_le_bytes([p[2], p[3]]),
        })
    }

    /// Change and persist the shunt rating
    ///
    /// The node refuses ratings outside 1-80 mV or 1-200 A.
    pub async fn write_shunt(&mut self, address: NodeAddress, shunt: ShuntSetting) -> Result<()> {
        let command = Command::ShuntConfig.into();
        let [lo, hi] = shunt.amps.to_le_bytes();
        let resp = self
            .request(
                address,
                command,
                &[ShuntOp::Write.into(), shunt.millivolts, lo, hi],
            )
            .await?;
        expect_len(&resp, 4)?;
        Ok(())
    }

    /// Read the calibration value the node derived from its shunt rating
    pub async fn read_calibration(&mut self, address: NodeAddress) -> Result<u16> {
        let command = Command::ShuntConfig.into();
        let resp = self
            .request(address, command, &[ShuntOp::ReadCalibration.into(), 0, 0, 0])
            .await?;
        let p = expect_len(&resp, 4)?;
        Ok(u16::from_le_bytes([p[0], p[1]]))
    }

    /// Assign an address to the node whose address-program jumper is fitted
    ///
    /// Only one node on the line should be in address-program mode. It answers from its new
    /// address.
    pub async fn program_address(&mut self, address: NodeAddress) -> Result<()> {
        self.request(address, Command::ProgramAddress.into(), &[])
            .await?;
        Ok(())
    }

    /// Ask every node to raise an enumerate notification
    ///
    /// Use [`Controller::wait_notification`] to collect the answers.
    pub async fn enumerate(&mut self) -> Result<()> {
        self.broadcast(Command::Enumerate.into(), &[]).await
    }

    /// Ask a node to restart into its bootloader
    pub async fn enter_bootloader(&mut self, address: NodeAddress) -> Result<()> {
        self.request(address, Command::EnterBootloader.into(), &BOOTLOADER_KEY)
            .await?;
        Ok(())
    }

    /// Wait up to `timeout` for a notification from any node
    pub async fn wait_notification(&mut self, timeout: Duration) -> Result<Notification> {
        if let Some(n) = self.notifications.pop_front() {
            return Ok(n);
        }
        let wait_until = Instant::now() + timeout;
        loop {
            let (header, packet) = self.wait_for_packet(wait_until).await?;
            if header.class() == MessageClass::Notify {
                if let Some(n) = notification(&packet) {
                    return Ok(n);
                }
            } else {
                log::debug!("Ignoring response from node {}", packet.address());
            }
        }
    }

    /// Remove and return all notifications received so far
    pub fn take_notifications(&mut self) -> Vec<Notification> {
        self.notifications.drain(..).collect()
    }

    async fn send(&mut self, destination: u8, command: u8, params: &[u8]) -> Result<()> {
        let mut packet = Packet::new(Header::request(self.width), destination, command, params)
            .ok_or(ParamsTooLongSnafu { len: params.len() }.build())?;
        packet.seal(self.width, &self.crc, || {});

        let mut wire: heapless::Vec<u8, WIRE_CAPACITY> = heapless::Vec::new();
        encode_frame(packet.as_bytes(), &mut wire)
            .map_err(|_| ParamsTooLongSnafu { len: params.len() }.build())?;
        self.sender.send(&wire).await.map_err(|e| {
            LinkSnafu {
                message: format!("{e:?}"),
            }
            .build()
        })
    }

    async fn wait_for_response(&mut self, address: u8, command: u8) -> Result<Response> {
        let wait_until = Instant::now() + self.timeout;
        loop {
            let (header, packet) = self.wait_for_packet(wait_until).await?;
            match header.class() {
                MessageClass::Notify => {
                    if let Some(n) = notification(&packet) {
                        self.notifications.push_back(n);
                    }
                }
                _ if packet.address() != address => {
                    log::debug!("Ignoring response from node {}", packet.address());
                }
                _ if packet.command() != command => {
                    return UnexpectedResponseSnafu {
                        expected: command,
                        received: packet.command(),
                    }
                    .fail();
                }
                MessageClass::Nak => return NakSnafu { address, command }.fail(),
                _ => {
                    let params = packet.params(header.crc_width());
                    return Ok(Response {
                        header,
                        address,
                        command,
                        params: heapless::Vec::from_slice(params)
                            .map_err(|_| MalformedSnafu { command }.build())?,
                    });
                }
            }
        }
    }

    /// Read bytes until a valid frame from a node is complete
    async fn wait_for_packet(&mut self, wait_until: Instant) -> Result<(Header, Packet)> {
        loop {
            let byte = match tokio::time::timeout_at(wait_until, self.receiver.recv()).await {
                // Err indicates the timeout elapsed, so return
                Err(_) => return NoResponseSnafu.fail(),
                Ok(Ok(byte)) => byte,
                Ok(Err(e)) => {
                    log::error!("Error reading from line: {e:?}");
                    return NoResponseSnafu.fail();
                }
            };
            let DecodeEvent::Complete(received_len) = self.decoder.push(byte) else {
                continue;
            };
            match Packet::parse(
                self.decoder.frame(),
                received_len,
                &self.crc,
                &[MessageClass::Ack, MessageClass::Nak, MessageClass::Notify],
            ) {
                Ok(parsed) => return Ok(parsed),
                // Requests from another controller
                Err(PacketError::BadHeader { .. }) => (),
                Err(e) => log::warn!("Dropping frame: {e}"),
            }
        }
    }
}

fn expect_len(resp: &Response, len: usize) -> Result<&[u8]> {
    if resp.params.len() == len {
        Ok(resp.params.as_slice())
    } else {
        MalformedSnafu {
            command: resp.command,
        }
        .fail()
    }
}

fn notification(packet: &Packet) -> Option<Notification> {
    match IrqReason::try_from(packet.command()) {
        Ok(reason) => Some(Notification {
            address: packet.address(),
            reason,
        }),
        Err(raw) => {
            log::warn!(
                "Unknown notification reason {raw} from node {}",
                packet.address()
            );
            None
        }
    }
}
