//! Byte-stuffed framing used on the serial line
//!
//! A frame on the wire is `STX`, the packet bytes, then `ETX`. Packet bytes whose value is less
//! than or equal to `SUBST` are sent as `SUBST` followed by the byte itself, so the three control
//! markers never appear unescaped inside a frame.
//!
//! [`FrameDecoder`] and [`FrameEncoder`] are pure state machines advanced one byte at a time, so
//! that they can be driven directly from UART interrupts.

use crate::constants::{
    markers::{ETX, STX, SUBST},
    timing::FRAME_TIMEOUT_TICKS,
};

/// Returns true if `byte` must be preceded by `SUBST` when it appears inside a frame
pub const fn needs_escape(byte: u8) -> bool {
    byte <= SUBST
}

/// Assembly state of a [`FrameDecoder`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecoderState {
    /// Waiting for a start marker
    Idle,
    /// A start marker was received and bytes are being collected
    Assembling,
}

/// Result of feeding a byte or a tick to a [`FrameDecoder`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeEvent {
    /// Nothing of note happened
    None,
    /// A start marker began a new frame, discarding anything assembled so far
    Started,
    /// An end marker completed a frame of the given received length
    Complete(usize),
    /// The in-progress frame was abandoned because its timer expired
    TimedOut,
}

/// Reassembles frames from a stream of received bytes
///
/// `N` is the capacity of the frame buffer. Bytes beyond the capacity are dropped, but still
/// counted in the received length, so that the consumer can reject the frame as oversize.
#[derive(Clone, Debug)]
pub struct FrameDecoder<const N: usize> {
    state: DecoderState,
    escape_pending: bool,
    buffer: [u8; N],
    received: usize,
    timer: u8,
}

impl<const N: usize> Default for FrameDecoder<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> FrameDecoder<N> {
    /// Create a new, idle decoder
    pub const fn new() -> Self {
        Self {
            state: DecoderState::Idle,
            escape_pending: false,
            buffer: [0; N],
            received: 0,
            timer: 0,
        }
    }

    /// Feed one received byte
    pub fn push(&mut self, byte: u8) -> DecodeEvent {
        if self.escape_pending {
            self.escape_pending = false;
            self.append(byte);
            return DecodeEvent::None;
        }

        match byte {
            STX => {
                self.state = DecoderState::Assembling;
                self.received = 0;
                self.timer = FRAME_TIMEOUT_TICKS;
                DecodeEvent::Started
            }
            ETX => {
                if self.state == DecoderState::Assembling {
                    self.state = DecoderState::Idle;
                    DecodeEvent::Complete(self.received)
                } else {
                    DecodeEvent::None
                }
            }
            // Outside a frame a substitution has nothing to apply to
            SUBST => {
                self.escape_pending = self.state == DecoderState::Assembling;
                DecodeEvent::None
            }
            _ => {
                self.append(byte);
                DecodeEvent::None
            }
        }
    }

    fn append(&mut self, byte: u8) {
        if self.state != DecoderState::Assembling {
            return;
        }
        if let Some(slot) = self.buffer.get_mut(self.received) {
            *slot = byte;
        }
        self.received = self.received.saturating_add(1);
    }

    /// Advance the per-frame timer by one tick
    ///
    /// Only counts while a frame is being assembled. When the timer has run out, the partial frame
    /// is discarded and [`DecodeEvent::TimedOut`] is returned.
    pub fn tick(&mut self) -> DecodeEvent {
        if self.state != DecoderState::Assembling {
            return DecodeEvent::None;
        }
        if self.timer == 0 {
            self.state = DecoderState::Idle;
            self.escape_pending = false;
            DecodeEvent::TimedOut
        } else {
            self.timer -= 1;
            DecodeEvent::None
        }
    }

    /// The current assembly state
    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Number of bytes received in the current or last completed frame
    ///
    /// May exceed `N` if the frame overflowed the buffer.
    pub fn received_len(&self) -> usize {
        self.received
    }

    /// The bytes stored for the current or last completed frame
    pub fn frame(&self) -> &[u8] {
        &self.buffer[..self.received.min(N)]
    }
}

/// Transmit state of a [`FrameEncoder`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EncoderState {
    /// The start marker has not been sent yet
    Idle,
    /// Sending packet bytes
    Sending,
    /// An escape marker was sent, the escaped byte goes next
    Escaping,
    /// All packet bytes are sent, the end marker goes next
    Finishing,
    /// The end marker was sent
    Done,
}

/// Serializes one frame, one wire byte per call
#[derive(Clone, Copy, Debug)]
pub struct FrameEncoder {
    state: EncoderState,
    index: usize,
    remaining: usize,
}

impl FrameEncoder {
    /// Create an encoder for a frame of `len` bytes
    pub const fn new(len: usize) -> Self {
        Self {
            state: EncoderState::Idle,
            index: 0,
            remaining: len,
        }
    }

    /// The current state
    pub fn state(&self) -> EncoderState {
        self.state
    }

    /// Returns true once the end marker has been produced
    pub fn is_done(&self) -> bool {
        self.state == EncoderState::Done
    }

    /// Produce the next byte to put on the wire
    ///
    /// `frame` must be the same buffer on every call. Returns `None` after the end marker.
    pub fn next_byte(&mut self, frame: &[u8]) -> Option<u8> {
        match self.state {
            EncoderState::Idle => {
                self.state = if self.remaining == 0 {
                    EncoderState::Finishing
                } else {
                    EncoderState::Sending
                };
                Some(STX)
            }
            EncoderState::Sending => {
                let byte = frame.get(self.index).copied().unwrap_or(0);
                if needs_escape(byte) {
                    self.state = EncoderState::Escaping;
                    Some(SUBST)
                } else {
                    self.advance();
                    Some(byte)
                }
            }
            EncoderState::Escaping => {
                let byte = frame.get(self.index).copied().unwrap_or(0);
                self.advance();
                Some(byte)
            }
            EncoderState::Finishing => {
                self.state = EncoderState::Done;
                Some(ETX)
            }
            EncoderState::Done => None,
        }
    }

    fn advance(&mut self) {
        self.index += 1;
        self.remaining -= 1;
        self.state = if self.remaining == 0 {
            EncoderState::Finishing
        } else {
            EncoderState::Sending
        };
    }
}

/// Error returned when an encoded frame does not fit in the output buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BufferFull;

/// Encode a complete frame into `out`, including start and end markers
pub fn encode_frame<const M: usize>(
    frame: &[u8],
    out: &mut heapless::Vec<u8, M>,
) -> Result<(), BufferFull> {
    let mut encoder = FrameEncoder::new(frame.len());
    while let Some(b) = encoder.next_byte(frame) {
        out.push(b).map_err(|_| BufferFull)?;
    }
    Ok(())
}

/// Worst case wire size of a frame of `len` bytes
pub const fn max_encoded_len(len: usize) -> usize {
    2 * len + 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use assertables::assert_le;

    fn decode_all<const N: usize>(decoder: &mut FrameDecoder<N>, bytes: &[u8]) -> Option<usize> {
        let mut done = None;
        for &b in bytes {
            if let DecodeEvent::Complete(len) = decoder.push(b) {
                done = Some(len);
            }
        }
        done
    }

    #[test]
    fn test_escape_round_trip_all_byte_values() {
        // Every byte value, including the markers themselves, in chunks that fit the buffer
        let all: heapless::Vec<u8, 256> = (0..=255u8).collect();
        for chunk in all.chunks(16) {
            let mut wire: heapless::Vec<u8, 64> = heapless::Vec::new();
            encode_frame(chunk, &mut wire).unwrap();
            assert_eq!(wire[0], STX);
            assert_eq!(*wire.last().unwrap(), ETX);
            assert_le!(wire.len(), max_encoded_len(chunk.len()));

            let mut decoder: FrameDecoder<16> = FrameDecoder::new();
            let len = decode_all(&mut decoder, &wire).unwrap();
            assert_eq!(len, chunk.len());
            assert_eq!(decoder.frame(), chunk);
        }
    }

    #[test]
    fn test_escaped_bytes_are_preceded_by_subst() {
        let frame = [STX, 0x41, ETX, SUBST, 0x1B];
        let mut wire: heapless::Vec<u8, 16> = heapless::Vec::new();
        encode_frame(&frame, &mut wire).unwrap();
        assert_eq!(
            &wire[..],
            &[STX, SUBST, STX, 0x41, SUBST, ETX, SUBST, SUBST, 0x1B, ETX]
        );
    }

    #[test]
    fn test_empty_frame() {
        let mut wire: heapless::Vec<u8, 4> = heapless::Vec::new();
        encode_frame(&[], &mut wire).unwrap();
        assert_eq!(&wire[..], &[STX, ETX]);
    }

    #[test]
    fn test_start_marker_restarts_frame() {
        let mut decoder: FrameDecoder<16> = FrameDecoder::new();
        let len = decode_all(&mut decoder, &[STX, 0x50, 0x51, STX, 0x60, ETX]);
        assert_eq!(len, Some(1));
        assert_eq!(decoder.frame(), &[0x60]);
    }

    #[test]
    fn test_bytes_outside_frame_ignored() {
        let mut decoder: FrameDecoder<16> = FrameDecoder::new();
        assert_eq!(decoder.push(0x55), DecodeEvent::None);
        assert_eq!(decoder.push(ETX), DecodeEvent::None);
        assert_eq!(decoder.state(), DecoderState::Idle);
        assert_eq!(decode_all(&mut decoder, &[STX, 0x70, ETX]), Some(1));
    }

    #[test]
    fn test_substitution_outside_frame_ignored() {
        let mut decoder: FrameDecoder<16> = FrameDecoder::new();
        assert_eq!(decode_all(&mut decoder, &[SUBST, STX, 0x70, ETX]), Some(1));
        assert_eq!(decoder.frame(), &[0x70]);
    }

    #[test]
    fn test_overflow_is_counted_but_dropped() {
        let mut decoder: FrameDecoder<4> = FrameDecoder::new();
        let len = decode_all(&mut decoder, &[STX, 0x30, 0x31, 0x32, 0x33, 0x34, 0x35, ETX]);
        assert_eq!(len, Some(6));
        assert_eq!(decoder.frame(), &[0x30, 0x31, 0x32, 0x33]);
    }

    #[test]
    fn test_timeout_abandons_frame() {
        let mut decoder: FrameDecoder<16> = FrameDecoder::new();
        decoder.push(STX);
        decoder.push(0x40);
        for _ in 0..FRAME_TIMEOUT_TICKS {
            assert_eq!(decoder.tick(), DecodeEvent::None);
        }
        assert_eq!(decoder.tick(), DecodeEvent::TimedOut);
        assert_eq!(decoder.state(), DecoderState::Idle);
        // The tail of the abandoned frame does not complete anything
        assert_eq!(decoder.push(ETX), DecodeEvent::None);
        // Idle decoders never time out
        assert_eq!(decoder.tick(), DecodeEvent::None);
    }

    #[test]
    fn test_encoder_one_byte_per_call() {
        let frame = [0x41, 0x02];
        let mut encoder = FrameEncoder::new(frame.len());
        assert_eq!(encoder.next_byte(&frame), Some(STX));
        assert_eq!(encoder.next_byte(&frame), Some(0x41));
        assert_eq!(encoder.next_byte(&frame), Some(SUBST));
        assert_eq!(encoder.state(), EncoderState::Escaping);
        assert_eq!(encoder.next_byte(&frame), Some(0x02));
        assert_eq!(encoder.state(), EncoderState::Finishing);
        assert_eq!(encoder.next_byte(&frame), Some(ETX));
        assert!(encoder.is_done());
        assert_eq!(encoder.next_byte(&frame), None);
    }
}
