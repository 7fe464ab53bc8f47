//! Implements the mailbox shared between the serial interrupts and the [`Node`](crate::Node)
use core::cell::RefCell;

use critical_section::Mutex;
use defmt_or_log::debug;
use hanbus_common::{
    constants::MAX_FRAME_SIZE,
    frame::{DecodeEvent, FrameDecoder, FrameEncoder},
    IrqReason, NodeAddress, Packet,
};

use crate::{atomic_cell::AtomicCell, irq::IrqArbiter};

struct Receiver {
    decoder: FrameDecoder<MAX_FRAME_SIZE>,
    /// A completed frame is waiting for the session. Set only by `store_byte`, cleared only by
    /// `release_frame`.
    ready: bool,
}

struct Transmitter {
    encoder: FrameEncoder,
    packet: Packet,
    /// Set only by `arm_transmit`, cleared only once the end marker has been produced
    busy: bool,
}

/// A data structure to be shared between the UART and timer interrupts and the
/// [`Node`](crate::Node) object.
///
/// Received bytes should be passed to [`NodeMbox::store_byte`], bytes to transmit are fetched with
/// [`NodeMbox::next_transmit_byte`], and [`NodeMbox::tick`] must be called every tick (nominally
/// 1.024 ms).
///
/// Only one frame is held in each direction. While a received frame waits for the session, further
/// received bytes are dropped.
#[allow(missing_debug_implementations)]
pub struct NodeMbox {
    rx: Mutex<RefCell<Receiver>>,
    tx: Mutex<RefCell<Transmitter>>,
    irq: Mutex<RefCell<IrqArbiter>>,
    timeouts: AtomicCell<u8>,
    activity: AtomicCell<u8>,
    process_notify_cb: AtomicCell<Option<&'static (dyn Fn() + Sync)>>,
    transmit_notify_cb: AtomicCell<Option<&'static (dyn Fn() + Sync)>>,
}

impl Default for NodeMbox {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeMbox {
    /// Create a new NodeMbox
    pub const fn new() -> Self {
        Self {
            rx: Mutex::new(RefCell::new(Receiver {
                decoder: FrameDecoder::new(),
                ready: false,
            })),
            tx: Mutex::new(RefCell::new(Transmitter {
                encoder: FrameEncoder::new(0),
                packet: Packet::empty(),
                busy: false,
            })),
            irq: Mutex::new(RefCell::new(IrqArbiter::new())),
            timeouts: AtomicCell::new(0),
            activity: AtomicCell::new(0),
            process_notify_cb: AtomicCell::new(None),
            transmit_notify_cb: AtomicCell::new(None),
        }
    }

    /// Set a callback for notification when the node has work to do: a frame was received, a
    /// transmission finished, or a notification became due.
    ///
    /// It must be static. Usually this will be a static fn, but in some circumstances, it may be
    /// desirable to use Box::leak to pass a heap allocated closure instead.
    pub fn set_process_notify_callback(&self, callback: &'static (dyn Fn() + Sync)) {
        self.process_notify_cb.store(Some(callback));
    }

    fn process_notify(&self) {
        if let Some(notify_cb) = self.process_notify_cb.load() {
            notify_cb();
        }
    }

    /// Set a callback for when a frame is ready to be transmitted
    ///
    /// The application should use this to enable its transmit interrupt, or wake the task that
    /// drains [`NodeMbox::next_transmit_byte`].
    pub fn set_transmit_notify_callback(&self, callback: &'static (dyn Fn() + Sync)) {
        self.transmit_notify_cb.store(Some(callback));
    }

    fn transmit_notify(&self) {
        if let Some(notify_cb) = self.transmit_notify_cb.load() {
            notify_cb();
        }
    }

    /// Store a byte received from the line
    pub fn store_byte(&self, byte: u8) {
        let completed = critical_section::with(|cs| {
            // Traffic on the line defers notifications
            self.irq.borrow_ref_mut(cs).reload();

            let mut rx = self.rx.borrow_ref_mut(cs);
            if rx.ready {
                return false;
            }
            if let DecodeEvent::Complete(_) = rx.decoder.push(byte) {
                rx.ready = true;
                true
            } else {
                false
            }
        });
        if completed {
            self.process_notify();
        }
    }

    /// Advance the timers by one tick; call from the periodic timer interrupt
    pub fn tick(&self) {
        let irq_due = critical_section::with(|cs| {
            if self.rx.borrow_ref_mut(cs).decoder.tick() == DecodeEvent::TimedOut {
                self.timeouts.update(|n| n.saturating_add(1));
            }
            self.activity.update(|n| n.saturating_sub(1));
            self.irq.borrow_ref_mut(cs).tick()
        });
        if irq_due {
            self.process_notify();
        }
    }

    /// Get the next byte to put on the line
    ///
    /// Returns `None` when there is nothing to send.
    pub fn next_transmit_byte(&self) -> Option<u8> {
        let (byte, finished) = critical_section::with(|cs| {
            let mut tx = self.tx.borrow_ref_mut(cs);
            if !tx.busy {
                return (None, false);
            }
            let tx = &mut *tx;
            let byte = tx.encoder.next_byte(tx.packet.as_bytes());
            if tx.encoder.is_done() {
                tx.busy = false;
            }
            (byte, !tx.busy)
        });
        if finished {
            self.process_notify();
        }
        byte
    }

    /// Returns true while a frame is being transmitted
    pub fn transmit_busy(&self) -> bool {
        critical_section::with(|cs| self.tx.borrow_ref(cs).busy)
    }

    /// Returns true while the activity indicator should be lit
    pub fn activity_led(&self) -> bool {
        self.activity.load() > 0
    }

    /// Read the sticky count of frames abandoned for taking too long
    pub fn timeout_count(&self) -> u8 {
        self.timeouts.load()
    }

    pub(crate) fn clear_timeout_count(&self) {
        self.timeouts.store(0);
    }

    /// Copy out the received frame, if one is waiting
    ///
    /// Returns the packet and the number of bytes received on the wire, which may exceed the
    /// packet capacity. The frame stays latched until [`NodeMbox::release_frame`].
    pub(crate) fn take_frame(&self) -> Option<(Packet, usize)> {
        critical_section::with(|cs| {
            let rx = self.rx.borrow_ref(cs);
            if rx.ready {
                Some((
                    Packet::from_bytes(rx.decoder.frame()),
                    rx.decoder.received_len(),
                ))
            } else {
                None
            }
        })
    }

    /// Allow a new frame to be received
    pub(crate) fn release_frame(&self) {
        critical_section::with(|cs| self.rx.borrow_ref_mut(cs).ready = false);
    }

    /// Start transmitting a sealed packet
    ///
    /// Returns false if a transmission is still in progress.
    pub(crate) fn arm_transmit(&self, packet: &Packet) -> bool {
        let armed = critical_section::with(|cs| {
            let mut tx = self.tx.borrow_ref_mut(cs);
            if tx.busy {
                return false;
            }
            tx.packet = *packet;
            tx.encoder = FrameEncoder::new(packet.len());
            tx.busy = true;
            true
        });
        if armed {
            self.transmit_notify();
        } else {
            debug!("Transmitter busy");
        }
        armed
    }

    pub(crate) fn start_activity(&self, ticks: u8) {
        self.activity.store(ticks);
    }

    pub(crate) fn raise_irq(&self, reason: IrqReason, address: NodeAddress) {
        critical_section::with(|cs| self.irq.borrow_ref_mut(cs).raise(reason, address));
    }

    pub(crate) fn irq_due(&self) -> Option<IrqReason> {
        critical_section::with(|cs| self.irq.borrow_ref(cs).due())
    }

    pub(crate) fn reseed_irq(&self) {
        critical_section::with(|cs| self.irq.borrow_ref_mut(cs).reseed());
    }

    pub(crate) fn acknowledge_irq(&self) -> IrqReason {
        critical_section::with(|cs| self.irq.borrow_ref_mut(cs).acknowledge())
    }
}
