//! Arbitration of unsolicited notifications
//!
//! Several nodes may want to notify the controller at the same time, and there is no collision
//! detection on the line. Each node therefore waits out a holdoff, counted in units of
//! [`HOLDOFF_PRESCALE`] ticks, before it transmits. The first holdoff is derived from the node
//! address so that nodes start staggered; after each transmission the holdoff is re-randomized so
//! that two nodes which collided once are unlikely to collide again. Any received byte restarts the
//! countdown, so a node never starts talking over a transmission in progress.
//!
//! The notification is repeated until the controller acknowledges it with the poll command.

use hanbus_common::{
    constants::timing::HOLDOFF_PRESCALE,
    crc::{Crc8, CrcParams},
    IrqReason, NodeAddress,
};

/// Holdoff values are kept in 0..=31
const HOLDOFF_MASK: u8 = 0x1F;

/// Seed of the pseudo-random register. Any nonzero value works.
const NOISE_SEED: u8 = 0xA5;

/// Notification and backoff state
#[derive(Clone, Copy, Debug)]
pub struct IrqArbiter {
    reason: IrqReason,
    raised: bool,
    holdoff: u8,
    timer: u8,
    prescale: u8,
    noise: Crc8,
    draws: u8,
    address: u8,
}

impl Default for IrqArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqArbiter {
    /// Create an arbiter with nothing pending
    pub const fn new() -> Self {
        Self {
            reason: IrqReason::None,
            raised: false,
            holdoff: 0,
            timer: 0,
            prescale: 0,
            noise: Crc8::with_seed(CrcParams::DEFAULT.poly8, NOISE_SEED),
            draws: 0,
            address: 0,
        }
    }

    /// Raise a notification for the node at `address`
    ///
    /// A notification which is already pending is replaced.
    pub fn raise(&mut self, reason: IrqReason, address: NodeAddress) {
        self.reason = reason;
        self.raised = true;
        self.holdoff = address.holdoff_seed();
        self.timer = self.holdoff;
        self.address = address.raw();
        self.stir(self.address);
    }

    /// Pick a new holdoff after a notification was transmitted
    ///
    /// The register is linear, so its draws are combined with an add to keep nodes at different
    /// addresses from settling into equal holdoffs.
    pub fn reseed(&mut self) {
        self.draws = self.draws.wrapping_add(1);
        let a = self.stir(self.holdoff);
        let b = self.stir(self.draws ^ self.address);
        self.holdoff = a.wrapping_add(b) & HOLDOFF_MASK;
        self.timer = self.holdoff;
    }

    // Fold a byte into the noise register, keeping it away from the all-zero state where feeding
    // it a zero holdoff would leave it stuck
    fn stir(&mut self, byte: u8) -> u8 {
        let reg = self.noise.push_byte(byte);
        if reg == 0 {
            self.noise = Crc8::with_seed(CrcParams::DEFAULT.poly8, NOISE_SEED);
            NOISE_SEED
        } else {
            reg
        }
    }

    /// Restart the countdown from the current holdoff
    pub fn reload(&mut self) {
        self.timer = self.holdoff;
        self.prescale = 0;
    }

    /// Advance by one tick
    ///
    /// Returns true when this tick made a raised notification due.
    pub fn tick(&mut self) -> bool {
        self.prescale += 1;
        if self.prescale < HOLDOFF_PRESCALE {
            return false;
        }
        self.prescale = 0;
        if self.timer > 0 {
            self.timer -= 1;
            return self.timer == 0 && self.raised;
        }
        false
    }

    /// Returns the pending reason if a notification is raised and its holdoff has elapsed
    pub fn due(&self) -> Option<IrqReason> {
        if self.raised && self.timer == 0 {
            Some(self.reason)
        } else {
            None
        }
    }

    /// Report the pending reason, and clear it
    pub fn acknowledge(&mut self) -> IrqReason {
        let reason = self.reason;
        self.reason = IrqReason::None;
        self.raised = false;
        reason
    }

    /// Returns true if a notification is pending
    pub fn is_raised(&self) -> bool {
        self.raised
    }

    /// The current holdoff, in prescaled ticks
    pub fn holdoff(&self) -> u8 {
        self.holdoff
    }

    /// Remaining countdown, in prescaled ticks
    pub fn timer(&self) -> u8 {
        self.timer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(raw: u8) -> NodeAddress {
        NodeAddress::new(raw).unwrap()
    }

    #[test]
    fn test_raise_seeds_from_address() {
        let mut irq = IrqArbiter::new();
        assert_eq!(irq.due(), None);
        irq.raise(IrqReason::AtBoot, addr(0x47));
        assert_eq!(irq.holdoff(), 0x07);
        assert_eq!(irq.timer(), 0x07);
        assert_eq!(irq.due(), None);

        for _ in 0..(7 * HOLDOFF_PRESCALE as usize - 1) {
            assert!(!irq.tick());
        }
        assert!(irq.tick());
        assert_eq!(irq.due(), Some(IrqReason::AtBoot));
    }

    #[test]
    fn test_holdoff_bounded_under_reseed() {
        for raw in [0u8, 1, 0x1F, 0x20, 0x80, 0xFE] {
            let mut irq = IrqArbiter::new();
            irq.raise(IrqReason::Enumerate, addr(raw));
            let mut zero_runs = 0;
            let mut seen = [false; 32];
            for _ in 0..1000 {
                irq.reseed();
                assert!(irq.holdoff() <= 31);
                assert_eq!(irq.timer(), irq.holdoff());
                seen[irq.holdoff() as usize] = true;
                if irq.holdoff() == 0 {
                    zero_runs += 1;
                } else {
                    zero_runs = 0;
                }
                assert!(zero_runs < 4, "holdoff stuck at zero");
            }
            assert!(seen.iter().filter(|s| **s).count() > 16);
        }
    }

    #[test]
    fn test_neighbours_do_not_lockstep() {
        for (a, b) in [(1u8, 2u8), (3, 0x23), (0x10, 0x30), (0, 0x80)] {
            let mut x = IrqArbiter::new();
            let mut y = IrqArbiter::new();
            x.raise(IrqReason::AtBoot, addr(a));
            y.raise(IrqReason::AtBoot, addr(b));
            let mut equal = 0;
            let mut run = 0;
            for _ in 0..200 {
                x.reseed();
                y.reseed();
                if x.holdoff() == y.holdoff() {
                    equal += 1;
                    run += 1;
                } else {
                    run = 0;
                }
                assert!(run < 4, "{a} and {b} collide repeatedly");
            }
            assert!(equal < 30);
        }
    }

    #[test]
    fn test_reload_restarts_countdown() {
        let mut irq = IrqArbiter::new();
        irq.raise(IrqReason::AtBoot, addr(2));
        for _ in 0..HOLDOFF_PRESCALE {
            irq.tick();
        }
        assert_eq!(irq.timer(), 1);
        irq.reload();
        assert_eq!(irq.timer(), 2);
    }

    #[test]
    fn test_acknowledge_clears() {
        let mut irq = IrqArbiter::new();
        irq.raise(IrqReason::Enumerate, addr(0));
        assert_eq!(irq.due(), Some(IrqReason::Enumerate));
        assert_eq!(irq.acknowledge(), IrqReason::Enumerate);
        assert_eq!(irq.due(), None);
        assert!(!irq.is_raised());
        assert_eq!(irq.acknowledge(), IrqReason::None);
    }
}
