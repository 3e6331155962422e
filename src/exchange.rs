// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Parameter exchange: the handoff between the control thread and the
//! generator thread.
//!
//! The control thread stages new [`GeneratorState`]s for any subset of
//! channels and sets the matching bit in a flag word; the generator drains
//! the slot once per frame. Bit `NCHAN` is the stop request. Both sides hold
//! the lock only long enough to copy `O(NCHAN)` scalars, so a `parking_lot`
//! mutex — uncontended almost always, held briefly when it isn't — stands in
//! for the original's bare test-and-set spinlock.

use crate::gpio::NCHAN;
use crate::waveform::GeneratorState;
use parking_lot::Mutex;

/// Bit position signalling "stop the generator".
const STOP_BIT: u16 = 1 << NCHAN;

struct Slot {
    staged: [GeneratorState; NCHAN],
    flags: u16,
}

/// Shared staging area between the control handler and the generator loop.
pub struct Exchange {
    slot: Mutex<Slot>,
}

impl Exchange {
    pub fn new() -> Self {
        Exchange {
            slot: Mutex::new(Slot {
                staged: [GeneratorState::ZERO; NCHAN],
                flags: 0,
            }),
        }
    }

    /// Stage new states for the given `(channel, state)` pairs and mark them
    /// fresh. Channels not present are left untouched.
    pub fn publish(&self, updates: &[(usize, GeneratorState)]) {
        let mut slot = self.slot.lock();
        for &(channel, state) in updates {
            slot.staged[channel] = state;
            slot.flags |= 1 << channel;
        }
    }

    /// Request that the generator loop exit at the start of its next frame.
    pub fn publish_stop(&self) {
        let mut slot = self.slot.lock();
        slot.flags |= STOP_BIT;
    }

    /// Drain any staged updates into `live`, applied per-channel.
    ///
    /// Returns `true` if a stop was requested. Called once per frame from
    /// the generator thread; never blocks on contention for more than the
    /// O(NCHAN) copy the control side performs.
    pub fn drain(&self, live: &mut [GeneratorState; NCHAN]) -> bool {
        let mut slot = self.slot.lock();
        if slot.flags == 0 {
            return false;
        }
        for channel in 0..NCHAN {
            if slot.flags & (1 << channel) != 0 {
                live[channel] = slot.staged[channel];
            }
        }
        let stop = slot.flags & STOP_BIT != 0;
        slot.flags = 0;
        stop
    }
}

impl Default for Exchange {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_then_drain_applies_only_fresh_channels() {
        let exchange = Exchange::new();
        let mut live = [GeneratorState::ZERO; NCHAN];
        let fresh = GeneratorState::from_spec(
            &crate::waveform::UserSpec {
                kind: crate::waveform::Kind::Cst,
                average: 0.75,
                amplitude: 0.0,
                period: 0.0,
                start: 0.0,
            },
            crate::waveform::DEFAULT_TICK_RATE,
        );
        exchange.publish(&[(2, fresh)]);
        let stop = exchange.drain(&mut live);
        assert!(!stop);
        assert_eq!(live[2].sample(), 0.75);
        assert_eq!(live[0].sample(), 0.0);
    }

    #[test]
    fn drain_without_publish_is_a_no_op() {
        let exchange = Exchange::new();
        let mut live = [GeneratorState::ZERO; NCHAN];
        assert!(!exchange.drain(&mut live));
    }

    #[test]
    fn stop_bit_is_observed_and_cleared() {
        let exchange = Exchange::new();
        let mut live = [GeneratorState::ZERO; NCHAN];
        exchange.publish_stop();
        assert!(exchange.drain(&mut live));
        // second drain sees a cleared flag word.
        assert!(!exchange.drain(&mut live));
    }
}
