//! Mains contactor driver with anti-chatter sequencing.
//!
//! Closing is always rate limited; opening is the safety direction and is
//! never deferred.

use embassy_time::{Duration, Instant};

/// Minimum spacing between relay switch commits.
pub const RELAY_SWITCH_HOLDOFF: Duration = Duration::from_millis(3000);

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RelayState {
    Open,
    Closed,
}

/// Coil drive output, active high. The board crate maps this onto a GPIO.
pub trait RelayPin {
    fn set_closed(&mut self, closed: bool);
}

pub struct Relay<P: RelayPin> {
    pin: P,
    current: RelayState,
    desired: RelayState,
    /// Time of the last committed switch. `None` after `open_immediately()`,
    /// which releases the next close from the holdoff.
    last_switch: Option<Instant>,
}

impl<P: RelayPin> Relay<P> {
    /// Drive the pin to the initial state. The initial drive counts as a
    /// switch commit so the first close after boot honours the holdoff.
    pub fn new(mut pin: P, initial: RelayState, now: Instant) -> Self {
        pin.set_closed(initial == RelayState::Closed);
        Self {
            pin,
            current: initial,
            desired: initial,
            last_switch: Some(now),
        }
    }

    /// Request close. Committed by `poll()` once the holdoff allows.
    pub fn close(&mut self) {
        self.desired = RelayState::Closed;
    }

    /// Request open. Committed on the next `poll()` without delay.
    pub fn open(&mut self) {
        self.desired = RelayState::Open;
    }

    /// Emergency path: open the coil in the same cycle and reset the
    /// switch-time tracking.
    pub fn open_immediately(&mut self) {
        self.desired = RelayState::Open;
        self.current = RelayState::Open;
        self.pin.set_closed(false);
        self.last_switch = None;
    }

    /// Advance the anti-chatter state machine.
    pub fn poll(&mut self, now: Instant) {
        if self.desired == self.current {
            return;
        }
        let allowed = self.desired == RelayState::Open
            || match self.last_switch {
                None => true,
                Some(t) => now.duration_since(t) >= RELAY_SWITCH_HOLDOFF,
            };
        if allowed {
            self.current = self.desired;
            self.pin.set_closed(self.current == RelayState::Closed);
            self.last_switch = Some(now);
            info!(
                "relay {}",
                if self.current == RelayState::Closed {
                    "closed"
                } else {
                    "opened"
                }
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        self.current == RelayState::Closed
    }

    pub fn desired(&self) -> RelayState {
        self.desired
    }
}
