//! Residual current monitor wiring: rising-edge trip input (pulled down)
//! and the test-coil output.
//!
//! The EXTI machinery is the only interrupt-context piece; its handler just
//! wakes the watch task below, which latches the event and mirrors the
//! sense level into atomics for the control task to poll wait-free.

use core::sync::atomic::{AtomicBool, Ordering};

use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::{Level, Output, Speed};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use evse_core::rcm::RcmHardware;

use crate::pins::{RcmSensePin, RcmTestPin};

pub struct RcmLines {
    trip_latched: AtomicBool,
    sense_level: AtomicBool,
    edge: Signal<CriticalSectionRawMutex, ()>,
}

impl RcmLines {
    pub const fn new() -> Self {
        Self {
            trip_latched: AtomicBool::new(false),
            sense_level: AtomicBool::new(false),
            edge: Signal::new(),
        }
    }
}

#[embassy_executor::task]
pub async fn rcm_watch_task(
    mut sense: ExtiInput<'static, RcmSensePin>,
    lines: &'static RcmLines,
) {
    if sense.is_high() {
        lines.sense_level.store(true, Ordering::Relaxed);
    }
    loop {
        sense.wait_for_rising_edge().await;
        lines.sense_level.store(true, Ordering::Relaxed);
        lines.trip_latched.store(true, Ordering::Relaxed);
        lines.edge.signal(());

        sense.wait_for_falling_edge().await;
        lines.sense_level.store(false, Ordering::Relaxed);
    }
}

pub struct RcmDriver {
    test: Output<'static, RcmTestPin>,
    lines: &'static RcmLines,
}

impl RcmDriver {
    pub fn new(test_pin: RcmTestPin, lines: &'static RcmLines) -> Self {
        Self {
            test: Output::new(test_pin, Level::Low, Speed::Low),
            lines,
        }
    }
}

impl RcmHardware for RcmDriver {
    fn set_test_signal(&mut self, active: bool) {
        self.test
            .set_level(if active { Level::High } else { Level::Low });
    }

    fn take_trip_event(&mut self) -> bool {
        // Consume both the latch and any queued wakeup so a stale edge
        // cannot satisfy a later self-test.
        self.lines.edge.reset();
        self.lines.trip_latched.swap(false, Ordering::Relaxed)
    }

    fn sense_asserted(&mut self) -> bool {
        self.lines.sense_level.load(Ordering::Relaxed)
    }

    async fn wait_trip_event(&mut self) {
        self.lines.edge.wait().await;
    }
}
