//! Residual current monitor supervision.
//!
//! The detector trips through an edge interrupt; the ISR side only latches an
//! event, everything else runs from the control cycle. A test coil allows the
//! detector to be exercised before every charge and on a 24 h schedule.

use embassy_time::{with_timeout, Duration, Timer};

/// The detector must trip within this window when the test coil is driven.
/// Reaching the boundary counts as a failure.
pub const RCM_SELF_TEST_TIMEOUT: Duration = Duration::from_millis(500);

/// Trip input, test output and the latched ISR event. The board crate backs
/// this with an EXTI line (pulled down, rising edge) and a GPIO.
#[allow(async_fn_in_trait)]
pub trait RcmHardware {
    /// Drive the test coil.
    fn set_test_signal(&mut self, active: bool);
    /// Consume the latched trip event, if any. Wait-free.
    fn take_trip_event(&mut self) -> bool;
    /// Sample the raw sense line.
    fn sense_asserted(&mut self) -> bool;
    /// Resolve on the next trip edge.
    async fn wait_trip_event(&mut self);
}

pub struct Rcm<H: RcmHardware> {
    hw: H,
}

impl<H: RcmHardware> Rcm<H> {
    pub fn new(mut hw: H) -> Self {
        hw.set_test_signal(false);
        Self { hw }
    }

    /// Non-blocking trip check. A latched event only counts if the sense
    /// line is still asserted one millisecond later (noise filter).
    pub async fn is_triggered(&mut self) -> bool {
        if !self.hw.take_trip_event() {
            return false;
        }
        Timer::after(Duration::from_millis(1)).await;
        self.hw.sense_asserted()
    }

    /// Pulse the test coil and verify the detector trips. Blocks for up to
    /// [`RCM_SELF_TEST_TIMEOUT`]; the controller never runs this while the
    /// contactor is closed.
    pub async fn self_test(&mut self) -> bool {
        info!("RCM self-test starting");

        // Drop any stale event so we only see the trip we provoke.
        let _ = self.hw.take_trip_event();

        self.hw.set_test_signal(true);
        let tripped = with_timeout(RCM_SELF_TEST_TIMEOUT, self.hw.wait_trip_event())
            .await
            .is_ok();
        self.hw.set_test_signal(false);

        if tripped {
            info!("RCM self-test passed");
        } else {
            error!("RCM self-test FAILED (timeout)");
        }
        tripped
    }
}
