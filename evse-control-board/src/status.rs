//! Owner-published status snapshot shared between the control task and the
//! supervisor adapter tasks. The control task is the single writer; every
//! reader takes a copy.

use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, mutex::Mutex};
use evse_core::charge::{ChargeState, CurrentReading, EvseStatus};
use evse_core::pilot::{PilotLevels, VehicleState};

const INITIAL_STATUS: EvseStatus = EvseStatus {
    charge_state: ChargeState::Ready,
    vehicle_state: VehicleState::NotConnected,
    current_limit: 0.0,
    max_current: 32.0,
    pilot: PilotLevels {
        high_mv: 0,
        low_mv: 0,
        duty_percent: 0.0,
    },
    actual_current: CurrentReading {
        l1: 0.0,
        l2: 0.0,
        l3: 0.0,
    },
    allow_below_min: false,
    low_limit_resume_delay_ms: 300_000,
    throttle_alive_timeout_s: 0,
    rcm_enabled: true,
    rcm_tripped: false,
    // Matches the controller's fail-safe boot value.
    error_lockout: true,
    user_paused: false,
    paused_at_low_limit: false,
    current_test: false,
    boot_loop: false,
};

pub struct SharedEvseStatus {
    inner: Mutex<CriticalSectionRawMutex, EvseStatus>,
}

impl SharedEvseStatus {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(INITIAL_STATUS),
        }
    }

    pub async fn get(&self) -> EvseStatus {
        *self.inner.lock().await
    }

    pub async fn set(&self, status: EvseStatus) {
        *self.inner.lock().await = status;
    }
}
