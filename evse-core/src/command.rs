//! The normalised supervisor command surface.
//!
//! Every external control path (local UI, pub/sub broker, OCPP back office)
//! reduces to this one enum, so no adapter has privileged access to the
//! controller and the ThrottleAlive contract is honoured in exactly one
//! place.

use embassy_time::Instant;

use crate::charge::ChargeController;
use crate::pilot::{duty_to_amps, PilotHardware};
use crate::rcm::RcmHardware;
use crate::relay::RelayPin;

#[derive(Clone, Copy, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    Start,
    Stop,
    Pause,
    SetCurrentLimit(f32),
    SetAllowBelowMin(bool),
    SetRcmEnabled(bool),
    SetLowLimitResumeDelay(u32),
    SetThrottleAliveTimeout(u32),
    TestMode(bool),
    /// Drive the pilot at a raw duty percentage (test surface only).
    TestDuty(f32),
}

impl Command {
    /// Dispatch onto the controller. `Start` and `SetCurrentLimit` carry the
    /// ThrottleAlive signal, the rest do not feed the liveness contract.
    pub async fn apply<H, P, M>(self, ctl: &mut ChargeController<H, P, M>, now: Instant)
    where
        H: PilotHardware,
        P: RelayPin,
        M: RcmHardware,
    {
        match self {
            Command::Start => {
                ctl.start_charging(now).await;
                ctl.signal_throttle_alive(now);
            }
            Command::Stop => ctl.stop_charging(now),
            Command::Pause => ctl.pause_charging(),
            Command::SetCurrentLimit(amps) => {
                ctl.set_current_limit(amps, now);
                ctl.signal_throttle_alive(now);
            }
            Command::SetAllowBelowMin(allow) => ctl.set_allow_below_min(allow),
            Command::SetRcmEnabled(enable) => ctl.set_rcm_enabled(enable),
            Command::SetLowLimitResumeDelay(ms) => ctl.set_low_limit_resume_delay(ms),
            Command::SetThrottleAliveTimeout(s) => ctl.set_throttle_alive_timeout(s),
            Command::TestMode(enable) => ctl.enable_current_test(enable),
            Command::TestDuty(duty) => {
                let duty = duty.clamp(0.0, 100.0);
                ctl.enable_current_test(true);
                ctl.set_current_test(duty_to_amps(duty));
            }
        }
    }
}

/// Short-ASCII boolean grammar shared by every adapter.
pub fn parse_bool(payload: &str) -> Option<bool> {
    let payload = payload.trim();
    if payload.eq_ignore_ascii_case("1")
        || payload.eq_ignore_ascii_case("on")
        || payload.eq_ignore_ascii_case("true")
        || payload.eq_ignore_ascii_case("enable")
    {
        Some(true)
    } else if payload.eq_ignore_ascii_case("0")
        || payload.eq_ignore_ascii_case("off")
        || payload.eq_ignore_ascii_case("false")
        || payload.eq_ignore_ascii_case("disable")
    {
        Some(false)
    } else {
        None
    }
}

pub fn parse_f32(payload: &str) -> Option<f32> {
    payload.trim().parse::<f32>().ok()
}

pub fn parse_u32(payload: &str) -> Option<u32> {
    payload.trim().parse::<u32>().ok()
}
