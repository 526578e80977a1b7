//! Local UI supervisor adapter.
//!
//! Routes the HTTP command surface onto the normalised command enum; page
//! rendering, auth and the captive portal are the web server's problem. All
//! commands here originate from a human, so the start/set-current paths feed
//! ThrottleAlive through the shared dispatch.

use core::fmt;

use crate::charge::{ChargeState, EvseStatus};
use crate::command::{parse_bool, parse_f32, parse_u32, Command};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UiResponse {
    /// Command accepted, respond 200 with an empty body.
    Accepted,
    /// Respond 200 with the status document.
    StatusJson,
    BadRequest,
    NotFound,
}

/// Dispatch one request. `body` is the raw request body for POSTs.
pub fn route(
    method: &str,
    path: &str,
    body: &str,
    commands: &mut dyn FnMut(Command),
) -> UiResponse {
    match (method, path) {
        ("GET", "/api/status") => UiResponse::StatusJson,
        ("POST", "/api/start") => {
            commands(Command::Start);
            UiResponse::Accepted
        }
        ("POST", "/api/stop") => {
            commands(Command::Stop);
            UiResponse::Accepted
        }
        ("POST", "/api/pause") => {
            commands(Command::Pause);
            UiResponse::Accepted
        }
        ("POST", "/api/current") => match parse_f32(body) {
            Some(amps) => {
                commands(Command::SetCurrentLimit(amps));
                UiResponse::Accepted
            }
            None => UiResponse::BadRequest,
        },
        ("POST", "/api/allowBelowMin") => match parse_bool(body) {
            Some(allow) => {
                commands(Command::SetAllowBelowMin(allow));
                UiResponse::Accepted
            }
            None => UiResponse::BadRequest,
        },
        ("POST", "/api/rcm") => match parse_bool(body) {
            Some(enable) => {
                commands(Command::SetRcmEnabled(enable));
                UiResponse::Accepted
            }
            None => UiResponse::BadRequest,
        },
        ("POST", "/api/resumeDelay") => match parse_u32(body) {
            Some(ms) => {
                commands(Command::SetLowLimitResumeDelay(ms));
                UiResponse::Accepted
            }
            None => UiResponse::BadRequest,
        },
        ("POST", "/api/throttleAliveTimeout") => match parse_u32(body) {
            Some(s) => {
                commands(Command::SetThrottleAliveTimeout(s));
                UiResponse::Accepted
            }
            None => UiResponse::BadRequest,
        },
        ("POST", "/api/test") => {
            let body = body.trim();
            if let Some(enable) = parse_bool(body) {
                commands(Command::TestMode(enable));
                UiResponse::Accepted
            } else if let Some(duty) = parse_f32(body) {
                commands(Command::TestDuty(duty.clamp(0.0, 100.0)));
                UiResponse::Accepted
            } else {
                UiResponse::BadRequest
            }
        }
        _ => UiResponse::NotFound,
    }
}

/// Status document served on `GET /api/status`.
pub fn render_status(status: &EvseStatus, out: &mut dyn fmt::Write) -> fmt::Result {
    write!(
        out,
        "{{\"state\":{},\"vehicleState\":{},\"vehicle\":\"{}\",\"currentLimit\":{:.2},\"maxCurrent\":{:.2},\"pwmDuty\":{:.2},\"current\":[{:.2},{:.2},{:.2}],\"allowBelowMin\":{},\"lowLimitResumeDelayMs\":{},\"throttleAliveTimeoutS\":{},\"rcmEnabled\":{},\"rcmFault\":{},\"errorLockout\":{},\"userPaused\":{},\"pausedAtLowLimit\":{},\"testMode\":{},\"bootLoop\":{}}}",
        match status.charge_state {
            ChargeState::Ready => 0,
            ChargeState::Charging => 1,
        },
        status.vehicle_state.as_index(),
        status.vehicle_state.description(),
        status.current_limit,
        status.max_current,
        status.pilot.duty_percent,
        status.actual_current.l1,
        status.actual_current.l2,
        status.actual_current.l3,
        status.allow_below_min,
        status.low_limit_resume_delay_ms,
        status.throttle_alive_timeout_s,
        status.rcm_enabled,
        status.rcm_tripped,
        status.error_lockout,
        status.user_paused,
        status.paused_at_low_limit,
        status.current_test,
        status.boot_loop,
    )
}
