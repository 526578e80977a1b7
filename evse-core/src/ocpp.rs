//! OCPP 1.6J supervisor adapter.
//!
//! Minimal subset over WebSocket text frames: BootNotification, Heartbeat,
//! StatusNotification and MeterValues outbound; SetChargingProfile,
//! RemoteStartTransaction and RemoteStopTransaction inbound. Sans-IO like
//! the pub/sub adapter: the board task owns the socket and the handshake,
//! frames move through the callbacks here.

use core::fmt::Write;

use embassy_time::{Duration, Instant};
use heapless::String;
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};

use crate::charge::{ChargeState, EvseStatus};
use crate::command::Command;
use crate::pilot::VehicleState;

pub const OCPP_VENDOR: &str = "evse-core";
pub const OCPP_MODEL: &str = "AC-CTRL-1";
pub const OCPP_SUBPROTOCOL: &str = "ocpp1.6";

/// Cadence of MeterValues reports while a transaction is running.
pub const METER_VALUES_INTERVAL: Duration = Duration::from_secs(60);

const CALL: u8 = 2;
const CALL_RESULT: u8 = 3;
const CALL_ERROR: u8 = 4;

const FRAME_CAPACITY: usize = 512;

/// Simplified connector status reported to the back office.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectorStatus {
    Available,
    Suspended,
    Charging,
}

impl ConnectorStatus {
    pub fn from_status(status: &EvseStatus) -> Self {
        if status.charge_state == ChargeState::Charging {
            return ConnectorStatus::Charging;
        }
        match status.vehicle_state {
            VehicleState::NotConnected | VehicleState::Error | VehicleState::NoPower => {
                ConnectorStatus::Available
            }
            _ => ConnectorStatus::Suspended,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            ConnectorStatus::Available => "Available",
            ConnectorStatus::Suspended => "SuspendedEV",
            ConnectorStatus::Charging => "Charging",
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BootNotificationReq<'a> {
    charge_point_vendor: &'a str,
    charge_point_model: &'a str,
}

#[derive(Serialize)]
struct EmptyPayload {}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusNotificationReq<'a> {
    connector_id: u32,
    error_code: &'a str,
    status: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MeterValuesReq<'a> {
    connector_id: u32,
    meter_value: [MeterValue<'a>; 1],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MeterValue<'a> {
    sampled_value: [SampledValue<'a>; 1],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SampledValue<'a> {
    value: &'a str,
    measurand: &'a str,
    unit: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetChargingProfileReq {
    cs_charging_profiles: ChargingProfile,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChargingProfile {
    charging_schedule: ChargingSchedule,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChargingSchedule {
    charging_schedule_period: heapless::Vec<SchedulePeriod, 4>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SchedulePeriod {
    #[serde(default)]
    #[allow(dead_code)]
    start_period: u32,
    limit: f32,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct BootNotificationConf {
    #[serde(default)]
    interval: Option<u32>,
}

type MessageId = String<12>;

pub struct OcppClient {
    msg_counter: u32,
    boot_msg_id: Option<MessageId>,
    heartbeat_interval: Duration,
    last_heartbeat: Instant,
    last_status: Option<ConnectorStatus>,
    last_meter: Instant,
}

impl OcppClient {
    pub fn new(heartbeat_s: u32, now: Instant) -> Self {
        Self {
            msg_counter: 0,
            boot_msg_id: None,
            heartbeat_interval: Duration::from_secs(heartbeat_s.max(1) as u64),
            last_heartbeat: now,
            last_status: None,
            last_meter: now,
        }
    }

    /// The socket is up: introduce ourselves. The BootNotification response
    /// may re-arm the heartbeat period.
    pub fn on_connected(&mut self, now: Instant, out: &mut dyn FnMut(&str)) {
        info!("OCPP connected, sending BootNotification");
        self.last_heartbeat = now;
        self.last_status = None;
        let id = self.send_call(
            "BootNotification",
            &BootNotificationReq {
                charge_point_vendor: OCPP_VENDOR,
                charge_point_model: OCPP_MODEL,
            },
            out,
        );
        self.boot_msg_id = id;
    }

    /// Periodic outbound traffic: heartbeat, status-change notification and
    /// meter values while charging.
    pub fn poll(&mut self, now: Instant, status: &EvseStatus, out: &mut dyn FnMut(&str)) {
        if now.duration_since(self.last_heartbeat) >= self.heartbeat_interval {
            self.send_call("Heartbeat", &EmptyPayload {}, out);
            self.last_heartbeat = now;
        }

        let connector = ConnectorStatus::from_status(status);
        if self.last_status != Some(connector) {
            self.last_status = Some(connector);
            self.send_call(
                "StatusNotification",
                &StatusNotificationReq {
                    connector_id: 1,
                    error_code: "NoError",
                    status: connector.as_str(),
                },
                out,
            );
        }

        if status.charge_state == ChargeState::Charging
            && now.duration_since(self.last_meter) >= METER_VALUES_INTERVAL
        {
            self.last_meter = now;
            let mut value: String<16> = String::new();
            let _ = write!(value, "{:.2}", status.actual_current.l1);
            self.send_call(
                "MeterValues",
                &MeterValuesReq {
                    connector_id: 1,
                    meter_value: [MeterValue {
                        sampled_value: [SampledValue {
                            value: &value,
                            measurand: "Current.Import",
                            unit: "A",
                        }],
                    }],
                },
                out,
            );
        }
    }

    /// One inbound text frame. Responses go to `out`, accepted remote
    /// commands to `commands`.
    pub fn on_text(
        &mut self,
        text: &str,
        out: &mut dyn FnMut(&str),
        commands: &mut dyn FnMut(Command),
    ) {
        debug!("OCPP rx: {}", text);
        match frame_type(text) {
            Some(CALL) => self.on_call(text, out, commands),
            Some(CALL_RESULT) => self.on_call_result(text),
            Some(CALL_ERROR) => {
                if let Ok(((_, _id, code, desc, _), _)) =
                    serde_json_core::from_str::<(u8, &str, &str, &str, IgnoredAny)>(text)
                {
                    warn!("OCPP server error: {} ({})", code, desc);
                }
            }
            _ => warn!("OCPP frame not understood"),
        }
    }

    fn on_call(&mut self, text: &str, out: &mut dyn FnMut(&str), commands: &mut dyn FnMut(Command)) {
        let Ok(((_, id, action, _), _)) =
            serde_json_core::from_str::<(u8, &str, &str, IgnoredAny)>(text)
        else {
            warn!("OCPP CALL frame malformed");
            return;
        };

        match action {
            "SetChargingProfile" => {
                if let Ok(((_, _, _, req), _)) =
                    serde_json_core::from_str::<(u8, &str, &str, SetChargingProfileReq)>(text)
                {
                    if let Some(period) =
                        req.cs_charging_profiles.charging_schedule.charging_schedule_period.first()
                    {
                        info!("OCPP charging profile limit: {} A", period.limit);
                        commands(Command::SetCurrentLimit(period.limit));
                    }
                }
                self.send_result(id, out);
            }
            "RemoteStartTransaction" => {
                info!("OCPP remote start");
                commands(Command::Start);
                self.send_result(id, out);
            }
            "RemoteStopTransaction" => {
                info!("OCPP remote stop");
                commands(Command::Stop);
                self.send_result(id, out);
            }
            _ => {
                self.send_error(id, "NotImplemented", "Action not supported", out);
            }
        }
    }

    fn on_call_result(&mut self, text: &str) {
        let pending_boot = self.boot_msg_id.take();
        if let Some(boot_id) = pending_boot {
            if let Ok(((_, id, conf), _)) =
                serde_json_core::from_str::<(u8, &str, BootNotificationConf)>(text)
            {
                if id == boot_id.as_str() {
                    if let Some(interval) = conf.interval {
                        if interval > 0 {
                            info!("BootNotification accepted, heartbeat every {} s", interval);
                            self.heartbeat_interval = Duration::from_secs(interval as u64);
                        }
                    }
                    return;
                }
            }
            // Not our boot response after all, keep waiting for it.
            self.boot_msg_id = Some(boot_id);
        }
        debug!("OCPP server accepted request");
    }

    fn send_call<P: Serialize>(
        &mut self,
        action: &str,
        payload: &P,
        out: &mut dyn FnMut(&str),
    ) -> Option<MessageId> {
        self.msg_counter = self.msg_counter.wrapping_add(1);
        if self.msg_counter == 0 {
            self.msg_counter = 1;
        }
        let mut id = MessageId::new();
        let _ = write!(id, "{}", self.msg_counter);

        let mut buf = [0u8; FRAME_CAPACITY];
        let frame = (CALL, id.as_str(), action, payload);
        match serde_json_core::to_slice(&frame, &mut buf) {
            Ok(len) => {
                if let Ok(text) = core::str::from_utf8(&buf[..len]) {
                    debug!("OCPP tx #{}: {}", id.as_str(), action);
                    out(text);
                }
                Some(id)
            }
            Err(_) => {
                error!("OCPP CALL serialisation failed for {}", action);
                None
            }
        }
    }

    fn send_result(&mut self, id: &str, out: &mut dyn FnMut(&str)) {
        let mut buf = [0u8; FRAME_CAPACITY];
        let frame = (CALL_RESULT, id, EmptyPayload {});
        if let Ok(len) = serde_json_core::to_slice(&frame, &mut buf) {
            if let Ok(text) = core::str::from_utf8(&buf[..len]) {
                out(text);
            }
        }
    }

    fn send_error(&mut self, id: &str, code: &str, description: &str, out: &mut dyn FnMut(&str)) {
        let mut buf = [0u8; FRAME_CAPACITY];
        let frame = (CALL_ERROR, id, code, description, EmptyPayload {});
        if let Ok(len) = serde_json_core::to_slice(&frame, &mut buf) {
            if let Ok(text) = core::str::from_utf8(&buf[..len]) {
                out(text);
            }
        }
    }
}

// Peek the message type without committing to a payload shape.
fn frame_type(text: &str) -> Option<u8> {
    let mut chars = text.trim_start().chars();
    if chars.next() != Some('[') {
        return None;
    }
    for c in chars {
        match c {
            c if c.is_ascii_whitespace() => continue,
            c if c.is_ascii_digit() => return Some(c as u8 - b'0'),
            _ => return None,
        }
    }
    None
}
