//! Pub/sub supervisor adapter.
//!
//! Sans-IO: inbound packets come in through [`MqttBus::handle_message`] and
//! turn into normalised commands, outbound traffic leaves through a
//! caller-supplied publish sink. The board task owns the socket, the
//! reconnect pacing and the last-will registration; everything protocol
//! shaped lives here so it runs under host tests unchanged.

use core::fmt::Write;

use embassy_time::Duration;
use heapless::String;

use crate::charge::{ChargeState, EvseStatus};
use crate::command::{parse_bool, parse_f32, parse_u32, Command};
use crate::config::{FAILSAFE_TIMEOUT_MAX_S, FAILSAFE_TIMEOUT_MIN_S};
use crate::pilot::duty_to_amps;

/// Reconnect pacing for the owning task while the broker is unreachable.
pub const MQTT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Payload of the broker last-will registration on the state topic.
pub const MQTT_LWT_PAYLOAD: &str = "offline";

pub type Topic = String<96>;
pub type Payload = String<160>;

/// Publish sink: (topic, payload, retain).
pub trait PublishSink {
    fn publish(&mut self, topic: &str, payload: &str, retain: bool);
}

impl<F: FnMut(&str, &str, bool)> PublishSink for F {
    fn publish(&mut self, topic: &str, payload: &str, retain: bool) {
        self(topic, payload, retain)
    }
}

// Command topic suffixes (subscribed) and state topic suffixes (published).
const SUB_COMMAND: &str = "command";
const SUB_SET_CURRENT: &str = "setCurrent";
const SUB_TEST_CURRENT: &str = "test/current";
const SUB_ALLOW_BELOW: &str = "setAllowBelow6AmpCharging";
const SUB_SET_FAILSAFE: &str = "setFailsafe";
const SUB_SET_FAILSAFE_TIMEOUT: &str = "setFailsafeTimeout";
const SUB_RCM_CONFIG: &str = "config/rcm";

const PUB_STATE: &str = "state";
const PUB_VEHICLE: &str = "vehicleState";
const PUB_CURRENT: &str = "current";
const PUB_PWM_DUTY: &str = "pwmDuty";
const PUB_ALLOW_BELOW: &str = "allowBelow6AmpCharging";
const PUB_RESUME_DELAY: &str = "lowLimitResumeDelay";
const PUB_FAILSAFE: &str = "failsafe";
const PUB_FAILSAFE_TIMEOUT: &str = "failsafeTimeout";
const PUB_RCM_ENABLED: &str = "rcm/enabled";
const PUB_RCM_FAULT: &str = "rcm/fault";

pub struct MqttBus {
    device_id: String<32>,
    /// Snapshot backing the publish-on-change diff. Cleared on reconnect so
    /// every state topic goes out retained again.
    last: Option<EvseStatus>,
    fs_enabled: bool,
    fs_timeout_s: u32,
}

impl MqttBus {
    pub fn new(device_id: &str, fs_enabled: bool, fs_timeout_s: u32) -> Self {
        let mut id = String::new();
        let _ = id.push_str(device_id);
        Self {
            device_id: id,
            last: None,
            fs_enabled,
            fs_timeout_s: fs_timeout_s.clamp(FAILSAFE_TIMEOUT_MIN_S, FAILSAFE_TIMEOUT_MAX_S),
        }
    }

    pub fn topic(&self, suffix: &str) -> Topic {
        let mut t = Topic::new();
        let _ = write!(t, "evse/{}/{}", self.device_id, suffix);
        t
    }

    /// The topic carrying online/offline/charge-state, also used for the
    /// broker last-will registration.
    pub fn state_topic(&self) -> Topic {
        self.topic(PUB_STATE)
    }

    pub fn subscription_topics(&self) -> [Topic; 7] {
        [
            self.topic(SUB_COMMAND),
            self.topic(SUB_SET_CURRENT),
            self.topic(SUB_TEST_CURRENT),
            self.topic(SUB_ALLOW_BELOW),
            self.topic(SUB_SET_FAILSAFE),
            self.topic(SUB_SET_FAILSAFE_TIMEOUT),
            self.topic(SUB_RCM_CONFIG),
        ]
    }

    /// Connect-time sync: announce, mirror the current configuration to the
    /// retained topics and publish the discovery descriptors. Resets the
    /// diff so the state topics republish.
    pub fn on_connected(&mut self, status: &EvseStatus, sink: &mut impl PublishSink) {
        info!("broker connected, syncing retained state");
        sink.publish(&self.topic(PUB_STATE), "online", true);

        self.publish_bool(sink, PUB_ALLOW_BELOW, status.allow_below_min);
        self.publish_u32(sink, PUB_RESUME_DELAY, status.low_limit_resume_delay_ms);
        self.publish_bool(sink, PUB_FAILSAFE, self.fs_enabled);
        self.publish_u32(sink, PUB_FAILSAFE_TIMEOUT, self.fs_timeout_s);
        self.publish_bool(sink, PUB_RCM_ENABLED, status.rcm_enabled);
        self.publish_bool(sink, PUB_RCM_FAULT, status.rcm_tripped);

        self.publish_discovery(sink);
        self.last = None;
    }

    /// Retained publish-on-change of every observable state topic.
    pub fn publish_changes(&mut self, status: &EvseStatus, sink: &mut impl PublishSink) {
        let last = self.last;

        if last.map(|l| l.charge_state) != Some(status.charge_state) {
            let s: &str = match status.charge_state {
                ChargeState::Ready => "0",
                ChargeState::Charging => "1",
            };
            sink.publish(&self.topic(PUB_STATE), s, true);
        }

        if last.map(|l| l.vehicle_state) != Some(status.vehicle_state) {
            let mut p = Payload::new();
            let _ = write!(p, "{}", status.vehicle_state.as_index());
            sink.publish(&self.topic(PUB_VEHICLE), &p, true);
        }

        if last.map(|l| l.actual_current) != Some(status.actual_current) {
            let mut p = Payload::new();
            let _ = write!(
                p,
                "{:.2},{:.2},{:.2}",
                status.actual_current.l1, status.actual_current.l2, status.actual_current.l3
            );
            sink.publish(&self.topic(PUB_CURRENT), &p, true);
        }

        if last.map(|l| l.pilot.duty_percent) != Some(status.pilot.duty_percent) {
            let mut p = Payload::new();
            let _ = write!(p, "{:.2}", status.pilot.duty_percent);
            sink.publish(&self.topic(PUB_PWM_DUTY), &p, true);
        }

        if last.map(|l| l.allow_below_min) != Some(status.allow_below_min) {
            self.publish_bool(sink, PUB_ALLOW_BELOW, status.allow_below_min);
        }

        if last.map(|l| l.low_limit_resume_delay_ms) != Some(status.low_limit_resume_delay_ms) {
            self.publish_u32(sink, PUB_RESUME_DELAY, status.low_limit_resume_delay_ms);
        }

        if last.map(|l| l.rcm_enabled) != Some(status.rcm_enabled) {
            self.publish_bool(sink, PUB_RCM_ENABLED, status.rcm_enabled);
        }

        if last.map(|l| l.rcm_tripped) != Some(status.rcm_tripped) {
            self.publish_bool(sink, PUB_RCM_FAULT, status.rcm_tripped);
        }

        self.last = Some(*status);
    }

    /// Translate one inbound packet into commands and acknowledgement
    /// publishes. Unknown topics and malformed payloads are logged and
    /// dropped.
    pub fn handle_message(
        &mut self,
        topic: &str,
        payload: &[u8],
        commands: &mut dyn FnMut(Command),
        sink: &mut impl PublishSink,
    ) {
        let Ok(payload) = core::str::from_utf8(payload) else {
            warn!("broker payload is not UTF-8, dropped");
            return;
        };
        let Some(suffix) = self.match_suffix(topic) else {
            return;
        };

        debug!("broker message on {}: {}", topic, payload);

        match suffix {
            s if s == SUB_COMMAND => match payload.trim() {
                "start" => commands(Command::Start),
                "stop" => commands(Command::Stop),
                "pause" => commands(Command::Pause),
                _ => warn!("unknown command payload: {}", payload),
            },
            s if s == SUB_SET_CURRENT => {
                if let Some(amps) = parse_f32(payload) {
                    commands(Command::SetCurrentLimit(amps));
                }
            }
            s if s == SUB_ALLOW_BELOW => {
                let allow = parse_bool(payload).unwrap_or(false);
                commands(Command::SetAllowBelowMin(allow));
                self.publish_bool(sink, PUB_ALLOW_BELOW, allow);
            }
            s if s == SUB_TEST_CURRENT => self.handle_test_current(payload, commands, sink),
            s if s == SUB_SET_FAILSAFE => {
                let enabled = parse_bool(payload).unwrap_or(false);
                if self.fs_enabled != enabled {
                    self.fs_enabled = enabled;
                    self.publish_bool(sink, PUB_FAILSAFE, enabled);
                }
            }
            s if s == SUB_SET_FAILSAFE_TIMEOUT => {
                if let Some(v) = parse_u32(payload) {
                    let v = v.clamp(FAILSAFE_TIMEOUT_MIN_S, FAILSAFE_TIMEOUT_MAX_S);
                    if self.fs_timeout_s != v {
                        self.fs_timeout_s = v;
                        self.publish_u32(sink, PUB_FAILSAFE_TIMEOUT, v);
                    }
                }
            }
            s if s == SUB_RCM_CONFIG => {
                let enable = parse_bool(payload).unwrap_or(false);
                commands(Command::SetRcmEnabled(enable));
            }
            _ => {}
        }
    }

    fn handle_test_current(
        &mut self,
        payload: &str,
        commands: &mut dyn FnMut(Command),
        sink: &mut impl PublishSink,
    ) {
        match parse_bool(payload) {
            Some(true) => {
                commands(Command::TestMode(true));
                sink.publish(&self.topic(PUB_PWM_DUTY), "current_test_enabled", true);
            }
            Some(false) => {
                commands(Command::TestMode(false));
                sink.publish(&self.topic(PUB_PWM_DUTY), "current_test_disabled", true);
            }
            None => {
                if let Some(duty) = parse_f32(payload) {
                    let duty = duty.clamp(0.0, 100.0);
                    commands(Command::TestDuty(duty));
                    let mut p = Payload::new();
                    let _ = write!(p, "current_test:{:.1}%->{:.2}A", duty, duty_to_amps(duty));
                    sink.publish(&self.topic(PUB_PWM_DUTY), &p, true);
                }
            }
        }
    }

    /// Broker-liveness fail-safe, independent of ThrottleAlive: once the
    /// connection has been lost this long the owning task stops the charge.
    pub fn failsafe_due(&self, disconnected_for: Duration) -> bool {
        self.fs_enabled && disconnected_for >= Duration::from_secs(self.fs_timeout_s as u64)
    }

    pub fn failsafe_enabled(&self) -> bool {
        self.fs_enabled
    }

    pub fn failsafe_timeout_s(&self) -> u32 {
        self.fs_timeout_s
    }

    fn match_suffix<'t>(&self, topic: &'t str) -> Option<&'t str> {
        let rest = topic.strip_prefix("evse/")?;
        let rest = rest.strip_prefix(self.device_id.as_str())?;
        rest.strip_prefix('/')
    }

    fn publish_bool(&self, sink: &mut impl PublishSink, suffix: &str, value: bool) {
        sink.publish(&self.topic(suffix), if value { "1" } else { "0" }, true);
    }

    fn publish_u32(&self, sink: &mut impl PublishSink, suffix: &str, value: u32) {
        let mut p = Payload::new();
        let _ = write!(p, "{}", value);
        sink.publish(&self.topic(suffix), &p, true);
    }

    /// Home-automation discovery descriptors, published retained on every
    /// (re)connect.
    fn publish_discovery(&self, sink: &mut impl PublishSink) {
        let id = self.device_id.as_str();
        let mut topic: String<128> = String::new();
        let mut payload: String<512> = String::new();

        let mut emit =
            |topic: &mut String<128>, payload: &mut String<512>, sink: &mut dyn FnMut(&str, &str)| {
                sink(topic.as_str(), payload.as_str());
                topic.clear();
                payload.clear();
            };
        let mut raw = |t: &str, p: &str| sink.publish(t, p, true);

        let _ = write!(topic, "homeassistant/switch/{}_charging/config", id);
        let _ = write!(
            payload,
            "{{\"name\":\"EVSE Charging\",\"state_topic\":\"{state}\",\"command_topic\":\"{cmd}\",\"payload_on\":\"start\",\"payload_off\":\"stop\",\"unique_id\":\"{id}_charging\",\"device\":{{\"identifiers\":[\"{id}\"],\"manufacturer\":\"EVSE\",\"model\":\"AC Charge Controller\",\"name\":\"EVSE Charger\"}}}}",
            state = self.topic(PUB_STATE),
            cmd = self.topic(SUB_COMMAND),
            id = id,
        );
        emit(&mut topic, &mut payload, &mut raw);

        let _ = write!(topic, "homeassistant/sensor/{}_current/config", id);
        let _ = write!(
            payload,
            "{{\"name\":\"EVSE Current\",\"state_topic\":\"{}\",\"unit_of_measurement\":\"A\",\"unique_id\":\"{}_current\"}}",
            self.topic(PUB_CURRENT),
            id,
        );
        emit(&mut topic, &mut payload, &mut raw);

        let _ = write!(topic, "homeassistant/sensor/{}_pwm/config", id);
        let _ = write!(
            payload,
            "{{\"name\":\"EVSE PWM Duty\",\"state_topic\":\"{}\",\"unit_of_measurement\":\"%\",\"unique_id\":\"{}_pwm\"}}",
            self.topic(PUB_PWM_DUTY),
            id,
        );
        emit(&mut topic, &mut payload, &mut raw);

        let _ = write!(topic, "homeassistant/sensor/{}_vehicle/config", id);
        let _ = write!(
            payload,
            "{{\"name\":\"EVSE Vehicle\",\"state_topic\":\"{}\",\"unique_id\":\"{}_vehicle\"}}",
            self.topic(PUB_VEHICLE),
            id,
        );
        emit(&mut topic, &mut payload, &mut raw);

        let _ = write!(topic, "homeassistant/switch/{}_pwm_test_switch/config", id);
        let _ = write!(
            payload,
            "{{\"name\":\"EVSE PWM Test Switch\",\"command_topic\":\"{}\",\"state_topic\":\"{}\",\"payload_on\":\"enable\",\"payload_off\":\"disable\",\"unique_id\":\"{}_pwm_test_switch\"}}",
            self.topic(SUB_TEST_CURRENT),
            self.topic(PUB_PWM_DUTY),
            id,
        );
        emit(&mut topic, &mut payload, &mut raw);

        let _ = write!(topic, "homeassistant/number/{}_pwm_test/config", id);
        let _ = write!(
            payload,
            "{{\"name\":\"EVSE PWM Test\",\"command_topic\":\"{}\",\"state_topic\":\"{}\",\"unit_of_measurement\":\"%\",\"min\":0,\"max\":100,\"step\":1,\"unique_id\":\"{}_pwm_test\"}}",
            self.topic(SUB_TEST_CURRENT),
            self.topic(PUB_PWM_DUTY),
            id,
        );
        emit(&mut topic, &mut payload, &mut raw);

        let _ = write!(topic, "homeassistant/switch/{}_failsafe/config", id);
        let _ = write!(
            payload,
            "{{\"name\":\"EVSE MQTT Failsafe\",\"command_topic\":\"{}\",\"state_topic\":\"{}\",\"payload_on\":\"1\",\"payload_off\":\"0\",\"unique_id\":\"{}_failsafe\"}}",
            self.topic(SUB_SET_FAILSAFE),
            self.topic(PUB_FAILSAFE),
            id,
        );
        emit(&mut topic, &mut payload, &mut raw);

        let _ = write!(topic, "homeassistant/number/{}_failsafe_t/config", id);
        let _ = write!(
            payload,
            "{{\"name\":\"EVSE Failsafe Timeout\",\"command_topic\":\"{}\",\"state_topic\":\"{}\",\"unit_of_measurement\":\"s\",\"min\":10,\"max\":3600,\"unique_id\":\"{}_failsafe_t\"}}",
            self.topic(SUB_SET_FAILSAFE_TIMEOUT),
            self.topic(PUB_FAILSAFE_TIMEOUT),
            id,
        );
        emit(&mut topic, &mut payload, &mut raw);

        let _ = write!(topic, "homeassistant/binary_sensor/{}_rcm_fault/config", id);
        let _ = write!(
            payload,
            "{{\"name\":\"EVSE RCM Fault\",\"state_topic\":\"{}\",\"payload_on\":\"1\",\"payload_off\":\"0\",\"device_class\":\"safety\",\"unique_id\":\"{}_rcm_fault\"}}",
            self.topic(PUB_RCM_FAULT),
            id,
        );
        emit(&mut topic, &mut payload, &mut raw);

        let _ = write!(topic, "homeassistant/switch/{}_rcm_enable/config", id);
        let _ = write!(
            payload,
            "{{\"name\":\"EVSE RCM Protection\",\"command_topic\":\"{}\",\"state_topic\":\"{}\",\"payload_on\":\"1\",\"payload_off\":\"0\",\"unique_id\":\"{}_rcm_enable\"}}",
            self.topic(SUB_RCM_CONFIG),
            self.topic(PUB_RCM_ENABLED),
            id,
        );
        emit(&mut topic, &mut payload, &mut raw);

        info!("home-automation discovery published");
    }
}
