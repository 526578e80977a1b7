//! Pub/sub and local-UI adapter behaviour: topic mapping, command
//! normalisation, publish-on-change and the broker fail-safe.

use embassy_time::Duration;
use evse_core::charge::{ChargeState, CurrentReading, EvseStatus};
use evse_core::command::Command;
use evse_core::mqtt::MqttBus;
use evse_core::pilot::{PilotLevels, VehicleState};
use evse_core::ui::{render_status, route, UiResponse};

fn idle_status() -> EvseStatus {
    EvseStatus {
        charge_state: ChargeState::Ready,
        vehicle_state: VehicleState::NotConnected,
        current_limit: 32.0,
        max_current: 32.0,
        pilot: PilotLevels::default(),
        actual_current: CurrentReading::default(),
        allow_below_min: false,
        low_limit_resume_delay_ms: 300_000,
        throttle_alive_timeout_s: 0,
        rcm_enabled: true,
        rcm_tripped: false,
        error_lockout: true,
        user_paused: false,
        paused_at_low_limit: false,
        current_test: false,
        boot_loop: false,
    }
}

type Published = Vec<(String, String, bool)>;

fn run_message(bus: &mut MqttBus, topic: &str, payload: &str) -> (Vec<Command>, Published) {
    let mut commands = Vec::new();
    let mut published = Published::new();
    bus.handle_message(
        topic,
        payload.as_bytes(),
        &mut |c| commands.push(c),
        &mut |t: &str, p: &str, retain: bool| {
            published.push((t.to_string(), p.to_string(), retain));
        },
    );
    (commands, published)
}

#[test]
fn subscription_topics_cover_the_command_surface() {
    let bus = MqttBus::new("garage", false, 600);
    let topics = bus.subscription_topics();
    let expect = [
        "evse/garage/command",
        "evse/garage/setCurrent",
        "evse/garage/test/current",
        "evse/garage/setAllowBelow6AmpCharging",
        "evse/garage/setFailsafe",
        "evse/garage/setFailsafeTimeout",
        "evse/garage/config/rcm",
    ];
    for (topic, expected) in topics.iter().zip(expect) {
        assert_eq!(topic.as_str(), expected);
    }
    assert_eq!(bus.state_topic().as_str(), "evse/garage/state");
}

#[test]
fn command_topic_maps_to_start_stop_pause() {
    let mut bus = MqttBus::new("garage", false, 600);
    let (cmds, _) = run_message(&mut bus, "evse/garage/command", "start");
    assert_eq!(cmds, vec![Command::Start]);
    let (cmds, _) = run_message(&mut bus, "evse/garage/command", "stop");
    assert_eq!(cmds, vec![Command::Stop]);
    let (cmds, _) = run_message(&mut bus, "evse/garage/command", "pause");
    assert_eq!(cmds, vec![Command::Pause]);
    let (cmds, _) = run_message(&mut bus, "evse/garage/command", "reboot");
    assert!(cmds.is_empty());
}

#[test]
fn foreign_topics_are_ignored() {
    let mut bus = MqttBus::new("garage", false, 600);
    let (cmds, published) = run_message(&mut bus, "evse/driveway/command", "start");
    assert!(cmds.is_empty());
    assert!(published.is_empty());
}

#[test]
fn set_current_parses_floats() {
    let mut bus = MqttBus::new("garage", false, 600);
    let (cmds, _) = run_message(&mut bus, "evse/garage/setCurrent", "16.5");
    assert_eq!(cmds, vec![Command::SetCurrentLimit(16.5)]);
    let (cmds, _) = run_message(&mut bus, "evse/garage/setCurrent", "lots");
    assert!(cmds.is_empty());
}

#[test]
fn allow_below_min_acknowledges_on_the_state_topic() {
    let mut bus = MqttBus::new("garage", false, 600);
    let (cmds, published) =
        run_message(&mut bus, "evse/garage/setAllowBelow6AmpCharging", "enable");
    assert_eq!(cmds, vec![Command::SetAllowBelowMin(true)]);
    assert_eq!(
        published,
        vec![("evse/garage/allowBelow6AmpCharging".to_string(), "1".to_string(), true)]
    );
}

#[test]
fn test_topic_accepts_switch_and_duty_payloads() {
    let mut bus = MqttBus::new("garage", false, 600);

    let (cmds, published) = run_message(&mut bus, "evse/garage/test/current", "enable");
    assert_eq!(cmds, vec![Command::TestMode(true)]);
    assert_eq!(published[0].1, "current_test_enabled");

    let (cmds, published) = run_message(&mut bus, "evse/garage/test/current", "25");
    assert_eq!(cmds, vec![Command::TestDuty(25.0)]);
    // 25 % duty advertises 15 A.
    assert_eq!(published[0].1, "current_test:25.0%->15.00A");

    let (cmds, _) = run_message(&mut bus, "evse/garage/test/current", "off");
    assert_eq!(cmds, vec![Command::TestMode(false)]);
}

#[test]
fn failsafe_timeout_clamps_and_gates_the_stop_decision() {
    let mut bus = MqttBus::new("garage", false, 600);

    let (_, published) = run_message(&mut bus, "evse/garage/setFailsafe", "on");
    assert_eq!(published[0].1, "1");
    assert!(bus.failsafe_enabled());

    let (_, published) = run_message(&mut bus, "evse/garage/setFailsafeTimeout", "5");
    assert_eq!(published[0].1, "10");
    assert_eq!(bus.failsafe_timeout_s(), 10);

    assert!(!bus.failsafe_due(Duration::from_secs(9)));
    assert!(bus.failsafe_due(Duration::from_secs(10)));

    let (_, published) = run_message(&mut bus, "evse/garage/setFailsafe", "off");
    assert_eq!(published[0].1, "0");
    assert!(!bus.failsafe_due(Duration::from_secs(3600)));
}

#[test]
fn publish_on_change_only_sends_diffs() {
    let mut bus = MqttBus::new("garage", false, 600);
    let mut status = idle_status();

    let mut published = Published::new();
    let sink = |published: &mut Published, t: &str, p: &str, retain: bool| {
        published.push((t.to_string(), p.to_string(), retain));
    };

    bus.publish_changes(&status, &mut |t: &str, p: &str, retain: bool| {
        sink(&mut published, t, p, retain)
    });
    let first_count = published.len();
    assert!(first_count >= 4);
    assert!(published.iter().all(|(_, _, retain)| *retain));
    published.clear();

    // Unchanged snapshot: nothing goes out.
    bus.publish_changes(&status, &mut |t: &str, p: &str, retain: bool| {
        sink(&mut published, t, p, retain)
    });
    assert!(published.is_empty());

    // One field changed: exactly that topic publishes.
    status.pilot.duty_percent = 26.67;
    bus.publish_changes(&status, &mut |t: &str, p: &str, retain: bool| {
        sink(&mut published, t, p, retain)
    });
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "evse/garage/pwmDuty");
    assert_eq!(published[0].1, "26.67");
    published.clear();

    status.charge_state = ChargeState::Charging;
    status.actual_current = CurrentReading {
        l1: 15.9,
        l2: 16.0,
        l3: 16.1,
    };
    bus.publish_changes(&status, &mut |t: &str, p: &str, retain: bool| {
        sink(&mut published, t, p, retain)
    });
    let topics: Vec<&str> = published.iter().map(|(t, _, _)| t.as_str()).collect();
    assert!(topics.contains(&"evse/garage/state"));
    assert!(topics.contains(&"evse/garage/current"));
    let current = published
        .iter()
        .find(|(t, _, _)| t == "evse/garage/current")
        .unwrap();
    assert_eq!(current.1, "15.90,16.00,16.10");
}

#[test]
fn connect_syncs_config_and_publishes_discovery() {
    let mut bus = MqttBus::new("garage", true, 900);
    let status = idle_status();

    let mut published = Published::new();
    let sink = |published: &mut Published, t: &str, p: &str, retain: bool| {
        published.push((t.to_string(), p.to_string(), retain));
    };
    bus.on_connected(&status, &mut |t: &str, p: &str, retain: bool| {
        sink(&mut published, t, p, retain)
    });

    let topics: Vec<&str> = published.iter().map(|(t, _, _)| t.as_str()).collect();
    assert!(topics.contains(&"evse/garage/state"));
    assert!(topics.contains(&"evse/garage/failsafeTimeout"));
    assert!(topics.contains(&"evse/garage/rcm/enabled"));
    assert!(topics
        .iter()
        .any(|t| t.starts_with("homeassistant/switch/garage_charging")));
    assert!(topics
        .iter()
        .any(|t| t.starts_with("homeassistant/binary_sensor/garage_rcm_fault")));

    let state = published.iter().find(|(t, _, _)| t == "evse/garage/state").unwrap();
    assert_eq!(state.1, "online");

    // After a reconnect the state topics republish even if unchanged.
    published.clear();
    bus.publish_changes(&status, &mut |t: &str, p: &str, retain: bool| {
        sink(&mut published, t, p, retain)
    });
    assert!(!published.is_empty());
}

#[test]
fn ui_routes_map_one_to_one() {
    let mut cmds = Vec::new();

    assert_eq!(
        route("POST", "/api/start", "", &mut |c: Command| cmds.push(c)),
        UiResponse::Accepted
    );
    assert_eq!(
        route("POST", "/api/stop", "", &mut |c: Command| cmds.push(c)),
        UiResponse::Accepted
    );
    assert_eq!(
        route("POST", "/api/pause", "", &mut |c: Command| cmds.push(c)),
        UiResponse::Accepted
    );
    assert_eq!(
        route("POST", "/api/current", "13.8", &mut |c: Command| cmds.push(c)),
        UiResponse::Accepted
    );
    assert_eq!(
        route("POST", "/api/rcm", "off", &mut |c: Command| cmds.push(c)),
        UiResponse::Accepted
    );
    assert_eq!(
        route("POST", "/api/test", "enable", &mut |c: Command| cmds.push(c)),
        UiResponse::Accepted
    );
    assert_eq!(
        route("POST", "/api/test", "25", &mut |c: Command| cmds.push(c)),
        UiResponse::Accepted
    );
    assert_eq!(
        cmds,
        vec![
            Command::Start,
            Command::Stop,
            Command::Pause,
            Command::SetCurrentLimit(13.8),
            Command::SetRcmEnabled(false),
            Command::TestMode(true),
            Command::TestDuty(25.0),
        ]
    );

    assert_eq!(
        route("POST", "/api/current", "junk", &mut |c: Command| cmds.push(c)),
        UiResponse::BadRequest
    );
    assert_eq!(
        route("GET", "/api/status", "", &mut |c: Command| cmds.push(c)),
        UiResponse::StatusJson
    );
    assert_eq!(
        route("GET", "/api/missing", "", &mut |c: Command| cmds.push(c)),
        UiResponse::NotFound
    );
}

#[test]
fn status_document_carries_the_observables() {
    let mut status = idle_status();
    status.charge_state = ChargeState::Charging;
    status.current_limit = 16.0;
    status.error_lockout = false;

    let mut out = String::new();
    render_status(&status, &mut out).unwrap();
    assert!(out.starts_with('{') && out.ends_with('}'));
    assert!(out.contains("\"state\":1"));
    assert!(out.contains("\"currentLimit\":16.00"));
    assert!(out.contains("\"errorLockout\":false"));
    assert!(out.contains("\"rcmEnabled\":true"));
}
