//! Behavioural tests for the charging state machine: the end-to-end
//! scenarios plus the invariants around lockout, clamping and pausing.

mod common;

use common::{SelfTestBehaviour, TestEvse};
use embassy_futures::block_on;
use embassy_time::Duration;
use evse_core::charge::{ChargeState, ChargingSettings, CurrentReading};
use evse_core::pilot::VehicleState;

fn strict_settings() -> ChargingSettings {
    ChargingSettings {
        max_current: 32.0,
        disable_at_low_limit: true,
        open_relay_on_pause: true,
        low_limit_resume_delay_ms: 300_000,
    }
}

fn throttle_settings() -> ChargingSettings {
    ChargingSettings {
        disable_at_low_limit: false,
        ..strict_settings()
    }
}

#[test]
fn cold_plug_and_charge() {
    block_on(async {
        let mut evse = TestEvse::new(strict_settings());

        // Fail-safe boot: locked out until the pilot sees State A.
        assert!(evse.ctl.is_error_lockout());
        assert!(!evse.ctl.start_charging(evse.now).await);

        // Unplugged pattern clears the lockout, plugging in connects.
        evse.plug_in().await;
        assert_eq!(evse.ctl.vehicle_state(), VehicleState::Connected);
        assert!(!evse.ctl.is_error_lockout());

        // Start with RCM enabled: self-test passes, session opens.
        assert!(evse.ctl.start_charging(evse.now).await);
        assert_eq!(evse.ctl.state(), ChargeState::Charging);

        // Vehicle moves to State C; relay closes once the anti-chatter
        // window from boot has elapsed.
        evse.cycles_with_window(3, 6_000, -11_900).await;
        assert_eq!(evse.ctl.vehicle_state(), VehicleState::Ready);
        evse.advance(Duration::from_secs(3));
        evse.cycle().await;
        assert!(evse.relay_is_closed());
        assert!(evse.pilot_attached());
    });
}

#[test]
fn rcm_fault_mid_charge_latches_lockout() {
    block_on(async {
        let mut evse = TestEvse::new(strict_settings());
        evse.plug_in().await;
        assert!(evse.ctl.start_charging(evse.now).await);
        evse.cycles_with_window(3, 6_000, -11_900).await;
        evse.advance(Duration::from_secs(3));
        evse.cycle().await;
        assert!(evse.relay_is_closed());

        // Residual current: the same cycle opens the relay and latches.
        evse.trip_rcm();
        evse.cycle().await;
        assert!(!evse.relay_is_closed());
        assert_eq!(evse.ctl.state(), ChargeState::Ready);
        assert!(evse.ctl.is_error_lockout());
        assert!(evse.ctl.is_rcm_tripped());

        // Locked out until the vehicle is physically unplugged.
        assert!(!evse.ctl.start_charging(evse.now).await);
        evse.cycles_with_window(3, 11_000, 11_000).await;
        assert!(!evse.ctl.is_error_lockout());
        assert!(!evse.ctl.is_rcm_tripped());
    });
}

#[test]
fn solar_throttle_applies_sub_minimum_duty() {
    block_on(async {
        let mut evse = TestEvse::new(throttle_settings());
        evse.plug_in().await;
        assert!(evse.ctl.start_charging(evse.now).await);

        evse.ctl.set_current_limit(4.5, evse.now);
        evse.cycle().await;

        assert!((evse.ctl.pilot_duty() - 7.5).abs() < 0.01);
        assert!(!evse.relay_is_closed());
        assert!(!evse.ctl.is_paused_at_low_limit());
        assert!(evse.pilot_attached());
    });
}

#[test]
fn strict_pause_and_timed_resume() {
    block_on(async {
        let mut evse = TestEvse::new(strict_settings());
        evse.plug_in().await;
        assert!(evse.ctl.start_charging(evse.now).await);
        evse.cycles_with_window(3, 6_000, -11_900).await;
        evse.advance(Duration::from_secs(3));
        evse.cycle().await;
        assert!(evse.relay_is_closed());

        // Limit collapses below 6 A: pause once, relay opens immediately.
        evse.ctl.set_current_limit(5.0, evse.now);
        evse.cycle().await;
        assert!(!evse.relay_is_closed());
        assert!(evse.ctl.is_paused_at_low_limit());
        let paused_duty = evse.ctl.pilot_duty();
        assert!((paused_duty - 5.0 / 0.6).abs() < 0.01);

        // Raising the limit during the cooldown does not resume.
        evse.advance(Duration::from_secs(10));
        evse.ctl.set_current_limit(16.0, evse.now);
        evse.cycle().await;
        assert!(evse.ctl.is_paused_at_low_limit());
        assert!(!evse.relay_is_closed());
        assert!((evse.ctl.pilot_duty() - paused_duty).abs() < 0.01);

        // After the full resume delay the duty re-applies and the relay
        // closes again.
        evse.advance(Duration::from_secs(291));
        evse.cycle().await;
        assert!(!evse.ctl.is_paused_at_low_limit());
        assert!((evse.ctl.pilot_duty() - 16.0 / 0.6).abs() < 0.01);
        // One cycle requests the close, the next commits it.
        evse.cycle().await;
        evse.cycle().await;
        assert!(evse.relay_is_closed());
    });
}

#[test]
fn throttle_alive_ramp_down_to_floor() {
    block_on(async {
        let mut evse = TestEvse::new(strict_settings());
        evse.ctl.set_throttle_alive_timeout(60);
        evse.plug_in().await;
        assert!(evse.ctl.start_charging(evse.now).await);
        evse.ctl.set_current_limit(20.0, evse.now);
        evse.ctl.signal_throttle_alive(evse.now);

        // Still fresh just before the timeout.
        evse.advance(Duration::from_secs(59));
        evse.cycle().await;
        assert_eq!(evse.ctl.current_limit(), 20.0);

        // First decrement fires as soon as the data goes stale.
        evse.advance(Duration::from_secs(2));
        evse.cycle().await;
        assert_eq!(evse.ctl.current_limit(), 19.0);

        // Then one amp every five seconds.
        evse.advance(Duration::from_secs(3));
        evse.cycle().await;
        assert_eq!(evse.ctl.current_limit(), 19.0);
        evse.advance(Duration::from_secs(2));
        evse.cycle().await;
        assert_eq!(evse.ctl.current_limit(), 18.0);

        // Fresh input halts the ramp and re-arms it.
        evse.ctl.signal_throttle_alive(evse.now);
        evse.advance(Duration::from_secs(30));
        evse.cycle().await;
        assert_eq!(evse.ctl.current_limit(), 18.0);

        // Bottom out at the 6 A floor.
        evse.advance(Duration::from_secs(31));
        for _ in 0..40 {
            evse.advance(Duration::from_secs(5));
            evse.cycle().await;
        }
        assert_eq!(evse.ctl.current_limit(), 6.0);
    });
}

#[test]
fn diode_fault_opens_relay_and_locks_out() {
    block_on(async {
        let mut evse = TestEvse::new(strict_settings());
        evse.plug_in().await;
        assert!(evse.ctl.start_charging(evse.now).await);
        evse.cycles_with_window(3, 6_000, -11_900).await;
        evse.advance(Duration::from_secs(3));
        evse.cycle().await;
        assert!(evse.relay_is_closed());

        // High peak says State C but the negative swing is missing: the
        // vehicle diode is gone, classify F and latch.
        evse.cycles_with_window(3, 5_200, -300).await;
        assert_eq!(evse.ctl.vehicle_state(), VehicleState::Error);
        assert!(!evse.relay_is_closed());
        assert!(evse.ctl.is_error_lockout());
        assert_eq!(evse.ctl.state(), ChargeState::Ready);
    });
}

#[test]
fn failed_pre_charge_self_test_aborts_and_latches() {
    block_on(async {
        let mut evse = TestEvse::new(strict_settings());
        evse.plug_in().await;
        *evse.rcm_self_test.borrow_mut() = SelfTestBehaviour::Fail;

        assert!(!evse.ctl.start_charging(evse.now).await);
        assert_eq!(evse.ctl.state(), ChargeState::Ready);
        assert!(evse.ctl.is_error_lockout());
        assert!(evse.ctl.is_rcm_tripped());
    });
}

#[test]
fn start_preconditions_are_enforced() {
    block_on(async {
        let mut evse = TestEvse::new(strict_settings());

        // No vehicle: lockout cleared but State A refuses a start.
        evse.cycles_with_window(3, 11_000, 11_000).await;
        assert!(!evse.ctl.start_charging(evse.now).await);

        evse.cycles_with_window(4, 8_500, 8_500).await;
        assert!(evse.ctl.start_charging(evse.now).await);

        // Double start is rejected without side effects.
        assert!(!evse.ctl.start_charging(evse.now).await);
        assert_eq!(evse.ctl.state(), ChargeState::Charging);
    });
}

#[test]
fn stop_and_pause_differ_in_user_intent() {
    block_on(async {
        let mut evse = TestEvse::new(strict_settings());
        evse.plug_in().await;
        assert!(evse.ctl.start_charging(evse.now).await);

        evse.ctl.pause_charging();
        assert_eq!(evse.ctl.state(), ChargeState::Ready);
        assert!(evse.ctl.is_user_paused());
        assert!(!evse.relay_is_closed());

        assert!(evse.ctl.start_charging(evse.now).await);
        assert!(!evse.ctl.is_user_paused());

        evse.ctl.stop_charging(evse.now);
        assert_eq!(evse.ctl.state(), ChargeState::Ready);
        assert!(!evse.ctl.is_user_paused());
    });
}

#[test]
fn current_limit_clamps_to_configured_maximum() {
    block_on(async {
        let mut evse = TestEvse::new(strict_settings());
        evse.ctl.set_current_limit(50.0, evse.now);
        assert_eq!(evse.ctl.current_limit(), 32.0);
        evse.ctl.set_current_limit(-3.0, evse.now);
        assert_eq!(evse.ctl.current_limit(), 0.0);
    });
}

#[test]
fn allow_below_min_toggle_is_idempotent() {
    block_on(async {
        let mut evse = TestEvse::new(strict_settings());
        evse.ctl.set_allow_below_min(true);
        let first = evse.ctl.status();
        evse.ctl.set_allow_below_min(true);
        assert_eq!(evse.ctl.status(), first);
    });
}

#[test]
fn vehicle_walkaway_stops_charging() {
    block_on(async {
        let mut evse = TestEvse::new(strict_settings());
        evse.plug_in().await;
        assert!(evse.ctl.start_charging(evse.now).await);
        evse.cycles_with_window(3, 6_000, -11_900).await;

        // Unplug mid-session: charging stops, relay opens, and because the
        // pilot reads State A the lockout also stays clear.
        evse.cycles_with_window(3, 11_000, 11_000).await;
        assert_eq!(evse.ctl.state(), ChargeState::Ready);
        assert!(!evse.relay_is_closed());
        assert!(!evse.ctl.is_error_lockout());
    });
}

#[test]
fn test_mode_forces_relay_open_and_rejects_start() {
    block_on(async {
        let mut evse = TestEvse::new(strict_settings());
        evse.plug_in().await;

        evse.ctl.enable_current_test(true);
        evse.ctl.set_current_test(4.0);
        // Test currents floor at the J1772 minimum.
        assert!((evse.ctl.pilot_duty() - 10.0).abs() < 0.01);

        evse.cycle().await;
        assert!(!evse.relay_is_closed());
        assert!(!evse.ctl.start_charging(evse.now).await);

        evse.ctl.enable_current_test(false);
        assert!(evse.ctl.start_charging(evse.now).await);
    });
}

#[test]
fn actual_current_is_observability_only() {
    block_on(async {
        let mut evse = TestEvse::new(strict_settings());
        evse.ctl.update_actual_current(CurrentReading {
            l1: 15.9,
            l2: 16.1,
            l3: 15.8,
        });
        let status = evse.ctl.status();
        assert_eq!(status.actual_current.l2, 16.1);
        // A meter reading never starts or stops anything.
        assert_eq!(evse.ctl.state(), ChargeState::Ready);
    });
}
