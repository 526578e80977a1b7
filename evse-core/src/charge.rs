//! The authoritative charging state machine.
//!
//! ASSUMPTIONS:
//! 1. The controller is the only writer of the pilot duty and the relay
//!    target; adapters reach both exclusively through the public operations.
//! 2. Safety failures (RCM trip, failed self-test, pilot fault) latch the
//!    error lockout and only a NotConnected observation clears it.
//! 3. The error lockout starts TRUE at boot so a watchdog restart mid-fault
//!    cannot resume charging on its own.
//! 4. `run_cycle` is called from a single task at the control rate; every
//!    public operation completes in bounded time.

use embassy_time::{Duration, Instant};

use crate::pilot::{Pilot, PilotHardware, PilotLevels, VehicleState, MIN_CURRENT_A};
use crate::rcm::{Rcm, RcmHardware};
use crate::relay::{Relay, RelayPin, RelayState};

/// Stale external control ramps the limit down 1 A per step.
const THROTTLE_RAMP_STEP_A: f32 = 1.0;
/// Spacing between ramp steps once the first one has fired.
const THROTTLE_RAMP_INTERVAL: Duration = Duration::from_secs(5);
/// The ramp never advertises less than the J1772 minimum.
const THROTTLE_RAMP_FLOOR_A: f32 = MIN_CURRENT_A;

/// Detector verification cadence while idle (IEC 62955 guidance).
const RCM_PERIODIC_TEST_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChargeState {
    Ready,
    Charging,
}

impl ChargeState {
    pub fn as_index(self) -> u8 {
        match self {
            ChargeState::Ready => 0,
            ChargeState::Charging => 1,
        }
    }
}

/// Per-phase current report from the meter adapter. Observability only,
/// never gates charging.
#[derive(Clone, Copy, PartialEq, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CurrentReading {
    pub l1: f32,
    pub l2: f32,
    pub l3: f32,
}

/// Tunables the controller owns at runtime. Loaded from the configuration
/// adapter at boot, mutated through the supervisor surface afterwards.
#[derive(Clone, Copy, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChargingSettings {
    pub max_current: f32,
    /// Strict J1772: pause below 6 A. False allows continuous throttling.
    pub disable_at_low_limit: bool,
    /// Open the contactor without the anti-chatter delay when pausing at a
    /// low limit.
    pub open_relay_on_pause: bool,
    /// Cooldown before a low-limit pause may resume.
    pub low_limit_resume_delay_ms: u32,
}

impl Default for ChargingSettings {
    fn default() -> Self {
        Self {
            max_current: 32.0,
            disable_at_low_limit: true,
            open_relay_on_pause: true,
            low_limit_resume_delay_ms: 300_000,
        }
    }
}

/// Copy-out snapshot published to the supervisor adapters. Single writer
/// (the controller), readers get values, never references.
#[derive(Clone, Copy, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EvseStatus {
    pub charge_state: ChargeState,
    pub vehicle_state: VehicleState,
    pub current_limit: f32,
    pub max_current: f32,
    pub pilot: PilotLevels,
    pub actual_current: CurrentReading,
    pub allow_below_min: bool,
    pub low_limit_resume_delay_ms: u32,
    pub throttle_alive_timeout_s: u32,
    pub rcm_enabled: bool,
    pub rcm_tripped: bool,
    pub error_lockout: bool,
    pub user_paused: bool,
    pub paused_at_low_limit: bool,
    pub current_test: bool,
    pub boot_loop: bool,
}

/// Transition summary from one control cycle, so the owning task can publish
/// without diffing every field itself.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CycleOutcome {
    pub charge_state_changed: bool,
    pub vehicle_state_changed: bool,
}

pub struct ChargeController<H, P, M>
where
    H: PilotHardware,
    P: RelayPin,
    M: RcmHardware,
{
    pilot: Pilot<H>,
    relay: Relay<P>,
    rcm: Rcm<M>,

    settings: ChargingSettings,
    state: ChargeState,
    vehicle_state: VehicleState,
    current_limit: f32,
    started: Option<Instant>,
    actual_current: CurrentReading,

    current_test: bool,
    user_paused: bool,
    paused_at_low_limit: bool,
    paused_since: Instant,

    error_lockout: bool,
    rcm_enabled: bool,
    rcm_tripped: bool,
    boot_loop: bool,

    throttle_alive_timeout_s: u32,
    last_throttle_alive: Instant,
    last_throttle_ramp: Instant,
    ramp_primed: bool,

    last_rcm_test: Instant,
}

impl<H, P, M> ChargeController<H, P, M>
where
    H: PilotHardware,
    P: RelayPin,
    M: RcmHardware,
{
    pub fn new(
        pilot_hw: H,
        relay_pin: P,
        rcm_hw: M,
        settings: ChargingSettings,
        now: Instant,
    ) -> Self {
        // Fail-safe: locked out until the pilot proves the vehicle is
        // disconnected. Survives a watchdog reboot mid-fault.
        info!("charge controller starting with error lockout armed");
        Self {
            pilot: Pilot::new(pilot_hw),
            relay: Relay::new(relay_pin, RelayState::Open, now),
            rcm: Rcm::new(rcm_hw),
            current_limit: settings.max_current,
            settings,
            state: ChargeState::Ready,
            vehicle_state: VehicleState::NotConnected,
            started: None,
            actual_current: CurrentReading::default(),
            current_test: false,
            user_paused: false,
            paused_at_low_limit: false,
            paused_since: now,
            error_lockout: true,
            rcm_enabled: true,
            rcm_tripped: false,
            boot_loop: false,
            throttle_alive_timeout_s: 0,
            last_throttle_alive: now,
            last_throttle_ramp: now,
            ramp_primed: true,
            last_rcm_test: now,
        }
    }

    /// Bring up the pilot with the carrier in standby.
    pub fn begin(&mut self) {
        self.pilot.begin();
    }

    /// One control cycle. Call at >= 50 Hz from a single task.
    pub async fn run_cycle(&mut self, now: Instant) -> CycleOutcome {
        let entry_state = self.state;
        let entry_vehicle = self.vehicle_state;

        // 1. Residual current trip: emergency stop and latch.
        if self.rcm_enabled && self.rcm.is_triggered().await {
            error!("RCM fault detected, emergency stop");
            self.relay.open_immediately();
            self.stop_charging(now);
            self.rcm_tripped = true;
            if !self.error_lockout {
                self.error_lockout = true;
                warn!("error lockout armed by RCM fault");
            }
        }

        // 2. Periodic detector verification, never while charging.
        if self.rcm_enabled
            && self.state != ChargeState::Charging
            && now.duration_since(self.last_rcm_test) >= RCM_PERIODIC_TEST_INTERVAL
        {
            info!("running periodic 24h RCM self-test");
            if self.rcm.self_test().await {
                self.last_rcm_test = now;
            } else {
                self.rcm_tripped = true;
                self.error_lockout = true;
                self.relay.open_immediately();
            }
        }

        // 3. Advance the relay anti-chatter state machine.
        self.relay.poll(now);

        // 4. Refresh the vehicle state from the pilot.
        self.update_vehicle_state(now);

        // 5. Drive PWM and relay from (vehicle state, charge state).
        self.manage_pwm_and_relay(now);

        // 6. Timed resume from a low-limit pause.
        self.check_resume_from_low_limit(now);

        // 7. ThrottleAlive: de-rate when external control goes stale.
        self.check_throttle_alive(now);

        CycleOutcome {
            charge_state_changed: self.state != entry_state,
            vehicle_state_changed: self.vehicle_state != entry_vehicle,
        }
    }

    fn update_vehicle_state(&mut self, now: Instant) {
        let new_state = self.pilot.read();
        if new_state != self.vehicle_state {
            self.vehicle_state = new_state;
            info!("vehicle state: {}", new_state.description());

            if self.state == ChargeState::Charging && !new_state.charge_permissive() {
                self.stop_charging(now);
            }
        }

        // Lockout bookkeeping is observation based, not edge based: any
        // cycle that sees a fault state arms it, any cycle that sees the
        // vehicle disconnected disarms it.
        match self.vehicle_state {
            VehicleState::Error | VehicleState::NoPower => {
                if !self.error_lockout {
                    self.error_lockout = true;
                    warn!(
                        "error lockout armed: {}",
                        self.vehicle_state.description()
                    );
                }
            }
            VehicleState::NotConnected => {
                if self.error_lockout {
                    self.error_lockout = false;
                    self.rcm_tripped = false;
                    warn!("error lockout cleared: vehicle disconnected");
                }
            }
            _ => {}
        }
    }

    /// SAE J1772 output step: the (vehicle state, charge state) table that
    /// owns the pilot duty and the relay target.
    fn manage_pwm_and_relay(&mut self, now: Instant) {
        // Test mode: pilot stays wherever the test surface put it, the
        // contactor is held open.
        if self.current_test {
            self.relay.open();
            return;
        }

        match self.vehicle_state {
            VehicleState::NotConnected | VehicleState::NoPower => {
                self.pilot.standby();
                self.relay.open();
                self.paused_at_low_limit = false;
            }
            VehicleState::Error => {
                self.pilot.standby();
                self.relay.open_immediately();
            }
            VehicleState::Connected
            | VehicleState::Ready
            | VehicleState::ReadyVentilationRequired => {
                if self.state != ChargeState::Charging {
                    // B1/C1: present but not authorised, offer steady +12 V.
                    self.pilot.standby();
                    self.relay.open();
                    return;
                }

                let vehicle_ready = matches!(
                    self.vehicle_state,
                    VehicleState::Ready | VehicleState::ReadyVentilationRequired
                );

                if self.current_limit >= MIN_CURRENT_A {
                    if self.paused_at_low_limit {
                        // Waiting out the resume cooldown: hold the reduced
                        // duty, keep the contactor open.
                        self.relay.open();
                    } else {
                        self.pilot.set_current_limit(self.current_limit);
                        if vehicle_ready {
                            self.relay.close();
                        } else {
                            // State B while authorised: advertise capability,
                            // the close gate is the C transition.
                            self.relay.open();
                        }
                    }
                } else if self.settings.disable_at_low_limit {
                    // Strict mode: sub-minimum duty reads as reduced
                    // capability, contactor opens for the pause.
                    self.pilot.set_current_limit(self.current_limit);
                    if self.settings.open_relay_on_pause {
                        self.relay.open_immediately();
                    } else {
                        self.relay.open();
                    }
                    if !self.paused_at_low_limit {
                        info!(
                            "low-limit pause: pilot duty held at {} A",
                            self.current_limit
                        );
                        self.paused_at_low_limit = true;
                        self.paused_since = now;
                    }
                } else {
                    // Throttle mode: advertise the sub-minimum limit
                    // directly, no pause bookkeeping.
                    self.pilot.set_current_limit(self.current_limit);
                    self.paused_at_low_limit = false;
                    if vehicle_ready {
                        self.relay.close();
                    } else {
                        self.relay.open();
                    }
                }
            }
        }
    }

    fn check_resume_from_low_limit(&mut self, now: Instant) {
        if self.paused_at_low_limit
            && self.current_limit >= MIN_CURRENT_A
            && now.duration_since(self.paused_since)
                >= Duration::from_millis(self.settings.low_limit_resume_delay_ms as u64)
        {
            info!("low-limit pause delay elapsed, resuming pilot PWM");
            self.pilot.set_current_limit(self.current_limit);
            self.paused_at_low_limit = false;
        }
    }

    fn check_throttle_alive(&mut self, now: Instant) {
        if self.throttle_alive_timeout_s == 0 || self.state != ChargeState::Charging {
            return;
        }
        let timeout = Duration::from_secs(self.throttle_alive_timeout_s as u64);
        if now.duration_since(self.last_throttle_alive) > timeout {
            // Stale control data: walk the limit down towards the floor.
            if self.current_limit > THROTTLE_RAMP_FLOOR_A
                && (self.ramp_primed
                    || now.duration_since(self.last_throttle_ramp) >= THROTTLE_RAMP_INTERVAL)
            {
                let mut next = self.current_limit - THROTTLE_RAMP_STEP_A;
                if next < THROTTLE_RAMP_FLOOR_A {
                    next = THROTTLE_RAMP_FLOOR_A;
                }
                warn!(
                    "ThrottleAlive stale, ramping {} A -> {} A",
                    self.current_limit, next
                );
                self.set_current_limit(next, now);
                self.last_throttle_ramp = now;
                self.ramp_primed = false;
            }
        } else {
            // Fresh data: prime the ramp so the first step fires the moment
            // the timeout elapses.
            self.ramp_primed = true;
        }
    }

    /// Start a charge session. Refused while locked out, already charging or
    /// without a vehicle; with RCM enabled the detector must pass a
    /// self-test first.
    pub async fn start_charging(&mut self, now: Instant) -> bool {
        info!("start charging requested");

        if self.error_lockout {
            warn!("start ignored: error lockout active (disconnect vehicle to clear)");
            return false;
        }
        if self.current_test {
            warn!("start ignored: test mode active");
            return false;
        }
        if self.state == ChargeState::Charging {
            warn!("start ignored: already charging");
            return false;
        }
        if !self.vehicle_state.charge_permissive() {
            warn!(
                "start ignored: vehicle not ready ({})",
                self.vehicle_state.description()
            );
            return false;
        }

        // The detector must be proven functional before the contactor may
        // ever close.
        if self.rcm_enabled {
            if !self.rcm.self_test().await {
                error!("pre-charge RCM test failed, aborting charge");
                self.rcm_tripped = true;
                self.error_lockout = true;
                self.relay.open_immediately();
                return false;
            }
            self.last_rcm_test = now;
        }

        info!("charging started");
        self.state = ChargeState::Charging;
        self.started = Some(now);
        self.user_paused = false;
        self.last_throttle_alive = now;
        self.ramp_primed = true;
        true
    }

    /// Unconditional stop: the contactor opens in the same cycle.
    pub fn stop_charging(&mut self, _now: Instant) {
        self.relay.open_immediately();
        self.user_paused = false;
        if self.state != ChargeState::Charging {
            return;
        }
        info!("charging stopped");
        self.state = ChargeState::Ready;
    }

    /// Pause: like stop, but remembers that the user asked for it.
    pub fn pause_charging(&mut self) {
        if self.state == ChargeState::Charging {
            info!("charging paused by user");
            self.relay.open_immediately();
            self.state = ChargeState::Ready;
            self.user_paused = true;
        } else {
            warn!("pause ignored: not charging");
        }
    }

    /// Clamp and apply a new current limit.
    pub fn set_current_limit(&mut self, amps: f32, _now: Instant) {
        let amps = amps.clamp(0.0, self.settings.max_current);
        if amps != self.current_limit {
            info!("current limit set to {} A", amps);
            self.current_limit = amps;
        }
    }

    /// Switch between strict J1772 (pause under 6 A) and continuous
    /// throttling.
    pub fn set_allow_below_min(&mut self, allow: bool) {
        self.settings.disable_at_low_limit = !allow;
        info!(
            "below-minimum charging {}",
            if allow { "allowed (throttle)" } else { "disabled (strict J1772)" }
        );
    }

    pub fn allow_below_min(&self) -> bool {
        !self.settings.disable_at_low_limit
    }

    pub fn set_low_limit_resume_delay(&mut self, ms: u32) {
        self.settings.low_limit_resume_delay_ms = ms;
        info!("low-limit resume delay set to {} ms", ms);
    }

    pub fn set_throttle_alive_timeout(&mut self, seconds: u32) {
        self.throttle_alive_timeout_s = seconds;
        info!("ThrottleAlive timeout set to {} s", seconds);
    }

    /// External supervisors call this with every command they forward.
    pub fn signal_throttle_alive(&mut self, now: Instant) {
        self.last_throttle_alive = now;
    }

    pub fn set_rcm_enabled(&mut self, enable: bool) {
        self.rcm_enabled = enable;
        info!("RCM supervision {}", if enable { "enabled" } else { "disabled" });
    }

    /// Enter or leave test mode. Refused while charging; the pilot drops to
    /// standby on both edges.
    pub fn enable_current_test(&mut self, enable: bool) {
        if enable && self.state == ChargeState::Charging {
            warn!("test mode rejected: charging active");
            return;
        }
        self.current_test = enable;
        info!("test mode {}", if enable { "enabled" } else { "disabled" });
        self.pilot.standby();
    }

    /// Drive the pilot at a test current. Only honoured in test mode.
    pub fn set_current_test(&mut self, amps: f32) {
        if !self.current_test {
            return;
        }
        let amps = if amps < MIN_CURRENT_A { MIN_CURRENT_A } else { amps };
        info!("test current set to {} A", amps);
        self.pilot.set_current_limit(amps);
    }

    /// Meter adapter feed. Observability only.
    pub fn update_actual_current(&mut self, reading: CurrentReading) {
        self.actual_current = reading;
    }

    /// Advisory flag from the boot-loop guard, surfaced through the status.
    pub fn set_boot_loop(&mut self, boot_loop: bool) {
        self.boot_loop = boot_loop;
    }

    pub fn state(&self) -> ChargeState {
        self.state
    }

    pub fn vehicle_state(&self) -> VehicleState {
        self.vehicle_state
    }

    pub fn current_limit(&self) -> f32 {
        self.current_limit
    }

    pub fn pilot_duty(&self) -> f32 {
        self.pilot.duty_percent()
    }

    pub fn is_error_lockout(&self) -> bool {
        self.error_lockout
    }

    pub fn is_rcm_tripped(&self) -> bool {
        self.rcm_tripped
    }

    pub fn is_rcm_enabled(&self) -> bool {
        self.rcm_enabled
    }

    pub fn is_user_paused(&self) -> bool {
        self.user_paused
    }

    pub fn is_paused_at_low_limit(&self) -> bool {
        self.paused_at_low_limit
    }

    pub fn relay_closed(&self) -> bool {
        self.relay.is_closed()
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        match self.started {
            Some(t) => now.duration_since(t),
            None => Duration::from_ticks(0),
        }
    }

    pub fn status(&self) -> EvseStatus {
        EvseStatus {
            charge_state: self.state,
            vehicle_state: self.vehicle_state,
            current_limit: self.current_limit,
            max_current: self.settings.max_current,
            pilot: self.pilot.levels(),
            actual_current: self.actual_current,
            allow_below_min: !self.settings.disable_at_low_limit,
            low_limit_resume_delay_ms: self.settings.low_limit_resume_delay_ms,
            throttle_alive_timeout_s: self.throttle_alive_timeout_s,
            rcm_enabled: self.rcm_enabled,
            rcm_tripped: self.rcm_tripped,
            error_lockout: self.error_lockout,
            user_paused: self.user_paused,
            paused_at_low_limit: self.paused_at_low_limit,
            current_test: self.current_test,
            boot_loop: self.boot_loop,
        }
    }
}
