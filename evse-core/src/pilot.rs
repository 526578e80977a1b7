//! SAE J1772 control pilot: 1 kHz PWM generation, pilot feedback
//! classification and the amps <-> duty mapping.

use libm::roundf;

/// Advertised current limits the J1772 duty encoding can express.
pub const MIN_CURRENT_A: f32 = 6.0;
pub const MAX_CURRENT_A: f32 = 80.0;

pub const PILOT_PWM_FREQ_HZ: u32 = 1_000;
pub const PILOT_PWM_RESOLUTION_BITS: u8 = 12;
pub const PILOT_PWM_MAX_DUTY_COUNTS: u16 = (1 << PILOT_PWM_RESOLUTION_BITS) - 1;

/// Pilot feedback is oversampled at 40x the carrier so the peaks of every
/// cycle land in the window.
pub const PILOT_SAMPLE_RATE_HZ: u32 = 40 * PILOT_PWM_FREQ_HZ;
/// A read must cover at least two full carrier periods.
pub const PILOT_MIN_WINDOW_SAMPLES: usize = (2 * PILOT_SAMPLE_RATE_HZ / PILOT_PWM_FREQ_HZ) as usize;

// J1772 duty encoding. 6..=51 A map linearly at 0.6 A per percent, the
// extended range above 51 A switches to 2.5 A per percent with a 64 % offset.
const J1772_LOW_RANGE_MAX_AMPS: f32 = 51.0;
const J1772_LOW_RANGE_MAX_DUTY: f32 = 85.0;
const J1772_LOW_RANGE_FACTOR: f32 = 0.6;
const J1772_HIGH_RANGE_FACTOR: f32 = 2.5;
const J1772_HIGH_RANGE_OFFSET: f32 = 64.0;

// Analog front end: 15k series into a 5k6/4k7 divider biased to 3v3 behind a
// follower. Vx reads 1200 mV with the pilot line at 0 V and each pilot-line
// millivolt moves the ADC by 1/6.9 mV.
const ZERO_OFFSET_MV: f32 = 1200.0;
const SCALE: f32 = 6.90;

// Positive-peak classification thresholds on the reconstructed pilot line.
const VOLTAGE_STATE_NOT_CONNECTED_MV: i32 = 10_600;
const VOLTAGE_STATE_CONNECTED_MV: i32 = 8_000;
const VOLTAGE_STATE_READY_MV: i32 = 5_000;
const VOLTAGE_STATE_VENTILATION_MV: i32 = 2_000;

// Diode check: with the PWM attached a healthy vehicle diode lets the
// negative half-cycle swing well below ground. A low peak that never reaches
// this level means the diode is missing or shorted (state F).
const DIODE_LOW_PEAK_MAX_MV: i32 = -1_000;

/// Consecutive identical classifications required before a state commits.
const DEBOUNCE_STABLE_READS: u8 = 3;

/// J1772 vehicle states as seen from the EVSE side of the pilot.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VehicleState {
    /// State A, pilot at +12 V.
    NotConnected,
    /// State B, vehicle present but not ready to draw.
    Connected,
    /// State C, vehicle ready, charging permitted.
    Ready,
    /// State D, ready but ventilation required.
    ReadyVentilationRequired,
    /// State E, pilot at 0 V.
    NoPower,
    /// State F or failed diode check.
    Error,
}

impl VehicleState {
    /// Wire encoding used by the pub/sub state topic.
    pub fn as_index(self) -> u8 {
        match self {
            VehicleState::NotConnected => 0,
            VehicleState::Connected => 1,
            VehicleState::Ready => 2,
            VehicleState::ReadyVentilationRequired => 3,
            VehicleState::NoPower => 4,
            VehicleState::Error => 5,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            VehicleState::NotConnected => "A: Standby",
            VehicleState::Connected => "B: Vehicle Detected",
            VehicleState::Ready => "C: Charging",
            VehicleState::ReadyVentilationRequired => "D: Ventilation Req",
            VehicleState::NoPower => "E: No Power",
            VehicleState::Error => "F: Fault/Error",
        }
    }

    /// True for the states in which the vehicle may draw current.
    pub fn charge_permissive(self) -> bool {
        matches!(
            self,
            VehicleState::Connected
                | VehicleState::Ready
                | VehicleState::ReadyVentilationRequired
        )
    }
}

/// Peak millivolt pair and duty from the most recent pilot read.
#[derive(Clone, Copy, PartialEq, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PilotLevels {
    pub high_mv: i32,
    pub low_mv: i32,
    pub duty_percent: f32,
}

/// Advertised amps to PWM duty percent, clamped to the encodable range.
pub fn amps_to_duty(amps: f32) -> f32 {
    let amps = amps.clamp(MIN_CURRENT_A, MAX_CURRENT_A);
    raw_amps_to_duty(amps)
}

// Unclamped low end: the low-limit throttling path advertises sub-minimum
// capability by extending the linear region below 6 A.
fn raw_amps_to_duty(amps: f32) -> f32 {
    if amps <= J1772_LOW_RANGE_MAX_AMPS {
        amps / J1772_LOW_RANGE_FACTOR
    } else {
        amps / J1772_HIGH_RANGE_FACTOR + J1772_HIGH_RANGE_OFFSET
    }
}

/// Inverse of [`amps_to_duty`], used when a UI or test surface supplies duty.
pub fn duty_to_amps(duty: f32) -> f32 {
    if duty <= J1772_LOW_RANGE_MAX_DUTY {
        duty * J1772_LOW_RANGE_FACTOR
    } else {
        (duty - J1772_HIGH_RANGE_OFFSET) * J1772_HIGH_RANGE_FACTOR
    }
}

/// PWM and sampler backend the pilot drives. The board crate maps this onto
/// a timer channel and a DMA ring-buffered ADC; tests feed it canned windows.
pub trait PilotHardware {
    /// Attach (or retune) the 1 kHz carrier at the given duty counts.
    fn pwm_attach(&mut self, duty_counts: u16);
    /// Detach the carrier and hold the line statically high (+12 V).
    fn pwm_detach_high(&mut self);
    /// Start continuous sampling into the backing ring buffer.
    fn sampler_start(&mut self);
    /// Fully quiesce the sampler (firmware-update path only).
    fn sampler_stop(&mut self);
    /// Drain every sample buffered since the previous call. Values are ADC
    /// millivolts before front-end scaling.
    fn drain_samples(&mut self, sink: &mut dyn FnMut(i32));
    /// Whether factory ADC calibration was available at init.
    fn calibration_valid(&self) -> bool {
        true
    }
}

/// Control pilot driver: owns the carrier, the feedback window and the
/// debounced vehicle state classification.
pub struct Pilot<H: PilotHardware> {
    hw: H,
    levels: PilotLevels,
    pwm_attached: bool,
    committed: VehicleState,
    candidate: VehicleState,
    stable_reads: u8,
    first_read_done: bool,
    warned_uncalibrated: bool,
}

impl<H: PilotHardware> Pilot<H> {
    pub fn new(hw: H) -> Self {
        Self {
            hw,
            levels: PilotLevels::default(),
            pwm_attached: false,
            committed: VehicleState::NotConnected,
            candidate: VehicleState::NotConnected,
            stable_reads: 0,
            first_read_done: false,
            warned_uncalibrated: false,
        }
    }

    /// Bring up the sampler with the carrier detached (line held high).
    pub fn begin(&mut self) {
        self.hw.sampler_start();
        self.standby();
        if !self.hw.calibration_valid() {
            warn!("pilot ADC calibration unavailable, classification accuracy degraded");
            self.warned_uncalibrated = true;
        }
        info!("pilot sampler started");
    }

    /// Detach the carrier: steady +12 V, "no power available".
    pub fn standby(&mut self) {
        if self.pwm_attached {
            debug!("pilot PWM detached for standby");
            self.pwm_attached = false;
        }
        self.hw.pwm_detach_high();
        self.levels.duty_percent = 0.0;
    }

    /// Standby, then quiesce the ADC. Only the firmware-update flow calls
    /// this; the pilot is unusable afterwards until `begin()`.
    pub fn stop(&mut self) {
        self.standby();
        self.hw.sampler_stop();
    }

    /// Advertise a current limit on the carrier, attaching it if needed.
    /// The low end is deliberately not clamped at 6 A so the controller can
    /// signal reduced capability while throttling.
    pub fn set_current_limit(&mut self, amps: f32) {
        let duty = raw_amps_to_duty(amps.clamp(0.0, MAX_CURRENT_A));
        let counts = roundf(duty / 100.0 * PILOT_PWM_MAX_DUTY_COUNTS as f32) as u16;
        self.hw.pwm_attach(counts);
        self.pwm_attached = true;
        self.levels.duty_percent = duty;
    }

    /// Drain the sample window, classify and debounce. Returns the committed
    /// vehicle state; an empty window returns the previous one unchanged.
    pub fn read(&mut self) -> VehicleState {
        let mut high_raw = i32::MIN;
        let mut low_raw = i32::MAX;
        let mut count: usize = 0;
        self.hw.drain_samples(&mut |mv| {
            if mv > high_raw {
                high_raw = mv;
            }
            if mv < low_raw {
                low_raw = mv;
            }
            count += 1;
        });

        if count == 0 {
            return self.committed;
        }

        self.levels.high_mv = convert_mv(high_raw);
        self.levels.low_mv = convert_mv(low_raw);

        let mut detected = if self.levels.high_mv >= VOLTAGE_STATE_NOT_CONNECTED_MV {
            VehicleState::NotConnected
        } else if self.levels.high_mv >= VOLTAGE_STATE_CONNECTED_MV {
            VehicleState::Connected
        } else if self.levels.high_mv >= VOLTAGE_STATE_READY_MV {
            VehicleState::Ready
        } else if self.levels.high_mv >= VOLTAGE_STATE_VENTILATION_MV {
            VehicleState::ReadyVentilationRequired
        } else {
            VehicleState::NoPower
        };

        // Diode check: under PWM the negative half-cycle must swing below
        // the -12 V threshold, otherwise the vehicle diode is compromised.
        if self.pwm_attached
            && detected != VehicleState::NotConnected
            && self.levels.low_mv > DIODE_LOW_PEAK_MAX_MV
        {
            detected = VehicleState::Error;
        }

        if !self.first_read_done {
            self.first_read_done = true;
            self.candidate = detected;
            self.stable_reads = 1;
            self.committed = detected;
            return self.committed;
        }

        if detected == self.candidate {
            self.stable_reads = self.stable_reads.saturating_add(1);
        } else {
            self.candidate = detected;
            self.stable_reads = 1;
        }

        if self.stable_reads >= DEBOUNCE_STABLE_READS && self.candidate != self.committed {
            self.committed = self.candidate;
            debug!(
                "pilot stable change: {} (H:{}mV L:{}mV)",
                self.committed.description(),
                self.levels.high_mv,
                self.levels.low_mv
            );
        }

        self.committed
    }

    pub fn levels(&self) -> PilotLevels {
        self.levels
    }

    pub fn duty_percent(&self) -> f32 {
        self.levels.duty_percent
    }

    pub fn pwm_attached(&self) -> bool {
        self.pwm_attached
    }

    pub fn vehicle_state(&self) -> VehicleState {
        self.committed
    }
}

// ADC millivolts to pilot-line millivolts through the front-end transfer.
fn convert_mv(adc_mv: i32) -> i32 {
    ((adc_mv as f32 - ZERO_OFFSET_MV) * SCALE) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duty_mapping_matches_published_points() {
        assert!((amps_to_duty(6.0) - 10.0).abs() < 0.01);
        assert!((amps_to_duty(51.0) - 85.0).abs() < 0.01);
        assert!((amps_to_duty(80.0) - 96.0).abs() < 0.01);
        assert!((duty_to_amps(10.0) - 6.0).abs() < 0.01);
        assert!((duty_to_amps(96.0) - 80.0).abs() < 0.01);
    }

    #[test]
    fn duty_mapping_clamps_input() {
        assert!((amps_to_duty(3.0) - 10.0).abs() < 0.01);
        assert!((amps_to_duty(120.0) - 96.0).abs() < 0.01);
    }
}
