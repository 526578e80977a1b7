//! Shared mock hardware for the behavioural test suites.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use embassy_time::{Duration, Instant};
use evse_core::charge::{ChargeController, ChargingSettings};
use evse_core::pilot::PilotHardware;
use evse_core::rcm::RcmHardware;
use evse_core::relay::RelayPin;

// Front-end inverse: pilot-line millivolts to the ADC millivolts the
// sampler would report for them. Rounded up so a value right on a
// classification threshold stays on it after the forward conversion
// truncates.
pub fn adc_mv_for_pilot(pilot_mv: i32) -> i32 {
    (pilot_mv as f32 / 6.90 + 1200.0).ceil() as i32
}

#[derive(Default)]
pub struct PilotLog {
    pub attached: bool,
    pub duty_counts: u16,
    pub sampler_running: bool,
}

pub struct MockPilot {
    pub windows: Rc<RefCell<VecDeque<Vec<i32>>>>,
    pub log: Rc<RefCell<PilotLog>>,
}

impl PilotHardware for MockPilot {
    fn pwm_attach(&mut self, duty_counts: u16) {
        let mut log = self.log.borrow_mut();
        log.attached = true;
        log.duty_counts = duty_counts;
    }
    fn pwm_detach_high(&mut self) {
        self.log.borrow_mut().attached = false;
    }
    fn sampler_start(&mut self) {
        self.log.borrow_mut().sampler_running = true;
    }
    fn sampler_stop(&mut self) {
        self.log.borrow_mut().sampler_running = false;
    }
    fn drain_samples(&mut self, sink: &mut dyn FnMut(i32)) {
        if let Some(window) = self.windows.borrow_mut().pop_front() {
            for sample in window {
                sink(sample);
            }
        }
    }
}

pub struct MockRelayPin {
    pub closed: Rc<RefCell<bool>>,
    pub close_commits: Rc<RefCell<u32>>,
}

impl RelayPin for MockRelayPin {
    fn set_closed(&mut self, closed: bool) {
        if closed && !*self.closed.borrow() {
            *self.close_commits.borrow_mut() += 1;
        }
        *self.closed.borrow_mut() = closed;
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum SelfTestBehaviour {
    Pass,
    Fail,
}

pub struct MockRcm {
    pub trip_pending: Rc<RefCell<bool>>,
    pub sense: Rc<RefCell<bool>>,
    pub self_test: Rc<RefCell<SelfTestBehaviour>>,
    pub test_signal: Rc<RefCell<bool>>,
}

impl RcmHardware for MockRcm {
    fn set_test_signal(&mut self, active: bool) {
        *self.test_signal.borrow_mut() = active;
    }
    fn take_trip_event(&mut self) -> bool {
        self.trip_pending.replace(false)
    }
    fn sense_asserted(&mut self) -> bool {
        *self.sense.borrow()
    }
    async fn wait_trip_event(&mut self) {
        match *self.self_test.borrow() {
            SelfTestBehaviour::Pass => {}
            SelfTestBehaviour::Fail => core::future::pending::<()>().await,
        }
    }
}

pub type TestController = ChargeController<MockPilot, MockRelayPin, MockRcm>;

/// A controller wired to mocks plus handles to observe and stimulate them.
pub struct TestEvse {
    pub ctl: TestController,
    pub now: Instant,
    pub windows: Rc<RefCell<VecDeque<Vec<i32>>>>,
    pub pilot_log: Rc<RefCell<PilotLog>>,
    pub relay_closed: Rc<RefCell<bool>>,
    pub close_commits: Rc<RefCell<u32>>,
    pub rcm_trip: Rc<RefCell<bool>>,
    pub rcm_sense: Rc<RefCell<bool>>,
    pub rcm_self_test: Rc<RefCell<SelfTestBehaviour>>,
}

impl TestEvse {
    pub fn new(settings: ChargingSettings) -> Self {
        let windows = Rc::new(RefCell::new(VecDeque::new()));
        let pilot_log = Rc::new(RefCell::new(PilotLog::default()));
        let relay_closed = Rc::new(RefCell::new(false));
        let close_commits = Rc::new(RefCell::new(0));
        let rcm_trip = Rc::new(RefCell::new(false));
        let rcm_sense = Rc::new(RefCell::new(false));
        let rcm_self_test = Rc::new(RefCell::new(SelfTestBehaviour::Pass));

        let now = Instant::now();
        let mut ctl = ChargeController::new(
            MockPilot {
                windows: windows.clone(),
                log: pilot_log.clone(),
            },
            MockRelayPin {
                closed: relay_closed.clone(),
                close_commits: close_commits.clone(),
            },
            MockRcm {
                trip_pending: rcm_trip.clone(),
                sense: rcm_sense.clone(),
                self_test: rcm_self_test.clone(),
                test_signal: Rc::new(RefCell::new(false)),
            },
            settings,
            now,
        );
        ctl.begin();

        Self {
            ctl,
            now,
            windows,
            pilot_log,
            relay_closed,
            close_commits,
            rcm_trip,
            rcm_sense,
            rcm_self_test,
        }
    }

    pub fn advance(&mut self, d: Duration) {
        self.now += d;
    }

    /// Queue one pilot sample window with the given peak pair.
    pub fn push_window(&mut self, high_pilot_mv: i32, low_pilot_mv: i32) {
        self.windows.borrow_mut().push_back(vec![
            adc_mv_for_pilot(low_pilot_mv),
            adc_mv_for_pilot(0),
            adc_mv_for_pilot(high_pilot_mv),
        ]);
    }

    pub async fn cycle(&mut self) {
        self.ctl.run_cycle(self.now).await;
    }

    /// Run `n` cycles 20 ms apart, each fed the same pilot window.
    pub async fn cycles_with_window(&mut self, n: usize, high_pilot_mv: i32, low_pilot_mv: i32) {
        for _ in 0..n {
            self.push_window(high_pilot_mv, low_pilot_mv);
            self.advance(Duration::from_millis(20));
            self.cycle().await;
        }
    }

    /// Drive the pilot from unplugged (clears the boot lockout) to a
    /// connected vehicle.
    pub async fn plug_in(&mut self) {
        self.cycles_with_window(3, 11_000, 11_000).await;
        assert!(!self.ctl.is_error_lockout());
        self.cycles_with_window(4, 8_500, 8_500).await;
    }

    /// Trip the residual current detector.
    pub fn trip_rcm(&mut self) {
        *self.rcm_trip.borrow_mut() = true;
        *self.rcm_sense.borrow_mut() = true;
    }

    pub fn relay_is_closed(&self) -> bool {
        *self.relay_closed.borrow()
    }

    pub fn pilot_attached(&self) -> bool {
        self.pilot_log.borrow().attached
    }
}
