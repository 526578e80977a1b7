//! Pilot PWM and feedback sampling on TIM1 + ADC1.
//!
//! The carrier runs on TIM1 CH1 at 1 kHz. "Detached" holds the line
//! statically high by parking the compare register at 100 %, which is what
//! the op-amp stage turns into a steady +12 V.
//!
//! Sampling uses the oneshot fallback from the core contract: each
//! `drain_samples` call busy-reads the ADC for two full carrier periods,
//! which at the F4's conversion rate comfortably catches both peaks.
//! (Continuous DMA into a ring buffer is the preferred configuration where
//! the ADC driver offers it.)

use embassy_stm32::adc::Adc;
use embassy_stm32::gpio::OutputType;
use embassy_stm32::time::hz;
use embassy_stm32::timer::simple_pwm::{PwmPin, SimplePwm};
use embassy_stm32::timer::Channel;
use embassy_time::{Delay, Instant};
use evse_core::pilot::{PilotHardware, PILOT_PWM_FREQ_HZ, PILOT_PWM_MAX_DUTY_COUNTS};

use crate::config::{ADC_FULL_SCALE, ADC_VREF_MV, PILOT_SAMPLE_WINDOW};
use crate::pins::{PilotAdc, PilotPwmPin, PilotPwmTimer, PilotSensePin};

pub struct PilotDriver {
    pwm: SimplePwm<'static, PilotPwmTimer>,
    adc: Adc<'static, PilotAdc>,
    sense: PilotSensePin,
    sampling: bool,
}

impl PilotDriver {
    pub fn new(
        tim: PilotPwmTimer,
        pwm_pin: PilotPwmPin,
        adc: PilotAdc,
        sense: PilotSensePin,
    ) -> Self {
        let pwm_pin = PwmPin::new_ch1(pwm_pin, OutputType::PushPull);
        let mut pwm = SimplePwm::new(
            tim,
            Some(pwm_pin),
            None,
            None,
            None,
            hz(PILOT_PWM_FREQ_HZ),
            Default::default(),
        );
        // Park high until the controller asks for a carrier.
        let max = pwm.get_max_duty();
        pwm.set_duty(Channel::Ch1, max);
        pwm.enable(Channel::Ch1);

        let mut delay = Delay;
        let adc = Adc::new(adc, &mut delay);

        Self {
            pwm,
            adc,
            sense,
            sampling: false,
        }
    }

    fn raw_to_mv(raw: u16) -> i32 {
        (raw as u32 * ADC_VREF_MV / ADC_FULL_SCALE) as i32
    }
}

impl PilotHardware for PilotDriver {
    fn pwm_attach(&mut self, duty_counts: u16) {
        let max = self.pwm.get_max_duty() as u32;
        let duty = duty_counts as u32 * max / PILOT_PWM_MAX_DUTY_COUNTS as u32;
        self.pwm.set_duty(Channel::Ch1, duty as u16);
    }

    fn pwm_detach_high(&mut self) {
        let max = self.pwm.get_max_duty();
        self.pwm.set_duty(Channel::Ch1, max);
    }

    fn sampler_start(&mut self) {
        self.sampling = true;
    }

    fn sampler_stop(&mut self) {
        self.sampling = false;
    }

    fn drain_samples(&mut self, sink: &mut dyn FnMut(i32)) {
        if !self.sampling {
            return;
        }
        let started = Instant::now();
        while Instant::now().duration_since(started) < PILOT_SAMPLE_WINDOW {
            let raw = self.adc.read(&mut self.sense);
            sink(Self::raw_to_mv(raw));
        }
    }

    fn calibration_valid(&self) -> bool {
        // The F4 front end is referenced to the 3v3 rail directly.
        true
    }
}
