use embassy_stm32::gpio::{Level, Output, Speed};
use evse_core::relay::RelayPin;

use crate::pins::RelayCoilPin;

/// Active-high contactor coil drive.
pub struct RelayOutput {
    pin: Output<'static, RelayCoilPin>,
}

impl RelayOutput {
    pub fn new(pin: RelayCoilPin) -> Self {
        Self {
            pin: Output::new(pin, Level::Low, Speed::Low),
        }
    }
}

impl RelayPin for RelayOutput {
    fn set_closed(&mut self, closed: bool) {
        if closed {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
    }
}
