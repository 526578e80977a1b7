//! Board constants: control rates, front-end calibration and identity.

use embassy_time::Duration;

/// Control cycle period. The state machine wants >= 50 Hz so a relay-open
/// decision lands within 20 ms of its cause.
pub const CONTROL_CYCLE: Duration = Duration::from_millis(20);

// Pilot feedback front end: 15k series resistor into a 5k6 (to 3v3) / 4k7
// (to ground) divider behind a rail-to-rail follower. The divider bias puts
// 0 V on the pilot line at ~1200 mV on the ADC; the scale back to the pilot
// line is 6.9 mV per ADC mV. Both constants live in evse-core's pilot
// module; what the board owns is the raw-counts-to-millivolt conversion.
pub const ADC_VREF_MV: u32 = 3300;
pub const ADC_FULL_SCALE: u32 = 4095;

/// Sampling window per pilot read: two full 1 kHz carrier periods.
pub const PILOT_SAMPLE_WINDOW: Duration = Duration::from_micros(2000);

/// Device identity used for broker topics and the OCPP charge point id.
pub const DEVICE_ID: &str = "evse-01";

/// MAC address for the wired interface (locally administered).
pub const MAC_ADDR: [u8; 6] = [0x02, 0x00, 0x00, 0xE5, 0x5E, 0x01];

/// Byte offset of the configuration sector within internal flash
/// (sector 23 on the 2 MB F429, well clear of the firmware image).
pub const CONFIG_FLASH_OFFSET: u32 = 0x1E_0000;
pub const CONFIG_FLASH_SIZE: u32 = 0x2_0000;

/// RTC backup register index holding the boot-loop counter.
pub const BOOT_COUNTER_REGISTER: usize = 0;
