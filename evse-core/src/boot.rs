//! Boot-loop detection over a soft-reset-retained register.
//!
//! The backing register survives watchdog resets and crashes but not a power
//! cycle, so a persistent crash loop shows up as a climbing counter while a
//! clean power-on starts fresh.

use embassy_time::Duration;

const BOOT_MAGIC: u32 = 0xBEEF;
const BOOT_LOOP_LIMIT: u16 = 5;

/// Uptime after which the boot is considered stable and the counter clears.
pub const BOOT_STABILITY_WINDOW: Duration = Duration::from_secs(5 * 60);

/// A 32-bit cell that survives soft resets. The board crate maps this onto
/// an RTC backup register.
pub trait RetainedRegister {
    fn read(&self) -> u32;
    fn write(&mut self, value: u32);
}

/// High half: magic signature. Low half: consecutive-boot counter.
pub struct BootGuard<R: RetainedRegister> {
    reg: R,
    count: u16,
    cleared: bool,
}

impl<R: RetainedRegister> BootGuard<R> {
    /// Validate the signature and account for this boot. Call once, early.
    pub fn begin(reg: R) -> Self {
        let mut guard = Self {
            reg,
            count: 0,
            cleared: false,
        };

        let raw = guard.reg.read();
        let magic = raw >> 16;
        let count = if magic != BOOT_MAGIC {
            info!("boot counter signature invalid, resetting");
            1
        } else {
            (raw as u16).saturating_add(1)
        };

        guard.count = count;
        guard.reg.write((BOOT_MAGIC << 16) | count as u32);
        info!("boot counter: {}", count);

        if guard.is_boot_loop() {
            error!("boot loop detected, advisory lockout flag raised");
        }
        guard
    }

    /// Clear the counter once the system has stayed up long enough. Call
    /// periodically with the current uptime.
    pub fn service(&mut self, uptime: Duration) {
        if !self.cleared && self.count > 0 && uptime >= BOOT_STABILITY_WINDOW {
            self.reg.write(BOOT_MAGIC << 16);
            self.count = 0;
            self.cleared = true;
            info!("system stable, boot counter reset");
        }
    }

    /// Advisory: too many boots without a stability window in between.
    pub fn is_boot_loop(&self) -> bool {
        self.count > BOOT_LOOP_LIMIT
    }

    pub fn count(&self) -> u16 {
        self.count
    }
}
