//! RTC backup register access for the boot-loop counter. The backup domain
//! survives soft resets and watchdog restarts but not a power cycle, which
//! is exactly the retention class the guard wants.

use embassy_stm32::pac;
use evse_core::boot::RetainedRegister;

pub struct RtcBackupRegister {
    index: usize,
}

impl RtcBackupRegister {
    /// Unlock backup-domain writes and hand out the register cell.
    pub fn take(index: usize) -> Self {
        pac::RCC.apb1enr().modify(|w| w.set_pwren(true));
        pac::PWR.cr().modify(|w| w.set_dbp(true));
        Self { index }
    }
}

impl RetainedRegister for RtcBackupRegister {
    fn read(&self) -> u32 {
        pac::RTC.bkpr(self.index).read().bkp()
    }

    fn write(&mut self, value: u32) {
        pac::RTC.bkpr(self.index).write(|w| w.set_bkp(value));
    }
}
