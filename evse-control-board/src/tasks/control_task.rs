//! The control task: single owner of the charge controller and therefore of
//! the pilot duty and the relay output. Adapters reach it only through the
//! command channel; observers read the shared status copy.

use embassy_time::{Instant, Ticker};
use evse_core::boot::BootGuard;
use evse_core::charge::{ChargeController, EvseStatus};

use crate::config::CONTROL_CYCLE;
use crate::drivers::pilot::PilotDriver;
use crate::drivers::rcm::RcmDriver;
use crate::drivers::relay::RelayOutput;
use crate::drivers::retained::RtcBackupRegister;
use crate::status::SharedEvseStatus;
use crate::tasks::{CommandReceiver, MeterReceiver};

pub type EvseController = ChargeController<PilotDriver, RelayOutput, RcmDriver>;

#[embassy_executor::task]
pub async fn control_task(
    mut ctl: EvseController,
    mut boot_guard: BootGuard<RtcBackupRegister>,
    commands: CommandReceiver,
    meter: MeterReceiver,
    shared: &'static SharedEvseStatus,
) {
    let started = Instant::now();
    ctl.begin();
    ctl.set_boot_loop(boot_guard.is_boot_loop());

    let mut last_status: Option<EvseStatus> = None;
    let mut ticker = Ticker::every(CONTROL_CYCLE);
    loop {
        let now = Instant::now();

        // Commands accepted this cycle are visible in the published status
        // by the end of it.
        while let Ok(cmd) = commands.try_receive() {
            cmd.apply(&mut ctl, now).await;
        }
        while let Ok(reading) = meter.try_receive() {
            ctl.update_actual_current(reading);
        }

        ctl.run_cycle(now).await;

        boot_guard.service(now.duration_since(started));
        ctl.set_boot_loop(boot_guard.is_boot_loop());

        let status = ctl.status();
        if last_status != Some(status) {
            shared.set(status).await;
            last_status = Some(status);
        }

        ticker.next().await;
    }
}
