#![no_std]
#![no_main]

use defmt::info;
use embassy_executor::Spawner;
use embassy_net::{Stack, StackResources};
use embassy_stm32::eth::generic_smi::GenericSMI;
use embassy_stm32::eth::{Ethernet, PacketQueue};
use embassy_stm32::gpio::{Level, Output, Speed};
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::{Input, Pull};
use embassy_stm32::rng::Rng;
use embassy_time::{Duration, Timer};
use rand_core::RngCore;
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

use evse_core::boot::BootGuard;
use evse_core::charge::{ChargeController, ChargingSettings};
use evse_core::config::AppConfig;

use evse_control_board::config::{BOOT_COUNTER_REGISTER, MAC_ADDR};
use evse_control_board::drivers::nv_config::NvConfigStore;
use evse_control_board::drivers::pilot::PilotDriver;
use evse_control_board::drivers::rcm::{rcm_watch_task, RcmDriver, RcmLines};
use evse_control_board::drivers::relay::RelayOutput;
use evse_control_board::drivers::retained::RtcBackupRegister;
use evse_control_board::status::SharedEvseStatus;
use evse_control_board::tasks::control_task::control_task;
use evse_control_board::tasks::mqtt_task::{mqtt_task, parse_ipv4};
use evse_control_board::tasks::ocpp_task::ocpp_task;
use evse_control_board::tasks::web_task::web_task;
use evse_control_board::tasks::{CommandChannel, MeterChannel, NetDevice};
use evse_control_board::SystemIrqs;

static SHARED_STATUS: SharedEvseStatus = SharedEvseStatus::new();
static COMMAND_CHANNEL: CommandChannel = CommandChannel::new();
static METER_CHANNEL: MeterChannel = MeterChannel::new();

static RCM_LINES: RcmLines = RcmLines::new();

static PACKET_QUEUE: StaticCell<PacketQueue<8, 8>> = StaticCell::new();
static STACK_RESOURCES: StaticCell<StackResources<6>> = StaticCell::new();
static NET_STACK: StaticCell<Stack<NetDevice>> = StaticCell::new();

#[embassy_executor::task]
async fn net_task(stack: &'static Stack<NetDevice>) {
    stack.run().await
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let p = embassy_stm32::init(Default::default());
    info!("EVSE control board startup");

    ////////////////////////////////
    //  boot accounting, config   //
    ////////////////////////////////

    let boot_guard = BootGuard::begin(RtcBackupRegister::take(BOOT_COUNTER_REGISTER));

    let nv_store = NvConfigStore::new(p.FLASH);
    let app_config = AppConfig::load(&nv_store);

    //////////////////////////////
    //  charging control chain  //
    //////////////////////////////

    let pilot = PilotDriver::new(p.TIM1, p.PE9, p.ADC1, p.PA3);
    let relay = RelayOutput::new(p.PG6);

    let rcm_sense = ExtiInput::new(Input::new(p.PB0, Pull::Down), p.EXTI0);
    spawner
        .spawn(rcm_watch_task(rcm_sense, &RCM_LINES))
        .expect("failed to spawn rcm watch task");
    let rcm = RcmDriver::new(p.PB1, &RCM_LINES);

    let settings = ChargingSettings {
        max_current: app_config.max_current,
        disable_at_low_limit: !app_config.allow_below_6amp_charging,
        open_relay_on_pause: app_config.pause_relay_immediate,
        low_limit_resume_delay_ms: app_config.low_limit_resume_delay_ms,
    };
    let mut controller =
        ChargeController::new(pilot, relay, rcm, settings, embassy_time::Instant::now());
    controller.set_rcm_enabled(app_config.rcm_enabled);
    controller.set_throttle_alive_timeout(app_config.throttle_alive_timeout_s);

    spawner
        .spawn(control_task(
            controller,
            boot_guard,
            COMMAND_CHANNEL.receiver(),
            METER_CHANNEL.receiver(),
            &SHARED_STATUS,
        ))
        .expect("failed to spawn control task");

    ///////////////
    //  network  //
    ///////////////

    let mut rng = Rng::new(p.RNG, SystemIrqs);
    let mut seed_bytes = [0u8; 8];
    rng.fill_bytes(&mut seed_bytes);
    let seed = u64::from_le_bytes(seed_bytes);

    let device = Ethernet::new(
        PACKET_QUEUE.init(PacketQueue::<8, 8>::new()),
        p.ETH,
        SystemIrqs,
        p.PA1,
        p.PA2,
        p.PC1,
        p.PA7,
        p.PC4,
        p.PC5,
        p.PG13,
        p.PB13,
        p.PG11,
        GenericSMI::new(0),
        MAC_ADDR,
    );

    let net_config = if app_config.use_static_ip {
        match (
            parse_ipv4(&app_config.static_ip),
            parse_ipv4(&app_config.static_gw),
        ) {
            (Some(ip), Some(gw)) => embassy_net::Config::ipv4_static(embassy_net::StaticConfigV4 {
                address: embassy_net::Ipv4Cidr::new(
                    embassy_net::Ipv4Address::new(ip[0], ip[1], ip[2], ip[3]),
                    24,
                ),
                gateway: Some(embassy_net::Ipv4Address::new(gw[0], gw[1], gw[2], gw[3])),
                dns_servers: heapless::Vec::new(),
            }),
            _ => embassy_net::Config::dhcpv4(Default::default()),
        }
    } else {
        embassy_net::Config::dhcpv4(Default::default())
    };

    let stack = NET_STACK.init(Stack::new(
        device,
        net_config,
        STACK_RESOURCES.init(StackResources::new()),
        seed,
    ));
    spawner.spawn(net_task(stack)).expect("failed to spawn net task");

    ///////////////////////////
    //  supervisor adapters  //
    ///////////////////////////

    spawner
        .spawn(mqtt_task(
            stack,
            app_config.clone(),
            COMMAND_CHANNEL.sender(),
            &SHARED_STATUS,
        ))
        .expect("failed to spawn mqtt task");
    spawner
        .spawn(ocpp_task(
            stack,
            app_config.clone(),
            COMMAND_CHANNEL.sender(),
            &SHARED_STATUS,
        ))
        .expect("failed to spawn ocpp task");
    spawner
        .spawn(web_task(stack, COMMAND_CHANNEL.sender(), &SHARED_STATUS))
        .expect("failed to spawn web task");

    // Heartbeat: solid while charging, slow blink idle, fast blink in
    // lockout.
    let mut led = Output::new(p.PB7, Level::Low, Speed::Low);
    loop {
        let status = SHARED_STATUS.get().await;
        if status.charge_state == evse_core::charge::ChargeState::Charging {
            led.set_high();
            Timer::after(Duration::from_millis(500)).await;
        } else {
            led.toggle();
            let period = if status.error_lockout || status.rcm_tripped {
                125
            } else {
                500
            };
            Timer::after(Duration::from_millis(period)).await;
        }
    }
}
