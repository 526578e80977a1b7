use embassy_stm32::eth::generic_smi::GenericSMI;
use embassy_stm32::eth::Ethernet;
use embassy_stm32::peripherals::ETH;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use evse_core::charge::CurrentReading;
use evse_core::command::Command;

pub mod control_task;
pub mod mqtt_task;
pub mod ocpp_task;
pub mod web_task;

pub type NetDevice = Ethernet<'static, ETH, GenericSMI>;
pub type NetStack = embassy_net::Stack<NetDevice>;

pub const COMMAND_QUEUE_DEPTH: usize = 8;
pub type CommandChannel = Channel<CriticalSectionRawMutex, Command, COMMAND_QUEUE_DEPTH>;
pub type CommandSender = Sender<'static, CriticalSectionRawMutex, Command, COMMAND_QUEUE_DEPTH>;
pub type CommandReceiver = Receiver<'static, CriticalSectionRawMutex, Command, COMMAND_QUEUE_DEPTH>;

pub type MeterChannel = Channel<CriticalSectionRawMutex, CurrentReading, 2>;
pub type MeterReceiver = Receiver<'static, CriticalSectionRawMutex, CurrentReading, 2>;
