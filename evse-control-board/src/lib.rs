#![no_std]

use embassy_stm32::{bind_interrupts, eth, peripherals, rng};

pub mod config;
pub mod drivers;
pub mod pins;
pub mod status;
pub mod tasks;

bind_interrupts!(pub struct SystemIrqs {
    ETH => eth::InterruptHandler;
    HASH_RNG => rng::InterruptHandler<peripherals::RNG>;
});
