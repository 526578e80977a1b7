use embassy_stm32::peripherals::*;

///////////////////
//  pilot drive  //
///////////////////

pub type PilotPwmTimer = TIM1; // ch1
pub type PilotPwmPin = PE9;
pub type PilotAdc = ADC1;
pub type PilotSensePin = PA3;

/////////////////
//  contactor  //
/////////////////

pub type RelayCoilPin = PG6;

///////////////////////////////
//  residual current monitor //
///////////////////////////////

pub type RcmSensePin = PB0;
pub type RcmSenseExti = EXTI0;
pub type RcmTestPin = PB1;

///////////////
//  user IO  //
///////////////

pub type HeartbeatLedPin = PB7;

////////////////
//  ethernet  //
////////////////

pub type EthRefClkPin = PA1;
pub type EthMdioPin = PA2;
pub type EthMdcPin = PC1;
pub type EthCrsPin = PA7;
pub type EthRxD0Pin = PC4;
pub type EthRxD1Pin = PC5;
pub type EthTxD0Pin = PG13;
pub type EthTxD1Pin = PB13;
pub type EthTxEnPin = PG11;
