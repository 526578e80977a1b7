pub mod nv_config;
pub mod pilot;
pub mod rcm;
pub mod relay;
pub mod retained;
