//! Typed configuration on top of a key-value persistence backend.
//!
//! The backend is a driver behind [`ConfigStore`]; loading fills defaults for
//! missing keys and clamps out-of-range numerics, saving writes each key
//! individually (best effort, no cross-key transaction).

use heapless::String;

use crate::pilot::{MAX_CURRENT_A, MIN_CURRENT_A};

/// Broker fail-safe timeout bounds, seconds.
pub const FAILSAFE_TIMEOUT_MIN_S: u32 = 10;
pub const FAILSAFE_TIMEOUT_MAX_S: u32 = 3600;

pub type ConfigString = String<64>;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    Full,
    Backend,
}

/// Flash-backed, wear-levelled key-value namespace. Values are typed
/// scalars or short strings; keys are stable identifiers.
pub trait ConfigStore {
    fn get_bool(&self, key: &str) -> Option<bool>;
    fn get_u16(&self, key: &str) -> Option<u16>;
    fn get_u32(&self, key: &str) -> Option<u32>;
    fn get_f32(&self, key: &str) -> Option<f32>;
    fn get_str(&self, key: &str) -> Option<ConfigString>;

    fn put_bool(&mut self, key: &str, value: bool) -> Result<(), StoreError>;
    fn put_u16(&mut self, key: &str, value: u16) -> Result<(), StoreError>;
    fn put_u32(&mut self, key: &str, value: u32) -> Result<(), StoreError>;
    fn put_f32(&mut self, key: &str, value: f32) -> Result<(), StoreError>;
    fn put_str(&mut self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Factory reset: erase the namespace.
    fn remove_all(&mut self) -> Result<(), StoreError>;
}

/// Every persisted tunable. One writer (the boot path and the configuration
/// surface), everyone else reads copies.
#[derive(Clone, PartialEq, Debug)]
pub struct AppConfig {
    // network
    pub wifi_ssid: ConfigString,
    pub wifi_pass: ConfigString,
    pub use_static_ip: bool,
    pub static_ip: ConfigString,
    pub static_gw: ConfigString,
    pub static_sn: ConfigString,

    // local UI credentials
    pub www_user: ConfigString,
    pub www_pass: ConfigString,

    // broker
    pub mqtt_enabled: bool,
    pub mqtt_host: ConfigString,
    pub mqtt_port: u16,
    pub mqtt_user: ConfigString,
    pub mqtt_pass: ConfigString,
    pub mqtt_failsafe_enabled: bool,
    pub mqtt_failsafe_timeout_s: u32,

    // charging behaviour
    pub max_current: f32,
    pub allow_below_6amp_charging: bool,
    pub pause_relay_immediate: bool,
    pub low_limit_resume_delay_ms: u32,
    pub throttle_alive_timeout_s: u32,
    pub rcm_enabled: bool,

    // OCPP back-office
    pub ocpp_enabled: bool,
    pub ocpp_host: ConfigString,
    pub ocpp_port: u16,
    pub ocpp_url: ConfigString,
    pub ocpp_use_tls: bool,
    pub ocpp_auth_key: ConfigString,
    pub ocpp_heartbeat_s: u32,
    pub ocpp_reconnect_ms: u32,
    pub ocpp_connect_timeout_ms: u32,

    // auxiliary peripherals
    pub rfid_enabled: bool,
    pub led_brightness: u8,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            use_static_ip: false,
            static_ip: str_value("192.168.1.100"),
            static_gw: str_value("192.168.1.1"),
            static_sn: str_value("255.255.255.0"),
            www_user: str_value("admin"),
            www_pass: str_value("admin"),
            mqtt_enabled: false,
            mqtt_host: String::new(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            mqtt_failsafe_enabled: false,
            mqtt_failsafe_timeout_s: 600,
            max_current: 32.0,
            allow_below_6amp_charging: false,
            pause_relay_immediate: true,
            low_limit_resume_delay_ms: 300_000,
            throttle_alive_timeout_s: 0,
            rcm_enabled: true,
            ocpp_enabled: false,
            ocpp_host: String::new(),
            ocpp_port: 80,
            ocpp_url: str_value("/ocpp/1.6"),
            ocpp_use_tls: false,
            ocpp_auth_key: String::new(),
            ocpp_heartbeat_s: 60,
            ocpp_reconnect_ms: 5000,
            ocpp_connect_timeout_ms: 10_000,
            rfid_enabled: false,
            led_brightness: 64,
        }
    }
}

impl AppConfig {
    /// Load from the store, falling back to the default for every missing
    /// key and clamping numeric ranges.
    pub fn load(store: &impl ConfigStore) -> Self {
        let d = Self::default();
        let mut cfg = Self {
            wifi_ssid: store.get_str("w_ssid").unwrap_or(d.wifi_ssid),
            wifi_pass: store.get_str("w_pass").unwrap_or(d.wifi_pass),
            use_static_ip: store.get_bool("w_static").unwrap_or(d.use_static_ip),
            static_ip: store.get_str("w_ip").unwrap_or(d.static_ip),
            static_gw: store.get_str("w_gw").unwrap_or(d.static_gw),
            static_sn: store.get_str("w_sn").unwrap_or(d.static_sn),
            www_user: store.get_str("u_user").unwrap_or(d.www_user),
            www_pass: store.get_str("u_pass").unwrap_or(d.www_pass),
            mqtt_enabled: store.get_bool("m_en").unwrap_or(d.mqtt_enabled),
            mqtt_host: store.get_str("m_host").unwrap_or(d.mqtt_host),
            mqtt_port: store.get_u16("m_port").unwrap_or(d.mqtt_port),
            mqtt_user: store.get_str("m_user").unwrap_or(d.mqtt_user),
            mqtt_pass: store.get_str("m_pass").unwrap_or(d.mqtt_pass),
            mqtt_failsafe_enabled: store.get_bool("m_safe").unwrap_or(d.mqtt_failsafe_enabled),
            mqtt_failsafe_timeout_s: store.get_u32("m_safe_t").unwrap_or(d.mqtt_failsafe_timeout_s),
            max_current: store.get_f32("e_max_cur").unwrap_or(d.max_current),
            allow_below_6amp_charging: store
                .get_bool("e_allow_low")
                .unwrap_or(d.allow_below_6amp_charging),
            pause_relay_immediate: store.get_bool("e_pause_im").unwrap_or(d.pause_relay_immediate),
            low_limit_resume_delay_ms: store
                .get_u32("e_res_delay")
                .unwrap_or(d.low_limit_resume_delay_ms),
            throttle_alive_timeout_s: store
                .get_u32("e_alive_to")
                .unwrap_or(d.throttle_alive_timeout_s),
            rcm_enabled: store.get_bool("e_rcm_en").unwrap_or(d.rcm_enabled),
            ocpp_enabled: store.get_bool("o_en").unwrap_or(d.ocpp_enabled),
            ocpp_host: store.get_str("o_host").unwrap_or(d.ocpp_host),
            ocpp_port: store.get_u16("o_port").unwrap_or(d.ocpp_port),
            ocpp_url: store.get_str("o_url").unwrap_or(d.ocpp_url),
            ocpp_use_tls: store.get_bool("o_tls").unwrap_or(d.ocpp_use_tls),
            ocpp_auth_key: store.get_str("o_key").unwrap_or(d.ocpp_auth_key),
            ocpp_heartbeat_s: store.get_u32("o_hb").unwrap_or(d.ocpp_heartbeat_s),
            ocpp_reconnect_ms: store.get_u32("o_rec").unwrap_or(d.ocpp_reconnect_ms),
            ocpp_connect_timeout_ms: store.get_u32("o_to").unwrap_or(d.ocpp_connect_timeout_ms),
            rfid_enabled: store.get_bool("x_rfid").unwrap_or(d.rfid_enabled),
            led_brightness: store.get_u16("x_led").map(|v| v as u8).unwrap_or(d.led_brightness),
        };
        cfg.clamp();
        cfg
    }

    /// Write every key. Best effort: a failing key is logged and the rest
    /// still go out.
    pub fn save(&self, store: &mut impl ConfigStore) -> Result<(), StoreError> {
        let mut result = Ok(());
        let mut track = |r: Result<(), StoreError>| {
            if let Err(e) = r {
                warn!("config key write failed");
                result = Err(e);
            }
        };

        track(store.put_str("w_ssid", &self.wifi_ssid));
        track(store.put_str("w_pass", &self.wifi_pass));
        track(store.put_bool("w_static", self.use_static_ip));
        track(store.put_str("w_ip", &self.static_ip));
        track(store.put_str("w_gw", &self.static_gw));
        track(store.put_str("w_sn", &self.static_sn));
        track(store.put_str("u_user", &self.www_user));
        track(store.put_str("u_pass", &self.www_pass));
        track(store.put_bool("m_en", self.mqtt_enabled));
        track(store.put_str("m_host", &self.mqtt_host));
        track(store.put_u16("m_port", self.mqtt_port));
        track(store.put_str("m_user", &self.mqtt_user));
        track(store.put_str("m_pass", &self.mqtt_pass));
        track(store.put_bool("m_safe", self.mqtt_failsafe_enabled));
        track(store.put_u32("m_safe_t", self.mqtt_failsafe_timeout_s));
        track(store.put_f32("e_max_cur", self.max_current));
        track(store.put_bool("e_allow_low", self.allow_below_6amp_charging));
        track(store.put_bool("e_pause_im", self.pause_relay_immediate));
        track(store.put_u32("e_res_delay", self.low_limit_resume_delay_ms));
        track(store.put_u32("e_alive_to", self.throttle_alive_timeout_s));
        track(store.put_bool("e_rcm_en", self.rcm_enabled));
        track(store.put_bool("o_en", self.ocpp_enabled));
        track(store.put_str("o_host", &self.ocpp_host));
        track(store.put_u16("o_port", self.ocpp_port));
        track(store.put_str("o_url", &self.ocpp_url));
        track(store.put_bool("o_tls", self.ocpp_use_tls));
        track(store.put_str("o_key", &self.ocpp_auth_key));
        track(store.put_u32("o_hb", self.ocpp_heartbeat_s));
        track(store.put_u32("o_rec", self.ocpp_reconnect_ms));
        track(store.put_u32("o_to", self.ocpp_connect_timeout_ms));
        track(store.put_bool("x_rfid", self.rfid_enabled));
        track(store.put_u16("x_led", self.led_brightness as u16));

        result
    }

    // Out-of-range values are clamped silently (with a log line), never
    // rejected.
    fn clamp(&mut self) {
        if self.max_current < MIN_CURRENT_A || self.max_current > MAX_CURRENT_A {
            let clamped = self.max_current.clamp(MIN_CURRENT_A, MAX_CURRENT_A);
            warn!(
                "max_current {} A out of range, clamped to {} A",
                self.max_current, clamped
            );
            self.max_current = clamped;
        }
        if self.mqtt_failsafe_timeout_s < FAILSAFE_TIMEOUT_MIN_S
            || self.mqtt_failsafe_timeout_s > FAILSAFE_TIMEOUT_MAX_S
        {
            let clamped = self
                .mqtt_failsafe_timeout_s
                .clamp(FAILSAFE_TIMEOUT_MIN_S, FAILSAFE_TIMEOUT_MAX_S);
            warn!(
                "failsafe timeout {} s out of range, clamped to {} s",
                self.mqtt_failsafe_timeout_s, clamped
            );
            self.mqtt_failsafe_timeout_s = clamped;
        }
    }
}

fn str_value(s: &str) -> ConfigString {
    let mut out = String::new();
    let _ = out.push_str(s);
    out
}
