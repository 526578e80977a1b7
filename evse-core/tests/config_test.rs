//! Configuration load/store behaviour over an in-memory backend.

use std::collections::HashMap;

use evse_core::config::{AppConfig, ConfigStore, ConfigString, StoreError};

#[derive(Clone, Debug, PartialEq)]
enum Value {
    Bool(bool),
    U16(u16),
    U32(u32),
    F32(f32),
    Str(String),
}

#[derive(Default)]
struct MemoryStore {
    map: HashMap<String, Value>,
}

impl ConfigStore for MemoryStore {
    fn get_bool(&self, key: &str) -> Option<bool> {
        match self.map.get(key) {
            Some(Value::Bool(v)) => Some(*v),
            _ => None,
        }
    }
    fn get_u16(&self, key: &str) -> Option<u16> {
        match self.map.get(key) {
            Some(Value::U16(v)) => Some(*v),
            _ => None,
        }
    }
    fn get_u32(&self, key: &str) -> Option<u32> {
        match self.map.get(key) {
            Some(Value::U32(v)) => Some(*v),
            _ => None,
        }
    }
    fn get_f32(&self, key: &str) -> Option<f32> {
        match self.map.get(key) {
            Some(Value::F32(v)) => Some(*v),
            _ => None,
        }
    }
    fn get_str(&self, key: &str) -> Option<ConfigString> {
        match self.map.get(key) {
            Some(Value::Str(v)) => {
                let mut out = ConfigString::new();
                out.push_str(v).ok()?;
                Some(out)
            }
            _ => None,
        }
    }

    fn put_bool(&mut self, key: &str, value: bool) -> Result<(), StoreError> {
        self.map.insert(key.to_string(), Value::Bool(value));
        Ok(())
    }
    fn put_u16(&mut self, key: &str, value: u16) -> Result<(), StoreError> {
        self.map.insert(key.to_string(), Value::U16(value));
        Ok(())
    }
    fn put_u32(&mut self, key: &str, value: u32) -> Result<(), StoreError> {
        self.map.insert(key.to_string(), Value::U32(value));
        Ok(())
    }
    fn put_f32(&mut self, key: &str, value: f32) -> Result<(), StoreError> {
        self.map.insert(key.to_string(), Value::F32(value));
        Ok(())
    }
    fn put_str(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.map.insert(key.to_string(), Value::Str(value.to_string()));
        Ok(())
    }

    fn remove_all(&mut self) -> Result<(), StoreError> {
        self.map.clear();
        Ok(())
    }
}

#[test]
fn empty_store_loads_defaults() {
    let store = MemoryStore::default();
    let cfg = AppConfig::load(&store);
    assert_eq!(cfg, AppConfig::default());
    assert_eq!(cfg.max_current, 32.0);
    assert!(cfg.rcm_enabled);
    assert!(!cfg.allow_below_6amp_charging);
    assert_eq!(cfg.low_limit_resume_delay_ms, 300_000);
    assert_eq!(cfg.ocpp_url.as_str(), "/ocpp/1.6");
}

#[test]
fn save_then_load_reproduces_the_config() {
    let mut store = MemoryStore::default();

    let mut cfg = AppConfig::default();
    cfg.wifi_ssid.push_str("carport").unwrap();
    cfg.mqtt_enabled = true;
    cfg.mqtt_host.push_str("broker.local").unwrap();
    cfg.mqtt_port = 8883;
    cfg.mqtt_failsafe_enabled = true;
    cfg.mqtt_failsafe_timeout_s = 120;
    cfg.max_current = 25.0;
    cfg.allow_below_6amp_charging = true;
    cfg.low_limit_resume_delay_ms = 60_000;
    cfg.throttle_alive_timeout_s = 90;
    cfg.rcm_enabled = false;
    cfg.ocpp_enabled = true;
    cfg.ocpp_host.push_str("csms.example").unwrap();
    cfg.ocpp_port = 443;
    cfg.ocpp_use_tls = true;
    cfg.rfid_enabled = true;
    cfg.led_brightness = 200;

    cfg.save(&mut store).unwrap();
    let reloaded = AppConfig::load(&store);
    assert_eq!(reloaded, cfg);
}

#[test]
fn out_of_range_numerics_are_clamped_on_load() {
    let mut store = MemoryStore::default();
    store.put_f32("e_max_cur", 120.0).unwrap();
    store.put_u32("m_safe_t", 5).unwrap();
    let cfg = AppConfig::load(&store);
    assert_eq!(cfg.max_current, 80.0);
    assert_eq!(cfg.mqtt_failsafe_timeout_s, 10);

    store.put_f32("e_max_cur", 2.0).unwrap();
    store.put_u32("m_safe_t", 90_000).unwrap();
    let cfg = AppConfig::load(&store);
    assert_eq!(cfg.max_current, 6.0);
    assert_eq!(cfg.mqtt_failsafe_timeout_s, 3600);
}

#[test]
fn structurally_invalid_values_fall_back_to_defaults() {
    let mut store = MemoryStore::default();
    // Wrong type under a known key: treated as missing.
    store.put_str("e_max_cur", "eighty").unwrap();
    let cfg = AppConfig::load(&store);
    assert_eq!(cfg.max_current, AppConfig::default().max_current);
}

#[test]
fn factory_reset_erases_the_namespace() {
    let mut store = MemoryStore::default();
    let mut cfg = AppConfig::default();
    cfg.mqtt_enabled = true;
    cfg.save(&mut store).unwrap();
    assert!(store.get_bool("m_en").unwrap());

    store.remove_all().unwrap();
    let cfg = AppConfig::load(&store);
    assert_eq!(cfg, AppConfig::default());
}
