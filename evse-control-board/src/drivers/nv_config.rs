//! Flash-backed key-value store for the configuration adapter.
//!
//! One 128 kB sector at the top of internal flash holds a tagged-record log
//! mirrored into RAM. Reads scan the mirror; every put rewrites the sector
//! from the mirror, so each key update is individually atomic at the
//! sector-erase granularity (the contract promises no more than that).
//!
//! Record layout, repeated until a 0xFF tag:
//!   [tag u8][key_len u8][key bytes][val_len u8][value bytes]

use embassy_stm32::flash::{Blocking, Flash};
use embassy_stm32::peripherals::FLASH;
use embassy_time::Instant;
use evse_core::config::{ConfigStore, ConfigString, StoreError};
use heapless::Vec;

use crate::config::CONFIG_FLASH_OFFSET;

const TAG_BOOL: u8 = 1;
const TAG_U16: u8 = 2;
const TAG_U32: u8 = 3;
const TAG_F32: u8 = 4;
const TAG_STR: u8 = 5;
const TAG_EMPTY: u8 = 0xFF;

const MAGIC: [u8; 4] = *b"EVC1";
const CACHE_CAPACITY: usize = 2048;

pub struct NvConfigStore {
    flash: Flash<'static, Blocking>,
    cache: Vec<u8, CACHE_CAPACITY>,
}

impl NvConfigStore {
    pub fn new(flash: FLASH) -> Self {
        let mut store = Self {
            flash: Flash::new_blocking(flash),
            cache: Vec::new(),
        };
        store.load();
        store
    }

    fn load(&mut self) {
        let mut header = [0u8; 8];
        if self
            .flash
            .blocking_read(CONFIG_FLASH_OFFSET, &mut header)
            .is_err()
        {
            defmt::warn!("config flash unreadable, starting empty");
            return;
        }
        if header[..4] != MAGIC {
            defmt::info!("config flash blank, using defaults");
            return;
        }
        let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        if len > CACHE_CAPACITY {
            defmt::warn!("config record length {} invalid, starting empty", len);
            return;
        }
        let _ = self.cache.resize_default(len);
        if self
            .flash
            .blocking_read(CONFIG_FLASH_OFFSET + 8, &mut self.cache)
            .is_err()
        {
            defmt::warn!("config flash body unreadable, starting empty");
            self.cache.clear();
        }
    }

    fn persist(&mut self) -> Result<(), StoreError> {
        let started = Instant::now();
        let end = CONFIG_FLASH_OFFSET + crate::config::CONFIG_FLASH_SIZE;
        self.flash
            .blocking_erase(CONFIG_FLASH_OFFSET, end)
            .map_err(|_| StoreError::Backend)?;

        let mut header = [0xFFu8; 8];
        header[..4].copy_from_slice(&MAGIC);
        header[4..].copy_from_slice(&(self.cache.len() as u32).to_le_bytes());
        self.flash
            .blocking_write(CONFIG_FLASH_OFFSET, &header)
            .map_err(|_| StoreError::Backend)?;

        // Pad the body out to the 4-byte programming granularity.
        let mut body: Vec<u8, { CACHE_CAPACITY + 4 }> = Vec::new();
        let _ = body.extend_from_slice(&self.cache);
        while body.len() % 4 != 0 {
            let _ = body.push(TAG_EMPTY);
        }
        self.flash
            .blocking_write(CONFIG_FLASH_OFFSET + 8, &body)
            .map_err(|_| StoreError::Backend)?;

        defmt::debug!(
            "config persisted, {} bytes in {} ms",
            self.cache.len(),
            Instant::now().duration_since(started).as_millis()
        );
        Ok(())
    }

    /// Find a record's (tag, value range) in the cache.
    fn find(&self, key: &str) -> Option<(u8, core::ops::Range<usize>)> {
        let mut i = 0;
        while i + 2 <= self.cache.len() {
            let tag = self.cache[i];
            if tag == TAG_EMPTY {
                break;
            }
            let key_len = self.cache[i + 1] as usize;
            let key_start = i + 2;
            let val_len_at = key_start + key_len;
            if val_len_at >= self.cache.len() {
                break;
            }
            let val_len = self.cache[val_len_at] as usize;
            let val_start = val_len_at + 1;
            let val_end = val_start + val_len;
            if val_end > self.cache.len() {
                break;
            }
            if &self.cache[key_start..key_start + key_len] == key.as_bytes() {
                return Some((tag, val_start..val_end));
            }
            i = val_end;
        }
        None
    }

    fn remove(&mut self, key: &str) {
        if let Some((_, range)) = self.find(key) {
            let entry_start = range.start - 1 - key.len() - 2;
            let entry_end = range.end;
            let tail: Vec<u8, CACHE_CAPACITY> =
                Vec::from_slice(&self.cache[entry_end..]).unwrap_or_default();
            self.cache.truncate(entry_start);
            let _ = self.cache.extend_from_slice(&tail);
        }
    }

    fn put(&mut self, key: &str, tag: u8, value: &[u8]) -> Result<(), StoreError> {
        if key.len() > u8::MAX as usize || value.len() > u8::MAX as usize {
            return Err(StoreError::Full);
        }
        self.remove(key);
        let needed = 3 + key.len() + value.len();
        if self.cache.len() + needed > CACHE_CAPACITY {
            return Err(StoreError::Full);
        }
        let _ = self.cache.push(tag);
        let _ = self.cache.push(key.len() as u8);
        let _ = self.cache.extend_from_slice(key.as_bytes());
        let _ = self.cache.push(value.len() as u8);
        let _ = self.cache.extend_from_slice(value);
        self.persist()
    }

    fn get(&self, key: &str, tag: u8) -> Option<&[u8]> {
        match self.find(key) {
            Some((t, range)) if t == tag => Some(&self.cache[range]),
            _ => None,
        }
    }
}

impl ConfigStore for NvConfigStore {
    fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key, TAG_BOOL).map(|v| v.first() == Some(&1))
    }
    fn get_u16(&self, key: &str) -> Option<u16> {
        let v = self.get(key, TAG_U16)?;
        Some(u16::from_le_bytes(v.try_into().ok()?))
    }
    fn get_u32(&self, key: &str) -> Option<u32> {
        let v = self.get(key, TAG_U32)?;
        Some(u32::from_le_bytes(v.try_into().ok()?))
    }
    fn get_f32(&self, key: &str) -> Option<f32> {
        let v = self.get(key, TAG_F32)?;
        Some(f32::from_le_bytes(v.try_into().ok()?))
    }
    fn get_str(&self, key: &str) -> Option<ConfigString> {
        let v = self.get(key, TAG_STR)?;
        let s = core::str::from_utf8(v).ok()?;
        let mut out = ConfigString::new();
        out.push_str(s).ok()?;
        Some(out)
    }

    fn put_bool(&mut self, key: &str, value: bool) -> Result<(), StoreError> {
        self.put(key, TAG_BOOL, &[value as u8])
    }
    fn put_u16(&mut self, key: &str, value: u16) -> Result<(), StoreError> {
        self.put(key, TAG_U16, &value.to_le_bytes())
    }
    fn put_u32(&mut self, key: &str, value: u32) -> Result<(), StoreError> {
        self.put(key, TAG_U32, &value.to_le_bytes())
    }
    fn put_f32(&mut self, key: &str, value: f32) -> Result<(), StoreError> {
        self.put(key, TAG_F32, &value.to_le_bytes())
    }
    fn put_str(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.put(key, TAG_STR, value.as_bytes())
    }

    fn remove_all(&mut self) -> Result<(), StoreError> {
        self.cache.clear();
        self.persist()
    }
}
