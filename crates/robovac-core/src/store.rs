// ── Device store ──
//
// Per-device snapshots in a `DashMap`. Writers swap in a fresh `Arc`, so
// readers never see a half-applied update.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use robovac_api::DpsMap;
use serde::Serialize;

use crate::model::{CleaningMode, DeviceStatus, FanSpeed, VacuumDps};

/// Everything known about one device at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSnapshot {
    pub device_id: String,
    pub name: String,
    pub host: String,
    pub online: bool,
    pub status: DeviceStatus,
    pub battery: Option<u8>,
    pub fan_speed: Option<FanSpeed>,
    pub mode: Option<CleaningMode>,
    pub error_code: Option<i64>,
    /// Every Data Point reported so far, latest value per index.
    pub dps: DpsMap,
    pub last_update: Option<DateTime<Utc>>,
}

impl DeviceSnapshot {
    pub fn new(device_id: impl Into<String>, name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            name: name.into(),
            host: host.into(),
            online: false,
            status: DeviceStatus::Unknown,
            battery: None,
            fan_speed: None,
            mode: None,
            error_code: None,
            dps: DpsMap::new(),
            last_update: None,
        }
    }

    /// Merge `update` into the accumulated Data Points.
    ///
    /// Returns the entries whose value actually changed; derived fields are
    /// recomputed only when that set is non-empty.
    pub fn merge_dps(&mut self, update: &DpsMap) -> DpsMap {
        let changed: DpsMap = update
            .iter()
            .filter(|(index, value)| self.dps.get(**index) != Some(*value))
            .map(|(index, value)| (*index, value.clone()))
            .collect();

        if !changed.is_empty() {
            self.dps.merge(&changed);
            self.recompute();
            self.last_update = Some(Utc::now());
        }
        changed
    }

    pub fn decoded(&self) -> VacuumDps {
        VacuumDps::decode(&self.dps)
    }

    fn recompute(&mut self) {
        let decoded = self.decoded();
        self.status = decoded.status();
        self.battery = decoded.battery_level();
        self.fan_speed = decoded.fan_speed();
        self.mode = decoded.mode();
        self.error_code = decoded.error_code();
    }
}

// ── DeviceStore ──────────────────────────────────────────────────────

/// Thread-safe store of device snapshots.
pub struct DeviceStore {
    by_id: DashMap<String, Arc<DeviceSnapshot>>,
}

impl DeviceStore {
    pub fn new() -> Self {
        Self {
            by_id: DashMap::new(),
        }
    }

    /// Insert or replace a device. Returns `true` if it was new.
    pub fn upsert(&self, device: DeviceSnapshot) -> bool {
        self.by_id
            .insert(device.device_id.clone(), Arc::new(device))
            .is_none()
    }

    pub fn remove(&self, device_id: &str) -> Option<Arc<DeviceSnapshot>> {
        self.by_id.remove(device_id).map(|(_, device)| device)
    }

    pub fn get(&self, device_id: &str) -> Option<Arc<DeviceSnapshot>> {
        self.by_id.get(device_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Apply `f` to a copy of the device and store the result if `f`
    /// reports a change. Returns the stored snapshot in that case.
    pub fn update<F>(&self, device_id: &str, f: F) -> Option<Arc<DeviceSnapshot>>
    where
        F: FnOnce(&mut DeviceSnapshot) -> bool,
    {
        let mut entry = self.by_id.get_mut(device_id)?;
        let mut device = DeviceSnapshot::clone(entry.value());
        if !f(&mut device) {
            return None;
        }
        let device = Arc::new(device);
        *entry.value_mut() = Arc::clone(&device);
        Some(device)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl Default for DeviceStore {
    fn default() -> Self {
        Self::new()
    }
}
