//! Concurrent registry of leaf device records.
//!
//! The map itself is sharded ([`DashMap`]); each record sits behind its own
//! mutex so that work on different devices never contends. Creation goes
//! through the map's entry API, which makes "get or create" atomic: two
//! callers racing on an unknown device always end up with the same record.

use crate::device::{DeviceRecord, DeviceSnapshot};
use dashmap::DashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Shared handle to one device record.
pub type SharedDevice = Arc<Mutex<DeviceRecord>>;

/// Lock a device record.
///
/// A panic while the lock was held leaves the record in a consistent state
/// (every mutation is a single method call), so poisoning is ignored.
pub fn lock_device(device: &SharedDevice) -> MutexGuard<'_, DeviceRecord> {
    device.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Storage of device records keyed by leaf device id.
pub trait DeviceRepository: Send + Sync {
    /// Whether a record exists for `device_id`.
    fn contains(&self, device_id: &str) -> bool;

    /// Record for `device_id`, if any.
    fn get(&self, device_id: &str) -> Option<SharedDevice>;

    /// Record for `device_id`, created in status `New` when absent.
    fn get_or_create(&self, device_id: &str) -> SharedDevice;

    /// Number of known devices.
    fn len(&self) -> usize;

    /// Whether no device has been seen yet.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every record, in no particular order.
    fn devices(&self) -> Vec<SharedDevice>;

    /// Diagnostic view of every record, sorted by device id.
    fn snapshot(&self) -> Vec<DeviceSnapshot> {
        let mut snapshots: Vec<DeviceSnapshot> = self
            .devices()
            .iter()
            .map(|device| lock_device(device).snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        snapshots
    }
}

/// In-memory repository. Records live for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryDeviceRepository {
    devices: DashMap<String, SharedDevice>,
}

impl MemoryDeviceRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeviceRepository for MemoryDeviceRepository {
    fn contains(&self, device_id: &str) -> bool {
        self.devices.contains_key(device_id)
    }

    fn get(&self, device_id: &str) -> Option<SharedDevice> {
        self.devices.get(device_id).map(|entry| Arc::clone(entry.value()))
    }

    fn get_or_create(&self, device_id: &str) -> SharedDevice {
        if let Some(existing) = self.get(device_id) {
            return existing;
        }
        let entry = self
            .devices
            .entry(device_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(DeviceRecord::new(device_id))));
        Arc::clone(entry.value())
    }

    fn len(&self) -> usize {
        self.devices.len()
    }

    fn devices(&self) -> Vec<SharedDevice> {
        self.devices
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}
