//! Leaf device identity tracking for LeafBridge.
//!
//! Holds the per-device registration lifecycle and the concurrent
//! repository of device records.

#![warn(missing_docs)]

pub mod device;
pub mod error;
pub mod repository;

pub use device::{BufferOutcome, DeviceRecord, DeviceSnapshot, DeviceStatus, StateTransition};
pub use error::{LifecycleError, LifecycleResult};
pub use repository::{lock_device, DeviceRepository, MemoryDeviceRepository, SharedDevice};
