//! Device memory measurement.
//!
//! ```text
//! reference()  ──►  load model  ──►  measure_footprint()  ──►  DeviceMemoryMap
//!                                                          └─►  available_memory_gb()
//! ```

mod backend;
mod probe;

pub use backend::{DeviceBackend, HostDeviceBackend};
pub use probe::{available_memory_gb, DeviceMemoryMap, DeviceMemoryProbe, MemoryReference};

use serde::{Deserialize, Serialize};

/// Bytes per gibibyte.
pub const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Physical device a model shard lives on.
///
/// Ordered so that accelerators sort by index and before the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceId {
    /// Accelerator by index.
    Accelerator(u32),
    /// Host memory.
    Cpu,
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceId::Accelerator(i) => write!(f, "cuda:{}", i),
            DeviceId::Cpu => write!(f, "cpu"),
        }
    }
}

/// Convert a byte count to GiB.
#[inline]
pub fn bytes_to_gib(bytes: u64) -> f64 {
    bytes as f64 / GIB
}
