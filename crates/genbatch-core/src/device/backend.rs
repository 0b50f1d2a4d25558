//! Device memory backends.
//!
//! A [`DeviceBackend`] answers raw memory queries for the accelerators the
//! model may occupy and owns the one mutating operation the scheduler is
//! allowed to perform on device state: releasing cached allocations between
//! a failed attempt and its retry.

use sysinfo::System;

/// Raw memory readings for accelerators and the host.
///
/// All values are in bytes. Accelerators are numbered `0..accelerator_count()`.
pub trait DeviceBackend {
    /// Number of visible accelerators (0 when running on the host only).
    fn accelerator_count(&self) -> u32;

    /// Bytes currently allocated on an accelerator.
    fn memory_allocated(&self, device: u32) -> u64;

    /// Total capacity of an accelerator.
    fn total_memory(&self, device: u32) -> u64;

    /// Total physical memory of the host.
    fn host_total_memory(&self) -> u64;

    /// Release cached, unreferenced device allocations.
    ///
    /// Only the OOM-safe executor calls this, after a failed attempt and
    /// before the retry.
    fn release_cached(&self);
}

impl<T: DeviceBackend + ?Sized> DeviceBackend for &T {
    fn accelerator_count(&self) -> u32 {
        (**self).accelerator_count()
    }

    fn memory_allocated(&self, device: u32) -> u64 {
        (**self).memory_allocated(device)
    }

    fn total_memory(&self, device: u32) -> u64 {
        (**self).total_memory(device)
    }

    fn host_total_memory(&self) -> u64 {
        (**self).host_total_memory()
    }

    fn release_cached(&self) {
        (**self).release_cached()
    }
}

/// Backend for hosts without accelerators.
///
/// Host capacity is read once through `sysinfo` at construction.
#[derive(Debug, Clone)]
pub struct HostDeviceBackend {
    total_bytes: u64,
}

impl HostDeviceBackend {
    /// Probe the host for its physical memory.
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        let total_bytes = sys.total_memory();
        tracing::debug!("Host backend: {} bytes of physical memory", total_bytes);
        Self { total_bytes }
    }

    /// Build a host backend with a fixed capacity.
    pub fn with_total_memory(total_bytes: u64) -> Self {
        Self { total_bytes }
    }
}

impl Default for HostDeviceBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceBackend for HostDeviceBackend {
    fn accelerator_count(&self) -> u32 {
        0
    }

    fn memory_allocated(&self, _device: u32) -> u64 {
        0
    }

    fn total_memory(&self, _device: u32) -> u64 {
        0
    }

    fn host_total_memory(&self) -> u64 {
        self.total_bytes
    }

    fn release_cached(&self) {
        tracing::debug!("Host backend has no device cache to release");
    }
}
