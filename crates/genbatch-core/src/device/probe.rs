//! Model memory footprint measurement.
//!
//! The footprint of a model on each accelerator is the difference between
//! the allocated bytes read before the model was attached and the bytes
//! read afterwards. Without accelerators, the model's self-reported
//! parameter memory becomes a single synthetic `cpu` entry.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::{bytes_to_gib, DeviceBackend, DeviceId};
use crate::model::{GenerativeModel, ModelPlacement, PlacementTarget};

/// Allocated bytes per accelerator, read before a model is attached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryReference {
    allocated: BTreeMap<u32, u64>,
}

impl MemoryReference {
    /// Allocated bytes recorded for `device` (0 if it was not visible).
    pub fn allocated(&self, device: u32) -> u64 {
        self.allocated.get(&device).copied().unwrap_or(0)
    }
}

/// Per-device footprint of an attached model, in GiB.
///
/// Built once when the model is attached; there is no mutating accessor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceMemoryMap {
    footprints: BTreeMap<DeviceId, f64>,
    input_device: DeviceId,
}

impl DeviceMemoryMap {
    /// Footprint on a device, if the model occupies it.
    pub fn get(&self, device: DeviceId) -> Option<f64> {
        self.footprints.get(&device).copied()
    }

    /// Iterate entries in device order.
    pub fn iter(&self) -> impl Iterator<Item = (DeviceId, f64)> + '_ {
        self.footprints.iter().map(|(d, gb)| (*d, *gb))
    }

    pub fn len(&self) -> usize {
        self.footprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.footprints.is_empty()
    }

    /// Device that receives the input tokens.
    pub fn input_device(&self) -> DeviceId {
        self.input_device
    }

    /// Sorted accelerator indices the model occupies.
    pub fn gpu_devices(&self) -> Vec<u32> {
        self.footprints
            .keys()
            .filter_map(|d| match d {
                DeviceId::Accelerator(i) => Some(*i),
                DeviceId::Cpu => None,
            })
            .collect()
    }

    /// Footprint per accelerator only.
    pub fn gpu_footprint(&self) -> BTreeMap<u32, f64> {
        self.footprints
            .iter()
            .filter_map(|(d, gb)| match d {
                DeviceId::Accelerator(i) => Some((*i, *gb)),
                DeviceId::Cpu => None,
            })
            .collect()
    }

    /// Largest footprint across devices.
    pub fn max_footprint_gb(&self) -> f64 {
        self.footprints.values().copied().fold(0.0, f64::max)
    }
}

/// Reads device memory around model attachment.
pub struct DeviceMemoryProbe;

impl DeviceMemoryProbe {
    /// Record allocated bytes on every accelerator before attaching a model.
    pub fn reference<B: DeviceBackend + ?Sized>(backend: &B) -> MemoryReference {
        let allocated: BTreeMap<u32, u64> = (0..backend.accelerator_count())
            .map(|i| (i, backend.memory_allocated(i)))
            .collect();
        tracing::debug!("Reference device memory: {:?}", allocated);
        MemoryReference { allocated }
    }

    /// Measure the footprint of an attached model against `reference`.
    pub fn measure_footprint<M, B>(
        model: &M,
        backend: &B,
        reference: &MemoryReference,
    ) -> DeviceMemoryMap
    where
        M: GenerativeModel + ?Sized,
        B: DeviceBackend + ?Sized,
    {
        let delta_gb = |device: u32| {
            let after = backend.memory_allocated(device);
            bytes_to_gib(after.saturating_sub(reference.allocated(device)))
        };

        let mut footprints = BTreeMap::new();
        let input_device = match model.placement() {
            ModelPlacement::Sharded(map) => {
                let gpus: BTreeSet<u32> = map
                    .values()
                    .filter_map(|t| match t {
                        PlacementTarget::Accelerator(i) => Some(*i),
                        PlacementTarget::Cpu | PlacementTarget::Disk => None,
                    })
                    .collect();
                for &device in &gpus {
                    footprints.insert(DeviceId::Accelerator(device), delta_gb(device));
                }
                gpus.first()
                    .map(|&i| DeviceId::Accelerator(i))
                    .unwrap_or(DeviceId::Cpu)
            }
            ModelPlacement::Single(DeviceId::Accelerator(device)) => {
                footprints.insert(DeviceId::Accelerator(device), delta_gb(device));
                DeviceId::Accelerator(device)
            }
            ModelPlacement::Single(DeviceId::Cpu) => DeviceId::Cpu,
        };

        if footprints.is_empty() {
            let gb = bytes_to_gib(model.memory_footprint_bytes());
            footprints.insert(DeviceId::Cpu, gb);
        }

        for (device, gb) in &footprints {
            tracing::debug!("Model '{}' footprint on {}: {:.3} GiB", model.model_id(), device, gb);
        }

        DeviceMemoryMap {
            footprints,
            input_device,
        }
    }
}

/// Memory left for generation batches, in GiB.
///
/// Capacity of accelerator 0 (or the host when there is none) scaled by
/// `memory_fraction`, minus the model's largest device footprint. May be
/// negative.
pub fn available_memory_gb<B: DeviceBackend + ?Sized>(
    backend: &B,
    map: &DeviceMemoryMap,
    memory_fraction: f64,
) -> f64 {
    let capacity = if backend.accelerator_count() > 0 {
        backend.total_memory(0)
    } else {
        backend.host_total_memory()
    };
    bytes_to_gib(capacity) * memory_fraction - map.max_footprint_gb()
}
