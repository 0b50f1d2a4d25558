//! Model-wrapping engine.
//!
//! Owns the model, its device backend, the footprint measured when the
//! model was attached and the estimator built from its calibration table.
//! All of these are fixed for the engine's lifetime; each request only
//! borrows them.

use std::collections::BTreeMap;

use crate::config::SchedulerConfig;
use crate::device::{
    available_memory_gb, DeviceBackend, DeviceId, DeviceMemoryMap, DeviceMemoryProbe,
    HostDeviceBackend, MemoryReference,
};
use crate::error::GenResult;
use crate::estimator::{BatchFootprintEstimator, FootprintTableStore};
use crate::executor::OomSafeExecutor;
use crate::generation::{GenerationConfig, GenerationConfigBuilder, GenerationParams};
use crate::model::GenerativeModel;
use crate::orchestrator::{GenerationReport, GenerationRequest, MultiPassOrchestrator};

/// A model attached to a device backend, ready to serve requests.
pub struct GenerationEngine<M, B = HostDeviceBackend> {
    model: M,
    backend: B,
    settings: SchedulerConfig,
    memory_map: DeviceMemoryMap,
    estimator: BatchFootprintEstimator,
}

impl<M: GenerativeModel, B: DeviceBackend> GenerationEngine<M, B> {
    /// Attach a model produced by `load`.
    ///
    /// Device memory is read before `load` runs and again after, so the
    /// footprint covers exactly what loading allocated.
    pub fn attach<F>(backend: B, settings: SchedulerConfig, load: F) -> GenResult<Self>
    where
        F: FnOnce() -> GenResult<M>,
    {
        settings.validate()?;
        let reference = DeviceMemoryProbe::reference(&backend);
        let model = load()?;
        Self::assemble(model, backend, settings, &reference)
    }

    /// Attach an already loaded model against a reading taken before it
    /// was loaded.
    pub fn with_reference(
        model: M,
        backend: B,
        settings: SchedulerConfig,
        reference: &MemoryReference,
    ) -> GenResult<Self> {
        settings.validate()?;
        Self::assemble(model, backend, settings, reference)
    }

    fn assemble(
        model: M,
        backend: B,
        settings: SchedulerConfig,
        reference: &MemoryReference,
    ) -> GenResult<Self> {
        let memory_map = DeviceMemoryProbe::measure_footprint(&model, &backend, reference);

        let store = FootprintTableStore::new(&settings.footprint_table_root);
        let table = store.load(model.model_id(), model.precision())?;
        let estimator =
            BatchFootprintEstimator::new(table, model.parameter_count_billions(), &settings)?;

        tracing::info!(
            "Attached '{}' ({}, {:.1}B params) on {}, max footprint {:.2} GiB, calibration table: {}",
            model.model_id(),
            model.precision(),
            model.parameter_count_billions(),
            memory_map.input_device(),
            memory_map.max_footprint_gb(),
            if estimator.table().is_some() { "yes" } else { "no" }
        );

        Ok(Self {
            model,
            backend,
            settings,
            memory_map,
            estimator,
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn settings(&self) -> &SchedulerConfig {
        &self.settings
    }

    pub fn estimator(&self) -> &BatchFootprintEstimator {
        &self.estimator
    }

    /// Footprint per device: accelerators the model occupies, or a single
    /// `cpu` entry when it occupies none.
    pub fn memory_footprint(&self) -> &DeviceMemoryMap {
        &self.memory_map
    }

    /// Footprint per accelerator; empty on a host-only model.
    pub fn gpu_memory_footprint(&self) -> BTreeMap<u32, f64> {
        self.memory_map.gpu_footprint()
    }

    /// Largest footprint over all devices, in GiB.
    pub fn max_device_memory_footprint(&self) -> f64 {
        self.memory_map.max_footprint_gb()
    }

    pub fn gpu_devices(&self) -> Vec<u32> {
        self.memory_map.gpu_devices()
    }

    pub fn input_device(&self) -> DeviceId {
        self.memory_map.input_device()
    }

    /// Memory left for generation batches, in GiB. May be negative.
    pub fn available_memory_gb(&self) -> f64 {
        available_memory_gb(&self.backend, &self.memory_map, self.settings.memory_fraction)
    }

    /// Batch size the estimator suggests for an input length.
    pub fn infer_best_batch_size(&self, input_length: usize, max_new_tokens: usize) -> usize {
        self.estimator
            .estimate(input_length, max_new_tokens, self.available_memory_gb())
    }

    pub fn create_generation_config(&self, params: &GenerationParams) -> GenResult<GenerationConfig> {
        GenerationConfigBuilder::new(&self.model).build_from(params)
    }

    /// Serve a request, splitting it into as many batches as memory needs.
    pub fn generate(&self, request: &GenerationRequest) -> GenResult<GenerationReport> {
        let executor = OomSafeExecutor::new(&self.model, &self.backend, self.settings.shrink_factor);
        MultiPassOrchestrator::new(executor, &self.estimator, self.available_memory_gb())
            .generate(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenError;
    use crate::estimator::EstimateSource;
    use crate::model::ModelPlacement;
    use crate::stubs::{StubDeviceBackend, StubModel};
    use tempfile::TempDir;

    const GB: u64 = 1024 * 1024 * 1024;

    fn settings(root: &std::path::Path) -> SchedulerConfig {
        SchedulerConfig {
            footprint_table_root: root.to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn test_attach_measures_what_loading_allocated() {
        let dir = TempDir::new().unwrap();
        let backend = StubDeviceBackend::new(vec![40 * GB]);
        backend.set_allocated(0, 2 * GB);

        let engine = GenerationEngine::attach(&backend, settings(dir.path()), || {
            backend.set_allocated(0, 9 * GB);
            Ok(StubModel::new("org/model-7b")
                .with_placement(ModelPlacement::Single(DeviceId::Accelerator(0))))
        })
        .unwrap();

        assert_eq!(engine.memory_footprint().get(DeviceId::Accelerator(0)), Some(7.0));
        assert_eq!(engine.gpu_devices(), vec![0]);
        assert_eq!(engine.input_device(), DeviceId::Accelerator(0));
        println!("[PASS] attach reads memory around the loader");
    }

    #[test]
    fn test_with_reference_footprint_and_available_memory() {
        let dir = TempDir::new().unwrap();
        let backend = StubDeviceBackend::new(vec![40 * GB]);
        backend.set_allocated(0, 2 * GB);
        let reference = DeviceMemoryProbe::reference(&backend);
        backend.set_allocated(0, 16 * GB);

        let model = StubModel::new("org/model-7b")
            .with_placement(ModelPlacement::Single(DeviceId::Accelerator(0)));
        let engine =
            GenerationEngine::with_reference(model, backend, settings(dir.path()), &reference).unwrap();

        assert_eq!(engine.max_device_memory_footprint(), 14.0);
        assert_eq!(engine.gpu_memory_footprint().get(&0), Some(&14.0));
        // 40 * 0.85 - 14
        assert!((engine.available_memory_gb() - 20.0).abs() < 1e-9);
        // No table: 7B band, 1 GiB per sequence.
        assert_eq!(engine.infer_best_batch_size(128, 60), 20);
    }

    #[test]
    fn test_host_only_engine_uses_self_reported_footprint() {
        let dir = TempDir::new().unwrap();
        let backend = StubDeviceBackend::new(vec![]).with_host_total(64 * GB);
        let engine = GenerationEngine::attach(backend, settings(dir.path()), || {
            Ok(StubModel::new("org/model-7b"))
        })
        .unwrap();

        assert!(engine.gpu_devices().is_empty());
        assert!(engine.gpu_memory_footprint().is_empty());
        assert_eq!(engine.input_device(), DeviceId::Cpu);
        assert_eq!(engine.memory_footprint().get(DeviceId::Cpu), Some(14.0));
        // 64 * 0.85 - 14
        assert!((engine.available_memory_gb() - 40.4).abs() < 1e-9);
    }

    #[test]
    fn test_calibration_table_loaded_at_attach() {
        let dir = TempDir::new().unwrap();
        let table_dir = dir.path().join("org").join("model-7b");
        std::fs::create_dir_all(&table_dir).unwrap();
        std::fs::write(table_dir.join("float16.json"), r#"{"10": 2.0, "20": 4.0}"#).unwrap();

        let backend = StubDeviceBackend::new(vec![]).with_host_total(64 * GB);
        let engine = GenerationEngine::attach(backend, settings(dir.path()), || {
            Ok(StubModel::new("org/model-7b"))
        })
        .unwrap();

        assert!(engine.estimator().table().is_some());
        let estimate = engine
            .estimator()
            .estimate_detailed(10, 10, engine.available_memory_gb());
        assert!(matches!(estimate.source, EstimateSource::Calibrated { .. }));
        // floor(40.4 / 4.0)
        assert_eq!(estimate.batch_size, 10);
    }

    #[test]
    fn test_invalid_settings_rejected_before_loading() {
        let dir = TempDir::new().unwrap();
        let bad = SchedulerConfig {
            shrink_factor: 1.0,
            ..settings(dir.path())
        };
        let mut loaded = false;
        let result = GenerationEngine::attach(StubDeviceBackend::new(vec![]), bad, || {
            loaded = true;
            Ok(StubModel::new("m"))
        });
        assert!(matches!(result, Err(GenError::Configuration { .. })));
        assert!(!loaded);
    }

    #[test]
    fn test_loader_error_propagates() {
        let dir = TempDir::new().unwrap();
        let result: GenResult<GenerationEngine<StubModel, _>> =
            GenerationEngine::attach(StubDeviceBackend::new(vec![]), settings(dir.path()), || {
                Err(GenError::configuration("weights not found"))
            });
        assert!(result.is_err());
    }

    #[test]
    fn test_generate_through_engine() {
        let dir = TempDir::new().unwrap();
        // 8 GiB host: 8 * 0.85 - 1 = 5.8 GiB -> 5 sequences per batch.
        let backend = StubDeviceBackend::new(vec![]).with_host_total(8 * GB);
        let engine = GenerationEngine::attach(backend, settings(dir.path()), || {
            Ok(StubModel::new("m")
                .with_footprint_bytes(GB)
                .with_max_fitting_batch(4))
        })
        .unwrap();

        let request = GenerationRequest::new(vec![1, 2])
            .with_params(GenerationParams {
                max_new_tokens: 2,
                ..Default::default()
            })
            .with_num_return_sequences(9)
            .with_seed(3);
        let report = engine.generate(&request).unwrap();

        assert_eq!(report.attempted_batch_sizes, vec![5, 4]);
        assert_eq!(report.plan.batches(), &[4, 4, 1]);
        assert_eq!(report.output.len(), 9);
        assert_eq!(engine.model().calls(), vec![5, 4, 4, 1]);
        assert_eq!(engine.backend().release_count(), 1);
        println!("[PASS] engine serves a multi-pass request");
    }
}
