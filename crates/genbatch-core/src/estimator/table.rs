//! Persisted calibration tables.
//!
//! Layout: `<root>/<model_id>/<precision>.json`, for example
//!
//! ```json
//! { "256": 0.41, "512": 0.78, "1024": 1.52, "only_scale_with_input_size": false }
//! ```
//!
//! A missing file is the normal case for uncalibrated models.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use super::footprint::BatchFootprintModel;
use crate::error::{GenError, GenResult};
use crate::model::PrecisionCategory;

const SCALING_FLAG: &str = "only_scale_with_input_size";

/// Read-only store of calibration tables under one root directory.
#[derive(Debug, Clone)]
pub struct FootprintTableStore {
    root: PathBuf,
}

impl FootprintTableStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File holding the table for a model and precision.
    pub fn path_for(&self, model_id: &str, precision: PrecisionCategory) -> PathBuf {
        self.root
            .join(model_id)
            .join(format!("{}.json", precision.as_str()))
    }

    /// Load a table, or `None` if none was recorded.
    pub fn load(
        &self,
        model_id: &str,
        precision: PrecisionCategory,
    ) -> GenResult<Option<BatchFootprintModel>> {
        let path = self.path_for(model_id, precision);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No footprint table at {}", path.display());
                return Ok(None);
            }
            Err(e) => return Err(GenError::Io(e)),
        };

        let model = parse_table(&content).map_err(|message| GenError::FootprintTable {
            path: path.clone(),
            message,
        })?;
        tracing::debug!(
            "Loaded footprint table {} ({} observations)",
            path.display(),
            model.observations().len()
        );
        Ok(Some(model))
    }
}

fn parse_table(content: &str) -> Result<BatchFootprintModel, String> {
    let mut map: Map<String, Value> = serde_json::from_str(content).map_err(|e| e.to_string())?;

    let only_scale_with_input_size = match map.remove(SCALING_FLAG) {
        None => false,
        Some(Value::Bool(flag)) => flag,
        Some(other) => return Err(format!("{} must be a boolean, got {}", SCALING_FLAG, other)),
    };

    let observations = map
        .into_iter()
        .map(|(key, value)| {
            let length: u64 = key
                .parse()
                .map_err(|_| format!("sequence length key '{}' is not an integer", key))?;
            let memory = value
                .as_f64()
                .filter(|gb| gb.is_finite())
                .ok_or_else(|| format!("memory for length {} is not a number: {}", length, value))?;
            Ok((length, memory))
        })
        .collect::<Result<Vec<_>, String>>()?;

    Ok(BatchFootprintModel::new(observations, only_scale_with_input_size))
}
