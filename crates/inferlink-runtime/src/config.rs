//! Server options and the per-model `config.toml` format.
//!
//! ```toml
//! platform = "add_sub"
//! max_batch_size = 8
//! versions = [1]
//! output_memory = "cpu"
//!
//! [[input]]
//! name = "INPUT0"
//! data_type = "i32"
//! dims = [16]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use inferlink_core::{DType, IOName, MemoryType, ModelSpec, Result, ServerError, TensorSpec};
use serde::Deserialize;

pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Clone, Debug)]
pub struct ServerOptions {
    pub model_repository_path: PathBuf,
    pub server_id: String,
    pub worker_count: usize,
    pub queue_capacity: usize,
    /// Server reports ready only when every model is ready.
    pub strict_readiness: bool,
}

impl ServerOptions {
    pub fn new(model_repository_path: impl Into<PathBuf>) -> Self {
        Self {
            model_repository_path: model_repository_path.into(),
            server_id: "inference:0".to_string(),
            worker_count: 2,
            queue_capacity: 64,
            strict_readiness: true,
        }
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    pub fn with_strict_readiness(mut self, strict: bool) -> Self {
        self.strict_readiness = strict;
        self
    }

    pub fn with_server_id(mut self, id: impl Into<String>) -> Self {
        self.server_id = id.into();
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.model_repository_path.as_os_str().is_empty() {
            return Err(ServerError::Startup(
                "model repository path must be specified".to_string(),
            ));
        }
        if !self.model_repository_path.is_dir() {
            return Err(ServerError::Startup(format!(
                "model repository '{}' does not exist or is not a directory",
                self.model_repository_path.display()
            )));
        }
        if self.worker_count == 0 || self.queue_capacity == 0 {
            return Err(ServerError::Startup(
                "worker count and queue capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct TensorConfig {
    pub name: String,
    pub data_type: String,
    #[serde(default)]
    pub dims: Vec<i64>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ModelConfig {
    pub platform: String,
    #[serde(default)]
    pub max_batch_size: u32,
    #[serde(default = "default_versions")]
    pub versions: Vec<i64>,
    #[serde(default)]
    pub load_delay_ms: u64,
    #[serde(default = "default_output_memory")]
    pub output_memory: String,
    #[serde(default, rename = "input")]
    pub inputs: Vec<TensorConfig>,
    #[serde(default, rename = "output")]
    pub outputs: Vec<TensorConfig>,
}

fn default_versions() -> Vec<i64> {
    vec![1]
}

fn default_output_memory() -> String {
    "cpu".to_string()
}

impl ModelConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ServerError::Startup(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| ServerError::Startup(format!("invalid model config: {e}")))
    }

    pub fn load_delay(&self) -> Duration {
        Duration::from_millis(self.load_delay_ms)
    }

    pub fn output_memory_type(&self) -> Result<MemoryType> {
        self.output_memory.parse()
    }

    pub fn to_spec(&self, model: &str) -> Result<ModelSpec> {
        if self.versions.is_empty() {
            return Err(ServerError::Startup(format!(
                "model '{model}' declares no versions"
            )));
        }
        if let Some(v) = self.versions.iter().find(|v| **v < 1) {
            return Err(ServerError::Startup(format!(
                "model '{model}' has invalid version {v}"
            )));
        }

        Ok(ModelSpec {
            name: model.to_string(),
            inputs: tensor_specs(&self.inputs)?,
            outputs: tensor_specs(&self.outputs)?,
            max_batch: self.max_batch_size as usize,
        })
    }
}

fn tensor_specs(tensors: &[TensorConfig]) -> Result<Vec<TensorSpec>> {
    tensors
        .iter()
        .map(|t| {
            let dims = t
                .dims
                .iter()
                .map(|d| match *d {
                    -1 => Ok(None),
                    d if d >= 0 => Ok(Some(d as usize)),
                    d => Err(ServerError::Startup(format!(
                        "tensor '{}' has invalid dim {d}",
                        t.name
                    ))),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(TensorSpec {
                name: IOName(t.name.clone()),
                dtype: t.data_type.parse::<DType>()?,
                dims,
            })
        })
        .collect()
}
