use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use inferlink_core::{MemoryType, ModelSpec, Result, ServerError};
use inferlink_proto::inferlink::v1 as pb;
use tracing::{error, info, warn};

use crate::{Kernel, ModelConfig, Platform, CONFIG_FILE_NAME};

#[derive(Clone, Copy, Debug)]
struct VersionState {
    state: pb::ModelReadyState,
    inference_count: u64,
    failure_count: u64,
}

impl VersionState {
    fn new(state: pb::ModelReadyState) -> Self {
        Self {
            state,
            inference_count: 0,
            failure_count: 0,
        }
    }
}

struct ModelEntry {
    config: Option<ModelConfig>,
    spec: Option<ModelSpec>,
    kernel: Option<Arc<Kernel>>,
    versions: BTreeMap<i64, VersionState>,
}

impl ModelEntry {
    fn unavailable() -> Self {
        Self {
            config: None,
            spec: None,
            kernel: None,
            versions: BTreeMap::from([(1, VersionState::new(pb::ModelReadyState::ModelUnavailable))]),
        }
    }

    fn set_state(&mut self, state: pb::ModelReadyState) {
        for version in self.versions.values_mut() {
            version.state = state;
        }
    }

    fn is_ready(&self) -> bool {
        self.versions
            .values()
            .all(|v| v.state == pb::ModelReadyState::ModelReady)
    }
}

/// Models found under a repository directory and their ready states.
pub struct ModelRepository {
    root: PathBuf,
    models: RwLock<BTreeMap<String, ModelEntry>>,
}

impl ModelRepository {
    /// Scans `root` for `<model>/config.toml`. Unparseable models are kept
    /// as unavailable so readiness reports them instead of startup failing.
    pub fn scan(root: &Path) -> Result<Self> {
        let mut models = BTreeMap::new();
        let mut dirs = std::fs::read_dir(root)
            .map_err(|e| {
                ServerError::Startup(format!(
                    "cannot read model repository '{}': {e}",
                    root.display()
                ))
            })?
            .collect::<std::io::Result<Vec<_>>>()?;
        dirs.sort_by_key(|d| d.file_name());

        for dir in dirs {
            if !dir.file_type()?.is_dir() {
                continue;
            }
            let name = dir.file_name().to_string_lossy().into_owned();
            let entry = match load_entry(&name, &dir.path().join(CONFIG_FILE_NAME)) {
                Ok(entry) => entry,
                Err(err) => {
                    error!(model = %name, error = %err, "model is unavailable");
                    ModelEntry::unavailable()
                }
            };
            models.insert(name, entry);
        }

        info!(root = %root.display(), models = models.len(), "scanned model repository");
        Ok(Self {
            root: root.to_path_buf(),
            models: RwLock::new(models),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn model_names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Models still waiting to load, with their configured load delay.
    pub fn pending_loads(&self) -> Vec<(String, Duration)> {
        self.read()
            .iter()
            .filter_map(|(name, entry)| {
                let config = entry.config.as_ref()?;
                entry
                    .versions
                    .values()
                    .any(|v| v.state == pb::ModelReadyState::ModelLoading)
                    .then(|| (name.clone(), config.load_delay()))
            })
            .collect()
    }

    /// Builds the kernel for `model` and flips it to ready, or to
    /// unavailable when the config does not fit its platform.
    pub fn finish_load(&self, model: &str) {
        let mut models = self.write();
        let Some(entry) = models.get_mut(model) else {
            warn!(model, "load finished for unknown model");
            return;
        };
        if entry.versions.values().any(|v| v.state != pb::ModelReadyState::ModelLoading) {
            return;
        }

        let loaded = match (&entry.config, &entry.spec) {
            (Some(config), Some(spec)) => config
                .platform
                .parse::<Platform>()
                .and_then(|platform| Kernel::new(platform, spec.clone())),
            _ => Err(ServerError::Startup("model has no usable config".to_string())),
        };

        match loaded {
            Ok(kernel) => {
                info!(
                    model,
                    platform = kernel.platform().as_str(),
                    versions = ?entry.versions.keys().collect::<Vec<_>>(),
                    "model ready"
                );
                entry.kernel = Some(Arc::new(kernel));
                entry.set_state(pb::ModelReadyState::ModelReady);
            }
            Err(err) => {
                entry.set_state(pb::ModelReadyState::ModelUnavailable);
                error!(model, error = %err, "failed to load model");
            }
        }
    }

    pub fn unload_all(&self) {
        for (name, entry) in self.write().iter_mut() {
            entry.set_state(pb::ModelReadyState::ModelUnloading);
            info!(model = %name, "model unloading");
        }
    }

    pub fn all_ready(&self) -> bool {
        self.read().values().all(ModelEntry::is_ready)
    }

    /// `None` resolves to the highest configured version.
    pub fn resolve(&self, model: &str, version: Option<i64>) -> Result<(i64, ModelSpec)> {
        let models = self.read();
        let invalid = || ServerError::InvalidModel {
            model: model.to_string(),
            version: version.map_or_else(|| "latest".to_string(), |v| v.to_string()),
        };

        let entry = models.get(model).ok_or_else(invalid)?;
        let spec = entry.spec.as_ref().ok_or_else(invalid)?;
        let resolved = match version {
            None => *entry.versions.keys().next_back().ok_or_else(invalid)?,
            Some(v) if entry.versions.contains_key(&v) => v,
            Some(_) => return Err(invalid()),
        };
        Ok((resolved, spec.clone()))
    }

    pub fn ready_state(&self, model: &str, version: i64) -> pb::ModelReadyState {
        self.read()
            .get(model)
            .and_then(|e| e.versions.get(&version))
            .map_or(pb::ModelReadyState::ModelUnknown, |v| v.state)
    }

    /// Kernel and output memory type for a ready model version.
    pub fn ready_kernel(&self, model: &str, version: i64) -> Result<(Arc<Kernel>, MemoryType)> {
        let models = self.read();
        let entry = models.get(model).ok_or_else(|| ServerError::InvalidModel {
            model: model.to_string(),
            version: version.to_string(),
        })?;
        let state = entry
            .versions
            .get(&version)
            .map_or(pb::ModelReadyState::ModelUnknown, |v| v.state);

        match (state, &entry.kernel, &entry.config) {
            (pb::ModelReadyState::ModelReady, Some(kernel), Some(config)) => {
                Ok((Arc::clone(kernel), config.output_memory_type()?))
            }
            _ => Err(ServerError::SchedulingRejected(format!(
                "model '{model}' version {version} is not ready ({})",
                state.as_str_name()
            ))),
        }
    }

    pub fn record(&self, model: &str, version: i64, success: bool) {
        if let Some(v) = self
            .write()
            .get_mut(model)
            .and_then(|e| e.versions.get_mut(&version))
        {
            if success {
                v.inference_count += 1;
            } else {
                v.failure_count += 1;
            }
        }
    }

    /// Status table for every model, or just `model` when given.
    pub fn status(&self, model: Option<&str>) -> Result<HashMap<String, pb::ModelStatus>> {
        let models = self.read();
        if let Some(name) = model {
            if !models.contains_key(name) {
                return Err(ServerError::InvalidModel {
                    model: name.to_string(),
                    version: "any".to_string(),
                });
            }
        }

        Ok(models
            .iter()
            .filter(|(name, _)| model.map_or(true, |m| m == name.as_str()))
            .map(|(name, entry)| {
                let status = pb::ModelStatus {
                    platform: entry
                        .config
                        .as_ref()
                        .map(|c| c.platform.clone())
                        .unwrap_or_default(),
                    max_batch_size: entry.config.as_ref().map_or(0, |c| c.max_batch_size),
                    version_status: entry
                        .versions
                        .iter()
                        .map(|(v, s)| {
                            (
                                *v,
                                pb::ModelVersionStatus {
                                    ready_state: s.state as i32,
                                    inference_count: s.inference_count,
                                    failure_count: s.failure_count,
                                },
                            )
                        })
                        .collect(),
                };
                (name.clone(), status)
            })
            .collect())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, ModelEntry>> {
        self.models.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, ModelEntry>> {
        self.models.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn load_entry(name: &str, config_path: &Path) -> Result<ModelEntry> {
    let config = ModelConfig::from_file(config_path)?;
    let spec = config.to_spec(name)?;
    config.output_memory_type()?;
    let versions = config
        .versions
        .iter()
        .map(|v| (*v, VersionState::new(pb::ModelReadyState::ModelLoading)))
        .collect();
    Ok(ModelEntry {
        config: Some(config),
        spec: Some(spec),
        kernel: None,
        versions,
    })
}
