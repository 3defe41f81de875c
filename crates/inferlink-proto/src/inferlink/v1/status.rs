use std::collections::HashMap;

/// Readiness of one model version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ModelReadyState {
    ModelUnknown = 0,
    ModelReady = 1,
    ModelUnavailable = 2,
    ModelLoading = 3,
    ModelUnloading = 4,
}

impl ModelReadyState {
    pub fn as_str_name(&self) -> &'static str {
        match self {
            ModelReadyState::ModelUnknown => "MODEL_UNKNOWN",
            ModelReadyState::ModelReady => "MODEL_READY",
            ModelReadyState::ModelUnavailable => "MODEL_UNAVAILABLE",
            ModelReadyState::ModelLoading => "MODEL_LOADING",
            ModelReadyState::ModelUnloading => "MODEL_UNLOADING",
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ModelVersionStatus {
    #[prost(enumeration = "ModelReadyState", tag = "1")]
    pub ready_state: i32,
    #[prost(uint64, tag = "2")]
    pub inference_count: u64,
    #[prost(uint64, tag = "3")]
    pub failure_count: u64,
}

impl ModelVersionStatus {
    /// Unknown wire values read as `ModelUnknown`.
    pub fn state(&self) -> ModelReadyState {
        ModelReadyState::try_from(self.ready_state).unwrap_or(ModelReadyState::ModelUnknown)
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ModelStatus {
    #[prost(string, tag = "1")]
    pub platform: String,
    #[prost(uint32, tag = "2")]
    pub max_batch_size: u32,
    #[prost(map = "int64, message", tag = "3")]
    pub version_status: HashMap<i64, ModelVersionStatus>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServerStatus {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub version: String,
    #[prost(uint64, tag = "3")]
    pub uptime_ns: u64,
    #[prost(map = "string, message", tag = "4")]
    pub model_status: HashMap<String, ModelStatus>,
}
