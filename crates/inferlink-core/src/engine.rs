use std::sync::Arc;

use crate::{InferenceRequest, InferenceResponse, ModelSpec, ResponseAllocator, Result};

/// Fired once, on an engine thread, when an accepted request completes.
/// Must not block.
pub type CompletionCallback = Box<dyn FnOnce(InferenceResponse) + Send + 'static>;

/// The narrow seam to an inference engine.
///
/// Everything the client knows about the engine goes through this trait:
/// health, serialized status blobs, model metadata and asynchronous
/// submission.
pub trait Engine: Send + Sync + 'static {
    fn id(&self) -> &str;

    fn is_live(&self) -> Result<bool>;
    fn is_ready(&self) -> Result<bool>;

    /// Serialized `ServerStatus` covering every model.
    fn server_status(&self) -> Result<Vec<u8>>;

    /// Serialized `ServerStatus` restricted to `model`.
    fn model_status(&self, model: &str) -> Result<Vec<u8>>;

    /// Resolves `version` (`None` = latest) and returns the model's IO spec.
    fn model_spec(&self, model: &str, version: Option<i64>) -> Result<(i64, ModelSpec)>;

    /// Accepts `request` for execution without waiting for it.
    ///
    /// The engine copies every bound input before returning, so the request
    /// may be dropped right after. On `Err` the callback is dropped unfired;
    /// on `Ok` it fires exactly once.
    fn infer_async(
        &self,
        request: &InferenceRequest<'_>,
        allocator: Arc<dyn ResponseAllocator>,
        on_complete: CompletionCallback,
    ) -> Result<()>;
}
