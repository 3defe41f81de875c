use std::sync::Arc;
use std::time::Instant;

use inferlink_core::{CompletionCallback, IOName, ResponseAllocator, Tensor};

/// An accepted request, detached from the caller's buffers.
pub struct InferJob {
    pub id: u64,
    pub model: String,
    pub version: i64,
    pub batch_size: u32,
    pub inputs: Vec<(IOName, Tensor)>,
    pub outputs: Vec<IOName>,
    pub allocator: Arc<dyn ResponseAllocator>,
    pub on_complete: CompletionCallback,
    pub enqueued_at: Instant,
}

impl std::fmt::Debug for InferJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferJob")
            .field("id", &self.id)
            .field("model", &self.model)
            .field("version", &self.version)
            .field("batch_size", &self.batch_size)
            .field("inputs", &self.inputs.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .field("outputs", &self.outputs)
            .finish()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Timings {
    pub queued_us: u64,
    pub compute_us: u64,
}
