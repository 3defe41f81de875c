use std::sync::Arc;
use std::time::Instant;

use inferlink_core::{InferenceResponse, Result, ServerError};
use inferlink_proto::inferlink::v1 as pb;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::{InferJob, ModelRepository, Timings};

pub struct Worker {
    pub id: u32,
    pub inbox: mpsc::Receiver<InferJob>,
    pub repository: Arc<ModelRepository>,
}

impl Worker {
    pub async fn run(mut self) {
        info!(worker_id = self.id, "worker started");
        while let Some(job) = self.inbox.recv().await {
            self.execute(job);
        }
        debug!(worker_id = self.id, "worker stopped");
    }

    /// Runs one job and fires its completion. Allocator calls for the
    /// response all happen before the completion fires.
    pub fn execute(&self, job: InferJob) {
        let queued_us = job.enqueued_at.elapsed().as_micros() as u64;
        let t0 = Instant::now();

        let mut response = InferenceResponse::new(job.id, Arc::clone(&job.allocator));
        let outcome = self.run_job(&job, &mut response);
        let timings = Timings {
            queued_us,
            compute_us: t0.elapsed().as_micros() as u64,
        };

        match outcome {
            Ok(()) => {
                self.repository.record(&job.model, job.version, true);
                debug!(
                    worker_id = self.id,
                    id = job.id,
                    model = %job.model,
                    queued_us = timings.queued_us,
                    compute_us = timings.compute_us,
                    "request completed"
                );
            }
            Err(err) => {
                self.repository.record(&job.model, job.version, false);
                error!(
                    worker_id = self.id,
                    id = job.id,
                    model = %job.model,
                    error = %err,
                    "request failed"
                );
                response.fail(err);
            }
        }

        (job.on_complete)(response);
    }

    fn run_job(&self, job: &InferJob, response: &mut InferenceResponse) -> Result<()> {
        let (kernel, memory_type) = self
            .repository
            .ready_kernel(&job.model, job.version)
            .map_err(|e| ServerError::Execution(e.to_string()))?;

        let outputs = kernel.execute(&job.inputs)?;

        let mut header = pb::InferResponseHeader {
            id: job.id,
            model_name: job.model.clone(),
            model_version: job.version,
            batch_size: job.batch_size,
            output: Vec::with_capacity(job.outputs.len()),
        };

        for name in &job.outputs {
            let tensor = outputs
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, t)| t)
                .ok_or_else(|| {
                    ServerError::Execution(format!("model produced no output '{name}'"))
                })?;
            let byte_size = tensor.byte_len();

            let mut allocation = job
                .allocator
                .allocate(name.as_str(), byte_size, memory_type, 0)
                .map_err(|e| {
                    ServerError::Execution(format!("allocation for '{name}' failed: {e}"))
                })?;

            let short = match allocation.buffer.as_mut() {
                Some(buffer) if buffer.len() >= byte_size => {
                    buffer.as_mut_slice()[..byte_size].copy_from_slice(&tensor.data);
                    None
                }
                Some(buffer) => Some(buffer.len()),
                None if byte_size == 0 => None,
                None => Some(0),
            };

            // Hand the allocation to the response first so a failure below
            // still releases it.
            response.add_output(name.clone(), allocation, byte_size, memory_type, 0);
            if let Some(got) = short {
                return Err(ServerError::Execution(format!(
                    "unable to allocate {byte_size} bytes of {memory_type} memory for output '{name}' (got {got})"
                )));
            }

            let mut dims = tensor.shape.to_dims();
            if kernel.spec().max_batch > 0 && !dims.is_empty() {
                dims.remove(0);
            }
            header.output.push(pb::InferResponseOutput {
                name: name.0.clone(),
                dims,
                batch_byte_size: byte_size as u64,
                data_type: tensor.dtype.to_string(),
            });
            debug!(id = job.id, output = %name, byte_size, "output written");
        }

        response.set_header(&header);
        Ok(())
    }
}
