use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use inferlink_core::{
    CompletionCallback, Engine, IOName, InferInput, InferenceRequest, ModelSpec,
    ResponseAllocator, Result, ServerError, Shape, Tensor, TensorSpec,
};
use inferlink_proto::inferlink::v1 as pb;
use prost::Message;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{InferJob, ModelRepository, Scheduler, ServerOptions, Worker};

/// In-process engine serving the models of one repository directory.
///
/// Owns its own tokio runtime; submissions only enqueue, so callers never
/// block on execution.
pub struct LocalServer {
    id: String,
    repository: Arc<ModelRepository>,
    submit_tx: mpsc::Sender<InferJob>,
    strict_readiness: bool,
    shutting_down: AtomicBool,
    started_at: Instant,
    runtime: Option<Runtime>,
}

impl LocalServer {
    pub fn new(options: ServerOptions) -> Result<Self> {
        options.validate()?;
        let repository = Arc::new(ModelRepository::scan(&options.model_repository_path)?);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(options.worker_count)
            .thread_name("inferlink-engine")
            .enable_time()
            .build()
            .map_err(|e| ServerError::Startup(format!("cannot start engine runtime: {e}")))?;

        // ---- Channels: submissions -> scheduler -> worker(s)
        let (submit_tx, submit_rx) = mpsc::channel(options.queue_capacity);
        let mut worker_txs = Vec::with_capacity(options.worker_count);
        for id in 0..options.worker_count {
            let (w_tx, w_rx) = mpsc::channel(options.queue_capacity);
            worker_txs.push(w_tx);
            let worker = Worker {
                id: id as u32,
                inbox: w_rx,
                repository: Arc::clone(&repository),
            };
            runtime.spawn(worker.run());
        }
        runtime.spawn(Scheduler::new(submit_rx, worker_txs).run());

        for (model, delay) in repository.pending_loads() {
            let repository = Arc::clone(&repository);
            runtime.spawn(async move {
                info!(model = %model, delay_ms = delay.as_millis() as u64, "loading model");
                tokio::time::sleep(delay).await;
                repository.finish_load(&model);
            });
        }

        info!(
            id = %options.server_id,
            repository = %repository.root().display(),
            models = ?repository.model_names(),
            workers = options.worker_count,
            "inference server started"
        );

        Ok(Self {
            id: options.server_id,
            repository,
            submit_tx,
            strict_readiness: options.strict_readiness,
            shutting_down: AtomicBool::new(false),
            started_at: Instant::now(),
            runtime: Some(runtime),
        })
    }

    pub fn repository(&self) -> &ModelRepository {
        &self.repository
    }

    /// Stops accepting requests and marks every model unloading. Jobs
    /// already queued still run.
    pub fn shutdown(&self) {
        if !self.shutting_down.swap(true, Ordering::AcqRel) {
            info!(id = %self.id, "inference server shutting down");
            self.repository.unload_all();
        }
    }

    fn status_blob(&self, model: Option<&str>) -> Result<Vec<u8>> {
        let status = pb::ServerStatus {
            id: self.id.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_ns: self.started_at.elapsed().as_nanos() as u64,
            model_status: self.repository.status(model)?,
        };
        Ok(status.encode_to_vec())
    }
}

impl Engine for LocalServer {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_live(&self) -> Result<bool> {
        Ok(!self.shutting_down.load(Ordering::Acquire))
    }

    fn is_ready(&self) -> Result<bool> {
        let live = self.is_live()?;
        Ok(live && (!self.strict_readiness || self.repository.all_ready()))
    }

    fn server_status(&self) -> Result<Vec<u8>> {
        self.status_blob(None)
    }

    fn model_status(&self, model: &str) -> Result<Vec<u8>> {
        self.status_blob(Some(model))
    }

    fn model_spec(&self, model: &str, version: Option<i64>) -> Result<(i64, ModelSpec)> {
        self.repository.resolve(model, version)
    }

    fn infer_async(
        &self,
        request: &InferenceRequest<'_>,
        allocator: Arc<dyn ResponseAllocator>,
        on_complete: CompletionCallback,
    ) -> Result<()> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(ServerError::SchedulingRejected(
                "server is shutting down".to_string(),
            ));
        }
        if let Some(name) = request.unbound_inputs().first() {
            return Err(ServerError::MissingInput(name.to_string()));
        }

        let state = self.repository.ready_state(request.model(), request.version());
        if state != pb::ModelReadyState::ModelReady {
            return Err(ServerError::SchedulingRejected(format!(
                "model '{}' version {} is not ready ({})",
                request.model(),
                request.version(),
                state.as_str_name()
            )));
        }

        // Copy everything out of the caller's buffers before returning.
        let inputs = request
            .inputs()
            .iter()
            .map(|input| copy_input(request, input))
            .collect::<Result<Vec<_>>>()?;

        let job = InferJob {
            id: request.id(),
            model: request.model().to_string(),
            version: request.version(),
            batch_size: request.batch_size(),
            inputs,
            outputs: request.requested_outputs().map(IOName::from).collect(),
            allocator,
            on_complete,
            enqueued_at: Instant::now(),
        };

        match self.submit_tx.try_send(job) {
            Ok(()) => {
                debug!(id = request.id(), model = request.model(), "request accepted");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(id = request.id(), "request queue full");
                Err(ServerError::SchedulingRejected("request queue is full".to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ServerError::SchedulingRejected(
                "request queue is closed".to_string(),
            )),
        }
    }
}

impl Drop for LocalServer {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

fn copy_input(request: &InferenceRequest<'_>, input: &InferInput<'_>) -> Result<(IOName, Tensor)> {
    if !input.memory_type.is_host() {
        return Err(ServerError::InvalidArgument(format!(
            "input '{}' is in {} memory; only host memory is supported",
            input.name, input.memory_type
        )));
    }
    let tensor = request
        .spec()
        .input(input.name.as_str())
        .ok_or_else(|| ServerError::UnknownInput(input.name.to_string()))?;
    let declared_dims = request
        .header()
        .input
        .iter()
        .find(|i| i.name == input.name.as_str())
        .map(|i| i.dims.as_slice())
        .unwrap_or_default();

    let shape = input_shape(
        tensor,
        declared_dims,
        request.spec().max_batch > 0,
        request.batch_size() as usize,
        input.data.len(),
    )?;
    Ok((
        input.name.clone(),
        Tensor::from_cpu_bytes(tensor.dtype, shape, Bytes::copy_from_slice(input.data)),
    ))
}

/// Full shape of a bound input, batch dimension included when the model
/// batches. A single open dim is inferred from the byte length.
fn input_shape(
    tensor: &TensorSpec,
    declared: &[i64],
    batched: bool,
    batch_size: usize,
    byte_len: usize,
) -> Result<Shape> {
    let elem = tensor.dtype.byte_size();
    if byte_len % elem != 0 {
        return Err(ServerError::SizeMismatch {
            name: tensor.name.to_string(),
            expected: byte_len - byte_len % elem,
            actual: byte_len,
        });
    }
    let total = byte_len / elem;
    let per_item = if batched { total / batch_size.max(1) } else { total };

    let mut dims: Vec<Option<usize>> = tensor
        .dims
        .iter()
        .enumerate()
        .map(|(idx, d)| d.or_else(|| declared.get(idx).and_then(|v| usize::try_from(*v).ok())))
        .collect();

    // Header dims come from the caller; any product may overflow.
    let overflow = || ServerError::SizeMismatch {
        name: tensor.name.to_string(),
        expected: usize::MAX,
        actual: byte_len,
    };

    let open: Vec<usize> = (0..dims.len()).filter(|i| dims[*i].is_none()).collect();
    match open.as_slice() {
        [] => {}
        [idx] => {
            let known =
                checked_product(dims.iter().flatten().copied(), 1).ok_or_else(overflow)?;
            dims[*idx] = Some(if known == 0 { 0 } else { per_item / known });
        }
        _ => dims = vec![Some(per_item)],
    }

    let mut shape: Vec<usize> = dims.into_iter().flatten().collect();
    if batched {
        shape.insert(0, batch_size);
    }
    let expected = checked_product(shape.iter().copied(), elem).ok_or_else(overflow)?;
    if expected != byte_len {
        return Err(ServerError::SizeMismatch {
            name: tensor.name.to_string(),
            expected,
            actual: byte_len,
        });
    }
    Ok(Shape::from_slice(&shape))
}

fn checked_product(dims: impl Iterator<Item = usize>, init: usize) -> Option<usize> {
    dims.fold(Some(init), |acc, d| acc?.checked_mul(d))
}
