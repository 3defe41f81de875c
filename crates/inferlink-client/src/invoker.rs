use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use inferlink_core::{
    CompletionCallback, Engine, InferenceRequest, InferenceResponse, ResponseAllocator, Result,
    ServerError,
};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

/// Creates the single-use channel an engine callback resolves.
pub fn completion_channel(id: u64) -> (CompletionSink, CompletionSignal) {
    let (tx, rx) = oneshot::channel();
    (
        CompletionSink { id, tx: Some(tx) },
        CompletionSignal { id, rx },
    )
}

/// Engine-side end of a completion. Resolves at most once.
#[derive(Debug)]
pub struct CompletionSink {
    id: u64,
    tx: Option<oneshot::Sender<InferenceResponse>>,
}

impl CompletionSink {
    /// Delivers `response`. Hands it back when the sink was already
    /// resolved or nobody is waiting anymore; the caller then drops it,
    /// which releases its buffers.
    pub fn resolve(
        &mut self,
        response: InferenceResponse,
    ) -> std::result::Result<(), InferenceResponse> {
        let Some(tx) = self.tx.take() else {
            warn!(
                id = self.id,
                "completion already resolved; rejecting second resolution"
            );
            return Err(response);
        };
        tx.send(response).map_err(|response| {
            debug!(
                id = self.id,
                "completion arrived after the waiter left; releasing response"
            );
            response
        })
    }

    pub fn is_resolved(&self) -> bool {
        self.tx.is_none()
    }
}

/// Caller-side end of a completion. Await it, block on it, or wait with a
/// deadline.
#[derive(Debug)]
pub struct CompletionSignal {
    id: u64,
    rx: oneshot::Receiver<InferenceResponse>,
}

impl CompletionSignal {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Blocks the current thread. Must not be called from async code.
    pub fn blocking_wait(self) -> Result<InferenceResponse> {
        let id = self.id;
        self.rx.blocking_recv().map_err(|_| ServerError::EngineDropped(id))
    }

    /// Gives up after `timeout`. The request keeps running; its response
    /// is released on the engine side when it eventually completes.
    pub async fn wait_timeout(self, timeout: Duration) -> Result<InferenceResponse> {
        let id = self.id;
        match tokio::time::timeout(timeout, self).await {
            Ok(result) => result,
            Err(_) => {
                error!(
                    id,
                    timeout_ms = timeout.as_millis() as u64,
                    "timed out waiting for completion"
                );
                Err(ServerError::CompletionTimeout(id))
            }
        }
    }
}

impl Future for CompletionSignal {
    type Output = Result<InferenceResponse>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let id = this.id;
        Pin::new(&mut this.rx)
            .poll(cx)
            .map(|result| result.map_err(|_| ServerError::EngineDropped(id)))
    }
}

/// Submits requests to an engine with a fixed default allocator.
#[derive(Clone)]
pub struct AsyncInvoker {
    engine: Arc<dyn Engine>,
    allocator: Arc<dyn ResponseAllocator>,
}

impl AsyncInvoker {
    pub fn new(engine: Arc<dyn Engine>, allocator: Arc<dyn ResponseAllocator>) -> Self {
        Self { engine, allocator }
    }

    pub fn submit(&self, request: &InferenceRequest<'_>) -> Result<CompletionSignal> {
        self.submit_with(request, Arc::clone(&self.allocator))
    }

    /// Submits with a per-call allocator. Returns once the engine accepted
    /// the request; the request may be dropped right after.
    pub fn submit_with(
        &self,
        request: &InferenceRequest<'_>,
        allocator: Arc<dyn ResponseAllocator>,
    ) -> Result<CompletionSignal> {
        let (mut sink, signal) = completion_channel(request.id());
        let on_complete: CompletionCallback = Box::new(move |response| {
            // Rejected responses are dropped here, on the engine thread.
            let _ = sink.resolve(response);
        });

        if let Err(err) = self.engine.infer_async(request, allocator, on_complete) {
            error!(
                id = request.id(),
                model = request.model(),
                error = %err,
                "submission rejected"
            );
            return Err(err);
        }
        debug!(id = request.id(), model = request.model(), "request submitted");
        Ok(signal)
    }

    /// Submits, drops the request and awaits the response.
    pub async fn infer(&self, request: InferenceRequest<'_>) -> Result<InferenceResponse> {
        let signal = self.submit(&request)?;
        drop(request);
        signal.await
    }
}
