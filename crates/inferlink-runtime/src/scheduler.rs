use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::InferJob;

/// Round-robins accepted jobs over the worker inboxes.
pub struct Scheduler {
    rx: mpsc::Receiver<InferJob>,
    worker_txs: Vec<mpsc::Sender<InferJob>>,
    rr: usize,
}

impl Scheduler {
    pub fn new(rx: mpsc::Receiver<InferJob>, worker_txs: Vec<mpsc::Sender<InferJob>>) -> Self {
        Self {
            rx,
            worker_txs,
            rr: 0,
        }
    }

    pub async fn run(mut self) {
        while let Some(mut job) = self.rx.recv().await {
            // Skip workers whose inbox is gone; a job that finds none is
            // dropped, which drops its completion unfired.
            let mut delivered = false;
            for _ in 0..self.worker_txs.len() {
                let idx = self.rr % self.worker_txs.len();
                self.rr += 1;
                debug!(id = job.id, worker = idx, "dispatching request");
                match self.worker_txs[idx].send(job).await {
                    Ok(()) => {
                        delivered = true;
                        break;
                    }
                    Err(mpsc::error::SendError(returned)) => job = returned,
                }
            }
            if !delivered {
                warn!("no worker available; scheduler exiting");
                break;
            }
        }
    }
}
