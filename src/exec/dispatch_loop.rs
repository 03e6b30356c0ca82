// src/exec/dispatch_loop.rs

//! Single-worker loop that hands sealed batches to the dispatcher.

use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::exec::batch::{BatchDispatcher, BatchResults};

/// A sealed batch waiting for the worker.
pub struct DispatchRequest {
    pub batch_id: Uuid,
    pub job_id: Uuid,
    pub size: usize,
    pub payload: Vec<u8>,
    pub reply: oneshot::Sender<anyhow::Result<BatchResults>>,
}

/// Spawn the background dispatch worker.
///
/// Batches are dispatched strictly one after another: package-level
/// concurrency already lives in the scheduler, and the dispatcher itself
/// decides how many tasks of a batch run in parallel.
///
/// The worker exits once every sender has been dropped and the channel is
/// drained.
pub fn spawn_dispatch_worker(
    dispatcher: Arc<dyn BatchDispatcher>,
) -> (mpsc::UnboundedSender<DispatchRequest>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<DispatchRequest>();

    let handle = tokio::spawn(async move {
        info!("dispatch worker started");

        while let Some(request) = rx.recv().await {
            handle_dispatch_request(&dispatcher, request).await;
        }

        info!("dispatch worker finished (channel closed)");
    });

    (tx, handle)
}

async fn handle_dispatch_request(dispatcher: &Arc<dyn BatchDispatcher>, request: DispatchRequest) {
    let DispatchRequest {
        batch_id,
        job_id,
        size,
        payload,
        reply,
    } = request;

    debug!(batch = %batch_id, job = %job_id, size, "dispatching batch");

    // Run the dispatch on its own task so a panic resolves this batch
    // instead of taking the worker down with it.
    let dispatcher = Arc::clone(dispatcher);
    let joined = tokio::spawn(async move { dispatcher.dispatch(payload).await }).await;

    let result = match joined {
        Ok(result) => result,
        Err(e) => Err(anyhow!("batch dispatch panicked: {e}")),
    };

    match &result {
        Ok(results) => debug!(
            batch = %batch_id,
            job = %job_id,
            results = results.len(),
            "batch finished"
        ),
        Err(e) => warn!(
            batch = %batch_id,
            job = %job_id,
            error = %e,
            "batch dispatch failed; all tasks of the batch will fail"
        ),
    }

    if reply.send(result).is_err() {
        debug!(batch = %batch_id, job = %job_id, "no one waiting for batch results");
    }
}
