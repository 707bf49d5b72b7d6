//! The step driver and worker loop
//!
//! A worker pops one queued unit, executes its step, and decides what runs
//! next: the following descriptor on success, the same step after the fixed
//! retry interval on a transient failure, or the failure hook when the
//! budget is spent. Within one operation steps never overlap or reorder;
//! across operations there is no coordination at all.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use edgerenew_db::queries;

use crate::context::PipelineContext;
use crate::failure;
use crate::pipeline::{renewal_chain, QueuedUnit, StepDescriptor, VALIDATION_REWIND_INDEX};
use crate::queue::TaskQueue;
use crate::steps;
use crate::EngineError;

/// Spawn the worker pool. Returns the join handles so the caller can await
/// shutdown.
pub fn spawn_workers(
    ctx: Arc<PipelineContext>,
    queue: TaskQueue,
    rx: mpsc::UnboundedReceiver<QueuedUnit>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let shared = Arc::new(Mutex::new(rx));
    let worker_count = ctx.config.worker_count.max(1);

    (0..worker_count)
        .map(|worker| {
            let ctx = Arc::clone(&ctx);
            let queue = queue.clone();
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                debug!(worker, "Pipeline worker started");
                loop {
                    let unit = {
                        let mut rx = shared.lock().await;
                        rx.recv().await
                    };
                    match unit {
                        Some(unit) => run_unit(&ctx, &queue, unit).await,
                        None => break,
                    }
                }
                debug!(worker, "Pipeline worker stopped");
            })
        })
        .collect()
}

/// Execute one queued unit and schedule whatever follows it.
pub async fn run_unit(ctx: &PipelineContext, queue: &TaskQueue, unit: QueuedUnit) {
    let chain = renewal_chain(unit.route_type);
    let Some(descriptor) = chain.get(unit.step_index) else {
        error!(payload = %unit.payload(), step = unit.step_index, "Queued step is out of range");
        return;
    };

    // terminal states are final; a late-arriving unit must not run
    let store = ctx.stores.for_type(unit.route_type);
    match queries::find_operation(&store.db, unit.operation_id).await {
        Ok(Some(operation)) if operation.state.is_terminal() => {
            warn!(
                operation_id = unit.operation_id,
                state = ?operation.state,
                step = %descriptor.name,
                "Operation already terminal; dropping queued step"
            );
            return;
        }
        Ok(Some(_)) => {}
        Ok(None) => {
            warn!(
                payload = %unit.payload(),
                "Queued step references an unknown operation; dropping"
            );
            return;
        }
        // let the step itself surface the database failure through the
        // normal retry path
        Err(_) => {}
    }

    debug!(
        operation_id = unit.operation_id,
        route_type = %unit.route_type,
        step = %descriptor.name,
        attempt = unit.attempt,
        "Executing step"
    );

    match steps::execute(ctx, &unit, descriptor.name).await {
        Ok(()) => {
            info!(
                operation_id = unit.operation_id,
                step = %descriptor.name,
                "Step completed"
            );
            if unit.step_index + 1 < chain.len() {
                let next = QueuedUnit {
                    operation_id: unit.operation_id,
                    route_type: unit.route_type,
                    step_index: unit.step_index + 1,
                    attempt: 1,
                };
                if queue.enqueue(next).is_err() {
                    error!(operation_id = unit.operation_id, "Queue closed mid-chain");
                }
            }
        }
        Err(cause) => handle_step_failure(ctx, queue, unit, descriptor, cause).await,
    }
}

async fn handle_step_failure(
    ctx: &PipelineContext,
    queue: &TaskQueue,
    unit: QueuedUnit,
    descriptor: &StepDescriptor,
    cause: EngineError,
) {
    let attempts_left =
        descriptor.retriable && cause.is_retriable() && unit.attempt < ctx.config.max_step_attempts;

    if !attempts_left {
        failure::report_terminal_failure(ctx, &unit, &cause).await;
        return;
    }

    // a rejected authorization rewinds to key/CSR generation so the retry
    // starts a clean attempt; everything else re-runs the same step
    let next_index = if cause.is_validation_failure() {
        VALIDATION_REWIND_INDEX
    } else {
        unit.step_index
    };

    let retry = QueuedUnit {
        operation_id: unit.operation_id,
        route_type: unit.route_type,
        step_index: next_index,
        attempt: unit.attempt + 1,
    };

    warn!(
        operation_id = unit.operation_id,
        step = %descriptor.name,
        attempt = unit.attempt,
        max_attempts = ctx.config.max_step_attempts,
        error = %cause,
        "Step failed; scheduling retry"
    );

    let delay = ctx.config.retry_delay;
    if delay.is_zero() {
        if queue.enqueue(retry).is_err() {
            error!(operation_id = retry.operation_id, "Queue closed while retrying");
        }
        return;
    }

    let queue = queue.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if queue.enqueue(retry).is_err() {
            error!(operation_id = retry.operation_id, "Queue closed while retrying");
        }
    });
}

/// Process queued units inline until the queue is momentarily empty.
///
/// Deterministic single-worker execution for tests and one-shot runs; with
/// a zero retry interval, retries are processed in the same drain.
pub async fn drain_queue(
    ctx: &PipelineContext,
    queue: &TaskQueue,
    rx: &mut mpsc::UnboundedReceiver<QueuedUnit>,
) {
    while let Ok(unit) = rx.try_recv() {
        run_unit(ctx, queue, unit).await;
    }
}
