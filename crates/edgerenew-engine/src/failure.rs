//! Terminal-failure reporting
//!
//! Runs exactly once per halted chain: when a step exhausts its retries or
//! a non-retriable step fails. The queued unit's positional payload is the
//! structural convention every step honors — operation id first, then the
//! resource-type tag — so the hook can find the operation without knowing
//! which step failed.

use chrono::Utc;
use sea_orm::{ActiveModelTrait, Set};
use tracing::{debug, error};

use edgerenew_db::entities::operation::{self, OperationState};
use edgerenew_db::queries;

use crate::context::PipelineContext;
use crate::pipeline::QueuedUnit;
use crate::EngineError;

/// Mark the owning operation failed and raise the operator alert.
///
/// A payload that does not resolve to an operation is ignored: the task did
/// not follow the convention and there is nothing safe to mutate.
pub async fn report_terminal_failure(
    ctx: &PipelineContext,
    unit: &QueuedUnit,
    cause: &EngineError,
) {
    let store = ctx.stores.for_type(unit.route_type);

    let operation = match queries::find_operation(&store.db, unit.operation_id).await {
        Ok(Some(operation)) => operation,
        Ok(None) => {
            debug!(
                payload = %unit.payload(),
                "Failed task payload does not reference a known operation; skipping"
            );
            return;
        }
        Err(e) => {
            error!(
                operation_id = unit.operation_id,
                error = %e,
                "Could not load operation for failure reporting"
            );
            return;
        }
    };

    error!(
        operation_id = operation.id,
        route_id = %operation.route_id,
        route_type = %unit.route_type,
        step = unit.step_index,
        cause = %cause,
        "Pipeline halted"
    );

    let route_id = operation.route_id.clone();
    let operation_id = operation.id;

    let mut active: operation::ActiveModel = operation.into();
    active.state = Set(OperationState::Failed);
    active.updated_at = Set(Some(Utc::now()));
    if let Err(e) = active.update(&store.db).await {
        error!(
            operation_id,
            error = %e,
            "Could not persist failed operation state"
        );
        return;
    }

    ctx.alerter
        .send_failed_operation_alert(operation_id, &route_id, unit.route_type)
        .await;
}
