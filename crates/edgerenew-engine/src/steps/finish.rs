//! Terminal success step

use chrono::Utc;
use sea_orm::{ActiveModelTrait, Set};
use tracing::info;

use edgerenew_db::entities::operation::{self, OperationState};
use edgerenew_db::{queries, RouteType};

use super::{begin, commit};
use crate::context::PipelineContext;
use crate::EngineError;

/// Close out the operation. The chain only reaches this step after every
/// earlier step committed, so the route is now serving the new certificate.
pub async fn mark_operation_succeeded(
    ctx: &PipelineContext,
    operation_id: i32,
    route_type: RouteType,
) -> Result<(), EngineError> {
    let store = ctx.stores.for_type(route_type);
    let txn = begin(store).await?;

    let op = queries::get_operation(&txn, operation_id).await?;
    if op.state == OperationState::Succeeded {
        return commit(txn).await;
    }

    let route_id = op.route_id.clone();
    let mut active: operation::ActiveModel = op.into();
    active.state = Set(OperationState::Succeeded);
    active.updated_at = Set(Some(Utc::now()));
    active.update(&txn).await.map_err(edgerenew_db::DbError::Db)?;

    info!(operation_id, route = %route_id, "Renewal succeeded");

    commit(txn).await
}
