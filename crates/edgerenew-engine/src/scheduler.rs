//! Periodic sweeps
//!
//! Two daily triggers: the renewal sweep that enqueues a pipeline per due
//! route, and the backport sweep that records certificates rotated manually
//! outside the system. Each runs at a fixed time-of-day; per-route failures
//! are logged and never stop the rest of the sweep.

use chrono::{DateTime, Timelike, Utc};
use sea_orm::{ActiveModelTrait, NotSet, Set};
use tracing::{error, info, warn};

use edgerenew_db::entities::{certificate, operation};
use edgerenew_db::{queries, RouteType};

use crate::context::PipelineContext;
use crate::pipeline::QueuedUnit;
use crate::queue::TaskQueue;
use crate::EngineError;

/// Scan both stores for provisioned routes whose certificates all expire
/// inside the renewal window, and enqueue one pipeline per due route.
/// Returns how many operations were created.
pub async fn renewal_sweep(ctx: &PipelineContext, queue: &TaskQueue) -> Result<u32, EngineError> {
    let now = Utc::now();
    let mut enqueued = 0;

    for route_type in [RouteType::Cdn, RouteType::Lb] {
        let store = ctx.stores.for_type(route_type);
        let routes = queries::find_active_routes(&store.db).await?;

        for route in routes {
            let due = match queries::route_needs_renewal(
                &store.db,
                &route,
                ctx.config.renew_before_days,
                now,
            )
            .await
            {
                Ok(due) => due,
                Err(e) => {
                    warn!(
                        route = %route.instance_id,
                        route_type = %route_type,
                        error = %e,
                        "Could not evaluate renewal window; skipping route"
                    );
                    continue;
                }
            };
            if !due {
                continue;
            }

            info!(
                route = %route.instance_id,
                route_type = %route_type,
                "Queuing renewal"
            );

            let inserted = operation::ActiveModel {
                id: NotSet,
                route_id: Set(route.instance_id.clone()),
                certificate_id: Set(None),
                state: Set(operation::OperationState::InProgress),
                action: Set(operation::OperationAction::Renew),
                created_at: Set(Utc::now()),
                updated_at: Set(None),
            }
            .insert(&store.db)
            .await
            .map_err(edgerenew_db::DbError::Db)?;

            queue.enqueue(QueuedUnit::start(inserted.id, route_type))?;
            enqueued += 1;
        }
    }

    Ok(enqueued)
}

/// Record certificates that were rotated on listeners outside this system.
/// Pure reconciliation: certificate identifiers attached to a route's
/// listener but unknown to the store get a certificate row with metadata
/// fetched from the certificate store. No pipeline is involved.
pub async fn backport_sweep(ctx: &PipelineContext) -> Result<u32, EngineError> {
    let store = ctx.stores.for_type(RouteType::Lb);
    let adapter = ctx.adapter_for(RouteType::Lb)?;
    let mut recorded = 0;

    for route in queries::find_active_routes(&store.db).await? {
        let Some(resource_ref) = route.resource_ref.clone() else {
            continue;
        };

        let attached = match adapter.list_attached_certificates(&resource_ref).await {
            Ok(attached) => attached,
            Err(e) => {
                warn!(
                    route = %route.instance_id,
                    error = %e,
                    "Could not list listener certificates; skipping route"
                );
                continue;
            }
        };

        for arn in attached {
            // listeners can also carry certificates for other instances
            if !arn.contains(&route.instance_id) {
                continue;
            }
            if queries::knows_store_arn(&store.db, &route.instance_id, &arn).await? {
                continue;
            }

            let name = arn.rsplit('/').next().unwrap_or(&arn).to_string();
            let metadata = match adapter.certificate_store().get_server_certificate(&name).await {
                Ok(metadata) => metadata,
                Err(e) => {
                    error!(
                        route = %route.instance_id,
                        name = %name,
                        error = %e,
                        "Could not fetch metadata for manually rotated certificate"
                    );
                    continue;
                }
            };

            info!(
                route = %route.instance_id,
                arn = %arn,
                "Backporting manually rotated certificate"
            );

            certificate::ActiveModel {
                id: NotSet,
                route_id: Set(Some(route.instance_id.clone())),
                private_key_pem: Set(None),
                csr_pem: Set(None),
                order_json: Set(None),
                leaf_pem: Set(None),
                fullchain_pem: Set(None),
                expires: Set(metadata.expires),
                iam_server_certificate_id: Set(Some(metadata.id)),
                iam_server_certificate_name: Set(Some(metadata.name)),
                iam_server_certificate_arn: Set(Some(arn)),
                created_at: Set(Utc::now()),
                updated_at: Set(None),
            }
            .insert(&store.db)
            .await
            .map_err(edgerenew_db::DbError::Db)?;
            recorded += 1;
        }
    }

    Ok(recorded)
}

/// Time until the next occurrence of `hour:minute` UTC.
pub fn duration_until_next(now: DateTime<Utc>, hour: u32, minute: u32) -> std::time::Duration {
    let today = now
        .with_hour(hour)
        .and_then(|t| t.with_minute(minute))
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);

    let next = if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    };

    (next - now).to_std().unwrap_or_default()
}

/// Run the renewal sweep daily at the configured time-of-day.
pub async fn run_renewal_sweep_daily(ctx: std::sync::Arc<PipelineContext>, queue: TaskQueue) {
    loop {
        let pause = duration_until_next(Utc::now(), ctx.config.sweep_hour, ctx.config.sweep_minute);
        info!(in_secs = pause.as_secs(), "Next renewal sweep scheduled");
        tokio::time::sleep(pause).await;

        match renewal_sweep(&ctx, &queue).await {
            Ok(count) => info!(operations = count, "Renewal sweep finished"),
            Err(e) => error!(error = %e, "Renewal sweep failed"),
        }
    }
}

/// Run the backport sweep daily at the configured time-of-day.
pub async fn run_backport_sweep_daily(ctx: std::sync::Arc<PipelineContext>) {
    loop {
        let pause = duration_until_next(
            Utc::now(),
            ctx.config.backport_hour,
            ctx.config.backport_minute,
        );
        info!(in_secs = pause.as_secs(), "Next backport sweep scheduled");
        tokio::time::sleep(pause).await;

        match backport_sweep(&ctx).await {
            Ok(count) => info!(certificates = count, "Backport sweep finished"),
            Err(e) => error!(error = %e, "Backport sweep failed"),
        }
    }
}
