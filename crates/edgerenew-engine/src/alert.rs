//! Operator alerting seam
//!
//! Delivery is out of scope; the engine only guarantees the alert carries
//! the operation id, route id and resource type, and fires exactly once per
//! terminal failure.

use async_trait::async_trait;
use tracing::error;

use edgerenew_db::RouteType;

#[async_trait]
pub trait Alerter: Send + Sync {
    async fn send_failed_operation_alert(
        &self,
        operation_id: i32,
        route_id: &str,
        route_type: RouteType,
    );
}

/// Emits the alert as a structured error event for the log pipeline to pick
/// up and route to operators.
pub struct TracingAlerter;

#[async_trait]
impl Alerter for TracingAlerter {
    async fn send_failed_operation_alert(
        &self,
        operation_id: i32,
        route_id: &str,
        route_type: RouteType,
    ) {
        error!(
            operation_id,
            route_id = %route_id,
            route_type = %route_type,
            "Renewal pipeline failed; operator attention required"
        );
    }
}
