//! Engine configuration and the dependency bundle passed into every step

use std::sync::Arc;
use std::time::Duration;

use edgerenew_acme::{ChallengeKind, DirectoryClient};
use edgerenew_cloud::ResourceAdapter;
use edgerenew_db::{RouteType, Stores};

use crate::alert::Alerter;
use crate::EngineError;

/// Validated engine configuration, built once at process start and passed by
/// reference. No global mutable state.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Contact email used when registering CA accounts
    pub contact_email: String,

    /// The single challenge mechanism this deployment uses
    pub challenge_kind: ChallengeKind,

    /// Renewal window: a route is due once every linked certificate expires
    /// within this many days
    pub renew_before_days: i64,

    /// Account-pool cap: routes per CA account
    pub max_routes_per_account: u64,

    /// Deadline for poll-to-finalization against the CA
    pub acme_poll_timeout: Duration,

    /// Retry budget per retriable step
    pub max_step_attempts: u32,

    /// Fixed interval between step retries
    pub retry_delay: Duration,

    /// Settle time after publishing validation objects
    pub object_store_propagation: Duration,

    /// Daily renewal sweep time-of-day (UTC)
    pub sweep_hour: u32,
    pub sweep_minute: u32,

    /// Daily manual-rotation backport sweep time-of-day (UTC)
    pub backport_hour: u32,
    pub backport_minute: u32,

    /// Queue worker tasks to run
    pub worker_count: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            contact_email: "certificates@example.gov".to_string(),
            challenge_kind: ChallengeKind::Http01,
            renew_before_days: 30,
            max_routes_per_account: 50,
            acme_poll_timeout: Duration::from_secs(90),
            // every 10 minutes for roughly four hours
            max_step_attempts: 24,
            retry_delay: Duration::from_secs(600),
            object_store_propagation: Duration::from_secs(5),
            sweep_hour: 12,
            sweep_minute: 0,
            backport_hour: 13,
            backport_minute: 0,
            worker_count: 4,
        }
    }
}

/// Everything a pipeline step needs, constructed once and shared.
pub struct PipelineContext {
    pub stores: Stores,
    pub directory: Arc<dyn DirectoryClient>,
    pub cdn_adapter: Arc<dyn ResourceAdapter>,
    pub lb_adapter: Arc<dyn ResourceAdapter>,
    pub alerter: Arc<dyn Alerter>,
    pub config: EngineConfig,
}

impl PipelineContext {
    /// Resolve the adapter for a resource-type tag, verifying the adapter
    /// actually serves that class.
    pub fn adapter_for(&self, route_type: RouteType) -> Result<&dyn ResourceAdapter, EngineError> {
        let adapter = match route_type {
            RouteType::Cdn => self.cdn_adapter.as_ref(),
            RouteType::Lb => self.lb_adapter.as_ref(),
        };
        if adapter.route_type() != route_type {
            return Err(EngineError::Contract(format!(
                "adapter for {route_type} reports type {}",
                adapter.route_type()
            )));
        }
        Ok(adapter)
    }
}
