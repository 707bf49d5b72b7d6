//! Resource-type dispatch and provider capability seams
//!
//! Concrete cloud SDK call shapes are external collaborators, so everything
//! provider-facing is a trait here: [`ObjectStore`], [`CertificateStore`],
//! [`DistributionApi`], [`ListenerApi`]. The two resource classes are
//! unified behind [`ResourceAdapter`], which lets the pipeline steps be
//! written once and specialized per class.

pub mod adapter;
pub mod memory;
pub mod provider;

use serde::{Deserialize, Serialize};

pub use adapter::{CdnAdapter, LbAdapter, PropagationSettings, ResourceAdapter, StoreIdentifiers};
pub use provider::{
    CertificateStore, DistributionApi, DistributionView, ListenerApi, ObjectStore,
    ServerCertificateMetadata,
};
#[cfg(any(test, feature = "mocks"))]
pub use provider::{
    MockCertificateStore, MockDistributionApi, MockListenerApi, MockObjectStore,
};

/// Provider API errors, with the conflict shapes the pipeline treats
/// specially pulled out as their own variants.
#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    /// The store already holds an entity under this name
    #[error("entity already exists: {0}")]
    AlreadyExists(String),

    /// No such entity (missing certificate, unknown resource)
    #[error("no such entity: {0}")]
    NotFound(String),

    /// Optimistic-concurrency conflict (stale ETag)
    #[error("precondition failed: {0}")]
    Conflict(String),

    /// The resource never reached the expected state inside the poll budget
    #[error("timed out waiting for propagation: {0}")]
    PropagationTimeout(String),

    /// Any other provider-side failure; transient from the pipeline's view
    #[error("provider error: {0}")]
    Api(String),
}

/// Cloud partition a resource class lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AwsPartition {
    Commercial,
    GovCloud,
}

impl AwsPartition {
    pub fn as_str(&self) -> &'static str {
        match self {
            AwsPartition::Commercial => "aws",
            AwsPartition::GovCloud => "aws-us-gov",
        }
    }
}

/// Where a resource class's provider calls land: partition, region, the
/// bucket that serves HTTP-01 responses, and the certificate-store path
/// prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderTarget {
    pub partition: AwsPartition,
    pub region: String,
    pub bucket: String,
    pub iam_prefix: String,
}

impl ProviderTarget {
    pub fn new(
        partition: AwsPartition,
        region: impl Into<String>,
        bucket: impl Into<String>,
        iam_prefix: impl Into<String>,
    ) -> Self {
        Self {
            partition,
            region: region.into(),
            bucket: bucket.into(),
            iam_prefix: iam_prefix.into(),
        }
    }
}

/// Deterministic certificate-store name for an upload:
/// `{route-id}-{iso-date}-{certificate-id}`.
pub fn store_certificate_name(
    route_id: &str,
    today: chrono::NaiveDate,
    certificate_id: i32,
) -> String {
    format!("{route_id}-{}-{certificate_id}", today.format("%Y-%m-%d"))
}
