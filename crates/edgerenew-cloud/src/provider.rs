//! Provider capability traits
//!
//! One trait per provider service the pipeline touches. Production bindings
//! implement these out-of-tree; tests use the mockall doubles or the
//! in-memory implementations in [`crate::memory`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(any(test, feature = "mocks"))]
use mockall::automock;

use crate::CloudError;

/// Metadata the certificate store reports for an uploaded certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCertificateMetadata {
    pub id: String,
    pub name: String,
    pub arn: String,
    pub expires: Option<DateTime<Utc>>,
    pub uploaded_at: Option<DateTime<Utc>>,
}

/// Object storage: publishes HTTP-01 validation responses.
#[cfg_attr(any(test, feature = "mocks"), automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        server_side_encryption: &str,
    ) -> Result<(), CloudError>;
}

/// IAM-equivalent server-certificate store.
#[cfg_attr(any(test, feature = "mocks"), automock)]
#[async_trait]
pub trait CertificateStore: Send + Sync {
    async fn upload_server_certificate(
        &self,
        path_prefix: &str,
        name: &str,
        certificate_body: &str,
        private_key: &str,
        certificate_chain: &str,
    ) -> Result<ServerCertificateMetadata, CloudError>;

    async fn get_server_certificate(
        &self,
        name: &str,
    ) -> Result<ServerCertificateMetadata, CloudError>;

    async fn delete_server_certificate(&self, name: &str) -> Result<(), CloudError>;
}

/// What a read of the distribution's current config yields: the fields the
/// renewal flow needs plus the ETag guarding the write-back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionView {
    pub etag: String,
    pub viewer_certificate_id: Option<String>,
}

/// CDN distribution API with optimistic concurrency on updates.
#[cfg_attr(any(test, feature = "mocks"), automock)]
#[async_trait]
pub trait DistributionApi: Send + Sync {
    async fn get_distribution_config(
        &self,
        distribution_id: &str,
    ) -> Result<DistributionView, CloudError>;

    /// Write back the viewer certificate. Fails with
    /// [`CloudError::Conflict`] when `etag` is stale.
    async fn set_viewer_certificate(
        &self,
        distribution_id: &str,
        etag: &str,
        certificate_id: &str,
    ) -> Result<(), CloudError>;

    /// Deployment status of the distribution ("InProgress" or "Deployed").
    async fn get_distribution_status(&self, distribution_id: &str) -> Result<String, CloudError>;
}

/// Load-balancer listener certificate API.
#[cfg_attr(any(test, feature = "mocks"), automock)]
#[async_trait]
pub trait ListenerApi: Send + Sync {
    async fn add_listener_certificate(
        &self,
        listener_arn: &str,
        certificate_arn: &str,
    ) -> Result<(), CloudError>;

    async fn remove_listener_certificate(
        &self,
        listener_arn: &str,
        certificate_arn: &str,
    ) -> Result<(), CloudError>;

    async fn list_listener_certificates(
        &self,
        listener_arn: &str,
    ) -> Result<Vec<String>, CloudError>;
}
