//! Resource adapters: one capability object per resource class

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use edgerenew_db::RouteType;

use crate::provider::{CertificateStore, DistributionApi, ListenerApi, ObjectStore};
use crate::{CloudError, ProviderTarget};

/// Certificate-store identifiers carried between steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreIdentifiers {
    pub id: String,
    pub name: String,
    pub arn: String,
}

/// Bounded polling budget for propagation waits.
#[derive(Debug, Clone, Copy)]
pub struct PropagationSettings {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl Default for PropagationSettings {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(30),
            max_attempts: 20,
        }
    }
}

/// The capability surface the pipeline steps use, written once and
/// specialized per resource class. An explicit tag keeps dispatch visible in
/// every pipeline payload.
#[async_trait]
pub trait ResourceAdapter: Send + Sync {
    fn route_type(&self) -> RouteType;

    fn target(&self) -> &ProviderTarget;

    fn certificate_store(&self) -> &dyn CertificateStore;

    fn object_store(&self) -> &dyn ObjectStore;

    /// Attach the uploaded certificate to the live resource.
    ///
    /// CDN: read-modify-write of the distribution's viewer certificate
    /// against its current ETag. Load balancer: add the certificate to the
    /// listener, then drop the previous listener certificate — but only when
    /// its identifier differs from the new one, so a retried step never
    /// deletes the certificate it just added.
    async fn associate_certificate(
        &self,
        resource_ref: &str,
        new_cert: &StoreIdentifiers,
        previous: Option<&StoreIdentifiers>,
    ) -> Result<(), CloudError>;

    /// Block until the edge resource has finished propagating, inside the
    /// configured poll budget.
    async fn wait_for_propagation(
        &self,
        resource_ref: &str,
        new_cert: &StoreIdentifiers,
    ) -> Result<(), CloudError>;

    /// Certificate identifiers currently attached out-of-band. Only
    /// meaningful for listeners; the CDN class reports none.
    async fn list_attached_certificates(
        &self,
        resource_ref: &str,
    ) -> Result<Vec<String>, CloudError>;
}

/// CDN distribution adapter.
pub struct CdnAdapter {
    target: ProviderTarget,
    certificate_store: Arc<dyn CertificateStore>,
    object_store: Arc<dyn ObjectStore>,
    distributions: Arc<dyn DistributionApi>,
    propagation: PropagationSettings,
}

impl CdnAdapter {
    pub fn new(
        target: ProviderTarget,
        certificate_store: Arc<dyn CertificateStore>,
        object_store: Arc<dyn ObjectStore>,
        distributions: Arc<dyn DistributionApi>,
        propagation: PropagationSettings,
    ) -> Self {
        Self {
            target,
            certificate_store,
            object_store,
            distributions,
            propagation,
        }
    }
}

#[async_trait]
impl ResourceAdapter for CdnAdapter {
    fn route_type(&self) -> RouteType {
        RouteType::Cdn
    }

    fn target(&self) -> &ProviderTarget {
        &self.target
    }

    fn certificate_store(&self) -> &dyn CertificateStore {
        self.certificate_store.as_ref()
    }

    fn object_store(&self) -> &dyn ObjectStore {
        self.object_store.as_ref()
    }

    async fn associate_certificate(
        &self,
        resource_ref: &str,
        new_cert: &StoreIdentifiers,
        _previous: Option<&StoreIdentifiers>,
    ) -> Result<(), CloudError> {
        let view = self
            .distributions
            .get_distribution_config(resource_ref)
            .await?;

        if view.viewer_certificate_id.as_deref() == Some(new_cert.id.as_str()) {
            debug!(
                distribution = %resource_ref,
                certificate_id = %new_cert.id,
                "Viewer certificate already current"
            );
            return Ok(());
        }

        self.distributions
            .set_viewer_certificate(resource_ref, &view.etag, &new_cert.id)
            .await?;

        info!(
            distribution = %resource_ref,
            certificate_id = %new_cert.id,
            "Updated distribution viewer certificate"
        );
        Ok(())
    }

    async fn wait_for_propagation(
        &self,
        resource_ref: &str,
        _new_cert: &StoreIdentifiers,
    ) -> Result<(), CloudError> {
        for attempt in 1..=self.propagation.max_attempts {
            let status = self
                .distributions
                .get_distribution_status(resource_ref)
                .await?;
            if status == "Deployed" {
                debug!(distribution = %resource_ref, attempt, "Distribution deployed");
                return Ok(());
            }
            tokio::time::sleep(self.propagation.delay).await;
        }

        Err(CloudError::PropagationTimeout(format!(
            "distribution {resource_ref} still not deployed after {} attempts",
            self.propagation.max_attempts
        )))
    }

    async fn list_attached_certificates(
        &self,
        _resource_ref: &str,
    ) -> Result<Vec<String>, CloudError> {
        // distributions hold exactly one viewer certificate, which the
        // renewal flow already tracks; nothing to reconcile out-of-band
        Ok(Vec::new())
    }
}

/// Load-balancer listener adapter.
pub struct LbAdapter {
    target: ProviderTarget,
    certificate_store: Arc<dyn CertificateStore>,
    object_store: Arc<dyn ObjectStore>,
    listeners: Arc<dyn ListenerApi>,
    propagation: PropagationSettings,
}

impl LbAdapter {
    pub fn new(
        target: ProviderTarget,
        certificate_store: Arc<dyn CertificateStore>,
        object_store: Arc<dyn ObjectStore>,
        listeners: Arc<dyn ListenerApi>,
        propagation: PropagationSettings,
    ) -> Self {
        Self {
            target,
            certificate_store,
            object_store,
            listeners,
            propagation,
        }
    }
}

#[async_trait]
impl ResourceAdapter for LbAdapter {
    fn route_type(&self) -> RouteType {
        RouteType::Lb
    }

    fn target(&self) -> &ProviderTarget {
        &self.target
    }

    fn certificate_store(&self) -> &dyn CertificateStore {
        self.certificate_store.as_ref()
    }

    fn object_store(&self) -> &dyn ObjectStore {
        self.object_store.as_ref()
    }

    async fn associate_certificate(
        &self,
        resource_ref: &str,
        new_cert: &StoreIdentifiers,
        previous: Option<&StoreIdentifiers>,
    ) -> Result<(), CloudError> {
        self.listeners
            .add_listener_certificate(resource_ref, &new_cert.arn)
            .await?;

        info!(
            listener = %resource_ref,
            certificate_arn = %new_cert.arn,
            "Added listener certificate"
        );

        if let Some(previous) = previous {
            if previous.arn != new_cert.arn {
                match self
                    .listeners
                    .remove_listener_certificate(resource_ref, &previous.arn)
                    .await
                {
                    Ok(()) => info!(
                        listener = %resource_ref,
                        certificate_arn = %previous.arn,
                        "Removed previous listener certificate"
                    ),
                    // already detached
                    Err(CloudError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(())
    }

    async fn wait_for_propagation(
        &self,
        resource_ref: &str,
        new_cert: &StoreIdentifiers,
    ) -> Result<(), CloudError> {
        for attempt in 1..=self.propagation.max_attempts {
            let attached = self
                .listeners
                .list_listener_certificates(resource_ref)
                .await?;
            if attached.iter().any(|arn| arn == &new_cert.arn) {
                debug!(listener = %resource_ref, attempt, "Listener serving new certificate");
                return Ok(());
            }
            tokio::time::sleep(self.propagation.delay).await;
        }

        Err(CloudError::PropagationTimeout(format!(
            "listener {resource_ref} not serving {} after {} attempts",
            new_cert.arn, self.propagation.max_attempts
        )))
    }

    async fn list_attached_certificates(
        &self,
        resource_ref: &str,
    ) -> Result<Vec<String>, CloudError> {
        self.listeners.list_listener_certificates(resource_ref).await
    }
}
