//! In-memory provider implementations
//!
//! Faithful stand-ins for the provider services, used by the engine's
//! integration tests and by the worker's dry-run mode. Conflict behavior
//! mirrors the real services: duplicate uploads fail with already-exists,
//! deletes of unknown names fail with no-such-entity, and distribution
//! updates demand the current ETag.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use crate::provider::{
    CertificateStore, DistributionApi, DistributionView, ListenerApi, ObjectStore,
    ServerCertificateMetadata,
};
use crate::CloudError;

#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .expect("object store lock")
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().expect("object store lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        _server_side_encryption: &str,
    ) -> Result<(), CloudError> {
        self.objects
            .lock()
            .expect("object store lock")
            .insert((bucket.to_string(), key.to_string()), body.to_vec());
        Ok(())
    }
}

struct StoredServerCertificate {
    metadata: ServerCertificateMetadata,
}

#[derive(Default)]
pub struct InMemoryCertificateStore {
    certificates: Mutex<HashMap<String, StoredServerCertificate>>,
    next_id: AtomicU64,
    upload_calls: AtomicU64,
    delete_calls: AtomicU64,
}

impl InMemoryCertificateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upload_calls(&self) -> u64 {
        self.upload_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> u64 {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.certificates
            .lock()
            .expect("certificate store lock")
            .contains_key(name)
    }

    /// Seed a certificate as if it had been uploaded out-of-band.
    pub fn seed(&self, name: &str, expires_in_days: i64) -> ServerCertificateMetadata {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let metadata = ServerCertificateMetadata {
            id: format!("SEEDED{id:016}"),
            name: name.to_string(),
            arn: format!("arn:aws:iam::000000000000:server-certificate/{name}"),
            expires: Some(Utc::now() + Duration::days(expires_in_days)),
            uploaded_at: Some(Utc::now()),
        };
        self.certificates
            .lock()
            .expect("certificate store lock")
            .insert(name.to_string(), StoredServerCertificate {
                metadata: metadata.clone(),
            });
        metadata
    }
}

#[async_trait]
impl CertificateStore for InMemoryCertificateStore {
    async fn upload_server_certificate(
        &self,
        path_prefix: &str,
        name: &str,
        _certificate_body: &str,
        _private_key: &str,
        _certificate_chain: &str,
    ) -> Result<ServerCertificateMetadata, CloudError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);

        let mut certificates = self.certificates.lock().expect("certificate store lock");
        if certificates.contains_key(name) {
            return Err(CloudError::AlreadyExists(name.to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let metadata = ServerCertificateMetadata {
            id: format!("ASCACK{id:016}"),
            name: name.to_string(),
            arn: format!(
                "arn:aws:iam::000000000000:server-certificate{path_prefix}{name}"
            ),
            expires: Some(Utc::now() + Duration::days(90)),
            uploaded_at: Some(Utc::now()),
        };
        certificates.insert(name.to_string(), StoredServerCertificate {
            metadata: metadata.clone(),
        });
        Ok(metadata)
    }

    async fn get_server_certificate(
        &self,
        name: &str,
    ) -> Result<ServerCertificateMetadata, CloudError> {
        self.certificates
            .lock()
            .expect("certificate store lock")
            .get(name)
            .map(|stored| stored.metadata.clone())
            .ok_or_else(|| CloudError::NotFound(name.to_string()))
    }

    async fn delete_server_certificate(&self, name: &str) -> Result<(), CloudError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.certificates
            .lock()
            .expect("certificate store lock")
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| CloudError::NotFound(name.to_string()))
    }
}

struct DistributionState {
    etag_counter: u64,
    viewer_certificate_id: Option<String>,
    status: String,
}

pub struct InMemoryDistributionApi {
    distributions: Mutex<HashMap<String, DistributionState>>,
    auto_deploy: std::sync::atomic::AtomicBool,
}

impl Default for InMemoryDistributionApi {
    fn default() -> Self {
        Self {
            distributions: Mutex::new(HashMap::new()),
            auto_deploy: std::sync::atomic::AtomicBool::new(true),
        }
    }
}

impl InMemoryDistributionApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// When disabled, updates leave the distribution "InProgress" until
    /// [`set_status`](Self::set_status) flips it, modeling slow propagation.
    pub fn set_auto_deploy(&self, auto_deploy: bool) {
        self.auto_deploy.store(auto_deploy, Ordering::SeqCst);
    }

    pub fn seed(&self, distribution_id: &str, viewer_certificate_id: Option<&str>) {
        self.distributions
            .lock()
            .expect("distribution lock")
            .insert(distribution_id.to_string(), DistributionState {
                etag_counter: 1,
                viewer_certificate_id: viewer_certificate_id.map(|s| s.to_string()),
                status: "Deployed".to_string(),
            });
    }

    pub fn set_status(&self, distribution_id: &str, status: &str) {
        if let Some(state) = self
            .distributions
            .lock()
            .expect("distribution lock")
            .get_mut(distribution_id)
        {
            state.status = status.to_string();
        }
    }

    pub fn viewer_certificate(&self, distribution_id: &str) -> Option<String> {
        self.distributions
            .lock()
            .expect("distribution lock")
            .get(distribution_id)
            .and_then(|state| state.viewer_certificate_id.clone())
    }
}

#[async_trait]
impl DistributionApi for InMemoryDistributionApi {
    async fn get_distribution_config(
        &self,
        distribution_id: &str,
    ) -> Result<DistributionView, CloudError> {
        self.distributions
            .lock()
            .expect("distribution lock")
            .get(distribution_id)
            .map(|state| DistributionView {
                etag: format!("E{}", state.etag_counter),
                viewer_certificate_id: state.viewer_certificate_id.clone(),
            })
            .ok_or_else(|| CloudError::NotFound(distribution_id.to_string()))
    }

    async fn set_viewer_certificate(
        &self,
        distribution_id: &str,
        etag: &str,
        certificate_id: &str,
    ) -> Result<(), CloudError> {
        let mut distributions = self.distributions.lock().expect("distribution lock");
        let state = distributions
            .get_mut(distribution_id)
            .ok_or_else(|| CloudError::NotFound(distribution_id.to_string()))?;

        if etag != format!("E{}", state.etag_counter) {
            return Err(CloudError::Conflict(format!(
                "stale etag {etag} for {distribution_id}"
            )));
        }

        state.viewer_certificate_id = Some(certificate_id.to_string());
        state.etag_counter += 1;
        state.status = if self.auto_deploy.load(Ordering::SeqCst) {
            "Deployed"
        } else {
            "InProgress"
        }
        .to_string();
        Ok(())
    }

    async fn get_distribution_status(&self, distribution_id: &str) -> Result<String, CloudError> {
        self.distributions
            .lock()
            .expect("distribution lock")
            .get(distribution_id)
            .map(|state| state.status.clone())
            .ok_or_else(|| CloudError::NotFound(distribution_id.to_string()))
    }
}

#[derive(Default)]
pub struct InMemoryListenerApi {
    listeners: Mutex<HashMap<String, Vec<String>>>,
    remove_calls: AtomicU64,
}

impl InMemoryListenerApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, listener_arn: &str, certificate_arns: &[&str]) {
        self.listeners.lock().expect("listener lock").insert(
            listener_arn.to_string(),
            certificate_arns.iter().map(|s| s.to_string()).collect(),
        );
    }

    pub fn attached(&self, listener_arn: &str) -> Vec<String> {
        self.listeners
            .lock()
            .expect("listener lock")
            .get(listener_arn)
            .cloned()
            .unwrap_or_default()
    }

    pub fn remove_calls(&self) -> u64 {
        self.remove_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ListenerApi for InMemoryListenerApi {
    async fn add_listener_certificate(
        &self,
        listener_arn: &str,
        certificate_arn: &str,
    ) -> Result<(), CloudError> {
        let mut listeners = self.listeners.lock().expect("listener lock");
        let attached = listeners
            .get_mut(listener_arn)
            .ok_or_else(|| CloudError::NotFound(listener_arn.to_string()))?;
        if !attached.iter().any(|arn| arn == certificate_arn) {
            attached.push(certificate_arn.to_string());
        }
        Ok(())
    }

    async fn remove_listener_certificate(
        &self,
        listener_arn: &str,
        certificate_arn: &str,
    ) -> Result<(), CloudError> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        let mut listeners = self.listeners.lock().expect("listener lock");
        let attached = listeners
            .get_mut(listener_arn)
            .ok_or_else(|| CloudError::NotFound(listener_arn.to_string()))?;
        attached.retain(|arn| arn != certificate_arn);
        Ok(())
    }

    async fn list_listener_certificates(
        &self,
        listener_arn: &str,
    ) -> Result<Vec<String>, CloudError> {
        self.listeners
            .lock()
            .expect("listener lock")
            .get(listener_arn)
            .cloned()
            .ok_or_else(|| CloudError::NotFound(listener_arn.to_string()))
    }
}
