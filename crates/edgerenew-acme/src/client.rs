//! Directory-client capability and its instant-acme implementation

use std::time::Duration;

use async_trait::async_trait;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, NewAccount,
    NewOrder, Order, OrderStatus, RetryPolicy,
};
#[cfg(any(test, feature = "mocks"))]
use mockall::automock;
use tracing::{debug, info, warn};

use crate::{
    dns01_record_name, http01_validation_path, AcmeError, ChallengeKind, ChallengeSpec,
    CreatedOrder, FinalizedOrder, RegisteredAccount, SerializedChallenge, SerializedOrder,
};

/// What the pipeline needs from a certificate authority.
///
/// Account state travels as serialized credentials so every call is
/// self-contained; pipeline steps run on arbitrary workers and never share
/// an in-memory session with each other.
#[cfg_attr(any(test, feature = "mocks"), automock)]
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Register a new account with the CA.
    async fn register_account(&self, email: &str) -> Result<RegisteredAccount, AcmeError>;

    /// Create a new order covering `domains` and extract one challenge of
    /// the requested kind per domain.
    async fn new_order(
        &self,
        credentials_json: &str,
        domains: &[String],
        kind: ChallengeKind,
    ) -> Result<CreatedOrder, AcmeError>;

    /// Tell the CA a challenge response is in place.
    async fn answer_challenge(
        &self,
        credentials_json: &str,
        order_url: &str,
        challenge_url: &str,
    ) -> Result<(), AcmeError>;

    /// Poll the order to readiness, submit the CSR, and fetch the issued
    /// bundle. Fails with [`AcmeError::OrderAlreadyValid`] when the CA has
    /// already finalized the order, and [`AcmeError::ValidationFailed`] when
    /// an authorization was rejected.
    async fn poll_and_finalize(
        &self,
        credentials_json: &str,
        order_url: &str,
        csr_der: &[u8],
        timeout: Duration,
    ) -> Result<FinalizedOrder, AcmeError>;

    /// Fetch the certificate bundle for an order the CA already finalized.
    async fn fetch_certificate(
        &self,
        credentials_json: &str,
        order_url: &str,
        timeout: Duration,
    ) -> Result<String, AcmeError>;
}

/// `instant-acme`-backed directory client.
#[derive(Debug, Clone)]
pub struct AcmeDirectory {
    directory_url: String,
}

impl AcmeDirectory {
    pub fn new(directory_url: impl Into<String>) -> Self {
        Self {
            directory_url: directory_url.into(),
        }
    }

    pub fn directory_url(&self) -> &str {
        &self.directory_url
    }

    async fn load_account(&self, credentials_json: &str) -> Result<Account, AcmeError> {
        let credentials: AccountCredentials = serde_json::from_str(credentials_json)
            .map_err(|e| AcmeError::Credentials(format!("failed to deserialize: {e}")))?;

        Account::builder()
            .map_err(|e| AcmeError::Credentials(e.to_string()))?
            .from_credentials(credentials)
            .await
            .map_err(|e| AcmeError::Credentials(e.to_string()))
    }

    async fn load_order(&self, account: &Account, order_url: &str) -> Result<Order, AcmeError> {
        account
            .order(order_url.to_string())
            .await
            .map_err(|e| AcmeError::OrderCreation(format!("failed to load order: {e}")))
    }

    fn retry_policy(timeout: Duration) -> RetryPolicy {
        RetryPolicy::new()
            .timeout(timeout)
            .initial_delay(Duration::from_secs(2))
    }
}

#[async_trait]
impl DirectoryClient for AcmeDirectory {
    async fn register_account(&self, email: &str) -> Result<RegisteredAccount, AcmeError> {
        info!(email = %email, directory = %self.directory_url, "Registering new ACME account");

        let contact = format!("mailto:{email}");
        let new_account = NewAccount {
            contact: &[&contact],
            terms_of_service_agreed: true,
            only_return_existing: false,
        };

        let (account, credentials) = Account::builder()
            .map_err(|e| AcmeError::AccountRegistration(e.to_string()))?
            .create(&new_account, self.directory_url.clone(), None)
            .await
            .map_err(|e| AcmeError::AccountRegistration(e.to_string()))?;

        let credentials_json = serde_json::to_string(&credentials)
            .map_err(|e| AcmeError::AccountRegistration(format!("serialize credentials: {e}")))?;

        let uri = account.id().to_string();
        let registration_json = serde_json::json!({
            "status": "valid",
            "contact": [contact],
            "termsOfServiceAgreed": true,
        })
        .to_string();

        info!(uri = %uri, "ACME account registered");

        Ok(RegisteredAccount {
            credentials_json,
            uri,
            registration_json,
        })
    }

    async fn new_order(
        &self,
        credentials_json: &str,
        domains: &[String],
        kind: ChallengeKind,
    ) -> Result<CreatedOrder, AcmeError> {
        let account = self.load_account(credentials_json).await?;

        let identifiers: Vec<Identifier> = domains
            .iter()
            .map(|d| Identifier::Dns(d.clone()))
            .collect();

        info!(domains = ?domains, kind = %kind, "Creating certificate order");

        let mut order = account
            .new_order(&NewOrder::new(&identifiers))
            .await
            .map_err(|e| AcmeError::OrderCreation(e.to_string()))?;

        let order_url = order.url().to_string();

        let challenge_type = match kind {
            ChallengeKind::Http01 => ChallengeType::Http01,
            ChallengeKind::Dns01 => ChallengeType::Dns01,
        };

        let mut challenges = Vec::new();
        let mut authorizations = order.authorizations();

        while let Some(result) = authorizations.next().await {
            let mut authz = result.map_err(|e| {
                AcmeError::OrderCreation(format!("failed to get authorization: {e}"))
            })?;

            let identifier = authz.identifier();
            let domain = match &identifier.identifier {
                Identifier::Dns(domain) => domain.clone(),
                _ => continue,
            };

            debug!(domain = %domain, status = ?authz.status, "Processing authorization");

            let already_valid = authz.status == AuthorizationStatus::Valid;

            let challenge = authz
                .challenge(challenge_type.clone())
                .ok_or_else(|| AcmeError::ChallengeNotFound {
                    kind,
                    domain: domain.clone(),
                })?;

            let token = challenge.token.clone();
            let url = challenge.url.clone();
            let key_authorization = challenge.key_authorization();

            let (validation_path, validation_contents) = match kind {
                ChallengeKind::Http01 => (
                    http01_validation_path(&token),
                    key_authorization.as_str().to_string(),
                ),
                ChallengeKind::Dns01 => {
                    (dns01_record_name(&domain), key_authorization.dns_value())
                }
            };

            challenges.push(ChallengeSpec {
                domain,
                kind,
                validation_path,
                validation_contents,
                body: SerializedChallenge {
                    url,
                    token,
                    kind,
                    status: if already_valid { "valid" } else { "pending" }.to_string(),
                },
            });
        }

        Ok(CreatedOrder {
            order: SerializedOrder {
                url: order_url,
                status: "pending".to_string(),
                domains: domains.to_vec(),
            },
            challenges,
        })
    }

    async fn answer_challenge(
        &self,
        credentials_json: &str,
        order_url: &str,
        challenge_url: &str,
    ) -> Result<(), AcmeError> {
        let account = self.load_account(credentials_json).await?;
        let mut order = self.load_order(&account, order_url).await?;

        debug!(challenge_url = %challenge_url, "Submitting challenge response");

        let mut authorizations = order.authorizations();
        while let Some(result) = authorizations.next().await {
            let mut authz = result.map_err(|e| {
                AcmeError::ChallengeSubmission(format!("failed to get authorization: {e}"))
            })?;

            let matching_type = authz
                .challenges
                .iter()
                .find(|c| c.url == challenge_url)
                .map(|c| c.r#type.clone());

            if let Some(challenge_type) = matching_type {
                if let Some(mut challenge) = authz.challenge(challenge_type) {
                    challenge
                        .set_ready()
                        .await
                        .map_err(|e| AcmeError::ChallengeSubmission(e.to_string()))?;
                    return Ok(());
                }
            }
        }

        Err(AcmeError::ChallengeSubmission(format!(
            "challenge not found for url {challenge_url}"
        )))
    }

    async fn poll_and_finalize(
        &self,
        credentials_json: &str,
        order_url: &str,
        csr_der: &[u8],
        timeout: Duration,
    ) -> Result<FinalizedOrder, AcmeError> {
        let account = self.load_account(credentials_json).await?;
        let mut order = self.load_order(&account, order_url).await?;

        let state = order
            .refresh()
            .await
            .map_err(|e| AcmeError::Finalization(format!("failed to refresh order: {e}")))?;

        match state.status {
            OrderStatus::Valid => return Err(AcmeError::OrderAlreadyValid),
            OrderStatus::Invalid => {
                return Err(AcmeError::ValidationFailed(format!(
                    "order already invalid: {:?}",
                    state.error
                )))
            }
            _ => {}
        }

        let retry = Self::retry_policy(timeout);

        let status = order
            .poll_ready(&retry)
            .await
            .map_err(|e| AcmeError::Finalization(format!("polling order: {e}")))?;

        match status {
            OrderStatus::Ready => {}
            OrderStatus::Valid => return Err(AcmeError::OrderAlreadyValid),
            OrderStatus::Invalid => {
                let detail = match order.refresh().await {
                    Ok(state) => format!("{:?}", state.error),
                    Err(_) => "authorization rejected".to_string(),
                };
                warn!(order_url = %order_url, detail = %detail, "Order validation failed");
                return Err(AcmeError::ValidationFailed(detail));
            }
            other => {
                return Err(AcmeError::Timeout(format!(
                    "order still {other:?} at deadline"
                )))
            }
        }

        order
            .finalize_csr(csr_der)
            .await
            .map_err(|e| AcmeError::Finalization(format!("failed to finalize order: {e}")))?;

        let fullchain_pem = order
            .poll_certificate(&retry)
            .await
            .map_err(|e| AcmeError::Finalization(format!("failed to fetch certificate: {e}")))?;

        info!(order_url = %order_url, "Certificate issued");

        Ok(FinalizedOrder {
            fullchain_pem,
            order: SerializedOrder {
                url: order_url.to_string(),
                status: "valid".to_string(),
                domains: Vec::new(),
            },
        })
    }

    async fn fetch_certificate(
        &self,
        credentials_json: &str,
        order_url: &str,
        timeout: Duration,
    ) -> Result<String, AcmeError> {
        let account = self.load_account(credentials_json).await?;
        let mut order = self.load_order(&account, order_url).await?;

        order
            .poll_certificate(&Self::retry_policy(timeout))
            .await
            .map_err(|e| AcmeError::Finalization(format!("failed to fetch certificate: {e}")))
    }
}
