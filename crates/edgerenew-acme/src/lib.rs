//! ACME orchestration for the renewal pipeline
//!
//! The pipeline consumes the CA through the [`DirectoryClient`] capability
//! trait; [`client::AcmeDirectory`] implements it on top of `instant-acme`.
//! The protocol state machine itself is never reimplemented here — this
//! crate only adapts it to the persistence model's needs: serialized orders
//! and challenges that survive process restarts between pipeline steps.

pub mod client;
pub mod csr;
pub mod pem;

use serde::{Deserialize, Serialize};

pub use client::{AcmeDirectory, DirectoryClient};
#[cfg(any(test, feature = "mocks"))]
pub use client::MockDirectoryClient;
pub use csr::{csr_der_from_pem, generate_key_and_csr, KeyAndCsr};
pub use pem::{leaf_not_after, split_fullchain, SplitChain};

/// Let's Encrypt production directory URL
pub const LETSENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";
/// Let's Encrypt staging directory URL
pub const LETSENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// ACME errors
#[derive(Debug, thiserror::Error)]
pub enum AcmeError {
    #[error("account registration failed: {0}")]
    AccountRegistration(String),

    #[error("stored account credentials are unusable: {0}")]
    Credentials(String),

    #[error("order creation failed: {0}")]
    OrderCreation(String),

    #[error("no {kind} challenge offered for domain {domain}")]
    ChallengeNotFound { kind: ChallengeKind, domain: String },

    #[error("challenge submission failed: {0}")]
    ChallengeSubmission(String),

    #[error("order is already valid")]
    OrderAlreadyValid,

    #[error("authorization validation failed: {0}")]
    ValidationFailed(String),

    #[error("finalization failed: {0}")]
    Finalization(String),

    #[error("timed out waiting for the CA: {0}")]
    Timeout(String),

    #[error("key/CSR generation failed: {0}")]
    Csr(String),

    #[error("certificate bundle is malformed: {0}")]
    MalformedBundle(String),

    #[error("certificate has no usable not-after timestamp")]
    MissingNotAfter,
}

impl AcmeError {
    /// Contract violations cannot be fixed by retrying the same step.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            AcmeError::MalformedBundle(_)
                | AcmeError::MissingNotAfter
                | AcmeError::ChallengeNotFound { .. }
        )
    }
}

/// The two supported proof-of-control mechanisms. A deployment uses exactly
/// one; they are never mixed within an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeKind {
    /// Validated via an HTTP fetch of /.well-known/acme-challenge/<token>
    Http01,
    /// Validated via a TXT record on _acme-challenge.<domain>
    Dns01,
}

impl std::fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChallengeKind::Http01 => f.write_str("http-01"),
            ChallengeKind::Dns01 => f.write_str("dns-01"),
        }
    }
}

impl std::str::FromStr for ChallengeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http-01" | "http01" => Ok(ChallengeKind::Http01),
            "dns-01" | "dns01" => Ok(ChallengeKind::Dns01),
            other => Err(format!("unknown challenge kind: {other}")),
        }
    }
}

/// A freshly registered CA account, ready to persist.
#[derive(Debug, Clone)]
pub struct RegisteredAccount {
    /// Serialized account credentials (contains the account key)
    pub credentials_json: String,
    /// Account URI assigned by the CA
    pub uri: String,
    /// Serialized registration resource
    pub registration_json: String,
}

/// Serialized order state persisted on the certificate row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedOrder {
    pub url: String,
    pub status: String,
    pub domains: Vec<String>,
}

/// Serialized challenge body persisted on the challenge row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedChallenge {
    pub url: String,
    pub token: String,
    pub kind: ChallengeKind,
    /// Last observed status ("pending" or "valid")
    pub status: String,
}

impl SerializedChallenge {
    pub fn is_valid(&self) -> bool {
        self.status == "valid"
    }
}

/// One challenge extracted from a new order.
#[derive(Debug, Clone)]
pub struct ChallengeSpec {
    pub domain: String,
    pub kind: ChallengeKind,
    /// HTTP-01: object key under the well-known prefix; DNS-01: record name
    pub validation_path: String,
    /// HTTP-01: key authorization body; DNS-01: TXT record value
    pub validation_contents: String,
    pub body: SerializedChallenge,
}

/// A new order plus its per-domain challenges.
#[derive(Debug, Clone)]
pub struct CreatedOrder {
    pub order: SerializedOrder,
    pub challenges: Vec<ChallengeSpec>,
}

/// A finalized order and its fetched certificate bundle.
#[derive(Debug, Clone)]
pub struct FinalizedOrder {
    pub fullchain_pem: String,
    pub order: SerializedOrder,
}

/// Validation path for an HTTP-01 token.
pub fn http01_validation_path(token: &str) -> String {
    format!("/.well-known/acme-challenge/{token}")
}

/// Record name for a DNS-01 challenge (wildcard label stripped).
pub fn dns01_record_name(domain: &str) -> String {
    format!("_acme-challenge.{}", domain.trim_start_matches("*."))
}
