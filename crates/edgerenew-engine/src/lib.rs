//! Renewal pipeline engine
//!
//! Drives one renewal operation through a fixed, ordered chain of idempotent
//! steps, from account provisioning to old-certificate cleanup. Steps are
//! at-least-once units of work: each one re-checks persisted state before
//! acting, so a retried step is cheap once earlier progress has landed.
//!
//! Chain order is fixed per resource class and never user-configurable; the
//! driver in [`runner`] re-enqueues the next descriptor only after the
//! current one commits.

pub mod alert;
pub mod context;
pub mod failure;
pub mod pipeline;
pub mod queue;
pub mod runner;
pub mod scheduler;
pub mod steps;

use edgerenew_acme::AcmeError;
use edgerenew_cloud::CloudError;
use edgerenew_db::DbError;

pub use alert::{Alerter, TracingAlerter};
pub use context::{EngineConfig, PipelineContext};
pub use pipeline::{renewal_chain, QueuedUnit, StepDescriptor, StepName};
pub use queue::TaskQueue;

/// Engine-level errors. The taxonomy drives retry behavior: contract
/// violations fail fast, validation failures restart from CSR generation,
/// everything else is retried on the fixed interval.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Acme(#[from] AcmeError),

    #[error(transparent)]
    Cloud(#[from] CloudError),

    /// A field cipher refused a value; almost always a key-configuration
    /// defect, never fixed by retrying.
    #[error("field encryption error: {0}")]
    Cipher(#[from] edgerenew_db::CipherError),

    /// A code or configuration defect: wrong resource-type tag, a step
    /// observing state an earlier step should have produced, and the like.
    /// Retrying cannot fix these.
    #[error("contract violation: {0}")]
    Contract(String),

    #[error("task queue is closed")]
    QueueClosed,
}

impl EngineError {
    /// Whether re-running the same step can plausibly succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            EngineError::Contract(_) | EngineError::QueueClosed | EngineError::Cipher(_) => false,
            EngineError::Acme(e) => !e.is_contract_violation(),
            _ => true,
        }
    }

    /// An ACME authorization was rejected; the certificate has been
    /// detached and the retry must restart from key/CSR generation.
    pub fn is_validation_failure(&self) -> bool {
        matches!(self, EngineError::Acme(AcmeError::ValidationFailed(_)))
    }
}
