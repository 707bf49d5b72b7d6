//! The fixed renewal chain and its queue payload

use edgerenew_db::RouteType;
use serde_json::json;

/// Every step in the renewal chain, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepName {
    CreateAccount,
    CreateKeyAndCsr,
    InitiateOrder,
    UploadChallengeFiles,
    AnswerChallenges,
    FinalizeAndRetrieve,
    UploadCertificateToStore,
    AssociateCertificate,
    WaitForPropagation,
    RemoveOldCertificateFromStore,
    MarkOperationSucceeded,
}

impl StepName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::CreateAccount => "create_account",
            StepName::CreateKeyAndCsr => "create_key_and_csr",
            StepName::InitiateOrder => "initiate_order",
            StepName::UploadChallengeFiles => "upload_challenge_files",
            StepName::AnswerChallenges => "answer_challenges",
            StepName::FinalizeAndRetrieve => "finalize_and_retrieve",
            StepName::UploadCertificateToStore => "upload_certificate_to_store",
            StepName::AssociateCertificate => "associate_certificate",
            StepName::WaitForPropagation => "wait_for_propagation",
            StepName::RemoveOldCertificateFromStore => "remove_old_certificate_from_store",
            StepName::MarkOperationSucceeded => "mark_operation_succeeded",
        }
    }
}

impl std::fmt::Display for StepName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in the chain: the step plus whether the runtime may retry it.
/// Pure waits run at most once; re-running a bounded poll after it has
/// already timed out only doubles the outage.
#[derive(Debug, Clone, Copy)]
pub struct StepDescriptor {
    pub name: StepName,
    pub retriable: bool,
}

const RENEWAL_CHAIN: &[StepDescriptor] = &[
    StepDescriptor { name: StepName::CreateAccount, retriable: true },
    StepDescriptor { name: StepName::CreateKeyAndCsr, retriable: true },
    StepDescriptor { name: StepName::InitiateOrder, retriable: true },
    StepDescriptor { name: StepName::UploadChallengeFiles, retriable: true },
    StepDescriptor { name: StepName::AnswerChallenges, retriable: true },
    StepDescriptor { name: StepName::FinalizeAndRetrieve, retriable: true },
    StepDescriptor { name: StepName::UploadCertificateToStore, retriable: true },
    StepDescriptor { name: StepName::AssociateCertificate, retriable: true },
    StepDescriptor { name: StepName::WaitForPropagation, retriable: false },
    StepDescriptor { name: StepName::RemoveOldCertificateFromStore, retriable: true },
    StepDescriptor { name: StepName::MarkOperationSucceeded, retriable: true },
];

/// Chain index a validation failure rewinds to: the retry must regenerate
/// the key and CSR instead of reusing doomed challenges.
pub const VALIDATION_REWIND_INDEX: usize = 1;

/// The ordered chain for a resource class. Both classes currently share the
/// same step names; the adapter resolved from the tag specializes behavior.
pub fn renewal_chain(_route_type: RouteType) -> &'static [StepDescriptor] {
    RENEWAL_CHAIN
}

/// One queued unit of work: a step of one operation's chain.
///
/// The payload convention every step honors: first the operation id, then
/// the resource-type tag. Failure reporting depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedUnit {
    pub operation_id: i32,
    pub route_type: RouteType,
    pub step_index: usize,
    pub attempt: u32,
}

impl QueuedUnit {
    /// First unit of a freshly enqueued pipeline.
    pub fn start(operation_id: i32, route_type: RouteType) -> Self {
        Self {
            operation_id,
            route_type,
            step_index: 0,
            attempt: 1,
        }
    }

    /// Render the positional payload for logs.
    pub fn payload(&self) -> serde_json::Value {
        json!([self.operation_id, self.route_type.as_str()])
    }
}
