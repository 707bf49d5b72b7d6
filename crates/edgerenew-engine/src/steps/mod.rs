//! Pipeline step implementations
//!
//! Every step opens one transaction, re-checks the persisted guard field it
//! is responsible for, does its work, and commits. Repeats are no-ops once
//! the guard is populated; that is the entire idempotency mechanism.

mod acme;
mod cloud;
mod finish;

use sea_orm::{DatabaseTransaction, TransactionTrait};

use edgerenew_db::entities::{certificate, operation, route};
use edgerenew_db::{queries, DbError, Store};

use crate::context::PipelineContext;
use crate::pipeline::{QueuedUnit, StepName};
use crate::EngineError;

pub use acme::{
    answer_challenges, create_account, create_key_and_csr, finalize_and_retrieve, initiate_order,
};
pub use cloud::{
    associate_certificate, remove_old_certificate_from_store, upload_certificate_to_store,
    upload_challenge_files, wait_for_propagation,
};
pub use finish::mark_operation_succeeded;

/// Run one named step of one operation's chain.
pub async fn execute(
    ctx: &PipelineContext,
    unit: &QueuedUnit,
    name: StepName,
) -> Result<(), EngineError> {
    let operation_id = unit.operation_id;
    let route_type = unit.route_type;

    match name {
        StepName::CreateAccount => create_account(ctx, operation_id, route_type).await,
        StepName::CreateKeyAndCsr => create_key_and_csr(ctx, operation_id, route_type).await,
        StepName::InitiateOrder => initiate_order(ctx, operation_id, route_type).await,
        StepName::UploadChallengeFiles => {
            upload_challenge_files(ctx, operation_id, route_type).await
        }
        StepName::AnswerChallenges => answer_challenges(ctx, operation_id, route_type).await,
        StepName::FinalizeAndRetrieve => {
            finalize_and_retrieve(ctx, operation_id, route_type).await
        }
        StepName::UploadCertificateToStore => {
            upload_certificate_to_store(ctx, operation_id, route_type).await
        }
        StepName::AssociateCertificate => {
            associate_certificate(ctx, operation_id, route_type).await
        }
        StepName::WaitForPropagation => wait_for_propagation(ctx, operation_id, route_type).await,
        StepName::RemoveOldCertificateFromStore => {
            remove_old_certificate_from_store(ctx, operation_id, route_type).await
        }
        StepName::MarkOperationSucceeded => {
            mark_operation_succeeded(ctx, operation_id, route_type).await
        }
    }
}

/// Open the step's transaction against the right store.
pub(crate) async fn begin(store: &Store) -> Result<DatabaseTransaction, EngineError> {
    store
        .db
        .begin()
        .await
        .map_err(|e| EngineError::Db(DbError::Db(e)))
}

pub(crate) async fn commit(txn: DatabaseTransaction) -> Result<(), EngineError> {
    txn.commit()
        .await
        .map_err(|e| EngineError::Db(DbError::Db(e)))
}

/// Load the operation and its route.
pub(crate) async fn load_operation_and_route(
    txn: &DatabaseTransaction,
    operation_id: i32,
) -> Result<(operation::Model, route::Model), EngineError> {
    let operation = queries::get_operation(txn, operation_id).await?;
    let route = queries::get_route(txn, &operation.route_id).await?;
    Ok((operation, route))
}

/// Load the certificate an earlier step must already have created.
pub(crate) async fn load_linked_certificate(
    txn: &DatabaseTransaction,
    operation: &operation::Model,
) -> Result<certificate::Model, EngineError> {
    let certificate_id = operation.certificate_id.ok_or_else(|| {
        EngineError::Contract(format!(
            "operation {} has no certificate at this point in the chain",
            operation.id
        ))
    })?;
    Ok(queries::get_certificate(txn, certificate_id).await?)
}
