//! Steps that talk to the cloud provider

use chrono::Utc;
use sea_orm::{ActiveModelTrait, Set};
use tracing::{debug, info};

use edgerenew_acme::ChallengeKind;
use edgerenew_cloud::{store_certificate_name, CloudError, StoreIdentifiers};
use edgerenew_db::entities::certificate;
use edgerenew_db::{queries, RouteType};

use super::{begin, commit, load_linked_certificate, load_operation_and_route};
use crate::context::PipelineContext;
use crate::EngineError;

/// Publish the HTTP-01 validation responses to the class's bucket, then let
/// the object store settle. DNS-01 deployments publish records out-of-band,
/// so there is nothing to upload for them.
pub async fn upload_challenge_files(
    ctx: &PipelineContext,
    operation_id: i32,
    route_type: RouteType,
) -> Result<(), EngineError> {
    let store = ctx.stores.for_type(route_type);
    let adapter = ctx.adapter_for(route_type)?;
    let txn = begin(store).await?;

    let (operation, route) = load_operation_and_route(&txn, operation_id).await?;
    let cert = load_linked_certificate(&txn, &operation).await?;

    if ctx.config.challenge_kind == ChallengeKind::Http01 {
        let bucket = adapter.target().bucket.clone();
        for challenge in queries::challenges_for_certificate(&txn, cert.id).await? {
            if challenge.answered {
                continue;
            }
            let key = challenge.validation_path.trim_start_matches('/');
            adapter
                .object_store()
                .put_object(
                    &bucket,
                    key,
                    challenge.validation_contents.as_bytes(),
                    "AES256",
                )
                .await?;
            debug!(
                route = %route.instance_id,
                bucket = %bucket,
                key = %key,
                "Published validation object"
            );
        }
    }

    commit(txn).await?;

    // give replication a moment so the CA sees the objects on first fetch
    tokio::time::sleep(ctx.config.object_store_propagation).await;
    Ok(())
}

/// Upload the issued certificate to the class's certificate store under a
/// deterministic name. No-op once store identifiers are recorded;
/// already-exists from the store counts as success only when an earlier
/// attempt persisted the metadata.
pub async fn upload_certificate_to_store(
    ctx: &PipelineContext,
    operation_id: i32,
    route_type: RouteType,
) -> Result<(), EngineError> {
    let store = ctx.stores.for_type(route_type);
    let adapter = ctx.adapter_for(route_type)?;
    let txn = begin(store).await?;

    let (operation, route) = load_operation_and_route(&txn, operation_id).await?;
    let cert = load_linked_certificate(&txn, &operation).await?;
    if cert.iam_server_certificate_arn.is_some() {
        return commit(txn).await;
    }

    let name = store_certificate_name(&route.instance_id, Utc::now().date_naive(), cert.id);

    let leaf = cert.leaf_pem.clone().ok_or_else(|| {
        EngineError::Contract(format!("certificate {} has no leaf", cert.id))
    })?;
    let chain = cert.fullchain_pem.clone().ok_or_else(|| {
        EngineError::Contract(format!("certificate {} has no chain", cert.id))
    })?;
    let encrypted_key = cert.private_key_pem.clone().ok_or_else(|| {
        EngineError::Contract(format!("certificate {} has no private key", cert.id))
    })?;
    let private_key = store.cipher.decrypt(&encrypted_key)?;

    let uploaded = match adapter
        .certificate_store()
        .upload_server_certificate(&adapter.target().iam_prefix, &name, &leaf, &private_key, &chain)
        .await
    {
        Ok(metadata) => metadata,
        Err(CloudError::AlreadyExists(_)) if cert.iam_server_certificate_id.is_some() => {
            // an earlier attempt uploaded and persisted; nothing to redo
            return commit(txn).await;
        }
        Err(e) => return Err(e.into()),
    };

    let mut active: certificate::ActiveModel = cert.into();
    active.iam_server_certificate_id = Set(Some(uploaded.id));
    active.iam_server_certificate_name = Set(Some(uploaded.name));
    active.iam_server_certificate_arn = Set(Some(uploaded.arn.clone()));
    active.updated_at = Set(Some(Utc::now()));
    active.update(&txn).await.map_err(edgerenew_db::DbError::Db)?;

    info!(
        operation_id,
        route = %route.instance_id,
        arn = %uploaded.arn,
        "Certificate uploaded to store"
    );

    commit(txn).await
}

/// Attach the uploaded certificate to the live resource.
pub async fn associate_certificate(
    ctx: &PipelineContext,
    operation_id: i32,
    route_type: RouteType,
) -> Result<(), EngineError> {
    let store = ctx.stores.for_type(route_type);
    let adapter = ctx.adapter_for(route_type)?;
    let txn = begin(store).await?;

    let (operation, route) = load_operation_and_route(&txn, operation_id).await?;
    let cert = load_linked_certificate(&txn, &operation).await?;
    let new_ids = store_identifiers(&cert)?;

    let resource_ref = route.resource_ref.clone().ok_or_else(|| {
        EngineError::Contract(format!("route {} has no resource reference", route.instance_id))
    })?;

    // the route's current newest certificate is the one being replaced
    let previous = queries::certificates_for_route(&txn, &route.instance_id)
        .await?
        .into_iter()
        .find(|c| c.id != cert.id && c.iam_server_certificate_arn.is_some())
        .map(|c| store_identifiers(&c))
        .transpose()?;

    adapter
        .associate_certificate(&resource_ref, &new_ids, previous.as_ref())
        .await?;

    info!(
        operation_id,
        route = %route.instance_id,
        resource = %resource_ref,
        "Certificate associated"
    );

    commit(txn).await
}

/// Block until the edge resource reports the new certificate live. Runs at
/// most once; the poll budget is the retry policy.
pub async fn wait_for_propagation(
    ctx: &PipelineContext,
    operation_id: i32,
    route_type: RouteType,
) -> Result<(), EngineError> {
    let store = ctx.stores.for_type(route_type);
    let adapter = ctx.adapter_for(route_type)?;
    let txn = begin(store).await?;

    let (operation, route) = load_operation_and_route(&txn, operation_id).await?;
    let cert = load_linked_certificate(&txn, &operation).await?;
    let new_ids = store_identifiers(&cert)?;

    let resource_ref = route.resource_ref.clone().ok_or_else(|| {
        EngineError::Contract(format!("route {} has no resource reference", route.instance_id))
    })?;

    commit(txn).await?;

    adapter.wait_for_propagation(&resource_ref, &new_ids).await?;
    Ok(())
}

/// Retire the route's previous certificate from the store, then hand the
/// route over to the new certificate. On a repeat invocation the route's
/// newest certificate already IS the new one, so the identifier comparison
/// makes the removal a no-op.
pub async fn remove_old_certificate_from_store(
    ctx: &PipelineContext,
    operation_id: i32,
    route_type: RouteType,
) -> Result<(), EngineError> {
    let store = ctx.stores.for_type(route_type);
    let adapter = ctx.adapter_for(route_type)?;
    let txn = begin(store).await?;

    let (operation, route) = load_operation_and_route(&txn, operation_id).await?;
    let cert = load_linked_certificate(&txn, &operation).await?;
    let new_ids = store_identifiers(&cert)?;

    let old = queries::certificates_for_route(&txn, &route.instance_id)
        .await?
        .into_iter()
        .next();

    if let Some(old) = old {
        let differs = old
            .iam_server_certificate_arn
            .as_deref()
            .map(|arn| arn != new_ids.arn)
            .unwrap_or(false);
        if differs {
            let old_name = old.iam_server_certificate_name.clone().unwrap_or_default();
            match adapter
                .certificate_store()
                .delete_server_certificate(&old_name)
                .await
            {
                Ok(()) => info!(
                    operation_id,
                    route = %route.instance_id,
                    name = %old_name,
                    "Removed previous certificate from store"
                ),
                // someone beat us to it
                Err(CloudError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    let mut active: certificate::ActiveModel = cert.into();
    active.route_id = Set(Some(route.instance_id.clone()));
    active.updated_at = Set(Some(Utc::now()));
    active.update(&txn).await.map_err(edgerenew_db::DbError::Db)?;

    commit(txn).await
}

fn store_identifiers(cert: &certificate::Model) -> Result<StoreIdentifiers, EngineError> {
    match (
        cert.iam_server_certificate_id.as_ref(),
        cert.iam_server_certificate_name.as_ref(),
        cert.iam_server_certificate_arn.as_ref(),
    ) {
        (Some(id), Some(name), Some(arn)) => Ok(StoreIdentifiers {
            id: id.clone(),
            name: name.clone(),
            arn: arn.clone(),
        }),
        _ => Err(EngineError::Contract(format!(
            "certificate {} has no store identifiers",
            cert.id
        ))),
    }
}
