//! Steps that talk to the certificate authority

use chrono::{Duration, Utc};
use sea_orm::{ActiveModelTrait, NotSet, Set};
use tracing::{info, warn};

use edgerenew_acme::{AcmeError, SerializedChallenge, SerializedOrder};
use edgerenew_db::entities::{acme_account, certificate, challenge, operation};
use edgerenew_db::{queries, RouteType};

use super::{begin, commit, load_linked_certificate, load_operation_and_route};
use crate::context::PipelineContext;
use crate::EngineError;

/// Make sure the route has a CA account, pooling existing accounts up to the
/// configured cap. No-op when the route is already linked.
pub async fn create_account(
    ctx: &PipelineContext,
    operation_id: i32,
    route_type: RouteType,
) -> Result<(), EngineError> {
    let store = ctx.stores.for_type(route_type);
    let txn = begin(store).await?;

    let (_, route) = load_operation_and_route(&txn, operation_id).await?;
    if route.acme_account_id.is_some() {
        return commit(txn).await;
    }

    let account_id = match queries::select_pooled_account(&txn, ctx.config.max_routes_per_account)
        .await?
    {
        Some(account) => {
            info!(
                route = %route.instance_id,
                account_id = account.id,
                "Reusing pooled ACME account"
            );
            account.id
        }
        None => {
            let registered = ctx.directory.register_account(&ctx.config.contact_email).await?;
            let inserted = acme_account::ActiveModel {
                id: NotSet,
                email: Set(ctx.config.contact_email.clone()),
                uri: Set(registered.uri),
                credentials_json: Set(store.cipher.encrypt(&registered.credentials_json)?),
                registration_json: Set(Some(registered.registration_json)),
                created_at: Set(Utc::now()),
            }
            .insert(&txn)
            .await
            .map_err(edgerenew_db::DbError::Db)?;
            info!(
                route = %route.instance_id,
                account_id = inserted.id,
                "Registered new ACME account"
            );
            inserted.id
        }
    };

    let mut active: edgerenew_db::entities::route::ActiveModel = route.into();
    active.acme_account_id = Set(Some(account_id));
    active.updated_at = Set(Some(Utc::now()));
    active.update(&txn).await.map_err(edgerenew_db::DbError::Db)?;

    commit(txn).await
}

/// Create the operation's certificate row with a fresh key and a CSR over
/// the route's full domain list. The certificate stays unassociated: it is
/// only linked to the route once the whole chain succeeds.
pub async fn create_key_and_csr(
    ctx: &PipelineContext,
    operation_id: i32,
    route_type: RouteType,
) -> Result<(), EngineError> {
    let store = ctx.stores.for_type(route_type);
    let txn = begin(store).await?;

    let (operation, route) = load_operation_and_route(&txn, operation_id).await?;
    if operation.certificate_id.is_some() {
        return commit(txn).await;
    }

    let generated = edgerenew_acme::generate_key_and_csr(&route.domain_list())?;

    let inserted = certificate::ActiveModel {
        id: NotSet,
        route_id: Set(None),
        private_key_pem: Set(Some(store.cipher.encrypt(&generated.private_key_pem)?)),
        csr_pem: Set(Some(generated.csr_pem)),
        order_json: Set(None),
        leaf_pem: Set(None),
        fullchain_pem: Set(None),
        expires: Set(None),
        iam_server_certificate_id: Set(None),
        iam_server_certificate_name: Set(None),
        iam_server_certificate_arn: Set(None),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
    }
    .insert(&txn)
    .await
    .map_err(edgerenew_db::DbError::Db)?;

    let mut active: operation::ActiveModel = operation.into();
    active.certificate_id = Set(Some(inserted.id));
    active.updated_at = Set(Some(Utc::now()));
    active.update(&txn).await.map_err(edgerenew_db::DbError::Db)?;

    info!(
        operation_id,
        certificate_id = inserted.id,
        route = %route.instance_id,
        "Created key and CSR"
    );

    commit(txn).await
}

/// Submit a new order and persist one challenge row per domain plus the
/// serialized order. No-op once the order is recorded.
pub async fn initiate_order(
    ctx: &PipelineContext,
    operation_id: i32,
    route_type: RouteType,
) -> Result<(), EngineError> {
    let store = ctx.stores.for_type(route_type);
    let txn = begin(store).await?;

    let (operation, route) = load_operation_and_route(&txn, operation_id).await?;
    let cert = load_linked_certificate(&txn, &operation).await?;
    if cert.order_json.is_some() {
        return commit(txn).await;
    }

    let account_id = route.acme_account_id.ok_or_else(|| {
        EngineError::Contract(format!("route {} has no ACME account", route.instance_id))
    })?;
    let account = queries::get_account(&txn, account_id).await?;
    let credentials = store.cipher.decrypt(&account.credentials_json)?;

    let created = ctx
        .directory
        .new_order(&credentials, &route.domain_list(), ctx.config.challenge_kind)
        .await?;

    for extracted in &created.challenges {
        let body_json = serde_json::to_string(&extracted.body).map_err(|e| {
            EngineError::Contract(format!("unserializable challenge body: {e}"))
        })?;
        challenge::ActiveModel {
            id: NotSet,
            certificate_id: Set(cert.id),
            domain: Set(extracted.domain.clone()),
            validation_path: Set(extracted.validation_path.clone()),
            validation_contents: Set(extracted.validation_contents.clone()),
            body_json: Set(Some(body_json)),
            answered: Set(false),
            created_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await
        .map_err(edgerenew_db::DbError::Db)?;
    }

    let order_json = serde_json::to_string(&created.order)
        .map_err(|e| EngineError::Contract(format!("unserializable order: {e}")))?;

    let challenge_count = created.challenges.len();
    let mut active: certificate::ActiveModel = cert.into();
    active.order_json = Set(Some(order_json));
    active.updated_at = Set(Some(Utc::now()));
    active.update(&txn).await.map_err(edgerenew_db::DbError::Db)?;

    info!(
        operation_id,
        route = %route.instance_id,
        challenges = challenge_count,
        "Order initiated"
    );

    commit(txn).await
}

/// Submit every unanswered challenge response. A challenge whose serialized
/// status already reads valid is marked answered without re-submission,
/// which covers duplicate-order races. CA errors for an individual
/// challenge are logged and do not stop the loop.
pub async fn answer_challenges(
    ctx: &PipelineContext,
    operation_id: i32,
    route_type: RouteType,
) -> Result<(), EngineError> {
    let store = ctx.stores.for_type(route_type);
    let txn = begin(store).await?;

    let (operation, route) = load_operation_and_route(&txn, operation_id).await?;
    let cert = load_linked_certificate(&txn, &operation).await?;

    let challenges = queries::challenges_for_certificate(&txn, cert.id).await?;
    let unanswered: Vec<_> = challenges.into_iter().filter(|c| !c.answered).collect();
    if unanswered.is_empty() {
        return commit(txn).await;
    }

    let account_id = route.acme_account_id.ok_or_else(|| {
        EngineError::Contract(format!("route {} has no ACME account", route.instance_id))
    })?;
    let account = queries::get_account(&txn, account_id).await?;
    let credentials = store.cipher.decrypt(&account.credentials_json)?;
    let order = parse_order(&cert)?;

    for item in unanswered {
        let body: SerializedChallenge = match item.body_json.as_deref() {
            Some(raw) => serde_json::from_str(raw).map_err(|e| {
                EngineError::Contract(format!("challenge {} body is unreadable: {e}", item.id))
            })?,
            None => {
                return Err(EngineError::Contract(format!(
                    "challenge {} has no serialized body",
                    item.id
                )))
            }
        };

        if !body.is_valid() {
            if let Err(e) = ctx
                .directory
                .answer_challenge(&credentials, &order.url, &body.url)
                .await
            {
                // a single bad authorization only stalls its own domain;
                // finalization surfaces the failure loudly later
                warn!(
                    route = %route.instance_id,
                    domain = %item.domain,
                    error = %e,
                    "Challenge answer errored"
                );
            }
        }

        let mut active: challenge::ActiveModel = item.into();
        active.answered = Set(true);
        active.update(&txn).await.map_err(edgerenew_db::DbError::Db)?;
    }

    commit(txn).await
}

/// Poll the CA to finalization and store leaf, chain and expiry together.
pub async fn finalize_and_retrieve(
    ctx: &PipelineContext,
    operation_id: i32,
    route_type: RouteType,
) -> Result<(), EngineError> {
    let store = ctx.stores.for_type(route_type);
    let txn = begin(store).await?;

    let (operation, route) = load_operation_and_route(&txn, operation_id).await?;
    let cert = load_linked_certificate(&txn, &operation).await?;
    if cert.leaf_pem.is_some() {
        return commit(txn).await;
    }

    let account_id = route.acme_account_id.ok_or_else(|| {
        EngineError::Contract(format!("route {} has no ACME account", route.instance_id))
    })?;
    let account = queries::get_account(&txn, account_id).await?;
    let credentials = store.cipher.decrypt(&account.credentials_json)?;
    let order = parse_order(&cert)?;

    let csr_pem = cert.csr_pem.clone().ok_or_else(|| {
        EngineError::Contract(format!("certificate {} has no CSR", cert.id))
    })?;
    let csr_der = edgerenew_acme::csr_der_from_pem(&csr_pem)?;

    let fullchain = match ctx
        .directory
        .poll_and_finalize(&credentials, &order.url, &csr_der, ctx.config.acme_poll_timeout)
        .await
    {
        Ok(finalized) => finalized.fullchain_pem,
        Err(AcmeError::OrderAlreadyValid) => {
            // a duplicate attempt raced us; keep the certificate we already
            // hold if it is comfortably outside the renewal cliff
            let next_month = Utc::now() + Duration::days(31);
            if cert.expires.map(|e| e > next_month).unwrap_or(false) {
                return commit(txn).await;
            }
            ctx.directory
                .fetch_certificate(&credentials, &order.url, ctx.config.acme_poll_timeout)
                .await?
        }
        Err(AcmeError::ValidationFailed(detail)) => {
            warn!(
                operation_id,
                route = %route.instance_id,
                detail = %detail,
                "Authorization validation failed; detaching certificate"
            );
            // detach so the retry rebuilds from a fresh key and CSR instead
            // of reusing failed challenges, then re-raise so the retry
            // counter still advances
            let mut active: operation::ActiveModel = operation.into();
            active.certificate_id = Set(None);
            active.updated_at = Set(Some(Utc::now()));
            active.update(&txn).await.map_err(edgerenew_db::DbError::Db)?;
            commit(txn).await?;
            return Err(EngineError::Acme(AcmeError::ValidationFailed(detail)));
        }
        Err(e) => return Err(e.into()),
    };

    let split = edgerenew_acme::split_fullchain(&fullchain)?;
    let expires = edgerenew_acme::leaf_not_after(&split.leaf_pem)?;

    let refreshed_order = SerializedOrder {
        url: order.url,
        status: "valid".to_string(),
        domains: order.domains,
    };
    let order_json = serde_json::to_string(&refreshed_order)
        .map_err(|e| EngineError::Contract(format!("unserializable order: {e}")))?;

    let mut active: certificate::ActiveModel = cert.into();
    active.leaf_pem = Set(Some(split.leaf_pem));
    active.fullchain_pem = Set(Some(split.chain_pem));
    active.expires = Set(Some(expires));
    active.order_json = Set(Some(order_json));
    active.updated_at = Set(Some(Utc::now()));
    active.update(&txn).await.map_err(edgerenew_db::DbError::Db)?;

    info!(
        operation_id,
        route = %route.instance_id,
        expires = %expires,
        "Certificate retrieved"
    );

    commit(txn).await
}

fn parse_order(cert: &certificate::Model) -> Result<SerializedOrder, EngineError> {
    let raw = cert.order_json.as_deref().ok_or_else(|| {
        EngineError::Contract(format!("certificate {} has no serialized order", cert.id))
    })?;
    serde_json::from_str(raw).map_err(|e| {
        EngineError::Contract(format!("certificate {} order is unreadable: {e}", cert.id))
    })
}
