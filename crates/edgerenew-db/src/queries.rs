//! Query helpers shared by the pipeline steps and the sweeps
//!
//! Everything here is generic over [`ConnectionTrait`] so the same helpers
//! work against a pooled connection or an open transaction.

use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder};

use crate::entities::{acme_account, certificate, challenge, operation, route};
use crate::DbError;

/// All routes currently in the `provisioned` state.
pub async fn find_active_routes<C: ConnectionTrait>(db: &C) -> Result<Vec<route::Model>, DbError> {
    let routes = route::Entity::find()
        .filter(route::Column::State.eq(route::RouteState::Provisioned))
        .all(db)
        .await?;
    Ok(routes)
}

/// Certificates linked to a route, newest expiry first.
pub async fn certificates_for_route<C: ConnectionTrait>(
    db: &C,
    route_id: &str,
) -> Result<Vec<certificate::Model>, DbError> {
    let certs = certificate::Entity::find()
        .filter(certificate::Column::RouteId.eq(route_id))
        .order_by_desc(certificate::Column::Expires)
        .all(db)
        .await?;
    Ok(certs)
}

/// A route needs renewal when every certificate currently linked to it
/// expires inside the renewal window. A route without certificates is
/// vacuously renewable.
pub async fn route_needs_renewal<C: ConnectionTrait>(
    db: &C,
    route: &route::Model,
    renew_before_days: i64,
    now: DateTime<Utc>,
) -> Result<bool, DbError> {
    let certs = certificates_for_route(db, &route.instance_id).await?;
    Ok(all_within_renewal_window(&certs, renew_before_days, now))
}

/// Pure renewal-window check over an already-loaded certificate set.
pub fn all_within_renewal_window(
    certs: &[certificate::Model],
    renew_before_days: i64,
    now: DateTime<Utc>,
) -> bool {
    certs.iter().all(|c| c.needs_renewal(renew_before_days, now))
}

/// Pick the pooled ACME account with the fewest routes, or none when every
/// account is at or above the per-account cap.
pub async fn select_pooled_account<C: ConnectionTrait>(
    db: &C,
    max_routes_per_account: u64,
) -> Result<Option<acme_account::Model>, DbError> {
    let accounts = acme_account::Entity::find().all(db).await?;

    let mut loaded = Vec::with_capacity(accounts.len());
    for account in accounts {
        let count = route::Entity::find()
            .filter(route::Column::AcmeAccountId.eq(account.id))
            .count(db)
            .await?;
        loaded.push((account, count));
    }

    Ok(select_least_loaded(loaded, max_routes_per_account))
}

/// Pure pool-selection over (account, route count) pairs.
pub fn select_least_loaded(
    accounts: Vec<(acme_account::Model, u64)>,
    max_routes_per_account: u64,
) -> Option<acme_account::Model> {
    accounts
        .into_iter()
        .filter(|(_, count)| *count < max_routes_per_account)
        .min_by_key(|(_, count)| *count)
        .map(|(account, _)| account)
}

pub async fn get_route<C: ConnectionTrait>(db: &C, route_id: &str) -> Result<route::Model, DbError> {
    route::Entity::find_by_id(route_id)
        .one(db)
        .await?
        .ok_or_else(|| DbError::NotFound {
            entity: "route",
            id: route_id.to_string(),
        })
}

pub async fn get_operation<C: ConnectionTrait>(
    db: &C,
    operation_id: i32,
) -> Result<operation::Model, DbError> {
    operation::Entity::find_by_id(operation_id)
        .one(db)
        .await?
        .ok_or_else(|| DbError::NotFound {
            entity: "operation",
            id: operation_id.to_string(),
        })
}

/// Like [`get_operation`] but `Ok(None)` on a missing row, for callers that
/// must tolerate payloads referencing operations they do not own.
pub async fn find_operation<C: ConnectionTrait>(
    db: &C,
    operation_id: i32,
) -> Result<Option<operation::Model>, DbError> {
    Ok(operation::Entity::find_by_id(operation_id).one(db).await?)
}

pub async fn get_certificate<C: ConnectionTrait>(
    db: &C,
    certificate_id: i32,
) -> Result<certificate::Model, DbError> {
    certificate::Entity::find_by_id(certificate_id)
        .one(db)
        .await?
        .ok_or_else(|| DbError::NotFound {
            entity: "certificate",
            id: certificate_id.to_string(),
        })
}

pub async fn get_account<C: ConnectionTrait>(
    db: &C,
    account_id: i32,
) -> Result<acme_account::Model, DbError> {
    acme_account::Entity::find_by_id(account_id)
        .one(db)
        .await?
        .ok_or_else(|| DbError::NotFound {
            entity: "acme_account",
            id: account_id.to_string(),
        })
}

/// All challenges belonging to a certificate.
pub async fn challenges_for_certificate<C: ConnectionTrait>(
    db: &C,
    certificate_id: i32,
) -> Result<Vec<challenge::Model>, DbError> {
    let challenges = challenge::Entity::find()
        .filter(challenge::Column::CertificateId.eq(certificate_id))
        .all(db)
        .await?;
    Ok(challenges)
}

/// True when the route already has a certificate recorded under the given
/// store identifier (used by the manual-rotation backport sweep).
pub async fn knows_store_arn<C: ConnectionTrait>(
    db: &C,
    route_id: &str,
    arn: &str,
) -> Result<bool, DbError> {
    let count = certificate::Entity::find()
        .filter(certificate::Column::RouteId.eq(route_id))
        .filter(certificate::Column::IamServerCertificateArn.eq(arn))
        .count(db)
        .await?;
    Ok(count > 0)
}
