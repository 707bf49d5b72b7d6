//! Certificate entity: one issued (or in-flight) certificate for a route

use chrono::{DateTime, Duration, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "certificates")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Owning route. Null until the pipeline finishes association, so a
    /// failed renewal never displaces the route's active certificate.
    #[sea_orm(indexed, nullable)]
    pub route_id: Option<String>,

    /// Generated private key, PEM. Stored as an `enc:v1:` envelope at rest.
    #[sea_orm(column_type = "Text", nullable)]
    pub private_key_pem: Option<String>,

    /// Certificate signing request covering the route's full domain list
    #[sea_orm(column_type = "Text", nullable)]
    pub csr_pem: Option<String>,

    /// Serialized ACME order (URL, status, domain list)
    #[sea_orm(column_type = "Text", nullable)]
    pub order_json: Option<String>,

    /// End-entity certificate, PEM
    #[sea_orm(column_type = "Text", nullable)]
    pub leaf_pem: Option<String>,

    /// Leaf plus intermediates, PEM, order preserved
    #[sea_orm(column_type = "Text", nullable)]
    pub fullchain_pem: Option<String>,

    /// Leaf not-after. Set together with leaf_pem/fullchain_pem or not at all.
    #[sea_orm(indexed, nullable)]
    pub expires: Option<ChronoDateTimeUtc>,

    /// Certificate-store identifiers, set once uploaded
    #[sea_orm(column_type = "Text", nullable)]
    pub iam_server_certificate_id: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub iam_server_certificate_name: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub iam_server_certificate_arn: Option<String>,

    pub created_at: ChronoDateTimeUtc,

    pub updated_at: Option<ChronoDateTimeUtc>,
}

impl Model {
    /// True when this certificate expires inside the renewal window.
    ///
    /// A certificate without an expiry (issuance never completed) always
    /// needs renewal.
    pub fn needs_renewal(&self, renew_before_days: i64, now: DateTime<Utc>) -> bool {
        match self.expires {
            Some(expires) => expires < now + Duration::days(renew_before_days),
            None => true,
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
