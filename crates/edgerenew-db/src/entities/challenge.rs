//! Challenge entity: one proof-of-control requirement per domain per order

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "challenges")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(indexed)]
    pub certificate_id: i32,

    /// Domain this challenge validates
    pub domain: String,

    /// HTTP-01: object key under /.well-known/acme-challenge/
    /// DNS-01: TXT record name (_acme-challenge.<domain>)
    #[sea_orm(column_type = "Text")]
    pub validation_path: String,

    /// Expected validation response body / TXT record value
    #[sea_orm(column_type = "Text")]
    pub validation_contents: String,

    /// Serialized challenge body (url, token, type, last observed status)
    #[sea_orm(column_type = "Text", nullable)]
    pub body_json: Option<String>,

    /// Response has been submitted to the CA. Never unset; after this only
    /// the serialized status is re-read.
    pub answered: bool,

    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
