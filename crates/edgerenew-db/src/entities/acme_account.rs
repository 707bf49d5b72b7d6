//! AcmeAccount entity: a registered CA account shared by a bounded pool of routes

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "acme_accounts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Registration contact email
    pub email: String,

    /// Account URI assigned by the CA
    #[sea_orm(column_type = "Text")]
    pub uri: String,

    /// Serialized account credentials (includes the account key).
    /// Stored as an `enc:v1:` envelope at rest.
    #[sea_orm(column_type = "Text")]
    pub credentials_json: String,

    /// Serialized registration resource as returned by the CA
    #[sea_orm(column_type = "Text", nullable)]
    pub registration_json: Option<String>,

    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
