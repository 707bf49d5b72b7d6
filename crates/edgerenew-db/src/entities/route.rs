//! Route entity: one managed edge resource and its external domains

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum RouteState {
    /// Resource is being set up, not yet eligible for renewal
    #[sea_orm(string_value = "provisioning")]
    Provisioning,

    /// Resource is live; eligible for renewal sweeps
    #[sea_orm(string_value = "provisioned")]
    Provisioned,

    /// Resource has been torn down
    #[sea_orm(string_value = "deprovisioned")]
    Deprovisioned,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "routes")]
pub struct Model {
    /// Opaque service-instance id (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub instance_id: String,

    /// Lifecycle state
    #[sea_orm(indexed)]
    pub state: RouteState,

    /// Ordered external domain names, stored as a JSON array
    #[sea_orm(column_type = "Text")]
    pub domains: String,

    /// Provider-side resource pointer: distribution id (CDN) or listener ARN (LB)
    #[sea_orm(column_type = "Text", nullable)]
    pub resource_ref: Option<String>,

    /// ACME account serving this route, assigned lazily by the pipeline
    pub acme_account_id: Option<i32>,

    pub created_at: ChronoDateTimeUtc,

    pub updated_at: Option<ChronoDateTimeUtc>,
}

impl Model {
    /// The route's external domain list, in order.
    ///
    /// An unreadable column value yields an empty list rather than an error;
    /// a route without domains is simply never renewable.
    pub fn domain_list(&self) -> Vec<String> {
        serde_json::from_str(&self.domains).unwrap_or_default()
    }
}

/// Serialize a domain list into the column representation.
pub fn encode_domains(domains: &[String]) -> String {
    serde_json::to_string(domains).unwrap_or_else(|_| "[]".to_string())
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
