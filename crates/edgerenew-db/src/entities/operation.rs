//! Operation entity: one tracked attempt to move a route onto a new certificate

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// State of an operation. Terminal states are final: once `Succeeded` or
/// `Failed` is observed, no further pipeline step may run for the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum OperationState {
    #[sea_orm(string_value = "in_progress")]
    InProgress,

    #[sea_orm(string_value = "succeeded")]
    Succeeded,

    #[sea_orm(string_value = "failed")]
    Failed,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationState::Succeeded | OperationState::Failed)
    }
}

/// What the operation is doing. Renewal is currently the only action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum OperationAction {
    #[sea_orm(string_value = "renew")]
    Renew,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "operations")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(indexed)]
    pub route_id: String,

    /// The certificate being produced. Null before the key/CSR step, and
    /// nulled again if authorization validation fails catastrophically.
    pub certificate_id: Option<i32>,

    pub state: OperationState,

    pub action: OperationAction,

    pub created_at: ChronoDateTimeUtc,

    pub updated_at: Option<ChronoDateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
