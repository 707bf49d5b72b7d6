//! Persistence model for the certificate renewal engine
//!
//! Two independent relational stores (one per managed resource class) share
//! the same entity definitions and migrations. Each pipeline step opens one
//! transaction against the store for its resource class, commits on success
//! and rolls back on error, so a retried step always re-runs from a clean
//! snapshot.

pub mod crypto;
pub mod entities;
pub mod migrator;
pub mod queries;

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use crypto::{CipherError, FieldCipher};

/// Discriminator for the two managed resource classes.
///
/// Carried through every pipeline call so steps written once can resolve the
/// right store and the right resource adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteType {
    /// CDN distribution
    Cdn,
    /// Load-balancer listener
    Lb,
}

impl RouteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteType::Cdn => "cdn",
            RouteType::Lb => "lb",
        }
    }
}

impl std::fmt::Display for RouteType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RouteType {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cdn" => Ok(RouteType::Cdn),
            "lb" | "alb" => Ok(RouteType::Lb),
            other => Err(DbError::UnknownRouteType(other.to_string())),
        }
    }
}

/// Database layer errors
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Db(#[from] DbErr),

    #[error("unknown route type: {0}")]
    UnknownRouteType(String),

    #[error("field encryption error: {0}")]
    Cipher(#[from] CipherError),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
}

/// Connect to a database and configure the connection pool.
///
/// Bounded pool with bounded overflow; no long-lived transactions are ever
/// held across pipeline steps, so a small pool suffices.
pub async fn connect(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new(database_url.to_string());
    options
        .max_connections(10)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(10))
        .acquire_timeout(Duration::from_secs(10))
        .sqlx_logging(false);

    Database::connect(options).await
}

/// Run all pending migrations against a connection.
pub async fn migrate(db: &DatabaseConnection) -> Result<(), DbErr> {
    migrator::Migrator::up(db, None).await
}

/// The two stores, one per resource class.
///
/// Both carry the same logical schema; they are separate databases with
/// independent credentials and independent field-encryption keys.
#[derive(Clone)]
pub struct Stores {
    pub cdn: Store,
    pub lb: Store,
}

/// One store: a pooled connection plus its field cipher.
#[derive(Clone)]
pub struct Store {
    pub db: DatabaseConnection,
    pub cipher: FieldCipher,
}

impl Stores {
    pub fn new(cdn: Store, lb: Store) -> Self {
        Self { cdn, lb }
    }

    /// Resolve the store for a resource class.
    pub fn for_type(&self, route_type: RouteType) -> &Store {
        match route_type {
            RouteType::Cdn => &self.cdn,
            RouteType::Lb => &self.lb,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_type_round_trips_through_str() {
        assert_eq!("cdn".parse::<RouteType>().unwrap(), RouteType::Cdn);
        assert_eq!("lb".parse::<RouteType>().unwrap(), RouteType::Lb);
        // legacy tag accepted for operator convenience
        assert_eq!("alb".parse::<RouteType>().unwrap(), RouteType::Lb);
        assert!("gcs".parse::<RouteType>().is_err());
        assert_eq!(RouteType::Cdn.to_string(), "cdn");
    }
}
