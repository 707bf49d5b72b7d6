//! Database migrations
//!
//! Run identically against both stores; the two resource classes share one
//! logical schema.

use sea_orm_migration::prelude::*;

mod m20250604_000001_init_schema;
mod m20250621_000001_add_store_identifiers;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250604_000001_init_schema::Migration),
            Box::new(m20250621_000001_add_store_identifiers::Migration),
        ]
    }
}
