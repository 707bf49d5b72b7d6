//! Initial schema: routes, acme_accounts, certificates, challenges, operations

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AcmeAccounts::Table)
                    .if_not_exists()
                    .col(integer(AcmeAccounts::Id).auto_increment().primary_key())
                    .col(string_len(AcmeAccounts::Email, 255).not_null())
                    .col(text(AcmeAccounts::Uri).not_null())
                    .col(text(AcmeAccounts::CredentialsJson).not_null())
                    .col(text_null(AcmeAccounts::RegistrationJson))
                    .col(
                        timestamp_with_time_zone(AcmeAccounts::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Routes::Table)
                    .if_not_exists()
                    .col(string_len(Routes::InstanceId, 255).primary_key())
                    .col(string_len(Routes::State, 16).not_null())
                    .col(text(Routes::Domains).not_null())
                    .col(text_null(Routes::ResourceRef))
                    .col(integer_null(Routes::AcmeAccountId))
                    .col(
                        timestamp_with_time_zone(Routes::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(timestamp_with_time_zone_null(Routes::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_routes_acme_account_id")
                            .from(Routes::Table, Routes::AcmeAccountId)
                            .to(AcmeAccounts::Table, AcmeAccounts::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_routes_state")
                    .table(Routes::Table)
                    .col(Routes::State)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Certificates::Table)
                    .if_not_exists()
                    .col(integer(Certificates::Id).auto_increment().primary_key())
                    .col(string_len_null(Certificates::RouteId, 255))
                    .col(text_null(Certificates::PrivateKeyPem))
                    .col(text_null(Certificates::CsrPem))
                    .col(text_null(Certificates::OrderJson))
                    .col(text_null(Certificates::LeafPem))
                    .col(text_null(Certificates::FullchainPem))
                    .col(timestamp_with_time_zone_null(Certificates::Expires))
                    .col(
                        timestamp_with_time_zone(Certificates::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(timestamp_with_time_zone_null(Certificates::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_certificates_route_id")
                            .from(Certificates::Table, Certificates::RouteId)
                            .to(Routes::Table, Routes::InstanceId),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_certificates_route_id")
                    .table(Certificates::Table)
                    .col(Certificates::RouteId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_certificates_expires")
                    .table(Certificates::Table)
                    .col(Certificates::Expires)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Challenges::Table)
                    .if_not_exists()
                    .col(integer(Challenges::Id).auto_increment().primary_key())
                    .col(integer(Challenges::CertificateId).not_null())
                    .col(string_len(Challenges::Domain, 255).not_null())
                    .col(text(Challenges::ValidationPath).not_null())
                    .col(text(Challenges::ValidationContents).not_null())
                    .col(text_null(Challenges::BodyJson))
                    .col(boolean(Challenges::Answered).not_null().default(false))
                    .col(
                        timestamp_with_time_zone(Challenges::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_challenges_certificate_id")
                            .from(Challenges::Table, Challenges::CertificateId)
                            .to(Certificates::Table, Certificates::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_challenges_certificate_id")
                    .table(Challenges::Table)
                    .col(Challenges::CertificateId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Operations::Table)
                    .if_not_exists()
                    .col(integer(Operations::Id).auto_increment().primary_key())
                    .col(string_len(Operations::RouteId, 255).not_null())
                    .col(integer_null(Operations::CertificateId))
                    .col(
                        string_len(Operations::State, 16)
                            .not_null()
                            .default("in_progress"),
                    )
                    .col(string_len(Operations::Action, 16).not_null().default("renew"))
                    .col(
                        timestamp_with_time_zone(Operations::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(timestamp_with_time_zone_null(Operations::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_operations_route_id")
                            .from(Operations::Table, Operations::RouteId)
                            .to(Routes::Table, Routes::InstanceId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_operations_certificate_id")
                            .from(Operations::Table, Operations::CertificateId)
                            .to(Certificates::Table, Certificates::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_operations_route_id")
                    .table(Operations::Table)
                    .col(Operations::RouteId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Operations::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Challenges::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Certificates::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Routes::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AcmeAccounts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Routes {
    Table,
    InstanceId,
    State,
    Domains,
    ResourceRef,
    AcmeAccountId,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum AcmeAccounts {
    Table,
    Id,
    Email,
    Uri,
    CredentialsJson,
    RegistrationJson,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Certificates {
    Table,
    Id,
    RouteId,
    PrivateKeyPem,
    CsrPem,
    OrderJson,
    LeafPem,
    FullchainPem,
    Expires,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Challenges {
    Table,
    Id,
    CertificateId,
    Domain,
    ValidationPath,
    ValidationContents,
    BodyJson,
    Answered,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Operations {
    Table,
    Id,
    RouteId,
    CertificateId,
    State,
    Action,
    CreatedAt,
    UpdatedAt,
}
