use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PromoCodes::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(PromoCodes::Id).uuid().not_null().primary_key())
                    .col(
                        ColumnDef::new(PromoCodes::Code)
                            .string_len(64)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(PromoCodes::DiscountType).string_len(16).not_null())
                    .col(ColumnDef::new(PromoCodes::Value).decimal_len(16, 4).not_null())
                    .col(ColumnDef::new(PromoCodes::MinSpend).decimal_len(16, 4).null())
                    .col(ColumnDef::new(PromoCodes::UsageLimit).integer().null())
                    .col(
                        ColumnDef::new(PromoCodes::UsageCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(PromoCodes::Active)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(PromoCodes::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PromoCodes::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PromoCodes::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum PromoCodes {
    Table,
    Id,
    Code,
    DiscountType,
    Value,
    MinSpend,
    UsageLimit,
    UsageCount,
    Active,
    CreatedAt,
    UpdatedAt,
}
