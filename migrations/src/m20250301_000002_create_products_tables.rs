use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Products::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Products::Id).uuid().not_null().primary_key())
                    .col(
                        ColumnDef::new(Products::Sku)
                            .string_len(100)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Products::Name).string_len(255).not_null())
                    .col(
                        ColumnDef::new(Products::Description)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(Products::WebPrice).decimal_len(16, 4).not_null())
                    .col(ColumnDef::new(Products::PromoPrice).decimal_len(16, 4).null())
                    .col(
                        ColumnDef::new(Products::CategorySlug)
                            .string_len(150)
                            .not_null()
                            .default("uncategorized"),
                    )
                    .col(ColumnDef::new(Products::SubcategorySlugs).json().null())
                    .col(
                        ColumnDef::new(Products::StockStatus)
                            .string_len(16)
                            .not_null()
                            .default("IN_STOCK"),
                    )
                    .col(ColumnDef::new(Products::StockQuantity).big_integer().null())
                    .col(
                        ColumnDef::new(Products::ReservedQuantity)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Products::Weight).decimal_len(16, 4).null())
                    .col(ColumnDef::new(Products::Length).decimal_len(16, 4).null())
                    .col(ColumnDef::new(Products::Width).decimal_len(16, 4).null())
                    .col(ColumnDef::new(Products::Height).decimal_len(16, 4).null())
                    .col(ColumnDef::new(Products::HandlingFee).decimal_len(16, 4).null())
                    .col(
                        ColumnDef::new(Products::ShippingMarkupPercent)
                            .decimal_len(9, 4)
                            .null(),
                    )
                    .col(ColumnDef::new(Products::LoyverseItemId).string_len(64).null())
                    .col(ColumnDef::new(Products::LoyverseVariantId).string_len(64).null())
                    .col(
                        ColumnDef::new(Products::IsDraft)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Products::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Products::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ProductVariants::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ProductVariants::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ProductVariants::ProductId).uuid().not_null())
                    .col(
                        ColumnDef::new(ProductVariants::Sku)
                            .string_len(100)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(ProductVariants::Name).string_len(255).not_null())
                    .col(
                        ColumnDef::new(ProductVariants::WebPrice)
                            .decimal_len(16, 4)
                            .null(),
                    )
                    .col(ColumnDef::new(ProductVariants::Options).json().null())
                    .col(
                        ColumnDef::new(ProductVariants::StockStatus)
                            .string_len(16)
                            .not_null()
                            .default("IN_STOCK"),
                    )
                    .col(
                        ColumnDef::new(ProductVariants::StockQuantity)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ProductVariants::ReservedQuantity)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ProductVariants::LoyverseVariantId)
                            .string_len(64)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ProductVariants::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ProductVariants::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_product_variants_product")
                            .from(ProductVariants::Table, ProductVariants::ProductId)
                            .to(Products::Table, Products::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_products_category_slug")
                    .table(Products::Table)
                    .col(Products::CategorySlug)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_product_variants_product_id")
                    .table(ProductVariants::Table)
                    .col(ProductVariants::ProductId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ProductVariants::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Products::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Products {
    Table,
    Id,
    Sku,
    Name,
    Description,
    WebPrice,
    PromoPrice,
    CategorySlug,
    SubcategorySlugs,
    StockStatus,
    StockQuantity,
    ReservedQuantity,
    Weight,
    Length,
    Width,
    Height,
    HandlingFee,
    ShippingMarkupPercent,
    LoyverseItemId,
    LoyverseVariantId,
    IsDraft,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub enum ProductVariants {
    Table,
    Id,
    ProductId,
    Sku,
    Name,
    WebPrice,
    Options,
    StockStatus,
    StockQuantity,
    ReservedQuantity,
    LoyverseVariantId,
    CreatedAt,
    UpdatedAt,
}
