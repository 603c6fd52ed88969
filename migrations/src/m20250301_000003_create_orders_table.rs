use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Orders::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Orders::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Orders::Status).string_len(32).not_null())
                    .col(ColumnDef::new(Orders::Items).json().not_null())
                    .col(ColumnDef::new(Orders::Customer).json().not_null())
                    .col(ColumnDef::new(Orders::DeliveryMethod).string_len(32).not_null())
                    .col(
                        ColumnDef::new(Orders::ShippingStatus)
                            .string_len(32)
                            .not_null()
                            .default("NOT_SHIPPED"),
                    )
                    .col(ColumnDef::new(Orders::PaymentGateway).string_len(32).not_null())
                    .col(ColumnDef::new(Orders::GatewayBillId).string_len(128).null())
                    .col(
                        ColumnDef::new(Orders::LoyverseStatus)
                            .string_len(32)
                            .not_null()
                            .default("PENDING"),
                    )
                    .col(ColumnDef::new(Orders::LoyverseError).text().null())
                    .col(ColumnDef::new(Orders::LoyverseFailedItems).json().null())
                    .col(ColumnDef::new(Orders::LoyverseReceiptNumber).string_len(64).null())
                    .col(ColumnDef::new(Orders::ReceiptAttemptId).uuid().null())
                    .col(ColumnDef::new(Orders::TrackingNo).string_len(128).null())
                    .col(ColumnDef::new(Orders::CollectionReference).string_len(64).null())
                    .col(ColumnDef::new(Orders::PromoCode).string_len(64).null())
                    .col(ColumnDef::new(Orders::Subtotal).decimal_len(16, 4).not_null())
                    .col(ColumnDef::new(Orders::ShippingCost).decimal_len(16, 4).not_null())
                    .col(ColumnDef::new(Orders::DiscountAmount).decimal_len(16, 4).not_null())
                    .col(ColumnDef::new(Orders::TotalAmount).decimal_len(16, 4).not_null())
                    .col(
                        ColumnDef::new(Orders::StockReserved)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Orders::ApprovedBy).string_len(255).null())
                    .col(ColumnDef::new(Orders::RejectedBy).string_len(255).null())
                    .col(ColumnDef::new(Orders::RejectionReason).text().null())
                    .col(
                        ColumnDef::new(Orders::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Orders::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Orders::PaidAt).timestamp_with_time_zone().null())
                    .col(
                        ColumnDef::new(Orders::CollectedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Orders::ProcessedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Orders::CancelledAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        // The stale-order sweep filters on status and orders by age
        manager
            .create_index(
                Index::create()
                    .name("idx_orders_status_created_at")
                    .table(Orders::Table)
                    .col(Orders::Status)
                    .col(Orders::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_orders_gateway_bill_id")
                    .table(Orders::Table)
                    .col(Orders::GatewayBillId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Orders::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Orders {
    Table,
    Id,
    Status,
    Items,
    Customer,
    DeliveryMethod,
    ShippingStatus,
    PaymentGateway,
    GatewayBillId,
    LoyverseStatus,
    LoyverseError,
    LoyverseFailedItems,
    LoyverseReceiptNumber,
    ReceiptAttemptId,
    TrackingNo,
    CollectionReference,
    PromoCode,
    Subtotal,
    ShippingCost,
    DiscountAmount,
    TotalAmount,
    StockReserved,
    ApprovedBy,
    RejectedBy,
    RejectionReason,
    CreatedAt,
    UpdatedAt,
    PaidAt,
    CollectedAt,
    ProcessedAt,
    CancelledAt,
}
