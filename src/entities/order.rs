use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use utoipa::ToSchema;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[sea_orm(string_value = "PENDING")]
    Pending,
    #[sea_orm(string_value = "PENDING_PAYMENT")]
    PendingPayment,
    #[sea_orm(string_value = "PAID")]
    Paid,
    #[sea_orm(string_value = "FAILED")]
    Failed,
    #[sea_orm(string_value = "CANCELLED")]
    Cancelled,
}

impl OrderStatus {
    /// Statuses from which a confirmed payment may move the order to `PAID`.
    pub const PAYABLE: [OrderStatus; 2] = [OrderStatus::Pending, OrderStatus::PendingPayment];

    /// Statuses eligible for the stale-order sweep.
    pub const SWEEPABLE: [OrderStatus; 3] = [
        OrderStatus::Pending,
        OrderStatus::PendingPayment,
        OrderStatus::Failed,
    ];

    /// Forward-only transitions; cancellation is reachable only before payment.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, PendingPayment)
                | (Pending, Paid)
                | (PendingPayment, Paid)
                | (Pending, Failed)
                | (PendingPayment, Failed)
                | (Pending, Cancelled)
                | (PendingPayment, Cancelled)
        )
    }
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoyverseStatus {
    #[sea_orm(string_value = "PENDING")]
    Pending,
    /// Claimed by a running fulfillment; never visible for long.
    #[sea_orm(string_value = "PROCESSING")]
    Processing,
    #[sea_orm(string_value = "SYNCED")]
    Synced,
    #[sea_orm(string_value = "PARTIAL_SYNC")]
    PartialSync,
    #[sea_orm(string_value = "FAILED")]
    Failed,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    #[sea_orm(string_value = "delivery")]
    Delivery,
    #[sea_orm(string_value = "self_collection")]
    SelfCollection,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShippingStatus {
    #[sea_orm(string_value = "NOT_SHIPPED")]
    NotShipped,
    #[sea_orm(string_value = "BOOKED")]
    Booked,
    #[sea_orm(string_value = "BOOKING_FAILED")]
    BookingFailed,
    #[sea_orm(string_value = "AWAITING_COLLECTION")]
    AwaitingCollection,
    #[sea_orm(string_value = "COLLECTED")]
    Collected,
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    Display,
    EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum GatewayKind {
    #[sea_orm(string_value = "manual")]
    Manual,
    #[sea_orm(string_value = "toyyibpay")]
    Toyyibpay,
    #[sea_orm(string_value = "billplz")]
    Billplz,
}

/// Line item copied from the catalog when the order is placed. Later price
/// or name edits on the product never reach an existing order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OrderItem {
    pub sku: String,
    pub name: String,
    pub quantity: i64,
    pub web_price: Decimal,
    #[serde(default)]
    pub selected_options: BTreeMap<String, String>,
    pub loyverse_variant_id: Option<String>,
    pub category_slug: String,
}

impl OrderItem {
    pub fn line_total(&self) -> Decimal {
        self.web_price * Decimal::from(self.quantity)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct OrderItems(pub Vec<OrderItem>);

#[derive(
    Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult, ToSchema,
)]
pub struct CustomerInfo {
    pub name: String,
    pub email: String,
    pub phone: String,
    #[serde(default)]
    pub address: Option<String>,
}

/// Receipt lines the POS rejected, kept for manual follow-up.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FailedSyncItem {
    pub sku: String,
    pub quantity: i64,
    pub reason: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct FailedSyncItems(pub Vec<FailedSyncItem>);

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub status: OrderStatus,
    #[sea_orm(column_type = "Json")]
    pub items: OrderItems,
    #[sea_orm(column_type = "Json")]
    pub customer: CustomerInfo,
    pub delivery_method: DeliveryMethod,
    pub shipping_status: ShippingStatus,
    pub payment_gateway: GatewayKind,
    pub gateway_bill_id: Option<String>,
    pub loyverse_status: LoyverseStatus,
    #[sea_orm(column_type = "Text", nullable)]
    pub loyverse_error: Option<String>,
    #[sea_orm(column_type = "Json", nullable)]
    pub loyverse_failed_items: Option<FailedSyncItems>,
    pub loyverse_receipt_number: Option<String>,
    pub receipt_attempt_id: Option<Uuid>,
    pub tracking_no: Option<String>,
    pub collection_reference: Option<String>,
    pub promo_code: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub subtotal: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub shipping_cost: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub discount_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub total_amount: Decimal,
    /// True while the order holds reservations against catalog stock.
    pub stock_reserved: bool,
    pub approved_by: Option<String>,
    pub rejected_by: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub collected_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
