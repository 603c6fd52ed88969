use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Quantity below which a positive on-hand count is reported as `LOW`.
pub const LOW_STOCK_THRESHOLD: i64 = 5;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockStatus {
    #[sea_orm(string_value = "IN_STOCK")]
    InStock,
    #[sea_orm(string_value = "LOW")]
    Low,
    #[sea_orm(string_value = "OUT")]
    Out,
    #[sea_orm(string_value = "ARCHIVED")]
    Archived,
    #[sea_orm(string_value = "CONTACT_US")]
    ContactUs,
}

impl StockStatus {
    /// Maps an on-hand quantity to a status: `OUT` at or below zero,
    /// `LOW` below [`LOW_STOCK_THRESHOLD`], otherwise `IN_STOCK`.
    pub fn from_quantity(quantity: i64) -> Self {
        if quantity <= 0 {
            StockStatus::Out
        } else if quantity < LOW_STOCK_THRESHOLD {
            StockStatus::Low
        } else {
            StockStatus::InStock
        }
    }

    /// Statuses chosen by an admin rather than derived from stock levels.
    pub fn is_manual(&self) -> bool {
        matches!(self, StockStatus::Archived | StockStatus::ContactUs)
    }
}

/// Stock that can still be sold: on-hand minus reserved, never negative.
pub fn available_quantity(stock_quantity: Option<i64>, reserved_quantity: i64) -> i64 {
    (stock_quantity.unwrap_or(0) - reserved_quantity.max(0)).max(0)
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct SubcategorySlugs(pub Vec<String>);

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub sku: String,
    pub name: String,
    #[sea_orm(column_type = "Text")]
    pub description: String,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub web_price: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))", nullable)]
    pub promo_price: Option<Decimal>,
    pub category_slug: String,
    #[sea_orm(column_type = "Json", nullable)]
    pub subcategory_slugs: Option<SubcategorySlugs>,
    pub stock_status: StockStatus,
    pub stock_quantity: Option<i64>,
    pub reserved_quantity: i64,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))", nullable)]
    pub weight: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))", nullable)]
    pub length: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))", nullable)]
    pub width: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))", nullable)]
    pub height: Option<Decimal>,
    /// `None` inherits the category's fee.
    #[sea_orm(column_type = "Decimal(Some((16, 4)))", nullable)]
    pub handling_fee: Option<Decimal>,
    /// `None` inherits the category's markup.
    #[sea_orm(column_type = "Decimal(Some((9, 4)))", nullable)]
    pub shipping_markup_percent: Option<Decimal>,
    pub loyverse_item_id: Option<String>,
    pub loyverse_variant_id: Option<String>,
    /// Created by the stock sync and waiting for an admin to complete it.
    pub is_draft: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn available_quantity(&self) -> i64 {
        available_quantity(self.stock_quantity, self.reserved_quantity)
    }

    /// Price charged at checkout: the promo price when one is set.
    pub fn selling_price(&self) -> Decimal {
        self.promo_price.unwrap_or(self.web_price)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::product_variant::Entity")]
    Variants,
}

impl Related<super::product_variant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Variants.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stock_status_thresholds() {
        assert_eq!(StockStatus::from_quantity(-3), StockStatus::Out);
        assert_eq!(StockStatus::from_quantity(0), StockStatus::Out);
        assert_eq!(StockStatus::from_quantity(1), StockStatus::Low);
        assert_eq!(StockStatus::from_quantity(4), StockStatus::Low);
        assert_eq!(StockStatus::from_quantity(5), StockStatus::InStock);
        assert_eq!(StockStatus::from_quantity(120), StockStatus::InStock);
    }

    #[test]
    fn available_quantity_never_negative() {
        assert_eq!(available_quantity(Some(10), 3), 7);
        assert_eq!(available_quantity(Some(2), 5), 0);
        assert_eq!(available_quantity(None, 0), 0);
    }
}
