use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::product::{available_quantity, StockStatus};

/// Sellable variation of a product with its own SKU, price and stock.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "product_variants")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub product_id: Uuid,
    #[sea_orm(unique)]
    pub sku: String,
    pub name: String,
    /// `None` sells at the parent product's price.
    #[sea_orm(column_type = "Decimal(Some((16, 4)))", nullable)]
    pub web_price: Option<Decimal>,
    #[sea_orm(column_type = "Json", nullable)]
    pub options: Option<Json>,
    pub stock_status: StockStatus,
    pub stock_quantity: Option<i64>,
    pub reserved_quantity: i64,
    pub loyverse_variant_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn available_quantity(&self) -> i64 {
        available_quantity(self.stock_quantity, self.reserved_quantity)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
