use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Embedded subcategory; lives inside its parent category row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Subcategory {
    pub name: String,
    pub slug: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct Subcategories(pub Vec<Subcategory>);

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "categories")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub slug: String,
    pub name: String,
    /// Display position; exposed as `order` to clients.
    #[serde(rename = "order")]
    pub sort_order: i32,
    #[sea_orm(column_type = "Json", nullable)]
    pub subcategories: Option<Subcategories>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))", nullable)]
    pub handling_fee: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((9, 4)))", nullable)]
    pub shipping_markup_percent: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
