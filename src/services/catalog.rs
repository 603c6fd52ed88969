use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect,
};
use serde::Deserialize;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::entities::category::{Subcategories, Subcategory};
use crate::entities::{category, product, product_variant};
use crate::errors::ServiceError;

/// Lowercases, turns whitespace into hyphens and drops anything that is not
/// a word character or a hyphen.
pub fn slugify(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

#[derive(Clone, Debug, Deserialize, Validate, ToSchema)]
pub struct NewSubcategory {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    pub slug: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Validate, ToSchema)]
pub struct CreateCategory {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    pub slug: Option<String>,
    #[serde(default)]
    #[validate]
    pub subcategories: Vec<NewSubcategory>,
    pub handling_fee: Option<Decimal>,
    pub shipping_markup_percent: Option<Decimal>,
}

/// Catalog row a cart line resolves to.
#[derive(Clone, Debug)]
pub enum CatalogEntry {
    Product(product::Model),
    Variant {
        variant: product_variant::Model,
        product: product::Model,
    },
}

impl CatalogEntry {
    pub fn product(&self) -> &product::Model {
        match self {
            CatalogEntry::Product(p) => p,
            CatalogEntry::Variant { product, .. } => product,
        }
    }

    pub fn sku(&self) -> &str {
        match self {
            CatalogEntry::Product(p) => &p.sku,
            CatalogEntry::Variant { variant, .. } => &variant.sku,
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            CatalogEntry::Product(p) => p.name.clone(),
            CatalogEntry::Variant { variant, product } => {
                format!("{} - {}", product.name, variant.name)
            }
        }
    }

    /// Variant price when set, else the product's selling price.
    pub fn unit_price(&self) -> Decimal {
        match self {
            CatalogEntry::Product(p) => p.selling_price(),
            CatalogEntry::Variant { variant, product } => {
                variant.web_price.unwrap_or_else(|| product.selling_price())
            }
        }
    }

    pub fn available_quantity(&self) -> i64 {
        match self {
            CatalogEntry::Product(p) => p.available_quantity(),
            CatalogEntry::Variant { variant, .. } => variant.available_quantity(),
        }
    }

    pub fn loyverse_variant_id(&self) -> Option<String> {
        match self {
            CatalogEntry::Product(p) => p.loyverse_variant_id.clone(),
            CatalogEntry::Variant { variant, .. } => variant.loyverse_variant_id.clone(),
        }
    }

    pub fn is_purchasable(&self) -> bool {
        let product = self.product();
        let status = match self {
            CatalogEntry::Product(p) => p.stock_status,
            CatalogEntry::Variant { variant, .. } => variant.stock_status,
        };
        !product.is_draft && !status.is_manual()
    }
}

#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn list_categories(&self) -> Result<Vec<category::Model>, ServiceError> {
        Ok(category::Entity::find()
            .order_by_asc(category::Column::SortOrder)
            .order_by_asc(category::Column::Name)
            .all(&*self.db)
            .await?)
    }

    /// Creates a category at the end of the display order.
    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_category(&self, input: CreateCategory) -> Result<category::Model, ServiceError> {
        input.validate()?;

        let slug = input
            .slug
            .as_deref()
            .map(slugify)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| slugify(&input.name));
        if slug.is_empty() {
            return Err(ServiceError::ValidationError(
                "category name produces an empty slug".into(),
            ));
        }
        if category::Entity::find()
            .filter(category::Column::Slug.eq(slug.as_str()))
            .one(&*self.db)
            .await?
            .is_some()
        {
            return Err(ServiceError::Conflict(format!("category {slug} already exists")));
        }

        let max_order: Option<i32> = category::Entity::find()
            .select_only()
            .column_as(category::Column::SortOrder.max(), "max_order")
            .into_tuple::<Option<i32>>()
            .one(&*self.db)
            .await?
            .flatten();

        let subcategories: Vec<Subcategory> = input
            .subcategories
            .into_iter()
            .map(|sub| {
                let slug = sub
                    .slug
                    .as_deref()
                    .map(slugify)
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| slugify(&sub.name));
                Subcategory {
                    name: sub.name,
                    slug,
                }
            })
            .collect();

        let now = Utc::now();
        let model = category::ActiveModel {
            id: Set(Uuid::new_v4()),
            slug: Set(slug.clone()),
            name: Set(input.name.trim().to_string()),
            sort_order: Set(max_order.map_or(0, |m| m + 1)),
            subcategories: Set((!subcategories.is_empty()).then(|| Subcategories(subcategories))),
            handling_fee: Set(input.handling_fee),
            shipping_markup_percent: Set(input.shipping_markup_percent),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(%slug, order = model.sort_order, "category created");
        Ok(model)
    }

    /// Resolves SKUs to catalog rows, variants first. Unknown SKUs are absent
    /// from the result.
    pub async fn resolve_skus(
        &self,
        skus: &[String],
    ) -> Result<Vec<CatalogEntry>, ServiceError> {
        let mut entries = Vec::new();
        if skus.is_empty() {
            return Ok(entries);
        }

        let variants = product_variant::Entity::find()
            .filter(product_variant::Column::Sku.is_in(skus.iter().cloned()))
            .find_also_related(product::Entity)
            .all(&*self.db)
            .await?;
        for (variant, parent) in variants {
            if let Some(product) = parent {
                entries.push(CatalogEntry::Variant { variant, product });
            }
        }

        let remaining: Vec<String> = skus
            .iter()
            .filter(|sku| !entries.iter().any(|e| e.sku() == sku.as_str()))
            .cloned()
            .collect();
        if !remaining.is_empty() {
            let products = product::Entity::find()
                .filter(product::Column::Sku.is_in(remaining))
                .all(&*self.db)
                .await?;
            entries.extend(products.into_iter().map(CatalogEntry::Product));
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_strips_and_hyphenates() {
        assert_eq!(slugify("Sea Kayaks"), "sea-kayaks");
        assert_eq!(slugify("  Paddles & Oars! "), "paddles--oars");
        assert_eq!(slugify("Dry_Bags 2.0"), "dry_bags-20");
        assert_eq!(slugify("***"), "");
    }
}
