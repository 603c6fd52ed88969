//! POS to catalog stock reconciliation.
//!
//! Mirrors on-hand quantities and the derived stock status onto catalog
//! rows matched by SKU. Descriptive fields (name, description, prices) are
//! never written; unmatched POS SKUs become draft products for an admin to
//! complete. Writes go through [`BatchWriter`], so an error part-way through
//! leaves the chunks already flushed in place.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveValue::Set, DatabaseConnection, EntityTrait};
use serde::Serialize;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::batch::{BatchWriter, DbBatchSink, StockUpdate, WriteOp};
use crate::entities::{product, product_variant, StockStatus};
use crate::errors::ServiceError;
use crate::pos::{PosClient, PosItem, PosSnapshot, PosVariant};

/// Category assigned to drafts created from unmatched POS items.
pub const DRAFT_CATEGORY: &str = "uncategorized";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct SyncReport {
    pub pos_variants: usize,
    pub updated: usize,
    pub created: usize,
    pub skipped: usize,
    pub commits: usize,
}

/// Status to write for a local row, or `None` to leave an admin-set status.
pub fn synced_status(current: StockStatus, on_hand: i64) -> Option<StockStatus> {
    if current.is_manual() {
        None
    } else {
        Some(StockStatus::from_quantity(on_hand))
    }
}

fn draft_name(item: &PosItem, variant: &PosVariant) -> String {
    let options: Vec<&str> = variant
        .option_values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .collect();
    if options.is_empty() || item.variants.len() <= 1 {
        item.name.clone()
    } else {
        format!("{} ({})", item.name, options.join(" / "))
    }
}

fn draft_product(item: &PosItem, variant: &PosVariant, sku: &str, on_hand: i64) -> product::ActiveModel {
    let now = Utc::now();
    product::ActiveModel {
        id: Set(Uuid::new_v4()),
        sku: Set(sku.to_string()),
        name: Set(draft_name(item, variant)),
        description: Set(String::new()),
        web_price: Set(Decimal::ZERO),
        promo_price: Set(None),
        category_slug: Set(DRAFT_CATEGORY.to_string()),
        subcategory_slugs: Set(None),
        stock_status: Set(StockStatus::from_quantity(on_hand)),
        stock_quantity: Set(Some(on_hand)),
        reserved_quantity: Set(0),
        weight: Set(None),
        length: Set(None),
        width: Set(None),
        height: Set(None),
        handling_fee: Set(None),
        shipping_markup_percent: Set(None),
        loyverse_item_id: Set(Some(item.id.clone())),
        loyverse_variant_id: Set(Some(variant.variant_id.clone())),
        is_draft: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
    }
}

#[derive(Clone)]
pub struct InventorySyncService {
    db: Arc<DatabaseConnection>,
    pos: Arc<dyn PosClient>,
}

impl InventorySyncService {
    pub fn new(db: Arc<DatabaseConnection>, pos: Arc<dyn PosClient>) -> Self {
        Self { db, pos }
    }

    #[instrument(skip(self))]
    pub async fn sync_stock(&self) -> Result<SyncReport, ServiceError> {
        let snapshot = PosSnapshot::fetch(self.pos.as_ref()).await?;

        let variants: HashMap<String, (Uuid, StockStatus)> = product_variant::Entity::find()
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|v| (v.sku, (v.id, v.stock_status)))
            .collect();
        let products: HashMap<String, (Uuid, StockStatus)> = product::Entity::find()
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|p| (p.sku, (p.id, p.stock_status)))
            .collect();

        let mut report = SyncReport::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut writer = BatchWriter::new(DbBatchSink::new(&self.db));

        for item in &snapshot.items {
            for variant in &item.variants {
                report.pos_variants += 1;
                let Some(sku) = variant
                    .sku
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                else {
                    report.skipped += 1;
                    continue;
                };
                if !seen.insert(sku.to_string()) {
                    warn!(%sku, "SKU appears on more than one POS variant, keeping the first");
                    report.skipped += 1;
                    continue;
                }

                let on_hand = snapshot.on_hand(&variant.variant_id);
                let op = if let Some((id, current)) = variants.get(sku) {
                    WriteOp::VariantStock {
                        variant_id: *id,
                        update: StockUpdate {
                            stock_status: synced_status(*current, on_hand),
                            stock_quantity: on_hand,
                            loyverse_item_id: None,
                            loyverse_variant_id: Some(variant.variant_id.clone()),
                        },
                    }
                } else if let Some((id, current)) = products.get(sku) {
                    WriteOp::ProductStock {
                        product_id: *id,
                        update: StockUpdate {
                            stock_status: synced_status(*current, on_hand),
                            stock_quantity: on_hand,
                            loyverse_item_id: Some(item.id.clone()),
                            loyverse_variant_id: Some(variant.variant_id.clone()),
                        },
                    }
                } else {
                    report.created += 1;
                    WriteOp::InsertDraftProduct(Box::new(draft_product(item, variant, sku, on_hand)))
                };
                if !matches!(op, WriteOp::InsertDraftProduct(_)) {
                    report.updated += 1;
                }
                writer.push(op).await?;
            }
        }

        let summary = writer.finish().await?;
        report.commits = summary.commits;
        metrics::counter!("stock_sync_writes_total", summary.written as u64);
        info!(
            variants = report.pos_variants,
            updated = report.updated,
            created = report.created,
            skipped = report.skipped,
            commits = report.commits,
            "stock sync finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_statuses_are_left_alone() {
        assert_eq!(synced_status(StockStatus::Archived, 10), None);
        assert_eq!(synced_status(StockStatus::ContactUs, 0), None);
        assert_eq!(synced_status(StockStatus::InStock, 0), Some(StockStatus::Out));
        assert_eq!(synced_status(StockStatus::Out, 3), Some(StockStatus::Low));
    }

    #[test]
    fn drafts_name_multi_variant_items_by_option() {
        let variant = |id: &str, opt: &str| PosVariant {
            variant_id: id.into(),
            sku: Some(id.into()),
            price: None,
            option_values: vec![opt.into()],
        };
        let item = PosItem {
            id: "i".into(),
            name: "Dry Bag".into(),
            variants: vec![variant("a", "10L"), variant("b", "20L")],
        };
        assert_eq!(draft_name(&item, &item.variants[1]), "Dry Bag (20L)");
    }
}
