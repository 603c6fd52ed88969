//! Point-of-sale adapter.
//!
//! The POS is the system of record for stock and sales receipts. Responses are
//! parsed into the strict types below at the adapter boundary; anything that
//! does not match fails with [`PosError::Schema`].

pub mod loyverse;

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use loyverse::LoyverseClient;

#[derive(Debug, thiserror::Error)]
pub enum PosError {
    #[error("POS is not configured: {0}")]
    NotConfigured(String),

    #[error("POS request failed: {0}")]
    Transport(String),

    #[error("POS returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("POS request timed out")]
    Timeout,

    #[error("{0}")]
    Schema(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PosVariant {
    pub variant_id: String,
    pub sku: Option<String>,
    pub price: Option<Decimal>,
    pub option_values: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PosItem {
    pub id: String,
    pub name: String,
    pub variants: Vec<PosVariant>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InventoryLevel {
    pub variant_id: String,
    pub in_stock: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub variant_id: String,
    pub quantity: i64,
    pub price: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReceiptRequest {
    pub lines: Vec<ReceiptLine>,
    pub total: Decimal,
    /// Free-text note carrying the order id and attempt id.
    pub note: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub receipt_number: String,
}

#[async_trait]
pub trait PosClient: Send + Sync {
    async fn get_items(&self) -> Result<Vec<PosItem>, PosError>;

    async fn get_inventory(&self) -> Result<Vec<InventoryLevel>, PosError>;

    async fn create_receipt(&self, receipt: &ReceiptRequest) -> Result<Receipt, PosError>;
}

/// Lookups built once per run from a full POS fetch.
#[derive(Clone, Debug, Default)]
pub struct PosSnapshot {
    pub items: Vec<PosItem>,
    sku_to_variant: HashMap<String, String>,
    stock_by_variant: HashMap<String, i64>,
}

impl PosSnapshot {
    pub fn new(items: Vec<PosItem>, inventory: Vec<InventoryLevel>) -> Self {
        let mut sku_to_variant = HashMap::new();
        for variant in items.iter().flat_map(|item| item.variants.iter()) {
            if let Some(sku) = variant.sku.as_deref().map(str::trim) {
                if !sku.is_empty() {
                    sku_to_variant
                        .entry(sku.to_string())
                        .or_insert_with(|| variant.variant_id.clone());
                }
            }
        }

        let mut stock_by_variant = HashMap::new();
        for level in inventory {
            *stock_by_variant.entry(level.variant_id).or_insert(0) += level.in_stock;
        }

        Self {
            items,
            sku_to_variant,
            stock_by_variant,
        }
    }

    pub async fn fetch(client: &dyn PosClient) -> Result<Self, PosError> {
        let (items, inventory) = futures::try_join!(client.get_items(), client.get_inventory())?;
        Ok(Self::new(items, inventory))
    }

    pub fn variant_for_sku(&self, sku: &str) -> Option<&str> {
        self.sku_to_variant.get(sku.trim()).map(String::as_str)
    }

    pub fn has_variant(&self, variant_id: &str) -> bool {
        self.items
            .iter()
            .flat_map(|item| item.variants.iter())
            .any(|v| v.variant_id == variant_id)
    }

    /// On-hand count; variants without an inventory row count as zero.
    pub fn on_hand(&self, variant_id: &str) -> i64 {
        self.stock_by_variant.get(variant_id).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(id: &str, sku: Option<&str>) -> PosVariant {
        PosVariant {
            variant_id: id.to_string(),
            sku: sku.map(str::to_string),
            price: None,
            option_values: vec![],
        }
    }

    #[test]
    fn snapshot_indexes_skus_and_sums_store_levels() {
        let items = vec![PosItem {
            id: "item-1".into(),
            name: "Kayak".into(),
            variants: vec![
                variant("v1", Some("KAY-1")),
                variant("v2", Some("  ")),
                variant("v3", None),
            ],
        }];
        let inventory = vec![
            InventoryLevel {
                variant_id: "v1".into(),
                in_stock: 3,
            },
            InventoryLevel {
                variant_id: "v1".into(),
                in_stock: 2,
            },
        ];

        let snapshot = PosSnapshot::new(items, inventory);
        assert_eq!(snapshot.variant_for_sku("KAY-1"), Some("v1"));
        assert_eq!(snapshot.variant_for_sku(""), None);
        assert_eq!(snapshot.on_hand("v1"), 5);
        assert_eq!(snapshot.on_hand("v3"), 0);
        assert!(snapshot.has_variant("v2"));
        assert!(!snapshot.has_variant("v9"));
    }
}
