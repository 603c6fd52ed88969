use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::{InventoryLevel, PosClient, PosError, PosItem, PosVariant, Receipt, ReceiptRequest};
use crate::config::AppConfig;

const PAGE_LIMIT: u32 = 250;
const MAX_PAGES: usize = 400;

#[derive(Debug, Deserialize)]
struct ItemsPage {
    items: Vec<WireItem>,
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireItem {
    id: String,
    item_name: String,
    variants: Vec<WireVariant>,
}

#[derive(Debug, Deserialize)]
struct WireVariant {
    variant_id: String,
    #[serde(default)]
    sku: Option<String>,
    #[serde(default)]
    default_price: Option<Decimal>,
    #[serde(default)]
    option1_value: Option<String>,
    #[serde(default)]
    option2_value: Option<String>,
    #[serde(default)]
    option3_value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InventoryPage {
    inventory_levels: Vec<WireInventoryLevel>,
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireInventoryLevel {
    variant_id: String,
    #[serde(default)]
    store_id: Option<String>,
    in_stock: Decimal,
}

#[derive(Debug, Serialize)]
struct WireReceipt<'a> {
    store_id: &'a str,
    note: &'a str,
    line_items: Vec<WireReceiptLine<'a>>,
    payments: Vec<WirePayment<'a>>,
}

#[derive(Debug, Serialize)]
struct WireReceiptLine<'a> {
    variant_id: &'a str,
    quantity: i64,
    #[serde(with = "rust_decimal::serde::float")]
    price: Decimal,
}

#[derive(Debug, Serialize)]
struct WirePayment<'a> {
    payment_type_id: &'a str,
    #[serde(with = "rust_decimal::serde::float")]
    money_amount: Decimal,
}

#[derive(Debug, Deserialize)]
struct WireReceiptResponse {
    receipt_number: String,
}

impl From<WireItem> for PosItem {
    fn from(item: WireItem) -> Self {
        PosItem {
            id: item.id,
            name: item.item_name,
            variants: item
                .variants
                .into_iter()
                .map(|v| PosVariant {
                    variant_id: v.variant_id,
                    sku: v.sku.filter(|s| !s.trim().is_empty()),
                    price: v.default_price,
                    option_values: [v.option1_value, v.option2_value, v.option3_value]
                        .into_iter()
                        .flatten()
                        .collect(),
                })
                .collect(),
        }
    }
}

/// HTTP client for the Loyverse API. Every request is bounded by the
/// configured external-call timeout.
#[derive(Clone)]
pub struct LoyverseClient {
    http: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
    store_id: Option<String>,
    payment_type_id: Option<String>,
    timeout: Duration,
}

impl LoyverseClient {
    pub fn new(
        base_url: impl Into<String>,
        access_token: Option<String>,
        store_id: Option<String>,
        payment_type_id: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token,
            store_id,
            payment_type_id,
            timeout,
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(
            cfg.loyverse_base_url.clone(),
            cfg.loyverse_access_token.clone(),
            cfg.loyverse_store_id.clone(),
            cfg.loyverse_payment_type_id.clone(),
            cfg.external_call_timeout(),
        )
    }

    fn token(&self) -> Result<&str, PosError> {
        self.access_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PosError::NotConfigured("loyverse_access_token is not set".into()))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, PosError> {
        let request = request.bearer_auth(self.token()?);
        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| PosError::Timeout)?
            .map_err(|e| {
                if e.is_timeout() {
                    PosError::Timeout
                } else {
                    PosError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let body = tokio::time::timeout(self.timeout, response.text())
            .await
            .map_err(|_| PosError::Timeout)?
            .map_err(|e| PosError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(PosError::Http {
                status: status.as_u16(),
                body: truncate(&body, 512),
            });
        }

        serde_json::from_str(&body)
            .map_err(|e| PosError::Schema(format!("{} ({})", e, std::any::type_name::<T>())))
    }

    async fn paged<P, F>(&self, path: &str, mut next: F) -> Result<(), PosError>
    where
        P: DeserializeOwned,
        F: FnMut(P) -> Option<String>,
    {
        let url = format!("{}/{}", self.base_url, path);
        let mut cursor: Option<String> = None;
        for page in 0..MAX_PAGES {
            let mut request = self
                .http
                .get(&url)
                .query(&[("limit", PAGE_LIMIT.to_string())]);
            if let Some(c) = cursor.as_deref() {
                request = request.query(&[("cursor", c)]);
            }
            let body: P = self.send(request).await?;
            cursor = next(body).filter(|c| !c.is_empty());
            debug!(path, page, more = cursor.is_some(), "fetched POS page");
            if cursor.is_none() {
                return Ok(());
            }
        }
        warn!(path, "POS pagination stopped after {} pages", MAX_PAGES);
        Ok(())
    }
}

#[async_trait]
impl PosClient for LoyverseClient {
    #[instrument(skip(self))]
    async fn get_items(&self) -> Result<Vec<PosItem>, PosError> {
        let mut items = Vec::new();
        self.paged("items", |page: ItemsPage| {
            items.extend(page.items.into_iter().map(PosItem::from));
            page.cursor
        })
        .await?;
        Ok(items)
    }

    #[instrument(skip(self))]
    async fn get_inventory(&self) -> Result<Vec<InventoryLevel>, PosError> {
        let mut raw = Vec::new();
        self.paged("inventory", |page: InventoryPage| {
            raw.extend(page.inventory_levels);
            page.cursor
        })
        .await?;

        raw.into_iter()
            .filter(|level| match (&self.store_id, &level.store_id) {
                (Some(wanted), Some(store)) => wanted == store,
                _ => true,
            })
            .map(|level| {
                let in_stock = level.in_stock.trunc().to_i64().ok_or_else(|| {
                    PosError::Schema(format!(
                        "in_stock {} for variant {} is out of range",
                        level.in_stock, level.variant_id
                    ))
                })?;
                Ok(InventoryLevel {
                    variant_id: level.variant_id,
                    in_stock,
                })
            })
            .collect()
    }

    #[instrument(skip(self, receipt), fields(lines = receipt.lines.len()))]
    async fn create_receipt(&self, receipt: &ReceiptRequest) -> Result<Receipt, PosError> {
        let store_id = self
            .store_id
            .as_deref()
            .ok_or_else(|| PosError::NotConfigured("loyverse_store_id is not set".into()))?;
        let payment_type_id = self.payment_type_id.as_deref().ok_or_else(|| {
            PosError::NotConfigured("loyverse_payment_type_id is not set".into())
        })?;

        let body = WireReceipt {
            store_id,
            note: &receipt.note,
            line_items: receipt
                .lines
                .iter()
                .map(|line| WireReceiptLine {
                    variant_id: &line.variant_id,
                    quantity: line.quantity,
                    price: line.price,
                })
                .collect(),
            payments: vec![WirePayment {
                payment_type_id,
                money_amount: receipt.total,
            }],
        };

        let request = self
            .http
            .post(format!("{}/receipts", self.base_url))
            .json(&body);
        let response: WireReceiptResponse = self.send(request).await?;
        Ok(Receipt {
            receipt_number: response.receipt_number,
        })
    }
}

fn truncate(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

impl std::fmt::Debug for LoyverseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoyverseClient")
            .field("base_url", &self.base_url)
            .field("store_id", &self.store_id)
            .finish_non_exhaustive()
    }
}
