//! Pre-checkout stock gate against live POS quantities.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use utoipa::ToSchema;

use crate::errors::ServiceError;
use crate::pos::{PosClient, PosSnapshot};

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, ToSchema)]
pub struct StockLine {
    pub sku: String,
    /// Known POS variant id; when absent the SKU is looked up in the POS
    /// catalog.
    pub variant_id: Option<String>,
    pub quantity: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct StockShortage {
    pub sku: String,
    pub requested: i64,
    pub available: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct StockCheckResult {
    pub available: bool,
    pub failures: Vec<StockShortage>,
}

/// Checks every line against one snapshot and collects all shortages rather
/// than stopping at the first. Lines for the same SKU are judged against
/// their combined quantity.
pub fn check_lines(snapshot: &PosSnapshot, lines: &[StockLine]) -> StockCheckResult {
    let mut totals: Vec<(&StockLine, i64)> = Vec::new();
    for line in lines {
        match totals.iter_mut().find(|(l, _)| l.sku == line.sku) {
            Some((_, qty)) => *qty += line.quantity,
            None => totals.push((line, line.quantity)),
        }
    }

    let failures: Vec<StockShortage> = totals
        .into_iter()
        .filter_map(|(line, requested)| {
            let variant = line
                .variant_id
                .as_deref()
                .filter(|id| snapshot.has_variant(id))
                .or_else(|| snapshot.variant_for_sku(&line.sku));
            let available = variant.map(|id| snapshot.on_hand(id).max(0)).unwrap_or(0);
            (requested > available).then(|| StockShortage {
                sku: line.sku.clone(),
                requested,
                available,
            })
        })
        .collect();

    StockCheckResult {
        available: failures.is_empty(),
        failures,
    }
}

#[derive(Clone)]
pub struct StockCheckService {
    pos: Arc<dyn PosClient>,
}

impl StockCheckService {
    pub fn new(pos: Arc<dyn PosClient>) -> Self {
        Self { pos }
    }

    #[instrument(skip(self))]
    pub async fn check_one(
        &self,
        sku: &str,
        variant_id: Option<String>,
        quantity: i64,
    ) -> Result<StockCheckResult, ServiceError> {
        self.check_many(&[StockLine {
            sku: sku.to_string(),
            variant_id,
            quantity,
        }])
        .await
    }

    #[instrument(skip(self, lines), fields(lines = lines.len()))]
    pub async fn check_many(&self, lines: &[StockLine]) -> Result<StockCheckResult, ServiceError> {
        let snapshot = PosSnapshot::fetch(self.pos.as_ref()).await?;
        let result = check_lines(&snapshot, lines);
        debug!(shortages = result.failures.len(), "stock check complete");
        Ok(result)
    }
}
