//! Post-payment fulfillment.
//!
//! Runs once per paid order: submit a POS receipt, record the outcome,
//! convert the checkout reservation into a real deduction and book a
//! courier or issue a collection reference. The run is claimed by moving
//! `loyverse_status` from `PENDING` to `PROCESSING` with a conditional
//! update; every other caller finds nothing to claim and returns without
//! side effects. A failed POS call never touches the payment status.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveEnum, ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait,
    IntoActiveModel, QueryFilter, TransactionTrait,
};
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::order::{self, FailedSyncItem, FailedSyncItems, OrderItem};
use crate::entities::{DeliveryMethod, LoyverseStatus, OrderStatus, ShippingStatus};
use crate::errors::ServiceError;
use crate::pos::{PosClient, PosSnapshot, ReceiptLine, ReceiptRequest};
use crate::services::order_status::OrderStatusService;
use crate::services::reservations::{release_order_in, ReleaseMode};
use crate::services::settings::{CollectionSettings, SettingsService};
use crate::services::shipping::{ShipmentBooker, ShipmentRequest};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentOutcome {
    Synced,
    PartialSync,
    Failed,
    /// Nothing to do: already synced, or another run holds the claim.
    Skipped,
}

impl FulfillmentOutcome {
    fn as_label(&self) -> &'static str {
        match self {
            FulfillmentOutcome::Synced => "synced",
            FulfillmentOutcome::PartialSync => "partial_sync",
            FulfillmentOutcome::Failed => "failed",
            FulfillmentOutcome::Skipped => "skipped",
        }
    }
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct FulfillmentReport {
    pub order_id: Uuid,
    pub outcome: FulfillmentOutcome,
    pub loyverse_status: LoyverseStatus,
    pub receipt_number: Option<String>,
    pub failed_items: Vec<FailedSyncItem>,
    pub error: Option<String>,
    pub shipping_status: ShippingStatus,
    pub tracking_no: Option<String>,
    pub collection_reference: Option<String>,
}

impl FulfillmentReport {
    fn skipped(order: &order::Model) -> Self {
        Self {
            order_id: order.id,
            outcome: FulfillmentOutcome::Skipped,
            loyverse_status: order.loyverse_status,
            receipt_number: order.loyverse_receipt_number.clone(),
            failed_items: order
                .loyverse_failed_items
                .clone()
                .map(|f| f.0)
                .unwrap_or_default(),
            error: order.loyverse_error.clone(),
            shipping_status: order.shipping_status,
            tracking_no: order.tracking_no.clone(),
            collection_reference: order.collection_reference.clone(),
        }
    }
}

/// `{prefix}-{first 8 characters of the order id}`, uppercased.
pub fn collection_reference(prefix: &str, order_id: Uuid) -> String {
    let simple = order_id.simple().to_string();
    format!("{}-{}", prefix.trim(), &simple[..8]).to_uppercase()
}

/// Lines to submit on this attempt. A reprocess after a partial sync only
/// resubmits the lines the POS did not take the first time.
fn lines_to_submit(order: &order::Model) -> Vec<OrderItem> {
    let failed = order
        .loyverse_failed_items
        .as_ref()
        .map(|f| f.0.as_slice())
        .unwrap_or_default();
    if order.loyverse_receipt_number.is_none() || failed.is_empty() {
        return order.items.0.clone();
    }
    order
        .items
        .0
        .iter()
        .filter(|item| failed.iter().any(|f| f.sku == item.sku))
        .cloned()
        .collect()
}

/// Splits items into receipt lines and lines the POS cannot take.
pub fn build_receipt_lines(
    items: &[OrderItem],
    snapshot: Option<&PosSnapshot>,
) -> (Vec<ReceiptLine>, Vec<FailedSyncItem>) {
    let mut lines = Vec::new();
    let mut failed = Vec::new();
    for item in items {
        let stored = item
            .loyverse_variant_id
            .as_deref()
            .filter(|id| !id.trim().is_empty());
        let variant_id = match (stored, snapshot) {
            (Some(id), Some(snap)) if snap.has_variant(id) => Some(id.to_string()),
            (_, Some(snap)) => snap.variant_for_sku(&item.sku).map(str::to_string),
            (Some(id), None) => Some(id.to_string()),
            (None, None) => None,
        };
        match variant_id {
            Some(variant_id) if item.quantity > 0 => lines.push(ReceiptLine {
                variant_id,
                quantity: item.quantity,
                price: item.web_price,
            }),
            Some(_) => failed.push(FailedSyncItem {
                sku: item.sku.clone(),
                quantity: item.quantity,
                reason: "non-positive quantity".into(),
            }),
            None => failed.push(FailedSyncItem {
                sku: item.sku.clone(),
                quantity: item.quantity,
                reason: "SKU not found in POS".into(),
            }),
        }
    }
    (lines, failed)
}

struct SyncResult {
    status: LoyverseStatus,
    receipt_number: Option<String>,
    failed_items: Vec<FailedSyncItem>,
    error: Option<String>,
}

#[derive(Clone)]
pub struct FulfillmentService {
    db: Arc<DatabaseConnection>,
    pos: Arc<dyn PosClient>,
    shipment: Arc<dyn ShipmentBooker>,
    settings: SettingsService,
}

impl FulfillmentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        pos: Arc<dyn PosClient>,
        shipment: Arc<dyn ShipmentBooker>,
    ) -> Self {
        let settings = SettingsService::new(db.clone());
        Self {
            db,
            pos,
            shipment,
            settings,
        }
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn process_successful_order(
        &self,
        order_id: Uuid,
    ) -> Result<FulfillmentReport, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;
        if order.status != OrderStatus::Paid {
            return Err(ServiceError::InvalidStatus(format!(
                "order {order_id} is {:?}; only paid orders are fulfilled",
                order.status
            )));
        }
        if order.loyverse_status != LoyverseStatus::Pending {
            info!(status = ?order.loyverse_status, "fulfillment skipped");
            metrics::counter!("fulfillment_runs_total", 1, "outcome" => "skipped");
            return Ok(FulfillmentReport::skipped(&order));
        }

        let attempt_id = Uuid::new_v4();
        let claimed = order::Entity::update_many()
            .col_expr(
                order::Column::LoyverseStatus,
                Expr::value(LoyverseStatus::Processing.into_value()),
            )
            .col_expr(order::Column::ReceiptAttemptId, Expr::value(attempt_id))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::LoyverseStatus.eq(LoyverseStatus::Pending.into_value()))
            .exec(&*self.db)
            .await?;
        if claimed.rows_affected == 0 {
            info!("fulfillment already claimed by another run");
            metrics::counter!("fulfillment_runs_total", 1, "outcome" => "skipped");
            return Ok(FulfillmentReport::skipped(&order));
        }

        match self.complete_claim(&order, attempt_id).await {
            Ok(report) => Ok(report),
            Err(e) => {
                self.abandon_claim(order_id, attempt_id, &e).await;
                Err(e)
            }
        }
    }

    /// Hands a claim that could not be recorded back as `FAILED` so the order
    /// can be reprocessed. Only this attempt's claim is touched.
    async fn abandon_claim(&self, order_id: Uuid, attempt_id: Uuid, cause: &ServiceError) {
        let result = order::Entity::update_many()
            .col_expr(
                order::Column::LoyverseStatus,
                Expr::value(LoyverseStatus::Failed.into_value()),
            )
            .col_expr(
                order::Column::LoyverseError,
                Expr::value(format!("fulfillment interrupted (attempt {attempt_id}): {cause}")),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::LoyverseStatus.eq(LoyverseStatus::Processing.into_value()))
            .filter(order::Column::ReceiptAttemptId.eq(attempt_id))
            .exec(&*self.db)
            .await;
        match result {
            Ok(_) => warn!(error = %cause, "fulfillment claim released after failure"),
            Err(e) => error!(
                error = %e,
                "could not release fulfillment claim; it expires after the processing lease"
            ),
        }
    }

    async fn complete_claim(
        &self,
        order: &order::Model,
        attempt_id: Uuid,
    ) -> Result<FulfillmentReport, ServiceError> {
        let order_id = order.id;
        let sync = self.submit_receipt(order, attempt_id).await;
        let outcome = match sync.status {
            LoyverseStatus::Synced => FulfillmentOutcome::Synced,
            LoyverseStatus::PartialSync => FulfillmentOutcome::PartialSync,
            _ => FulfillmentOutcome::Failed,
        };

        let (shipping_status, tracking_no, collection_ref) = self.arrange_handover(order).await;

        let txn = self.db.begin().await?;
        let mut active = order.clone().into_active_model();
        active.loyverse_status = Set(sync.status);
        active.loyverse_error = Set(sync.error.clone());
        active.loyverse_failed_items = Set(
            (!sync.failed_items.is_empty()).then(|| FailedSyncItems(sync.failed_items.clone())),
        );
        active.loyverse_receipt_number = Set(sync.receipt_number.clone());
        active.shipping_status = Set(shipping_status);
        active.tracking_no = Set(tracking_no.clone());
        active.collection_reference = Set(collection_ref.clone());
        active.processed_at = Set(Some(Utc::now()));
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        // A failed sync keeps the hold so the units stay unavailable until a
        // reprocess lands the receipt.
        if outcome != FulfillmentOutcome::Failed {
            release_order_in(&txn, order_id, ReleaseMode::Consume).await?;
        }
        txn.commit().await?;

        metrics::counter!("fulfillment_runs_total", 1, "outcome" => outcome.as_label());
        info!(
            outcome = outcome.as_label(),
            receipt = ?sync.receipt_number,
            failed_lines = sync.failed_items.len(),
            "fulfillment finished"
        );

        Ok(FulfillmentReport {
            order_id,
            outcome,
            loyverse_status: sync.status,
            receipt_number: sync.receipt_number,
            failed_items: sync.failed_items,
            error: sync.error,
            shipping_status,
            tracking_no,
            collection_reference: collection_ref,
        })
    }

    /// Resets a failed or partial sync and runs fulfillment again.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn reprocess(&self, order_id: Uuid) -> Result<FulfillmentReport, ServiceError> {
        OrderStatusService::new(self.db.clone())
            .reset_for_reprocess(order_id)
            .await?;
        self.process_successful_order(order_id).await
    }

    async fn submit_receipt(&self, order: &order::Model, attempt_id: Uuid) -> SyncResult {
        let items = lines_to_submit(order);
        let previous_receipt = order.loyverse_receipt_number.clone();

        let snapshot = match PosSnapshot::fetch(self.pos.as_ref()).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(error = %e, "POS catalog unavailable, using stored variant ids");
                None
            }
        };
        let (lines, failed_items) = build_receipt_lines(&items, snapshot.as_ref());

        if lines.is_empty() {
            return SyncResult {
                status: LoyverseStatus::Failed,
                receipt_number: previous_receipt,
                error: Some("no order line could be matched to a POS variant".into()),
                failed_items,
            };
        }

        let total: Decimal = lines
            .iter()
            .map(|l| l.price * Decimal::from(l.quantity))
            .sum();
        let mut note = format!("Web order {} (attempt {attempt_id})", order.id);
        if let Some(previous) = order.receipt_attempt_id {
            note.push_str(&format!("; previous attempt {previous}"));
        }
        let request = ReceiptRequest {
            lines,
            total,
            note,
        };

        match self.pos.create_receipt(&request).await {
            Ok(receipt) => {
                let receipt_number = match previous_receipt {
                    Some(prev) => format!("{prev}, {}", receipt.receipt_number),
                    None => receipt.receipt_number,
                };
                SyncResult {
                    status: if failed_items.is_empty() {
                        LoyverseStatus::Synced
                    } else {
                        LoyverseStatus::PartialSync
                    },
                    receipt_number: Some(receipt_number),
                    error: None,
                    failed_items,
                }
            }
            Err(e) => {
                error!(error = %e, "POS receipt creation failed");
                // Nothing from this attempt landed: every attempted line stays
                // pending for the next run.
                let mut failed_items = failed_items;
                for item in &items {
                    if !failed_items.iter().any(|f| f.sku == item.sku) {
                        failed_items.push(FailedSyncItem {
                            sku: item.sku.clone(),
                            quantity: item.quantity,
                            reason: format!("receipt not created: {e}"),
                        });
                    }
                }
                SyncResult {
                    status: LoyverseStatus::Failed,
                    receipt_number: previous_receipt,
                    error: Some(e.to_string()),
                    failed_items,
                }
            }
        }
    }

    /// Books a courier for delivery orders or issues the pickup reference for
    /// self-collection. Earlier successful bookings are kept.
    async fn arrange_handover(
        &self,
        order: &order::Model,
    ) -> (ShippingStatus, Option<String>, Option<String>) {
        match order.delivery_method {
            DeliveryMethod::SelfCollection => {
                if order.collection_reference.is_some() {
                    return (
                        order.shipping_status,
                        order.tracking_no.clone(),
                        order.collection_reference.clone(),
                    );
                }
                let prefix = match self.settings.get::<CollectionSettings>().await {
                    Ok(settings) => settings.reference_prefix,
                    Err(e) => {
                        warn!(error = %e, "collection settings unavailable, using default prefix");
                        CollectionSettings::default().reference_prefix
                    }
                };
                (
                    ShippingStatus::AwaitingCollection,
                    None,
                    Some(collection_reference(&prefix, order.id)),
                )
            }
            DeliveryMethod::Delivery => {
                if matches!(
                    order.shipping_status,
                    ShippingStatus::Booked | ShippingStatus::Collected
                ) || !self.shipment.is_enabled()
                {
                    return (order.shipping_status, order.tracking_no.clone(), None);
                }
                let request = ShipmentRequest {
                    order_id: order.id,
                    customer: order.customer.clone(),
                    items: order.items.0.clone(),
                    declared_value: order.subtotal,
                };
                match self.shipment.book(&request).await {
                    Ok(booking) => (ShippingStatus::Booked, Some(booking.tracking_no), None),
                    Err(e) => {
                        warn!(error = %e, "shipment booking failed");
                        (ShippingStatus::BookingFailed, None, None)
                    }
                }
            }
        }
    }
}
