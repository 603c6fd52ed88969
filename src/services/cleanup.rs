//! Destructive maintenance jobs: stale-order sweep and admin resets.
//!
//! Every job writes through the chunked [`BatchWriter`], so a crash part-way
//! leaves a completed prefix of chunks and no open transaction.

use std::sync::Arc;

use chrono::{Duration, Utc};
use sea_orm::{
    ActiveEnum, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect,
};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::batch::{BatchWriter, DbBatchSink, WriteOp};
use crate::entities::{order, product, product_variant, OrderStatus};
use crate::errors::ServiceError;
use crate::services::inventory_sync::{InventorySyncService, SyncReport};
use crate::services::reservations::{ReleaseMode, ReservationService};

/// Most orders deleted per status in one sweep.
pub const SWEEP_CAP_PER_STATUS: u64 = 200;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CleanupAction {
    DeleteAllOrders,
    ResetReservations,
    SyncStock,
    FullCleanup,
    SweepStale,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct CleanupReport {
    pub orders_deleted: usize,
    pub reservations_reset: usize,
    pub reservations_released: usize,
    pub commits: usize,
    pub stock_sync: Option<SyncReport>,
}

#[derive(Clone)]
pub struct CleanupService {
    db: Arc<DatabaseConnection>,
    reservations: ReservationService,
    inventory_sync: InventorySyncService,
}

impl CleanupService {
    pub fn new(db: Arc<DatabaseConnection>, inventory_sync: InventorySyncService) -> Self {
        let reservations = ReservationService::new(db.clone());
        Self {
            db,
            reservations,
            inventory_sync,
        }
    }

    pub async fn run(
        &self,
        action: CleanupAction,
        stale_days: i64,
    ) -> Result<CleanupReport, ServiceError> {
        match action {
            CleanupAction::DeleteAllOrders => self.delete_all_orders().await,
            CleanupAction::ResetReservations => self.reset_reservations().await,
            CleanupAction::SyncStock => Ok(CleanupReport {
                stock_sync: Some(self.inventory_sync.sync_stock().await?),
                ..CleanupReport::default()
            }),
            CleanupAction::FullCleanup => self.full_cleanup().await,
            CleanupAction::SweepStale => self.sweep_stale(stale_days).await,
        }
    }

    /// Deletes `PENDING`, `PENDING_PAYMENT` and `FAILED` orders created more
    /// than `days` ago, at most [`SWEEP_CAP_PER_STATUS`] per status, after
    /// returning any stock they still hold.
    #[instrument(skip(self))]
    pub async fn sweep_stale(&self, days: i64) -> Result<CleanupReport, ServiceError> {
        if days < 1 {
            return Err(ServiceError::ValidationError(
                "stale order threshold must be at least one day".into(),
            ));
        }
        let cutoff = Utc::now() - Duration::days(days);
        let mut report = CleanupReport::default();
        let mut writer = BatchWriter::new(DbBatchSink::new(&self.db));

        for status in OrderStatus::SWEEPABLE {
            let stale = order::Entity::find()
                .filter(order::Column::Status.eq(status.into_value()))
                .filter(order::Column::CreatedAt.lt(cutoff))
                .order_by_asc(order::Column::CreatedAt)
                .limit(SWEEP_CAP_PER_STATUS)
                .all(&*self.db)
                .await?;
            for stale_order in stale {
                if stale_order.stock_reserved
                    && self
                        .reservations
                        .release_order(stale_order.id, ReleaseMode::Return)
                        .await?
                {
                    report.reservations_released += 1;
                }
                writer.push(WriteOp::DeleteOrder(stale_order.id)).await?;
            }
        }

        let summary = writer.finish().await?;
        report.orders_deleted = summary.written;
        report.commits = summary.commits;
        metrics::counter!("stale_orders_deleted_total", summary.written as u64);
        info!(
            deleted = report.orders_deleted,
            released = report.reservations_released,
            "stale order sweep finished"
        );
        Ok(report)
    }

    #[instrument(skip(self))]
    pub async fn delete_all_orders(&self) -> Result<CleanupReport, ServiceError> {
        let ids: Vec<Uuid> = order::Entity::find()
            .select_only()
            .column(order::Column::Id)
            .into_tuple()
            .all(&*self.db)
            .await?;

        let mut writer = BatchWriter::new(DbBatchSink::new(&self.db));
        for id in ids {
            writer.push(WriteOp::DeleteOrder(id)).await?;
        }
        let summary = writer.finish().await?;
        warn!(deleted = summary.written, "all orders deleted");
        Ok(CleanupReport {
            orders_deleted: summary.written,
            commits: summary.commits,
            ..CleanupReport::default()
        })
    }

    /// Zeroes every reservation counter and clears every order's hold flag.
    #[instrument(skip(self))]
    pub async fn reset_reservations(&self) -> Result<CleanupReport, ServiceError> {
        let products: Vec<Uuid> = product::Entity::find()
            .select_only()
            .column(product::Column::Id)
            .filter(product::Column::ReservedQuantity.ne(0i64))
            .into_tuple()
            .all(&*self.db)
            .await?;
        let variants: Vec<Uuid> = product_variant::Entity::find()
            .select_only()
            .column(product_variant::Column::Id)
            .filter(product_variant::Column::ReservedQuantity.ne(0i64))
            .into_tuple()
            .all(&*self.db)
            .await?;
        let holding: Vec<Uuid> = order::Entity::find()
            .select_only()
            .column(order::Column::Id)
            .filter(order::Column::StockReserved.eq(true))
            .into_tuple()
            .all(&*self.db)
            .await?;

        let reset = products.len() + variants.len();
        let mut writer = BatchWriter::new(DbBatchSink::new(&self.db));
        for id in products {
            writer.push(WriteOp::ResetProductReservation(id)).await?;
        }
        for id in variants {
            writer.push(WriteOp::ResetVariantReservation(id)).await?;
        }
        for id in holding {
            writer.push(WriteOp::ClearOrderReservation(id)).await?;
        }
        let summary = writer.finish().await?;

        info!(reset, commits = summary.commits, "reservations reset");
        Ok(CleanupReport {
            reservations_reset: reset,
            commits: summary.commits,
            ..CleanupReport::default()
        })
    }

    /// Deletes all orders, resets reservations and resyncs stock from the POS.
    #[instrument(skip(self))]
    pub async fn full_cleanup(&self) -> Result<CleanupReport, ServiceError> {
        let deleted = self.delete_all_orders().await?;
        let reset = self.reset_reservations().await?;
        let sync = self.inventory_sync.sync_stock().await?;
        Ok(CleanupReport {
            orders_deleted: deleted.orders_deleted,
            reservations_reset: reset.reservations_reset,
            reservations_released: 0,
            commits: deleted.commits + reset.commits + sync.commits,
            stock_sync: Some(sync),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_parse_from_snake_case() {
        assert_eq!(
            "full_cleanup".parse::<CleanupAction>().ok(),
            Some(CleanupAction::FullCleanup)
        );
        assert_eq!(CleanupAction::SweepStale.to_string(), "sweep_stale");
    }
}
