use std::sync::Arc;

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveEnum, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, TransactionTrait,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::entities::order::{self, Entity as OrderEntity, Model as OrderModel};
use crate::entities::{LoyverseStatus, OrderStatus};
use crate::errors::ServiceError;
use crate::services::promotions;
use crate::services::reservations::{release_order_in, ReleaseMode};

/// How long a `PROCESSING` claim is honoured before a reprocess may take it
/// over. Covers a run that died between claiming and recording its outcome.
pub const PROCESSING_LEASE_MINUTES: i64 = 10;

pub fn processing_lease_expired(order: &OrderModel) -> bool {
    order.loyverse_status == LoyverseStatus::Processing
        && Utc::now() - order.updated_at >= chrono::Duration::minutes(PROCESSING_LEASE_MINUTES)
}

/// Result of asking for the `PAID` transition.
#[derive(Clone, Debug)]
pub enum PaidTransition {
    /// This call moved the order to `PAID`; fulfillment should run.
    Transitioned(OrderModel),
    /// The order was already paid; nothing was changed.
    AlreadyPaid(OrderModel),
}

impl PaidTransition {
    pub fn order(&self) -> &OrderModel {
        match self {
            PaidTransition::Transitioned(o) | PaidTransition::AlreadyPaid(o) => o,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, PaidTransition::Transitioned(_))
    }
}

fn status_values(statuses: &[OrderStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.into_value()).collect()
}

async fn find_order<C: ConnectionTrait>(conn: &C, order_id: Uuid) -> Result<OrderModel, ServiceError> {
    OrderEntity::find_by_id(order_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))
}

#[derive(Clone)]
pub struct OrderStatusService {
    db: Arc<DatabaseConnection>,
}

impl OrderStatusService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn get(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        find_order(&*self.db, order_id).await
    }

    /// Newest first, optionally narrowed to one status.
    pub async fn list(
        &self,
        status: Option<OrderStatus>,
        limit: u64,
    ) -> Result<Vec<OrderModel>, ServiceError> {
        let mut query = OrderEntity::find();
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status.into_value()));
        }
        Ok(query
            .order_by_desc(order::Column::CreatedAt)
            .limit(limit)
            .all(&*self.db)
            .await?)
    }

    /// Moves a `PENDING`/`PENDING_PAYMENT` order to `PAID` with a conditional
    /// update, counting promo usage in the same transaction. A call against an
    /// order that is already paid changes nothing and reports `AlreadyPaid`.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn mark_paid(
        &self,
        order_id: Uuid,
        approved_by: Option<String>,
    ) -> Result<PaidTransition, ServiceError> {
        let txn = self.db.begin().await?;
        let order = find_order(&txn, order_id).await?;
        if order.status == OrderStatus::Paid {
            return Ok(PaidTransition::AlreadyPaid(order));
        }
        if !order.status.can_transition_to(OrderStatus::Paid) {
            return Err(ServiceError::InvalidStatus(format!(
                "order {order_id} is {:?} and cannot be paid",
                order.status
            )));
        }

        let now = Utc::now();
        let mut update = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Paid.into_value()))
            .col_expr(order::Column::PaidAt, Expr::value(now))
            .col_expr(order::Column::UpdatedAt, Expr::value(now));
        if let Some(actor) = approved_by.as_deref() {
            update = update.col_expr(order::Column::ApprovedBy, Expr::value(actor));
        }
        let result = update
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.is_in(status_values(&OrderStatus::PAYABLE)))
            .exec(&txn)
            .await?;

        if result.rows_affected == 0 {
            let current = find_order(&txn, order_id).await?;
            txn.rollback().await?;
            return if current.status == OrderStatus::Paid {
                Ok(PaidTransition::AlreadyPaid(current))
            } else {
                Err(ServiceError::InvalidStatus(format!(
                    "order {order_id} changed to {:?} concurrently",
                    current.status
                )))
            };
        }

        if let Some(code) = order.promo_code.as_deref() {
            promotions::record_usage(&txn, code).await?;
        }
        let paid = find_order(&txn, order_id).await?;
        txn.commit().await?;

        metrics::counter!("orders_paid_total", 1, "gateway" => paid.payment_gateway.to_string());
        info!(gateway = %paid.payment_gateway, "order marked paid");
        Ok(PaidTransition::Transitioned(paid))
    }

    /// Admin confirmation of a manual bank transfer.
    #[instrument(skip(self), fields(order_id = %order_id, actor = %actor))]
    pub async fn approve_manual(
        &self,
        order_id: Uuid,
        actor: &str,
    ) -> Result<PaidTransition, ServiceError> {
        let order = self.get(order_id).await?;
        match order.status {
            OrderStatus::Paid => Ok(PaidTransition::AlreadyPaid(order)),
            OrderStatus::PendingPayment => self.mark_paid(order_id, Some(actor.to_string())).await,
            other => Err(ServiceError::InvalidStatus(format!(
                "only PENDING_PAYMENT orders can be approved, order {order_id} is {other:?}"
            ))),
        }
    }

    /// Admin rejection: cancels an unpaid order and returns its reserved stock.
    #[instrument(skip(self, reason), fields(order_id = %order_id, actor = %actor))]
    pub async fn reject_manual(
        &self,
        order_id: Uuid,
        actor: &str,
        reason: Option<String>,
    ) -> Result<OrderModel, ServiceError> {
        let txn = self.db.begin().await?;
        let order = find_order(&txn, order_id).await?;
        if order.status == OrderStatus::Cancelled {
            return Ok(order);
        }
        if !order.status.can_transition_to(OrderStatus::Cancelled) {
            return Err(ServiceError::InvalidStatus(format!(
                "order {order_id} is {:?} and cannot be rejected",
                order.status
            )));
        }

        let now = Utc::now();
        let result = OrderEntity::update_many()
            .col_expr(
                order::Column::Status,
                Expr::value(OrderStatus::Cancelled.into_value()),
            )
            .col_expr(order::Column::CancelledAt, Expr::value(now))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .col_expr(order::Column::RejectedBy, Expr::value(actor))
            .col_expr(order::Column::RejectionReason, Expr::value(reason))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.is_in(status_values(&OrderStatus::PAYABLE)))
            .exec(&txn)
            .await?;
        if result.rows_affected == 0 {
            txn.rollback().await?;
            return Err(ServiceError::Conflict(format!(
                "order {order_id} changed status while being rejected"
            )));
        }

        release_order_in(&txn, order_id, ReleaseMode::Return).await?;
        let cancelled = find_order(&txn, order_id).await?;
        txn.commit().await?;

        info!("order rejected");
        Ok(cancelled)
    }

    /// Marks an unpaid order `FAILED` (gateway refused to create a payment)
    /// and returns its reserved stock.
    #[instrument(skip(self, reason), fields(order_id = %order_id))]
    pub async fn mark_failed(&self, order_id: Uuid, reason: &str) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        let result = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Failed.into_value()))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.is_in(status_values(&OrderStatus::PAYABLE)))
            .exec(&txn)
            .await?;
        if result.rows_affected == 1 {
            release_order_in(&txn, order_id, ReleaseMode::Return).await?;
            warn!(%reason, "order marked failed");
        }
        txn.commit().await?;
        Ok(())
    }

    /// Makes a paid order eligible for another POS sync attempt. Refused when
    /// the order is already synced or an attempt is in flight, so a completed
    /// receipt is never submitted twice through this path.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn reset_for_reprocess(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        let order = self.get(order_id).await?;
        if order.status != OrderStatus::Paid {
            return Err(ServiceError::InvalidStatus(format!(
                "order {order_id} is {:?}; only paid orders can be reprocessed",
                order.status
            )));
        }
        match order.loyverse_status {
            LoyverseStatus::Synced => {
                return Err(ServiceError::Conflict(format!(
                    "order {order_id} is already synced to the POS"
                )))
            }
            LoyverseStatus::Processing if !processing_lease_expired(&order) => {
                return Err(ServiceError::Conflict(format!(
                    "order {order_id} has a POS sync in progress"
                )))
            }
            LoyverseStatus::Processing => {
                warn!(claimed_at = %order.updated_at, "taking over an expired POS sync claim");
            }
            LoyverseStatus::Pending | LoyverseStatus::Failed | LoyverseStatus::PartialSync => {}
        }

        let mut reset = OrderEntity::update_many()
            .col_expr(
                order::Column::LoyverseStatus,
                Expr::value(LoyverseStatus::Pending.into_value()),
            )
            .col_expr(order::Column::LoyverseError, Expr::value(Option::<String>::None))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::LoyverseStatus.eq(order.loyverse_status.into_value()));
        if order.loyverse_status == LoyverseStatus::Processing {
            // A fresh claim taken since the read renews `updated_at`.
            reset = reset.filter(
                order::Column::UpdatedAt
                    .lte(Utc::now() - chrono::Duration::minutes(PROCESSING_LEASE_MINUTES)),
            );
        }
        let result = reset.exec(&*self.db).await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(format!(
                "order {order_id} POS status changed concurrently"
            )));
        }

        info!(previous = ?order.loyverse_status, "order reset for reprocessing");
        self.get(order_id).await
    }
}
