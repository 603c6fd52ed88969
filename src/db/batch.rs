//! Chunked write batches.
//!
//! The storage backend accepts at most [`BACKEND_BATCH_LIMIT`] writes per
//! commit. [`BatchWriter`] buffers operations and flushes a chunk once it
//! reaches the cap (limit minus [`BATCH_SAFETY_MARGIN`]); the final partial
//! chunk is flushed by [`BatchWriter::finish`]. Chunks are independent
//! commits: a failure leaves every earlier chunk in place.

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveEnum, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    QueryFilter, TransactionTrait,
};
use tracing::debug;
use uuid::Uuid;

use crate::entities::{order, product, product_variant, StockStatus};
use crate::errors::ServiceError;

pub const BACKEND_BATCH_LIMIT: usize = 500;
pub const BATCH_SAFETY_MARGIN: usize = 50;
pub const DEFAULT_BATCH_CAP: usize = BACKEND_BATCH_LIMIT - BATCH_SAFETY_MARGIN;

/// Stock fields written by the POS sync. `stock_status` is `None` when the
/// record carries a manual status that the sync must leave alone.
#[derive(Clone, Debug, PartialEq)]
pub struct StockUpdate {
    pub stock_status: Option<StockStatus>,
    pub stock_quantity: i64,
    pub loyverse_item_id: Option<String>,
    pub loyverse_variant_id: Option<String>,
}

#[derive(Clone, Debug)]
pub enum WriteOp {
    ProductStock { product_id: Uuid, update: StockUpdate },
    VariantStock { variant_id: Uuid, update: StockUpdate },
    InsertDraftProduct(Box<product::ActiveModel>),
    ResetProductReservation(Uuid),
    ResetVariantReservation(Uuid),
    ClearOrderReservation(Uuid),
    DeleteOrder(Uuid),
}

#[async_trait]
pub trait BatchSink: Send {
    async fn commit(&mut self, ops: Vec<WriteOp>) -> Result<(), ServiceError>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub commits: usize,
    pub written: usize,
}

pub struct BatchWriter<S: BatchSink> {
    sink: S,
    cap: usize,
    pending: Vec<WriteOp>,
    summary: BatchSummary,
}

impl<S: BatchSink> BatchWriter<S> {
    pub fn new(sink: S) -> Self {
        Self::with_cap(sink, DEFAULT_BATCH_CAP)
    }

    pub fn with_cap(sink: S, cap: usize) -> Self {
        let cap = cap.clamp(1, BACKEND_BATCH_LIMIT);
        Self {
            sink,
            cap,
            pending: Vec::with_capacity(cap),
            summary: BatchSummary::default(),
        }
    }

    pub async fn push(&mut self, op: WriteOp) -> Result<(), ServiceError> {
        self.pending.push(op);
        if self.pending.len() >= self.cap {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ServiceError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::replace(&mut self.pending, Vec::with_capacity(self.cap));
        let len = chunk.len();
        self.sink.commit(chunk).await?;
        self.summary.commits += 1;
        self.summary.written += len;
        debug!(chunk = len, commits = self.summary.commits, "batch committed");
        Ok(())
    }

    /// Flushes the trailing partial chunk and returns the totals.
    pub async fn finish(mut self) -> Result<BatchSummary, ServiceError> {
        self.flush().await?;
        Ok(self.summary)
    }

    /// Totals committed so far, excluding buffered operations.
    pub fn summary(&self) -> BatchSummary {
        self.summary
    }
}

/// Applies each chunk inside its own database transaction.
pub struct DbBatchSink<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> DbBatchSink<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl<'a> BatchSink for DbBatchSink<'a> {
    async fn commit(&mut self, ops: Vec<WriteOp>) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        for op in ops {
            apply(&txn, op).await?;
        }
        txn.commit().await?;
        Ok(())
    }
}

async fn apply<C: ConnectionTrait>(conn: &C, op: WriteOp) -> Result<(), ServiceError> {
    let now = Utc::now();
    match op {
        WriteOp::ProductStock { product_id, update } => {
            let mut stmt = product::Entity::update_many()
                .col_expr(
                    product::Column::StockQuantity,
                    Expr::value(Some(update.stock_quantity)),
                )
                .col_expr(product::Column::UpdatedAt, Expr::value(now));
            if let Some(status) = update.stock_status {
                stmt = stmt.col_expr(
                    product::Column::StockStatus,
                    Expr::value(status.into_value()),
                );
            }
            if let Some(item_id) = update.loyverse_item_id {
                stmt = stmt.col_expr(product::Column::LoyverseItemId, Expr::value(Some(item_id)));
            }
            if let Some(variant_id) = update.loyverse_variant_id {
                stmt = stmt.col_expr(
                    product::Column::LoyverseVariantId,
                    Expr::value(Some(variant_id)),
                );
            }
            stmt.filter(product::Column::Id.eq(product_id))
                .exec(conn)
                .await?;
        }
        WriteOp::VariantStock { variant_id, update } => {
            let mut stmt = product_variant::Entity::update_many()
                .col_expr(
                    product_variant::Column::StockQuantity,
                    Expr::value(Some(update.stock_quantity)),
                )
                .col_expr(product_variant::Column::UpdatedAt, Expr::value(now));
            if let Some(status) = update.stock_status {
                stmt = stmt.col_expr(
                    product_variant::Column::StockStatus,
                    Expr::value(status.into_value()),
                );
            }
            if let Some(pos_variant) = update.loyverse_variant_id {
                stmt = stmt.col_expr(
                    product_variant::Column::LoyverseVariantId,
                    Expr::value(Some(pos_variant)),
                );
            }
            stmt.filter(product_variant::Column::Id.eq(variant_id))
                .exec(conn)
                .await?;
        }
        WriteOp::InsertDraftProduct(model) => {
            (*model).insert(conn).await?;
        }
        WriteOp::ResetProductReservation(id) => {
            product::Entity::update_many()
                .col_expr(product::Column::ReservedQuantity, Expr::value(0i64))
                .col_expr(product::Column::UpdatedAt, Expr::value(now))
                .filter(product::Column::Id.eq(id))
                .exec(conn)
                .await?;
        }
        WriteOp::ResetVariantReservation(id) => {
            product_variant::Entity::update_many()
                .col_expr(product_variant::Column::ReservedQuantity, Expr::value(0i64))
                .col_expr(product_variant::Column::UpdatedAt, Expr::value(now))
                .filter(product_variant::Column::Id.eq(id))
                .exec(conn)
                .await?;
        }
        WriteOp::ClearOrderReservation(id) => {
            order::Entity::update_many()
                .col_expr(order::Column::StockReserved, Expr::value(false))
                .filter(order::Column::Id.eq(id))
                .exec(conn)
                .await?;
        }
        WriteOp::DeleteOrder(id) => {
            order::Entity::delete_by_id(id).exec(conn).await?;
        }
    }
    Ok(())
}
