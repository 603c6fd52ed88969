//! Stock reservation ledger.
//!
//! Reservations are held per product or variant in `reserved_quantity` and
//! adjusted with single conditional `UPDATE` statements, so two checkouts
//! racing for the last unit cannot both succeed. An order's claim on the
//! ledger is tracked by `orders.stock_reserved`; releasing is a
//! compare-and-swap on that flag, which makes every release path
//! (rejection, sweep, fulfillment) run at most once per order.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::sea_query::{Expr, SimpleExpr};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    TransactionTrait,
};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::entities::order::OrderItem;
use crate::entities::{order, product, product_variant};
use crate::errors::ServiceError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StockRef {
    Product(Uuid),
    Variant(Uuid),
}

/// What happens to the reserved units when an order lets go of them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReleaseMode {
    /// The sale did not happen; units return to availability.
    Return,
    /// The sale completed; units leave local on-hand stock as well.
    Consume,
}

#[derive(Clone)]
pub struct ReservationService {
    db: Arc<DatabaseConnection>,
}

impl ReservationService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Reserves every line of an order and flags the order, or reserves
    /// nothing. Fails with `InsufficientStock` naming every short SKU.
    #[instrument(skip(self, items), fields(order_id = %order_id, lines = items.len()))]
    pub async fn reserve_order(
        &self,
        order_id: Uuid,
        items: &[OrderItem],
    ) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        reserve_order_in(&txn, order_id, items).await?;
        txn.commit().await?;
        Ok(())
    }

    /// Releases an order's reservation if it still holds one. Returns `false`
    /// when another path already released it.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn release_order(
        &self,
        order_id: Uuid,
        mode: ReleaseMode,
    ) -> Result<bool, ServiceError> {
        let txn = self.db.begin().await?;
        let released = release_order_in(&txn, order_id, mode).await?;
        txn.commit().await?;
        Ok(released)
    }
}

/// Maps each distinct SKU to its ledger row, variants first.
pub async fn resolve_refs<C: ConnectionTrait>(
    conn: &C,
    skus: &[String],
) -> Result<HashMap<String, StockRef>, ServiceError> {
    let mut refs = HashMap::new();
    if skus.is_empty() {
        return Ok(refs);
    }

    let variants = product_variant::Entity::find()
        .filter(product_variant::Column::Sku.is_in(skus.iter().cloned()))
        .all(conn)
        .await?;
    for v in variants {
        refs.insert(v.sku, StockRef::Variant(v.id));
    }

    let remaining: Vec<String> = skus
        .iter()
        .filter(|sku| !refs.contains_key(*sku))
        .cloned()
        .collect();
    if !remaining.is_empty() {
        let products = product::Entity::find()
            .filter(product::Column::Sku.is_in(remaining))
            .all(conn)
            .await?;
        for p in products {
            refs.insert(p.sku, StockRef::Product(p.id));
        }
    }
    Ok(refs)
}

fn merged_quantities(items: &[OrderItem]) -> Vec<(String, i64)> {
    let mut by_sku: Vec<(String, i64)> = Vec::new();
    for item in items {
        match by_sku.iter_mut().find(|(sku, _)| *sku == item.sku) {
            Some((_, qty)) => *qty += item.quantity,
            None => by_sku.push((item.sku.clone(), item.quantity)),
        }
    }
    by_sku
}

/// Atomically adds `quantity` to the reservation when enough stock is
/// available. Rows with no tracked quantity have nothing to reserve.
pub async fn reserve<C: ConnectionTrait>(
    conn: &C,
    target: StockRef,
    quantity: i64,
) -> Result<bool, ServiceError> {
    let now = Utc::now();
    let result = match target {
        StockRef::Product(id) => {
            product::Entity::update_many()
                .col_expr(
                    product::Column::ReservedQuantity,
                    Expr::col(product::Column::ReservedQuantity).add(quantity),
                )
                .col_expr(product::Column::UpdatedAt, Expr::value(now))
                .filter(product::Column::Id.eq(id))
                .filter(
                    Expr::expr(
                        Expr::col(product::Column::StockQuantity)
                            .sub(Expr::col(product::Column::ReservedQuantity)),
                    )
                    .gte(quantity),
                )
                .exec(conn)
                .await?
        }
        StockRef::Variant(id) => {
            product_variant::Entity::update_many()
                .col_expr(
                    product_variant::Column::ReservedQuantity,
                    Expr::col(product_variant::Column::ReservedQuantity).add(quantity),
                )
                .col_expr(product_variant::Column::UpdatedAt, Expr::value(now))
                .filter(product_variant::Column::Id.eq(id))
                .filter(
                    Expr::expr(
                        Expr::col(product_variant::Column::StockQuantity)
                            .sub(Expr::col(product_variant::Column::ReservedQuantity)),
                    )
                    .gte(quantity),
                )
                .exec(conn)
                .await?
        }
    };
    Ok(result.rows_affected == 1)
}

/// `col - quantity`, floored at zero.
fn decrement_clamped<Col: sea_orm::sea_query::IntoColumnRef + Copy>(
    col: Col,
    quantity: i64,
) -> SimpleExpr {
    Expr::case(Expr::col(col).gt(quantity), Expr::col(col).sub(quantity))
        .finally(0i64)
        .into()
}

pub async fn release<C: ConnectionTrait>(
    conn: &C,
    target: StockRef,
    quantity: i64,
    mode: ReleaseMode,
) -> Result<(), ServiceError> {
    let now = Utc::now();
    match target {
        StockRef::Product(id) => {
            product::Entity::update_many()
                .col_expr(
                    product::Column::ReservedQuantity,
                    decrement_clamped(product::Column::ReservedQuantity, quantity),
                )
                .col_expr(product::Column::UpdatedAt, Expr::value(now))
                .filter(product::Column::Id.eq(id))
                .exec(conn)
                .await?;
            if mode == ReleaseMode::Consume {
                product::Entity::update_many()
                    .col_expr(
                        product::Column::StockQuantity,
                        decrement_clamped(product::Column::StockQuantity, quantity),
                    )
                    .filter(product::Column::Id.eq(id))
                    .filter(product::Column::StockQuantity.is_not_null())
                    .exec(conn)
                    .await?;
            }
        }
        StockRef::Variant(id) => {
            product_variant::Entity::update_many()
                .col_expr(
                    product_variant::Column::ReservedQuantity,
                    decrement_clamped(product_variant::Column::ReservedQuantity, quantity),
                )
                .col_expr(product_variant::Column::UpdatedAt, Expr::value(now))
                .filter(product_variant::Column::Id.eq(id))
                .exec(conn)
                .await?;
            if mode == ReleaseMode::Consume {
                product_variant::Entity::update_many()
                    .col_expr(
                        product_variant::Column::StockQuantity,
                        decrement_clamped(product_variant::Column::StockQuantity, quantity),
                    )
                    .filter(product_variant::Column::Id.eq(id))
                    .filter(product_variant::Column::StockQuantity.is_not_null())
                    .exec(conn)
                    .await?;
            }
        }
    }
    Ok(())
}

pub async fn reserve_order_in<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    items: &[OrderItem],
) -> Result<(), ServiceError> {
    let lines = merged_quantities(items);
    let skus: Vec<String> = lines.iter().map(|(sku, _)| sku.clone()).collect();
    let refs = resolve_refs(conn, &skus).await?;

    let mut short = Vec::new();
    for (sku, quantity) in &lines {
        match refs.get(sku) {
            Some(target) => {
                if !reserve(conn, *target, *quantity).await? {
                    short.push(sku.clone());
                }
            }
            None => short.push(sku.clone()),
        }
    }
    if !short.is_empty() {
        warn!(%order_id, skus = ?short, "reservation refused");
        return Err(ServiceError::InsufficientStock(short.join(", ")));
    }

    order::Entity::update_many()
        .col_expr(order::Column::StockReserved, Expr::value(true))
        .filter(order::Column::Id.eq(order_id))
        .exec(conn)
        .await?;
    debug!(%order_id, lines = lines.len(), "stock reserved");
    Ok(())
}

pub async fn release_order_in<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    mode: ReleaseMode,
) -> Result<bool, ServiceError> {
    let Some(order) = order::Entity::find_by_id(order_id).one(conn).await? else {
        return Ok(false);
    };

    let claimed = order::Entity::update_many()
        .col_expr(order::Column::StockReserved, Expr::value(false))
        .filter(order::Column::Id.eq(order_id))
        .filter(order::Column::StockReserved.eq(true))
        .exec(conn)
        .await?;
    if claimed.rows_affected == 0 {
        return Ok(false);
    }

    let lines = merged_quantities(&order.items.0);
    let skus: Vec<String> = lines.iter().map(|(sku, _)| sku.clone()).collect();
    let refs = resolve_refs(conn, &skus).await?;
    for (sku, quantity) in lines {
        match refs.get(&sku) {
            Some(target) => release(conn, *target, quantity, mode).await?,
            None => warn!(%order_id, %sku, "reserved SKU no longer in catalog"),
        }
    }
    debug!(%order_id, ?mode, "reservation released");
    Ok(true)
}
