use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::auth::AdminUser;
use crate::entities::order::{self, CustomerInfo, FailedSyncItem, OrderItem};
use crate::entities::{DeliveryMethod, GatewayKind, LoyverseStatus, OrderStatus, ShippingStatus};
use crate::errors::{AdminError, ServiceError};
use crate::services::fulfillment::FulfillmentReport;
use crate::services::payments::ApprovalResult;
use crate::{ApiResponse, ApiResult, AppState};

const DEFAULT_LIST_LIMIT: u64 = 50;
const MAX_LIST_LIMIT: u64 = 500;

/// Keeps only characters that can appear in an order id.
pub fn sanitize_order_id(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

fn parse_order_id(raw: &str) -> Result<Uuid, ServiceError> {
    let cleaned = sanitize_order_id(raw);
    Uuid::parse_str(&cleaned).map_err(|_| ServiceError::NotFound("order not found".into()))
}

/// What a customer may see about their own order.
#[derive(Debug, Serialize, ToSchema)]
pub struct PublicOrderStatus {
    pub id: Uuid,
    pub status: OrderStatus,
    pub delivery_method: DeliveryMethod,
    pub shipping_status: ShippingStatus,
    pub tracking_no: Option<String>,
    pub collection_reference: Option<String>,
    pub items: Vec<PublicOrderLine>,
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PublicOrderLine {
    pub sku: String,
    pub name: String,
    pub quantity: i64,
    pub price: Decimal,
}

impl From<order::Model> for PublicOrderStatus {
    fn from(order: order::Model) -> Self {
        Self {
            id: order.id,
            status: order.status,
            delivery_method: order.delivery_method,
            shipping_status: order.shipping_status,
            tracking_no: order.tracking_no,
            collection_reference: order.collection_reference,
            items: order
                .items
                .0
                .into_iter()
                .map(|item| PublicOrderLine {
                    sku: item.sku,
                    name: item.name,
                    quantity: item.quantity,
                    price: item.web_price,
                })
                .collect(),
            subtotal: order.subtotal,
            shipping_cost: order.shipping_cost,
            discount_amount: order.discount_amount,
            total_amount: order.total_amount,
            created_at: order.created_at,
            paid_at: order.paid_at,
        }
    }
}

/// Full order record for the admin console.
#[derive(Debug, Serialize, ToSchema)]
pub struct AdminOrderView {
    pub id: Uuid,
    pub status: OrderStatus,
    pub customer: CustomerInfo,
    pub items: Vec<OrderItem>,
    pub delivery_method: DeliveryMethod,
    pub shipping_status: ShippingStatus,
    pub payment_gateway: GatewayKind,
    pub gateway_bill_id: Option<String>,
    pub loyverse_status: LoyverseStatus,
    pub loyverse_error: Option<String>,
    pub loyverse_failed_items: Vec<FailedSyncItem>,
    pub loyverse_receipt_number: Option<String>,
    pub receipt_attempt_id: Option<Uuid>,
    pub tracking_no: Option<String>,
    pub collection_reference: Option<String>,
    pub promo_code: Option<String>,
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
    pub stock_reserved: bool,
    pub approved_by: Option<String>,
    pub rejected_by: Option<String>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl From<order::Model> for AdminOrderView {
    fn from(order: order::Model) -> Self {
        Self {
            id: order.id,
            status: order.status,
            customer: order.customer,
            items: order.items.0,
            delivery_method: order.delivery_method,
            shipping_status: order.shipping_status,
            payment_gateway: order.payment_gateway,
            gateway_bill_id: order.gateway_bill_id,
            loyverse_status: order.loyverse_status,
            loyverse_error: order.loyverse_error,
            loyverse_failed_items: order.loyverse_failed_items.map(|f| f.0).unwrap_or_default(),
            loyverse_receipt_number: order.loyverse_receipt_number,
            receipt_attempt_id: order.receipt_attempt_id,
            tracking_no: order.tracking_no,
            collection_reference: order.collection_reference,
            promo_code: order.promo_code,
            subtotal: order.subtotal,
            shipping_cost: order.shipping_cost,
            discount_amount: order.discount_amount,
            total_amount: order.total_amount,
            stock_reserved: order.stock_reserved,
            approved_by: order.approved_by,
            rejected_by: order.rejected_by,
            rejection_reason: order.rejection_reason,
            created_at: order.created_at,
            updated_at: order.updated_at,
            paid_at: order.paid_at,
            processed_at: order.processed_at,
            cancelled_at: order.cancelled_at,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListOrdersQuery {
    /// e.g. `PENDING_PAYMENT`
    pub status: Option<OrderStatus>,
    pub limit: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct RejectOrderRequest {
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}/status",
    params(("id" = String, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order status", body = ApiResponse<PublicOrderStatus>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<PublicOrderStatus> {
    let order_id = parse_order_id(&id)?;
    let order = state.services.order_status.get(order_id).await?;
    Ok(Json(ApiResponse::success(order.into())))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/orders",
    params(ListOrdersQuery),
    responses((status = 200, description = "Orders, newest first", body = ApiResponse<Vec<AdminOrderView>>)),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<ApiResponse<Vec<AdminOrderView>>>, AdminError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let orders = state.services.order_status.list(query.status, limit).await?;
    Ok(Json(ApiResponse::success(
        orders.into_iter().map(AdminOrderView::from).collect(),
    )))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses((status = 200, description = "Order", body = ApiResponse<AdminOrderView>)),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn get_order(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<AdminOrderView>>, AdminError> {
    let order = state.services.order_status.get(id).await?;
    Ok(Json(ApiResponse::success(order.into())))
}

/// Confirms a manual bank transfer and runs fulfillment.
#[utoipa::path(
    post,
    path = "/api/v1/admin/orders/{id}/approve",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order paid", body = ApiResponse<ApprovalResult>),
        (status = 400, description = "Order is not awaiting manual payment", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn approve_order(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<ApprovalResult>>, AdminError> {
    let result = state
        .services
        .payments
        .approve_manual(id, &admin.actor)
        .await?;
    Ok(Json(ApiResponse::success(result)))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/orders/{id}/reject",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = RejectOrderRequest,
    responses(
        (status = 200, description = "Order cancelled", body = ApiResponse<AdminOrderView>),
        (status = 409, description = "Order changed concurrently", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn reject_order(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<Uuid>,
    body: Option<Json<RejectOrderRequest>>,
) -> Result<Json<ApiResponse<AdminOrderView>>, AdminError> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    request.validate().map_err(ServiceError::from)?;
    let reason = request
        .reason
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty());
    let order = state
        .services
        .order_status
        .reject_manual(id, &admin.actor, reason)
        .await?;
    Ok(Json(ApiResponse::success(order.into())))
}

/// Retries the POS sync of a paid order that has not been synced.
#[utoipa::path(
    post,
    path = "/api/v1/admin/orders/{id}/reprocess",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Fulfillment report", body = ApiResponse<FulfillmentReport>),
        (status = 409, description = "Already synced or a sync is running", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn reprocess_order(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<FulfillmentReport>>, AdminError> {
    tracing::info!(order_id = %id, actor = %admin.actor, "reprocess requested");
    let report = state.services.fulfillment.reprocess(id).await?;
    Ok(Json(ApiResponse::success(report)))
}
