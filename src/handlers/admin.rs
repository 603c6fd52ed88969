use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::AdminUser;
use crate::entities::promo_code;
use crate::entities::DiscountType;
use crate::errors::{AdminError, ServiceError};
use crate::services::cleanup::{CleanupAction, CleanupReport};
use crate::services::inventory_sync::SyncReport;
use crate::services::promotions::CreatePromoCode;
use crate::services::settings::SettingsKind;
use crate::{ApiResponse, AppState};

fn parse_settings_kind(raw: &str) -> Result<SettingsKind, ServiceError> {
    raw.parse()
        .map_err(|_| ServiceError::NotFound(format!("settings document {raw}")))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SettingsResponse {
    #[schema(value_type = String)]
    pub kind: SettingsKind,
    #[schema(value_type = Object)]
    pub value: Value,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PromoCodeResponse {
    pub id: Uuid,
    pub code: String,
    pub discount_type: DiscountType,
    pub value: Decimal,
    pub min_spend: Option<Decimal>,
    pub usage_limit: Option<i32>,
    pub usage_count: i32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<promo_code::Model> for PromoCodeResponse {
    fn from(model: promo_code::Model) -> Self {
        Self {
            id: model.id,
            code: model.code,
            discount_type: model.discount_type,
            value: model.value,
            min_spend: model.min_spend,
            usage_limit: model.usage_limit,
            usage_count: model.usage_count,
            active: model.active,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CleanupRequest {
    pub action: CleanupAction,
    /// Age threshold for `sweep_stale`; defaults to the configured value.
    pub days: Option<i64>,
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/settings/{kind}",
    params(("kind" = String, Path, description = "payment, shipping or collection")),
    responses((status = 200, description = "Stored settings merged over defaults", body = ApiResponse<SettingsResponse>)),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn get_settings(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(kind): Path<String>,
) -> Result<Json<ApiResponse<SettingsResponse>>, AdminError> {
    let kind = parse_settings_kind(&kind)?;
    let value = state.services.settings.get_json(kind).await?;
    Ok(Json(ApiResponse::success(SettingsResponse { kind, value })))
}

/// Merges the posted object into the stored document.
#[utoipa::path(
    put,
    path = "/api/v1/admin/settings/{kind}",
    params(("kind" = String, Path, description = "payment, shipping or collection")),
    request_body(content = Object, description = "Partial settings document"),
    responses(
        (status = 200, description = "Settings after the merge", body = ApiResponse<SettingsResponse>),
        (status = 400, description = "Merged document is invalid", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn update_settings(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(kind): Path<String>,
    Json(patch): Json<Value>,
) -> Result<Json<ApiResponse<SettingsResponse>>, AdminError> {
    let kind = parse_settings_kind(&kind)?;
    let value = state.services.settings.update_json(kind, patch).await?;
    info!(actor = %admin.actor, %kind, "settings changed");
    Ok(Json(ApiResponse::success(SettingsResponse { kind, value })))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/promo-codes",
    responses((status = 200, description = "All promo codes", body = ApiResponse<Vec<PromoCodeResponse>>)),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn list_promo_codes(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<ApiResponse<Vec<PromoCodeResponse>>>, AdminError> {
    let codes = state.services.promotions.list().await?;
    Ok(Json(ApiResponse::success(
        codes.into_iter().map(PromoCodeResponse::from).collect(),
    )))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/promo-codes",
    request_body = CreatePromoCode,
    responses(
        (status = 201, description = "Promo code created", body = ApiResponse<PromoCodeResponse>),
        (status = 409, description = "Code already exists", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn create_promo_code(
    State(state): State<AppState>,
    admin: AdminUser,
    Json(input): Json<CreatePromoCode>,
) -> Result<(StatusCode, Json<ApiResponse<PromoCodeResponse>>), AdminError> {
    let created = state.services.promotions.create(input).await?;
    info!(actor = %admin.actor, code = %created.code, "promo code created");
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created.into()))))
}

/// Destructive maintenance operations.
#[utoipa::path(
    post,
    path = "/api/v1/admin/cleanup",
    request_body = CleanupRequest,
    responses(
        (status = 200, description = "What was changed", body = ApiResponse<CleanupReport>),
        (status = 500, description = "Failure with backend detail", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn run_cleanup(
    State(state): State<AppState>,
    admin: AdminUser,
    Json(request): Json<CleanupRequest>,
) -> Result<Json<ApiResponse<CleanupReport>>, AdminError> {
    let days = request
        .days
        .unwrap_or_else(|| i64::from(state.config.stale_order_days));
    warn!(actor = %admin.actor, action = %request.action, days, "cleanup requested");
    let report = state.services.cleanup.run(request.action, days).await?;
    Ok(Json(ApiResponse::success(report)))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/inventory/sync",
    responses(
        (status = 200, description = "Sync summary", body = ApiResponse<SyncReport>),
        (status = 502, description = "POS unreachable or returned an unexpected payload", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn sync_inventory(
    State(state): State<AppState>,
    admin: AdminUser,
) -> Result<Json<ApiResponse<SyncReport>>, AdminError> {
    info!(actor = %admin.actor, "manual stock sync requested");
    let report = state.services.inventory_sync.sync_stock().await?;
    Ok(Json(ApiResponse::success(report)))
}
