use axum::{extract::State, http::StatusCode, Json};
use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

use crate::errors::ServiceError;
use crate::services::checkout::{CheckoutRequest, CheckoutResponse};
use crate::services::promotions::PromoQuote;
use crate::{ApiResponse, ApiResult, AppState};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ValidatePromoRequest {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub subtotal: Decimal,
}

/// Places an order and returns where the customer should pay.
#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Order created", body = ApiResponse<CheckoutResponse>),
        (status = 400, description = "Invalid cart or customer details", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown SKU", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn create_checkout(
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CheckoutResponse>>), ServiceError> {
    let response = state.services.checkout.checkout(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(response))))
}

#[utoipa::path(
    post,
    path = "/api/v1/promo-codes/validate",
    request_body = ValidatePromoRequest,
    responses(
        (status = 200, description = "Code is valid for this subtotal", body = ApiResponse<PromoQuote>),
        (status = 400, description = "Code inactive, exhausted or below minimum spend", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown code", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn validate_promo_code(
    State(state): State<AppState>,
    Json(request): Json<ValidatePromoRequest>,
) -> ApiResult<PromoQuote> {
    request.validate()?;
    if request.subtotal < Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "subtotal cannot be negative".into(),
        ));
    }
    let quote = state
        .services
        .promotions
        .validate(&request.code, request.subtotal)
        .await?;
    Ok(Json(ApiResponse::success(quote)))
}
