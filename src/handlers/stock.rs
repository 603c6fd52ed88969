use std::collections::BTreeMap;

use axum::{
    extract::{Query, State},
    http::{header::CACHE_CONTROL, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::errors::ServiceError;
use crate::services::stock_check::{StockCheckResult, StockLine};
use crate::{ApiResponse, ApiResult, AppState};

const MAX_SKUS_PER_QUERY: usize = 100;
const STOCK_CACHE_CONTROL: &str = "public, s-maxage=30, stale-while-revalidate=300";

#[derive(Debug, Deserialize, IntoParams)]
pub struct StockQuery {
    /// Comma-separated SKUs
    pub skus: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StockQueryResponse {
    /// Available quantity per requested SKU; unknown SKUs report 0.
    pub stocks: BTreeMap<String, i64>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct StockCheckItem {
    #[validate(length(min = 1, max = 100))]
    pub sku: String,
    #[validate(range(min = 1, max = 999))]
    pub quantity: i64,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct StockCheckRequest {
    #[validate]
    pub items: Vec<StockCheckItem>,
}

pub fn parse_sku_list(raw: &str) -> Vec<String> {
    let mut skus: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    skus.sort();
    skus.dedup();
    skus
}

#[utoipa::path(
    get,
    path = "/api/v1/stock",
    params(StockQuery),
    responses(
        (status = 200, description = "Available quantities", body = StockQueryResponse),
        (status = 400, description = "No SKUs or too many SKUs", body = crate::errors::ErrorResponse)
    ),
    tag = "Catalog"
)]
pub async fn get_stock(
    State(state): State<AppState>,
    Query(query): Query<StockQuery>,
) -> Result<Response, ServiceError> {
    let skus = parse_sku_list(query.skus.as_deref().unwrap_or_default());
    if skus.is_empty() {
        return Err(ServiceError::BadRequest("skus query parameter is required".into()));
    }
    if skus.len() > MAX_SKUS_PER_QUERY {
        return Err(ServiceError::BadRequest(format!(
            "at most {MAX_SKUS_PER_QUERY} skus per request"
        )));
    }

    let mut stocks: BTreeMap<String, i64> = skus.iter().map(|s| (s.clone(), 0)).collect();
    for entry in state.services.catalog.resolve_skus(&skus).await? {
        stocks.insert(entry.sku().to_string(), entry.available_quantity());
    }

    let mut response = Json(StockQueryResponse { stocks }).into_response();
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static(STOCK_CACHE_CONTROL));
    Ok(response)
}

/// Checks a whole cart against live POS stock and reports every shortage.
#[utoipa::path(
    post,
    path = "/api/v1/stock/check",
    request_body = StockCheckRequest,
    responses(
        (status = 200, description = "Availability per cart", body = ApiResponse<StockCheckResult>),
        (status = 502, description = "POS unreachable", body = crate::errors::ErrorResponse)
    ),
    tag = "Catalog"
)]
pub async fn check_stock(
    State(state): State<AppState>,
    Json(request): Json<StockCheckRequest>,
) -> ApiResult<StockCheckResult> {
    request.validate()?;
    if request.items.is_empty() || request.items.len() > MAX_SKUS_PER_QUERY {
        return Err(ServiceError::ValidationError(format!(
            "between 1 and {MAX_SKUS_PER_QUERY} items are required"
        )));
    }
    let skus: Vec<String> = request.items.iter().map(|i| i.sku.trim().to_string()).collect();
    let known: BTreeMap<String, Option<String>> = state
        .services
        .catalog
        .resolve_skus(&skus)
        .await?
        .into_iter()
        .map(|entry| (entry.sku().to_string(), entry.loyverse_variant_id()))
        .collect();

    let lines: Vec<StockLine> = request
        .items
        .into_iter()
        .map(|item| {
            let sku = item.sku.trim().to_string();
            StockLine {
                variant_id: known.get(&sku).cloned().flatten(),
                sku,
                quantity: item.quantity,
            }
        })
        .collect();
    let result = state.services.stock_check.check_many(&lines).await?;
    Ok(Json(ApiResponse::success(result)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sku_list_is_trimmed_and_deduplicated() {
        assert_eq!(
            parse_sku_list(" PAD-1,,PAD-2 ,PAD-1"),
            vec!["PAD-1".to_string(), "PAD-2".to_string()]
        );
        assert!(parse_sku_list(" , ").is_empty());
    }
}
