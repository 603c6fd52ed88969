use axum::{extract::State, http::StatusCode, Json};
use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::AdminUser;
use crate::entities::category::{self, Subcategory};
use crate::errors::AdminError;
use crate::services::catalog::CreateCategory;
use crate::{ApiResponse, ApiResult, AppState};

#[derive(Debug, Serialize, ToSchema)]
pub struct CategoryResponse {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub order: i32,
    pub subcategories: Vec<Subcategory>,
    pub handling_fee: Option<Decimal>,
    pub shipping_markup_percent: Option<Decimal>,
}

impl From<category::Model> for CategoryResponse {
    fn from(model: category::Model) -> Self {
        Self {
            id: model.id,
            slug: model.slug,
            name: model.name,
            order: model.sort_order,
            subcategories: model.subcategories.map(|s| s.0).unwrap_or_default(),
            handling_fee: model.handling_fee,
            shipping_markup_percent: model.shipping_markup_percent,
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/categories",
    responses((status = 200, description = "Categories in display order", body = ApiResponse<Vec<CategoryResponse>>)),
    tag = "Catalog"
)]
pub async fn list_categories(State(state): State<AppState>) -> ApiResult<Vec<CategoryResponse>> {
    let categories = state.services.catalog.list_categories().await?;
    Ok(Json(ApiResponse::success(
        categories.into_iter().map(CategoryResponse::from).collect(),
    )))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/categories",
    request_body = CreateCategory,
    responses(
        (status = 201, description = "Category created", body = ApiResponse<CategoryResponse>),
        (status = 409, description = "Slug already in use", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn create_category(
    State(state): State<AppState>,
    admin: AdminUser,
    Json(input): Json<CreateCategory>,
) -> Result<(StatusCode, Json<ApiResponse<CategoryResponse>>), AdminError> {
    tracing::info!(actor = %admin.actor, name = %input.name, "creating category");
    let created = state.services.catalog.create_category(input).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(created.into())),
    ))
}
