//! Storefront API library
//!
//! Checkout, payment confirmation, POS receipt sync and stock reconciliation
//! behind an axum router.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod gateways;
pub mod handlers;
pub mod openapi;
pub mod pos;
pub mod request_id;
pub mod services;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::HeaderValue,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::warn;
use utoipa::ToSchema;

use crate::config::AppConfig;
use crate::services::factory::ServiceContainer;

/// Upper bound for a whole request, including outbound POS and gateway calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub services: ServiceContainer,
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: request_id::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            meta: Some(ResponseMeta::capture()),
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

pub fn api_v1_routes() -> Router<AppState> {
    let public = Router::new()
        .route("/checkout", post(handlers::checkout::create_checkout))
        .route(
            "/promo-codes/validate",
            post(handlers::checkout::validate_promo_code),
        )
        .route("/categories", get(handlers::catalog::list_categories))
        .route("/stock", get(handlers::stock::get_stock))
        .route("/stock/check", post(handlers::stock::check_stock))
        .route(
            "/orders/:id/status",
            get(handlers::orders::get_order_status),
        );

    let webhooks = Router::new().route(
        "/webhooks/payments/:gateway",
        post(handlers::payment_webhooks::payment_callback),
    );

    // Every admin handler takes the `AdminUser` extractor.
    let admin = Router::new()
        .route("/orders", get(handlers::orders::list_orders))
        .route("/orders/:id", get(handlers::orders::get_order))
        .route("/orders/:id/approve", post(handlers::orders::approve_order))
        .route("/orders/:id/reject", post(handlers::orders::reject_order))
        .route(
            "/orders/:id/reprocess",
            post(handlers::orders::reprocess_order),
        )
        .route("/categories", post(handlers::catalog::create_category))
        .route(
            "/promo-codes",
            get(handlers::admin::list_promo_codes).post(handlers::admin::create_promo_code),
        )
        .route(
            "/settings/:kind",
            get(handlers::admin::get_settings).put(handlers::admin::update_settings),
        )
        .route("/cleanup", post(handlers::admin::run_cleanup))
        .route("/inventory/sync", post(handlers::admin::sync_inventory));

    Router::new()
        .merge(public)
        .merge(webhooks)
        .nest("/admin", admin)
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins()
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    if !origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    if !config.is_production() {
        return CorsLayer::permissive();
    }
    warn!("no CORS origins configured; cross-origin requests will be refused");
    CorsLayer::new()
}

/// Full application router with middleware, ready to serve.
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/health/live", get(handlers::health::liveness))
        .route("/api-docs/openapi.json", get(openapi::openapi_json))
        .nest("/api/v1", api_v1_routes())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(axum::middleware::from_fn(request_id::request_id_middleware))
        .with_state(state)
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use crate::request_id::{scope_request_id, RequestId};
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            scope_request_id(RequestId::new("meta-123"), async { ApiResponse::success("ok") })
                .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }

    #[tokio::test]
    async fn error_response_includes_request_metadata() {
        let response = scope_request_id(RequestId::new("meta-err"), async {
            ApiResponse::<()>::error("oops".into())
        })
        .await;

        assert!(!response.success);
        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-err"));
    }
}
