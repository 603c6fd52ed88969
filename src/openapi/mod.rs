use axum::Json;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        description = r#"
Checkout, payment confirmation, POS receipt sync and stock reconciliation for the storefront.

Admin endpoints require an HS256 bearer token carrying the `admin` role:

```
Authorization: Bearer <token>
```

Errors share one body shape:

```json
{
  "error": "Not Found",
  "message": "Not found: order not found",
  "request_id": "0f5c...",
  "timestamp": "2025-01-01T00:00:00Z"
}
```
"#
    ),
    servers((url = "http://localhost:8080", description = "Local development")),
    tags(
        (name = "Checkout", description = "Cart checkout and promo validation"),
        (name = "Catalog", description = "Categories and stock levels"),
        (name = "Orders", description = "Customer order status"),
        (name = "Payments", description = "Gateway callbacks"),
        (name = "Admin", description = "Back-office operations"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        crate::handlers::checkout::create_checkout,
        crate::handlers::checkout::validate_promo_code,
        crate::handlers::catalog::list_categories,
        crate::handlers::catalog::create_category,
        crate::handlers::stock::get_stock,
        crate::handlers::stock::check_stock,
        crate::handlers::orders::get_order_status,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::approve_order,
        crate::handlers::orders::reject_order,
        crate::handlers::orders::reprocess_order,
        crate::handlers::payment_webhooks::payment_callback,
        crate::handlers::admin::get_settings,
        crate::handlers::admin::update_settings,
        crate::handlers::admin::list_promo_codes,
        crate::handlers::admin::create_promo_code,
        crate::handlers::admin::run_cleanup,
        crate::handlers::admin::sync_inventory,
        crate::handlers::health::health_check,
    ),
    components(schemas(crate::errors::ErrorResponse)),
    modifiers(&BearerAuth)
)]
pub struct ApiDocV1;

/// `GET /api-docs/openapi.json`
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDocV1::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_public_and_admin_routes() {
        let json = serde_json::to_string(&ApiDocV1::openapi()).unwrap();
        assert!(json.contains("Storefront API"));
        assert!(json.contains("/api/v1/checkout"));
        assert!(json.contains("/api/v1/webhooks/payments/{gateway}"));
        assert!(json.contains("/api/v1/admin/cleanup"));
        assert!(json.contains("bearer_auth"));
    }
}
