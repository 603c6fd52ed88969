mod common;

use axum::http::{header, Method, StatusCode};
use rust_decimal_macros::dec;
use serde_json::json;

use common::{json_body, TestApp};

#[tokio::test]
async fn stock_query_reports_available_quantities_with_cache_headers() {
    let app = TestApp::new().await;
    app.pos.add_variant("v-kay", "KAY-1", 6);
    app.seed_product("KAY-1", dec!(50), Some(6), Some("v-kay"))
        .await;
    app.seed_product("ANY-1", dec!(5), None, None).await;
    app.place_order("KAY-1", 2, "manual").await;

    let response = app
        .request(
            Method::GET,
            "/api/v1/stock?skus=KAY-1,%20GHOST-9,KAY-1",
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CACHE_CONTROL],
        "public, s-maxage=30, stale-while-revalidate=300"
    );
    let body = json_body(response).await;
    assert_eq!(body["stocks"], json!({ "GHOST-9": 0, "KAY-1": 4 }));
}

#[tokio::test]
async fn stock_query_requires_skus() {
    let app = TestApp::new().await;
    let missing = app.request(Method::GET, "/api/v1/stock", None, None).await;
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

    let too_many: Vec<String> = (0..101).map(|i| format!("SKU-{i}")).collect();
    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/stock?skus={}", too_many.join(",")),
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cart_stock_check_lists_every_shortage() {
    let app = TestApp::new().await;
    app.pos.add_variant("v-kay", "KAY-1", 1);
    app.pos.add_variant("v-pad", "PAD-1", 10);
    app.seed_product("KAY-1", dec!(50), Some(1), Some("v-kay"))
        .await;
    app.seed_product("PAD-1", dec!(10), Some(10), Some("v-pad"))
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/stock/check",
            Some(json!({ "items": [
                { "sku": "KAY-1", "quantity": 3 },
                { "sku": "PAD-1", "quantity": 2 },
                { "sku": "GHOST", "quantity": 1 }
            ]})),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["available"], false);
    let failures = body["data"]["failures"].as_array().unwrap();
    let skus: Vec<&str> = failures.iter().map(|f| f["sku"].as_str().unwrap()).collect();
    assert_eq!(skus, vec!["KAY-1", "GHOST"]);
    assert_eq!(failures[0]["available"], 1);

    let empty = app
        .request(
            Method::POST,
            "/api/v1/stock/check",
            Some(json!({ "items": [] })),
            None,
        )
        .await;
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

    app.pos.set_offline(true);
    let offline = app
        .request(
            Method::POST,
            "/api/v1/stock/check",
            Some(json!({ "items": [{ "sku": "PAD-1", "quantity": 1 }] })),
            None,
        )
        .await;
    assert_eq!(offline.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn categories_keep_creation_order() {
    let app = TestApp::new().await;
    for name in ["Kayaks", "Paddles & Oars", "Accessories"] {
        let response = app
            .request_admin(
                Method::POST,
                "/api/v1/admin/categories",
                Some(json!({
                    "name": name,
                    "subcategories": [{ "name": format!("{name} Sale") }],
                    "handling_fee": 2.5
                })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let duplicate = app
        .request_admin(
            Method::POST,
            "/api/v1/admin/categories",
            Some(json!({ "name": "kayaks" })),
        )
        .await;
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let anonymous = app
        .request(
            Method::POST,
            "/api/v1/admin/categories",
            Some(json!({ "name": "Boats" })),
            None,
        )
        .await;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .request(Method::GET, "/api/v1/categories", None, None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let categories = body["data"].as_array().unwrap();
    let slugs: Vec<&str> = categories
        .iter()
        .map(|c| c["slug"].as_str().unwrap())
        .collect();
    assert_eq!(slugs, vec!["kayaks", "paddles--oars", "accessories"]);
    assert_eq!(categories[1]["order"], 1);
    assert_eq!(categories[1]["subcategories"][0]["slug"], "paddles--oars-sale");
}

#[tokio::test]
async fn settings_patch_merges_over_defaults() {
    let app = TestApp::new().await;

    let response = app
        .request_admin(
            Method::PUT,
            "/api/v1/admin/settings/shipping",
            Some(json!({ "free_shipping_enabled": true, "free_shipping_threshold": 150 })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request_admin(
            Method::PUT,
            "/api/v1/admin/settings/shipping",
            Some(json!({ "free_shipping_categories": ["kayaks"] })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request_admin(Method::GET, "/api/v1/admin/settings/shipping", None)
        .await;
    let body = json_body(response).await;
    let value = &body["data"]["value"];
    assert_eq!(value["free_shipping_enabled"], true);
    assert_eq!(value["free_shipping_categories"], json!(["kayaks"]));
    assert!(value.get("base_rate").is_some());

    let unknown = app
        .request_admin(Method::GET, "/api/v1/admin/settings/secrets", None)
        .await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    let invalid = app
        .request_admin(
            Method::PUT,
            "/api/v1/admin/settings/payment",
            Some(json!({ "enabled_gateways": ["paypal"] })),
        )
        .await;
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn free_shipping_applies_once_threshold_is_met() {
    let app = TestApp::new().await;
    app.pos.add_variant("v-kay", "KAY-1", 5);
    app.seed_product("KAY-1", dec!(200), Some(5), Some("v-kay"))
        .await;
    app.request_admin(
        Method::PUT,
        "/api/v1/admin/settings/shipping",
        Some(json!({ "free_shipping_enabled": true, "free_shipping_threshold": 150 })),
    )
    .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(common::checkout_body("KAY-1", 1, "manual", "delivery")),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    let order_id = uuid::Uuid::parse_str(body["data"]["order_id"].as_str().unwrap()).unwrap();
    let order = app.order(order_id).await;
    assert_eq!(order.shipping_cost, dec!(0));
    assert_eq!(order.total_amount, dec!(200));
}

#[tokio::test]
async fn promo_codes_are_listed_for_admins() {
    let app = TestApp::new().await;
    for code in ["zeta5", "alpha10"] {
        let response = app
            .request_admin(
                Method::POST,
                "/api/v1/admin/promo-codes",
                Some(json!({ "code": code, "discount_type": "fixed", "value": 5 })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }
    let duplicate = app
        .request_admin(
            Method::POST,
            "/api/v1/admin/promo-codes",
            Some(json!({ "code": "ALPHA10", "discount_type": "fixed", "value": 5 })),
        )
        .await;
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let response = app
        .request_admin(Method::GET, "/api/v1/admin/promo-codes", None)
        .await;
    let body = json_body(response).await;
    let codes: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["code"].as_str().unwrap())
        .collect();
    assert_eq!(codes, vec!["ALPHA10", "ZETA5"]);
}

#[tokio::test]
async fn health_and_openapi_are_served() {
    let app = TestApp::new().await;

    let health = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(health.status(), StatusCode::OK);
    assert!(health.headers().contains_key("x-request-id"));

    let live = app.request(Method::GET, "/health/live", None, None).await;
    assert_eq!(live.status(), StatusCode::OK);

    let docs = app
        .request(Method::GET, "/api-docs/openapi.json", None, None)
        .await;
    assert_eq!(docs.status(), StatusCode::OK);
    let body = json_body(docs).await;
    assert!(body["paths"].get("/api/v1/checkout").is_some());
}
