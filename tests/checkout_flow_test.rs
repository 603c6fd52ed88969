mod common;

use axum::http::{Method, StatusCode};
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

use common::{checkout_body, json_body, TestApp, BASE_URL};
use storefront_api::entities::{GatewayKind, OrderStatus};

#[tokio::test]
async fn hosted_checkout_reserves_stock_and_returns_redirect() {
    let app = TestApp::new().await;
    app.pos.add_variant("v-kay", "KAY-1", 10);
    app.seed_product("KAY-1", dec!(120), Some(10), Some("v-kay"))
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(checkout_body("KAY-1", 3, "toyyibpay", "self_collection")),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "PENDING");
    assert!(body["data"]["redirect_url"]
        .as_str()
        .unwrap()
        .starts_with("https://pay.test/BILL-"));

    let order_id = Uuid::parse_str(body["data"]["order_id"].as_str().unwrap()).unwrap();
    let order = app.order(order_id).await;
    assert_eq!(order.payment_gateway, GatewayKind::Toyyibpay);
    assert!(order.stock_reserved);
    assert_eq!(order.subtotal, dec!(360));
    assert_eq!(order.shipping_cost, dec!(0));
    assert_eq!(order.total_amount, dec!(360));
    assert_eq!(order.gateway_bill_id.as_deref(), Some(common::FakeGateway::bill_for(order_id).as_str()));
    assert_eq!(order.items.0[0].loyverse_variant_id.as_deref(), Some("v-kay"));

    let product = app.product("KAY-1").await;
    assert_eq!(product.reserved_quantity, 3);
    assert_eq!(product.stock_quantity, Some(10));
}

#[tokio::test]
async fn manual_transfer_checkout_waits_for_payment() {
    let app = TestApp::new().await;
    app.pos.add_variant("v-pad", "PAD-1", 4);
    app.seed_product("PAD-1", dec!(45.50), Some(4), Some("v-pad"))
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(checkout_body("PAD-1", 2, "manual", "delivery")),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    assert_eq!(body["data"]["status"], "PENDING_PAYMENT");
    let redirect = body["data"]["redirect_url"].as_str().unwrap();
    assert!(redirect.starts_with(&format!("{BASE_URL}/checkout/manual-transfer?order=")));

    let order_id = Uuid::parse_str(body["data"]["order_id"].as_str().unwrap()).unwrap();
    let order = app.order(order_id).await;
    assert_eq!(order.status, OrderStatus::PendingPayment);
    // Flat courier rate for delivery, no free shipping by default.
    assert_eq!(order.shipping_cost, dec!(10));
    assert_eq!(order.total_amount, dec!(101));
}

#[tokio::test]
async fn promo_code_discount_is_applied_to_totals() {
    let app = TestApp::new().await;
    app.pos.add_variant("v-kay", "KAY-1", 10);
    app.seed_product("KAY-1", dec!(200), Some(10), Some("v-kay"))
        .await;
    let created = app
        .request_admin(
            Method::POST,
            "/api/v1/admin/promo-codes",
            Some(json!({ "code": "paddle10", "discount_type": "percentage", "value": 10 })),
        )
        .await;
    assert_eq!(created.status(), StatusCode::CREATED);

    let mut body = checkout_body("KAY-1", 1, "toyyibpay", "self_collection");
    body["promo_code"] = json!(" Paddle10 ");
    let response = app
        .request(Method::POST, "/api/v1/checkout", Some(body), None)
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    assert_eq!(body["data"]["promo"]["code"], "PADDLE10");

    let order_id = Uuid::parse_str(body["data"]["order_id"].as_str().unwrap()).unwrap();
    let order = app.order(order_id).await;
    assert_eq!(order.promo_code.as_deref(), Some("PADDLE10"));
    assert_eq!(order.discount_amount, dec!(20));
    assert_eq!(order.total_amount, dec!(180));
}

#[tokio::test]
async fn shortage_reported_by_pos_rejects_checkout() {
    let app = TestApp::new().await;
    app.pos.add_variant("v-kay", "KAY-1", 1);
    app.seed_product("KAY-1", dec!(120), Some(10), Some("v-kay"))
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(checkout_body("KAY-1", 2, "toyyibpay", "self_collection")),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = json_body(response).await;
    assert!(body["message"].as_str().unwrap().contains("KAY-1"));
    assert_eq!(app.product("KAY-1").await.reserved_quantity, 0);
}

#[tokio::test]
async fn unreachable_pos_falls_back_to_local_quantities() {
    let app = TestApp::new().await;
    app.seed_product("KAY-1", dec!(120), Some(2), Some("v-kay"))
        .await;
    app.pos.set_offline(true);

    let ok = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(checkout_body("KAY-1", 2, "toyyibpay", "self_collection")),
            None,
        )
        .await;
    assert_eq!(ok.status(), StatusCode::CREATED);

    // Both units are now held by the first order.
    let short = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(checkout_body("KAY-1", 1, "toyyibpay", "self_collection")),
            None,
        )
        .await;
    assert_eq!(short.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(app.product("KAY-1").await.reserved_quantity, 2);
}

#[tokio::test]
async fn untracked_stock_is_reported_and_sold_as_zero() {
    let app = TestApp::new().await;
    app.seed_product("ANY-1", dec!(5), None, None).await;
    app.pos.set_offline(true);

    let stock = app
        .request(Method::GET, "/api/v1/stock?skus=ANY-1", None, None)
        .await;
    assert_eq!(stock.status(), StatusCode::OK);
    assert_eq!(json_body(stock).await["stocks"], json!({ "ANY-1": 0 }));

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(checkout_body("ANY-1", 1, "manual", "self_collection")),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(app.product("ANY-1").await.reserved_quantity, 0);
}

#[tokio::test]
async fn unknown_sku_and_disabled_gateway_are_rejected() {
    let app = TestApp::new().await;
    app.pos.add_variant("v-kay", "KAY-1", 5);
    app.seed_product("KAY-1", dec!(120), Some(5), Some("v-kay"))
        .await;

    let unknown = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(checkout_body("NOPE", 1, "toyyibpay", "self_collection")),
            None,
        )
        .await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    let disabled = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(checkout_body("KAY-1", 1, "billplz", "self_collection")),
            None,
        )
        .await;
    assert_eq!(disabled.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn delivery_requires_an_address() {
    let app = TestApp::new().await;
    app.pos.add_variant("v-kay", "KAY-1", 5);
    app.seed_product("KAY-1", dec!(120), Some(5), Some("v-kay"))
        .await;

    let mut body = checkout_body("KAY-1", 1, "toyyibpay", "delivery");
    body["customer"]["address"] = json!("   ");
    let response = app
        .request(Method::POST, "/api/v1/checkout", Some(body), None)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn gateway_failure_marks_order_failed_and_returns_stock() {
    let app = TestApp::new().await;
    app.pos.add_variant("v-kay", "KAY-1", 5);
    app.seed_product("KAY-1", dec!(120), Some(5), Some("v-kay"))
        .await;
    app.gateway.set_fail_create(true);

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(checkout_body("KAY-1", 2, "toyyibpay", "self_collection")),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let orders = app
        .state
        .services
        .order_status
        .list(Some(OrderStatus::Failed), 10)
        .await
        .unwrap();
    assert_eq!(orders.len(), 1);
    assert!(!orders[0].stock_reserved);
    assert_eq!(app.product("KAY-1").await.reserved_quantity, 0);
}

#[tokio::test]
async fn promo_validation_endpoint_quotes_discount() {
    let app = TestApp::new().await;
    app.request_admin(
        Method::POST,
        "/api/v1/admin/promo-codes",
        Some(json!({ "code": "FLAT15", "discount_type": "fixed", "value": 15, "min_spend": 50 })),
    )
    .await;

    let ok = app
        .request(
            Method::POST,
            "/api/v1/promo-codes/validate",
            Some(json!({ "code": "flat15", "subtotal": 80.0 })),
            None,
        )
        .await;
    assert_eq!(ok.status(), StatusCode::OK);
    let body = json_body(ok).await;
    assert_eq!(body["data"]["code"], "FLAT15");

    let below_min = app
        .request(
            Method::POST,
            "/api/v1/promo-codes/validate",
            Some(json!({ "code": "FLAT15", "subtotal": 20.0 })),
            None,
        )
        .await;
    assert_eq!(below_min.status(), StatusCode::BAD_REQUEST);

    let missing = app
        .request(
            Method::POST,
            "/api/v1/promo-codes/validate",
            Some(json!({ "code": "NOSUCH", "subtotal": 80.0 })),
            None,
        )
        .await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}
