mod common;

use axum::http::{Method, StatusCode};
use chrono::Duration;
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

use common::{json_body, FakeGateway, TestApp, JWT_SECRET};
use storefront_api::auth::issue_token;
use sea_orm::{ActiveModelTrait, Set};
use storefront_api::entities::{order, LoyverseStatus, OrderStatus};

async fn pay(app: &TestApp, order_id: Uuid) {
    let ack = app
        .callback(
            "toyyibpay",
            "application/x-www-form-urlencoded",
            &format!(
                "status=paid&order_id={order_id}&bill_id={}",
                FakeGateway::bill_for(order_id)
            ),
        )
        .await;
    assert_eq!(ack.status(), StatusCode::OK);
}

#[tokio::test]
async fn admin_routes_require_an_admin_token() {
    let app = TestApp::new().await;

    let anonymous = app
        .request(Method::GET, "/api/v1/admin/orders", None, None)
        .await;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let garbage = app
        .request(Method::GET, "/api/v1/admin/orders", None, Some("not-a-jwt"))
        .await;
    assert_eq!(garbage.status(), StatusCode::UNAUTHORIZED);

    let viewer = issue_token(JWT_SECRET, "viewer@shop.test", &["viewer"], Duration::hours(1)).unwrap();
    let forbidden = app
        .request(Method::GET, "/api/v1/admin/orders", None, Some(&viewer))
        .await;
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    let ok = app
        .request_admin(Method::GET, "/api/v1/admin/orders", None)
        .await;
    assert_eq!(ok.status(), StatusCode::OK);
}

#[tokio::test]
async fn manual_approval_pays_and_fulfills_once() {
    let app = TestApp::new().await;
    app.pos.add_variant("v-kay", "KAY-1", 5);
    app.seed_product("KAY-1", dec!(99), Some(5), Some("v-kay"))
        .await;
    let order_id = app.place_order("KAY-1", 1, "manual").await;

    let uri = format!("/api/v1/admin/orders/{order_id}/approve");
    let first = app.request_admin(Method::POST, &uri, None).await;
    assert_eq!(first.status(), StatusCode::OK);
    let body = json_body(first).await;
    assert_eq!(body["data"]["already_paid"], false);
    assert_eq!(body["data"]["fulfillment"]["outcome"], "synced");

    let second = app.request_admin(Method::POST, &uri, None).await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(json_body(second).await["data"]["already_paid"], true);

    assert_eq!(app.pos.receipts().len(), 1);
    let order = app.order(order_id).await;
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.approved_by.as_deref(), Some("ops@shop.test"));
    assert_eq!(app.product("KAY-1").await.stock_quantity, Some(4));
}

#[tokio::test]
async fn hosted_orders_cannot_be_approved_manually() {
    let app = TestApp::new().await;
    app.pos.add_variant("v-kay", "KAY-1", 5);
    app.seed_product("KAY-1", dec!(99), Some(5), Some("v-kay"))
        .await;
    let order_id = app.place_order("KAY-1", 1, "toyyibpay").await;

    let response = app
        .request_admin(
            Method::POST,
            &format!("/api/v1/admin/orders/{order_id}/approve"),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.order(order_id).await.status, OrderStatus::Pending);
}

#[tokio::test]
async fn rejection_cancels_and_returns_stock() {
    let app = TestApp::new().await;
    app.pos.add_variant("v-kay", "KAY-1", 5);
    app.seed_product("KAY-1", dec!(99), Some(5), Some("v-kay"))
        .await;
    let order_id = app.place_order("KAY-1", 3, "manual").await;
    assert_eq!(app.product("KAY-1").await.reserved_quantity, 3);

    let response = app
        .request_admin(
            Method::POST,
            &format!("/api/v1/admin/orders/{order_id}/reject"),
            Some(json!({ "reason": "  transfer never arrived " })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["status"], "CANCELLED");
    assert_eq!(body["data"]["rejection_reason"], "transfer never arrived");

    let product = app.product("KAY-1").await;
    assert_eq!(product.reserved_quantity, 0);
    assert_eq!(product.stock_quantity, Some(5));

    // Rejecting twice is a no-op.
    let again = app
        .request_admin(
            Method::POST,
            &format!("/api/v1/admin/orders/{order_id}/reject"),
            None,
        )
        .await;
    assert_eq!(again.status(), StatusCode::OK);
    assert_eq!(app.product("KAY-1").await.reserved_quantity, 0);
}

#[tokio::test]
async fn paid_orders_cannot_be_rejected() {
    let app = TestApp::new().await;
    app.pos.add_variant("v-kay", "KAY-1", 5);
    app.seed_product("KAY-1", dec!(99), Some(5), Some("v-kay"))
        .await;
    let order_id = app.place_order("KAY-1", 1, "toyyibpay").await;
    pay(&app, order_id).await;

    let response = app
        .request_admin(
            Method::POST,
            &format!("/api/v1/admin/orders/{order_id}/reject"),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.order(order_id).await.status, OrderStatus::Paid);
}

#[tokio::test]
async fn reprocessing_a_synced_order_is_refused() {
    let app = TestApp::new().await;
    app.pos.add_variant("v-kay", "KAY-1", 5);
    app.seed_product("KAY-1", dec!(99), Some(5), Some("v-kay"))
        .await;
    let order_id = app.place_order("KAY-1", 1, "toyyibpay").await;
    pay(&app, order_id).await;
    assert_eq!(app.pos.receipts().len(), 1);

    let response = app
        .request_admin(
            Method::POST,
            &format!("/api/v1/admin/orders/{order_id}/reprocess"),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(app.pos.receipts().len(), 1);
}

#[tokio::test]
async fn partial_sync_reprocess_submits_only_missing_lines() {
    let app = TestApp::new().await;
    app.pos.add_variant("v-kay", "KAY-1", 5);
    app.pos.add_variant("v-pad", "PAD-1", 5);
    app.seed_product("KAY-1", dec!(100), Some(5), Some("v-kay"))
        .await;
    app.seed_product("PAD-1", dec!(30), Some(5), Some("v-pad"))
        .await;

    let mut body = common::checkout_body("KAY-1", 1, "toyyibpay", "self_collection");
    body["items"] = json!([
        { "sku": "KAY-1", "quantity": 1 },
        { "sku": "PAD-1", "quantity": 2 }
    ]);
    let response = app
        .request(Method::POST, "/api/v1/checkout", Some(body), None)
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let order_id =
        Uuid::parse_str(json_body(response).await["data"]["order_id"].as_str().unwrap()).unwrap();

    app.pos.remove_variant("v-pad");
    pay(&app, order_id).await;

    let order = app.order(order_id).await;
    assert_eq!(order.loyverse_status, LoyverseStatus::PartialSync);
    let failed = order.loyverse_failed_items.clone().unwrap().0;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].sku, "PAD-1");
    assert_eq!(failed[0].reason, "SKU not found in POS");
    let first_attempt = order.receipt_attempt_id.expect("attempt id recorded");

    app.pos.add_variant("v-pad", "PAD-1", 5);
    let response = app
        .request_admin(
            Method::POST,
            &format!("/api/v1/admin/orders/{order_id}/reprocess"),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["data"]["outcome"], "synced");

    let receipts = app.pos.receipts();
    assert_eq!(receipts.len(), 2);
    assert_eq!(receipts[1].lines.len(), 1);
    assert_eq!(receipts[1].lines[0].variant_id, "v-pad");
    assert_eq!(receipts[1].lines[0].quantity, 2);
    assert!(receipts[1].note.contains(&first_attempt.to_string()));

    let order = app.order(order_id).await;
    assert_eq!(order.loyverse_status, LoyverseStatus::Synced);
    assert_eq!(order.loyverse_receipt_number.as_deref(), Some("R-1, R-2"));
    assert!(order.loyverse_failed_items.is_none());
}

#[tokio::test]
async fn failed_retry_after_partial_sync_never_resubmits_landed_lines() {
    let app = TestApp::new().await;
    app.pos.add_variant("v-kay", "KAY-1", 5);
    app.pos.add_variant("v-pad", "PAD-1", 5);
    app.seed_product("KAY-1", dec!(100), Some(5), Some("v-kay"))
        .await;
    app.seed_product("PAD-1", dec!(30), Some(5), Some("v-pad"))
        .await;

    let mut body = common::checkout_body("KAY-1", 1, "toyyibpay", "self_collection");
    body["items"] = json!([
        { "sku": "KAY-1", "quantity": 1 },
        { "sku": "PAD-1", "quantity": 2 }
    ]);
    let response = app
        .request(Method::POST, "/api/v1/checkout", Some(body), None)
        .await;
    let order_id =
        Uuid::parse_str(json_body(response).await["data"]["order_id"].as_str().unwrap()).unwrap();

    app.pos.remove_variant("v-pad");
    pay(&app, order_id).await;
    assert_eq!(
        app.order(order_id).await.loyverse_status,
        LoyverseStatus::PartialSync
    );

    app.pos.add_variant("v-pad", "PAD-1", 5);
    app.pos.set_reject_receipts(true);
    let reprocess = format!("/api/v1/admin/orders/{order_id}/reprocess");
    let response = app.request_admin(Method::POST, &reprocess, None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let order = app.order(order_id).await;
    assert_eq!(order.loyverse_status, LoyverseStatus::Failed);
    assert_eq!(order.loyverse_receipt_number.as_deref(), Some("R-1"));
    let pending: Vec<String> = order
        .loyverse_failed_items
        .expect("attempted lines kept as failed")
        .0
        .into_iter()
        .map(|f| f.sku)
        .collect();
    assert_eq!(pending, vec!["PAD-1".to_string()]);

    app.pos.set_reject_receipts(false);
    let response = app.request_admin(Method::POST, &reprocess, None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let receipts = app.pos.receipts();
    assert_eq!(receipts.len(), 2);
    let kayak_lines = receipts
        .iter()
        .flat_map(|r| r.lines.iter())
        .filter(|l| l.variant_id == "v-kay")
        .count();
    assert_eq!(kayak_lines, 1);
    assert_eq!(receipts[1].lines.len(), 1);
    assert_eq!(receipts[1].lines[0].variant_id, "v-pad");

    let order = app.order(order_id).await;
    assert_eq!(order.loyverse_status, LoyverseStatus::Synced);
    assert_eq!(order.loyverse_receipt_number.as_deref(), Some("R-1, R-2"));
}

#[tokio::test]
async fn expired_processing_claim_can_be_reprocessed() {
    let app = TestApp::new().await;
    app.pos.add_variant("v-kay", "KAY-1", 5);
    app.seed_product("KAY-1", dec!(99), Some(5), Some("v-kay"))
        .await;
    let order_id = app.place_order("KAY-1", 1, "toyyibpay").await;
    app.pos.set_reject_receipts(true);
    pay(&app, order_id).await;
    app.pos.set_reject_receipts(false);

    let stuck = |updated_at| order::ActiveModel {
        id: Set(order_id),
        loyverse_status: Set(LoyverseStatus::Processing),
        updated_at: Set(updated_at),
        ..Default::default()
    };
    stuck(chrono::Utc::now())
        .update(&*app.state.db)
        .await
        .unwrap();

    let reprocess = format!("/api/v1/admin/orders/{order_id}/reprocess");
    let live = app.request_admin(Method::POST, &reprocess, None).await;
    assert_eq!(live.status(), StatusCode::CONFLICT);
    assert!(app.pos.receipts().is_empty());

    stuck(chrono::Utc::now() - Duration::minutes(30))
        .update(&*app.state.db)
        .await
        .unwrap();
    let expired = app.request_admin(Method::POST, &reprocess, None).await;
    assert_eq!(expired.status(), StatusCode::OK);

    assert_eq!(app.pos.receipts().len(), 1);
    let order = app.order(order_id).await;
    assert_eq!(order.loyverse_status, LoyverseStatus::Synced);
    assert!(!order.stock_reserved);
}

#[tokio::test]
async fn failed_sync_can_be_reprocessed_after_pos_recovers() {
    let app = TestApp::new().await;
    app.pos.add_variant("v-kay", "KAY-1", 5);
    app.seed_product("KAY-1", dec!(99), Some(5), Some("v-kay"))
        .await;
    let order_id = app.place_order("KAY-1", 2, "toyyibpay").await;
    app.pos.set_reject_receipts(true);
    pay(&app, order_id).await;
    assert_eq!(app.order(order_id).await.loyverse_status, LoyverseStatus::Failed);

    app.pos.set_reject_receipts(false);
    let response = app
        .request_admin(
            Method::POST,
            &format!("/api/v1/admin/orders/{order_id}/reprocess"),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let order = app.order(order_id).await;
    assert_eq!(order.loyverse_status, LoyverseStatus::Synced);
    assert!(!order.stock_reserved);
    let product = app.product("KAY-1").await;
    assert_eq!(product.stock_quantity, Some(3));
    assert_eq!(product.reserved_quantity, 0);
}

#[tokio::test]
async fn public_status_hides_internal_fields() {
    let app = TestApp::new().await;
    app.pos.add_variant("v-kay", "KAY-1", 5);
    app.seed_product("KAY-1", dec!(99), Some(5), Some("v-kay"))
        .await;
    let order_id = app.place_order("KAY-1", 1, "toyyibpay").await;
    pay(&app, order_id).await;

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{order_id}/status"),
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let data = &body["data"];
    assert_eq!(data["status"], "PAID");
    assert_eq!(data["items"][0]["sku"], "KAY-1");
    assert!(data["collection_reference"].as_str().unwrap().starts_with("PICKUP-"));
    for hidden in ["customer", "loyverse_status", "receipt_attempt_id", "gateway_bill_id"] {
        assert!(data.get(hidden).is_none(), "{hidden} must not be public");
    }
    assert!(data["items"][0].get("loyverse_variant_id").is_none());

    let unknown = app
        .request(Method::GET, "/api/v1/orders/not-an-order/status", None, None)
        .await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_listing_filters_by_status() {
    let app = TestApp::new().await;
    app.pos.add_variant("v-kay", "KAY-1", 10);
    app.seed_product("KAY-1", dec!(99), Some(10), Some("v-kay"))
        .await;
    let manual = app.place_order("KAY-1", 1, "manual").await;
    let hosted = app.place_order("KAY-1", 1, "toyyibpay").await;

    let response = app
        .request_admin(
            Method::GET,
            "/api/v1/admin/orders?status=PENDING_PAYMENT",
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec![manual.to_string().as_str()]);

    let detail = app
        .request_admin(Method::GET, &format!("/api/v1/admin/orders/{hosted}"), None)
        .await;
    assert_eq!(detail.status(), StatusCode::OK);
    let detail = json_body(detail).await;
    assert_eq!(detail["data"]["customer"]["email"], "aina@example.com");
    assert_eq!(detail["data"]["stock_reserved"], true);
}
