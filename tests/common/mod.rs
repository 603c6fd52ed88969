#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use storefront_api::{
    auth::{issue_token, ADMIN_ROLE},
    config::AppConfig,
    db::{self, DbConfig},
    entities::{order, product, product_variant, GatewayKind, StockStatus},
    errors::ServiceError,
    gateways::{
        CallbackPayload, CallbackStatus, GatewayRegistry, ManualTransferGateway,
        NormalizedCallback, PaymentGateway, PaymentRedirect, PaymentRequest,
    },
    pos::{InventoryLevel, PosClient, PosError, PosItem, PosVariant, Receipt, ReceiptRequest},
    services::{
        factory::{ServiceContainer, ServiceFactory},
        settings::PaymentSettings,
        shipping::{ShipmentBooker, ShipmentBooking, ShipmentRequest},
    },
    AppState,
};

pub const JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";
pub const BASE_URL: &str = "https://shop.test";

/// In-memory POS. Counts receipts and can be switched offline.
#[derive(Default)]
pub struct FakePos {
    items: Mutex<Vec<PosItem>>,
    inventory: Mutex<Vec<InventoryLevel>>,
    receipts: Mutex<Vec<ReceiptRequest>>,
    offline: AtomicBool,
    reject_receipts: AtomicBool,
}

impl FakePos {
    pub fn add_variant(&self, variant_id: &str, sku: &str, on_hand: i64) {
        self.items.lock().unwrap().push(PosItem {
            id: format!("item-{variant_id}"),
            name: format!("POS {sku}"),
            variants: vec![PosVariant {
                variant_id: variant_id.to_string(),
                sku: Some(sku.to_string()),
                price: None,
                option_values: vec![],
            }],
        });
        self.inventory.lock().unwrap().push(InventoryLevel {
            variant_id: variant_id.to_string(),
            in_stock: on_hand,
        });
    }

    /// Deletes a variant from the POS catalog, as when an item is retired.
    pub fn remove_variant(&self, variant_id: &str) {
        self.items
            .lock()
            .unwrap()
            .retain(|item| item.variants.iter().all(|v| v.variant_id != variant_id));
        self.inventory
            .lock()
            .unwrap()
            .retain(|level| level.variant_id != variant_id);
    }

    pub fn set_on_hand(&self, variant_id: &str, on_hand: i64) {
        for level in self.inventory.lock().unwrap().iter_mut() {
            if level.variant_id == variant_id {
                level.in_stock = on_hand;
            }
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_reject_receipts(&self, reject: bool) {
        self.reject_receipts.store(reject, Ordering::SeqCst);
    }

    pub fn receipts(&self) -> Vec<ReceiptRequest> {
        self.receipts.lock().unwrap().clone()
    }

    fn check_online(&self) -> Result<(), PosError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(PosError::Transport("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PosClient for FakePos {
    async fn get_items(&self) -> Result<Vec<PosItem>, PosError> {
        self.check_online()?;
        Ok(self.items.lock().unwrap().clone())
    }

    async fn get_inventory(&self) -> Result<Vec<InventoryLevel>, PosError> {
        self.check_online()?;
        Ok(self.inventory.lock().unwrap().clone())
    }

    async fn create_receipt(&self, receipt: &ReceiptRequest) -> Result<Receipt, PosError> {
        self.check_online()?;
        if self.reject_receipts.load(Ordering::SeqCst) {
            return Err(PosError::Http {
                status: 500,
                body: "receipt rejected".into(),
            });
        }
        let mut receipts = self.receipts.lock().unwrap();
        receipts.push(receipt.clone());
        Ok(Receipt {
            receipt_number: format!("R-{}", receipts.len()),
        })
    }
}

/// Hosted-page gateway registered as ToyyibPay. Callbacks carry `status`
/// (`paid`/`failed`), `order_id` and `bill_id`. Payments are confirmed
/// upstream unless `set_unpaid_upstream` says otherwise.
#[derive(Default)]
pub struct FakeGateway {
    fail_create: AtomicBool,
    unpaid_upstream: AtomicBool,
    created: AtomicUsize,
    confirmations: AtomicUsize,
}

impl FakeGateway {
    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_unpaid_upstream(&self, unpaid: bool) {
        self.unpaid_upstream.store(unpaid, Ordering::SeqCst);
    }

    pub fn confirmations(&self) -> usize {
        self.confirmations.load(Ordering::SeqCst)
    }

    pub fn bill_for(order_id: Uuid) -> String {
        format!("BILL-{}", &order_id.simple().to_string()[..8])
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Toyyibpay
    }

    async fn create_payment(
        &self,
        request: &PaymentRequest<'_>,
    ) -> Result<PaymentRedirect, ServiceError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ServiceError::ExternalServiceError("gateway down".into()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        let bill = Self::bill_for(request.order_id);
        Ok(PaymentRedirect {
            redirect_url: format!("https://pay.test/{bill}"),
            gateway_bill_id: Some(bill),
        })
    }

    fn normalize_callback(&self, payload: &CallbackPayload) -> NormalizedCallback {
        let status = match payload.get("status") {
            Some("paid") => CallbackStatus::Success,
            Some("failed") => CallbackStatus::Failed,
            _ => CallbackStatus::Pending,
        };
        NormalizedCallback {
            status,
            external_reference: payload.get("order_id").map(str::to_string),
            gateway_bill_id: payload.get("bill_id").map(str::to_string),
        }
    }

    async fn confirm_payment(
        &self,
        order: &order::Model,
        callback: &NormalizedCallback,
    ) -> Result<bool, ServiceError> {
        let issued = order.gateway_bill_id.as_deref();
        if issued.is_none()
            || callback
                .gateway_bill_id
                .as_deref()
                .is_some_and(|named| Some(named) != issued)
        {
            return Err(ServiceError::Unauthorized("bill mismatch".into()));
        }
        self.confirmations.fetch_add(1, Ordering::SeqCst);
        Ok(!self.unpaid_upstream.load(Ordering::SeqCst))
    }
}

#[derive(Default)]
pub struct FakeShipment {
    bookings: AtomicUsize,
    fail: AtomicBool,
}

impl FakeShipment {
    pub fn bookings(&self) -> usize {
        self.bookings.load(Ordering::SeqCst)
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ShipmentBooker for FakeShipment {
    async fn book(&self, request: &ShipmentRequest) -> Result<ShipmentBooking, ServiceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::ExternalServiceError("courier down".into()));
        }
        let n = self.bookings.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ShipmentBooking {
            tracking_no: format!("TRK-{n}-{}", &request.order_id.simple().to_string()[..4]),
        })
    }
}

/// Application over a fresh in-memory database with fake collaborators.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub factory: ServiceFactory,
    pub pos: Arc<FakePos>,
    pub gateway: Arc<FakeGateway>,
    pub shipment: Arc<FakeShipment>,
    token: String,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new("sqlite::memory:".to_string(), JWT_SECRET.to_string());
        cfg.public_base_url = BASE_URL.to_string();

        let pool = db::establish_connection(&DbConfig::in_memory())
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let pos = Arc::new(FakePos::default());
        let gateway = Arc::new(FakeGateway::default());
        let shipment = Arc::new(FakeShipment::default());
        let gateways = GatewayRegistry::new()
            .with(Arc::new(ManualTransferGateway::new(BASE_URL.to_string())))
            .with(gateway.clone());

        let factory = ServiceFactory::new(
            db_arc.clone(),
            pos.clone(),
            gateways,
            shipment.clone(),
            &cfg,
        );
        let services = ServiceContainer::new(&factory);
        let state = AppState {
            db: db_arc,
            config: Arc::new(cfg),
            services,
        };

        services_enable_hosted_gateway(&state).await;

        let token = issue_token(
            JWT_SECRET,
            "ops@shop.test",
            &[ADMIN_ROLE],
            ChronoDuration::hours(1),
        )
        .expect("encode access token");

        Self {
            router: storefront_api::build_router(state.clone()),
            state,
            factory,
            pos,
            gateway,
            shipment,
            token,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {tok}"));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).expect("serialize request body"))
            }
            None => Body::empty(),
        };
        self.router
            .clone()
            .oneshot(builder.body(body).expect("build request"))
            .await
            .expect("router error during test request")
    }

    pub async fn request_admin(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        self.request(method, uri, body, Some(self.token())).await
    }

    /// Posts a raw gateway callback body.
    pub async fn callback(&self, gateway: &str, content_type: &str, body: &str) -> Response {
        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("/api/v1/webhooks/payments/{gateway}"))
            .header("content-type", content_type)
            .body(Body::from(body.to_string()))
            .expect("build callback");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during callback")
    }

    pub async fn seed_product(
        &self,
        sku: &str,
        price: Decimal,
        stock_quantity: Option<i64>,
        loyverse_variant_id: Option<&str>,
    ) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            sku: Set(sku.to_string()),
            name: Set(format!("Product {sku}")),
            description: Set(String::new()),
            web_price: Set(price),
            promo_price: Set(None),
            category_slug: Set("kayaks".to_string()),
            subcategory_slugs: Set(None),
            stock_status: Set(stock_quantity
                .map(StockStatus::from_quantity)
                .unwrap_or(StockStatus::InStock)),
            stock_quantity: Set(stock_quantity),
            reserved_quantity: Set(0),
            weight: Set(None),
            length: Set(None),
            width: Set(None),
            height: Set(None),
            handling_fee: Set(None),
            shipping_markup_percent: Set(None),
            loyverse_item_id: Set(None),
            loyverse_variant_id: Set(loyverse_variant_id.map(str::to_string)),
            is_draft: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    pub async fn seed_variant(
        &self,
        product_id: Uuid,
        sku: &str,
        stock_quantity: Option<i64>,
        loyverse_variant_id: Option<&str>,
    ) -> product_variant::Model {
        let now = Utc::now();
        product_variant::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product_id),
            sku: Set(sku.to_string()),
            name: Set(format!("Variant {sku}")),
            web_price: Set(None),
            options: Set(None),
            stock_status: Set(StockStatus::InStock),
            stock_quantity: Set(stock_quantity),
            reserved_quantity: Set(0),
            loyverse_variant_id: Set(loyverse_variant_id.map(str::to_string)),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed variant")
    }

    pub async fn product(&self, sku: &str) -> product::Model {
        use sea_orm::{ColumnTrait, QueryFilter};
        product::Entity::find()
            .filter(product::Column::Sku.eq(sku))
            .one(&*self.state.db)
            .await
            .expect("query product")
            .expect("product exists")
    }

    pub async fn order(&self, id: Uuid) -> order::Model {
        order::Entity::find_by_id(id)
            .one(&*self.state.db)
            .await
            .expect("query order")
            .expect("order exists")
    }

    /// Moves an order's creation time into the past.
    pub async fn age_order(&self, id: Uuid, days: i64) {
        order::ActiveModel {
            id: Set(id),
            created_at: Set(Utc::now() - ChronoDuration::days(days)),
            ..Default::default()
        }
        .update(&*self.state.db)
        .await
        .expect("age order");
    }

    /// Places a one-line order through the checkout service.
    pub async fn place_order(&self, sku: &str, quantity: i64, gateway: &str) -> Uuid {
        let response = self
            .request(
                Method::POST,
                "/api/v1/checkout",
                Some(checkout_body(sku, quantity, gateway, "self_collection")),
                None,
            )
            .await;
        assert_eq!(response.status(), 201, "checkout failed");
        let body = json_body(response).await;
        body["data"]["order_id"]
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .expect("order id in checkout response")
    }
}

async fn services_enable_hosted_gateway(state: &AppState) {
    state
        .services
        .settings
        .update::<PaymentSettings>(json!({ "enabled_gateways": ["manual", "toyyibpay"] }))
        .await
        .expect("enable gateways");
}

pub fn checkout_body(sku: &str, quantity: i64, gateway: &str, delivery: &str) -> Value {
    json!({
        "items": [{ "sku": sku, "quantity": quantity }],
        "customer": {
            "name": "Aina Rahman",
            "email": "aina@example.com",
            "phone": "0123456789",
            "address": "12 Jalan Ampang, Kuala Lumpur"
        },
        "delivery_method": delivery,
        "payment_gateway": gateway
    })
}

pub async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}
