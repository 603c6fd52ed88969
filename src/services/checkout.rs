//! Checkout: cart to order to payment redirect.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, DatabaseConnection, TransactionTrait};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::entities::order::{self, CustomerInfo, OrderItem, OrderItems};
use crate::entities::{
    DeliveryMethod, GatewayKind, LoyverseStatus, OrderStatus, ShippingStatus,
};
use crate::errors::ServiceError;
use crate::gateways::{GatewayRegistry, PaymentRequest};
use crate::services::catalog::{CatalogEntry, CatalogService};
use crate::services::order_status::OrderStatusService;
use crate::services::pricing::{self, PricedLine, PricingService, Totals};
use crate::services::promotions::{PromoQuote, PromotionService};
use crate::services::reservations::reserve_order_in;
use crate::services::settings::{
    CollectionSettings, PaymentSettings, SettingsService, ShippingSettings,
};
use crate::services::stock_check::{StockCheckService, StockLine, StockShortage};

#[derive(Clone, Debug, Deserialize, Validate, ToSchema)]
pub struct CartLine {
    #[validate(length(min = 1, max = 64))]
    pub sku: String,
    #[validate(range(min = 1, max = 999))]
    pub quantity: i64,
    #[serde(default)]
    pub selected_options: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Deserialize, Validate, ToSchema)]
pub struct CustomerInput {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 6, max = 20))]
    pub phone: String,
    pub address: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Validate, ToSchema)]
pub struct CheckoutRequest {
    #[validate]
    pub items: Vec<CartLine>,
    #[validate]
    pub customer: CustomerInput,
    pub delivery_method: DeliveryMethod,
    pub payment_gateway: GatewayKind,
    pub promo_code: Option<String>,
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct CheckoutResponse {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub redirect_url: String,
    pub totals: Totals,
    pub promo: Option<PromoQuote>,
}

fn describe_shortages(shortages: &[StockShortage]) -> String {
    shortages
        .iter()
        .map(|s| format!("{} (requested {}, available {})", s.sku, s.requested, s.available))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Shortages judged against local catalog quantities, by the same rule the
/// stock endpoint and the reservation ledger use.
pub fn local_shortages(entries: &[(CatalogEntry, i64)]) -> Vec<StockShortage> {
    entries
        .iter()
        .filter_map(|(entry, requested)| {
            let available = entry.available_quantity();
            (*requested > available).then(|| StockShortage {
                sku: entry.sku().to_string(),
                requested: *requested,
                available,
            })
        })
        .collect()
}

#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    gateways: GatewayRegistry,
    catalog: CatalogService,
    pricing: PricingService,
    promotions: PromotionService,
    settings: SettingsService,
    stock_check: StockCheckService,
    order_status: OrderStatusService,
    public_base_url: String,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateways: GatewayRegistry,
        stock_check: StockCheckService,
        public_base_url: String,
    ) -> Self {
        Self {
            catalog: CatalogService::new(db.clone()),
            pricing: PricingService::new(db.clone()),
            promotions: PromotionService::new(db.clone()),
            settings: SettingsService::new(db.clone()),
            order_status: OrderStatusService::new(db.clone()),
            db,
            gateways,
            stock_check,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    #[instrument(skip(self, request), fields(lines = request.items.len(), gateway = %request.payment_gateway))]
    pub async fn checkout(&self, request: CheckoutRequest) -> Result<CheckoutResponse, ServiceError> {
        request.validate()?;
        if request.items.is_empty() {
            return Err(ServiceError::ValidationError("cart is empty".into()));
        }
        if request.delivery_method == DeliveryMethod::Delivery
            && request
                .customer
                .address
                .as_deref()
                .map_or(true, |a| a.trim().is_empty())
        {
            return Err(ServiceError::ValidationError(
                "a delivery address is required".into(),
            ));
        }

        let payment: PaymentSettings = self.settings.get().await?;
        if !payment.enabled_gateways.contains(&request.payment_gateway) {
            return Err(ServiceError::ValidationError(format!(
                "payment method {} is not available",
                request.payment_gateway
            )));
        }
        if request.delivery_method == DeliveryMethod::SelfCollection {
            let collection: CollectionSettings = self.settings.get().await?;
            if !collection.enabled {
                return Err(ServiceError::ValidationError(
                    "self collection is not available".into(),
                ));
            }
        }
        let gateway = self.gateways.get(request.payment_gateway)?;

        let entries = self.resolve_cart(&request.items).await?;
        self.ensure_stock(&entries).await?;

        let items: Vec<OrderItem> = request
            .items
            .iter()
            .zip(&entries)
            .map(|(line, (entry, _))| OrderItem {
                sku: entry.sku().to_string(),
                name: entry.display_name(),
                quantity: line.quantity,
                web_price: entry.unit_price(),
                selected_options: line.selected_options.clone(),
                loyverse_variant_id: entry.loyverse_variant_id(),
                category_slug: entry.product().category_slug.clone(),
            })
            .collect();
        let priced: Vec<PricedLine> = items
            .iter()
            .zip(&entries)
            .map(|(item, (entry, _))| PricedLine {
                sku: item.sku.clone(),
                category_slug: item.category_slug.clone(),
                quantity: item.quantity,
                unit_price: item.web_price,
                handling_fee: entry.product().handling_fee,
                shipping_markup_percent: entry.product().shipping_markup_percent,
            })
            .collect();

        let subtotal = pricing::subtotal(&priced);
        let promo = match request.promo_code.as_deref().map(str::trim) {
            Some(code) if !code.is_empty() => Some(self.promotions.validate(code, subtotal).await?),
            _ => None,
        };
        let fees = self.pricing.resolve_cart_fees(&priced).await?;
        let shipping: ShippingSettings = self.settings.get().await?;
        let shipping_cost =
            pricing::shipping_cost(&shipping, request.delivery_method, &priced, &fees);
        let totals = pricing::totals(
            subtotal,
            shipping_cost,
            promo.as_ref().map(|p| p.discount).unwrap_or_default(),
        );

        let order_id = Uuid::new_v4();
        let status = if request.payment_gateway == GatewayKind::Manual {
            OrderStatus::PendingPayment
        } else {
            OrderStatus::Pending
        };
        let customer = CustomerInfo {
            name: request.customer.name.trim().to_string(),
            email: request.customer.email.trim().to_string(),
            phone: request.customer.phone.trim().to_string(),
            address: request.customer.address.clone(),
        };

        let now = Utc::now();
        let txn = self.db.begin().await?;
        order::ActiveModel {
            id: Set(order_id),
            status: Set(status),
            items: Set(OrderItems(items.clone())),
            customer: Set(customer.clone()),
            delivery_method: Set(request.delivery_method),
            shipping_status: Set(ShippingStatus::NotShipped),
            payment_gateway: Set(request.payment_gateway),
            gateway_bill_id: Set(None),
            loyverse_status: Set(LoyverseStatus::Pending),
            loyverse_error: Set(None),
            loyverse_failed_items: Set(None),
            loyverse_receipt_number: Set(None),
            receipt_attempt_id: Set(None),
            tracking_no: Set(None),
            collection_reference: Set(None),
            promo_code: Set(promo.as_ref().map(|p| p.code.clone())),
            subtotal: Set(totals.subtotal),
            shipping_cost: Set(totals.shipping_cost),
            discount_amount: Set(totals.discount_amount),
            total_amount: Set(totals.total_amount),
            stock_reserved: Set(false),
            approved_by: Set(None),
            rejected_by: Set(None),
            rejection_reason: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            paid_at: Set(None),
            collected_at: Set(None),
            processed_at: Set(None),
            cancelled_at: Set(None),
        }
        .insert(&txn)
        .await?;
        // Dropping the transaction on a refused reservation also drops the order.
        reserve_order_in(&txn, order_id, &items).await?;
        txn.commit().await?;

        let payment_request = PaymentRequest {
            order_id,
            items: &items,
            customer: &customer,
            amount: totals.total_amount,
            return_url: format!("{}/checkout/complete?order={order_id}", self.public_base_url),
            callback_url: format!(
                "{}/api/v1/webhooks/payments/{}",
                self.public_base_url, request.payment_gateway
            ),
        };
        let redirect = match gateway.create_payment(&payment_request).await {
            Ok(redirect) => redirect,
            Err(e) => {
                warn!(%order_id, error = %e, "payment creation failed");
                self.order_status.mark_failed(order_id, &e.to_string()).await?;
                return Err(e);
            }
        };

        if let Some(bill_id) = redirect.gateway_bill_id.clone() {
            order::ActiveModel {
                id: Set(order_id),
                gateway_bill_id: Set(Some(bill_id)),
                updated_at: Set(Utc::now()),
                ..Default::default()
            }
            .update(&*self.db)
            .await?;
        }

        info!(%order_id, total = %totals.total_amount, "order placed");
        Ok(CheckoutResponse {
            order_id,
            status,
            redirect_url: redirect.redirect_url,
            totals,
            promo,
        })
    }

    /// Resolves each cart line, in cart order, to its catalog row and the
    /// total quantity requested for that SKU across the whole cart.
    async fn resolve_cart(
        &self,
        lines: &[CartLine],
    ) -> Result<Vec<(CatalogEntry, i64)>, ServiceError> {
        let skus: Vec<String> = lines.iter().map(|l| l.sku.trim().to_string()).collect();
        let found = self.catalog.resolve_skus(&skus).await?;

        let mut missing = Vec::new();
        let mut unavailable = Vec::new();
        let mut entries = Vec::with_capacity(lines.len());
        for sku in &skus {
            match found.iter().find(|e| e.sku() == sku) {
                Some(entry) if entry.is_purchasable() => {
                    let requested: i64 = lines
                        .iter()
                        .filter(|l| l.sku.trim() == sku)
                        .map(|l| l.quantity)
                        .sum();
                    entries.push((entry.clone(), requested));
                }
                Some(_) => unavailable.push(sku.clone()),
                None => missing.push(sku.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(ServiceError::NotFound(format!(
                "unknown SKU(s): {}",
                missing.join(", ")
            )));
        }
        if !unavailable.is_empty() {
            return Err(ServiceError::ValidationError(format!(
                "not available for online purchase: {}",
                unavailable.join(", ")
            )));
        }
        Ok(entries)
    }

    /// Live POS check, falling back to local quantities when the POS cannot
    /// be reached.
    async fn ensure_stock(&self, entries: &[(CatalogEntry, i64)]) -> Result<(), ServiceError> {
        let mut unique: Vec<(CatalogEntry, i64)> = Vec::with_capacity(entries.len());
        for (entry, quantity) in entries {
            if !unique.iter().any(|(e, _)| e.sku() == entry.sku()) {
                unique.push((entry.clone(), *quantity));
            }
        }
        let lines: Vec<StockLine> = unique
            .iter()
            .map(|(entry, quantity)| StockLine {
                sku: entry.sku().to_string(),
                variant_id: entry.loyverse_variant_id(),
                quantity: *quantity,
            })
            .collect();

        let shortages = match self.stock_check.check_many(&lines).await {
            Ok(result) => result.failures,
            Err(e) => {
                warn!(error = %e, "POS stock check unavailable, using local quantities");
                local_shortages(&unique)
            }
        };
        if shortages.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::InsufficientStock(describe_shortages(&shortages)))
        }
    }
}
