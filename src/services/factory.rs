use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::gateways::GatewayRegistry;
use crate::pos::PosClient;
use crate::services::{
    catalog::CatalogService, checkout::CheckoutService, cleanup::CleanupService,
    fulfillment::FulfillmentService, inventory_sync::InventorySyncService,
    order_status::OrderStatusService, payments::PaymentConfirmationService,
    promotions::PromotionService, settings::SettingsService, shipping::ShipmentBooker,
    stock_check::StockCheckService,
};

/// Builds services over one set of injected collaborators.
pub struct ServiceFactory {
    db_pool: Arc<DbPool>,
    pos: Arc<dyn PosClient>,
    gateways: GatewayRegistry,
    shipment: Arc<dyn ShipmentBooker>,
    public_base_url: String,
}

impl ServiceFactory {
    pub fn new(
        db_pool: Arc<DbPool>,
        pos: Arc<dyn PosClient>,
        gateways: GatewayRegistry,
        shipment: Arc<dyn ShipmentBooker>,
        config: &AppConfig,
    ) -> Self {
        Self {
            db_pool,
            pos,
            gateways,
            shipment,
            public_base_url: config.public_base_url.clone(),
        }
    }

    pub fn inventory_sync_service(&self) -> InventorySyncService {
        InventorySyncService::new(self.db_pool.clone(), self.pos.clone())
    }

    pub fn stock_check_service(&self) -> StockCheckService {
        StockCheckService::new(self.pos.clone())
    }

    pub fn fulfillment_service(&self) -> FulfillmentService {
        FulfillmentService::new(self.db_pool.clone(), self.pos.clone(), self.shipment.clone())
    }

    pub fn checkout_service(&self) -> CheckoutService {
        CheckoutService::new(
            self.db_pool.clone(),
            self.gateways.clone(),
            self.stock_check_service(),
            self.public_base_url.clone(),
        )
    }

    pub fn payment_confirmation_service(&self) -> PaymentConfirmationService {
        PaymentConfirmationService::new(
            self.db_pool.clone(),
            self.gateways.clone(),
            self.fulfillment_service(),
        )
    }

    pub fn cleanup_service(&self) -> CleanupService {
        CleanupService::new(self.db_pool.clone(), self.inventory_sync_service())
    }

    pub fn db_pool(&self) -> &Arc<DbPool> {
        &self.db_pool
    }
}

/// Every service the HTTP layer and the scheduler use.
#[derive(Clone)]
pub struct ServiceContainer {
    pub catalog: Arc<CatalogService>,
    pub checkout: Arc<CheckoutService>,
    pub cleanup: Arc<CleanupService>,
    pub fulfillment: Arc<FulfillmentService>,
    pub inventory_sync: Arc<InventorySyncService>,
    pub order_status: Arc<OrderStatusService>,
    pub payments: Arc<PaymentConfirmationService>,
    pub promotions: Arc<PromotionService>,
    pub settings: Arc<SettingsService>,
    pub stock_check: Arc<StockCheckService>,
}

impl ServiceContainer {
    pub fn new(factory: &ServiceFactory) -> Self {
        let db = factory.db_pool().clone();
        Self {
            catalog: Arc::new(CatalogService::new(db.clone())),
            checkout: Arc::new(factory.checkout_service()),
            cleanup: Arc::new(factory.cleanup_service()),
            fulfillment: Arc::new(factory.fulfillment_service()),
            inventory_sync: Arc::new(factory.inventory_sync_service()),
            order_status: Arc::new(OrderStatusService::new(db.clone())),
            payments: Arc::new(factory.payment_confirmation_service()),
            promotions: Arc::new(PromotionService::new(db.clone())),
            settings: Arc::new(SettingsService::new(db)),
            stock_check: Arc::new(factory.stock_check_service()),
        }
    }
}
