// Order lifecycle
pub mod checkout;
pub mod fulfillment;
pub mod order_status;
pub mod payments;
pub mod reservations;

// Stock
pub mod inventory_sync;
pub mod stock_check;

// Pricing and catalog
pub mod catalog;
pub mod pricing;
pub mod promotions;
pub mod settings;

// Fulfillment collaborators
pub mod shipping;

// Maintenance
pub mod cleanup;
pub mod scheduler;

// Service factory for dependency injection
pub mod factory;
