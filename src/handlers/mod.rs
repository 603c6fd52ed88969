pub mod admin;
pub mod catalog;
pub mod checkout;
pub mod health;
pub mod orders;
pub mod payment_webhooks;
pub mod stock;

pub use crate::AppState;
