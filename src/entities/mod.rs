//! sea-orm entities for the storefront tables.

pub mod category;
pub mod order;
pub mod product;
pub mod product_variant;
pub mod promo_code;
pub mod setting;

pub use order::{DeliveryMethod, GatewayKind, LoyverseStatus, OrderStatus, ShippingStatus};
pub use product::StockStatus;
pub use promo_code::DiscountType;
