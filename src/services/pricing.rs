//! Fee and discount resolution.
//!
//! Per-line fees follow a fixed precedence: the product's own value when it
//! is set, then its category's, then zero. Categories are fetched once per
//! cart, not once per line.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::ToSchema;

use crate::entities::{category, DeliveryMethod, DiscountType};
use crate::errors::ServiceError;
use crate::services::settings::ShippingSettings;

/// Cart line as seen by the fee resolver.
#[derive(Clone, Debug, PartialEq)]
pub struct PricedLine {
    pub sku: String,
    pub category_slug: String,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub handling_fee: Option<Decimal>,
    pub shipping_markup_percent: Option<Decimal>,
}

impl PricedLine {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResolvedFees {
    pub handling_fee: Decimal,
    pub shipping_markup_percent: Decimal,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Totals {
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
}

/// Product value, else category value, else zero.
pub fn resolve_fee(product_value: Option<Decimal>, category_value: Option<Decimal>) -> Decimal {
    product_value.or(category_value).unwrap_or(Decimal::ZERO)
}

pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub fn subtotal(lines: &[PricedLine]) -> Decimal {
    round_money(lines.iter().map(PricedLine::line_total).sum())
}

/// Discount for a promo of the given type and value, never negative and
/// never more than the subtotal.
pub fn compute_discount(kind: DiscountType, value: Decimal, subtotal: Decimal) -> Decimal {
    if subtotal <= Decimal::ZERO || value <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let raw = match kind {
        DiscountType::Fixed => value,
        DiscountType::Percentage => subtotal * value / Decimal::ONE_HUNDRED,
    };
    round_money(raw.min(subtotal).max(Decimal::ZERO))
}

/// Free shipping needs the feature enabled, the threshold met and, when an
/// allow-list is configured, every line inside it. One line outside the
/// list disqualifies the whole cart.
pub fn qualifies_for_free_shipping(
    settings: &ShippingSettings,
    subtotal: Decimal,
    category_slugs: &[&str],
) -> bool {
    if !settings.free_shipping_enabled || subtotal < settings.free_shipping_threshold {
        return false;
    }
    if settings.free_shipping_categories.is_empty() {
        return true;
    }
    category_slugs.iter().all(|slug| {
        settings
            .free_shipping_categories
            .iter()
            .any(|allowed| allowed == slug)
    })
}

/// `base_rate × (1 + max_markup / 100) + Σ handling_fee × quantity` for
/// delivery; zero for self-collection and free-shipping carts.
pub fn shipping_cost(
    settings: &ShippingSettings,
    method: DeliveryMethod,
    lines: &[PricedLine],
    fees: &[ResolvedFees],
) -> Decimal {
    if method == DeliveryMethod::SelfCollection {
        return Decimal::ZERO;
    }
    let sub = subtotal(lines);
    let slugs: Vec<&str> = lines.iter().map(|l| l.category_slug.as_str()).collect();
    if qualifies_for_free_shipping(settings, sub, &slugs) {
        return Decimal::ZERO;
    }

    let max_markup = fees
        .iter()
        .map(|f| f.shipping_markup_percent)
        .max()
        .unwrap_or(Decimal::ZERO)
        .max(Decimal::ZERO);
    let handling: Decimal = lines
        .iter()
        .zip(fees)
        .map(|(line, fee)| fee.handling_fee.max(Decimal::ZERO) * Decimal::from(line.quantity))
        .sum();

    round_money(settings.base_rate * (Decimal::ONE + max_markup / Decimal::ONE_HUNDRED) + handling)
}

pub fn totals(subtotal: Decimal, shipping_cost: Decimal, discount: Decimal) -> Totals {
    let discount = discount.min(subtotal).max(Decimal::ZERO);
    Totals {
        subtotal,
        shipping_cost,
        discount_amount: discount,
        total_amount: round_money(subtotal - discount + shipping_cost),
    }
}

#[derive(Clone)]
pub struct PricingService {
    db: Arc<DatabaseConnection>,
}

impl PricingService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Resolves fees for every line, fetching each referenced category once.
    pub async fn resolve_cart_fees(
        &self,
        lines: &[PricedLine],
    ) -> Result<Vec<ResolvedFees>, ServiceError> {
        let slugs: HashSet<&str> = lines.iter().map(|l| l.category_slug.as_str()).collect();
        let categories: HashMap<String, category::Model> = if slugs.is_empty() {
            HashMap::new()
        } else {
            category::Entity::find()
                .filter(category::Column::Slug.is_in(slugs.iter().map(|s| s.to_string())))
                .all(&*self.db)
                .await?
                .into_iter()
                .map(|c| (c.slug.clone(), c))
                .collect()
        };
        debug!(
            lines = lines.len(),
            categories = categories.len(),
            "resolving cart fees"
        );

        Ok(lines
            .iter()
            .map(|line| {
                let cat = categories.get(&line.category_slug);
                ResolvedFees {
                    handling_fee: resolve_fee(
                        line.handling_fee,
                        cat.and_then(|c| c.handling_fee),
                    ),
                    shipping_markup_percent: resolve_fee(
                        line.shipping_markup_percent,
                        cat.and_then(|c| c.shipping_markup_percent),
                    ),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(category: &str, qty: i64, price: Decimal) -> PricedLine {
        PricedLine {
            sku: format!("{category}-{qty}"),
            category_slug: category.to_string(),
            quantity: qty,
            unit_price: price,
            handling_fee: None,
            shipping_markup_percent: None,
        }
    }

    fn free_over_100(categories: &[&str]) -> ShippingSettings {
        ShippingSettings {
            base_rate: dec!(10),
            free_shipping_enabled: true,
            free_shipping_threshold: dec!(100),
            free_shipping_categories: categories.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn product_fee_wins_over_category() {
        assert_eq!(resolve_fee(None, Some(dec!(7))), dec!(7));
        assert_eq!(resolve_fee(Some(dec!(3)), Some(dec!(7))), dec!(3));
        assert_eq!(resolve_fee(Some(Decimal::ZERO), Some(dec!(7))), Decimal::ZERO);
        assert_eq!(resolve_fee(None, None), Decimal::ZERO);
    }

    #[test]
    fn percentage_and_fixed_discounts() {
        assert_eq!(
            compute_discount(DiscountType::Percentage, dec!(10), dec!(200.00)),
            dec!(20.00)
        );
        assert_eq!(
            compute_discount(DiscountType::Fixed, dec!(50), dec!(30.00)),
            dec!(30.00)
        );
        assert_eq!(
            compute_discount(DiscountType::Percentage, dec!(150), dec!(80)),
            dec!(80)
        );
        assert_eq!(
            compute_discount(DiscountType::Fixed, dec!(-5), dec!(80)),
            Decimal::ZERO
        );
    }

    #[test]
    fn allow_list_must_cover_every_line() {
        let settings = free_over_100(&["kayaks"]);
        assert!(qualifies_for_free_shipping(&settings, dec!(150), &["kayaks", "kayaks"]));
        assert!(!qualifies_for_free_shipping(&settings, dec!(150), &["kayaks", "paddles"]));
        assert!(!qualifies_for_free_shipping(&settings, dec!(99.99), &["kayaks"]));
    }

    #[test]
    fn empty_allow_list_only_checks_threshold() {
        let settings = free_over_100(&[]);
        assert!(qualifies_for_free_shipping(&settings, dec!(100), &["paddles"]));

        let mut disabled = settings;
        disabled.free_shipping_enabled = false;
        assert!(!qualifies_for_free_shipping(&disabled, dec!(1000), &["paddles"]));
    }

    #[test]
    fn shipping_cost_applies_max_markup_and_handling() {
        let settings = ShippingSettings {
            free_shipping_enabled: false,
            ..free_over_100(&[])
        };
        let lines = vec![line("kayaks", 2, dec!(50)), line("paddles", 1, dec!(20))];
        let fees = vec![
            ResolvedFees {
                handling_fee: dec!(5),
                shipping_markup_percent: dec!(20),
            },
            ResolvedFees {
                handling_fee: dec!(1.50),
                shipping_markup_percent: dec!(10),
            },
        ];

        // 10 × 1.2 + 5 × 2 + 1.50 × 1
        assert_eq!(
            shipping_cost(&settings, DeliveryMethod::Delivery, &lines, &fees),
            dec!(23.50)
        );
        assert_eq!(
            shipping_cost(&settings, DeliveryMethod::SelfCollection, &lines, &fees),
            Decimal::ZERO
        );
    }

    #[test]
    fn free_shipping_zeroes_delivery_cost() {
        let settings = free_over_100(&["kayaks"]);
        let lines = vec![line("kayaks", 1, dec!(150))];
        let fees = vec![ResolvedFees {
            handling_fee: dec!(5),
            shipping_markup_percent: dec!(20),
        }];
        assert_eq!(
            shipping_cost(&settings, DeliveryMethod::Delivery, &lines, &fees),
            Decimal::ZERO
        );
    }

    #[test]
    fn totals_cap_discount() {
        let t = totals(dec!(30), dec!(10), dec!(50));
        assert_eq!(t.discount_amount, dec!(30));
        assert_eq!(t.total_amount, dec!(10));
    }
}
