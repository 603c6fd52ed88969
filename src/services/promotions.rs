use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::entities::{promo_code, DiscountType};
use crate::errors::ServiceError;
use crate::services::pricing::compute_discount;

/// Codes are matched case-insensitively and stored trimmed and uppercased.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PromoQuote {
    pub code: String,
    pub discount_type: DiscountType,
    pub value: Decimal,
    pub discount: Decimal,
}

#[derive(Clone, Debug, Deserialize, Validate, ToSchema)]
pub struct CreatePromoCode {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    pub discount_type: DiscountType,
    pub value: Decimal,
    pub min_spend: Option<Decimal>,
    #[validate(range(min = 1))]
    pub usage_limit: Option<i32>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Checks a promo row against the cart subtotal.
pub fn check_eligibility(
    promo: &promo_code::Model,
    subtotal: Decimal,
) -> Result<(), ServiceError> {
    if !promo.active {
        return Err(ServiceError::ValidationError(format!(
            "promo code {} is not active",
            promo.code
        )));
    }
    if let Some(limit) = promo.usage_limit {
        if promo.usage_count >= limit {
            return Err(ServiceError::ValidationError(format!(
                "promo code {} has reached its usage limit",
                promo.code
            )));
        }
    }
    if let Some(min_spend) = promo.min_spend {
        if subtotal < min_spend {
            return Err(ServiceError::ValidationError(format!(
                "promo code {} requires a minimum spend of {}",
                promo.code, min_spend
            )));
        }
    }
    Ok(())
}

#[derive(Clone)]
pub struct PromotionService {
    db: Arc<DatabaseConnection>,
}

impl PromotionService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_by_code(
        &self,
        code: &str,
    ) -> Result<Option<promo_code::Model>, ServiceError> {
        Ok(promo_code::Entity::find()
            .filter(promo_code::Column::Code.eq(normalize_code(code)))
            .one(&*self.db)
            .await?)
    }

    /// Looks up and validates a code for the given subtotal and returns the
    /// discount it would grant.
    #[instrument(skip(self))]
    pub async fn validate(
        &self,
        code: &str,
        subtotal: Decimal,
    ) -> Result<PromoQuote, ServiceError> {
        let normalized = normalize_code(code);
        if normalized.is_empty() {
            return Err(ServiceError::ValidationError("promo code is empty".into()));
        }

        let promo = self
            .find_by_code(&normalized)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("promo code {normalized}")))?;
        check_eligibility(&promo, subtotal)?;

        let discount = compute_discount(promo.discount_type, promo.value, subtotal);
        debug!(code = %promo.code, %discount, "promo code accepted");
        Ok(PromoQuote {
            code: promo.code,
            discount_type: promo.discount_type,
            value: promo.value,
            discount,
        })
    }

    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create(&self, input: CreatePromoCode) -> Result<promo_code::Model, ServiceError> {
        input.validate()?;
        if input.value <= Decimal::ZERO {
            return Err(ServiceError::ValidationError("value must be positive".into()));
        }
        if input.discount_type == DiscountType::Percentage && input.value > Decimal::ONE_HUNDRED {
            return Err(ServiceError::ValidationError(
                "percentage value cannot exceed 100".into(),
            ));
        }

        let code = normalize_code(&input.code);
        if self.find_by_code(&code).await?.is_some() {
            return Err(ServiceError::Conflict(format!("promo code {code} already exists")));
        }

        let now = Utc::now();
        let model = promo_code::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.clone()),
            discount_type: Set(input.discount_type),
            value: Set(input.value),
            min_spend: Set(input.min_spend),
            usage_limit: Set(input.usage_limit),
            usage_count: Set(0),
            active: Set(input.active),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(%code, "promo code created");
        Ok(model)
    }

    pub async fn list(&self) -> Result<Vec<promo_code::Model>, ServiceError> {
        Ok(promo_code::Entity::find()
            .order_by_asc(promo_code::Column::Code)
            .all(&*self.db)
            .await?)
    }
}

/// Counts one use of `code`. Runs inside the transaction that moves the
/// order to `PAID`, so it happens once per paid order.
pub async fn record_usage<C: ConnectionTrait>(conn: &C, code: &str) -> Result<(), ServiceError> {
    let result = promo_code::Entity::update_many()
        .col_expr(
            promo_code::Column::UsageCount,
            Expr::col(promo_code::Column::UsageCount).add(1),
        )
        .col_expr(promo_code::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(promo_code::Column::Code.eq(normalize_code(code)))
        .exec(conn)
        .await?;
    if result.rows_affected == 0 {
        warn!(%code, "paid order references an unknown promo code");
    }
    Ok(())
}
