//! Payment gateway adapters.
//!
//! Each gateway turns an order into a redirect target and later confirms the
//! payment through an inbound callback. Callbacks are normalised into a
//! [`NormalizedCallback`] so the webhook handler never sees gateway-specific
//! field names.

pub mod billplz;
pub mod manual;
pub mod toyyibpay;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::entities::order::{CustomerInfo, Model as OrderModel, OrderItem};
use crate::entities::GatewayKind;
use crate::errors::ServiceError;

pub use billplz::BillplzGateway;
pub use manual::ManualTransferGateway;
pub use toyyibpay::ToyyibPayGateway;

#[derive(Clone, Debug)]
pub struct PaymentRequest<'a> {
    pub order_id: Uuid,
    pub items: &'a [OrderItem],
    pub customer: &'a CustomerInfo,
    pub amount: Decimal,
    /// Where the customer lands after the hosted page.
    pub return_url: String,
    /// Where the gateway posts its server-to-server confirmation.
    pub callback_url: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRedirect {
    pub redirect_url: String,
    pub gateway_bill_id: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallbackStatus {
    Success,
    Pending,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizedCallback {
    pub status: CallbackStatus,
    /// Our order id as echoed back by the gateway, when it echoes one.
    pub external_reference: Option<String>,
    pub gateway_bill_id: Option<String>,
}

/// Flattened callback body. Form and JSON payloads both end up here with
/// every scalar rendered as a string.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallbackPayload {
    fields: BTreeMap<String, String>,
}

impl CallbackPayload {
    pub fn new(fields: BTreeMap<String, String>) -> Self {
        Self { fields }
    }

    pub fn from_json(value: &serde_json::Value) -> Self {
        let mut fields = BTreeMap::new();
        if let Some(map) = value.as_object() {
            for (key, v) in map {
                let rendered = match v {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Null => continue,
                    other => other.to_string(),
                };
                fields.insert(key.clone(), rendered);
            }
        }
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn kind(&self) -> GatewayKind;

    async fn create_payment(
        &self,
        request: &PaymentRequest<'_>,
    ) -> Result<PaymentRedirect, ServiceError>;

    fn normalize_callback(&self, payload: &CallbackPayload) -> NormalizedCallback;

    /// Authenticates an inbound callback. Gateways without a signing scheme
    /// accept everything.
    fn verify_callback(&self, _payload: &CallbackPayload) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Checks a success callback against the provider before the order is
    /// marked paid. `Ok(false)` means the provider does not report the bill
    /// as paid. Gateways with no way to ask the provider never confirm.
    async fn confirm_payment(
        &self,
        _order: &OrderModel,
        _callback: &NormalizedCallback,
    ) -> Result<bool, ServiceError> {
        Ok(false)
    }
}

/// The bill issued for `order` at checkout. A callback naming any other bill
/// is rejected.
pub(crate) fn issued_bill<'a>(
    order: &'a OrderModel,
    callback: &NormalizedCallback,
) -> Result<&'a str, ServiceError> {
    let issued = order
        .gateway_bill_id
        .as_deref()
        .ok_or_else(|| ServiceError::Unauthorized("order has no gateway bill".into()))?;
    match callback.gateway_bill_id.as_deref() {
        Some(named) if named != issued => Err(ServiceError::Unauthorized(format!(
            "callback bill {named} was not issued for this order"
        ))),
        _ => Ok(issued),
    }
}

/// Provider-reported amount against the order total, compared in cents.
pub(crate) fn amount_matches(order: &OrderModel, reported: Decimal) -> bool {
    matches!((to_cents(order.total_amount), to_cents(reported)), (Ok(a), Ok(b)) if a == b)
}

#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<GatewayKind, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        let timeout = cfg.external_call_timeout();
        Self::new()
            .with(Arc::new(ManualTransferGateway::new(cfg.public_base_url.clone())))
            .with(Arc::new(ToyyibPayGateway::from_config(cfg, timeout)))
            .with(Arc::new(BillplzGateway::from_config(cfg, timeout)))
    }

    pub fn with(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.insert(gateway.kind(), gateway);
        self
    }

    pub fn get(&self, kind: GatewayKind) -> Result<Arc<dyn PaymentGateway>, ServiceError> {
        self.gateways.get(&kind).cloned().ok_or_else(|| {
            ServiceError::ConfigurationError(format!("payment gateway {kind} is not registered"))
        })
    }
}

impl std::fmt::Debug for GatewayRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayRegistry")
            .field("gateways", &self.gateways.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Amount in the smallest currency unit, as both hosted gateways expect.
pub(crate) fn to_cents(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .filter(|cents| *cents > 0)
        .ok_or_else(|| ServiceError::ValidationError(format!("invalid payment amount {amount}")))
}

pub(crate) async fn send_with_timeout(
    request: reqwest::RequestBuilder,
    timeout: Duration,
    gateway: GatewayKind,
) -> Result<String, ServiceError> {
    let response = tokio::time::timeout(timeout, request.send())
        .await
        .map_err(|_| ServiceError::ExternalServiceError(format!("{gateway} request timed out")))?
        .map_err(|e| ServiceError::ExternalServiceError(format!("{gateway} request failed: {e}")))?;

    let status = response.status();
    let body = tokio::time::timeout(timeout, response.text())
        .await
        .map_err(|_| ServiceError::ExternalServiceError(format!("{gateway} response timed out")))?
        .map_err(|e| ServiceError::ExternalServiceError(format!("{gateway} response: {e}")))?;

    if !status.is_success() {
        return Err(ServiceError::ExternalServiceError(format!(
            "{gateway} returned HTTP {}: {}",
            status.as_u16(),
            body.chars().take(300).collect::<String>()
        )));
    }
    Ok(body)
}
