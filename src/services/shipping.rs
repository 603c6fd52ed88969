//! Courier booking for delivery orders.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::entities::order::{CustomerInfo, OrderItem};
use crate::errors::ServiceError;

#[derive(Clone, Debug, Serialize)]
pub struct ShipmentRequest {
    pub order_id: Uuid,
    pub customer: CustomerInfo,
    pub items: Vec<OrderItem>,
    #[serde(with = "rust_decimal::serde::float")]
    pub declared_value: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ShipmentBooking {
    pub tracking_no: String,
}

#[async_trait]
pub trait ShipmentBooker: Send + Sync {
    /// False when no courier is configured; fulfillment then leaves the
    /// order `NOT_SHIPPED` for manual booking.
    fn is_enabled(&self) -> bool {
        true
    }

    async fn book(&self, request: &ShipmentRequest) -> Result<ShipmentBooking, ServiceError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledShipmentBooker;

#[async_trait]
impl ShipmentBooker for DisabledShipmentBooker {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn book(&self, _request: &ShipmentRequest) -> Result<ShipmentBooking, ServiceError> {
        Err(ServiceError::ConfigurationError(
            "shipment booking is not configured".into(),
        ))
    }
}

/// Posts the booking as JSON to a courier aggregator endpoint that answers
/// with `{"tracking_no": "..."}`.
#[derive(Clone)]
pub struct HttpShipmentBooker {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpShipmentBooker {
    pub fn new(url: String, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            api_key,
            timeout,
        }
    }
}

impl std::fmt::Debug for HttpShipmentBooker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpShipmentBooker")
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

#[async_trait]
impl ShipmentBooker for HttpShipmentBooker {
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn book(&self, request: &ShipmentRequest) -> Result<ShipmentBooking, ServiceError> {
        let mut builder = self.client.post(&self.url).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = tokio::time::timeout(self.timeout, builder.send())
            .await
            .map_err(|_| ServiceError::ExternalServiceError("shipment booking timed out".into()))?
            .map_err(|e| ServiceError::ExternalServiceError(format!("shipment booking failed: {e}")))?;
        let status = response.status();
        let body = tokio::time::timeout(self.timeout, response.text())
            .await
            .map_err(|_| ServiceError::ExternalServiceError("shipment booking timed out".into()))?
            .map_err(|e| ServiceError::ExternalServiceError(format!("shipment booking failed: {e}")))?;
        if !status.is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "shipment booking returned HTTP {}",
                status.as_u16()
            )));
        }

        let booking: ShipmentBooking = serde_json::from_str(&body).map_err(|e| {
            ServiceError::ExternalServiceError(format!("unexpected shipment booking response: {e}"))
        })?;
        debug!(tracking_no = %booking.tracking_no, "shipment booked");
        Ok(booking)
    }
}

/// HTTP booker when a booking URL is configured, otherwise the disabled one.
pub fn booker_from_config(cfg: &AppConfig) -> std::sync::Arc<dyn ShipmentBooker> {
    match cfg.shipment_booking_url.as_deref().filter(|u| !u.trim().is_empty()) {
        Some(url) => std::sync::Arc::new(HttpShipmentBooker::new(
            url.to_string(),
            cfg.shipment_api_key.clone(),
            cfg.external_call_timeout(),
        )),
        None => std::sync::Arc::new(DisabledShipmentBooker),
    }
}
