use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{info, instrument, warn};

use super::{
    issued_bill, send_with_timeout, to_cents, CallbackPayload, CallbackStatus,
    NormalizedCallback, PaymentGateway, PaymentRedirect, PaymentRequest,
};
use crate::config::AppConfig;
use crate::entities::order::Model as OrderModel;
use crate::entities::GatewayKind;
use crate::errors::ServiceError;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_FIELD: &str = "x_signature";
const DESCRIPTION_MAX: usize = 200;

#[derive(Debug, Deserialize)]
struct CreateBillResponse {
    id: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct BillState {
    paid: bool,
    #[serde(default)]
    reference_1: Option<String>,
    #[serde(default)]
    amount: Option<i64>,
}

/// Billplz v3 bills.
///
/// Callbacks carry `id`, `paid` ("true"/"false"), `state` and an optional
/// `x_signature`. They do not echo our reference, so orders are matched by
/// the bill id stored at creation time. Signed callbacks are trusted once the
/// bill matches; unsigned ones are checked against `GET /v3/bills/{id}`.
#[derive(Clone, Debug)]
pub struct BillplzGateway {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    collection_id: Option<String>,
    x_signature_key: Option<String>,
    timeout: Duration,
}

impl BillplzGateway {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        collection_id: Option<String>,
        x_signature_key: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            collection_id,
            x_signature_key: x_signature_key.filter(|k| !k.is_empty()),
            timeout,
        }
    }

    pub fn from_config(cfg: &AppConfig, timeout: Duration) -> Self {
        Self::new(
            cfg.billplz_base_url.clone(),
            cfg.billplz_api_key.clone(),
            cfg.billplz_collection_id.clone(),
            cfg.billplz_x_signature_key.clone(),
            timeout,
        )
    }

    fn credentials(&self) -> Result<(&str, &str), ServiceError> {
        match (self.api_key.as_deref(), self.collection_id.as_deref()) {
            (Some(key), Some(collection)) if !key.is_empty() && !collection.is_empty() => {
                Ok((key, collection))
            }
            _ => Err(ServiceError::ConfigurationError(
                "billplz_api_key and billplz_collection_id must be set".into(),
            )),
        }
    }

    async fn fetch_bill(&self, bill_id: &str) -> Result<BillState, ServiceError> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                ServiceError::ConfigurationError("billplz_api_key must be set".into())
            })?;
        let http_request = self
            .http
            .get(format!("{}/v3/bills/{bill_id}", self.base_url))
            .basic_auth(api_key, Some(""));
        let body = send_with_timeout(http_request, self.timeout, self.kind()).await?;
        serde_json::from_str(&body).map_err(|e| {
            ServiceError::ExternalServiceError(format!("billplz bill response: {e}"))
        })
    }
}

/// Source string for the X-Signature: every field except the signature,
/// sorted by key, each rendered as `key + value`, joined with `|`.
pub fn signature_source(payload: &CallbackPayload) -> String {
    payload
        .fields()
        .iter()
        .filter(|(key, _)| key.as_str() != SIGNATURE_FIELD)
        .map(|(key, value)| format!("{key}{value}"))
        .collect::<Vec<_>>()
        .join("|")
}

pub fn sign(key: &str, payload: &CallbackPayload) -> Result<String, ServiceError> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| ServiceError::ConfigurationError(format!("billplz signature key: {e}")))?;
    mac.update(signature_source(payload).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[async_trait]
impl PaymentGateway for BillplzGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Billplz
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_payment(
        &self,
        request: &PaymentRequest<'_>,
    ) -> Result<PaymentRedirect, ServiceError> {
        let (api_key, collection_id) = self.credentials()?;
        let cents = to_cents(request.amount)?;
        let description: String = request
            .items
            .iter()
            .map(|item| format!("{} x{}", item.name, item.quantity))
            .collect::<Vec<_>>()
            .join(", ")
            .chars()
            .take(DESCRIPTION_MAX)
            .collect();

        let form = [
            ("collection_id", collection_id.to_string()),
            ("email", request.customer.email.clone()),
            ("mobile", request.customer.phone.clone()),
            ("name", request.customer.name.clone()),
            ("amount", cents.to_string()),
            ("callback_url", request.callback_url.clone()),
            ("redirect_url", request.return_url.clone()),
            ("description", description),
            ("reference_1_label", "Order".to_string()),
            ("reference_1", request.order_id.to_string()),
        ];

        let http_request = self
            .http
            .post(format!("{}/v3/bills", self.base_url))
            .basic_auth(api_key, Some(""))
            .form(&form);
        let body = send_with_timeout(http_request, self.timeout, self.kind()).await?;

        let bill: CreateBillResponse = serde_json::from_str(&body).map_err(|e| {
            ServiceError::ExternalServiceError(format!("billplz create bill response: {e}"))
        })?;

        info!(bill_id = %bill.id, "billplz bill created");
        Ok(PaymentRedirect {
            redirect_url: bill.url,
            gateway_bill_id: Some(bill.id),
        })
    }

    fn normalize_callback(&self, payload: &CallbackPayload) -> NormalizedCallback {
        let paid = payload
            .get("paid")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let status = if paid {
            CallbackStatus::Success
        } else if payload.get("state") == Some("due") {
            CallbackStatus::Pending
        } else {
            CallbackStatus::Failed
        };

        NormalizedCallback {
            status,
            external_reference: payload.get("reference_1").map(str::to_string),
            gateway_bill_id: payload.get("id").map(str::to_string),
        }
    }

    fn verify_callback(&self, payload: &CallbackPayload) -> Result<(), ServiceError> {
        let Some(key) = self.x_signature_key.as_deref() else {
            return Ok(());
        };

        let provided = payload
            .get(SIGNATURE_FIELD)
            .ok_or_else(|| ServiceError::Unauthorized("missing x_signature".into()))?;
        let provided = hex::decode(provided)
            .map_err(|_| ServiceError::Unauthorized("malformed x_signature".into()))?;

        let mut mac = HmacSha256::new_from_slice(key.as_bytes())
            .map_err(|e| ServiceError::ConfigurationError(format!("billplz signature key: {e}")))?;
        mac.update(signature_source(payload).as_bytes());
        mac.verify_slice(&provided).map_err(|_| {
            warn!(bill_id = ?payload.get("id"), "billplz x_signature mismatch");
            ServiceError::Unauthorized("invalid x_signature".into())
        })
    }

    #[instrument(skip(self, order, callback), fields(order_id = %order.id))]
    async fn confirm_payment(
        &self,
        order: &OrderModel,
        callback: &NormalizedCallback,
    ) -> Result<bool, ServiceError> {
        let bill_id = issued_bill(order, callback)?;
        if self.x_signature_key.is_some() {
            return Ok(true);
        }

        let bill = self.fetch_bill(bill_id).await?;
        let order_ref = order.id.to_string();
        let confirmed = bill.paid
            && bill
                .reference_1
                .as_deref()
                .map_or(true, |reference| reference == order_ref)
            && bill
                .amount
                .map_or(true, |cents| to_cents(order.total_amount).is_ok_and(|c| c == cents));
        if !confirmed {
            warn!(%bill_id, paid = bill.paid, "billplz does not report the bill as settled");
        }
        Ok(confirmed)
    }
}
