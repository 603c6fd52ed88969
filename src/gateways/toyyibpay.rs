use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use super::{
    amount_matches, issued_bill, send_with_timeout, to_cents, CallbackPayload, CallbackStatus,
    NormalizedCallback, PaymentGateway, PaymentRedirect, PaymentRequest,
};
use crate::config::AppConfig;
use crate::entities::order::Model as OrderModel;
use crate::entities::GatewayKind;
use crate::errors::ServiceError;

const BILL_NAME_MAX: usize = 30;
const BILL_DESCRIPTION_MAX: usize = 100;

#[derive(Debug, Deserialize)]
struct CreateBillResponse {
    #[serde(rename = "BillCode")]
    bill_code: String,
}

const PAID: &str = "1";

/// ToyyibPay hosted bill page.
///
/// Callbacks are form posts carrying `status` (1 paid, 2 pending, 3 failed),
/// `billcode` and `order_id`, the external reference we sent on creation.
/// The return redirect uses `status_id` instead of `status`.
///
/// Callbacks are unsigned, so a success is only accepted once
/// `getBillTransactions` lists a paid transaction for the order's own bill.
#[derive(Clone, Debug)]
pub struct ToyyibPayGateway {
    http: reqwest::Client,
    base_url: String,
    secret_key: Option<String>,
    category_code: Option<String>,
    timeout: Duration,
}

impl ToyyibPayGateway {
    pub fn new(
        base_url: impl Into<String>,
        secret_key: Option<String>,
        category_code: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key,
            category_code,
            timeout,
        }
    }

    pub fn from_config(cfg: &AppConfig, timeout: Duration) -> Self {
        Self::new(
            cfg.toyyibpay_base_url.clone(),
            cfg.toyyibpay_secret_key.clone(),
            cfg.toyyibpay_category_code.clone(),
            timeout,
        )
    }

    fn credentials(&self) -> Result<(&str, &str), ServiceError> {
        match (self.secret_key.as_deref(), self.category_code.as_deref()) {
            (Some(key), Some(category)) if !key.is_empty() && !category.is_empty() => {
                Ok((key, category))
            }
            _ => Err(ServiceError::ConfigurationError(
                "toyyibpay_secret_key and toyyibpay_category_code must be set".into(),
            )),
        }
    }
}

fn clip(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

/// A `getBillTransactions` entry counts when it is paid, echoes this order as
/// its external reference and, when an amount is reported, carries the order
/// total.
fn settles(order: &OrderModel, transaction: &CallbackPayload) -> bool {
    if transaction.get("billpaymentStatus") != Some(PAID) {
        return false;
    }
    let order_ref = order.id.to_string();
    if transaction
        .get("billExternalReferenceNo")
        .is_some_and(|reference| reference != order_ref)
    {
        return false;
    }
    match transaction.get("billpaymentAmount") {
        Some(amount) => amount
            .parse::<Decimal>()
            .is_ok_and(|amount| amount_matches(order, amount)),
        None => true,
    }
}

#[async_trait]
impl PaymentGateway for ToyyibPayGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Toyyibpay
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_payment(
        &self,
        request: &PaymentRequest<'_>,
    ) -> Result<PaymentRedirect, ServiceError> {
        let (secret_key, category_code) = self.credentials()?;
        let cents = to_cents(request.amount)?;
        let order_ref = request.order_id.to_string();
        let description = request
            .items
            .iter()
            .map(|item| format!("{} x{}", item.name, item.quantity))
            .collect::<Vec<_>>()
            .join(", ");

        let form = [
            ("userSecretKey", secret_key.to_string()),
            ("categoryCode", category_code.to_string()),
            ("billName", clip(&format!("Order {}", &order_ref[..8]), BILL_NAME_MAX)),
            ("billDescription", clip(&description, BILL_DESCRIPTION_MAX)),
            ("billPriceSetting", "1".to_string()),
            ("billPayorInfo", "1".to_string()),
            ("billAmount", cents.to_string()),
            ("billReturnUrl", request.return_url.clone()),
            ("billCallbackUrl", request.callback_url.clone()),
            ("billExternalReferenceNo", order_ref.clone()),
            ("billTo", request.customer.name.clone()),
            ("billEmail", request.customer.email.clone()),
            ("billPhone", request.customer.phone.clone()),
        ];

        let http_request = self
            .http
            .post(format!("{}/index.php/api/createBill", self.base_url))
            .form(&form);
        let body = send_with_timeout(http_request, self.timeout, self.kind()).await?;

        let bills: Vec<CreateBillResponse> = serde_json::from_str(&body).map_err(|e| {
            ServiceError::ExternalServiceError(format!("toyyibpay createBill response: {e}"))
        })?;
        let bill = bills.into_iter().next().ok_or_else(|| {
            ServiceError::ExternalServiceError("toyyibpay createBill returned no bill".into())
        })?;

        info!(bill_code = %bill.bill_code, "toyyibpay bill created");
        Ok(PaymentRedirect {
            redirect_url: format!("{}/{}", self.base_url, bill.bill_code),
            gateway_bill_id: Some(bill.bill_code),
        })
    }

    fn normalize_callback(&self, payload: &CallbackPayload) -> NormalizedCallback {
        let status = match payload.get("status").or_else(|| payload.get("status_id")) {
            Some("1") => CallbackStatus::Success,
            Some("2") => CallbackStatus::Pending,
            _ => CallbackStatus::Failed,
        };
        NormalizedCallback {
            status,
            external_reference: payload
                .get("order_id")
                .or_else(|| payload.get("billExternalReferenceNo"))
                .map(str::to_string),
            gateway_bill_id: payload
                .get("billcode")
                .or_else(|| payload.get("billCode"))
                .map(str::to_string),
        }
    }

    #[instrument(skip(self, order, callback), fields(order_id = %order.id))]
    async fn confirm_payment(
        &self,
        order: &OrderModel,
        callback: &NormalizedCallback,
    ) -> Result<bool, ServiceError> {
        let bill_code = issued_bill(order, callback)?;
        let form = [("billCode", bill_code), ("billpaymentStatus", PAID)];
        let http_request = self
            .http
            .post(format!("{}/index.php/api/getBillTransactions", self.base_url))
            .form(&form);
        let body = send_with_timeout(http_request, self.timeout, self.kind()).await?;

        let transactions: Vec<serde_json::Value> = serde_json::from_str(&body).map_err(|e| {
            ServiceError::ExternalServiceError(format!(
                "toyyibpay getBillTransactions response: {e}"
            ))
        })?;
        let confirmed = transactions
            .iter()
            .map(CallbackPayload::from_json)
            .any(|transaction| settles(order, &transaction));
        if !confirmed {
            warn!(%bill_code, "toyyibpay lists no paid transaction for the bill");
        }
        Ok(confirmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn payload(pairs: &[(&str, &str)]) -> CallbackPayload {
        CallbackPayload::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    fn gateway() -> ToyyibPayGateway {
        ToyyibPayGateway::new("https://toyyibpay.test", None, None, Duration::from_secs(1))
    }

    #[test]
    fn callback_status_codes_are_mapped() {
        let g = gateway();
        let paid = g.normalize_callback(&payload(&[
            ("status", "1"),
            ("billcode", "bx9"),
            ("order_id", "ord-1"),
            ("refno", "TP123"),
        ]));
        assert_eq!(paid.status, CallbackStatus::Success);
        assert_eq!(paid.external_reference.as_deref(), Some("ord-1"));
        assert_eq!(paid.gateway_bill_id.as_deref(), Some("bx9"));

        assert_eq!(
            g.normalize_callback(&payload(&[("status_id", "2")])).status,
            CallbackStatus::Pending
        );
        assert_eq!(
            g.normalize_callback(&payload(&[("status", "3")])).status,
            CallbackStatus::Failed
        );
        assert_eq!(
            g.normalize_callback(&payload(&[])).status,
            CallbackStatus::Failed
        );
    }

    #[tokio::test]
    async fn missing_credentials_is_a_configuration_error() {
        let customer = crate::entities::order::CustomerInfo::default();
        let request = PaymentRequest {
            order_id: uuid::Uuid::new_v4(),
            items: &[],
            customer: &customer,
            amount: rust_decimal::Decimal::TEN,
            return_url: String::new(),
            callback_url: String::new(),
        };
        assert!(matches!(
            gateway().create_payment(&request).await,
            Err(ServiceError::ConfigurationError(_))
        ));
    }
}
