use async_trait::async_trait;

use super::{
    CallbackPayload, CallbackStatus, NormalizedCallback, PaymentGateway, PaymentRedirect,
    PaymentRequest,
};
use crate::entities::GatewayKind;
use crate::errors::ServiceError;

/// Bank transfer confirmed by an admin. There is no hosted page: the customer
/// is sent to the storefront's transfer instructions and the order waits in
/// `PENDING_PAYMENT` for approval.
#[derive(Clone, Debug)]
pub struct ManualTransferGateway {
    public_base_url: String,
}

impl ManualTransferGateway {
    pub fn new(public_base_url: String) -> Self {
        Self {
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl PaymentGateway for ManualTransferGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Manual
    }

    async fn create_payment(
        &self,
        request: &PaymentRequest<'_>,
    ) -> Result<PaymentRedirect, ServiceError> {
        Ok(PaymentRedirect {
            redirect_url: format!(
                "{}/checkout/manual-transfer?order={}",
                self.public_base_url, request.order_id
            ),
            gateway_bill_id: None,
        })
    }

    /// Manual transfers never confirm through a callback.
    fn normalize_callback(&self, payload: &CallbackPayload) -> NormalizedCallback {
        NormalizedCallback {
            status: CallbackStatus::Pending,
            external_reference: payload.get("order_id").map(str::to_string),
            gateway_bill_id: None,
        }
    }
}
