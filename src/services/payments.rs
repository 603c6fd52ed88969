//! Payment confirmation: gateway callbacks and manual approvals.

use std::sync::Arc;

use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::order::{self, Model as OrderModel};
use crate::entities::{GatewayKind, OrderStatus};
use crate::errors::ServiceError;
use crate::gateways::{CallbackPayload, CallbackStatus, GatewayRegistry};
use crate::services::fulfillment::{FulfillmentReport, FulfillmentService};
use crate::services::order_status::{OrderStatusService, PaidTransition};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WebhookDisposition {
    Processed,
    AlreadyPaid,
    Ignored,
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub status: WebhookDisposition,
    pub order_id: Option<Uuid>,
    pub message: String,
}

impl WebhookAck {
    fn ignored(order_id: Option<Uuid>, message: impl Into<String>) -> Self {
        Self {
            status: WebhookDisposition::Ignored,
            order_id,
            message: message.into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct ApprovalResult {
    pub order_id: Uuid,
    pub already_paid: bool,
    pub fulfillment: Option<FulfillmentReport>,
}

#[derive(Clone)]
pub struct PaymentConfirmationService {
    db: Arc<DatabaseConnection>,
    gateways: GatewayRegistry,
    order_status: OrderStatusService,
    fulfillment: FulfillmentService,
}

impl PaymentConfirmationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateways: GatewayRegistry,
        fulfillment: FulfillmentService,
    ) -> Self {
        Self {
            order_status: OrderStatusService::new(db.clone()),
            db,
            gateways,
            fulfillment,
        }
    }

    async fn find_order(
        &self,
        reference: Option<&str>,
        bill_id: Option<&str>,
    ) -> Result<Option<OrderModel>, ServiceError> {
        if let Some(id) = reference.and_then(|r| Uuid::parse_str(r).ok()) {
            if let Some(found) = order::Entity::find_by_id(id).one(&*self.db).await? {
                return Ok(Some(found));
            }
        }
        match bill_id {
            Some(bill) => Ok(order::Entity::find()
                .filter(order::Column::GatewayBillId.eq(bill))
                .one(&*self.db)
                .await?),
            None => Ok(None),
        }
    }

    /// Handles one gateway callback. Anything other than a confirmed payment
    /// for a known order is acknowledged as ignored so the gateway does not
    /// keep retrying; a repeat confirmation is acknowledged without effect.
    #[instrument(skip(self, payload), fields(gateway = %kind))]
    pub async fn handle_callback(
        &self,
        kind: GatewayKind,
        payload: &CallbackPayload,
    ) -> Result<WebhookAck, ServiceError> {
        let gateway = self.gateways.get(kind)?;
        gateway.verify_callback(payload)?;
        let callback = gateway.normalize_callback(payload);

        if callback.external_reference.is_none() && callback.gateway_bill_id.is_none() {
            return Err(ServiceError::BadRequest(
                "callback carries no order reference".into(),
            ));
        }
        if callback.status != CallbackStatus::Success {
            info!(status = ?callback.status, reference = ?callback.external_reference, "non-success callback ignored");
            return Ok(WebhookAck::ignored(None, "payment not successful"));
        }

        let Some(found) = self
            .find_order(
                callback.external_reference.as_deref(),
                callback.gateway_bill_id.as_deref(),
            )
            .await?
        else {
            warn!(
                reference = ?callback.external_reference,
                bill = ?callback.gateway_bill_id,
                "callback for unknown order"
            );
            return Ok(WebhookAck::ignored(None, "order not found"));
        };
        if found.payment_gateway != kind {
            warn!(order_id = %found.id, expected = %found.payment_gateway, "callback from another gateway");
            return Ok(WebhookAck::ignored(Some(found.id), "gateway mismatch"));
        }
        if found.status != OrderStatus::Paid
            && !gateway.confirm_payment(&found, &callback).await?
        {
            warn!(order_id = %found.id, "success callback not confirmed by the gateway");
            return Ok(WebhookAck::ignored(
                Some(found.id),
                "payment not confirmed by gateway",
            ));
        }

        let transition = match self.order_status.mark_paid(found.id, None).await {
            Ok(t) => t,
            Err(ServiceError::InvalidStatus(reason)) => {
                warn!(order_id = %found.id, %reason, "callback for order that cannot be paid");
                return Ok(WebhookAck::ignored(Some(found.id), reason));
            }
            Err(e) => return Err(e),
        };
        if !transition.is_new() {
            return Ok(WebhookAck {
                status: WebhookDisposition::AlreadyPaid,
                order_id: Some(found.id),
                message: "order already paid".into(),
            });
        }

        self.run_fulfillment(found.id).await;
        Ok(WebhookAck {
            status: WebhookDisposition::Processed,
            order_id: Some(found.id),
            message: "payment recorded".into(),
        })
    }

    /// Admin approval of a manual transfer, followed by fulfillment.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn approve_manual(
        &self,
        order_id: Uuid,
        actor: &str,
    ) -> Result<ApprovalResult, ServiceError> {
        let transition = self.order_status.approve_manual(order_id, actor).await?;
        let already_paid = matches!(transition, PaidTransition::AlreadyPaid(_));
        let fulfillment = if already_paid {
            None
        } else {
            self.run_fulfillment(order_id).await
        };
        Ok(ApprovalResult {
            order_id,
            already_paid,
            fulfillment,
        })
    }

    /// Fulfillment problems are recorded on the order and never undo the
    /// payment, so they are logged here rather than returned.
    async fn run_fulfillment(&self, order_id: Uuid) -> Option<FulfillmentReport> {
        match self.fulfillment.process_successful_order(order_id).await {
            Ok(report) => Some(report),
            Err(e) => {
                error!(%order_id, error = %e, "fulfillment did not run");
                None
            }
        }
    }
}
