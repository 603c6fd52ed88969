use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    http::{header::CONTENT_TYPE, HeaderMap},
    Json,
};
use bytes::Bytes;
use tracing::{debug, info};

use crate::entities::GatewayKind;
use crate::errors::ServiceError;
use crate::gateways::CallbackPayload;
use crate::services::payments::WebhookAck;
use crate::AppState;

fn parse_form(body: &[u8]) -> CallbackPayload {
    let fields: BTreeMap<String, String> = url::form_urlencoded::parse(body)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    CallbackPayload::new(fields)
}

fn parse_json(body: &[u8]) -> Option<CallbackPayload> {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .filter(|v| v.is_object())
        .map(|v| CallbackPayload::from_json(&v))
}

/// Gateways post either form-encoded or JSON bodies, and some send the wrong
/// content type; fall back to sniffing when the declared type does not parse.
pub fn parse_callback_body(headers: &HeaderMap, body: &[u8]) -> Result<CallbackPayload, ServiceError> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let payload = if content_type.starts_with("application/json") {
        parse_json(body).unwrap_or_else(|| parse_form(body))
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        parse_form(body)
    } else {
        parse_json(body).unwrap_or_else(|| parse_form(body))
    };

    if payload.fields().is_empty() {
        return Err(ServiceError::BadRequest("empty callback body".into()));
    }
    Ok(payload)
}

// POST /api/v1/webhooks/payments/:gateway
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/payments/{gateway}",
    params(("gateway" = String, Path, description = "manual, toyyibpay or billplz")),
    request_body(content = String, description = "Form-encoded or JSON gateway callback"),
    responses(
        (status = 200, description = "Callback processed or ignored", body = WebhookAck),
        (status = 400, description = "Missing order reference", body = crate::errors::ErrorResponse),
        (status = 401, description = "Invalid signature or bill not issued for the order", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway confirmation unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_callback(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ServiceError> {
    let kind: GatewayKind = gateway
        .parse()
        .map_err(|_| ServiceError::NotFound(format!("payment gateway {gateway}")))?;
    let payload = parse_callback_body(&headers, &body)?;
    debug!(gateway = %kind, fields = payload.fields().len(), "payment callback received");

    let ack = state.services.payments.handle_callback(kind, &payload).await?;
    info!(gateway = %kind, status = ?ack.status, order_id = ?ack.order_id, "payment callback handled");
    Ok(Json(ack))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(content_type: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_str(content_type).unwrap());
        headers
    }

    #[test]
    fn form_bodies_are_decoded() {
        let payload = parse_callback_body(
            &headers("application/x-www-form-urlencoded"),
            b"status_id=1&billcode=abc%20d&order_id=42",
        )
        .unwrap();
        assert_eq!(payload.get("billcode"), Some("abc d"));
        assert_eq!(payload.get("status_id"), Some("1"));
    }

    #[test]
    fn mislabelled_json_is_still_read() {
        let payload =
            parse_callback_body(&headers("text/plain"), br#"{"paid": true, "id": "bill-1"}"#)
                .unwrap();
        assert_eq!(payload.get("paid"), Some("true"));
        assert_eq!(payload.get("id"), Some("bill-1"));
    }

    #[test]
    fn json_label_with_form_body_falls_back() {
        let payload =
            parse_callback_body(&headers("application/json"), b"paid=true&id=bill-2").unwrap();
        assert_eq!(payload.get("id"), Some("bill-2"));
    }

    #[test]
    fn empty_body_is_rejected() {
        assert!(matches!(
            parse_callback_body(&HeaderMap::new(), b""),
            Err(ServiceError::BadRequest(_))
        ));
    }
}
