//! Payment gateway webhook (ITN) handler.
//!
//! Gateways retry any delivery that does not get a 2xx, so this endpoint
//! answers `200 OK` whatever billing decides, including rejected signatures
//! and unknown orders. Only a body that cannot be read as a notification at
//! all gets `400 Bad Request`.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
};
use serde_json::{Map, Value};
use tracing::{debug, error, info};

use crate::error::{AppError, Result, add_breadcrumb};
use crate::payment::PaymentError;
use crate::services::BillingError;
use crate::state::AppState;

/// Header carrying the notification signature, when the gateway does not
/// put it in the body.
pub const SIGNATURE_HEADER: &str = "x-payment-signature";

/// Decode a notification body as JSON or as a URL-encoded form.
///
/// Form fields become JSON strings.
///
/// # Errors
///
/// Returns [`AppError::BadRequest`] if the body is neither.
pub fn decode_payload(headers: &HeaderMap, body: &[u8]) -> Result<Value> {
    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));

    if is_json {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| AppError::BadRequest(format!("Invalid JSON payload: {e}")))?;
        if !value.is_object() {
            return Err(AppError::BadRequest(
                "Payload must be a JSON object".into(),
            ));
        }
        return Ok(value);
    }

    let fields: Map<String, Value> = url::form_urlencoded::parse(body)
        .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
        .collect();
    if fields.is_empty() {
        return Err(AppError::BadRequest("Empty payload".into()));
    }
    Ok(Value::Object(fields))
}

/// Receive a payment notification.
pub async fn payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode> {
    let payload = decode_payload(&headers, &body)?;
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    add_breadcrumb(
        "webhook",
        "Payment notification received",
        &[("provider", state.billing().provider().name())],
    );

    match state.billing().process_webhook(&payload, signature).await {
        Ok(true) => info!("Payment notification applied"),
        Ok(false) => debug!("Payment notification ignored"),
        Err(err @ BillingError::Payment(PaymentError::MalformedWebhook(_))) => {
            return Err(err.into());
        }
        Err(err) => {
            // Still acknowledged; the failure is visible in Sentry.
            let event_id = sentry::capture_error(&err);
            error!(error = %err, sentry_event_id = %event_id, "Payment notification failed");
        }
    }

    Ok(StatusCode::OK)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(content_type: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_str(content_type).unwrap());
        headers
    }

    #[test]
    fn test_decode_form_payload() {
        let payload = decode_payload(
            &headers("application/x-www-form-urlencoded"),
            b"m_payment_id=ORD-1&payment_status=COMPLETE&item_name=Order+ORD-1",
        )
        .unwrap();
        assert_eq!(payload["m_payment_id"], "ORD-1");
        assert_eq!(payload["item_name"], "Order ORD-1");
    }

    #[test]
    fn test_decode_json_payload() {
        let payload = decode_payload(
            &headers("application/json; charset=utf-8"),
            br#"{"orderId":"ORD-1","status":"complete"}"#,
        )
        .unwrap();
        assert_eq!(payload["status"], "complete");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_payload(&headers("application/json"), b"{not json").is_err());
        assert!(decode_payload(&headers("application/json"), b"[1,2]").is_err());
        assert!(decode_payload(&HeaderMap::new(), b"").is_err());
    }
}
