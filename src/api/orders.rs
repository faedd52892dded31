//! Order event ingestion endpoints.

use axum::{body::Bytes, extract::State};
use serde_json::Value;

use crate::dispatch::BroadcastScope;
use crate::error::AppError;
use crate::server::AppState;

/// Body returned once an event has been dispatched
pub const DELIVERED_RESPONSE: &str = "Data sent to Admin front-end.";

/// POST /api/v1/orders - deliver an order event to one restaurant
///
/// The raw body is forwarded verbatim; the restaurant is read from the
/// configured tenant field.
#[tracing::instrument(
    name = "orders.send",
    skip_all,
    fields(payload_bytes = body.len(), tenant_id = tracing::field::Empty)
)]
pub async fn send_order(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<&'static str, AppError> {
    let tenant_id = tenant_from_event(&body, &state.settings.dispatch.tenant_field)?;
    tracing::Span::current().record("tenant_id", tenant_id.as_str());

    dispatch(&state, BroadcastScope::Tenant(tenant_id), body).await
}

/// POST /api/v1/orders/broadcast - deliver an event to every connection
#[tracing::instrument(name = "orders.broadcast", skip_all, fields(payload_bytes = body.len()))]
pub async fn broadcast_order(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<&'static str, AppError> {
    dispatch(&state, BroadcastScope::All, body).await
}

async fn dispatch(
    state: &AppState,
    scope: BroadcastScope,
    payload: Bytes,
) -> Result<&'static str, AppError> {
    let limit = state.settings.dispatch.broadcast_timeout();

    match tokio::time::timeout(limit, state.dispatcher.broadcast(scope, payload)).await {
        Ok(report) => {
            report?;
            Ok(DELIVERED_RESPONSE)
        }
        Err(_) => Err(AppError::Timeout(format!(
            "broadcast did not finish within {}ms",
            limit.as_millis()
        ))),
    }
}

fn tenant_from_event(body: &[u8], field: &str) -> Result<String, AppError> {
    let event: Value = serde_json::from_slice(body)
        .map_err(|_| AppError::Validation("invalid JSON payload".to_string()))?;

    // Matched verbatim against the identity attribute; only blank ids are refused
    match event.get(field).and_then(Value::as_str) {
        Some(tenant_id) if !tenant_id.trim().is_empty() => Ok(tenant_id.to_string()),
        _ => Err(AppError::Validation(
            "tenant identifier not provided".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_from_event() {
        let tenant = tenant_from_event(br#"{"restaurant_id":"r1","order":"42"}"#, "restaurant_id");
        assert_eq!(tenant.unwrap(), "r1");
    }

    #[test]
    fn test_tenant_missing_or_blank() {
        for body in [
            &br#"{"order":"42"}"#[..],
            br#"{"restaurant_id":""}"#,
            br#"{"restaurant_id":"   "}"#,
            br#"{"restaurant_id":17}"#,
            br#"[1,2]"#,
        ] {
            assert!(matches!(
                tenant_from_event(body, "restaurant_id"),
                Err(AppError::Validation(ref m)) if m == "tenant identifier not provided"
            ));
        }
    }

    #[test]
    fn test_tenant_id_is_not_normalized() {
        let tenant = tenant_from_event(br#"{"restaurant_id":" r1"}"#, "restaurant_id");
        assert_eq!(tenant.unwrap(), " r1");
    }

    #[test]
    fn test_non_json_body() {
        assert!(matches!(
            tenant_from_event(b"not json", "restaurant_id"),
            Err(AppError::Validation(ref m)) if m == "invalid JSON payload"
        ));
    }

    #[test]
    fn test_custom_tenant_field() {
        let tenant = tenant_from_event(br#"{"shop":"s9"}"#, "shop");
        assert_eq!(tenant.unwrap(), "s9");
    }
}
