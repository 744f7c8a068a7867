use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::AppState;

/// The gateway only needs to know the delivery arrived; anything else makes it retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookAck {
    pub received: bool,
    pub processed: bool,
}

impl WebhookAck {
    fn processed(processed: bool) -> (StatusCode, Json<Self>) {
        (
            StatusCode::OK,
            Json(Self {
                received: true,
                processed,
            }),
        )
    }
}

pub async fn gateway_webhook(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<WebhookAck>) {
    let peer_ip = peer.map(|ConnectInfo(addr)| addr.ip());
    let hook = match state
        .authenticator
        .authenticate(&headers, &body, peer_ip, Utc::now())
        .await
    {
        Ok(hook) => hook,
        Err(rejection) => {
            tracing::warn!(
                reason = rejection.reason(),
                status = rejection.status_code().as_u16(),
                peer = ?peer_ip,
                "webhook rejected: {}",
                rejection
            );
            return WebhookAck::processed(false);
        }
    };

    let event = hook.event.as_str();
    let services = state.services.clone();
    let unit = state.units.webhook;
    // Detached so a slow delivery finishes in the background after we stop waiting.
    let work = tokio::spawn(async move { services.handle_webhook(&hook, unit, Utc::now()).await });

    match tokio::time::timeout(state.webhook_timeout, work).await {
        Ok(Ok(Ok(outcome))) => {
            tracing::info!(
                event,
                reference = %outcome.transaction().reference,
                status = %outcome.transaction().status,
                outcome = outcome.label(),
                "webhook processed"
            );
            WebhookAck::processed(true)
        }
        Ok(Ok(Err(e))) => {
            tracing::warn!(event, "webhook not applied: {}", e);
            WebhookAck::processed(false)
        }
        Ok(Err(e)) => {
            tracing::error!(event, "webhook processing task failed: {}", e);
            WebhookAck::processed(false)
        }
        Err(_) => {
            tracing::warn!(
                event,
                timeout_ms = state.webhook_timeout.as_millis() as u64,
                "webhook processing still running after timeout"
            );
            WebhookAck::processed(false)
        }
    }
}
