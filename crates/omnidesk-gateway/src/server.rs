//! Gateway server.
//!
//! Terminates provider webhooks (Twilio, webchat widget, inbound email),
//! exposes capability lookups, and fans events out to connected clients
//! over WebSocket.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Form, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use serde::Deserialize;
use std::num::NonZeroU32;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use omnidesk_channels::{ChannelManager, TwilioWebhook, WebchatWebhook};
use omnidesk_core::capabilities::capabilities_for;
use omnidesk_core::config::Config;
use omnidesk_core::storage::StoreFacade;
use omnidesk_core::types::{ChannelKind, CompanyId, ConnectionData, ConnectionId};

use crate::broadcast::{ClientInterest, WsBroadcaster};
use crate::twilio_sig;

/// Webhook posts allowed per connection per minute.
const WEBHOOK_QUOTA_PER_MINUTE: NonZeroU32 = NonZeroU32::new(600).unwrap();

type WebhookLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Gateway errors, mapped onto HTTP responses.
#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    /// Webhook credential was missing or wrong.
    #[error("unauthorized")]
    Unauthorized,

    /// Per-connection webhook quota exhausted.
    #[error("rate limited")]
    RateLimited,

    /// Referenced connection does not exist or has the wrong kind.
    #[error("connection not found")]
    ConnectionNotFound,

    /// Payload could not be interpreted.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Processing failed.
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::ConnectionNotFound => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

/// Shared state for all handlers.
pub struct AppState {
    /// The channel orchestrator.
    pub manager: Arc<ChannelManager>,
    /// Broadcast hub.
    pub broadcaster: WsBroadcaster,
    /// Loaded configuration.
    pub config: Config,
    limiter: WebhookLimiter,
}

impl AppState {
    /// Assemble the shared state.
    #[must_use]
    pub fn new(manager: Arc<ChannelManager>, broadcaster: WsBroadcaster, config: Config) -> Self {
        Self {
            manager,
            broadcaster,
            config,
            limiter: RateLimiter::keyed(Quota::per_minute(WEBHOOK_QUOTA_PER_MINUTE)),
        }
    }

    fn check_quota(&self, connection_id: &ConnectionId) -> Result<(), GatewayError> {
        self.limiter
            .check_key(&connection_id.as_ref().to_string())
            .map_err(|_| GatewayError::RateLimited)
    }
}

/// Build the axum router.
#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/healthz", get(healthz))
        .route("/capabilities/{kind}", get(capabilities))
        .route("/webhooks/webchat", post(webchat_webhook))
        .route("/webhooks/twilio/{connection_id}", post(twilio_webhook))
        .route("/webhooks/email/{connection_id}", post(email_webhook))
        .route("/connections/{connection_id}/connect", post(connect_channel))
        .route(
            "/connections/{connection_id}/disconnect",
            post(disconnect_channel),
        )
        .route("/ws", get(ws_upgrade))
        .layer(TraceLayer::new_for_http());

    if state.config.gateway.cors {
        router = router.layer(CorsLayer::permissive());
    }

    router.with_state(state)
}

/// Serve until ctrl-c.
///
/// # Errors
///
/// Returns error if the listener cannot bind.
pub async fn serve(state: Arc<AppState>) -> std::io::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        state.config.gateway.bind_address, state.config.gateway.port
    )
    .parse()
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await
}

async fn healthz() -> &'static str {
    "ok"
}

async fn capabilities(Path(kind): Path<String>) -> impl IntoResponse {
    Json(capabilities_for(&kind))
}

async fn webchat_webhook(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<WebchatWebhook>,
) -> Result<Json<serde_json::Value>, GatewayError> {
    let connection = state
        .manager
        .webchat()
        .verify_widget_token(&payload.token)
        .await
        .map_err(|e| GatewayError::Internal(e.to_string()))?
        .ok_or(GatewayError::Unauthorized)?;
    state.check_quota(&connection.id)?;

    state
        .manager
        .webchat()
        .process_webhook(&connection, payload)
        .await
        .map_err(|e| GatewayError::Internal(e.to_string()))?;

    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn twilio_webhook(
    State(state): State<Arc<AppState>>,
    Path(connection_id): Path<String>,
    headers: HeaderMap,
    Form(params): Form<Vec<(String, String)>>,
) -> Result<Json<serde_json::Value>, GatewayError> {
    let connection_id = ConnectionId::new(connection_id);
    let connection = state
        .manager
        .store()
        .channel_connection(&connection_id)
        .await
        .map_err(|e| GatewayError::Internal(e.to_string()))?
        .ok_or(GatewayError::ConnectionNotFound)?;
    if connection.kind != ChannelKind::WhatsappTwilio {
        return Err(GatewayError::ConnectionNotFound);
    }
    state.check_quota(&connection.id)?;

    // Twilio signs the full public URL; without a configured base URL the
    // check cannot run and the webhook is accepted as-is.
    if let Some(base) = &state.config.gateway.public_base_url {
        let ConnectionData::WhatsappTwilio { auth_token, .. } = &connection.data else {
            return Err(GatewayError::ConnectionNotFound);
        };
        let url = format!(
            "{}/webhooks/twilio/{}",
            base.trim_end_matches('/'),
            connection_id
        );
        let signature = headers
            .get("X-Twilio-Signature")
            .and_then(|v| v.to_str().ok())
            .ok_or(GatewayError::Unauthorized)?;
        if !twilio_sig::validate(auth_token, &url, &params, signature) {
            return Err(GatewayError::Unauthorized);
        }
    } else {
        tracing::warn!("publicBaseUrl not configured; skipping Twilio signature validation");
    }

    let payload = to_twilio_webhook(params)?;
    state
        .manager
        .whatsapp_twilio()
        .process_webhook(&connection, payload)
        .await
        .map_err(|e| GatewayError::Internal(e.to_string()))?;

    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn email_webhook(
    State(state): State<Arc<AppState>>,
    Path(connection_id): Path<String>,
    body: axum::body::Bytes,
) -> Result<Json<serde_json::Value>, GatewayError> {
    let connection_id = ConnectionId::new(connection_id);
    let connection = state
        .manager
        .store()
        .channel_connection(&connection_id)
        .await
        .map_err(|e| GatewayError::Internal(e.to_string()))?
        .ok_or(GatewayError::ConnectionNotFound)?;
    if connection.kind != ChannelKind::Email {
        return Err(GatewayError::ConnectionNotFound);
    }
    state.check_quota(&connection.id)?;

    state
        .manager
        .email()
        .process_inbound(&connection, &body)
        .await
        .map_err(|e| GatewayError::BadRequest(e.to_string()))?;

    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn connect_channel(
    State(state): State<Arc<AppState>>,
    Path(connection_id): Path<String>,
) -> Result<Json<serde_json::Value>, GatewayError> {
    let outcome = state
        .manager
        .connect_channel(&ConnectionId::new(connection_id))
        .await
        .map_err(|e| GatewayError::Internal(e.to_string()))?;
    Ok(Json(serde_json::json!({
        "status": outcome.status,
        "error": outcome.error,
    })))
}

async fn disconnect_channel(
    State(state): State<Arc<AppState>>,
    Path(connection_id): Path<String>,
) -> Result<Json<serde_json::Value>, GatewayError> {
    let outcome = state
        .manager
        .disconnect_channel(&ConnectionId::new(connection_id))
        .await
        .map_err(|e| GatewayError::Internal(e.to_string()))?;
    Ok(Json(serde_json::json!({
        "status": outcome.status,
        "error": outcome.error,
    })))
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    company_id: Option<String>,
    session_id: Option<String>,
    #[serde(default)]
    global: bool,
}

async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    upgrade: WebSocketUpgrade,
) -> Response {
    let interest = ClientInterest {
        company_id: query.company_id.map(CompanyId::new),
        session_id: query.session_id,
        global: query.global,
    };
    upgrade.on_upgrade(move |socket| client_loop(socket, state, interest))
}

async fn client_loop(socket: WebSocket, state: Arc<AppState>, interest: ClientInterest) {
    let mut rx = state.broadcaster.subscribe();
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            envelope = rx.recv() => match envelope {
                Ok(envelope) if interest.wants(&envelope.scope) => {
                    let Ok(text) = serde_json::to_string(&envelope) else {
                        continue;
                    };
                    if sink.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                // A lagging client drops old events rather than slowing
                // publishers.
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "ws client lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            inbound = stream.next() => match inbound {
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

fn to_twilio_webhook(params: Vec<(String, String)>) -> Result<TwilioWebhook, GatewayError> {
    let mut map = serde_json::Map::new();
    for (key, value) in params {
        map.insert(key, serde_json::Value::String(value));
    }
    serde_json::from_value(serde_json::Value::Object(map))
        .map_err(|e| GatewayError::BadRequest(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_twilio_webhook_maps_fields() {
        let params = vec![
            ("EventType".to_string(), "onMessageAdded".to_string()),
            ("MessageSid".to_string(), "IM1".to_string()),
            ("Author".to_string(), "whatsapp:+15559998888".to_string()),
            ("Unknown".to_string(), "ignored".to_string()),
        ];
        let payload = to_twilio_webhook(params).unwrap();
        assert_eq!(payload.event_type, "onMessageAdded");
        assert_eq!(payload.message_sid.as_deref(), Some("IM1"));
        assert!(payload.body.is_none());
    }

    #[test]
    fn test_missing_event_type_is_bad_request() {
        let err = to_twilio_webhook(vec![("Body".to_string(), "hi".to_string())]).unwrap_err();
        assert!(matches!(err, GatewayError::BadRequest(_)));
    }
}
