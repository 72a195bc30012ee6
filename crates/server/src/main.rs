use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use presence_cache::{MemoryPresenceCache, PresenceCache, RedisPresenceCache};
use serde::Deserialize;
use server_api::{create_chat, dispatch, reject, ApiContext, ConnectionHandle, Session};
use shared::{
    domain::{Conversation, ParticipantModel, UserId},
    error::{ApiError, ErrorCode},
    protocol::decode_client_frame,
};
use storage::Storage;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;

use app_state::AppState;
use config::{load_settings, prepare_database_url, Settings};

const PRESENCE_PURGE_INTERVAL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateChatRequest {
    #[serde(default)]
    sender_id: Option<String>,
    #[serde(default)]
    receiver_id: Option<String>,
    sender_model: ParticipantModel,
    receiver_model: ParticipantModel,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = load_settings()?;
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    let presence = connect_presence_cache(&settings).await;
    let api = ApiContext::with_presence(storage, presence, settings.presence_ttl());

    let state = AppState {
        api,
        outbound_buffer: settings.outbound_buffer,
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.bind_addr.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Falls back to the in-process cache when no URL is configured or the
/// configured cache cannot be reached at startup.
async fn connect_presence_cache(settings: &Settings) -> Arc<dyn PresenceCache> {
    let Some(url) = settings.presence_cache_url.as_deref() else {
        info!("no presence cache configured, using in-process cache");
        return memory_presence_cache();
    };

    match RedisPresenceCache::connect(url).await {
        Ok(cache) => Arc::new(cache),
        Err(error) => {
            warn!(%error, "presence cache unreachable, using in-process cache");
            memory_presence_cache()
        }
    }
}

fn memory_presence_cache() -> Arc<dyn PresenceCache> {
    let cache = Arc::new(MemoryPresenceCache::new());
    tokio::spawn(cache.clone().run_purge(PRESENCE_PURGE_INTERVAL));
    cache
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/chats", post(http_create_chat))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn healthz(
    State(state): State<Arc<AppState>>,
) -> Result<&'static str, (StatusCode, Json<ApiError>)> {
    state.api.storage.health_check().await.map_err(|e| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiError::new(ErrorCode::Unavailable, e.to_string())),
        )
    })?;
    Ok("ok")
}

async fn http_create_chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateChatRequest>,
) -> Result<Json<Conversation>, (StatusCode, Json<ApiError>)> {
    let sender_id = req.sender_id.map(UserId);
    let receiver_id = req.receiver_id.map(UserId);
    let conversation = create_chat(
        &state.api,
        sender_id.as_ref(),
        receiver_id.as_ref(),
        req.sender_model,
        req.receiver_model,
    )
    .await
    .map_err(|e| {
        let error = ApiError::from(e);
        (status_for(error.code), Json(error))
    })?;
    Ok(Json(conversation))
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Validation | ErrorCode::Protocol => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket))
}

async fn ws_connection(state: Arc<AppState>, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (handle, outbound) = ConnectionHandle::channel(state.outbound_buffer);
    let connection_id = handle.id();
    let mut session = Session::new(handle);
    debug!(%connection_id, "connection opened");

    let send_task = tokio::spawn(async move {
        let mut outbound = ReceiverStream::new(outbound);
        while let Some(event) = outbound.next().await {
            let text = match serde_json::to_string(&event) {
                Ok(v) => v,
                Err(error) => {
                    warn!(%connection_id, %error, "failed to encode server event");
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let reason = loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => handle_frame(&state, &mut session, &text).await,
            Some(Ok(Message::Close(frame))) => {
                break frame
                    .map(|frame| frame.reason.to_string())
                    .filter(|reason| !reason.is_empty())
                    .unwrap_or_else(|| "client closed".to_string());
            }
            Some(Ok(Message::Binary(_))) => {
                debug!(%connection_id, "ignoring binary frame");
            }
            Some(Ok(_)) => {}
            Some(Err(error)) => break format!("transport error: {error}"),
            None => break "stream ended".to_string(),
        }
    };

    session.disconnect(&state.api, Some(&reason)).await;
    send_task.abort();
}

/// Frames of one connection are handled in arrival order.
async fn handle_frame(state: &AppState, session: &mut Session, text: &str) {
    let response = match decode_client_frame(text) {
        Ok(frame) => dispatch(&state.api, session, frame).await,
        Err(rejected) => Some(reject(rejected)),
    };
    if let Some(event) = response {
        session.handle().deliver(event);
    }
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;

#[cfg(test)]
#[path = "tests/ws_tests.rs"]
mod ws_tests;
