use crate::auth;
use crate::config::{BasicCredentials, Config};
use crate::error::Error;
use crate::feed::FeedSession;
use crate::ingest::{IngestOutcome, Ingestor};
use crate::live::{FeedSelector, LiveFeed};
use crate::retention;
use crate::store::LogStore;
use crate::types::{CapturedHeaders, RecordId, WebhookRecord};
use crate::viewer;
use async_stream::stream;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use uuid::Uuid;

pub const WEBHOOK_PATH: &str = "/api/novu/email-webhook";

type StreamSessions = Arc<Mutex<HashMap<Uuid, FeedSelector>>>;

#[derive(Clone)]
struct ServerState {
    ingestor: Ingestor,
    store: Arc<dyn LogStore>,
    poll_interval: Duration,
    /// Open `/api/emails/stream` connections, keyed by the id announced in
    /// their `session` event.
    sessions: StreamSessions,
}

/// Removes a stream's selector from the registry when the stream is dropped.
struct SessionGuard {
    id: Uuid,
    sessions: StreamSessions,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(&self.id);
        }
        tracing::debug!(session = %self.id, "feed stream closed");
    }
}

#[derive(Debug, Deserialize)]
struct ViewQuery {
    id: Option<RecordId>,
}

#[derive(Debug, Deserialize)]
struct StreamQuery {
    selected: Option<RecordId>,
}

#[derive(Debug, Deserialize)]
struct SelectRequest {
    id: RecordId,
}

/// Build the application router. Everything except the webhook route sits
/// behind the basic-auth gate.
pub fn router(config: &Config, store: Arc<dyn LogStore>) -> Router {
    let state = ServerState {
        ingestor: Ingestor::new(config.webhook_secret.as_str(), store.clone()),
        store,
        poll_interval: config.poll_interval,
        sessions: StreamSessions::default(),
    };
    let credentials: Arc<Option<BasicCredentials>> = Arc::new(config.basic_auth.clone());

    let viewer = Router::new()
        .route("/", get(handle_page))
        .route("/api/emails", get(handle_snapshot))
        .route("/api/emails/stream", get(handle_stream))
        .route("/api/emails/stream/{session_id}/select", post(handle_select))
        .route_layer(middleware::from_fn_with_state(credentials, auth::basic_auth));

    Router::new()
        .route(WEBHOOK_PATH, post(handle_webhook))
        .merge(viewer)
        .with_state(state)
}

/// Bind `addr` and serve until the listener fails.
pub async fn serve(addr: SocketAddr, app: Router) -> crate::error::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "HTTP server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn header_str(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

fn captured_headers(headers: &HeaderMap) -> CapturedHeaders {
    CapturedHeaders {
        signature: header_str(headers, "x-novu-signature"),
        content_type: header_str(headers, "content-type"),
        user_agent: header_str(headers, "user-agent"),
    }
}

async fn handle_webhook(
    State(state): State<ServerState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match state.ingestor.ingest(&body, captured_headers(&headers)).await {
        IngestOutcome::Accepted { .. } => Json(json!({ "ok": true })).into_response(),
        IngestOutcome::Unauthorized => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "ok": false, "error": Error::InvalidSignature.to_string() })),
        )
            .into_response(),
        IngestOutcome::ServerError(message) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "ok": false, "error": message })),
        )
            .into_response(),
    }
}

async fn handle_snapshot(State(state): State<ServerState>) -> Json<Vec<WebhookRecord>> {
    Json(retention::load_snapshot(state.store.as_ref(), Utc::now()).await)
}

async fn handle_page(
    State(state): State<ServerState>,
    Query(query): Query<ViewQuery>,
) -> Html<String> {
    let now = Utc::now();
    let snapshot = retention::load_snapshot(state.store.as_ref(), now).await;
    let session = FeedSession::new(snapshot, query.id, now);
    Html(viewer::render_page(session.view()))
}

/// One live feed per connection; it is torn down when the client goes away
/// and the stream is dropped.
///
/// Emits a `session` event carrying the id used by the select endpoint, then
/// `feed` (the view as JSON) and `page` (the rendered inbox) on every rebuild.
async fn handle_stream(
    State(state): State<ServerState>,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let snapshot = retention::load_snapshot(state.store.as_ref(), Utc::now()).await;
    let live = LiveFeed::spawn(
        state.store.clone(),
        snapshot,
        query.selected,
        state.poll_interval,
    );
    let mut views = live.watch();

    let session_id = Uuid::new_v4();
    if let Ok(mut sessions) = state.sessions.lock() {
        sessions.insert(session_id, live.selector());
    }
    let guard = SessionGuard {
        id: session_id,
        sessions: state.sessions.clone(),
    };
    tracing::debug!(session = %session_id, "feed stream opened");

    let stream = stream! {
        let _live = live;
        let _guard = guard;
        yield Ok(Event::default().event("session").data(session_id.to_string()));
        loop {
            let view = views.borrow_and_update().clone();
            match Event::default().event("feed").json_data(&view) {
                Ok(event) => yield Ok(event),
                Err(e) => tracing::error!(error = %e, "failed to encode feed view"),
            }
            yield Ok(Event::default().event("page").data(viewer::render_inbox(&view)));
            if views.changed().await.is_err() {
                break;
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Forward an explicit selection to an open stream.
async fn handle_select(
    State(state): State<ServerState>,
    Path(session_id): Path<String>,
    Json(request): Json<SelectRequest>,
) -> StatusCode {
    let Ok(session_id) = Uuid::parse_str(&session_id) else {
        return StatusCode::NOT_FOUND;
    };
    let selector = match state.sessions.lock() {
        Ok(sessions) => sessions.get(&session_id).cloned(),
        Err(_) => None,
    };
    match selector {
        Some(selector) if selector.select(request.id) => StatusCode::NO_CONTENT,
        _ => StatusCode::NOT_FOUND,
    }
}
