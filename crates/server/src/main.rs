use std::{error::Error as StdError, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, Path, State, WebSocketUpgrade,
    },
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use futures::{Sink, Stream, StreamExt};
use rooms::{
    Coordinator, PollCoordinator, PresenceCoordinator, RequestMethod, RoomError, RoomHost,
    RoomRequest, RoomResponse,
};
use shared::{
    domain::{Connection, ConnectionId, PartyKind, RoomId},
    error::{ApiError, ErrorCode},
};
use tokio::{
    task::JoinHandle,
    time::{Duration, MissedTickBehavior},
};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, Settings};

/// Party served by `/party/:room`.
const DEFAULT_PARTY: PartyKind = PartyKind::Poll;

#[derive(Default)]
struct AppState {
    presence: Arc<RoomHost<PresenceCoordinator>>,
    poll: Arc<RoomHost<PollCoordinator>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings();
    let state = Arc::new(AppState::default());
    let sweeper = spawn_idle_sweeper(state.clone(), &settings);
    let app = build_router(state, &settings);

    let addr: SocketAddr = settings
        .server_bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", settings.server_bind))?;
    info!(
        %addr,
        hibernate = settings.hibernate,
        idle_timeout_secs = settings.idle_timeout_secs,
        "server listening"
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    sweeper.abort();
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(%error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

fn build_router(state: Arc<AppState>, settings: &Settings) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/parties/:party/:room", any(party_handler))
        .route("/party/:room", any(default_party_handler))
        .layer(RequestBodyLimitLayer::new(settings.max_body_bytes))
        .with_state(state)
}

/// Drops idle coordinator instances. With hibernation on, rooms with open
/// connections lose their instance too and keep the connections attached.
/// With it off, only rooms nobody is connected to are reclaimed.
fn spawn_idle_sweeper(state: Arc<AppState>, settings: &Settings) -> JoinHandle<()> {
    let hibernate = settings.hibernate;
    let idle = settings.idle_timeout();
    let every = settings.sweep_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let (presence, poll) = sweep_rooms(&state, idle, hibernate).await;
            if presence + poll > 0 {
                debug!(presence, poll, hibernate, "idle sweep evicted rooms");
            }
        }
    })
}

async fn sweep_rooms(state: &AppState, idle: Duration, hibernate: bool) -> (usize, usize) {
    if hibernate {
        (
            state.presence.evict_idle(idle).await,
            state.poll.evict_idle(idle).await,
        )
    } else {
        (
            state.presence.reclaim_idle(idle).await,
            state.poll.reclaim_idle(idle).await,
        )
    }
}

async fn healthz() -> &'static str {
    "ok"
}

/// Everything a party route needs besides the party itself.
struct PartyCall {
    room: String,
    method: Method,
    remote: Option<SocketAddr>,
    upgrade: Option<WebSocketUpgrade>,
    body: Bytes,
}

async fn party_handler(
    State(state): State<Arc<AppState>>,
    Path((party, room)): Path<(String, String)>,
    method: Method,
    remote: Option<ConnectInfo<SocketAddr>>,
    upgrade: Option<WebSocketUpgrade>,
    body: Bytes,
) -> Response {
    let Some(kind) = PartyKind::from_segment(&party) else {
        return api_error(
            StatusCode::NOT_FOUND,
            ApiError::new(ErrorCode::NotFound, format!("unknown party '{party}'")),
        );
    };
    let call = PartyCall {
        room,
        method,
        remote: remote.map(|ConnectInfo(addr)| addr),
        upgrade,
        body,
    };
    dispatch(&state, kind, call).await
}

async fn default_party_handler(
    State(state): State<Arc<AppState>>,
    Path(room): Path<String>,
    method: Method,
    remote: Option<ConnectInfo<SocketAddr>>,
    upgrade: Option<WebSocketUpgrade>,
    body: Bytes,
) -> Response {
    let call = PartyCall {
        room,
        method,
        remote: remote.map(|ConnectInfo(addr)| addr),
        upgrade,
        body,
    };
    dispatch(&state, DEFAULT_PARTY, call).await
}

async fn dispatch(state: &AppState, kind: PartyKind, call: PartyCall) -> Response {
    match kind {
        PartyKind::Presence => serve_party(state.presence.clone(), call).await,
        PartyKind::Poll => serve_party(state.poll.clone(), call).await,
    }
}

async fn serve_party<C: Coordinator>(host: Arc<RoomHost<C>>, call: PartyCall) -> Response {
    let room = match RoomId::new(call.room) {
        Ok(room) => room,
        Err(error) => return room_error(RoomError::from(error)),
    };

    if let Some(upgrade) = call.upgrade {
        let connection = Connection::new(room, call.remote.map(|addr| addr.to_string()));
        return upgrade
            .on_upgrade(move |socket| ws_connection(host, socket, connection))
            .into_response();
    }

    let request = RoomRequest {
        method: RequestMethod::parse(call.method.as_str()),
        body: call.body.to_vec(),
    };
    match host.request(&room, request).await {
        Ok(RoomResponse::Json(body)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Ok(RoomResponse::NotFound) => (StatusCode::NOT_FOUND, "Not found").into_response(),
        Err(error) => {
            warn!(%room, %error, "room request failed");
            room_error(error)
        }
    }
}

fn room_error(error: RoomError) -> Response {
    let status = if error.is_client_fault() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    api_error(status, ApiError::from(error))
}

fn api_error(status: StatusCode, error: ApiError) -> Response {
    (status, Json(error)).into_response()
}

async fn ws_connection<C: Coordinator>(
    host: Arc<RoomHost<C>>,
    socket: WebSocket,
    connection: Connection,
) {
    let (sender, receiver) = socket.split();
    // the close hook runs on its own task and needs no waiting here
    let _closing = serve_socket(host, connection, sender, receiver).await;
}

/// Drives one connection: attaches it, forwards the room's broadcasts to
/// `sink`, and hands every text frame from `frames` to the message hook.
/// Returns the task running the close (or error) hook.
async fn serve_socket<C, S, F, E>(
    host: Arc<RoomHost<C>>,
    connection: Connection,
    sink: S,
    mut frames: F,
) -> JoinHandle<()>
where
    C: Coordinator,
    S: Sink<Message> + Send + 'static,
    S::Error: Send + 'static,
    F: Stream<Item = Result<Message, E>> + Unpin,
    E: StdError + Send + Sync + 'static,
{
    let room = connection.room.clone();
    let id = connection.id;

    let outbound = match host.connect(connection).await {
        Ok(outbound) => outbound,
        Err(error) => {
            error!(%room, connection = %id, %error, "connect hook failed");
            return finish_connection(host, room, id, None::<E>);
        }
    };
    info!(%room, connection = %id, "connection opened");

    let send_task = tokio::spawn(
        UnboundedReceiverStream::new(outbound)
            .map(|text| Ok::<_, S::Error>(Message::Text(text)))
            .forward(sink),
    );

    let mut failure = None;
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if let Err(error) = host.message(&room, id, &text).await {
                    if error.is_client_fault() {
                        debug!(%room, connection = %id, %error, "client message rejected");
                    } else {
                        warn!(%room, connection = %id, %error, "message hook failed");
                    }
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(error) => {
                failure = Some(error);
                break;
            }
        }
    }

    send_task.abort();
    finish_connection(host, room, id, failure)
}

/// Runs the close (or error) hook on its own task so it completes even if the
/// socket task is dropped first.
fn finish_connection<C, E>(
    host: Arc<RoomHost<C>>,
    room: RoomId,
    id: ConnectionId,
    failure: Option<E>,
) -> JoinHandle<()>
where
    C: Coordinator,
    E: StdError + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let result = match &failure {
            Some(error) => host.error(&room, id, error).await,
            None => host.close(&room, id).await,
        };
        match result {
            Ok(()) => info!(%room, connection = %id, "connection closed"),
            Err(error) => warn!(%room, connection = %id, %error, "close hook failed"),
        }
    })
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
