use std::sync::Arc;

use async_trait::async_trait;
use shared::domain::{ConnectionId, RoomId};
use tokio::sync::mpsc::UnboundedReceiver;

use super::*;
use crate::{
    error::TransportError,
    transport::{LocalTransport, RoomTransport},
};

fn lobby() -> RoomId {
    RoomId::new("lobby").expect("room")
}

fn coordinator(transport: &Arc<LocalTransport>) -> PresenceCoordinator {
    let transport: Arc<dyn RoomTransport> = transport.clone();
    PresenceCoordinator::create(RoomContext::new(lobby(), transport))
}

async fn join(transport: &LocalTransport) -> (Connection, UnboundedReceiver<String>) {
    let connection = Connection::new(lobby(), None);
    let rx = transport.attach(connection.clone()).await;
    (connection, rx)
}

fn last_total(rx: &mut UnboundedReceiver<String>) -> Option<u64> {
    let mut last = None;
    while let Ok(payload) = rx.try_recv() {
        let state: PresenceState = serde_json::from_str(&payload).expect("presence json");
        last = Some(state.total);
    }
    last
}

struct BrokenTransport;

#[async_trait]
impl RoomTransport for BrokenTransport {
    async fn connections(&self, _room: &RoomId) -> Result<Vec<Connection>, TransportError> {
        Err(TransportError::Enumeration("platform unavailable".into()))
    }

    async fn broadcast(&self, _room: &RoomId, _payload: &str) -> usize {
        0
    }

    async fn send(
        &self,
        _room: &RoomId,
        connection: ConnectionId,
        _payload: &str,
    ) -> Result<(), TransportError> {
        Err(TransportError::Closed(connection))
    }
}

#[tokio::test]
async fn rehydration_counts_open_connections_without_broadcasting() {
    let transport = Arc::new(LocalTransport::new());
    let mut receivers = Vec::new();
    for _ in 0..3 {
        receivers.push(join(&transport).await.1);
    }

    let mut presence = coordinator(&transport);
    presence.on_start().await.expect("start");
    assert_eq!(presence.state().total, 3);
    for rx in &mut receivers {
        assert_eq!(last_total(rx), None);
    }
}

#[tokio::test]
async fn rehydration_overrides_prior_count() {
    let transport = Arc::new(LocalTransport::new());
    let (_a, _rx_a) = join(&transport).await;
    let (_b, _rx_b) = join(&transport).await;

    let mut presence = coordinator(&transport);
    for _ in 0..5 {
        presence
            .on_connect(&Connection::new(lobby(), None))
            .await
            .expect("connect");
    }
    assert_eq!(presence.state().total, 5);

    presence.on_start().await.expect("start");
    assert_eq!(presence.state().total, 2);
}

#[tokio::test]
async fn failed_enumeration_leaves_zero_state() {
    let mut presence =
        PresenceCoordinator::create(RoomContext::new(lobby(), Arc::new(BrokenTransport)));
    let err = presence.on_start().await.expect_err("should fail");
    assert!(matches!(err, RoomError::Transport(TransportError::Enumeration(_))));
    assert_eq!(presence.state().total, 0);
}

#[tokio::test]
async fn connect_broadcasts_to_everyone_including_newcomer() {
    let transport = Arc::new(LocalTransport::new());
    let mut presence = coordinator(&transport);
    presence.on_start().await.expect("start");

    let (first, mut rx_first) = join(&transport).await;
    presence.on_connect(&first).await.expect("connect");
    assert_eq!(last_total(&mut rx_first), Some(1));

    let (second, mut rx_second) = join(&transport).await;
    presence.on_connect(&second).await.expect("connect");
    assert_eq!(last_total(&mut rx_first), Some(2));
    assert_eq!(last_total(&mut rx_second), Some(2));
}

#[tokio::test]
async fn close_broadcasts_to_remaining_and_never_goes_negative() {
    let transport = Arc::new(LocalTransport::new());
    let mut presence = coordinator(&transport);
    presence.on_start().await.expect("start");

    let (stay, mut rx_stay) = join(&transport).await;
    presence.on_connect(&stay).await.expect("connect");
    let (leave, _rx_leave) = join(&transport).await;
    presence.on_connect(&leave).await.expect("connect");

    transport.detach(&lobby(), leave.id).await;
    presence.on_close(&leave).await.expect("close");
    assert_eq!(last_total(&mut rx_stay), Some(1));

    presence.on_close(&leave).await.expect("close");
    presence.on_close(&leave).await.expect("close");
    assert_eq!(presence.state().total, 0);
    assert_eq!(last_total(&mut rx_stay), Some(0));
}

#[tokio::test]
async fn error_has_the_same_effect_as_close() {
    let transport = Arc::new(LocalTransport::new());
    let mut via_close = coordinator(&transport);
    let mut via_error = coordinator(&transport);
    let connection = Connection::new(lobby(), None);
    for presence in [&mut via_close, &mut via_error] {
        presence.on_connect(&connection).await.expect("connect");
        presence.on_connect(&connection).await.expect("connect");
    }

    via_close.on_close(&connection).await.expect("close");
    let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
    via_error
        .on_error(&connection, &reset)
        .await
        .expect("error");
    assert_eq!(via_close.state(), via_error.state());
    assert_eq!(via_error.state().total, 1);
}

#[tokio::test]
async fn presence_does_not_serve_requests_or_messages() {
    let transport = Arc::new(LocalTransport::new());
    let mut presence = coordinator(&transport);
    let connection = Connection::new(lobby(), None);
    presence.on_connect(&connection).await.expect("connect");

    let response = presence
        .on_request(crate::coordinator::RoomRequest::get())
        .await
        .expect("request");
    assert_eq!(response, crate::coordinator::RoomResponse::NotFound);
    presence
        .on_message(&connection, "{\"type\":\"vote\",\"option\":0}")
        .await
        .expect("ignored");
    assert_eq!(presence.state().total, 1);
}
