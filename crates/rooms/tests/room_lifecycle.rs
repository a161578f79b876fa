use std::{sync::Arc, time::Duration};

use rooms::{PollCoordinator, PresenceCoordinator, RoomHost, RoomRequest, RoomResponse};
use shared::{
    domain::{Connection, ConnectionId, RoomId},
    protocol::PollState,
};
use tokio::sync::mpsc::UnboundedReceiver;

fn room(name: &str) -> RoomId {
    RoomId::new(name).expect("room")
}

/// Small xorshift so the event order is arbitrary but reproducible.
struct Shuffle(u64);

impl Shuffle {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }
}

#[tokio::test]
async fn interleaved_connects_closes_and_evictions_settle_to_open_count() {
    let host = RoomHost::<PresenceCoordinator>::new();
    let mut open: Vec<(ConnectionId, _)> = Vec::new();
    let mut rng = Shuffle(0x5eed_cafe);

    for step in 0..400 {
        match rng.next() % 7 {
            0..=3 => {
                let connection = Connection::new(room("mixed"), None);
                let id = connection.id;
                let rx = host.connect(connection).await.expect("connect");
                open.push((id, rx));
            }
            4 | 5 if !open.is_empty() => {
                let index = (rng.next() as usize) % open.len();
                let (id, _rx) = open.swap_remove(index);
                host.close(&room("mixed"), id).await.expect("close");
            }
            _ => {
                host.evict(&room("mixed")).await;
            }
        }

        if step % 50 == 0 {
            host.evict(&room("mixed")).await;
        }
    }

    let total = match host.inspect(&room("mixed"), |c| c.state().total).await {
        Some(total) => total,
        None => {
            host.request(&room("mixed"), RoomRequest::get())
                .await
                .expect("wake");
            host.inspect(&room("mixed"), |c| c.state().total)
                .await
                .expect("resident")
        }
    };
    assert_eq!(total, open.len() as u64);
    assert_eq!(
        host.transport().connection_count(&room("mixed")).await,
        open.len()
    );
}

#[tokio::test]
async fn concurrent_joins_and_leaves_settle_to_open_count() {
    let host = Arc::new(RoomHost::<PresenceCoordinator>::new());
    let mut leavers = Vec::new();
    for _ in 0..20 {
        let connection = Connection::new(room("rush"), None);
        let id = connection.id;
        let rx = host.connect(connection).await.expect("connect");
        leavers.push((id, rx));
    }

    let mut tasks = Vec::new();
    for (id, rx) in leavers {
        let host = host.clone();
        tasks.push(tokio::spawn(async move {
            drop(rx);
            host.close(&room("rush"), id).await.expect("close");
            None::<UnboundedReceiver<String>>
        }));
    }
    for _ in 0..30 {
        let host = host.clone();
        tasks.push(tokio::spawn(async move {
            Some(
                host.connect(Connection::new(room("rush"), None))
                    .await
                    .expect("connect"),
            )
        }));
    }

    let mut stayers = Vec::new();
    for task in tasks {
        if let Some(rx) = task.await.expect("join") {
            stayers.push(rx);
        }
    }

    let total = host
        .inspect(&room("rush"), |c| c.state().total)
        .await
        .expect("resident");
    assert_eq!(total, 30);
    assert_eq!(stayers.len(), 30);
}

#[tokio::test]
async fn poll_room_survives_full_session() {
    let host = RoomHost::<PollCoordinator>::new();
    let poll_room = room("ab12cd34");

    let missing = host
        .request(&poll_room, RoomRequest::get())
        .await
        .expect("read");
    assert_eq!(missing, RoomResponse::NotFound);

    host.request(
        &poll_room,
        RoomRequest::post(r#"{"title":"Tabs or spaces","options":["Tabs","Spaces"]}"#),
    )
    .await
    .expect("create");

    let voter = Connection::new(poll_room.clone(), None);
    let voter_id = voter.id;
    let mut rx = host.connect(voter).await.expect("connect");
    for option in [1, 1, 0, 7] {
        let _ = host
            .message(
                &poll_room,
                voter_id,
                &format!(r#"{{"type":"vote","option":{option}}}"#),
            )
            .await;
    }

    let mut last = None;
    while let Ok(payload) = rx.try_recv() {
        last = Some(serde_json::from_str::<PollState>(&payload).expect("json"));
    }
    let last = last.expect("broadcasts");
    assert_eq!(last.total, 1);
    assert_eq!(last.poll.expect("poll").votes(), &[1, 2]);

    let read = host
        .request(&poll_room, RoomRequest::get())
        .await
        .expect("read");
    let RoomResponse::Json(body) = read else {
        panic!("poll should exist");
    };
    let body: serde_json::Value = serde_json::from_str(&body).expect("json");
    assert_eq!(body["votes"], serde_json::json!([1, 2]));

    host.close(&poll_room, voter_id).await.expect("close");
    assert_eq!(host.evict_idle(Duration::ZERO).await, 1);
    assert_eq!(host.room_count().await, 0);
}
