//! Hub integration tests
//!
//! Drive the hub through its public handle the way the WebSocket sessions
//! and the event trigger do, without starting a server.

use std::collections::HashSet;

use serde_json::{json, Value};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio_test::{assert_err, assert_ok};

use devsync_realtime::hub::{
    ConnectionId, Event, EventKind, Hub, HubError, Identity, Outbound, ProjectId, Registration,
    UserId,
};

async fn connect(
    hub: &Hub,
    user_id: UserId,
    project_id: ProjectId,
    capacity: usize,
) -> (ConnectionId, mpsc::Receiver<Outbound>) {
    let (registration, rx) = Registration::channel(
        Identity {
            user_id,
            project_id,
        },
        capacity,
    );
    let id = registration.id;
    assert_ok!(hub.register(registration).await);
    (id, rx)
}

fn drain_events(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Value> {
    let mut events = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        if let Outbound::Event(text) = frame {
            events.push(serde_json::from_str(&text).unwrap());
        }
    }
    events
}

#[tokio::test]
async fn test_project_fanout_end_to_end() {
    let (hub, _dispatcher) = Hub::spawn(64);

    let (_, mut alice) = connect(&hub, 1, 7, 16).await;
    let (_, mut bob) = connect(&hub, 2, 7, 16).await;
    let (_, mut alice_second_tab) = connect(&hub, 1, 7, 16).await;
    let (_, mut outsider) = connect(&hub, 3, 8, 16).await;

    assert_ok!(
        hub.dispatch(
            Event::record(EventKind::TaskCreated, 7, json!({"id": 11, "title": "Write docs"}))
                .with_user(2)
        )
        .await
    );
    assert_ok!(hub.dispatch(Event::deleted(EventKind::FileDeleted, 7, 5)).await);
    assert_ok!(
        hub.dispatch(Event::record(EventKind::SprintUpdated, 8, json!({"id": 3})))
            .await
    );

    // Commands are processed in order, so stats doubles as a barrier
    let stats = assert_ok!(hub.stats().await);
    assert_eq!(stats.total_connections, 4);
    assert_eq!(stats.unique_users, 3);
    assert_eq!(stats.events_dispatched, 3);
    assert_eq!(stats.deliveries, 7);

    for rx in [&mut alice, &mut bob, &mut alice_second_tab] {
        let events = drain_events(rx);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["type"], "task_created");
        assert_eq!(events[0]["user_id"], 2);
        assert_eq!(events[0]["data"]["title"], "Write docs");
        assert_eq!(events[1]["type"], "file_deleted");
        assert_eq!(events[1]["data"], json!({"id": 5}));
        assert!(events[1].get("user_id").is_none());
    }

    let events = drain_events(&mut outsider);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["project_id"], 8);
}

#[tokio::test]
async fn test_raw_submissions_from_the_crud_layer() {
    let (hub, _dispatcher) = Hub::spawn(64);
    let (_, mut rx) = connect(&hub, 1, 42, 16).await;

    hub.submit(br#"{"type":"chat_message","project_id":42,"user_id":9,"data":{"text":"hi"}}"#)
        .await;
    hub.submit(b"not json at all").await;
    hub.submit(br#"{"type":"task_exploded","project_id":42,"data":{}}"#)
        .await;
    hub.submit(br#"{"type":"task_deleted","project_id":42,"data":{}}"#)
        .await;
    hub.submit(br#"{"type":"task_deleted","project_id":42,"data":{"id":77}}"#)
        .await;

    let stats = assert_ok!(hub.stats().await);
    assert_eq!(stats.events_dispatched, 2);

    let events = drain_events(&mut rx);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["type"], "chat_message");
    assert_eq!(events[0]["data"]["text"], "hi");
    assert_eq!(events[1]["type"], "task_deleted");
    assert_eq!(events[1]["data"]["id"], 77);
}

#[tokio::test]
async fn test_stalled_consumer_does_not_hold_back_the_project() {
    let (hub, _dispatcher) = Hub::spawn(64);
    let (stalled_id, _stalled_rx) = connect(&hub, 1, 7, 2).await;
    let (_, mut healthy) = connect(&hub, 2, 7, 64).await;

    for i in 0..10 {
        assert_ok!(
            hub.dispatch(Event::record(EventKind::TaskUpdated, 7, json!({"id": i})))
                .await
        );
    }

    let stats = assert_ok!(hub.stats().await);
    assert_eq!(stats.total_connections, 1);
    assert_eq!(stats.evictions, 1);

    let ids: Vec<u64> = drain_events(&mut healthy)
        .iter()
        .map(|e| e["data"]["id"].as_u64().unwrap())
        .collect();
    assert_eq!(ids, (0..10).collect::<Vec<u64>>());

    let remaining = assert_ok!(hub.connections(7).await);
    assert!(remaining.iter().all(|c| c.connection_id != stalled_id));
}

#[tokio::test]
async fn test_concurrent_sessions_come_and_go() {
    let (hub, _dispatcher) = Hub::spawn(256);

    let mut handles = Vec::new();
    for n in 0..50u64 {
        let hub = hub.clone();
        handles.push(tokio::spawn(async move {
            let (id, rx) = connect(&hub, n, n % 5, 8).await;
            hub.unregister(id).await;
            // Teardown may race with another path that already removed it
            hub.unregister(id).await;
            drop(rx);
            id
        }));
    }

    let mut ids = HashSet::new();
    for handle in handles {
        ids.insert(handle.await.unwrap());
    }
    assert_eq!(ids.len(), 50);

    let stats = assert_ok!(hub.stats().await);
    assert_eq!(stats.total_connections, 0);
    assert!(stats.projects.is_empty());
}

#[tokio::test]
async fn test_peer_frames_are_scoped_to_the_session() {
    let (hub, _dispatcher) = Hub::spawn(64);
    let sender = Identity {
        user_id: 5,
        project_id: 7,
    };
    let (_, mut same_project) = connect(&hub, 6, 7, 16).await;
    let (_, mut other_project) = connect(&hub, 6, 9, 16).await;

    hub.submit_from(
        br#"{"type":"chat_message","project_id":7,"user_id":999,"data":{"text":"standup"}}"#,
        &sender,
    )
    .await;
    hub.submit_from(
        br#"{"type":"chat_message","project_id":9,"data":{"text":"sneaky"}}"#,
        &sender,
    )
    .await;

    assert_ok!(hub.stats().await);

    let events = drain_events(&mut same_project);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["user_id"], 5);
    assert!(matches!(other_project.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn test_shutdown_closes_everything() {
    let (hub, dispatcher) = Hub::spawn(64);
    let (_, mut a) = connect(&hub, 1, 7, 4).await;
    let (_, mut b) = connect(&hub, 2, 8, 4).await;

    let closed = assert_ok!(hub.shutdown("maintenance").await);
    assert_eq!(closed, 2);

    for rx in [&mut a, &mut b] {
        assert_eq!(
            rx.recv().await,
            Some(Outbound::Close {
                reason: "maintenance".to_string()
            })
        );
        assert_eq!(rx.recv().await, None);
    }

    assert!(dispatcher.await.is_ok());
    assert!(!hub.is_running());

    let err = assert_err!(
        hub.dispatch(Event::record(EventKind::TaskCreated, 7, json!({})))
            .await
    );
    assert_eq!(err, HubError::Closed);

    let (registration, _rx) = Registration::channel(
        Identity {
            user_id: 1,
            project_id: 7,
        },
        4,
    );
    assert_eq!(hub.register(registration).await, Err(HubError::Closed));
}
