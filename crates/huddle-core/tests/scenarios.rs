//! End-to-end room behavior through the public service API, on paused time.

use huddle_core::{ChatService, Participant, RoomConfig};
use huddle_protocol::ServerFrame;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;

type Inbox = mpsc::UnboundedReceiver<ServerFrame>;

async fn login(service: &ChatService, room: &str, name: &str) -> (Participant, Inbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    let participant = service
        .login_and_join(room, name, tx)
        .await
        .expect("login should succeed");
    (participant, rx)
}

async fn settle() {
    sleep(Duration::from_millis(1)).await;
}

fn drain(inbox: &mut Inbox) -> Vec<ServerFrame> {
    let mut frames = Vec::new();
    while let Ok(frame) = inbox.try_recv() {
        frames.push(frame);
    }
    frames
}

#[tokio::test(start_paused = true)]
async fn hello_reaches_everyone_else_in_the_room_only() {
    let service = ChatService::new(RoomConfig::default());

    let (alice, mut alice_rx) = login(&service, "Legendary", "Alice").await;
    let (_bob, mut bob_rx) = login(&service, "Legendary", "Bob").await;
    let (_carol, mut carol_rx) = login(&service, "Legendary", "Carol").await;
    let (_stranger, mut stranger_rx) = login(&service, "MetaGames", "Stranger").await;

    alice.send_chat("Hello").unwrap();
    settle().await;

    let hello = ServerFrame::chat("Hello", "Alice");
    assert_eq!(drain(&mut bob_rx), vec![hello.clone()]);
    assert_eq!(drain(&mut carol_rx), vec![hello]);
    assert!(drain(&mut alice_rx).is_empty());
    assert!(drain(&mut stranger_rx).is_empty());
}

#[tokio::test(start_paused = true)]
async fn late_joiner_sees_the_shared_tick_counter() {
    let service = ChatService::new(RoomConfig::default());
    let (_alice, mut alice_rx) = login(&service, "Legendary", "Alice").await;

    sleep(Duration::from_secs(30)).await;
    settle().await;
    assert_eq!(drain(&mut alice_rx), vec![ServerFrame::tick(1)]);

    sleep(Duration::from_secs(15)).await;
    let (_bob, mut bob_rx) = login(&service, "Legendary", "Bob").await;

    sleep(Duration::from_secs(15)).await;
    settle().await;
    assert_eq!(drain(&mut alice_rx), vec![ServerFrame::tick(2)]);
    assert_eq!(drain(&mut bob_rx), vec![ServerFrame::tick(2)]);
}

#[tokio::test(start_paused = true)]
async fn emptied_room_starts_over() {
    let service = ChatService::new(RoomConfig::default());
    let (alice, _alice_rx) = login(&service, "Legendary", "Alice").await;
    let (bob, _bob_rx) = login(&service, "Legendary", "Bob").await;
    let first_room = alice.room().id();

    sleep(Duration::from_secs(61)).await;
    assert_eq!(alice.room().snapshot().await.unwrap().tick, 2);

    alice.disconnect();
    bob.disconnect();
    settle().await;
    assert_eq!(service.stats().await.unwrap().room_count, 0);

    let (dave, mut dave_rx) = login(&service, "Legendary", "Dave").await;
    assert_ne!(dave.room().id(), first_room);

    sleep(Duration::from_secs(31)).await;
    assert_eq!(drain(&mut dave_rx), vec![ServerFrame::tick(1)]);
}

#[tokio::test(start_paused = true)]
async fn rooms_are_isolated() {
    let service = ChatService::new(RoomConfig::default());
    let (alice, _alice_rx) = login(&service, "Legendary", "Alice").await;
    let (stranger, mut stranger_rx) = login(&service, "MetaGames", "Stranger").await;
    let (_bob, mut bob_rx) = login(&service, "Legendary", "Bob").await;

    assert_ne!(alice.room().id(), stranger.room().id());

    alice.send_chat("Legendary only").unwrap();
    settle().await;
    assert!(drain(&mut stranger_rx).is_empty());

    // Emptying one room leaves the other untouched.
    stranger.disconnect();
    settle().await;
    alice.send_chat("still here").unwrap();
    settle().await;

    assert_eq!(
        drain(&mut bob_rx),
        vec![
            ServerFrame::chat("Legendary only", "Alice"),
            ServerFrame::chat("still here", "Alice"),
        ]
    );
    assert_eq!(service.stats().await.unwrap().room_count, 1);
}

#[tokio::test(start_paused = true)]
async fn messages_arrive_in_send_order_under_load() {
    let service = ChatService::new(RoomConfig::default());
    let (alice, _alice_rx) = login(&service, "Legendary", "Alice").await;
    let (_bob, mut bob_rx) = login(&service, "Legendary", "Bob").await;

    let mut noise = Vec::new();
    for i in 0..5 {
        let room = format!("Noise{i}");
        let (talker, talker_rx) = login(&service, &room, "Talker").await;
        let (listener, listener_rx) = login(&service, &room, "Listener").await;
        noise.push((talker, talker_rx, listener, listener_rx));
    }

    for i in 0..10 {
        alice.send_chat(format!("Message{i}")).unwrap();
        for (talker, ..) in &noise {
            talker.send_chat("spam").unwrap();
        }
    }
    settle().await;

    let expected: Vec<_> = (0..10)
        .map(|i| ServerFrame::chat(format!("Message{i}"), "Alice"))
        .collect();
    assert_eq!(drain(&mut bob_rx), expected);

    for (_, _, _, listener_rx) in &mut noise {
        assert_eq!(drain(listener_rx).len(), 10);
    }
}
