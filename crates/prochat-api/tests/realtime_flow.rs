mod support;

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use uuid::Uuid;

use prochat_db::{MessageStore, NewUser};

use support::test_app;

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn send(socket: &mut Socket, event: &str, data: Value) {
    let frame = json!({ "event": event, "data": data }).to_string();
    socket.send(Message::Text(frame.into())).await.expect("send frame");
}

async fn next_event(socket: &mut Socket) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for event")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).expect("json event");
        }
    }
}

async fn assert_silent(socket: &mut Socket) {
    let got = timeout(Duration::from_millis(200), socket.next()).await;
    assert!(got.is_err(), "unexpected frame: {:?}", got);
}

#[tokio::test]
async fn message_fans_out_to_sender_and_recipient_room() {
    let app = test_app();
    let dispatcher = app.state.dispatcher.clone();
    let db = app.state.db.clone();

    let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());
    for (id, name) in [(u1, "u1"), (u2, "u2")] {
        let email = format!("{name}@example.com");
        db.create_user(&NewUser {
            id,
            name,
            email: &email,
            password_hash: "unused",
            handle: name,
        })
        .unwrap();
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let router = app.router.clone();
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    let url = format!("ws://{addr}/socket");
    let (mut conn1, _) = connect_async(url.as_str()).await.expect("connect 1");
    let (mut conn2, _) = connect_async(url.as_str()).await.expect("connect 2");

    send(&mut conn1, "join", json!(u1)).await;
    send(&mut conn2, "join", json!(u2)).await;

    // joins on different sockets are not ordered against each other
    for _ in 0..50 {
        if dispatcher.room_size(u1).await == 1 && dispatcher.room_size(u2).await == 1 {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(dispatcher.room_size(u2).await, 1);

    send(
        &mut conn1,
        "sendMessage",
        json!({ "senderId": u1, "recipientId": u2, "text": "hello" }),
    )
    .await;

    let to_sender = next_event(&mut conn1).await;
    let to_recipient = next_event(&mut conn2).await;
    assert_eq!(to_sender["event"], "newMessage");
    assert_eq!(to_sender["data"]["text"], "hello");
    assert_eq!(to_recipient, to_sender);
    assert_eq!(to_recipient["data"]["sender"]["userId"], "u1");

    let stored = db.conversation(u1, u2).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!((stored[0].sender, stored[0].recipient), (u1, u2));
    assert_eq!(stored[0].text, "hello");

    // typing goes to the recipient only
    send(
        &mut conn1,
        "typing",
        json!({ "userId": u1, "recipientId": u2, "isTyping": true }),
    )
    .await;
    let typing = next_event(&mut conn2).await;
    assert_eq!(typing, json!({ "event": "userTyping", "data": { "userId": u1, "isTyping": true } }));
    assert_silent(&mut conn1).await;

    // blank text never reaches the store
    send(
        &mut conn1,
        "sendMessage",
        json!({ "senderId": u1, "recipientId": u2, "text": "   " }),
    )
    .await;
    let error = next_event(&mut conn1).await;
    assert_eq!(error, json!({ "event": "messageError", "data": { "error": "Missing required fields" } }));
    assert_eq!(db.conversation(u1, u2).unwrap().len(), 1);

    // so does an id that is not a uuid
    send(
        &mut conn1,
        "sendMessage",
        json!({ "senderId": "", "recipientId": u2, "text": "hi" }),
    )
    .await;
    let error = next_event(&mut conn1).await;
    assert_eq!(error["data"]["error"], "Missing required fields");
    assert_eq!(db.conversation(u1, u2).unwrap().len(), 1);

    // closing a socket removes it from its room
    conn2.close(None).await.ok();
    for _ in 0..50 {
        if dispatcher.room_size(u2).await == 0 {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(dispatcher.room_size(u2).await, 0);
}

#[tokio::test]
async fn presence_is_broadcast_to_other_clients() {
    let app = test_app();
    let dispatcher = app.state.dispatcher.clone();

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let router = app.router.clone();
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    let url = format!("ws://{addr}/socket");
    let (mut conn1, _) = connect_async(url.as_str()).await.expect("connect 1");
    let (mut conn2, _) = connect_async(url.as_str()).await.expect("connect 2");

    for _ in 0..50 {
        if dispatcher.connection_count().await == 2 {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }

    let user = Uuid::new_v4();
    send(&mut conn1, "userOnline", json!(user)).await;

    let status = next_event(&mut conn2).await;
    assert_eq!(status, json!({ "event": "userStatus", "data": { "userId": user, "status": "online" } }));
    assert_silent(&mut conn1).await;
}
