use super::*;
use serde_json::{json, Value};
use shared::domain::RoomId;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server() -> (SocketAddr, ApiContext) {
    let api = ApiContext::new(Storage::new("sqlite::memory:").await.expect("db"));
    let app = build_router(Arc::new(AppState {
        api: api.clone(),
        outbound_buffer: 32,
    }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    (addr, api)
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("connect");
    client
}

async fn send(client: &mut Client, frame: Value) {
    client
        .send(WsMessage::Text(frame.to_string()))
        .await
        .expect("send frame");
}

async fn next_event(client: &mut Client) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("event before timeout")
            .expect("open stream")
            .expect("frame");
        if let WsMessage::Text(text) = message {
            return serde_json::from_str(&text).expect("json event");
        }
    }
}

async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached");
}

async fn register(client: &mut Client, user: &str, name: &str) -> Value {
    send(
        client,
        json!({"event": "register", "ack": 1, "data": {"userId": user, "name": name}}),
    )
    .await;
    let event = next_event(client).await;
    assert_eq!(event["event"], "ack");
    event["data"]["response"].clone()
}

#[tokio::test]
async fn two_clients_exchange_a_message_over_the_socket() {
    let (addr, api) = spawn_server().await;
    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;

    assert_eq!(register(&mut alice, "u1", "Alice").await, json!([]));
    assert_eq!(register(&mut bob, "u2", "Bob").await, json!([]));

    for client in [&mut alice, &mut bob] {
        send(client, json!({"event": "joinRoom", "data": {"roomId": "u1u2"}})).await;
    }
    let room = RoomId::for_participants(&UserId::from("u1"), &UserId::from("u2"));
    wait_until(|| {
        let api = api.clone();
        let room = room.clone();
        async move { api.rooms.member_count(&room).await == 2 }
    })
    .await;

    send(
        &mut alice,
        json!({
            "event": "sendMessage",
            "ack": 2,
            "data": {
                "sendMessage": {"messageContent": "hey", "senderId": "u1", "senderModel": "client"},
                "roomId": "u1u2",
                "receiverId": "u2",
                "receiverModel": "vendors"
            }
        }),
    )
    .await;

    let echoed = next_event(&mut alice).await;
    assert_eq!(echoed["event"], "receiveMessage");
    let ack = next_event(&mut alice).await;
    assert_eq!(ack["data"]["id"], 2);
    assert_eq!(ack["data"]["event"], "sendMessage");
    let sent = &ack["data"]["response"];
    assert_eq!(sent["messageContent"], "hey");
    assert_eq!(sent["chatId"], echoed["data"]["chatId"]);

    let received = next_event(&mut bob).await;
    assert_eq!(received["event"], "receiveMessage");
    assert_eq!(received["data"], *sent);
    let notification = next_event(&mut bob).await;
    assert_eq!(notification["event"], "notification");
    assert_eq!(notification["data"]["from"], "Alice");
    assert_eq!(notification["data"]["message"], "hey");

    let pending = api
        .storage
        .find_pending(&UserId::from("u2"))
        .await
        .expect("pending");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].from, UserId::from("u1"));
}

#[tokio::test]
async fn malformed_frames_get_an_error_and_the_socket_stays_open() {
    let (addr, _api) = spawn_server().await;
    let mut client = connect(addr).await;

    client
        .send(WsMessage::Text("{not json".into()))
        .await
        .expect("send");
    let error = next_event(&mut client).await;
    assert_eq!(error["event"], "error");
    assert_eq!(error["data"]["code"], "protocol");

    send(&mut client, json!({"event": "joinRoom", "data": {}})).await;
    let error = next_event(&mut client).await;
    assert_eq!(error["event"], "error");
    assert_eq!(error["data"]["code"], "validation");

    assert_eq!(register(&mut client, "u1", "Alice").await, json!([]));
}

#[tokio::test]
async fn closing_the_socket_unregisters_the_user() {
    let (addr, api) = spawn_server().await;
    let mut client = connect(addr).await;
    register(&mut client, "u1", "Alice").await;
    assert!(api.registry.get(&UserId::from("u1")).await.is_some());

    client.close(None).await.expect("close");

    wait_until(|| {
        let api = api.clone();
        async move { api.registry.get(&UserId::from("u1")).await.is_none() }
    })
    .await;
}

#[tokio::test]
async fn backlog_is_returned_when_an_offline_receiver_registers() {
    let (addr, _api) = spawn_server().await;
    let mut alice = connect(addr).await;
    register(&mut alice, "u1", "Alice").await;

    send(
        &mut alice,
        json!({
            "event": "sendMessage",
            "data": {
                "sendMessage": {"messageContent": "is the venue free?", "senderId": "u1", "senderModel": "client"},
                "receiverId": "u2",
                "receiverModel": "vendors"
            }
        }),
    )
    .await;
    let ack = next_event(&mut alice).await;
    assert_eq!(ack["event"], "ack");
    assert!(ack["data"].get("id").is_none());

    let mut bob = connect(addr).await;
    let backlog = register(&mut bob, "u2", "Bob").await;
    assert_eq!(backlog.as_array().map(Vec::len), Some(1));
    assert_eq!(backlog[0]["message"], "is the venue free?");
    assert_eq!(backlog[0]["read"], false);
}
