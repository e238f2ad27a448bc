use std::net::SocketAddr;
use std::time::Duration;

use actions::Action;
use frames::Status;
use futures::{SinkExt, StreamExt};
use peer::{ConnectOptions, Endpoint, Peer, connect};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::*;
use crate::state::test_helpers::{draw, test_app_state};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn serve() -> (AppState, SocketAddr) {
    let state = test_app_state();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = crate::routes::app(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (state, addr)
}

fn url(addr: SocketAddr) -> String {
    format!("ws://{addr}/ws")
}

async fn guest(addr: SocketAddr, room: &str, name: &str) -> Peer {
    let opts = ConnectOptions::new(Endpoint::Broker { url: url(addr) }, name).with_room(room);
    connect(opts).await.expect("connect")
}

async fn recv(peer: &mut Peer) -> Action {
    timeout(Duration::from_secs(1), peer.recv())
        .await
        .expect("receive timed out")
        .expect("connection closed")
}

async fn assert_silent(peer: &mut Peer) {
    assert!(timeout(Duration::from_millis(80), peer.recv()).await.is_err(), "expected nothing");
}

async fn raw_client(addr: SocketAddr) -> Client {
    let (mut client, _) = connect_async(url(addr)).await.expect("connect");
    let hello = recv_frame(&mut client).await;
    assert_eq!(hello.syscall, frames::SYSCALL_CONNECTED);
    client
}

async fn send_raw(client: &mut Client, frame: &Frame) {
    client
        .send(WsMessage::Text(frames::encode_frame(frame).into()))
        .await
        .expect("send");
}

async fn recv_frame(client: &mut Client) -> Frame {
    loop {
        let message = timeout(Duration::from_secs(1), client.next())
            .await
            .expect("frame timed out")
            .expect("socket closed")
            .expect("socket error");
        if let WsMessage::Text(text) = message {
            return frames::decode_frame(text.as_str()).expect("frame");
        }
    }
}

#[tokio::test]
async fn broker_guests_share_a_room() {
    let (state, addr) = serve().await;

    let mut a = guest(addr, "ROOM1", "A").await;
    assert_eq!(recv(&mut a).await, Action::UserList { names: vec!["A".into()] });
    let mut b = guest(addr, "ROOM1", "B").await;
    assert_eq!(recv(&mut a).await, Action::UserList { names: vec!["A".into(), "B".into()] });
    recv(&mut b).await;

    a.send(&draw(1)).expect("send");
    assert_eq!(recv(&mut b).await, draw(1));
    assert_silent(&mut a).await;

    b.send(&Action::Clear).expect("send");
    assert_eq!(recv(&mut a).await, Action::Clear);
    assert_eq!(recv(&mut b).await, Action::Clear);

    let room = state.rooms.get("ROOM1").await.expect("room");
    assert_eq!(room.snapshot().await.expect("snapshot").history_len, 0);
}

#[tokio::test]
async fn rooms_are_isolated() {
    let (_state, addr) = serve().await;

    let mut a = guest(addr, "ONE", "A").await;
    recv(&mut a).await;
    let mut b = guest(addr, "TWO", "B").await;
    recv(&mut b).await;

    a.send(&draw(1)).expect("send");
    assert_silent(&mut b).await;
}

#[tokio::test]
async fn closing_a_guest_updates_the_roster() {
    let (_state, addr) = serve().await;

    let mut a = guest(addr, "ROOM1", "A").await;
    recv(&mut a).await;
    let mut b = guest(addr, "ROOM1", "B").await;
    recv(&mut a).await;
    recv(&mut b).await;

    b.close();

    assert_eq!(recv(&mut a).await, Action::UserList { names: vec!["A".into()] });
}

#[tokio::test]
async fn subscribe_to_bad_destination_is_refused() {
    let (_state, addr) = serve().await;
    let mut client = raw_client(addr).await;

    let bad = Frame::request(frames::SYSCALL_SUBSCRIBE, frames::Data::new())
        .with_data(frames::FRAME_DESTINATION, "/topic/other/x");
    send_raw(&mut client, &bad).await;

    let reply = recv_frame(&mut client).await;
    assert_eq!(reply.parent_id, Some(bad.id));
    assert_eq!(reply.status, Status::Error);
    assert_eq!(reply.code(), Some("E_INVALID_DESTINATION"));
}

#[tokio::test]
async fn publish_before_subscribe_is_refused() {
    let (_state, addr) = serve().await;
    let mut client = raw_client(addr).await;

    let publish = Frame::publish("ROOM1", "IDENTIFY:A");
    send_raw(&mut client, &publish).await;

    let reply = recv_frame(&mut client).await;
    assert_eq!(reply.parent_id, Some(publish.id));
    assert_eq!(reply.code(), Some("E_NOT_SUBSCRIBED"));
}

#[tokio::test]
async fn garbage_text_gets_a_gateway_error() {
    let (_state, addr) = serve().await;
    let mut client = raw_client(addr).await;

    client.send(WsMessage::Text("not json".into())).await.expect("send");

    let reply = recv_frame(&mut client).await;
    assert_eq!(reply.syscall, frames::SYSCALL_ERROR);
    assert_eq!(reply.code(), Some("E_INVALID_FRAME"));
}

#[tokio::test]
async fn subscribed_client_must_identify_first() {
    let (state, addr) = serve().await;
    let mut client = raw_client(addr).await;

    let subscribe = Frame::subscribe("ROOM1");
    send_raw(&mut client, &subscribe).await;
    let ack = recv_frame(&mut client).await;
    assert_eq!((ack.parent_id, ack.status), (Some(subscribe.id), Status::Done));

    send_raw(&mut client, &Frame::publish("ROOM1", "DRAW:0,0,1,1,red")).await;

    let closed = timeout(Duration::from_secs(1), async {
        loop {
            match client.next().await {
                None | Some(Err(_) | Ok(WsMessage::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "socket should be closed after a failed handshake");
    let room = state.rooms.get("ROOM1").await.expect("room opened by subscribe");
    assert!(room.snapshot().await.expect("snapshot").participants.is_empty());
}

#[tokio::test]
async fn healthz_is_ok() {
    let (_state, addr) = serve().await;
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    tokio::io::AsyncWriteExt::write_all(&mut stream, b"GET /healthz HTTP/1.1\r\nhost: x\r\nconnection: close\r\n\r\n")
        .await
        .expect("write");
    let mut response = String::new();
    tokio::io::AsyncReadExt::read_to_string(&mut stream, &mut response).await.expect("read");
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
}
