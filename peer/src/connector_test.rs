use super::*;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_util::codec::{Framed, LinesCodec};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

async fn listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    (listener, addr)
}

async fn accept_lines(listener: &TcpListener) -> Framed<tokio::net::TcpStream, LinesCodec> {
    let (stream, _) = tokio::time::timeout(RECV_TIMEOUT, listener.accept())
        .await
        .expect("accept timed out")
        .expect("accept");
    Framed::new(stream, LinesCodec::new())
}

async fn recv_line(remote: &mut Framed<tokio::net::TcpStream, LinesCodec>) -> String {
    tokio::time::timeout(RECV_TIMEOUT, remote.next())
        .await
        .expect("read timed out")
        .expect("stream ended")
        .expect("line")
}

#[tokio::test]
async fn identify_is_the_first_line() {
    let (listener, addr) = listener().await;
    let peer = connect(ConnectOptions::new(Endpoint::Direct { addr }, "G")).await.expect("connect");
    let mut relay = accept_lines(&listener).await;

    peer.send(&Action::Undo).expect("send");
    assert_eq!(recv_line(&mut relay).await, "IDENTIFY:G");
    assert_eq!(recv_line(&mut relay).await, "UNDO");
    assert_eq!(peer.name(), "G");
}

#[tokio::test]
async fn invalid_names_are_rejected_before_connecting() {
    let (_listener, addr) = listener().await;
    for name in ["", "a:b", "a,b", "line\nbreak"] {
        let err = connect(ConnectOptions::new(Endpoint::Direct { addr }, name))
            .await
            .expect_err("name should be rejected");
        assert!(matches!(err, ConnectError::InvalidName), "{name:?}");
    }
}

#[tokio::test]
async fn refused_connection_is_a_channel_error() {
    let (listener, addr) = listener().await;
    drop(listener);
    let err = connect(ConnectOptions::new(Endpoint::Direct { addr }, "G"))
        .await
        .expect_err("nothing is listening");
    assert!(matches!(err, ConnectError::Channel(ChannelError::Io(_))));
}

#[tokio::test]
async fn invalid_room_is_rejected_for_broker() {
    let opts = ConnectOptions::new(Endpoint::Broker { url: "ws://127.0.0.1:1/ws".into() }, "G")
        .with_room("no spaces allowed");
    let err = connect(opts).await.expect_err("room should be rejected");
    assert!(matches!(err, ConnectError::InvalidRoom(_)));
}

#[tokio::test]
async fn silent_broker_times_out() {
    let (listener, addr) = listener().await;
    let _held = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(stream);
    });

    let mut opts = ConnectOptions::new(Endpoint::Broker { url: format!("ws://{addr}/ws") }, "G");
    opts.connect_timeout = Duration::from_millis(200);
    let err = connect(opts).await.expect_err("broker never answers");
    assert!(matches!(err, ConnectError::Timeout));
}

#[tokio::test]
async fn connect_with_fires_success_once() {
    let (listener, addr) = listener().await;
    let (ok_tx, ok_rx) = oneshot::channel();
    let (err_tx, err_rx) = oneshot::channel::<ConnectError>();

    let handle = connect_with(
        ConnectOptions::new(Endpoint::Direct { addr }, "G"),
        move |peer| {
            let _ = ok_tx.send(peer.name().to_owned());
        },
        move |e| {
            let _ = err_tx.send(e);
        },
    );
    let _relay = accept_lines(&listener).await;
    handle.await.expect("task");

    assert_eq!(ok_rx.await.expect("success callback"), "G");
    assert!(err_rx.await.is_err(), "failure callback must not run");
}

#[tokio::test]
async fn connect_with_fires_failure_once() {
    let (listener, addr) = listener().await;
    drop(listener);
    let (ok_tx, ok_rx) = oneshot::channel::<()>();
    let (err_tx, err_rx) = oneshot::channel();

    connect_with(
        ConnectOptions::new(Endpoint::Direct { addr }, "G"),
        move |_peer| {
            let _ = ok_tx.send(());
        },
        move |e| {
            let _ = err_tx.send(e.to_string());
        },
    )
    .await
    .expect("task");

    assert!(!err_rx.await.expect("failure callback").is_empty());
    assert!(ok_rx.await.is_err(), "success callback must not run");
}

#[tokio::test]
async fn recv_skips_garbled_lines() {
    let (listener, addr) = listener().await;
    let mut peer = connect(ConnectOptions::new(Endpoint::Direct { addr }, "G")).await.expect("connect");
    let mut relay = accept_lines(&listener).await;
    assert_eq!(recv_line(&mut relay).await, "IDENTIFY:G");

    relay.send("not a line").await.expect("send");
    relay.send("DRAW:1,2").await.expect("send");
    relay.send("USER_LIST:Host,G").await.expect("send");

    let action = tokio::time::timeout(RECV_TIMEOUT, peer.recv()).await.expect("recv timed out");
    assert_eq!(action, Some(Action::UserList { names: vec!["Host".into(), "G".into()] }));

    drop(relay);
    let end = tokio::time::timeout(RECV_TIMEOUT, peer.recv()).await.expect("recv timed out");
    assert_eq!(end, None);
}
