use std::sync::{Arc, Mutex};
use std::time::Duration;

use actions::{Action, Renderer};
use peer::{ConnectOptions, Endpoint, Peer, connect};
use tokio::time::timeout;

use super::*;
use crate::state::test_helpers::{draw, test_app_state};

#[derive(Default, Clone)]
struct HostBoard {
    applied: Arc<Mutex<Vec<Action>>>,
}

impl Renderer for HostBoard {
    fn apply(&mut self, action: &Action) {
        self.applied.lock().expect("lock").push(action.clone());
    }

    fn snapshot_replay(&mut self, _actions: &[Action]) {}
}

async fn start() -> (AppState, RoomHandle, SocketAddr, HostBoard) {
    let state = test_app_state();
    let board = HostBoard::default();
    let room = state.rooms.open_hosted("LAN", "H", Box::new(board.clone())).await;
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(run(state.clone(), listener, room.clone()));
    (state, room, addr, board)
}

async fn guest(addr: SocketAddr, name: &str) -> Peer {
    connect(ConnectOptions::new(Endpoint::Direct { addr }, name)).await.expect("connect")
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

fn roster(names: &[&str]) -> Action {
    Action::UserList { names: names.iter().map(|n| (*n).to_owned()).collect() }
}

#[tokio::test]
async fn host_and_two_guests_scenario() {
    let (_state, room, addr, board) = start().await;

    let mut g = guest(addr, "G").await;
    assert_eq!(recv(&mut g).await, roster(&["H", "G"]));

    g.send(&draw(1)).expect("send");
    assert_silent(&mut g).await;
    assert_eq!(room.snapshot().await.expect("snapshot").history_len, 1);

    let mut g2 = guest(addr, "G2").await;
    assert_eq!(recv(&mut g).await, roster(&["H", "G", "G2"]));
    assert_eq!(recv(&mut g2).await, roster(&["H", "G", "G2"]));

    g.send(&draw(2)).expect("send");
    assert_eq!(recv(&mut g2).await, draw(2));
    assert_silent(&mut g).await;

    g.send(&Action::Undo).expect("send");
    assert_eq!(recv(&mut g).await, Action::Undo);
    assert_eq!(recv(&mut g2).await, Action::Undo);

    let snapshot = room.snapshot().await.expect("snapshot");
    assert_eq!((snapshot.history_len, snapshot.redo_len), (1, 1));
    assert_eq!(room.history().await.expect("history"), vec![draw(1)]);
    assert!(board.applied.lock().expect("lock").contains(&Action::Undo));
}

#[tokio::test]
async fn kicked_guest_is_told_once_and_disconnected() {
    let (_state, room, addr, _board) = start().await;

    let mut a = guest(addr, "A").await;
    recv(&mut a).await;
    let mut b = guest(addr, "B").await;
    recv(&mut a).await;
    recv(&mut b).await;

    assert!(room.kick("B").await.expect("kick"));

    assert_eq!(recv(&mut b).await, Action::Kicked);
    assert!(timeout(Duration::from_secs(1), b.recv()).await.expect("close").is_none());
    assert_eq!(recv(&mut a).await, roster(&["H", "A"]));
}

#[tokio::test]
async fn raw_handshake_gate_over_tcp() {
    use futures::{SinkExt, StreamExt};
    use tokio_util::codec::{Framed, LinesCodec};

    let (_state, room, addr, _board) = start().await;
    let stream = tokio::net::TcpStream::connect(addr).await.expect("connect");
    let mut raw = Framed::new(stream, LinesCodec::new());
    raw.send("CHAT:X: hello").await.expect("send");

    let next = timeout(Duration::from_secs(1), raw.next()).await.expect("close timed out");
    assert!(next.is_none(), "unidentified socket received {next:?}");
    assert_eq!(room.snapshot().await.expect("snapshot").participants, vec!["H"]);
}

#[tokio::test]
async fn kick_racing_guest_close_updates_roster_once() {
    let (_state, room, addr, _board) = start().await;
    let mut a = guest(addr, "A").await;
    assert_eq!(recv(&mut a).await, roster(&["H", "A"]));

    for round in 0..5 {
        let name = format!("B{round}");
        let b = guest(addr, &name).await;
        assert_eq!(recv(&mut a).await, roster(&["H", "A", &name]));

        let (kicked, ()) = tokio::join!(room.kick(&name), async { b.close() });
        kicked.expect("kick");

        assert_eq!(recv(&mut a).await, roster(&["H", "A"]));
        assert_silent(&mut a).await;
        assert_eq!(room.snapshot().await.expect("snapshot").participants, vec!["H", "A"]);
    }
}

#[tokio::test]
async fn accept_errors_back_off_before_retrying() {
    let mut failures = 3;
    let started = tokio::time::Instant::now();
    let accepted = next_accepted(
        || {
            let result = if failures > 0 {
                failures -= 1;
                Err(std::io::Error::other("too many open files"))
            } else {
                Ok(7)
            };
            async move { result }
        },
        Duration::from_millis(20),
    )
    .await;

    assert_eq!(accepted, 7);
    assert_eq!(failures, 0);
    assert!(started.elapsed() >= Duration::from_millis(60));
}
