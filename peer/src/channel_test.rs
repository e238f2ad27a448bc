use super::*;

use futures_util::{SinkExt, StreamExt};
use tokio::io::DuplexStream;
use tokio_util::codec::{Framed, LinesCodec};

use crate::direct::DirectTransport;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

fn open_pair(opts: &ChannelOptions) -> (Channel, Inbound, Framed<DuplexStream, LinesCodec>) {
    let (local, remote) = tokio::io::duplex(64 * 1024);
    let (channel, inbound) = Channel::open(DirectTransport::new(local, 1024), opts);
    (channel, inbound, Framed::new(remote, LinesCodec::new()))
}

async fn remote_next(remote: &mut Framed<DuplexStream, LinesCodec>) -> Option<String> {
    tokio::time::timeout(RECV_TIMEOUT, remote.next())
        .await
        .expect("remote read timed out")
        .map(|line| line.expect("remote line"))
}

async fn inbound_next(inbound: &mut Inbound) -> Option<String> {
    tokio::time::timeout(RECV_TIMEOUT, inbound.recv())
        .await
        .expect("inbound read timed out")
}

#[tokio::test]
async fn lines_flow_both_ways_in_order() {
    let (channel, mut inbound, mut remote) = open_pair(&ChannelOptions::default());

    channel.send("DRAW:0,0,1,1,red").expect("send");
    channel.send("UNDO").expect("send");
    assert_eq!(remote_next(&mut remote).await.as_deref(), Some("DRAW:0,0,1,1,red"));
    assert_eq!(remote_next(&mut remote).await.as_deref(), Some("UNDO"));

    remote.send("IDENTIFY:G").await.expect("remote send");
    remote.send("CLEAR").await.expect("remote send");
    assert_eq!(inbound_next(&mut inbound).await.as_deref(), Some("IDENTIFY:G"));
    assert_eq!(inbound_next(&mut inbound).await.as_deref(), Some("CLEAR"));
}

#[tokio::test]
async fn send_after_close_fails_without_panicking() {
    let (channel, _inbound, _remote) = open_pair(&ChannelOptions::default());
    channel.close();
    channel.close();
    assert!(channel.is_closed());
    assert_eq!(channel.send("UNDO"), Err(SendError::Closed));
    tokio::time::timeout(RECV_TIMEOUT, channel.closed())
        .await
        .expect("pump should terminate");
}

#[tokio::test]
async fn queued_lines_are_flushed_before_close() {
    let (channel, _inbound, mut remote) = open_pair(&ChannelOptions::default());
    channel.send("YOU_WERE_KICKED").expect("send");
    channel.close();

    assert_eq!(remote_next(&mut remote).await.as_deref(), Some("YOU_WERE_KICKED"));
    assert_eq!(remote_next(&mut remote).await, None);
}

#[tokio::test]
async fn inbound_ends_after_local_close() {
    let (channel, mut inbound, mut remote) = open_pair(&ChannelOptions::default());
    remote.send("UNDO").await.expect("remote send");
    channel.close();
    assert_eq!(inbound_next(&mut inbound).await, None);
}

#[tokio::test]
async fn remote_close_keeps_buffered_lines_readable() {
    let (channel, mut inbound, mut remote) = open_pair(&ChannelOptions::default());
    remote.send("REDO").await.expect("remote send");
    remote.send("CHAT:G: bye").await.expect("remote send");
    drop(remote);

    assert_eq!(inbound_next(&mut inbound).await.as_deref(), Some("REDO"));
    assert_eq!(inbound_next(&mut inbound).await.as_deref(), Some("CHAT:G: bye"));
    assert_eq!(inbound_next(&mut inbound).await, None);

    tokio::time::timeout(RECV_TIMEOUT, channel.closed())
        .await
        .expect("pump should terminate");
    assert!(channel.is_closed());
    assert_eq!(channel.send("UNDO"), Err(SendError::Closed));
}

#[tokio::test]
async fn full_queue_is_reported() {
    let opts = ChannelOptions { outbound_capacity: 1, ..ChannelOptions::default() };
    let (local, _remote) = tokio::io::duplex(16);
    let (channel, _inbound) = Channel::open(DirectTransport::new(local, 1024), &opts);

    let line = "x".repeat(100);
    let mut full = false;
    for _ in 0..16 {
        if channel.send(line.clone()) == Err(SendError::Full) {
            full = true;
            break;
        }
    }
    assert!(full, "a remote that never reads must fill the queue");
}

#[tokio::test]
async fn overlong_line_ends_the_channel() {
    let (local, remote) = tokio::io::duplex(64 * 1024);
    let (channel, mut inbound) = Channel::open(DirectTransport::new(local, 16), &ChannelOptions::default());
    let mut remote = Framed::new(remote, LinesCodec::new());

    remote.send("UNDO").await.expect("remote send");
    remote.send("x".repeat(64)).await.expect("remote send");
    assert_eq!(inbound_next(&mut inbound).await.as_deref(), Some("UNDO"));
    assert_eq!(inbound_next(&mut inbound).await, None);
    tokio::time::timeout(RECV_TIMEOUT, channel.closed())
        .await
        .expect("pump should terminate");
}

#[tokio::test]
async fn clones_share_close_state() {
    let (channel, _inbound, _remote) = open_pair(&ChannelOptions::default());
    let other = channel.clone();
    other.close();
    assert!(channel.is_closed());
    assert_eq!(channel.send("UNDO"), Err(SendError::Closed));
}
