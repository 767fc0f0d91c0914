use std::{net::SocketAddr, sync::Arc, time::Duration};

use bytes::Bytes;
use peerwire_core::{
    Handler, HandlerContext, InboundHandler, PeerAddress, PeerStatusListeners, PipelineMessage,
    PipelineTemplate, REMOTE_INET_ADDRESS, ReceiveExit, TimeoutFactory, TransportConfig, codes,
    test_stubs::RecordingListener,
};
use peerwire_transport_udp::UdpEndpoint;
use tokio::{net::UdpSocket, sync::mpsc, time::timeout};

const WAIT: Duration = Duration::from_secs(5);

struct Echo;

impl InboundHandler for Echo {
    fn on_read(&self, ctx: &HandlerContext<'_>, msg: PipelineMessage) {
        if let PipelineMessage::Piece(piece) = msg {
            ctx.write(PipelineMessage::Buffer(piece.into_bytes()))
                .expect("echo");
        }
    }
}

struct Forward(mpsc::UnboundedSender<(Bytes, SocketAddr)>);

impl InboundHandler for Forward {
    fn on_read(&self, _ctx: &HandlerContext<'_>, msg: PipelineMessage) {
        if let PipelineMessage::Piece(piece) = msg {
            let remote = piece.remote();
            let _ = self.0.send((piece.into_bytes(), remote));
        }
    }
}

fn loopback() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

fn echo_template() -> PipelineTemplate {
    let mut template = PipelineTemplate::new();
    template.add_shared("echo", Handler::inbound(Echo));
    template
}

fn server_addr(endpoint: &UdpEndpoint) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], endpoint.local_addr().port()))
}

async fn round_trip(socket: &UdpSocket, server: SocketAddr, payload: &[u8]) -> (Vec<u8>, SocketAddr) {
    socket.send_to(payload, server).await.expect("send");
    let mut buf = [0_u8; 64];
    let (read, from) = timeout(WAIT, socket.recv_from(&mut buf))
        .await
        .expect("reply in time")
        .expect("recv");
    (buf[..read].to_vec(), from)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_replies_to_each_sender() {
    let endpoint = UdpEndpoint::bind(loopback(), &echo_template(), &TransportConfig::default())
        .await
        .expect("bind");
    let server = server_addr(&endpoint);
    let alice = UdpSocket::bind(loopback()).await.expect("alice");
    let bob = UdpSocket::bind(loopback()).await.expect("bob");

    let (reply, from) = round_trip(&alice, server, b"from alice").await;
    assert_eq!(reply, b"from alice");
    assert_eq!(from, server);

    let (reply, _) = round_trip(&bob, server, b"from bob").await;
    assert_eq!(reply, b"from bob");

    let recorded = endpoint
        .connection()
        .channel()
        .attributes()
        .get(&REMOTE_INET_ADDRESS);
    assert_eq!(recorded, Some(bob.local_addr().expect("bob addr")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_datagram_is_a_piece() {
    let endpoint = UdpEndpoint::bind(loopback(), &echo_template(), &TransportConfig::default())
        .await
        .expect("bind");
    let client = UdpSocket::bind(loopback()).await.expect("client");

    let (reply, _) = round_trip(&client, server_addr(&endpoint), b"").await;

    assert!(reply.is_empty());
    assert!(!endpoint.is_closed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unconnected_send_requires_a_receiver() {
    let endpoint = UdpEndpoint::bind(loopback(), &PipelineTemplate::new(), &TransportConfig::default())
        .await
        .expect("bind");

    let err = endpoint
        .send(PipelineMessage::Buffer(Bytes::from_static(b"lost")))
        .await
        .expect_err("no receiver");

    assert_eq!(err.code(), codes::CHANNEL_RECEIVER_REQUIRED);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connected_endpoint_exchanges_with_its_target() {
    let peer = UdpSocket::bind(loopback()).await.expect("peer");
    let target = peer.local_addr().expect("peer addr");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut template = PipelineTemplate::new();
    template.add_shared("forward", Handler::inbound(Forward(tx)));

    let endpoint = UdpEndpoint::connect(target, &template, &TransportConfig::default())
        .await
        .expect("connect");
    endpoint
        .send(PipelineMessage::Buffer(Bytes::from_static(b"hi")))
        .await
        .expect("send");

    let mut buf = [0_u8; 16];
    let (read, from) = timeout(WAIT, peer.recv_from(&mut buf))
        .await
        .expect("in time")
        .expect("recv");
    assert_eq!(&buf[..read], b"hi");
    assert_eq!(from.port(), endpoint.local_addr().port());

    peer.send_to(b"welcome", from).await.expect("reply");
    let (piece, remote) = timeout(WAIT, rx.recv()).await.expect("piece").expect("open");
    assert_eq!(&piece[..], b"welcome");
    assert_eq!(remote, target);

    let handle = endpoint.connection().clone();
    handle.close();
    let exit = timeout(WAIT, endpoint.finished()).await.expect("finished");
    assert!(matches!(exit, ReceiveExit::Closed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn idle_server_endpoint_reports_last_sender_and_keeps_serving() {
    let listener = Arc::new(RecordingListener::new());
    let listeners = Arc::new(PeerStatusListeners::new());
    listeners.add(&listener);
    let mut template = echo_template();
    TimeoutFactory::server(Duration::from_secs(1), listeners, "dht-udp").install_template(&mut template);
    let config = TransportConfig {
        idle_check_interval_ms: 50,
        ..TransportConfig::default()
    };
    let endpoint = UdpEndpoint::bind(loopback(), &template, &config)
        .await
        .expect("bind");
    let client = UdpSocket::bind(loopback()).await.expect("client");
    round_trip(&client, server_addr(&endpoint), b"find_node").await;

    let mut reported = Vec::new();
    for _ in 0..250 {
        reported = listener.failures();
        if !reported.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(reported.len(), 1);
    assert_eq!(
        reported[0].0,
        PeerAddress::unknown(client.local_addr().expect("client addr"))
    );
    assert!(!endpoint.is_closed());

    let late = UdpSocket::bind(loopback()).await.expect("late sender");
    let (reply, _) = round_trip(&late, server_addr(&endpoint), b"ping").await;
    assert_eq!(reply, b"ping");
    let (reply, _) = round_trip(&client, server_addr(&endpoint), b"find_node again").await;
    assert_eq!(reply, b"find_node again");
}
