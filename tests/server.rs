//! End-to-end exercises against a live server on the loopback interface.
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use binary_util::interfaces::{Reader, Writer};
use tokio::net::UdpSocket;
use tokio::time::timeout;

use rakkit::identifier::MinecraftIdentifier;
use rakkit::protocol::ack::{Acknowledge, Record};
use rakkit::protocol::frame::{Frame, FrameSet};
use rakkit::protocol::magic::Magic;
use rakkit::protocol::packet::offline::{
    OfflinePacket, OpenConnectionRequest1, OpenConnectionRequest2, UnconnectedPing,
};
use rakkit::protocol::packet::online::{ConnectionRequest, OnlinePacket};
use rakkit::protocol::reliability::Reliability;
use rakkit::protocol::triad::Triad;
use rakkit::protocol::types::ConnectionType;
use rakkit::{Handler, Server, ServerConfig};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Default)]
struct Recorder {
    pings: Mutex<Vec<SocketAddr>>,
    opened: Mutex<Vec<(i64, SocketAddr)>>,
}

impl Handler for Recorder {
    fn handle_ping(&self, addr: SocketAddr) {
        self.pings.lock().unwrap().push(addr);
    }

    fn open_conn(&self, guid: i64, addr: SocketAddr) {
        self.opened.lock().unwrap().push((guid, addr));
    }
}

async fn start_server(recorder: Arc<Recorder>) -> (Server, SocketAddr) {
    let config = ServerConfig {
        uuid: *b"0123456789abcdef",
        ..Default::default()
    };

    let mut server = Server::new(config, Box::new(MinecraftIdentifier::default()));
    server.add_handler(ArcHandler(recorder));
    server
        .start("127.0.0.1:0".parse().unwrap())
        .await
        .expect("server starts");

    let addr = server.local_addr().expect("bound address");
    (server, addr)
}

/// Forwards events to a shared recorder the test can inspect.
struct ArcHandler(Arc<Recorder>);

impl Handler for ArcHandler {
    fn handle_ping(&self, addr: SocketAddr) {
        self.0.handle_ping(addr);
    }

    fn open_conn(&self, guid: i64, addr: SocketAddr) {
        self.0.open_conn(guid, addr);
    }
}

async fn send_offline(socket: &UdpSocket, packet: OfflinePacket) {
    let buffer = packet.write_to_bytes().expect("encodes");
    socket.send(buffer.as_slice()).await.expect("sends");
}

async fn recv(socket: &UdpSocket) -> Vec<u8> {
    let mut buf = [0u8; 2048];
    let len = timeout(RECV_TIMEOUT, socket.recv(&mut buf))
        .await
        .expect("reply before timeout")
        .expect("socket read");
    buf[..len].to_vec()
}

/// Keeps receiving until a datagram with an id in the given range shows up.
async fn recv_with_id(socket: &UdpSocket, range: std::ops::RangeInclusive<u8>) -> Vec<u8> {
    for _ in 0..16 {
        let datagram = recv(socket).await;
        if range.contains(&datagram[0]) {
            return datagram;
        }
    }

    panic!("no datagram with id in {:?}", range);
}

#[tokio::test]
async fn offline_discovery_pong() {
    let _ = env_logger::builder().is_test(true).try_init();

    let recorder = Arc::new(Recorder::default());
    let (mut server, addr) = start_server(recorder.clone()).await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.connect(addr).await.unwrap();

    let ping = UnconnectedPing {
        timestamp: 42,
        magic: Magic::new(),
        client_guid: 9,
        connection: ConnectionType::vanilla(),
    };
    send_offline(&socket, ping.into()).await;

    let reply = recv(&socket).await;
    match OfflinePacket::read_from_slice(&reply).expect("pong decodes") {
        OfflinePacket::UnconnectedPong(pong) => {
            assert_eq!(pong.timestamp, 42);
            assert_eq!(pong.pong_id, i64::from_be_bytes(*b"89abcdef"));
            assert!(pong.identifier.starts_with("MCPE;"));
        }
        other => panic!("unexpected reply {:?}", other),
    }

    assert_eq!(recorder.pings.lock().unwrap().len(), 1);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn full_handshake_fires_open_conn() {
    let _ = env_logger::builder().is_test(true).try_init();

    let recorder = Arc::new(Recorder::default());
    let (mut server, addr) = start_server(recorder.clone()).await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.connect(addr).await.unwrap();

    // round one negotiates the mtu off the padded datagram length
    let request1 = OpenConnectionRequest1 {
        protocol_version: 8,
        mtu: 1400,
    };
    send_offline(&socket, request1.into()).await;

    let reply1 = recv(&socket).await;
    let server_guid = match OfflinePacket::read_from_slice(&reply1).expect("reply1 decodes") {
        OfflinePacket::OpenConnectionReply1(reply) => {
            assert_eq!(reply.mtu, 1400);
            assert!(!reply.use_security);
            reply.server_guid
        }
        other => panic!("unexpected reply {:?}", other),
    };
    assert_eq!(server_guid, server.guid());

    // round two creates the session
    let client_guid = 0x00aa_bb00_i64;
    let request2 = OpenConnectionRequest2 {
        magic: Magic::new(),
        server_address: addr.into(),
        mtu: 1400,
        client_guid,
        connection: ConnectionType::vanilla(),
    };
    send_offline(&socket, request2.into()).await;

    let reply2 = recv(&socket).await;
    match OfflinePacket::read_from_slice(&reply2).expect("reply2 decodes") {
        OfflinePacket::OpenConnectionReply2(reply) => {
            assert_eq!(reply.mtu, 1400);
            assert!(!reply.encryption_enabled);
        }
        other => panic!("unexpected reply {:?}", other),
    }
    assert_eq!(server.session_count().await, 1);

    // the connected handshake rides inside a reliable frame
    let request = OnlinePacket::from(ConnectionRequest {
        client_guid,
        timestamp: 7,
        use_security: false,
    })
    .write_to_bytes()
    .expect("encodes");

    let mut frame = Frame::new(Reliability::Reliable, request.as_slice().to_vec());
    frame.message_index = Some(Triad::new(0));

    let mut set = FrameSet::new(Triad::new(0));
    set.frames.push(frame);
    socket.send(&set.write_to_vec().unwrap()).await.unwrap();

    // the accepted reply arrives in a custom datagram; ack it
    let accepted_raw = recv_with_id(&socket, FrameSet::ID_RANGE).await;
    let accepted = FrameSet::read_from_slice(&accepted_raw).expect("accepted decodes");
    assert_eq!(
        accepted.frames[0].reliability,
        Reliability::ReliableOrderedWithAckReceipt
    );
    match OnlinePacket::read_from_slice(&accepted.frames[0].payload).expect("decodes") {
        OnlinePacket::ConnectionRequestAccepted(packet) => {
            assert_eq!(packet.client_timestamp, 7);
        }
        other => panic!("unexpected packet {:?}", other),
    }

    let ack = Acknowledge::ack(vec![Record::single(accepted.sequence)]);
    socket.send(&ack.write_to_vec().unwrap()).await.unwrap();

    // the session flips to Connected the moment the ack lands; if the server
    // retransmitted the accepted datagram in the meantime, ack that copy too
    let mut opened = Vec::new();
    for _ in 0..100 {
        opened = recorder.opened.lock().unwrap().clone();
        if !opened.is_empty() {
            break;
        }

        let mut buf = [0u8; 2048];
        if let Ok(Ok(len)) = timeout(Duration::from_millis(10), socket.recv(&mut buf)).await {
            if FrameSet::ID_RANGE.contains(&buf[0]) {
                if let Ok(set) = FrameSet::read_from_slice(&buf[..len]) {
                    let ack = Acknowledge::ack(vec![Record::single(set.sequence)]);
                    socket.send(&ack.write_to_vec().unwrap()).await.unwrap();
                }
            }
        }
    }

    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].0, client_guid);

    server.shutdown().await.unwrap();
}
