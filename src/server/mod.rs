//! The server dispatcher: single UDP ingress demultiplexing to sessions.
//!
//! The server owns the socket, the address-keyed session map and the ban
//! list. Offline packets (discovery pings and the two handshake rounds) are
//! answered directly; everything else is handed to the owning session. A
//! periodic tick drives every session's queues and removes the dead ones.
pub mod handler;

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use binary_util::interfaces::{Reader, Writer};

use crate::error::ServerError;
use crate::identifier::Identifier;
use crate::protocol::ack::Acknowledge;
use crate::protocol::frame::FrameSet;
use crate::protocol::magic::Magic;
use crate::protocol::packet::offline::{
    AlreadyConnected, ConnectionBanned, IncompatibleProtocol, NoFreeIncomingConnections,
    OfflinePacket, OpenConnectionReply1, OpenConnectionReply2, UnconnectedPong,
};
use crate::protocol::packet::PacketKind;
use crate::protocol::reliability::Reliability;
use crate::protocol::{MAX_MTU, MIN_MTU, NETWORK_PROTOCOL};
use crate::session::Session;
use crate::util::to_address_token;

use self::handler::{Handler, Handlers};

/// How often every session's tick runs.
pub const TICK_INTERVAL: Duration = Duration::from_millis(10);
/// How long a flood ban lasts.
pub const BAN_DURATION: Duration = Duration::from_secs(300);

/// Large enough for any datagram the negotiated MTU allows.
const RECV_BUFFER_SIZE: usize = 2048;

/// The runtime knobs the host hands the server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Sessions beyond this count are answered NoFreeIncomingConnections.
    pub max_connections: usize,
    /// The upper bound on negotiated MTUs, clamped to the protocol range.
    pub mtu: u16,
    /// Whether discovery pings are answered.
    pub broadcasting_enabled: bool,
    /// The server identity: the first 8 bytes become the guid, the second 8
    /// the pong id.
    pub uuid: [u8; 16],
    pub network_protocol: u8,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 128,
            mtu: MAX_MTU,
            broadcasting_enabled: true,
            uuid: rand::random(),
            network_protocol: NETWORK_PROTOCOL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerState {
    New,
    Running,
    Closed,
}

/// Everything the ingress and tick tasks share.
struct Shared {
    socket: UdpSocket,
    config: ServerConfig,
    identifier: Arc<dyn Identifier>,
    handlers: Arc<Handlers>,
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    blocked: RwLock<HashMap<String, Instant>>,
    guid: i64,
    pong_id: i64,
    closed: AtomicBool,
}

/// An asynchronous raknet server.
pub struct Server {
    config: ServerConfig,
    identifier: Arc<dyn Identifier>,
    handlers: Handlers,
    state: ServerState,
    shared: Option<Arc<Shared>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Server {
    pub fn new(mut config: ServerConfig, identifier: Box<dyn Identifier>) -> Self {
        config.mtu = config.mtu.clamp(MIN_MTU, MAX_MTU);

        Self {
            config,
            identifier: identifier.into(),
            handlers: Handlers::new(),
            state: ServerState::New,
            shared: None,
            tasks: Vec::new(),
        }
    }

    /// Registers an observer. Handlers must be added before `start`.
    pub fn add_handler<H: Handler + 'static>(&mut self, handler: H) {
        self.handlers.push(Arc::new(handler));
    }

    /// The server guid derived from the configured uuid.
    pub fn guid(&self) -> i64 {
        i64::from_be_bytes(self.config.uuid[..8].try_into().expect("8 bytes"))
    }

    /// The address the socket is bound to, once running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared
            .as_ref()
            .and_then(|shared| shared.socket.local_addr().ok())
    }

    /// Binds the socket and spawns the ingress and tick tasks.
    pub async fn start(&mut self, addr: SocketAddr) -> Result<(), ServerError> {
        match self.state {
            ServerState::Running => return Err(ServerError::AlreadyRunning),
            ServerState::Closed => return Err(ServerError::AlreadyClosed),
            ServerState::New => {}
        }

        let socket = UdpSocket::bind(addr).await.map_err(|e| {
            error!("failed to bind {}: {}", addr, e);
            ServerError::AddrBind
        })?;

        let shared = Arc::new(Shared {
            socket,
            config: self.config.clone(),
            identifier: self.identifier.clone(),
            handlers: Arc::new(std::mem::take(&mut self.handlers)),
            sessions: RwLock::new(HashMap::new()),
            blocked: RwLock::new(HashMap::new()),
            guid: self.guid(),
            pong_id: i64::from_be_bytes(self.config.uuid[8..].try_into().expect("8 bytes")),
            closed: AtomicBool::new(false),
        });

        let ingress = shared.clone();
        self.tasks.push(tokio::spawn(async move {
            ingress.run_ingress().await;
        }));

        let ticker = shared.clone();
        self.tasks.push(tokio::spawn(async move {
            ticker.run_ticks().await;
        }));

        for handler in shared.handlers.iter() {
            handler.start_server();
        }

        info!("listening on {}", addr);
        self.shared = Some(shared);
        self.state = ServerState::Running;
        Ok(())
    }

    /// Stops serving: notifies every peer best effort, fires CloseServer and
    /// releases the socket.
    pub async fn shutdown(&mut self) -> Result<(), ServerError> {
        if self.state != ServerState::Running {
            return Err(ServerError::NotRunning);
        }

        let shared = self.shared.take().expect("running server has state");
        shared.closed.store(true, Ordering::Relaxed);

        for task in self.tasks.drain(..) {
            task.abort();
        }

        let sessions: Vec<_> = shared.sessions.write().await.drain().collect();
        for (_, session) in sessions {
            let mut session = session.lock().await;
            session.close();
            let guid = session.guid();
            let addr = session.addr();
            let outbox = session.take_outbox();
            drop(session);

            for datagram in outbox {
                shared.write(addr, &datagram).await;
            }

            for handler in shared.handlers.iter() {
                handler.close_conn(guid);
            }
        }

        for handler in shared.handlers.iter() {
            handler.close_server();
        }

        self.state = ServerState::Closed;
        Ok(())
    }

    /// Queues a payload to the session with the given guid.
    pub async fn send_packet(
        &self,
        guid: i64,
        payload: Vec<u8>,
        reliability: Reliability,
        channel: u8,
    ) -> Result<(), ServerError> {
        let shared = self.shared.as_ref().ok_or(ServerError::NotRunning)?;
        let session = shared
            .session_by_guid(guid)
            .await
            .ok_or(ServerError::SessionNotFound)?;

        let result = session
            .lock()
            .await
            .send_packet(payload, reliability, channel)
            .map_err(ServerError::Session);
        result
    }

    /// Closes the session for the given peer, if any.
    pub async fn close_session(&self, addr: SocketAddr) -> Result<(), ServerError> {
        let shared = self.shared.as_ref().ok_or(ServerError::NotRunning)?;
        if shared.close_session(addr).await {
            Ok(())
        } else {
            Err(ServerError::SessionNotFound)
        }
    }

    pub async fn session_count(&self) -> usize {
        match &self.shared {
            Some(shared) => shared.sessions.read().await.len(),
            None => 0,
        }
    }

    /// Bans an ip for [`BAN_DURATION`].
    pub async fn block_address(&self, ip: IpAddr, reason: &str) {
        if let Some(shared) = &self.shared {
            shared.block_address(ip, reason).await;
        }
    }

    pub async fn unblock_address(&self, ip: IpAddr) {
        if let Some(shared) = &self.shared {
            shared.unblock_address(ip).await;
        }
    }
}

impl Shared {
    /*
        Tasks
    */

    async fn run_ingress(&self) {
        let mut buf = [0u8; RECV_BUFFER_SIZE];

        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, addr)) => {
                    if len == 0 {
                        continue;
                    }

                    self.handle_datagram(&buf[..len], addr).await;
                }
                Err(e) => {
                    if self.closed.load(Ordering::Relaxed) {
                        break;
                    }

                    error!("socket read failed: {}", e);
                    break;
                }
            }
        }
    }

    async fn run_ticks(&self) {
        let mut interval = tokio::time::interval(TICK_INTERVAL);

        loop {
            interval.tick().await;

            if self.closed.load(Ordering::Relaxed) {
                break;
            }

            self.tick_sessions().await;
        }
    }

    async fn tick_sessions(&self) {
        let entries: Vec<(String, Arc<Mutex<Session>>)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(token, session)| (token.clone(), session.clone()))
            .collect();

        let mut dead = Vec::new();
        let mut flooders = Vec::new();

        for (token, session) in entries {
            let mut locked = session.lock().await;
            let alive = locked.update();
            let flooded = locked.take_flood_flag();
            let addr = locked.addr();
            let guid = locked.guid();
            let outbox = locked.take_outbox();
            drop(locked);

            for datagram in outbox {
                self.write(addr, &datagram).await;
            }

            if flooded {
                flooders.push(addr);
            }

            if !alive {
                dead.push((token, guid));
            }
        }

        if !dead.is_empty() {
            let mut sessions = self.sessions.write().await;
            for (token, _) in &dead {
                sessions.remove(token);
            }
        }

        for (_, guid) in dead {
            for handler in self.handlers.iter() {
                handler.close_conn(guid);
            }
        }

        for addr in flooders {
            self.block_address(addr.ip(), "Too many packets").await;
            self.close_session(addr).await;
        }
    }

    /*
        Ingress demux
    */

    async fn handle_datagram(&self, buf: &[u8], addr: SocketAddr) {
        if self.is_blocked(addr.ip()).await {
            return;
        }

        let id = buf[0];
        let Some(kind) = PacketKind::of(id) else {
            debug!("[{}] unknown packet id {:#04x}", addr, id);
            return;
        };

        match kind {
            PacketKind::Offline => self.handle_offline(buf, addr).await,
            PacketKind::Ack | PacketKind::Nack => match Acknowledge::read_from_slice(buf) {
                Ok(ack) => {
                    let Some(session) = self.get_session(addr).await else {
                        debug!("[{}] acknowledge without a session", addr);
                        return;
                    };

                    let mut locked = session.lock().await;
                    locked.handle_acknowledge(ack);
                    let outbox = locked.take_outbox();
                    drop(locked);

                    self.flush(addr, outbox).await;
                }
                Err(e) => match e.kind() {
                    std::io::ErrorKind::InvalidData => warn!("[{}] bad acknowledge: {}", addr, e),
                    _ => debug!("[{}] truncated acknowledge: {}", addr, e),
                },
            },
            PacketKind::FrameSet => match FrameSet::read_from_slice(buf) {
                Ok(set) => {
                    let Some(session) = self.get_session(addr).await else {
                        debug!("[{}] datagram without a session", addr);
                        return;
                    };

                    let mut locked = session.lock().await;
                    locked.handle_frame_set(set);
                    let outbox = locked.take_outbox();
                    drop(locked);

                    self.flush(addr, outbox).await;
                }
                Err(e) => match e.kind() {
                    std::io::ErrorKind::InvalidData => warn!("[{}] bad datagram: {}", addr, e),
                    _ => debug!("[{}] truncated datagram: {}", addr, e),
                },
            },
            PacketKind::Online => {
                // an online packet outside a frame is not ours to process
                for handler in self.handlers.iter() {
                    handler.handle_raw_packet(addr, buf);
                }
            }
        }
    }

    async fn handle_offline(&self, buf: &[u8], addr: SocketAddr) {
        let packet = match OfflinePacket::read_from_slice(buf) {
            Ok(packet) => packet,
            Err(e) => {
                match e.kind() {
                    std::io::ErrorKind::InvalidData => warn!("[{}] malformed packet: {}", addr, e),
                    _ => debug!("[{}] truncated packet: {}", addr, e),
                }
                return;
            }
        };

        match packet {
            OfflinePacket::UnconnectedPing(ping) => {
                self.handle_unconnected_ping(addr, ping.timestamp, false).await;
            }
            OfflinePacket::UnconnectedPingOpenConnections(ping) => {
                self.handle_unconnected_ping(addr, ping.timestamp, true).await;
            }
            OfflinePacket::OpenConnectionRequest1(request) => {
                // a connected peer starting over is torn down first
                if let Some(session) = self.get_session(addr).await {
                    if session.lock().await.state().is_connected() {
                        debug!("[{}] client re-instantiated its connection", addr);
                        self.close_session(addr).await;
                    }
                }

                if let Some(reply) = self.validate_new_connection(addr).await {
                    self.send_offline(addr, reply).await;
                    return;
                }

                if request.protocol_version != self.config.network_protocol {
                    let reply = IncompatibleProtocol {
                        network_protocol: self.config.network_protocol,
                        magic: Magic::new(),
                        server_guid: self.guid,
                    };
                    self.send_offline(addr, reply.into()).await;
                    return;
                }

                if request.mtu > self.config.mtu {
                    return;
                }

                let reply = OpenConnectionReply1 {
                    magic: Magic::new(),
                    server_guid: self.guid,
                    use_security: false,
                    mtu: request.mtu.min(self.config.mtu),
                };
                self.send_offline(addr, reply.into()).await;
            }
            OfflinePacket::OpenConnectionRequest2(request) => {
                if let Some(reply) = self.validate_new_connection(addr).await {
                    self.send_offline(addr, reply).await;
                    return;
                }

                if self.session_by_guid(request.client_guid).await.is_some() {
                    self.send_offline(addr, AlreadyConnected {}.into()).await;
                    return;
                }

                if request.mtu > self.config.mtu {
                    return;
                }

                let mtu = request.mtu.min(self.config.mtu);
                let session = Session::new(addr, request.client_guid, mtu, self.handlers.clone());

                self.sessions
                    .write()
                    .await
                    .insert(to_address_token(addr), Arc::new(Mutex::new(session)));

                for handler in self.handlers.iter() {
                    handler.open_pre_conn(addr);
                }

                let reply = OpenConnectionReply2 {
                    magic: Magic::new(),
                    server_guid: self.guid,
                    client_address: addr.into(),
                    mtu,
                    encryption_enabled: false,
                    connection: self.identifier.connection_type(),
                };
                self.send_offline(addr, reply.into()).await;
            }
            other => {
                // offline replies only a client should ever receive
                debug!("[{}] unexpected offline packet {:?}", addr, other);
                for handler in self.handlers.iter() {
                    handler.handle_raw_packet(addr, buf);
                }
            }
        }
    }

    async fn handle_unconnected_ping(&self, addr: SocketAddr, timestamp: i64, gated: bool) {
        if !self.config.broadcasting_enabled {
            return;
        }

        // only the open-connections variant honors the connection cap
        if gated && self.sessions.read().await.len() >= self.config.max_connections {
            return;
        }

        for handler in self.handlers.iter() {
            handler.handle_ping(addr);
        }

        let pong = UnconnectedPong {
            timestamp,
            pong_id: self.pong_id,
            magic: Magic::new(),
            identifier: self.identifier.build(),
            connection: self.identifier.connection_type(),
        };
        self.send_offline(addr, pong.into()).await;
    }

    /// The gauntlet a handshake packet runs before a session may be created.
    /// Returns the reply that rejects it, or `None` to let it pass.
    async fn validate_new_connection(&self, addr: SocketAddr) -> Option<OfflinePacket> {
        if self.get_session(addr).await.is_some() {
            Some(AlreadyConnected {}.into())
        } else if self.sessions.read().await.len() >= self.config.max_connections {
            Some(NoFreeIncomingConnections {}.into())
        } else if self.is_blocked(addr.ip()).await {
            Some(
                ConnectionBanned {
                    server_guid: self.guid,
                }
                .into(),
            )
        } else {
            None
        }
    }

    /*
        Sessions
    */

    async fn get_session(&self, addr: SocketAddr) -> Option<Arc<Mutex<Session>>> {
        self.sessions
            .read()
            .await
            .get(&to_address_token(addr))
            .cloned()
    }

    async fn session_by_guid(&self, guid: i64) -> Option<Arc<Mutex<Session>>> {
        let sessions: Vec<Arc<Mutex<Session>>> =
            self.sessions.read().await.values().cloned().collect();

        for session in sessions {
            if session.lock().await.guid() == guid {
                return Some(session);
            }
        }

        None
    }

    async fn close_session(&self, addr: SocketAddr) -> bool {
        let Some(session) = self.sessions.write().await.remove(&to_address_token(addr)) else {
            return false;
        };

        let mut locked = session.lock().await;
        locked.close();
        let guid = locked.guid();
        let outbox = locked.take_outbox();
        drop(locked);

        self.flush(addr, outbox).await;

        for handler in self.handlers.iter() {
            handler.close_conn(guid);
        }

        true
    }

    /*
        Bans
    */

    async fn is_blocked(&self, ip: IpAddr) -> bool {
        let key = ip.to_string();

        let expired = match self.blocked.read().await.get(&key) {
            Some(expiry) => Instant::now() >= *expiry,
            None => return false,
        };

        if expired {
            self.blocked.write().await.remove(&key);
            for handler in self.handlers.iter() {
                handler.remove_blocked_address(ip);
            }
            return false;
        }

        true
    }

    async fn block_address(&self, ip: IpAddr, reason: &str) {
        self.blocked
            .write()
            .await
            .insert(ip.to_string(), Instant::now() + BAN_DURATION);

        warn!("blocked {}: {}", ip, reason);
        for handler in self.handlers.iter() {
            handler.add_blocked_address(ip, reason);
        }
    }

    async fn unblock_address(&self, ip: IpAddr) {
        if self.blocked.write().await.remove(&ip.to_string()).is_some() {
            for handler in self.handlers.iter() {
                handler.remove_blocked_address(ip);
            }
        }
    }

    /*
        Writes
    */

    async fn send_offline(&self, addr: SocketAddr, packet: OfflinePacket) {
        match packet.write_to_bytes() {
            Ok(buffer) => self.write(addr, buffer.as_slice()).await,
            Err(e) => warn!("[{}] failed to encode offline packet: {}", addr, e),
        }
    }

    async fn flush(&self, addr: SocketAddr, outbox: Vec<Vec<u8>>) {
        for datagram in outbox {
            self.write(addr, &datagram).await;
        }
    }

    async fn write(&self, addr: SocketAddr, buf: &[u8]) {
        if let Err(e) = self.socket.send_to(buf, addr).await {
            warn!("[{}] socket write failed: {}", addr, e);
        }
    }
}
