//! The per-peer reliability engine.
//!
//! A [`Session`] owns every counter and queue behind one peer: reliable
//! dedup, per-channel ordering and sequencing, fragment reassembly, the send
//! queue with MTU-bounded batching, and the recovery table driving NACK and
//! keep-alive retransmission. It is a synchronous state machine: ingress and
//! ticks mutate it, outbound datagrams accumulate in an outbox the server
//! drains onto the socket.
pub mod latency;
pub mod queue;
pub mod split;
pub mod state;

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use binary_util::interfaces::{Reader, Writer};
use log::{debug, warn};

use crate::error::SessionError;
use crate::protocol::ack::{Acknowledge, Record};
use crate::protocol::frame::{Frame, FrameSet, SplitMeta};
use crate::protocol::packet::online::{
    ConnectedPong, ConnectionRequestAccepted, DetectLostConnections, DisconnectionNotification,
    OnlinePacket,
};
use crate::protocol::reliability::Reliability;
use crate::protocol::triad::Triad;
use crate::protocol::types::SystemAddress;
use crate::protocol::{
    CUSTOM_PACKET_BASE_SIZE, DEFAULT_CHANNEL, MAX_CHANNELS, MAX_PACKETS_PER_SECOND,
    USER_PACKET_THRESHOLD,
};
use crate::server::handler::Handlers;
use crate::util::current_epoch;

use self::latency::Latency;
use self::queue::RecoveryQueue;
use self::split::SplitAssembler;
use self::state::SessionState;

/// How often the oldest recovery entry is retransmitted unprompted.
pub const RECOVERY_SEND_INTERVAL: Duration = Duration::from_millis(50);
/// Silence on the wire before a DetectLostConnections probe goes out.
pub const DETECTION_SEND_INTERVAL: Duration = Duration::from_secs(5);
/// Interval between latency pings on a connected session.
pub const PING_SEND_INTERVAL: Duration = Duration::from_millis(2500);
/// Silence on the wire before the session is considered dead.
pub const SESSION_TIMEOUT: Duration = Duration::from_millis(62_500);
/// Interval at which the per-second packet counters reset.
const COUNTER_RESET_INTERVAL: Duration = Duration::from_secs(1);

/// One peer's connection state and reliability machinery.
pub struct Session {
    addr: SocketAddr,
    guid: i64,
    mtu: u16,
    state: SessionState,
    handlers: Arc<Handlers>,
    /// Encoded datagrams awaiting a socket write by the server.
    outbox: Vec<Vec<u8>>,

    /// Next reliable frame index.
    message_index: Triad,
    /// Next fragment group id, wrapping modulo 2^16.
    split_id: u16,
    /// Message indexes already delivered, for reliable dedup.
    reliable_seen: HashSet<u32>,
    splits: SplitAssembler,
    send_queue: VecDeque<Frame>,
    recovery: RecoveryQueue,
    /// Frames awaiting ack-receipt notification, keyed by the sequence
    /// number of the datagram that carried them.
    ack_receipts: HashMap<u32, Vec<Frame>>,
    send_seq: Triad,
    recv_seq: Triad,

    order_send: [Triad; MAX_CHANNELS as usize],
    order_recv: [Triad; MAX_CHANNELS as usize],
    sequence_send: [Triad; MAX_CHANNELS as usize],
    /// Highest sequenced index delivered per channel; `None` until the first
    /// delivery so that index 0 is not spuriously dropped.
    sequence_recv: [Option<Triad>; MAX_CHANNELS as usize],
    /// Ordered frames held back until the gap before them closes.
    order_holding: HashMap<u8, HashMap<u32, Frame>>,

    /// Message index of the queued ConnectionRequestAccepted frame.
    handshake_frame_index: Option<Triad>,
    /// The record whose acknowledgement flips the session to Connected.
    handshake_record: Option<Record>,

    packets_sent: usize,
    packets_received: usize,
    flood_tripped: bool,
    latency: Latency,

    last_send_time: Instant,
    last_recv_time: Instant,
    last_recovery_time: Instant,
    last_keepalive_time: Instant,
    last_ping_time: Instant,
    last_counter_reset: Instant,
}

impl Session {
    pub(crate) fn new(addr: SocketAddr, guid: i64, mtu: u16, handlers: Arc<Handlers>) -> Self {
        let now = Instant::now();

        Self {
            addr,
            guid,
            mtu,
            state: SessionState::Handshaking,
            handlers,
            outbox: Vec::new(),
            message_index: Triad::default(),
            split_id: 0,
            reliable_seen: HashSet::new(),
            splits: SplitAssembler::new(),
            send_queue: VecDeque::new(),
            recovery: RecoveryQueue::new(),
            ack_receipts: HashMap::new(),
            send_seq: Triad::default(),
            recv_seq: Triad::default(),
            order_send: [Triad::default(); MAX_CHANNELS as usize],
            order_recv: [Triad::default(); MAX_CHANNELS as usize],
            sequence_send: [Triad::default(); MAX_CHANNELS as usize],
            sequence_recv: [None; MAX_CHANNELS as usize],
            order_holding: HashMap::new(),
            handshake_frame_index: None,
            handshake_record: None,
            packets_sent: 0,
            packets_received: 0,
            flood_tripped: false,
            latency: Latency::default(),
            last_send_time: now,
            last_recv_time: now,
            last_recovery_time: now,
            last_keepalive_time: now,
            last_ping_time: now,
            last_counter_reset: now,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn guid(&self) -> i64 {
        self.guid
    }

    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn latency(&self) -> Latency {
        self.latency
    }

    pub fn system_address(&self) -> SystemAddress {
        self.addr.into()
    }

    /// Datagrams produced since the last drain, oldest first.
    pub(crate) fn take_outbox(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.outbox)
    }

    /// Whether the peer exceeded the per-second packet budget during the last
    /// counter interval. Reading clears the flag.
    pub(crate) fn take_flood_flag(&mut self) -> bool {
        std::mem::take(&mut self.flood_tripped)
    }

    /*
        Ingress
    */

    /// Handles one custom datagram addressed to this session.
    pub fn handle_frame_set(&mut self, set: FrameSet) {
        if self.state.is_disconnected() {
            return;
        }

        self.packets_received += 1;

        // a gap in the sequence means datagrams went missing; ask for them
        let gap = set.sequence.gap_from(self.recv_seq);
        if gap > 1 {
            let record = if gap > 2 {
                Record::ranged(self.recv_seq.add(1), set.sequence.sub(1))
            } else {
                Record::single(set.sequence.sub(1))
            };

            self.push_acknowledge(Acknowledge::nack(vec![record]));
        }

        if set.sequence >= self.recv_seq {
            self.recv_seq = set.sequence;

            for frame in set.frames {
                self.handle_frame(frame);
            }

            self.last_recv_time = Instant::now();
        }

        self.push_acknowledge(Acknowledge::ack(vec![Record::single(set.sequence)]));
    }

    fn handle_frame(&mut self, mut frame: Frame) {
        if frame.is_split() {
            match self.splits.insert(&frame) {
                Some(payload) => {
                    frame.split = None;
                    frame.payload = payload;
                }
                None => return,
            }
        }

        if frame.reliability.is_reliable() {
            let index = frame.message_index.unwrap_or_default().get();
            if !self.reliable_seen.insert(index) {
                return;
            }
        }

        let channel = frame.order_channel.unwrap_or(DEFAULT_CHANNEL);
        if channel >= MAX_CHANNELS {
            warn!("[{}] dropped frame on invalid channel {}", self.addr, channel);
            return;
        }

        if frame.reliability.is_ordered() {
            let index = frame.order_index.unwrap_or_default();
            self.order_holding
                .entry(channel)
                .or_default()
                .insert(index.get(), frame);

            // release the contiguous run starting at the expected index
            loop {
                let expected = self.order_recv[channel as usize].get();
                let next = self
                    .order_holding
                    .get_mut(&channel)
                    .and_then(|holding| holding.remove(&expected));

                match next {
                    Some(next) => {
                        self.order_recv[channel as usize] =
                            self.order_recv[channel as usize].bump();
                        self.deliver(next.payload);
                    }
                    None => break,
                }
            }
        } else if frame.reliability.is_sequenced() {
            let index = frame.order_index.unwrap_or_default();
            let newest = self.sequence_recv[channel as usize];

            if newest.map_or(true, |delivered| index > delivered) {
                self.sequence_recv[channel as usize] = Some(index);
                self.deliver(frame.payload);
            }
        } else {
            self.deliver(frame.payload);
        }
    }

    /// Dispatches a reassembled, deduplicated, in-order payload by its
    /// leading byte: engine-internal control packets are handled here, user
    /// payloads fan out to the handlers.
    fn deliver(&mut self, payload: Vec<u8>) {
        let Some(&id) = payload.first() else {
            return;
        };

        if id >= USER_PACKET_THRESHOLD {
            if self.state.is_connected() {
                for handler in self.handlers.iter() {
                    handler.handle_packet(self.guid, &payload);
                }
            }
            return;
        }

        match OnlinePacket::read_from_slice(&payload) {
            Ok(OnlinePacket::ConnectedPing(ping)) => {
                let pong = ConnectedPong {
                    timestamp: ping.timestamp,
                };
                self.queue_online(pong.into(), Reliability::Unreliable, DEFAULT_CHANNEL);
            }
            Ok(OnlinePacket::ConnectedPong(pong)) => {
                let now = current_epoch();
                if pong.timestamp >= 0 && (pong.timestamp as u64) <= now {
                    self.latency
                        .add_raw(Duration::from_millis(now - pong.timestamp as u64));
                }
            }
            Ok(OnlinePacket::ConnectionRequest(request)) => {
                if self.state != SessionState::Handshaking {
                    return;
                }

                let accepted = ConnectionRequestAccepted {
                    client_address: self.system_address(),
                    system_index: 0,
                    internal_addresses: Vec::new(),
                    client_timestamp: request.timestamp,
                    server_timestamp: current_epoch() as i64,
                };

                // the session flips to Connected once the peer acks the
                // datagram carrying this frame
                self.handshake_frame_index = self.queue_online(
                    accepted.into(),
                    Reliability::ReliableOrderedWithAckReceipt,
                    DEFAULT_CHANNEL,
                );
            }
            Ok(OnlinePacket::NewIncomingConnection(_)) => {}
            Ok(OnlinePacket::DetectLostConnections(_)) => {
                debug!("[{}] received a keep-alive probe", self.addr);
            }
            Ok(OnlinePacket::DisconnectionNotification(_)) => {
                if self.state.is_connected() {
                    self.close();
                }
            }
            Ok(_) | Err(_) => {
                if self.state.is_connected() {
                    for handler in self.handlers.iter() {
                        handler.handle_unknown_packet(self.guid, &payload);
                    }
                }
            }
        }
    }

    /// Handles an ACK or NACK addressed to this session.
    pub fn handle_acknowledge(&mut self, ack: Acknowledge) {
        if self.state.is_disconnected() {
            return;
        }

        if ack.is_nack() {
            for index in ack.numbers() {
                // unreliable ack-receipt frames are reported lost by
                // omission, never retried
                if let Some(frames) = self.ack_receipts.get_mut(&index) {
                    frames.retain(|frame| frame.reliability.is_reliable());
                    if frames.is_empty() {
                        self.ack_receipts.remove(&index);
                    }
                }

                if let Some(frames) = self.recovery.remove(index) {
                    self.send_frame_set(frames, true);
                }
            }
        } else {
            for index in ack.numbers() {
                if let Some(frames) = self.ack_receipts.remove(&index) {
                    for frame in frames {
                        for handler in self.handlers.iter() {
                            handler.handle_send_packet(self.addr, &frame.payload);
                        }
                    }
                }

                self.recovery.remove(index);

                if !self.state.is_connected() {
                    if let Some(record) = self.handshake_record {
                        if record.index.get() == index {
                            self.state = SessionState::Connected;

                            for handler in self.handlers.iter() {
                                handler.open_conn(self.guid, self.addr);
                            }
                        }
                    }
                }
            }
        }

        self.last_recv_time = Instant::now();
    }

    /*
        Egress
    */

    /// Queues a payload for delivery to the peer. Payloads wider than the
    /// MTU are fragmented transparently.
    pub fn send_packet(
        &mut self,
        payload: Vec<u8>,
        reliability: Reliability,
        channel: u8,
    ) -> Result<(), SessionError> {
        if channel >= MAX_CHANNELS {
            return Err(SessionError::InvalidChannel(channel));
        }

        if self.state.is_disconnected() {
            return Err(SessionError::Closed);
        }

        self.queue_payload(payload, reliability, channel);
        Ok(())
    }

    fn queue_online(
        &mut self,
        packet: OnlinePacket,
        reliability: Reliability,
        channel: u8,
    ) -> Option<Triad> {
        match packet.write_to_bytes() {
            Ok(buffer) => self.queue_payload(buffer.as_slice().to_vec(), reliability, channel),
            Err(error) => {
                warn!("[{}] failed to encode packet: {}", self.addr, error);
                None
            }
        }
    }

    /// Builds the frame(s) for a payload, assigns indexes and appends them to
    /// the send queue. Returns the message index of the first reliable frame.
    fn queue_payload(
        &mut self,
        payload: Vec<u8>,
        reliability: Reliability,
        channel: u8,
    ) -> Option<Triad> {
        let mut order_index = None;
        let mut order_channel = None;

        // an ordered frame bumps only the order counter, a sequenced frame
        // only the sequence counter
        if reliability.is_ordered() {
            order_index = Some(self.bump_order_send(channel));
            order_channel = Some(channel);
        } else if reliability.is_sequenced() {
            order_index = Some(self.bump_sequence_send(channel));
            order_channel = Some(channel);
        }

        let needs_split = CUSTOM_PACKET_BASE_SIZE + Frame::size_of(reliability, false, &payload)
            > self.mtu as usize;

        if !needs_split {
            let mut frame = Frame::new(reliability, payload);
            frame.order_index = order_index;
            frame.order_channel = order_channel;

            if reliability.is_reliable() {
                frame.message_index = Some(self.bump_message_index());
            }

            let index = frame.message_index;
            self.send_queue.push_back(frame);
            return index;
        }

        let chunk_size =
            self.mtu as usize - CUSTOM_PACKET_BASE_SIZE - Frame::size_of(reliability, true, &[]);
        let chunks: Vec<&[u8]> = payload.chunks(chunk_size).collect();
        let split_id = self.bump_split_id();

        let mut first_index = None;
        for (i, chunk) in chunks.iter().enumerate() {
            let mut frame = Frame::new(reliability, chunk.to_vec());
            frame.order_index = order_index;
            frame.order_channel = order_channel;
            frame.split = Some(SplitMeta {
                count: chunks.len() as i32,
                id: split_id,
                index: i as i32,
            });

            if reliability.is_reliable() {
                frame.message_index = Some(self.bump_message_index());
                first_index = first_index.or(frame.message_index);
            }

            self.send_queue.push_back(frame);
        }

        first_index
    }

    /// Wraps frames into a custom datagram, records recovery and ack-receipt
    /// bookkeeping and pushes the encoded bytes to the outbox.
    fn send_frame_set(&mut self, frames: Vec<Frame>, record_recovery: bool) -> Triad {
        let sequence = self.send_seq;
        self.send_seq = self.send_seq.bump();

        let set = FrameSet { sequence, frames };

        let receipts: Vec<Frame> = set
            .frames
            .iter()
            .filter(|frame| frame.reliability.is_ack_needed())
            .cloned()
            .collect();
        if !receipts.is_empty() {
            self.ack_receipts.insert(sequence.get(), receipts);
        }

        if let Some(handshake_index) = self.handshake_frame_index {
            if set
                .frames
                .iter()
                .any(|frame| frame.message_index == Some(handshake_index))
            {
                self.handshake_record = Some(Record::single(sequence));
            }
        }

        if record_recovery {
            let reliable: Vec<Frame> = set
                .frames
                .iter()
                .filter(|frame| frame.reliability.is_reliable())
                .cloned()
                .collect();
            if !reliable.is_empty() {
                self.recovery.insert(sequence.get(), reliable);
            }
        }

        match set.write_to_vec() {
            Ok(buffer) => self.outbox.push(buffer),
            Err(error) => warn!("[{}] failed to encode datagram: {}", self.addr, error),
        }

        self.packets_sent += 1;
        self.last_send_time = Instant::now();

        sequence
    }

    fn push_acknowledge(&mut self, ack: Acknowledge) {
        match ack.write_to_vec() {
            Ok(buffer) => {
                self.outbox.push(buffer);
                self.last_send_time = Instant::now();
            }
            Err(error) => warn!("[{}] failed to encode acknowledge: {}", self.addr, error),
        }
    }

    /*
        Tick
    */

    /// Flushes queues, retransmits, probes and times out. Returns `false`
    /// once the session is dead and should be removed.
    pub fn update(&mut self) -> bool {
        self.update_at(Instant::now())
    }

    fn update_at(&mut self, current: Instant) -> bool {
        if self.state.is_disconnected() {
            return false;
        }

        // batch queued frames into as few datagrams as the MTU allows
        while !self.send_queue.is_empty() && self.packets_sent < MAX_PACKETS_PER_SECOND {
            let mut frames = Vec::new();
            let mut size = CUSTOM_PACKET_BASE_SIZE;

            loop {
                let fits = match self.send_queue.front() {
                    Some(front) => frames.is_empty() || size + front.size() <= self.mtu as usize,
                    None => false,
                };

                if !fits {
                    break;
                }

                if let Some(frame) = self.send_queue.pop_front() {
                    size += frame.size();
                    frames.push(frame);
                }
            }

            self.send_frame_set(frames, true);
        }

        // resend the oldest unacknowledged datagram
        if current.duration_since(self.last_recovery_time) >= RECOVERY_SEND_INTERVAL {
            if let Some((_, frames)) = self.recovery.poll_oldest() {
                self.send_frame_set(frames, true);
                self.last_recovery_time = current;
            }
        }

        if self.state.is_connected()
            && current.duration_since(self.last_ping_time) >= PING_SEND_INTERVAL
        {
            let ping = crate::protocol::packet::online::ConnectedPing {
                timestamp: current_epoch() as i64,
            };
            self.queue_online(ping.into(), Reliability::Unreliable, DEFAULT_CHANNEL);
            self.last_ping_time = current;
        }

        if self.state.is_connected()
            && current.duration_since(self.last_recv_time) >= DETECTION_SEND_INTERVAL
            && current.duration_since(self.last_keepalive_time) >= DETECTION_SEND_INTERVAL
        {
            self.queue_online(
                DetectLostConnections {}.into(),
                Reliability::Unreliable,
                DEFAULT_CHANNEL,
            );
            self.last_keepalive_time = current;
            debug!("[{}] sent DetectLostConnections", self.addr);
        }

        if current.duration_since(self.last_recv_time) >= SESSION_TIMEOUT {
            for handler in self.handlers.iter() {
                handler.timeout(self.guid);
            }

            self.state = SessionState::Disconnected;
            return false;
        }

        if current.duration_since(self.last_counter_reset) >= COUNTER_RESET_INTERVAL {
            if self.packets_received > MAX_PACKETS_PER_SECOND {
                self.flood_tripped = true;
            }

            self.packets_sent = 0;
            self.packets_received = 0;
            self.last_counter_reset = current;
        }

        true
    }

    /// Marks the session disconnected, telling the peer best effort. The
    /// server drains the outbox and fires CloseConn after removal.
    pub fn close(&mut self) {
        if self.state.is_disconnected() {
            return;
        }

        for handler in self.handlers.iter() {
            handler.close_pre_conn(self.guid);
        }

        if let Ok(buffer) = OnlinePacket::from(DisconnectionNotification {}).write_to_bytes() {
            let frame = Frame::new(Reliability::Unreliable, buffer.as_slice().to_vec());
            self.send_frame_set(vec![frame], false);
        }

        self.state = SessionState::Disconnected;
    }

    /*
        Counters
    */

    fn bump_message_index(&mut self) -> Triad {
        let index = self.message_index;
        self.message_index = self.message_index.bump();
        index
    }

    fn bump_order_send(&mut self, channel: u8) -> Triad {
        let index = self.order_send[channel as usize];
        self.order_send[channel as usize] = index.bump();
        index
    }

    fn bump_sequence_send(&mut self, channel: u8) -> Triad {
        let index = self.sequence_send[channel as usize];
        self.sequence_send[channel as usize] = index.bump();
        index
    }

    fn bump_split_id(&mut self) -> u16 {
        let id = self.split_id;
        self.split_id = self.split_id.wrapping_add(1);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::handler::Handler;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Sink {
        packets: Mutex<Vec<Vec<u8>>>,
        opened: Mutex<Vec<i64>>,
        receipts: Mutex<Vec<Vec<u8>>>,
        timeouts: Mutex<Vec<i64>>,
    }

    impl Handler for Sink {
        fn handle_packet(&self, _guid: i64, payload: &[u8]) {
            self.packets.lock().unwrap().push(payload.to_vec());
        }

        fn open_conn(&self, guid: i64, _addr: SocketAddr) {
            self.opened.lock().unwrap().push(guid);
        }

        fn handle_send_packet(&self, _addr: SocketAddr, payload: &[u8]) {
            self.receipts.lock().unwrap().push(payload.to_vec());
        }

        fn timeout(&self, guid: i64) {
            self.timeouts.lock().unwrap().push(guid);
        }
    }

    fn connected_session() -> (Session, Arc<Sink>) {
        let sink = Arc::new(Sink::default());
        let handlers = Arc::new(Handlers::from(vec![sink.clone() as Arc<dyn Handler>]));

        let mut session = Session::new("127.0.0.1:40000".parse().unwrap(), 7, 1400, handlers);
        session.state = SessionState::Connected;
        (session, sink)
    }

    fn user_frame(reliability: Reliability, payload: &[u8]) -> Frame {
        Frame::new(reliability, payload.to_vec())
    }

    fn set_with(sequence: u32, frames: Vec<Frame>) -> FrameSet {
        FrameSet {
            sequence: Triad::new(sequence),
            frames,
        }
    }

    #[test]
    fn ordered_frames_merge_in_index_order() {
        let (mut session, sink) = connected_session();

        let mut frames = Vec::new();
        for (order, message, payload) in [(2u32, 2u32, b"p2"), (0, 0, b"p0"), (1, 1, b"p1")] {
            let mut frame = user_frame(Reliability::ReliableOrdered, &[&[0x90u8][..], &payload[..]].concat());
            frame.message_index = Some(Triad::new(message));
            frame.order_index = Some(Triad::new(order));
            frame.order_channel = Some(0);
            frames.push(frame);
        }

        for (i, frame) in frames.into_iter().enumerate() {
            session.handle_frame_set(set_with(i as u32, vec![frame]));
        }

        let seen = sink.packets.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(&seen[0][1..], b"p0");
        assert_eq!(&seen[1][1..], b"p1");
        assert_eq!(&seen[2][1..], b"p2");
    }

    #[test]
    fn sequenced_frames_drop_older_indexes() {
        let (mut session, sink) = connected_session();

        for (seq, order, payload) in [(0u32, 5u32, b"new"), (1, 3, b"old"), (2, 6, b"fin")] {
            let mut frame = user_frame(
                Reliability::UnreliableSequenced,
                &[&[0x91u8][..], &payload[..]].concat(),
            );
            frame.order_index = Some(Triad::new(order));
            frame.order_channel = Some(0);
            session.handle_frame_set(set_with(seq, vec![frame]));
        }

        let seen = sink.packets.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(&seen[0][1..], b"new");
        assert_eq!(&seen[1][1..], b"fin");
    }

    #[test]
    fn reliable_duplicates_deliver_once() {
        let (mut session, sink) = connected_session();

        for seq in [0u32, 1] {
            let mut frame = user_frame(Reliability::Reliable, &[0x92, 1, 2]);
            frame.message_index = Some(Triad::new(10));
            session.handle_frame_set(set_with(seq, vec![frame]));
        }

        assert_eq!(sink.packets.lock().unwrap().len(), 1);
    }

    #[test]
    fn sequence_gap_emits_nack_range() {
        let (mut session, _sink) = connected_session();

        session.handle_frame_set(set_with(5, vec![user_frame(Reliability::Unreliable, &[0x90])]));
        session.take_outbox();

        session.handle_frame_set(set_with(8, vec![user_frame(Reliability::Unreliable, &[0x90])]));
        let outbox = session.take_outbox();

        // a NACK for [6..7] followed by the ACK for 8
        let nack = Acknowledge::read_from_slice(&outbox[0]).unwrap();
        assert!(nack.is_nack());
        assert_eq!(nack.numbers(), vec![6, 7]);

        let ack = Acknowledge::read_from_slice(&outbox[1]).unwrap();
        assert!(!ack.is_nack());
        assert_eq!(ack.numbers(), vec![8]);
    }

    #[test]
    fn nack_triggers_retransmit_under_new_sequence() {
        let (mut session, _sink) = connected_session();

        session
            .send_packet(vec![0x93, 9, 9], Reliability::Reliable, 0)
            .unwrap();
        session.last_recovery_time = Instant::now();
        assert!(session.update());

        let sent = session.take_outbox();
        assert_eq!(sent.len(), 1);
        let original = FrameSet::read_from_slice(&sent[0]).unwrap();
        assert!(session.recovery.contains(original.sequence.get()));

        session.handle_acknowledge(Acknowledge::nack(vec![Record::single(original.sequence)]));

        let resent_raw = session.take_outbox();
        assert_eq!(resent_raw.len(), 1);
        let resent = FrameSet::read_from_slice(&resent_raw[0]).unwrap();

        assert_ne!(resent.sequence, original.sequence);
        assert_eq!(resent.frames, original.frames);
        assert!(!session.recovery.contains(original.sequence.get()));
        assert!(session.recovery.contains(resent.sequence.get()));
    }

    #[test]
    fn ack_clears_recovery_and_reports_receipts() {
        let (mut session, sink) = connected_session();

        session
            .send_packet(
                vec![0x94, 1],
                Reliability::ReliableOrderedWithAckReceipt,
                0,
            )
            .unwrap();
        session.last_recovery_time = Instant::now();
        session.update();

        let sent = session.take_outbox();
        let set = FrameSet::read_from_slice(&sent[0]).unwrap();

        session.handle_acknowledge(Acknowledge::ack(vec![Record::single(set.sequence)]));

        assert!(session.recovery.is_empty());
        assert!(session.ack_receipts.is_empty());
        assert_eq!(sink.receipts.lock().unwrap().len(), 1);
    }

    #[test]
    fn large_payload_fragments_and_each_fragment_fits_the_mtu() {
        let (mut session, _sink) = connected_session();

        let mut payload = vec![0x95u8];
        payload.extend(std::iter::repeat(0xabu8).take(9_999));

        session
            .send_packet(payload.clone(), Reliability::ReliableOrdered, 0)
            .unwrap();
        session.last_recovery_time = Instant::now();
        session.update();

        let sent = session.take_outbox();
        assert!(sent.len() > 1);

        let mut assembler = SplitAssembler::new();
        let mut total = 0usize;
        let mut reassembled = None;
        let mut message_indexes = HashSet::new();

        for datagram in &sent {
            assert!(datagram.len() <= 1400);
            let set = FrameSet::read_from_slice(datagram).unwrap();
            for frame in &set.frames {
                assert!(frame.is_split());
                assert!(message_indexes.insert(frame.message_index.unwrap().get()));
                total += frame.payload.len();
                if let Some(done) = assembler.insert(frame) {
                    reassembled = Some(done);
                }
            }
        }

        assert_eq!(total, payload.len());
        assert_eq!(reassembled.unwrap(), payload);
    }

    #[test]
    fn handshake_ack_connects_and_notifies() {
        let sink = Arc::new(Sink::default());
        let handlers = Arc::new(Handlers::from(vec![sink.clone() as Arc<dyn Handler>]));
        let mut session = Session::new("127.0.0.1:40000".parse().unwrap(), 77, 1400, handlers);

        // client's ConnectionRequest arrives framed reliably
        let request = crate::protocol::packet::online::ConnectionRequest {
            client_guid: 77,
            timestamp: 11,
            use_security: false,
        };
        let mut frame = Frame::new(
            Reliability::Reliable,
            OnlinePacket::from(request)
                .write_to_bytes()
                .unwrap()
                .as_slice()
                .to_vec(),
        );
        frame.message_index = Some(Triad::new(0));

        session.handle_frame_set(set_with(0, vec![frame]));
        session.last_recovery_time = Instant::now();
        session.update();

        let sent = session.take_outbox();
        // the ACK for datagram 0 plus the accepted reply
        let accepted = sent
            .iter()
            .find(|buffer| FrameSet::ID_RANGE.contains(&buffer[0]))
            .expect("accepted datagram");
        let set = FrameSet::read_from_slice(accepted).unwrap();
        assert_eq!(
            set.frames[0].reliability,
            Reliability::ReliableOrderedWithAckReceipt
        );

        assert_eq!(session.state(), SessionState::Handshaking);

        session.handle_acknowledge(Acknowledge::ack(vec![Record::single(set.sequence)]));
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(sink.opened.lock().unwrap().as_slice(), &[77]);
    }

    #[test]
    fn times_out_after_prolonged_silence() {
        let (mut session, sink) = connected_session();

        let now = Instant::now();
        assert!(session.update_at(now + SESSION_TIMEOUT - Duration::from_millis(20)));
        assert!(!session.update_at(now + SESSION_TIMEOUT + Duration::from_millis(20)));

        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(sink.timeouts.lock().unwrap().as_slice(), &[7]);
    }

    #[test]
    fn flood_flag_trips_after_counter_reset() {
        let (mut session, _sink) = connected_session();

        for seq in 0..=(MAX_PACKETS_PER_SECOND as u32) {
            session.handle_frame_set(set_with(seq, vec![user_frame(Reliability::Unreliable, &[0x90])]));
        }
        session.take_outbox();

        let now = Instant::now();
        assert!(session.update_at(now + COUNTER_RESET_INTERVAL + Duration::from_millis(5)));
        assert!(session.take_flood_flag());
        assert!(!session.take_flood_flag());
    }

    #[test]
    fn ping_is_answered_with_echoing_pong() {
        let (mut session, _sink) = connected_session();

        let ping = crate::protocol::packet::online::ConnectedPing { timestamp: 42 };
        let frame = Frame::new(
            Reliability::Unreliable,
            OnlinePacket::from(ping)
                .write_to_bytes()
                .unwrap()
                .as_slice()
                .to_vec(),
        );

        session.handle_frame_set(set_with(0, vec![frame]));
        session.update();

        let sent = session.take_outbox();
        let pong_set = sent
            .iter()
            .filter(|buffer| FrameSet::ID_RANGE.contains(&buffer[0]))
            .map(|buffer| FrameSet::read_from_slice(buffer).unwrap())
            .next()
            .expect("pong datagram");

        match OnlinePacket::read_from_slice(&pong_set.frames[0].payload).unwrap() {
            OnlinePacket::ConnectedPong(pong) => assert_eq!(pong.timestamp, 42),
            other => panic!("unexpected packet {:?}", other),
        }
    }
}
