mod event;
mod state;
mod stats;
mod timer;

pub use event::AssociationEvent;
pub use state::AssociationState;
pub use stats::AssociationStats;

use std::collections::VecDeque;
use std::time::Instant;

use bytes::Bytes;
use fxhash::FxHashMap;
use rand::Rng;

use self::state::AckState;
use self::timer::{RtoManager, Timer, TimerTable, ACK_INTERVAL};
use crate::chunk::abort::{CAUSE_INVALID_MANDATORY_PARAMETER, CAUSE_PROTOCOL_VIOLATION, CAUSE_USER_INITIATED_ABORT};
use crate::chunk::{
    AbortChunk, Chunk, DataChunk, ErrorCause, GapAckBlock, InitChunk, Param,
    PayloadProtocolIdentifier, SackChunk, CHUNK_HEADER_SIZE,
};
use crate::config::{TransportConfig, COMMON_HEADER_SIZE, DATA_CHUNK_HEADER_SIZE};
use crate::cookie::{CookieAuthority, Tcb};
use crate::error::AssociationError;
use crate::packet::{CommonHeader, Packet};
use crate::queue::payload_queue::{PayloadQueue, SentChunk};
use crate::queue::pending::PendingQueue;
use crate::queue::reassembly::ReassemblyQueue;
use crate::util::{get_padding_size, sna32gte, sna32lt, sna32lte};

/// Tracks TSNs received out of order (ahead of the cumulative high-water
/// mark) so an outbound SACK can report gap-ack blocks and duplicates.
///
/// Deliberately separate from [`PayloadQueue`]: that queue's entries are
/// wrapped in [`SentChunk`], which carries retransmit bookkeeping
/// (`retransmit`, `miss_indicator`, `since`, `num_transmits`) that makes no
/// sense for a chunk we *received* rather than sent. The received side gets
/// its own minimal TSN tracker instead of forcing those fields onto data
/// that never needed them.
#[derive(Debug, Default)]
struct ReceivedTsnLog {
    sorted: Vec<u32>,
    dup_tsn: Vec<u32>,
}

impl ReceivedTsnLog {
    fn push(&mut self, tsn: u32, cumulative_tsn: u32) -> bool {
        if self.sorted.contains(&tsn) || sna32lte(tsn, cumulative_tsn) {
            self.dup_tsn.push(tsn);
            return false;
        }
        self.sorted.push(tsn);
        self.sorted.sort_by(|a, b| {
            if sna32lt(*a, *b) {
                std::cmp::Ordering::Less
            } else {
                std::cmp::Ordering::Greater
            }
        });
        true
    }

    /// Advances `cumulative_tsn` across any contiguous run at the front of
    /// the out-of-order set, removing those entries.
    fn advance_cumulative(&mut self, cumulative_tsn: &mut u32) {
        while let Some(&t) = self.sorted.first() {
            if t != cumulative_tsn.wrapping_add(1) {
                break;
            }
            *cumulative_tsn = t;
            self.sorted.remove(0);
        }
    }

    fn pop_duplicates(&mut self) -> Vec<u32> {
        self.dup_tsn.drain(..).collect()
    }

    fn get_gap_ack_blocks(&self, cumulative_tsn: u32) -> Vec<GapAckBlock> {
        if self.sorted.is_empty() {
            return vec![];
        }
        let mut b = GapAckBlock::default();
        let mut blocks = vec![];
        for (i, tsn) in self.sorted.iter().enumerate() {
            let diff = if *tsn >= cumulative_tsn {
                (*tsn - cumulative_tsn) as u16
            } else {
                0
            };
            if i == 0 {
                b.start = diff;
                b.end = diff;
            } else if b.end + 1 == diff {
                b.end += 1;
            } else {
                blocks.push(b);
                b.start = diff;
                b.end = diff;
            }
        }
        blocks.push(b);
        blocks
    }
}

fn data_chunk_padded_len(c: &DataChunk) -> usize {
    let unpadded = CHUNK_HEADER_SIZE + (DATA_CHUNK_HEADER_SIZE as usize - 4) + c.user_data.len();
    unpadded + get_padding_size(unpadded)
}

fn random_tag() -> u32 {
    loop {
        let t: u32 = rand::thread_rng().gen();
        if t != 0 {
            return t;
        }
    }
}

/// The per-peer SCTP association state machine. Owns no socket: the host
/// pushes inbound bytes in via [`Association::write_incoming`] and pulls
/// assembled outbound packets out via [`Association::read_outgoing`].
pub struct Association {
    config: TransportConfig,
    state: AssociationState,
    last_error: AssociationError,

    source_port: u16,
    destination_port: u16,

    my_tag: u32,
    peer_tag: u32,

    next_tsn: u32,
    last_rcvd_tsn: u32,
    cumulative_tsn_ack_point: u32,

    num_inbound_streams: u16,
    num_outbound_streams: u16,
    stream2ssn: FxHashMap<u16, u16>,
    reassembly: FxHashMap<u16, ReassemblyQueue>,

    local_window_credit: u32,
    remote_window_credit: u32,
    remote_used_credit: u32,
    cwnd: u32,
    ssthresh: u32,
    partial_bytes_acked: u32,
    mtu: u32,
    in_fast_recovery: bool,
    fast_recovery_exit_tsn: u32,

    control_queue: VecDeque<Chunk>,
    pending_queue: PendingQueue,
    retransmit_queue: VecDeque<DataChunk>,
    inflight_queue: PayloadQueue,
    recv_tsn_log: ReceivedTsnLog,
    outgoing: VecDeque<Bytes>,
    events: VecDeque<AssociationEvent>,

    cookies: CookieAuthority,
    clock_epoch: Instant,
    init_chunk: Option<Chunk>,
    cookie_echo_bytes: Option<Bytes>,

    rto: RtoManager,
    timers: TimerTable,
    ack_state: AckState,

    stats: AssociationStats,
}

impl Association {
    pub fn new(source_port: u16, destination_port: u16, config: TransportConfig, now: Instant) -> Self {
        let rto = RtoManager::new(config.rto_initial);
        let cookies = CookieAuthority::new(config.cookie_lifetime);
        let mtu = config.mtu;
        let local_window_credit = config.max_receive_buffer_size;
        let num_outbound_streams = config.max_num_outbound_streams;
        let num_inbound_streams = config.max_num_inbound_streams;
        Association {
            config,
            state: AssociationState::Closed,
            last_error: AssociationError::None,
            source_port,
            destination_port,
            my_tag: 0,
            peer_tag: 0,
            next_tsn: 0,
            last_rcvd_tsn: 0,
            cumulative_tsn_ack_point: 0,
            num_inbound_streams,
            num_outbound_streams,
            stream2ssn: FxHashMap::default(),
            reassembly: FxHashMap::default(),
            local_window_credit,
            remote_window_credit: 0,
            remote_used_credit: 0,
            cwnd: mtu.min(4380),
            ssthresh: u32::MAX,
            partial_bytes_acked: 0,
            mtu,
            in_fast_recovery: false,
            fast_recovery_exit_tsn: 0,
            control_queue: VecDeque::new(),
            pending_queue: PendingQueue::new(),
            retransmit_queue: VecDeque::new(),
            inflight_queue: PayloadQueue::new(),
            recv_tsn_log: ReceivedTsnLog::default(),
            outgoing: VecDeque::new(),
            events: VecDeque::new(),
            cookies,
            clock_epoch: now,
            init_chunk: None,
            cookie_echo_bytes: None,
            rto,
            timers: TimerTable::new(),
            ack_state: AckState::Idle,
            stats: AssociationStats::default(),
        }
    }

    pub fn state(&self) -> AssociationState {
        self.state
    }

    pub fn last_error(&self) -> AssociationError {
        self.last_error
    }

    pub fn stats(&self) -> &AssociationStats {
        &self.stats
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn poll_event(&mut self) -> Option<AssociationEvent> {
        self.events.pop_front()
    }

    pub fn poll_timeout(&self) -> Option<Instant> {
        self.timers.next_timeout()
    }

    pub fn read_outgoing(&mut self) -> Option<Bytes> {
        self.outgoing.pop_front()
    }

    pub fn read_message(&mut self, stream_id: u16) -> Option<(PayloadProtocolIdentifier, Bytes)> {
        let rq = self.reassembly.get_mut(&stream_id)?;
        let msg = rq.read()?;
        Some((msg.ppid, msg.data))
    }

    fn now_millis(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.clock_epoch).as_millis() as u64
    }

    /// Begins the four-way handshake by sending an INIT. A no-op (logged as
    /// a warning) unless the association is `Closed`.
    pub fn associate(&mut self, now: Instant) {
        if self.state != AssociationState::Closed {
            log::warn!("associate() called while state is {}, ignoring", self.state);
            return;
        }
        self.my_tag = random_tag();
        self.next_tsn = self.my_tag;
        self.cumulative_tsn_ack_point = self.my_tag.wrapping_sub(1);
        let init = InitChunk {
            initiate_tag: self.my_tag,
            advertised_receiver_window_credit: self.local_window_credit,
            num_outbound_streams: self.num_outbound_streams,
            num_inbound_streams: self.num_inbound_streams,
            initial_tsn: self.next_tsn,
            params: vec![],
        };
        let chunk = Chunk::Init(init);
        self.control_queue.push_back(chunk.clone());
        self.init_chunk = Some(chunk);
        self.state = AssociationState::CookieWait;
        self.timers.start(Timer::T1Init, now, self.rto.get_rto());
        log::debug!("association state: Closed -> CookieWait");
        self.try_send(now);
    }

    /// User-initiated graceful close (RFC 4960 §9.2). Not part of the
    /// documented host API table, but the natural complement to the
    /// `ShutdownPending`/`ShutdownSent` states the state machine defines.
    pub fn shutdown(&mut self, now: Instant) {
        if self.state != AssociationState::Established {
            log::warn!("shutdown() called while state is {}, ignoring", self.state);
            return;
        }
        self.state = AssociationState::ShutdownPending;
        self.try_send(now);
    }

    pub fn write(
        &mut self,
        stream_id: u16,
        unordered: bool,
        ppid: PayloadProtocolIdentifier,
        data: Bytes,
        now: Instant,
    ) -> Result<(), AssociationError> {
        if self.state != AssociationState::Established {
            return Err(AssociationError::WrongState);
        }
        let max_fragment = (self.mtu as usize)
            .saturating_sub(COMMON_HEADER_SIZE as usize + DATA_CHUNK_HEADER_SIZE as usize)
            .max(1);

        let ssn = if unordered {
            0
        } else {
            *self.stream2ssn.entry(stream_id).or_insert(0)
        };

        let total_len = data.len();
        let mut offset = 0usize;
        let mut fragments = vec![];
        loop {
            let end = (offset + max_fragment).min(total_len);
            let beginning = offset == 0;
            let ending = end == total_len;
            let tsn = self.next_tsn;
            self.next_tsn = self.next_tsn.wrapping_add(1);
            fragments.push(DataChunk {
                unordered,
                beginning_fragment: beginning,
                ending_fragment: ending,
                tsn,
                stream_identifier: stream_id,
                stream_sequence_number: ssn,
                ppid,
                user_data: data.slice(offset..end),
            });
            offset = end;
            if ending {
                break;
            }
        }

        if !unordered {
            if let Some(counter) = self.stream2ssn.get_mut(&stream_id) {
                *counter = counter.wrapping_add(1);
            }
        }

        log::trace!(
            "queued message of {} bytes on stream {} as {} fragments",
            total_len,
            stream_id,
            fragments.len()
        );
        for f in fragments {
            self.pending_queue.push(f);
        }
        self.try_send(now);
        Ok(())
    }

    /// Transitions to `Closed`, discards all queued work, and attempts to
    /// notify the peer with a final ABORT.
    pub fn abort(&mut self, kind: AssociationError, now: Instant) {
        if self.state == AssociationState::Closed {
            return;
        }
        log::warn!("aborting association: {kind}");
        self.control_queue.clear();
        self.pending_queue = PendingQueue::new();
        self.retransmit_queue.clear();
        self.inflight_queue = PayloadQueue::new();
        self.control_queue.push_back(Chunk::Abort(AbortChunk {
            error_causes: vec![ErrorCause::new(abort_cause_for(kind))],
        }));
        self.state = AssociationState::Closed;
        self.last_error = kind;
        self.events.push_back(AssociationEvent::ErrorOccurred { error: kind });
        self.try_send(now);
    }

    pub fn handle_timeout(&mut self, now: Instant) {
        for timer in Timer::VALUES {
            let (expired, failed, _count) = self.timers.is_expired(timer, now);
            if !expired {
                continue;
            }
            if failed {
                self.abort(AssociationError::Timeout, now);
                return;
            }
            match timer {
                Timer::T1Init => {
                    if let Some(init) = &self.init_chunk {
                        self.control_queue.push_back(init.clone());
                    }
                    self.timers.start(Timer::T1Init, now, self.rto.get_rto());
                }
                Timer::T1Cookie => {
                    if let Some(cookie) = &self.cookie_echo_bytes {
                        self.control_queue.push_back(Chunk::CookieEcho(cookie.clone()));
                    }
                    self.timers.start(Timer::T1Cookie, now, self.rto.get_rto());
                }
                Timer::T2Shutdown => {
                    match self.state {
                        AssociationState::ShutdownSent => self.control_queue.push_back(Chunk::Shutdown {
                            cumulative_tsn_ack: self.cumulative_tsn_ack_point,
                        }),
                        AssociationState::ShutdownAckSent => self.control_queue.push_back(Chunk::ShutdownAck),
                        _ => {}
                    }
                    self.timers.start(Timer::T2Shutdown, now, self.rto.get_rto());
                }
                Timer::T3Rtx => {
                    self.stats.inc_t3timeouts();
                    self.ssthresh = (self.cwnd / 2).max(4 * self.mtu);
                    self.cwnd = self.mtu;
                    self.partial_bytes_acked = 0;
                    self.in_fast_recovery = false;
                    self.inflight_queue.mark_all_to_retransmit();
                    for sc in self.inflight_queue.take_retransmits() {
                        self.remote_used_credit =
                            self.remote_used_credit.saturating_sub(sc.data.user_data.len() as u32);
                        self.retransmit_queue.push_back(sc.data);
                    }
                    log::debug!(
                        "T3-rtx fired: cwnd={} ssthresh={} inflight={}",
                        self.cwnd,
                        self.ssthresh,
                        self.inflight_queue.get_num_bytes()
                    );
                    self.timers.start(Timer::T3Rtx, now, self.rto.get_rto());
                }
                Timer::Ack => {
                    self.stats.inc_ack_timeouts();
                    self.ack_state = AckState::Immediate;
                }
            }
        }
        self.try_send(now);
    }

    pub fn write_incoming(&mut self, raw: &[u8], now: Instant) {
        if !Packet::is_valid_sctp(raw) {
            log::trace!("dropping packet that failed minimal validation or checksum");
            return;
        }
        let bytes = Bytes::copy_from_slice(raw);
        let packet = match Packet::unmarshal(&bytes) {
            Ok(p) => p,
            Err(_) => {
                log::trace!("dropping packet with malformed chunk framing");
                return;
            }
        };

        if self.state != AssociationState::Closed && packet.common_header.verification_tag != self.my_tag {
            log::trace!("dropping packet with mismatched verification tag");
            return;
        }

        let single_chunk = packet.chunks.len() == 1;
        for chunk in packet.chunks {
            match chunk {
                Chunk::Init(init) => self.handle_init(init, &packet.common_header, single_chunk, now),
                Chunk::InitAck(init_ack) => self.handle_init_ack(init_ack, single_chunk, now),
                Chunk::CookieEcho(cookie) => self.handle_cookie_echo(cookie, now),
                Chunk::CookieAck => self.handle_cookie_ack(),
                Chunk::Sack(sack) => self.handle_sack(sack, now),
                Chunk::Data(data) => self.handle_data(data, now),
                Chunk::Shutdown { cumulative_tsn_ack } => self.handle_shutdown(cumulative_tsn_ack, now),
                Chunk::ShutdownAck => self.handle_shutdown_ack(),
                Chunk::ShutdownComplete => self.handle_shutdown_complete(),
                Chunk::Heartbeat(info) => self.control_queue.push_back(Chunk::HeartbeatAck(info)),
                Chunk::HeartbeatAck(_) => log::trace!("received HEARTBEAT-ACK"),
                Chunk::Abort(_) => self.handle_abort(),
                Chunk::Unknown(t) => log::trace!("ignoring unrecognized chunk type {t}"),
            }
            if self.state == AssociationState::Closed && self.last_error != AssociationError::None {
                break;
            }
        }

        self.try_send(now);
    }

    /// `peerTag := initiateTag`, negotiates window/stream counts and the
    /// initial congestion window.
    fn init_remote(&mut self, init: &InitChunk) -> Result<(), ()> {
        if init.initiate_tag == 0 {
            return Err(());
        }
        self.peer_tag = init.initiate_tag;
        self.remote_window_credit = init.advertised_receiver_window_credit;
        self.ssthresh = self.remote_window_credit;
        self.last_rcvd_tsn = init.initial_tsn.wrapping_sub(1);
        self.num_outbound_streams = self.num_outbound_streams.min(init.num_inbound_streams);
        self.num_inbound_streams = self.num_inbound_streams.min(init.num_outbound_streams);
        self.cwnd = (4 * self.mtu).min((2 * self.mtu).max(4380));
        log::debug!(
            "negotiated streams out={} in={}, cwnd={} ssthresh={}",
            self.num_outbound_streams,
            self.num_inbound_streams,
            self.cwnd,
            self.ssthresh
        );
        Ok(())
    }

    fn handle_init(&mut self, init: InitChunk, header: &CommonHeader, single_chunk: bool, now: Instant) {
        if !single_chunk || header.verification_tag != 0 {
            self.abort(AssociationError::VerificationTag, now);
            return;
        }
        if init.check().is_err() {
            self.abort(AssociationError::ProtocolViolation, now);
            return;
        }
        self.source_port = header.destination_port;
        self.destination_port = header.source_port;
        if self.init_remote(&init).is_err() {
            self.abort(AssociationError::VerificationTag, now);
            return;
        }
        self.cookies.rotate();
        if self.my_tag == 0 {
            self.my_tag = random_tag();
        }
        if self.next_tsn == 0 {
            self.next_tsn = self.my_tag;
        }
        let tcb = Tcb {
            my_tag: self.my_tag,
            peer_tag: self.peer_tag,
            next_tsn: self.next_tsn,
            last_rcvd_tsn: self.last_rcvd_tsn,
            num_inbound_streams: self.num_inbound_streams,
            num_outbound_streams: self.num_outbound_streams,
            created_at_millis: self.now_millis(now),
            source_port: self.source_port,
            destination_port: self.destination_port,
        };
        let cookie = self.cookies.mint(tcb);
        let init_ack = InitChunk {
            initiate_tag: self.my_tag,
            advertised_receiver_window_credit: self.local_window_credit,
            num_outbound_streams: self.num_outbound_streams,
            num_inbound_streams: self.num_inbound_streams,
            initial_tsn: self.next_tsn,
            params: vec![Param::StateCookie(cookie)],
        };
        self.control_queue.push_back(Chunk::InitAck(init_ack));
        log::debug!("replied to INIT with INIT-ACK; state remains {}", self.state);
    }

    fn handle_init_ack(&mut self, init_ack: InitChunk, single_chunk: bool, now: Instant) {
        if !single_chunk {
            self.abort(AssociationError::ProtocolViolation, now);
            return;
        }
        if self.state != AssociationState::CookieWait {
            log::debug!("ignoring INIT-ACK in state {}", self.state);
            return;
        }
        if init_ack.check().is_err() {
            self.abort(AssociationError::ProtocolViolation, now);
            return;
        }
        let cookie = match init_ack.state_cookie() {
            Some(c) => c.clone(),
            None => {
                self.abort(AssociationError::InvalidCookie, now);
                return;
            }
        };
        if self.init_remote(&init_ack).is_err() {
            self.abort(AssociationError::VerificationTag, now);
            return;
        }
        self.timers.stop(Timer::T1Init);
        self.init_chunk = None;
        self.control_queue.push_back(Chunk::CookieEcho(cookie.clone()));
        self.cookie_echo_bytes = Some(cookie);
        self.state = AssociationState::CookieEchoed;
        self.timers.start(Timer::T1Cookie, now, self.rto.get_rto());
        log::debug!("association state: CookieWait -> CookieEchoed");
    }

    fn handle_cookie_echo(&mut self, cookie: Bytes, now: Instant) {
        let tcb = match self.cookies.verify(&cookie, self.now_millis(now)) {
            Ok(tcb) => tcb,
            Err(_) => {
                self.abort(AssociationError::InvalidCookie, now);
                return;
            }
        };
        self.my_tag = tcb.my_tag;
        self.peer_tag = tcb.peer_tag;
        self.next_tsn = tcb.next_tsn;
        self.last_rcvd_tsn = tcb.last_rcvd_tsn;
        self.num_inbound_streams = tcb.num_inbound_streams;
        self.num_outbound_streams = tcb.num_outbound_streams;
        self.source_port = tcb.source_port;
        self.destination_port = tcb.destination_port;
        self.cumulative_tsn_ack_point = self.next_tsn.wrapping_sub(1);
        self.control_queue.push_back(Chunk::CookieAck);
        self.state = AssociationState::Established;
        self.events.push_back(AssociationEvent::Established);
        log::debug!("association state: Closed -> Established (via COOKIE-ECHO)");
    }

    fn handle_cookie_ack(&mut self) {
        if self.state != AssociationState::CookieEchoed {
            log::debug!("ignoring COOKIE-ACK in state {}", self.state);
            return;
        }
        self.timers.stop(Timer::T1Cookie);
        self.cookie_echo_bytes = None;
        self.state = AssociationState::Established;
        self.events.push_back(AssociationEvent::Established);
        log::debug!("association state: CookieEchoed -> Established");
    }

    fn handle_sack(&mut self, sack: SackChunk, now: Instant) {
        if !self.can_receive_data() {
            return;
        }
        self.stats.inc_sacks();

        if sna32lt(sack.cumulative_tsn_ack, self.cumulative_tsn_ack_point) {
            return;
        }

        let mut gap_freed = 0usize;
        for block in &sack.gap_ack_blocks {
            if block.end < block.start {
                log::trace!("dropping inverted gap-ack block {}..{}", block.start, block.end);
                continue;
            }
            for offset in block.start..=block.end {
                let tsn = sack.cumulative_tsn_ack.wrapping_add(offset as u32);
                gap_freed += self.inflight_queue.mark_as_acked(tsn);
            }
        }

        let mut cum_freed = 0usize;
        let mut rtt_sample = None;
        while sna32lte(self.cumulative_tsn_ack_point.wrapping_add(1), sack.cumulative_tsn_ack) {
            let tsn = self.cumulative_tsn_ack_point.wrapping_add(1);
            self.cumulative_tsn_ack_point = tsn;
            if let Some(c) = self.inflight_queue.pop(tsn) {
                cum_freed += c.data.user_data.len();
                if c.num_transmits == 1 && rtt_sample.is_none() {
                    rtt_sample = Some(now.saturating_duration_since(c.since).as_millis() as u64);
                }
            }
        }

        if self.in_fast_recovery && sna32gte(self.cumulative_tsn_ack_point, self.fast_recovery_exit_tsn) {
            self.in_fast_recovery = false;
        }

        let total_freed = gap_freed + cum_freed;
        self.remote_used_credit = self.remote_used_credit.saturating_sub(total_freed as u32);
        self.remote_window_credit = sack.advertised_receiver_window_credit;

        if let Some(rtt) = rtt_sample {
            self.rto.set_new_rtt(rtt);
        }

        if !self.in_fast_recovery && total_freed > 0 {
            if self.cwnd <= self.ssthresh {
                self.cwnd += (total_freed as u32).min(self.cwnd);
            } else {
                self.partial_bytes_acked += total_freed as u32;
                if self.partial_bytes_acked >= self.cwnd && !self.pending_queue.is_empty() {
                    self.cwnd += self.mtu;
                    self.partial_bytes_acked = self.partial_bytes_acked.saturating_sub(self.cwnd);
                }
            }
        }

        if let Some(last) = sack.gap_ack_blocks.last() {
            let highest = sack.cumulative_tsn_ack.wrapping_add(last.end as u32);
            if self.inflight_queue.increment_miss_indicator_below(highest) {
                self.stats.inc_fast_retrans();
                if !self.in_fast_recovery {
                    self.ssthresh = (self.cwnd / 2).max(4 * self.mtu);
                    self.cwnd = self.ssthresh;
                    self.partial_bytes_acked = 0;
                    self.in_fast_recovery = true;
                    self.fast_recovery_exit_tsn = self.next_tsn.wrapping_sub(1);
                    log::debug!("fast retransmit entered: cwnd={} ssthresh={}", self.cwnd, self.ssthresh);
                }
                for sc in self.inflight_queue.take_retransmits() {
                    self.remote_used_credit =
                        self.remote_used_credit.saturating_sub(sc.data.user_data.len() as u32);
                    self.retransmit_queue.push_back(sc.data);
                }
            }
        }

        if !sack.duplicate_tsn.is_empty() {
            log::trace!("peer reported {} duplicate TSNs", sack.duplicate_tsn.len());
        }

        if self.inflight_queue.is_empty() {
            self.timers.stop(Timer::T3Rtx);
        } else {
            self.timers.start(Timer::T3Rtx, now, self.rto.get_rto());
        }
    }

    fn can_receive_data(&self) -> bool {
        matches!(
            self.state,
            AssociationState::Established
                | AssociationState::ShutdownPending
                | AssociationState::ShutdownSent
                | AssociationState::ShutdownReceived
                | AssociationState::ShutdownAckSent
        )
    }

    fn handle_data(&mut self, data: DataChunk, now: Instant) {
        if !matches!(
            self.state,
            AssociationState::Established | AssociationState::ShutdownPending | AssociationState::ShutdownSent
        ) {
            return;
        }
        self.stats.inc_datas();

        let cumulative = self.last_rcvd_tsn;
        let out_of_order = !sna32lte(data.tsn, cumulative.wrapping_add(1));
        let stream_id = data.stream_identifier;
        if self.recv_tsn_log.push(data.tsn, cumulative) {
            self.recv_tsn_log.advance_cumulative(&mut self.last_rcvd_tsn);
            let rq = self.reassembly.entry(stream_id).or_insert_with(ReassemblyQueue::new);
            rq.push(data);
            if rq.is_readable() {
                self.events.push_back(AssociationEvent::MessageAvailable { stream_id });
            }
        }

        match self.ack_state {
            AckState::Idle => {
                self.ack_state = AckState::Delay;
                self.timers.start(Timer::Ack, now, ACK_INTERVAL);
            }
            AckState::Delay => self.ack_state = AckState::Immediate,
            AckState::Immediate => {}
        }
        if out_of_order {
            self.ack_state = AckState::Immediate;
        }
    }

    fn handle_shutdown(&mut self, _cumulative_tsn_ack: u32, now: Instant) {
        if !matches!(self.state, AssociationState::Established | AssociationState::ShutdownPending) {
            return;
        }
        self.state = AssociationState::ShutdownReceived;
        self.check_shutdown_drained(now);
    }

    fn handle_shutdown_ack(&mut self) {
        if !matches!(self.state, AssociationState::ShutdownSent | AssociationState::ShutdownAckSent) {
            return;
        }
        self.timers.stop(Timer::T2Shutdown);
        self.control_queue.push_back(Chunk::ShutdownComplete);
        self.state = AssociationState::Closed;
        log::debug!("association state -> Closed (shutdown complete)");
    }

    fn handle_shutdown_complete(&mut self) {
        if self.state != AssociationState::ShutdownAckSent {
            return;
        }
        self.timers.stop(Timer::T2Shutdown);
        self.state = AssociationState::Closed;
        log::debug!("association state -> Closed (shutdown complete received)");
    }

    fn handle_abort(&mut self) {
        self.last_error = AssociationError::Unknown;
        self.state = AssociationState::Closed;
        self.control_queue.clear();
        self.pending_queue = PendingQueue::new();
        self.retransmit_queue.clear();
        self.inflight_queue = PayloadQueue::new();
        self.events.push_back(AssociationEvent::ErrorOccurred {
            error: self.last_error,
        });
    }

    fn check_shutdown_drained(&mut self, now: Instant) {
        if self.state == AssociationState::ShutdownReceived && self.inflight_queue.is_empty() {
            self.control_queue.push_back(Chunk::ShutdownAck);
            self.state = AssociationState::ShutdownAckSent;
            self.timers.start(Timer::T2Shutdown, now, self.rto.get_rto());
        }
        if self.state == AssociationState::ShutdownPending
            && self.inflight_queue.is_empty()
            && self.pending_queue.is_empty()
        {
            self.control_queue.push_back(Chunk::Shutdown {
                cumulative_tsn_ack: self.cumulative_tsn_ack_point,
            });
            self.state = AssociationState::ShutdownSent;
            self.timers.start(Timer::T2Shutdown, now, self.rto.get_rto());
        }
    }

    fn can_send_data(&self) -> bool {
        matches!(
            self.state,
            AssociationState::Established | AssociationState::ShutdownPending | AssociationState::ShutdownSent
        )
    }

    fn enqueue_sack(&mut self) {
        let gap_ack_blocks = self.recv_tsn_log.get_gap_ack_blocks(self.last_rcvd_tsn);
        let duplicate_tsn = self.recv_tsn_log.pop_duplicates();
        self.control_queue.push_back(Chunk::Sack(SackChunk {
            cumulative_tsn_ack: self.last_rcvd_tsn,
            advertised_receiver_window_credit: self.local_window_credit,
            gap_ack_blocks,
            duplicate_tsn,
        }));
    }

    /// Bundles queued control/data chunks into outbound packets. Invoked
    /// exactly once per public mutating call — never per chunk — so a
    /// whole inbound packet's worth of replies can still bundle together.
    fn try_send(&mut self, now: Instant) {
        self.check_shutdown_drained(now);

        if self.ack_state == AckState::Immediate {
            self.enqueue_sack();
            self.ack_state = AckState::Idle;
            self.timers.stop(Timer::Ack);
        }

        let mut sent_any = false;
        loop {
            let mut packet_chunks: Vec<Chunk> = vec![];
            let mut size = COMMON_HEADER_SIZE as usize;

            while let Some(c) = self.control_queue.front() {
                let padded = c.padded_len();
                if size + padded > self.mtu as usize && !packet_chunks.is_empty() {
                    break;
                }
                packet_chunks.push(self.control_queue.pop_front().unwrap());
                size += padded;
            }

            if self.can_send_data() {
                loop {
                    let (data_len, padded, is_retransmit) = if let Some(c) = self.retransmit_queue.front() {
                        (c.user_data.len(), data_chunk_padded_len(c), true)
                    } else if let Some(c) = self.pending_queue.peek() {
                        (c.user_data.len(), data_chunk_padded_len(c), false)
                    } else {
                        break;
                    };

                    if size + padded > self.mtu as usize {
                        break;
                    }
                    if self.remote_used_credit + data_len as u32 > self.remote_window_credit {
                        break;
                    }
                    if self.inflight_queue.get_num_bytes() + data_len > self.cwnd as usize {
                        break;
                    }

                    let chunk = if is_retransmit {
                        self.retransmit_queue.pop_front().unwrap()
                    } else {
                        let peeked = self.pending_queue.peek().unwrap();
                        let (beginning, unordered) = (peeked.beginning_fragment, peeked.unordered);
                        self.pending_queue.pop(beginning, unordered).unwrap()
                    };

                    size += padded;
                    self.remote_used_credit += data_len as u32;
                    let mut sc = SentChunk::new(chunk.clone(), now);
                    if is_retransmit {
                        sc.num_transmits = 2;
                    }
                    self.inflight_queue.push(sc, self.cumulative_tsn_ack_point);
                    packet_chunks.push(Chunk::Data(chunk));
                }
            }

            if packet_chunks.is_empty() {
                break;
            }
            sent_any = true;
            let packet = Packet {
                common_header: CommonHeader {
                    source_port: self.source_port,
                    destination_port: self.destination_port,
                    verification_tag: self.peer_tag,
                },
                chunks: packet_chunks,
            };
            self.outgoing.push_back(packet.marshal());
        }

        if sent_any {
            self.events.push_back(AssociationEvent::ReadyReadOutgoing);
            if !self.inflight_queue.is_empty() && self.timers.get(Timer::T3Rtx).is_none() {
                self.timers.start(Timer::T3Rtx, now, self.rto.get_rto());
            }
        }
    }
}

fn abort_cause_for(kind: AssociationError) -> u16 {
    match kind {
        AssociationError::InvalidCookie => CAUSE_INVALID_MANDATORY_PARAMETER,
        AssociationError::ProtocolViolation | AssociationError::VerificationTag => CAUSE_PROTOCOL_VIOLATION,
        _ => CAUSE_USER_INITIATED_ABORT,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::TransportConfig;

    fn assoc(src: u16, dst: u16, now: Instant) -> Association {
        Association::new(src, dst, TransportConfig::default(), now)
    }

    fn handshake(a: &mut Association, b: &mut Association, now: Instant) {
        a.associate(now);
        b.write_incoming(&a.read_outgoing().unwrap(), now);
        a.write_incoming(&b.read_outgoing().unwrap(), now);
        b.write_incoming(&a.read_outgoing().unwrap(), now);
        a.write_incoming(&b.read_outgoing().unwrap(), now);
    }

    #[test]
    fn four_way_handshake_converges_to_established_s1() {
        let now = Instant::now();
        let mut a = assoc(1, 2, now);
        let mut b = assoc(2, 1, now);

        a.associate(now);
        let d = a.read_outgoing().expect("A sends INIT");
        assert_eq!(a.state(), AssociationState::CookieWait);

        b.write_incoming(&d, now);
        let d = b.read_outgoing().expect("B sends INIT-ACK");
        assert_eq!(b.state(), AssociationState::Closed);

        a.write_incoming(&d, now);
        let d = a.read_outgoing().expect("A sends COOKIE-ECHO");
        assert_eq!(a.state(), AssociationState::CookieEchoed);

        b.write_incoming(&d, now);
        let d = b.read_outgoing().expect("B sends COOKIE-ACK");
        assert_eq!(b.state(), AssociationState::Established);

        a.write_incoming(&d, now);
        assert!(a.read_outgoing().is_none());
        assert_eq!(a.state(), AssociationState::Established);
    }

    #[test]
    fn fragmented_write_reassembles_at_the_peer_s6() {
        let now = Instant::now();
        let mut config = TransportConfig::default();
        config.with_mtu(64);
        let mut a = Association::new(1, 2, config.clone(), now);
        let mut b = Association::new(2, 1, config, now);
        handshake(&mut a, &mut b, now);

        let payload = Bytes::from(vec![0xABu8; 256]);
        a.write(0, false, PayloadProtocolIdentifier(42), payload.clone(), now)
            .unwrap();

        let mut fragments_sent = 0;
        while let Some(pkt) = a.read_outgoing() {
            b.write_incoming(&pkt, now);
            fragments_sent += 1;
        }
        assert!(fragments_sent >= 5);

        let (ppid, data) = b.read_message(0).expect("reassembled message available");
        assert_eq!(ppid, PayloadProtocolIdentifier(42));
        assert_eq!(data, payload);
    }

    #[test]
    fn tsn_assignment_is_monotonic() {
        let now = Instant::now();
        let mut a = assoc(1, 2, now);
        let mut b = assoc(2, 1, now);
        handshake(&mut a, &mut b, now);

        a.write(0, false, PayloadProtocolIdentifier(0), Bytes::from_static(b"one"), now)
            .unwrap();
        a.write(0, false, PayloadProtocolIdentifier(0), Bytes::from_static(b"two"), now)
            .unwrap();
        let mut last_tsn = None;
        while let Some(pkt) = a.read_outgoing() {
            let decoded = Packet::unmarshal(&pkt).unwrap();
            for chunk in decoded.chunks {
                if let Chunk::Data(d) = chunk {
                    if let Some(prev) = last_tsn {
                        assert!(sna32lt(prev, d.tsn));
                    }
                    last_tsn = Some(d.tsn);
                }
            }
        }
        assert!(last_tsn.is_some());
    }

    #[test]
    fn remote_used_credit_never_exceeds_advertised_window() {
        let now = Instant::now();
        let mut a = assoc(1, 2, now);
        let mut b = assoc(2, 1, now);
        handshake(&mut a, &mut b, now);

        for _ in 0..20 {
            a.write(0, false, PayloadProtocolIdentifier(0), Bytes::from(vec![0u8; 4096]), now)
                .unwrap();
        }
        assert!(a.remote_used_credit <= a.remote_window_credit);
    }

    #[test]
    fn a_tampered_cookie_echo_is_rejected_and_aborts() {
        let now = Instant::now();
        let mut a = assoc(1, 2, now);
        let mut b = assoc(2, 1, now);

        a.associate(now);
        b.write_incoming(&a.read_outgoing().unwrap(), now);
        let init_ack = b.read_outgoing().unwrap();
        a.write_incoming(&init_ack, now);
        let mut cookie_echo = a.read_outgoing().unwrap().to_vec();
        let last = cookie_echo.len() - 1;
        cookie_echo[last] ^= 0x01;

        b.write_incoming(&cookie_echo, now);
        assert_eq!(b.state(), AssociationState::Closed);
        assert_eq!(b.last_error(), AssociationError::InvalidCookie);
    }

    #[test]
    fn associate_is_a_no_op_once_already_started() {
        let now = Instant::now();
        let mut a = assoc(1, 2, now);
        a.associate(now);
        let tag_after_first = a.my_tag;
        a.associate(now);
        assert_eq!(a.my_tag, tag_after_first);
    }

    #[test]
    fn write_before_established_is_rejected() {
        let now = Instant::now();
        let mut a = assoc(1, 2, now);
        let err = a
            .write(0, false, PayloadProtocolIdentifier(0), Bytes::from_static(b"x"), now)
            .unwrap_err();
        assert_eq!(err, AssociationError::WrongState);
    }

    #[test]
    fn graceful_shutdown_reaches_closed_on_both_sides() {
        let now = Instant::now();
        let mut a = assoc(1, 2, now);
        let mut b = assoc(2, 1, now);
        handshake(&mut a, &mut b, now);

        a.shutdown(now);
        let shutdown_pkt = a.read_outgoing().expect("A sends SHUTDOWN");
        assert_eq!(a.state(), AssociationState::ShutdownSent);

        b.write_incoming(&shutdown_pkt, now);
        let shutdown_ack = b.read_outgoing().expect("B sends SHUTDOWN-ACK");
        assert_eq!(b.state(), AssociationState::ShutdownAckSent);

        a.write_incoming(&shutdown_ack, now);
        let shutdown_complete = a.read_outgoing().expect("A sends SHUTDOWN-COMPLETE");
        assert_eq!(a.state(), AssociationState::Closed);

        b.write_incoming(&shutdown_complete, now);
        assert_eq!(b.state(), AssociationState::Closed);
    }
}
