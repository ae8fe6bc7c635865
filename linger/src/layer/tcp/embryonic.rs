//! Embryonic connections, between a listener's SYN-ACK and the ACK that completes the handshake.
//!
//! Relevant material for reading:
//! Three-way handshake: https://tools.ietf.org/html/rfc793#section-3.4
//! SYN flooding and its mitigations: https://tools.ietf.org/html/rfc4987
//!
//! Each listener keeps its pending requests in a [`SynQueue`]. Segments for a pending request are
//! classified by [`check`], which either keeps the request around, discards it, or materializes a
//! full [`Connection`]. The queue performs classification and removal under one lock so that a
//! request is promoted at most once, even when its retransmissions are handled concurrently.
//!
//! [`SynQueue`]: struct.SynQueue.html
//! [`check`]: fn.check.html
//! [`Connection`]: struct.Connection.html
use core::cmp;
use std::collections::HashMap;

use spin::Mutex;

use crate::layer::{Error, Result};
use crate::managed::{Key, SlotMap};
use crate::time::{Duration, Instant};
use crate::wire::{OptionSet, Segment, TcpSeqNumber};

use super::config::{Config, DEFAULT_MSS, PAWS_IDLE};
use super::connection::{
    Connection,
    NewReno,
    Receive,
    Send,
    State,
    Timestamps,
    WindowScale};
use super::shell::FourTuple;
use super::siphash::IsnGenerator;
use super::stats::{Event, Stats};
use super::timewait::{in_window, paws_reject};

/// A SYN received by a listener, answered but not yet acknowledged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OpenRequest {
    /// The connection identity.
    pub tuple: FourTuple,
    /// The peer's initial sequence number.
    pub rcv_isn: TcpSeqNumber,
    /// Our initial sequence number.
    pub snt_isn: TcpSeqNumber,
    /// The receive window offered in our SYN-ACK.
    pub rcv_wnd: u32,
    /// The largest window we will ever offer.
    pub window_clamp: u32,
    /// The peer's window shift.
    pub snd_wscale: u8,
    /// Our window shift.
    pub rcv_wscale: u8,
    /// Both sides announced window scaling.
    pub wscale_ok: bool,
    /// The peer permits selective acknowledgements.
    pub sack_ok: bool,
    /// The peer sent timestamps.
    pub tstamp_ok: bool,
    /// The most recent timestamp value of the peer.
    pub ts_recent: u32,
    /// The segment size the peer accepts, after applying the listener's ceiling.
    pub mss: u16,
    /// How often the SYN-ACK was retransmitted.
    pub retrans: u32,
    /// The handshake completed but the request is held back.
    pub acked: bool,
}

/// Why a segment for an open request was dropped, and what to send.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Send nothing.
    Silent,
    /// Acknowledge the current window.
    Ack,
    /// The segment acknowledged something we never sent. Leave the answer (a RST) to the
    /// listener's general receive path.
    Unacceptable,
    /// The handshake completed while the accept queue was full. The request is kept and marked
    /// acknowledged, a later ACK retries the promotion.
    Overflow,
}

/// The result of classifying a segment for an open request.
#[derive(Clone, Copy, Debug)]
pub enum Outcome {
    /// A retransmission of the original SYN, answer with the SYN-ACK again.
    RetransmitSynAck,
    /// The request is discarded.
    Reset {
        /// Answer with a RST. Never set when the segment itself was a RST.
        reply: bool,
    },
    /// Drop the segment, the request is kept.
    Drop(Disposition),
    /// The handshake completed, the request is replaced by this connection.
    Promote(Connection),
    /// The handshake completed but accepting waits for the first data.
    DeferAccept,
}

/// The policy of the listening socket owning an open request.
pub trait Listener {
    /// If the accept queue can not take another connection.
    fn accept_queue_full(&self) -> bool;

    /// Hold back promotion until the peer sends data.
    fn defer_accept(&self) -> bool {
        false
    }

    /// A ceiling on the segment size set by the user.
    fn user_mss(&self) -> Option<u16> {
        None
    }

    /// The segment size we announced in the SYN-ACK.
    fn local_mss(&self) -> u16 {
        DEFAULT_MSS
    }

    /// The receive window offered to new connections.
    fn receive_window(&self) -> u32 {
        u32::from(u16::max_value())
    }

    /// Our window shift, used when the peer announced window scaling.
    fn window_shift(&self) -> u8 {
        0
    }
}

/// Pending open requests of one listener.
pub struct SynQueue {
    backlog: Mutex<Backlog>,
    isn: IsnGenerator,
    syncookies: bool,
}

/// The requests and their index by tuple, always modified together.
struct Backlog {
    requests: SlotMap<OpenRequest>,
    by_tuple: HashMap<FourTuple, Key>,
}

/// A listener's answers, collected before taking the queue lock.
#[derive(Clone, Copy, Debug)]
struct Policy {
    accept_queue_full: bool,
    defer_accept: bool,
    user_mss: Option<u16>,
    local_mss: u16,
    receive_window: u32,
    window_shift: u8,
}

/// Refers to an open request in a `SynQueue`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestKey {
    key: Key,
}

impl OpenRequest {
    /// Describe the request opened by a SYN.
    ///
    /// Negotiated options are taken from the SYN's options, our side of them from the listener.
    pub fn from_syn<L>(
        tuple: FourTuple,
        syn: &Segment,
        options: &OptionSet,
        snt_isn: TcpSeqNumber,
        listener: &L,
    ) -> Self
        where L: Listener + ?Sized,
    {
        let timestamp = syn.timestamp.or(options.timestamp);
        let mss = options.max_seg_size.unwrap_or(DEFAULT_MSS);
        let mss = match listener.user_mss() {
            Some(user) => cmp::min(user, mss),
            None => mss,
        };

        let wscale_ok = options.window_scale.is_some();
        let rcv_wnd = listener.receive_window();

        OpenRequest {
            tuple,
            rcv_isn: syn.seq,
            snt_isn,
            rcv_wnd,
            window_clamp: rcv_wnd,
            snd_wscale: options.window_scale.unwrap_or(0),
            rcv_wscale: if wscale_ok { listener.window_shift() } else { 0 },
            wscale_ok,
            sack_ok: options.sack_permitted,
            tstamp_ok: timestamp.is_some(),
            ts_recent: timestamp.map(|ts| ts.value).unwrap_or(0),
            mss,
            retrans: 0,
            acked: false,
        }
    }
}

impl Outcome {
    /// If the open request no longer exists after this outcome.
    pub fn discards_request(&self) -> bool {
        match self {
            Outcome::Reset { .. } | Outcome::Promote(_) => true,
            _ => false,
        }
    }
}

/// Classify a segment that arrived for an open request.
///
/// May update the request's `ts_recent` and `acked` fields. When the outcome discards the request
/// the caller must remove it, which `SynQueue::check` does atomically.
pub fn check<L>(
    req: &mut OpenRequest,
    seg: &Segment,
    listener: &L,
    config: &Config,
    now: Instant,
    stats: &Stats,
) -> Outcome
    where L: Listener + ?Sized,
{
    let rst = seg.flags.rst();
    let ack = seg.flags.ack();
    let mut syn = seg.flags.syn();

    // We never recorded when `ts_recent` arrived. It was at the latest one backed off
    // retransmission timeout ago.
    let paws_rejected = match seg.timestamp {
        Some(ts) => {
            let stamp = now - backoff(config.initial_rto, req.retrans);
            paws_reject(ts, req.ts_recent, stamp, rst, now)
        },
        None => false,
    };

    if seg.seq == req.rcv_isn && syn && !rst && !ack && !paws_rejected {
        net_trace!("syn-ack retransmit for {:?}", req.tuple);
        stats.bump(Event::SynAckRetransmit);
        return Outcome::RetransmitSynAck;
    }

    if ack && seg.ack != Some(req.snt_isn + 1) {
        return Outcome::Drop(Disposition::Unacceptable);
    }

    let start = req.rcv_isn + 1;
    let end = start + req.rcv_wnd;
    if paws_rejected || seg.sequence_len().is_none() || !in_window(seg, start, end) {
        if paws_rejected {
            stats.bump(Event::PawsRejected);
        }
        let disposition = if rst { Disposition::Silent } else { Disposition::Ack };
        return Outcome::Drop(disposition);
    }

    if let Some(ts) = seg.timestamp {
        if !seg.seq.after(start) {
            req.ts_recent = ts.value;
        }
    }

    // The SYN of a segment starting at the peer's ISN has been seen already.
    if seg.seq == req.rcv_isn {
        syn = false;
    }

    if rst || syn {
        return embryonic_reset(req, rst, stats);
    }

    if !ack {
        return Outcome::Drop(Disposition::Silent);
    }

    if listener.defer_accept() && seg.end_seq == start {
        req.acked = true;
        stats.bump(Event::DeferredAccept);
        return Outcome::DeferAccept;
    }

    if listener.accept_queue_full() {
        stats.bump(Event::ListenOverflow);
        net_debug!("listen overflow for {:?}", req.tuple);
        if !config.abort_on_overflow {
            req.acked = true;
            return Outcome::Drop(Disposition::Overflow);
        }
        return embryonic_reset(req, rst, stats);
    }

    stats.bump(Event::Promoted);
    Outcome::Promote(promote(req, seg, listener, config, now))
}

fn embryonic_reset(req: &OpenRequest, rst: bool, stats: &Stats) -> Outcome {
    stats.bump(Event::EmbryonicReset);
    net_debug!("embryonic reset for {:?}", req.tuple);
    Outcome::Reset { reply: !rst }
}

/// The retransmission timeout after `retrans` doublings, at most the PAWS idle limit.
fn backoff(initial: Duration, retrans: u32) -> Duration {
    let factor = 1u32.checked_shl(retrans).unwrap_or(u32::max_value());
    initial.checked_mul(factor)
        .map(|rto| cmp::min(rto, PAWS_IDLE))
        .unwrap_or(PAWS_IDLE)
}

/// Materialize the connection of a completed handshake.
fn promote<L>(
    req: &OpenRequest,
    seg: &Segment,
    listener: &L,
    config: &Config,
    now: Instant,
) -> Connection
    where L: Listener + ?Sized,
{
    let window_scale = if req.wscale_ok {
        WindowScale { send: req.snd_wscale, recv: req.rcv_wscale }
    } else {
        WindowScale::default()
    };

    let sender_mss = u32::from(req.mss);
    let rcv_nxt = req.rcv_isn + 1;
    let snd_nxt = req.snt_isn + 1;

    Connection {
        tuple: req.tuple,
        current: State::Established,
        previous: State::SynReceived,
        flow_control: NewReno {
            ssthresh: u32::max_value(),
            congestion_window: 2 * sender_mss,
            recover: req.snt_isn,
        },
        sender_maximum_segment_size: sender_mss,
        receiver_maximum_segment_size: u32::from(listener.local_mss()),
        last_ack_receive_offset: rcv_nxt,
        last_ack_time: now,
        last_ack_timeout: Duration::from_millis(500),
        retransmission_timeout: config.initial_rto,
        selective_acknowledgements: req.sack_ok,
        timestamps: if req.tstamp_ok {
            Some(Timestamps { recent: req.ts_recent, recent_stamp: now })
        } else {
            None
        },
        window_scale,
        window_clamp: req.window_clamp,
        send: Send {
            unacked: snd_nxt,
            next: snd_nxt,
            window: u32::from(seg.window) << window_scale.send,
            initial_seq: req.snt_isn,
        },
        recv: Receive {
            next: rcv_nxt,
            acked: rcv_nxt,
            window: req.rcv_wnd,
            initial_seq: req.rcv_isn,
        },
    }
}

impl Policy {
    fn of<L: Listener + ?Sized>(listener: &L) -> Self {
        Policy {
            accept_queue_full: listener.accept_queue_full(),
            defer_accept: listener.defer_accept(),
            user_mss: listener.user_mss(),
            local_mss: listener.local_mss(),
            receive_window: listener.receive_window(),
            window_shift: listener.window_shift(),
        }
    }
}

impl Listener for Policy {
    fn accept_queue_full(&self) -> bool {
        self.accept_queue_full
    }

    fn defer_accept(&self) -> bool {
        self.defer_accept
    }

    fn user_mss(&self) -> Option<u16> {
        self.user_mss
    }

    fn local_mss(&self) -> u16 {
        self.local_mss
    }

    fn receive_window(&self) -> u32 {
        self.receive_window
    }

    fn window_shift(&self) -> u8 {
        self.window_shift
    }
}

impl Backlog {
    fn insert(&mut self, req: OpenRequest) -> Result<Key> {
        if self.by_tuple.contains_key(&req.tuple) {
            return Err(Error::Illegal);
        }

        let key = self.requests.insert(req).ok_or(Error::Exhausted)?;
        self.by_tuple.insert(req.tuple, key);
        Ok(key)
    }

    fn remove(&mut self, key: Key) -> Option<OpenRequest> {
        let req = self.requests.remove(key)?;
        self.by_tuple.remove(&req.tuple);
        Some(req)
    }
}

impl SynQueue {
    /// Create an empty queue bounded by the configured backlog.
    pub fn new(config: &Config, isn: IsnGenerator) -> Self {
        SynQueue {
            backlog: Mutex::new(Backlog {
                requests: SlotMap::with_capacity(config.max_syn_backlog),
                by_tuple: HashMap::new(),
            }),
            isn,
            syncookies: config.syncookies,
        }
    }

    /// Record a new open request for a SYN, choosing our initial sequence number.
    ///
    /// Fails with `Illegal` if the segment is not a pure SYN or the tuple already has a pending
    /// request, and with `Exhausted` if the backlog is full.
    pub fn insert<L>(
        &self,
        tuple: FourTuple,
        syn: &Segment,
        options: &OptionSet,
        listener: &L,
        now: Instant,
    ) -> Result<(RequestKey, OpenRequest)>
        where L: Listener + ?Sized,
    {
        let flags = syn.flags;
        if !flags.syn() || flags.ack() || flags.rst() {
            return Err(Error::Illegal);
        }

        let snt_isn = self.isn.get_isn(tuple, now);
        let req = OpenRequest::from_syn(tuple, syn, options, snt_isn, listener);

        let inserted = self.backlog.lock().insert(req);
        match inserted {
            Ok(key) => Ok((RequestKey { key }, req)),
            Err(Error::Exhausted) => {
                net_debug!("possible SYN flooding on port {}, {}",
                    tuple.local_port,
                    if self.syncookies { "sending cookies" } else { "dropping request" });
                Err(Error::Exhausted)
            },
            Err(err) => Err(err),
        }
    }

    /// Find the pending request of a connection.
    pub fn find(&self, tuple: &FourTuple) -> Option<RequestKey> {
        self.backlog.lock()
            .by_tuple
            .get(tuple)
            .map(|&key| RequestKey { key })
    }

    /// A copy of a pending request.
    pub fn get(&self, key: RequestKey) -> Option<OpenRequest> {
        self.backlog.lock().requests.get(key.key).copied()
    }

    /// Classify a segment for a pending request, removing it when promoted or reset.
    ///
    /// The listener is consulted once, before the queue is locked. Returns `None` if the request
    /// no longer exists, for example because a concurrent call promoted it already.
    pub fn check<L>(
        &self,
        key: RequestKey,
        seg: &Segment,
        listener: &L,
        config: &Config,
        now: Instant,
        stats: &Stats,
    ) -> Option<Outcome>
        where L: Listener + ?Sized,
    {
        let policy = Policy::of(listener);
        let mut backlog = self.backlog.lock();
        let req = backlog.requests.get_mut(key.key)?;
        let outcome = check(req, seg, &policy, config, now, stats);
        if outcome.discards_request() {
            backlog.remove(key.key);
        }
        Some(outcome)
    }

    /// Count a retransmission of the SYN-ACK.
    ///
    /// Returns the new count, or `None` if the request is gone.
    pub fn retransmitted(&self, key: RequestKey) -> Option<u32> {
        let mut backlog = self.backlog.lock();
        let req = backlog.requests.get_mut(key.key)?;
        req.retrans = req.retrans.saturating_add(1);
        Some(req.retrans)
    }

    /// Discard a pending request.
    pub fn remove(&self, key: RequestKey) -> Option<OpenRequest> {
        self.backlog.lock().remove(key.key)
    }

    /// The number of pending requests.
    pub fn len(&self) -> usize {
        self.backlog.lock().requests.len()
    }

    /// Check if no request is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
