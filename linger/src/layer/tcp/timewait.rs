//! Classification of segments that arrive for a shell.
//!
//! Relevant material for reading:
//! TIME-WAIT and its purpose: https://tools.ietf.org/html/rfc793#page-22
//! New incarnations during TIME-WAIT: https://tools.ietf.org/html/rfc1122#page-88
//! TIME-WAIT assassination: https://tools.ietf.org/html/rfc1337
//! PAWS: https://tools.ietf.org/html/rfc7323#section-5
//!
//! The transition is a pure function of the shell state, the segment and the configuration. It
//! returns what to answer and what should happen to the shell's timer, which the caller applies
//! after releasing the shell's lock.
use crate::time::{Duration, Instant};
use crate::wire::{Segment, TcpSeqNumber, Timestamp};

use super::config::{Config, PAWS_IDLE};
use super::shell::{ShellState, Substate};

/// The answer to a segment that hit a shell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verdict {
    /// Answer with an ACK of the current state.
    Ack,
    /// Answer with a RST, the shell is gone.
    Rst,
    /// The SYN may open a new incarnation, starting at or after the given sequence number.
    ///
    /// The shell is left untouched, admission is up to the listener.
    Syn(TcpSeqNumber),
    /// Absorb silently.
    Drop,
    /// The peer has torn down its side, the shell is gone. Nothing is sent.
    Destroy,
}

/// What happens to the shell's timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Action {
    /// Leave the timer as it is.
    Keep,
    /// Move the shell to expire after the duration.
    Reschedule(Duration),
    /// Remove the shell from the wheel and the index.
    Kill,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct Transition {
    pub verdict: Verdict,
    pub action: Action,
    pub paws_rejected: bool,
}

/// The distance by which a new incarnation's sequence space is moved past the old one's.
///
/// Applied to the later of both directions' sequence numbers, so the new incarnation starts beyond
/// anything either side of the old one may still have in flight.
const INCARNATION_GAP: u32 = 65535 + 2;

/// The timestamp check (PAWS) against a recorded value.
///
/// RST segments are never rejected. A timestamp recorded more than 24 days ago has lost its
/// meaning, since the peer's clock may have wrapped since, and no longer rejects anything.
pub(crate) fn paws_reject(
    ts: Timestamp,
    ts_recent: u32,
    ts_recent_stamp: Instant,
    rst: bool,
    now: Instant,
) -> bool {
    if rst {
        return false;
    }

    if !ts.older_than(ts_recent) {
        return false;
    }

    now < ts_recent_stamp + PAWS_IDLE
}

/// Whether a segment touches the window `[start, end]`.
///
/// Accepts a segment starting exactly at the left edge, any segment overlapping the window and a
/// zero length segment at the right edge.
pub(crate) fn in_window(seg: &Segment, start: TcpSeqNumber, end: TcpSeqNumber) -> bool {
    if seg.seq == start {
        return true;
    }

    if seg.end_seq.after(start) && seg.seq.before(end) {
        return true;
    }

    seg.seq == end && seg.seq == seg.end_seq
}

/// Classify a segment against the shell state, updating the state in place.
pub(crate) fn transition(
    state: &mut ShellState,
    seg: &Segment,
    config: &Config,
    now: Instant,
) -> Transition {
    let flags = seg.flags;
    let paws_rejected = match (seg.timestamp, state.ts_recent_stamp) {
        (Some(ts), Some(stamp)) => paws_reject(ts, state.ts_recent, stamp, flags.rst(), now),
        _ => false,
    };

    // Nonsensical lengths take the conservative, out of window branches below.
    let sane = seg.sequence_len().is_some();

    let done = |verdict, action| Transition { verdict, action, paws_rejected };

    if state.substate == Substate::FinWait2 {
        let end = state.rcv_nxt + state.rcv_wnd;
        if paws_rejected || !sane || !in_window(seg, state.rcv_nxt, end) {
            return done(Verdict::Ack, Action::Keep);
        }

        if flags.rst() {
            return done(Verdict::Destroy, Action::Kill);
        }

        if flags.syn() && !seg.seq.before(state.rcv_nxt) {
            return done(Verdict::Rst, Action::Kill);
        }

        // Duplicate, nothing new.
        if !seg.end_seq.after(state.rcv_nxt) || seg.is_empty() {
            return done(Verdict::Drop, Action::Keep);
        }

        // New data after our half-close, or anything but a lone FIN, is not acceptable.
        if !flags.fin() || seg.end_seq != state.rcv_nxt + 1 {
            return done(Verdict::Rst, Action::Kill);
        }

        state.substate = Substate::TimeWait;
        state.rcv_nxt = seg.end_seq;
        if let Some(ts) = seg.timestamp {
            state.ts_recent = ts.value;
            state.ts_recent_stamp = Some(now);
        }

        let timeout = if config.tw_recycle && state.ts_recent_stamp.is_some() {
            state.timeout
        } else {
            config.timewait_len
        };

        return done(Verdict::Ack, Action::Reschedule(timeout));
    }

    // In window, no new data: a duplicate of the peer's last segment, or a RST.
    if !paws_rejected && sane
        && seg.seq == state.rcv_nxt
        && (seg.is_empty() || flags.rst())
    {
        if flags.rst() && !config.rfc1337 {
            return done(Verdict::Destroy, Action::Kill);
        }

        if let Some(ts) = seg.timestamp {
            state.ts_recent = ts.value;
            state.ts_recent_stamp = Some(now);
        }

        return done(Verdict::Drop, Action::Reschedule(config.timewait_len));
    }

    // A SYN that can not belong to the old incarnation.
    let newer_clock = match seg.timestamp {
        Some(ts) => ts.newer_than(state.ts_recent),
        None => false,
    };

    if flags.syn() && !flags.rst() && !flags.ack() && !paws_rejected && sane
        && (seg.seq.after(state.rcv_nxt) || newer_clock)
    {
        let latest = if state.rcv_nxt.after(state.snd_nxt) {
            state.rcv_nxt
        } else {
            state.snd_nxt
        };
        let mut isn = latest + INCARNATION_GAP;
        if isn == TcpSeqNumber(0) {
            isn += 1;
        }
        return done(Verdict::Syn(isn), Action::Keep);
    }

    if flags.rst() {
        return done(Verdict::Drop, Action::Keep);
    }

    if paws_rejected || flags.ack() {
        done(Verdict::Ack, Action::Reschedule(config.timewait_len))
    } else {
        done(Verdict::Ack, Action::Keep)
    }
}
