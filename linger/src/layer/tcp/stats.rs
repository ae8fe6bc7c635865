use core::sync::atomic::{AtomicU64, Ordering};

/// Diagnostic counters.
///
/// Every protocol anomaly and every degraded outcome is counted here instead of being reported as
/// an error. Counters only ever increase.
#[derive(Debug, Default)]
pub struct Stats {
    tw_overflow: AtomicU64,
    tw_expired: AtomicU64,
    tw_recycled: AtomicU64,
    tw_killed: AtomicU64,
    paws_rejected: AtomicU64,
    embryonic_resets: AtomicU64,
    listen_overflows: AtomicU64,
    synack_retransmits: AtomicU64,
    deferred_accepts: AtomicU64,
    promoted: AtomicU64,
}

/// A point-in-time copy of all counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Counters {
    /// Closes that could not linger because the shell pool was full.
    pub tw_overflow: u64,
    /// Shells expired by the slow ring.
    pub tw_expired: u64,
    /// Shells expired by the fast calendar.
    pub tw_recycled: u64,
    /// Shells destroyed early, by RST or explicit request.
    pub tw_killed: u64,
    /// Segments rejected by the timestamp check.
    pub paws_rejected: u64,
    /// Open requests discarded with a reset.
    pub embryonic_resets: u64,
    /// Completed handshakes that found the accept queue full.
    pub listen_overflows: u64,
    /// Retransmitted SYNs answered with a repeated SYN-ACK.
    pub synack_retransmits: u64,
    /// Handshakes held back until data arrives.
    pub deferred_accepts: u64,
    /// Open requests turned into connections.
    pub promoted: u64,
}

/// Names a single counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Event {
    TwOverflow,
    TwExpired,
    TwRecycled,
    TwKilled,
    PawsRejected,
    EmbryonicReset,
    ListenOverflow,
    SynAckRetransmit,
    DeferredAccept,
    Promoted,
}

impl Stats {
    pub(crate) fn bump(&self, event: Event) {
        self.add(event, 1)
    }

    pub(crate) fn add(&self, event: Event, n: u64) {
        let counter = match event {
            Event::TwOverflow => &self.tw_overflow,
            Event::TwExpired => &self.tw_expired,
            Event::TwRecycled => &self.tw_recycled,
            Event::TwKilled => &self.tw_killed,
            Event::PawsRejected => &self.paws_rejected,
            Event::EmbryonicReset => &self.embryonic_resets,
            Event::ListenOverflow => &self.listen_overflows,
            Event::SynAckRetransmit => &self.synack_retransmits,
            Event::DeferredAccept => &self.deferred_accepts,
            Event::Promoted => &self.promoted,
        };
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Read all counters.
    ///
    /// The counters are read individually, concurrent updates may be partially visible.
    pub fn counters(&self) -> Counters {
        let get = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        Counters {
            tw_overflow: get(&self.tw_overflow),
            tw_expired: get(&self.tw_expired),
            tw_recycled: get(&self.tw_recycled),
            tw_killed: get(&self.tw_killed),
            paws_rejected: get(&self.paws_rejected),
            embryonic_resets: get(&self.embryonic_resets),
            listen_overflows: get(&self.listen_overflows),
            synack_retransmits: get(&self.synack_retransmits),
            deferred_accepts: get(&self.deferred_accepts),
            promoted: get(&self.promoted),
        }
    }
}
