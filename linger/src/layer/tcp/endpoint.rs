//! Ties together the shell pool, the wheel and the lookup index.
//!
//! Relevant material for reading:
//! Main TCP rfc, state diagram: https://tools.ietf.org/html/rfc793#section-3.2
//! TIME-WAIT state with many connections: https://tools.ietf.org/html/rfc6191
//!
//! Locks are taken in a fixed discipline. A shell's own lock is held only for the pure
//! classification and released before the wheel or the index is touched. The wheel, the index
//! and the pool each have their own lock and none of them is held while taking another.
use core::cmp;
use std::collections::HashMap;
use std::sync::Arc;

use spin::Mutex;

use crate::layer::{Error, Result};
use crate::time::{Duration, Expiration, Instant};
use crate::wire::Segment;

use super::config::Config;
use super::connection::ClosingState;
use super::shell::{FourTuple, ShellHandle, ShellPool, ShellState, Substate};
use super::stats::{Counters, Event, Stats};
use super::timewait::{transition, Action, Transition, Verdict};
use super::wheel::TimerWheel;

/// The connection lookup index, as far as shells are concerned.
///
/// The receive path owns the real index, which usually also holds full connections. Shells only
/// need to be added and removed.
pub trait Lookup {
    /// Add a shell under its tuple.
    ///
    /// Returns `false` and leaves the index unchanged if the tuple is taken.
    fn insert(&self, shell: ShellHandle) -> bool;

    /// Remove a shell, only if it is the entry of its tuple.
    fn remove(&self, shell: &ShellHandle) -> bool;

    /// Find the shell of a tuple.
    fn get(&self, tuple: &FourTuple) -> Option<ShellHandle>;
}

/// A minimal lookup index for shells only.
#[derive(Default)]
pub struct ShellTable {
    map: Mutex<HashMap<FourTuple, ShellHandle>>,
}

/// The teardown side of a TCP stack.
///
/// Shells are created from closing connections, classify the segments that arrive for them and
/// expire when the wheel's tiers tick. The endpoint can be shared between threads, all methods
/// take `&self`.
pub struct Endpoint<L = ShellTable> {
    config: Config,
    pool: ShellPool,
    wheel: TimerWheel,
    index: L,
    stats: Stats,
}

impl ShellTable {
    /// Create an empty table.
    pub fn new() -> Self {
        ShellTable::default()
    }

    /// The number of entries.
    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    /// Check if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Lookup for ShellTable {
    fn insert(&self, shell: ShellHandle) -> bool {
        let mut map = self.map.lock();
        if map.contains_key(&shell.tuple()) {
            return false;
        }
        map.insert(shell.tuple(), shell);
        true
    }

    fn remove(&self, shell: &ShellHandle) -> bool {
        // The removed handle is dropped only after the lock is released.
        let removed = {
            let mut map = self.map.lock();
            match map.get(&shell.tuple()) {
                Some(entry) if Arc::ptr_eq(entry, shell) => map.remove(&shell.tuple()),
                _ => None,
            }
        };
        removed.is_some()
    }

    fn get(&self, tuple: &FourTuple) -> Option<ShellHandle> {
        self.map.lock().get(tuple).cloned()
    }
}

impl Endpoint<ShellTable> {
    /// Create an endpoint with its own shell table.
    pub fn new(config: Config) -> Result<Self> {
        Endpoint::with_index(config, ShellTable::new())
    }
}

impl<L: Lookup> Endpoint<L> {
    /// Create an endpoint adding its shells to an external index.
    pub fn with_index(config: Config, index: L) -> Result<Self> {
        config.validate()?;
        Ok(Endpoint {
            pool: ShellPool::new(config.max_tw_buckets),
            wheel: TimerWheel::new(&config),
            index,
            stats: Stats::default(),
            config,
        })
    }

    /// Let a closing connection linger as a shell.
    ///
    /// The shell expires after `timeout` but no earlier than `3.5 * rto`. If recycling is enabled
    /// and the peer sent timestamps, the shell's recycle timeout is that same `3.5 * rto`.
    /// Otherwise it is the full TIME-WAIT length, which a shell in `TimeWait` is also scheduled
    /// for.
    ///
    /// Fails with `Exhausted` when the pool is full and with `Illegal` when the index already has
    /// an entry for the tuple. The connection should then be closed immediately.
    pub fn create_shell(
        &self,
        closing: &ClosingState,
        substate: Substate,
        timeout: Duration,
        now: Instant,
    ) -> Result<ShellHandle> {
        let rto = closing.rto.checked_mul(7)
            .map(|rto| cmp::min(rto / 2, self.config.timewait_len))
            .unwrap_or(self.config.timewait_len);
        let recycle = self.config.tw_recycle && closing.ts_recent_stamp.is_some();

        let mut timeout = timeout.max(rto);
        let recycle_timeout = if recycle {
            rto
        } else {
            if substate == Substate::TimeWait {
                timeout = self.config.timewait_len;
            }
            self.config.timewait_len
        };

        let state = ShellState {
            substate,
            rcv_nxt: closing.rcv_nxt,
            snd_nxt: closing.snd_nxt,
            rcv_wnd: closing.rcv_wnd,
            ts_recent: closing.ts_recent,
            ts_recent_stamp: closing.ts_recent_stamp,
            timeout: recycle_timeout,
        };

        let shell = match self.pool.acquire(closing.tuple, state) {
            Some(shell) => shell,
            None => {
                self.stats.bump(Event::TwOverflow);
                net_debug!("time wait bucket table overflow");
                return Err(Error::Exhausted);
            },
        };

        if !self.index.insert(ShellHandle::clone(&shell)) {
            return Err(Error::Illegal);
        }

        self.wheel.schedule(&shell, timeout, now);
        Ok(shell)
    }

    /// Classify a segment that the receive path found to belong to a shell.
    ///
    /// The shell's state is updated in place. When the verdict ends the shell it is descheduled
    /// and removed from the index before returning.
    pub fn classify(&self, shell: &ShellHandle, seg: &Segment, now: Instant) -> Verdict {
        let Transition { verdict, action, paws_rejected } = shell.with_state(|state| {
            transition(state, seg, &self.config, now)
        });

        if paws_rejected {
            self.stats.bump(Event::PawsRejected);
        }

        match action {
            Action::Keep => (),
            Action::Reschedule(timeout) => {
                self.wheel.schedule(shell, timeout, now);
            },
            Action::Kill => {
                if self.kill(shell) {
                    net_debug!("{:?} destroyed by {}", shell.tuple(), seg);
                }
            },
        }

        verdict
    }

    /// Destroy a shell ahead of its expiry.
    ///
    /// Idempotent and safe against concurrent expiry, returns `true` only for the call that
    /// actually took the shell out of the wheel.
    pub fn kill(&self, shell: &ShellHandle) -> bool {
        if !self.wheel.deschedule(shell) {
            return false;
        }
        self.index.remove(shell);
        self.stats.bump(Event::TwKilled);
        true
    }

    /// Find the shell of a connection.
    pub fn lookup(&self, tuple: &FourTuple) -> Option<ShellHandle> {
        self.index.get(tuple)
    }

    /// Advance the slow ring by one row, expiring its shells.
    ///
    /// Meant to be called every `Config::slow_period`. Returns the number of expired shells.
    pub fn tick_slow(&self, now: Instant) -> usize {
        let expired = self.wheel.tick_slow(now);
        self.unhash(expired, Event::TwExpired)
    }

    /// Expire all due shells of the calendar.
    pub fn tick_fast(&self, now: Instant) -> usize {
        let expired = self.wheel.tick_fast(now);
        self.unhash(expired, Event::TwRecycled)
    }

    /// Run whichever tiers are due.
    pub fn poll(&self, now: Instant) -> usize {
        let mut expired = 0;
        if self.wheel.calendar_deadline().is_due(now) {
            expired += self.tick_fast(now);
        }
        if self.wheel.slow_deadline().is_due(now) {
            expired += self.tick_slow(now);
        }
        expired
    }

    /// The next instant at which `poll` has work to do.
    pub fn next_wakeup(&self) -> Expiration {
        self.wheel.next_deadline()
    }

    /// The configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The shell pool.
    pub fn pool(&self) -> &ShellPool {
        &self.pool
    }

    /// The expiry wheel.
    pub fn wheel(&self) -> &TimerWheel {
        &self.wheel
    }

    /// The lookup index.
    pub fn index(&self) -> &L {
        &self.index
    }

    /// The diagnostic counters.
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// A snapshot of the diagnostic counters.
    pub fn counters(&self) -> Counters {
        self.stats.counters()
    }

    /// Check that every live shell is in the index exactly when it is scheduled.
    ///
    /// Only meaningful while no other thread operates on the endpoint.
    pub fn is_consistent(&self) -> bool {
        if !self.wheel.is_consistent() {
            return false;
        }

        self.pool.shells().iter().all(|shell| {
            let indexed = match self.index.get(&shell.tuple()) {
                Some(entry) => Arc::ptr_eq(&entry, shell),
                None => false,
            };
            indexed == self.wheel.is_scheduled(shell)
        })
    }

    fn unhash(&self, expired: Vec<ShellHandle>, event: Event) -> usize {
        let count = expired.len();
        for shell in &expired {
            self.index.remove(shell);
        }
        self.stats.add(event, count as u64);
        count
    }
}
