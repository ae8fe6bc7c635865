//! The two tier expiry wheel for shells.
//!
//! Most shells live for the full TIME-WAIT length and are kept in a coarse ring of rows, of which
//! one is drained every `timewait_len / rows`. The few with short, recycle timeouts go to a finer
//! calendar that only ticks while it holds entries. Both tiers share the row storage and linkage,
//! they only differ in how a timeout maps to a row and when the tier is due.
//!
//! Rows are doubly linked lists threaded through a side table indexed by the shell's pool slot.
//! Linking, unlinking and draining are all constant time per shell. The side table owns one
//! handle per scheduled shell, which is the wheel's share of the reference count.
use core::cmp;
use std::sync::Arc;

use spin::Mutex;

use crate::time::{Duration, Expiration, Instant};
use super::config::Config;
use super::shell::ShellHandle;

/// The expiry wheel.
///
/// All state sits behind a single lock, which also covers the count of scheduled shells. The lock
/// is never held while calling out of the wheel and never while a shell's own lock is held.
pub struct TimerWheel {
    inner: Mutex<Wheel>,
}

struct Wheel {
    links: Vec<Link>,
    ring: SlowRing,
    calendar: FastCalendar,
    count: usize,
    timewait_len: Duration,
}

#[derive(Default)]
struct Link {
    shell: Option<ShellHandle>,
    place: Option<Place>,
    prev: Option<usize>,
    next: Option<usize>,
}

/// The row a link is in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Place {
    Ring(usize),
    Calendar(usize),
}

#[derive(Clone, Copy, Debug, Default)]
struct Row {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

struct Rows {
    rows: Vec<Row>,
}

/// The coarse tier, advanced by a periodic tick while anything is scheduled.
struct SlowRing {
    rows: Rows,
    hand: usize,
    period: Duration,
    deadline: Expiration,
}

/// The fine tier, dormant unless it holds entries.
struct FastCalendar {
    rows: Rows,
    /// The slot corresponding to `base`, `None` while dormant.
    hand: Option<usize>,
    base: Instant,
    tick: Duration,
    deadline: Expiration,
}

/// A level of the wheel.
trait Tier {
    /// Choose the row for a timeout, arming the tier where necessary.
    ///
    /// Returns the row and the instant at which that row falls due.
    fn arm(&mut self, timeout: Duration, now: Instant) -> (usize, Instant);

    /// Tag a row of this tier.
    fn place(&self, row: usize) -> Place;

    fn rows_mut(&mut self) -> &mut Rows;
}

impl TimerWheel {
    /// Create an empty wheel with the geometry of the configuration.
    pub fn new(config: &Config) -> Self {
        TimerWheel {
            inner: Mutex::new(Wheel {
                links: Vec::new(),
                ring: SlowRing {
                    rows: Rows::new(config.slow_rows),
                    hand: 0,
                    period: config.slow_period(),
                    deadline: Expiration::Never,
                },
                calendar: FastCalendar {
                    rows: Rows::new(config.calendar_slots),
                    hand: None,
                    base: Instant::from_millis(0),
                    tick: config.calendar_tick,
                    deadline: Expiration::Never,
                },
                count: 0,
                timewait_len: config.timewait_len,
            }),
        }
    }

    /// Schedule or reschedule a shell to expire after `timeout`.
    ///
    /// Timeouts that end within the calendar's reach of its current hand go to the calendar, all
    /// others to the ring. Timeouts are at least one tick of their tier and at most the TIME-WAIT
    /// length. A shell that was already
    /// scheduled is moved, without ever being absent from the count outside the lock.
    ///
    /// Returns `false` and does nothing if the shell was already expired or descheduled.
    pub fn schedule(&self, shell: &ShellHandle, timeout: Duration, now: Instant) -> bool {
        let mut wheel = self.inner.lock();
        if shell.is_killed() {
            return false;
        }

        let idx = shell.key().index();
        wheel.grow(idx);
        let timeout = cmp::min(timeout, wheel.timewait_len);

        let handle = match wheel.unlink(idx) {
            Some(handle) => {
                debug_assert!(Arc::ptr_eq(&handle, shell), "Foreign shell linked at slot");
                handle
            },
            None => Arc::clone(shell),
        };

        if wheel.count == 0 {
            wheel.ring.deadline = Expiration::When(now + wheel.ring.period);
        }

        let Wheel { links, ring, calendar, count, .. } = &mut *wheel;
        calendar.catch_up(now);
        let tier: &mut dyn Tier = match calendar.offset(timeout, now) {
            Some(_) => calendar,
            None => ring,
        };

        let (row, ttd) = tier.arm(timeout, now);
        let place = tier.place(row);
        tier.rows_mut().push_back(links, row, idx);
        links[idx].place = Some(place);
        links[idx].shell = Some(handle);
        *count += 1;
        shell.set_ttd(Expiration::When(ttd));
        true
    }

    /// Remove a shell from the wheel permanently.
    ///
    /// Membership and the count are adjusted in one critical section with marking the shell as
    /// killed. Of all concurrent calls to this and the ticks, exactly one takes the shell out.
    /// Returns whether this call did.
    pub fn deschedule(&self, shell: &ShellHandle) -> bool {
        let released = {
            let mut wheel = self.inner.lock();
            if !shell.mark_killed() {
                return false;
            }

            let released = wheel.unlink(shell.key().index());
            if wheel.count == 0 {
                wheel.suspend();
            }
            shell.set_ttd(Expiration::Never);
            released
        };

        // The wheel's handle is dropped without holding the lock.
        drop(released);
        true
    }

    /// Drain the ring row under the hand and advance it.
    ///
    /// Does nothing while the ring is suspended. The expired shells are returned to the caller,
    /// who must remove them from the lookup index.
    pub fn tick_slow(&self, now: Instant) -> Vec<ShellHandle> {
        let mut expired = Vec::new();
        let mut wheel = self.inner.lock();
        if wheel.ring.deadline == Expiration::Never {
            return expired;
        }

        let Wheel { links, ring, .. } = &mut *wheel;
        let hand = ring.hand;
        ring.rows.drain(links, hand, &mut expired);
        ring.hand = (hand + 1) % ring.rows.len();
        wheel.retire_count(expired.len());

        if wheel.count > 0 {
            wheel.ring.deadline = Expiration::When(now + wheel.ring.period);
        } else {
            wheel.suspend();
        }

        net_trace!("tw ring tick at {} killed {} shells, {} left", now, expired.len(), wheel.count);
        expired
    }

    /// Drain all calendar slots that are due and re-arm for the next non-empty one.
    ///
    /// Goes dormant when no later slot holds entries.
    pub fn tick_fast(&self, now: Instant) -> Vec<ShellHandle> {
        let mut expired = Vec::new();
        let mut wheel = self.inner.lock();
        let Wheel { links, calendar, .. } = &mut *wheel;

        let mut slot = match calendar.hand {
            Some(hand) => hand,
            None => return expired,
        };

        let slots = calendar.rows.len();
        let mut at = calendar.base;
        let mut advanced = false;
        let mut armed = false;

        for _ in 0..slots {
            if at <= now {
                calendar.rows.drain(links, slot, &mut expired);
            } else {
                if !advanced {
                    advanced = true;
                    calendar.base = at;
                    calendar.hand = Some(slot);
                }
                if !calendar.rows.is_empty(slot) {
                    calendar.deadline = Expiration::When(at);
                    armed = true;
                    break;
                }
            }
            at += calendar.tick;
            slot = (slot + 1) % slots;
        }

        if !armed {
            calendar.hand = None;
            calendar.deadline = Expiration::Never;
        }

        wheel.retire_count(expired.len());
        if wheel.count == 0 {
            wheel.suspend();
        }

        net_trace!("tw calendar tick at {} killed {} shells", now, expired.len());
        expired
    }

    /// The number of scheduled shells.
    pub fn len(&self) -> usize {
        self.inner.lock().count
    }

    /// Check if no shell is scheduled.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if the shell is linked into a row.
    pub fn is_scheduled(&self, shell: &ShellHandle) -> bool {
        let wheel = self.inner.lock();
        match wheel.links.get(shell.key().index()) {
            Some(Link { shell: Some(linked), place: Some(_), .. }) => Arc::ptr_eq(linked, shell),
            _ => false,
        }
    }

    /// When the slow ring is next due.
    pub fn slow_deadline(&self) -> Expiration {
        self.inner.lock().ring.deadline
    }

    /// When the calendar is next due.
    pub fn calendar_deadline(&self) -> Expiration {
        self.inner.lock().calendar.deadline
    }

    /// The earliest deadline of either tier.
    pub fn next_deadline(&self) -> Expiration {
        let wheel = self.inner.lock();
        cmp::min(wheel.ring.deadline, wheel.calendar.deadline)
    }

    /// Walk all rows and compare against the count and the side table.
    ///
    /// Linear in the number of scheduled shells. Intended for tests and debugging.
    pub fn is_consistent(&self) -> bool {
        self.inner.lock().is_consistent()
    }
}

impl Wheel {
    fn grow(&mut self, idx: usize) {
        if self.links.len() <= idx {
            self.links.resize_with(idx + 1, Link::default);
        }
    }

    /// Unlink from whichever row holds the slot, returning the wheel's handle.
    fn unlink(&mut self, idx: usize) -> Option<ShellHandle> {
        let place = self.links.get(idx)?.place?;
        let (rows, row) = match place {
            Place::Ring(row) => (&mut self.ring.rows, row),
            Place::Calendar(row) => (&mut self.calendar.rows, row),
        };

        rows.unlink(&mut self.links, row, idx);
        let link = &mut self.links[idx];
        link.place = None;
        let shell = link.shell.take();
        debug_assert!(shell.is_some(), "Linked slot without a shell");
        self.retire_count(1);
        shell
    }

    fn retire_count(&mut self, n: usize) {
        debug_assert!(n <= self.count, "Wheel count {} below drained {}", self.count, n);
        self.count = self.count.saturating_sub(n);
    }

    /// Stop both tiers, nothing is scheduled.
    fn suspend(&mut self) {
        debug_assert_eq!(self.count, 0);
        self.ring.deadline = Expiration::Never;
        self.calendar.hand = None;
        self.calendar.deadline = Expiration::Never;
    }

    fn is_consistent(&self) -> bool {
        let mut seen = 0;
        let tiers = [
            (&self.ring.rows, Place::Ring as fn(usize) -> Place),
            (&self.calendar.rows, Place::Calendar as fn(usize) -> Place),
        ];

        for (rows, tag) in tiers.iter() {
            for (row, meta) in rows.rows.iter().enumerate() {
                let mut len = 0;
                let mut prev = None;
                let mut cursor = meta.head;
                while let Some(idx) = cursor {
                    let link = match self.links.get(idx) {
                        Some(link) => link,
                        None => return false,
                    };
                    if link.prev != prev || link.place != Some(tag(row)) || link.shell.is_none() {
                        return false;
                    }
                    len += 1;
                    prev = Some(idx);
                    cursor = link.next;
                }
                if len != meta.len || prev != meta.tail {
                    return false;
                }
                seen += len;
            }
        }

        let linked = self.links.iter()
            .filter(|link| link.shell.is_some())
            .count();
        seen == self.count && linked == self.count
    }
}

impl Rows {
    fn new(len: usize) -> Self {
        Rows { rows: vec![Row::default(); len] }
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn is_empty(&self, row: usize) -> bool {
        self.rows[row].head.is_none()
    }

    fn push_back(&mut self, links: &mut [Link], row: usize, idx: usize) {
        let meta = &mut self.rows[row];
        links[idx].prev = meta.tail;
        links[idx].next = None;
        match meta.tail {
            Some(tail) => links[tail].next = Some(idx),
            None => meta.head = Some(idx),
        }
        meta.tail = Some(idx);
        meta.len += 1;
    }

    fn unlink(&mut self, links: &mut [Link], row: usize, idx: usize) {
        let meta = &mut self.rows[row];
        let (prev, next) = (links[idx].prev, links[idx].next);
        match prev {
            Some(prev) => links[prev].next = next,
            None => {
                debug_assert_eq!(meta.head, Some(idx));
                meta.head = next;
            },
        }
        match next {
            Some(next) => links[next].prev = prev,
            None => meta.tail = prev,
        }
        links[idx].prev = None;
        links[idx].next = None;
        meta.len -= 1;
    }

    /// Take every shell of a row in insertion order, marking each as killed.
    fn drain(&mut self, links: &mut [Link], row: usize, out: &mut Vec<ShellHandle>) {
        let meta = core::mem::take(&mut self.rows[row]);
        let mut cursor = meta.head;
        while let Some(idx) = cursor {
            let link = &mut links[idx];
            cursor = link.next;
            link.prev = None;
            link.next = None;
            link.place = None;
            if let Some(shell) = link.shell.take() {
                let first = shell.mark_killed();
                debug_assert!(first, "Killed shell still linked");
                shell.set_ttd(Expiration::Never);
                out.push(shell);
            }
        }
    }
}

impl SlowRing {
    fn offset(&self, timeout: Duration) -> usize {
        ticks_of(timeout, self.period).max(1).min(self.rows.len() - 1)
    }
}

impl Tier for SlowRing {
    fn arm(&mut self, timeout: Duration, now: Instant) -> (usize, Instant) {
        let offset = self.offset(timeout);
        let next_tick = match self.deadline {
            Expiration::When(at) => at,
            Expiration::Never => {
                let at = now + self.period;
                self.deadline = Expiration::When(at);
                at
            },
        };

        let row = (self.hand + offset) % self.rows.len();
        (row, next_tick + self.period * offset as u32)
    }

    fn place(&self, row: usize) -> Place {
        Place::Ring(row)
    }

    fn rows_mut(&mut self) -> &mut Rows {
        &mut self.rows
    }
}

impl FastCalendar {
    /// Move an idle hand towards `now`, across slots before the deadline.
    ///
    /// No slot before the one at the deadline holds entries.
    fn catch_up(&mut self, now: Instant) {
        let (hand, next) = match (self.hand, self.deadline) {
            (Some(hand), Expiration::When(next)) => (hand, next),
            _ => return,
        };

        let until = cmp::min(now, next);
        if until <= self.base {
            return;
        }

        let skip = ((until - self.base).as_nanos() / self.tick.as_nanos().max(1)) as usize;
        self.base += self.tick * skip as u32;
        self.hand = Some((hand + skip) % self.rows.len());
    }

    /// The slot distance from the hand whose time is not before `now + timeout`.
    ///
    /// Measured from the hand's own time, which trails `now` by however long the calendar has
    /// been armed. `None` if no slot is far enough ahead.
    fn offset(&self, timeout: Duration, now: Instant) -> Option<usize> {
        let base = match self.hand {
            Some(_) => self.base,
            None => now,
        };
        let due = now + timeout;
        let ahead = if due > base { due - base } else { Duration::from_millis(0) };
        let offset = ticks_of(ahead, self.tick).max(1);
        if offset < self.rows.len() {
            Some(offset)
        } else {
            None
        }
    }
}

impl Tier for FastCalendar {
    fn arm(&mut self, timeout: Duration, now: Instant) -> (usize, Instant) {
        let offset = self.offset(timeout, now)
            .unwrap_or(self.rows.len() - 1);

        let hand = match self.hand {
            Some(hand) => hand,
            None => {
                self.hand = Some(0);
                self.base = now;
                0
            },
        };

        let due = self.base + self.tick * offset as u32;
        if self.deadline > Expiration::When(due) {
            self.deadline = Expiration::When(due);
        }

        let row = (hand + offset) % self.rows.len();
        (row, due)
    }

    fn place(&self, row: usize) -> Place {
        Place::Calendar(row)
    }

    fn rows_mut(&mut self) -> &mut Rows {
        &mut self.rows
    }
}

/// The number of whole ticks covering a timeout, rounded up.
fn ticks_of(timeout: Duration, tick: Duration) -> usize {
    let tick = tick.as_nanos().max(1);
    let ticks = (timeout.as_nanos() + tick - 1) / tick;
    ticks.min(usize::max_value() as u128) as usize
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};
    use proptest::prelude::*;
    use super::*;
    use crate::layer::tcp::shell::{FourTuple, Shell, ShellPool, ShellState, Substate};
    use crate::wire::TcpSeqNumber;

    fn shell(pool: &ShellPool, port: u16) -> ShellHandle {
        let tuple = FourTuple {
            local: IpAddr::V4(Ipv4Addr::LOCALHOST),
            remote: IpAddr::V4(Ipv4Addr::LOCALHOST),
            local_port: 22,
            remote_port: port,
        };
        pool.acquire(tuple, ShellState {
            substate: Substate::TimeWait,
            rcv_nxt: TcpSeqNumber(0),
            snd_nxt: TcpSeqNumber(0),
            rcv_wnd: 0,
            ts_recent: 0,
            ts_recent_stamp: None,
            timeout: Duration::from_secs(60),
        }).unwrap()
    }

    fn at(millis: i64) -> Instant {
        Instant::from_millis(millis)
    }

    #[test]
    fn ring_full_length() {
        let config = Config::default();
        let wheel = TimerWheel::new(&config);
        let pool = ShellPool::new(4);
        let a = shell(&pool, 1);

        assert!(wheel.schedule(&a, config.timewait_len, at(0)));
        assert_eq!(wheel.slow_deadline(), Expiration::When(at(7500)));
        assert_eq!(a.ttd(), Expiration::When(at(60_000)));
        assert_eq!(wheel.calendar_deadline(), Expiration::Never);
        assert_eq!(Shell::refcount(&a), 2);

        for tick in 1..8 {
            assert!(wheel.tick_slow(at(tick * 7500)).is_empty(), "early at tick {}", tick);
        }
        let expired = wheel.tick_slow(at(60_000));
        assert_eq!(expired.len(), 1);
        assert!(Arc::ptr_eq(&expired[0], &a));
        assert!(a.is_killed());
        assert_eq!(wheel.slow_deadline(), Expiration::Never);
        assert!(wheel.is_empty());
        assert!(wheel.is_consistent());
    }

    #[test]
    fn zero_and_oversized_timeouts_clamp() {
        let config = Config::default();
        let wheel = TimerWheel::new(&config);
        let pool = ShellPool::new(4);
        let zero = shell(&pool, 1);
        let huge = shell(&pool, 2);

        wheel.schedule(&zero, Duration::from_millis(0), at(0));
        assert_eq!(zero.ttd(), Expiration::When(at(125)));
        assert_eq!(wheel.calendar_deadline(), Expiration::When(at(125)));

        wheel.schedule(&huge, Duration::from_secs(3600), at(0));
        assert_eq!(huge.ttd(), Expiration::When(at(60_000)));
        assert!(wheel.is_consistent());
    }

    #[test]
    fn calendar_recycles() {
        let config = Config::default();
        let wheel = TimerWheel::new(&config);
        let pool = ShellPool::new(4);
        let short = shell(&pool, 1);
        let later = shell(&pool, 2);

        wheel.schedule(&short, Duration::from_millis(300), at(1000));
        wheel.schedule(&later, Duration::from_millis(1000), at(1000));
        assert_eq!(wheel.calendar_deadline(), Expiration::When(at(1375)));
        assert_eq!(wheel.len(), 2);

        assert!(wheel.tick_fast(at(1200)).is_empty());
        let expired = wheel.tick_fast(at(1375));
        assert_eq!(expired.len(), 1);
        assert!(Arc::ptr_eq(&expired[0], &short));
        assert_eq!(wheel.calendar_deadline(), Expiration::When(at(2000)));

        let expired = wheel.tick_fast(at(2000));
        assert_eq!(expired.len(), 1);
        assert_eq!(wheel.calendar_deadline(), Expiration::Never);
        assert_eq!(wheel.slow_deadline(), Expiration::Never);
        assert!(wheel.is_consistent());
    }

    #[test]
    fn reschedule_moves_between_tiers() {
        let config = Config::default();
        let wheel = TimerWheel::new(&config);
        let pool = ShellPool::new(4);
        let a = shell(&pool, 1);

        wheel.schedule(&a, Duration::from_millis(500), at(0));
        assert!(wheel.is_scheduled(&a));
        wheel.schedule(&a, config.timewait_len, at(100));
        assert_eq!(wheel.len(), 1);
        assert_eq!(Shell::refcount(&a), 2);
        assert!(wheel.tick_fast(at(500)).is_empty());
        assert_eq!(wheel.calendar_deadline(), Expiration::Never);
        assert!(wheel.is_consistent());
    }

    #[test]
    fn late_arrival_measured_from_hand() {
        let config = Config::default();
        let wheel = TimerWheel::new(&config);
        let pool = ShellPool::new(4);
        let long = shell(&pool, 1);
        let short = shell(&pool, 2);
        let late = shell(&pool, 3);

        wheel.schedule(&long, Duration::from_millis(3500), at(0));
        wheel.schedule(&short, Duration::from_millis(300), at(0));
        let expired = wheel.tick_fast(at(375));
        assert_eq!(expired.len(), 1);
        assert_eq!(wheel.calendar_deadline(), Expiration::When(at(3500)));

        // Idle since 375, with nothing due before 3500.
        wheel.schedule(&late, Duration::from_millis(1000), at(2000));
        assert_eq!(late.ttd(), Expiration::When(at(3000)));
        assert_eq!(wheel.calendar_deadline(), Expiration::When(at(3000)));

        assert!(wheel.tick_fast(at(2125)).is_empty());
        assert!(!late.is_killed());
        let expired = wheel.tick_fast(at(3000));
        assert_eq!(expired.len(), 1);
        assert!(Arc::ptr_eq(&expired[0], &late));
        let expired = wheel.tick_fast(at(3500));
        assert!(Arc::ptr_eq(&expired[0], &long));
        assert!(wheel.is_consistent());
    }

    #[test]
    fn beyond_calendar_reach_goes_to_ring() {
        let config = Config::default();
        let wheel = TimerWheel::new(&config);
        let pool = ShellPool::new(4);
        let first = shell(&pool, 1);
        let second = shell(&pool, 2);

        wheel.schedule(&first, Duration::from_millis(3500), at(0));
        // Below the calendar span, yet ending past the last slot of a hand at 0.
        wheel.schedule(&second, Duration::from_millis(3900), at(3400));
        assert_eq!(second.ttd(), Expiration::When(at(15_000)));

        let mut expired_at = Vec::new();
        while let Expiration::When(now) = wheel.next_deadline() {
            if wheel.calendar_deadline() <= Expiration::When(now) {
                for shell in wheel.tick_fast(now) {
                    expired_at.push((shell.tuple().remote_port, now));
                }
            }
            if wheel.slow_deadline() <= Expiration::When(now) {
                for shell in wheel.tick_slow(now) {
                    expired_at.push((shell.tuple().remote_port, now));
                }
            }
        }
        assert_eq!(expired_at, [(1, at(3500)), (2, at(15_000))]);
    }

    #[test]
    fn deschedule_once() {
        let config = Config::default();
        let wheel = TimerWheel::new(&config);
        let pool = ShellPool::new(4);
        let a = shell(&pool, 1);

        wheel.schedule(&a, config.timewait_len, at(0));
        assert!(wheel.deschedule(&a));
        assert!(!wheel.deschedule(&a));
        assert!(!wheel.schedule(&a, config.timewait_len, at(0)));
        assert_eq!(Shell::refcount(&a), 1);
        assert_eq!(wheel.slow_deadline(), Expiration::Never);
        assert!(wheel.tick_slow(at(7500)).is_empty());

        drop(a);
        assert_eq!(pool.retired(), 1);
    }

    #[test]
    fn fifo_within_row() {
        let config = Config::default();
        let wheel = TimerWheel::new(&config);
        let pool = ShellPool::new(8);
        let shells: Vec<_> = (0..5).map(|i| shell(&pool, i)).collect();
        for shell in &shells {
            wheel.schedule(shell, Duration::from_secs(7), at(0));
        }
        // Moving one to the back of its row.
        wheel.schedule(&shells[1], Duration::from_secs(7), at(0));

        assert!(wheel.tick_slow(at(7500)).is_empty());
        let expired = wheel.tick_slow(at(15000));
        let order: Vec<_> = expired.iter().map(|s| s.tuple().remote_port).collect();
        assert_eq!(order, [0, 2, 3, 4, 1]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        /// Shells expire at the first tick not before their timeout, as long as the host ticks
        /// each tier at its deadline.
        #[test]
        fn never_early(arrivals in proptest::collection::vec((0..2000u64, 0..50_000u64), 1..40)) {
            let config = Config::default();
            let wheel = TimerWheel::new(&config);
            let pool = ShellPool::new(arrivals.len());
            let mut now = at(0);
            let mut due = Vec::new();
            let mut expired = Vec::new();

            let run_until = |until: Instant, expired: &mut Vec<(ShellHandle, Instant)>| {
                while let Expiration::When(next) = wheel.next_deadline() {
                    if next > until {
                        break;
                    }
                    if wheel.calendar_deadline() <= Expiration::When(next) {
                        expired.extend(wheel.tick_fast(next).into_iter().map(|s| (s, next)));
                    }
                    if wheel.slow_deadline() <= Expiration::When(next) {
                        expired.extend(wheel.tick_slow(next).into_iter().map(|s| (s, next)));
                    }
                }
            };

            for (port, (gap, timeout)) in arrivals.into_iter().enumerate() {
                now += Duration::from_millis(gap);
                run_until(now, &mut expired);
                let shell = shell(&pool, port as u16);
                prop_assert!(wheel.schedule(&shell, Duration::from_millis(timeout), now));
                due.push(now + Duration::from_millis(timeout));
            }
            run_until(at(i64::max_value()), &mut expired);

            prop_assert!(wheel.is_empty());
            prop_assert_eq!(expired.len(), due.len());
            for (shell, when) in &expired {
                let port = usize::from(shell.tuple().remote_port);
                prop_assert!(*when >= due[port], "port {} due {} expired {}", port, due[port], when);
            }
        }
    }
}
